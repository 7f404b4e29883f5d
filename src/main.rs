use std::path::PathBuf;

use clap::Parser;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use block_ddos::middleware::{RecordedResponse, RequestInfo};
use block_ddos::{BlockGuard, GuardConfig};

/// Replay request lines from stdin through a block guard.
///
/// Each line is `<addr> <METHOD> <path> [blocked-times]`. One JSON decision
/// is printed per request.
#[derive(Debug, Parser)]
#[command(name = "block-ddos", version, about)]
struct Args {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the sliding window length in milliseconds
    #[arg(long)]
    window_ms: Option<u64>,

    /// Override the attempt ceiling
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.json_logs);

    info!("Starting block-ddos replay");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = GuardConfig::load(args.config.as_deref())?;
    if let Some(window_ms) = args.window_ms {
        config.window_ms = window_ms;
    }
    if let Some(max_attempts) = args.max_attempts {
        config.max_attempts = max_attempts;
    }

    let guard = BlockGuard::new(config)?;
    info!(
        window_ms = guard.config().window_ms,
        max_attempts = guard.config().max_attempts,
        "Configuration loaded"
    );

    let cookie_name = guard.config().cookie_name.clone();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut line_no = 0usize;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some(request) = parse_request(line, &cookie_name) else {
            warn!(line = line_no, "Skipping malformed request line");
            continue;
        };

        let mut response = RecordedResponse::new();
        let accepted = guard.handle(&request, &mut response, || ()).is_some();

        let output = json!({
            "line": line_no,
            "accepted": accepted,
            "status": response.status.unwrap_or(200),
            "body": response.body,
            "cookie": response
                .cookie(&cookie_name)
                .map(|cookie| cookie.options.to_set_cookie(&cookie.name, &cookie.value)),
        });
        println!("{}", output);
    }

    info!(records = guard.store().len(), "Replay finished");
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn parse_request(line: &str, cookie_name: &str) -> Option<RequestInfo> {
    let mut fields = line.split_whitespace();
    let addr = fields.next()?;
    let method = fields.next()?;
    let path = fields.next()?;

    let mut request = RequestInfo::new(method, path).with_ip(addr);
    if let Some(blocked_times) = fields.next() {
        request = request.with_cookie(cookie_name, blocked_times);
    }
    if fields.next().is_some() {
        return None;
    }
    Some(request)
}
