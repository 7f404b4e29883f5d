//! Middleware entry point and the host-facing request/response seams.

mod guard;
mod request;
mod response;

pub use guard::{BlockGuard, Decision, RejectReason, Rejection};
pub use request::RequestInfo;
pub use response::{CookieOptions, RecordedResponse, ResponseCookie, ResponseSink};
