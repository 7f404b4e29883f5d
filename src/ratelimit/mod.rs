//! Attempt tracking: fingerprints, records and the in-memory store.

mod backend;
mod clock;
mod fingerprint;
mod record;
mod store;
mod sweeper;

pub use backend::AttemptStore;
pub use clock::{Clock, ManualClock, SystemClock};
pub use fingerprint::{
    canonicalize_address, fingerprint, resolve_client_address, Fingerprint,
    FORWARDED_FOR_HEADER, UNKNOWN_ADDRESS,
};
pub use record::AttemptRecord;
pub use store::MemoryStore;
