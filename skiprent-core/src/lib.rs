pub mod clock;
pub mod money;
pub mod payment;

pub use clock::{Clock, ManualClock, SystemClock};
pub use money::{round2, Amount};
pub use payment::PaymentStatus;

/// Failure of a persistence backend (Postgres, in-memory lock, decoding a row).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;
