/// Pending batch and the periodic flush timer
pub mod flush_timer;
pub mod pending_batch;

pub use flush_timer::{FlushTimer, TickReason};
pub use pending_batch::PendingBatch;
