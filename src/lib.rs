//! Sokoni: PDF catalogue for local disks and SMB shares.
//!
//! Registered connections are walked for `.pdf` files, whose path, name, size and modification
//! time are upserted into SQLite in batches. A scheduler re-scans connections whose interval has
//! elapsed; [`scan`] covers on-demand scans.

pub mod engine;
pub mod error;
pub mod pipeline;
pub mod scan;
pub mod scheduler;
pub mod smb;
pub mod types;
pub mod utils;

/// Re-export types for API
pub use error::{ScanError, ScanResult};
pub use scheduler::{Scheduler, SchedulerHandle, TickReport};
pub use types::*;
