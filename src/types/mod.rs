pub mod error;
pub mod event;
pub mod service;

pub use error::{AppError, Result};
pub use event::{ChangeEvent, ContentHash};
pub use service::{ServiceRecord, Snapshot};
