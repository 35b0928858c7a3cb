pub mod course;
pub mod error;
pub mod registry;
pub mod snapshot;
pub mod storage;

pub use error::{ChainError, ErrorClass, Result};
