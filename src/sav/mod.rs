//! Core system-file reader module

pub mod codec;
pub mod format;
pub mod iter;
pub mod reader;
pub mod types;
pub mod utils;

pub use reader::{ReaderOptions, SavReader};
pub use types::error::{Result, SavError, Warning, WarningKind};
pub use types::models;
