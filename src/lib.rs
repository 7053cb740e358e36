//! # sav-reader
//!
//! A reader for statistical-package system files (`.sav` and `.zsav`).
//! Detects byte order and floating-point format, decodes every dictionary
//! record including the extension subtypes, and reads case data stored
//! uncompressed, opcode-compressed or in zlib blocks. Encrypted files are
//! opened with a password.
pub mod sav;

// Re-export the main types for convenience
pub use sav::{
    ReaderOptions, Result, SavError, SavReader, Warning, WarningKind,
    iter::{CaseIter, CaseValueIter, RecordIter},
    models::{
        CaseValue, Extension, ExtensionRecord, FileFormat, FileHeader, Record, SlotValue,
        VariableRecord,
    },
};
