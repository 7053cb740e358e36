//! Error and warning types for the sav-reader crate.
//!
//! Structural problems are fatal and surface as [`SavError`], always naming the
//! byte offset where decoding stopped. Recoverable oddities are collected as
//! [`Warning`]s so a caller can still obtain a best-effort parse.

use log::warn;
use thiserror::Error;

/// The primary error type for all operations in this crate.
#[derive(Debug, Error)]
pub enum SavError {
    /// An error originating from I/O operations.
    #[error("I/O error: {0:?}")]
    Io(#[from] std::io::Error),

    /// The stream ended in the middle of a structure.
    #[error("Unexpected end of file at offset {offset:#x}")]
    UnexpectedEof { offset: u64 },

    /// Neither the magic nor the layout code identify a system file.
    #[error("Not a system file at offset {offset:#x}: {reason}")]
    NotASystemFile { offset: u64, reason: String },

    /// The stream is wrapped in the encryption envelope and was read without unlocking.
    #[error("File is encrypted; unlock it with a password before reading")]
    Encrypted,

    /// An encrypted session was read before a valid password was supplied.
    #[error("Encrypted session is locked: no valid password has been supplied")]
    Locked,

    /// The compression flag is not valid for the magic that introduced the file.
    #[error("Invalid compression code {code} for {magic} file at offset {offset:#x}")]
    BadCompression {
        offset: u64,
        magic: &'static str,
        code: i32,
    },

    #[error("Variable label indicator is {value}, not 0 or 1 (offset {offset:#x})")]
    BadVariableLabelCode { offset: u64, value: i32 },

    #[error("Missing value code {code} is invalid for a variable of width {width} (offset {offset:#x})")]
    BadMissingValueCode { offset: u64, width: i32, code: i32 },

    #[error("String variables may not have missing value ranges (offset {offset:#x})")]
    MissingValueStringRange { offset: u64 },

    /// A value label record (type 3) was not followed by its variable index record (type 4).
    #[error("Expected variable index record (type 4) after value labels, found type {tag} at offset {offset:#x}")]
    ExpectedVarIndexRecord { offset: u64, tag: i32 },

    #[error("Misplaced variable index record (type 4) at offset {offset:#x}")]
    MisplacedVarIndexRecord { offset: u64 },

    #[error("Unrecognized record type {tag} at offset {offset:#x}")]
    UnrecognizedRecordType { offset: u64, tag: i32 },

    /// A fixed-layout extension record declared the wrong element size or count.
    #[error("Extension subtype {subtype} has size {size} and count {count}; expected {expected} (offset {offset:#x})")]
    BadExtensionSize {
        offset: u64,
        subtype: i32,
        size: u32,
        count: u32,
        expected: &'static str,
    },

    #[error("Extension subtype {subtype} declares {size} x {count} bytes, which overflows (offset {offset:#x})")]
    ExtensionTooLarge {
        offset: u64,
        subtype: i32,
        size: u32,
        count: u32,
    },

    /// Syntax error inside the text payload of an extension record.
    #[error("Text record syntax error at offset {offset:#x}: {message}")]
    TextRecord { offset: u64, message: String },

    /// The file is structurally invalid in a way no dedicated variant covers.
    #[error("Invalid format at offset {offset:#x}: {message}")]
    InvalidFormat { offset: u64, message: String },

    /// The ciphertext stream ended inside a 16-byte block.
    #[error("Ciphertext ends with a partial {len}-byte block at offset {offset:#x}")]
    CorruptCiphertext { offset: u64, len: usize },

    #[error("Decompression failed at offset {offset:#x}: {message}")]
    DecompressionError { offset: u64, message: String },
}

impl SavError {
    /// Shorthand for [`SavError::InvalidFormat`].
    pub fn invalid(offset: u64, message: impl Into<String>) -> Self {
        SavError::InvalidFormat {
            offset,
            message: message.into(),
        }
    }

    /// Converts an I/O error raised at `offset`, unwrapping errors this crate
    /// tunnelled through `std::io::Read` and naming the offset of a short read.
    pub fn from_io(error: std::io::Error, offset: u64) -> Self {
        if error
            .get_ref()
            .is_some_and(|inner| inner.is::<SavError>())
        {
            if let Some(inner) = error.into_inner()
                && let Ok(sav) = inner.downcast::<SavError>()
            {
                return *sav;
            }
            return SavError::invalid(offset, "unreadable wrapped error");
        }
        if error.kind() == std::io::ErrorKind::UnexpectedEof {
            return SavError::UnexpectedEof { offset };
        }
        SavError::Io(error)
    }
}

/// A convenience `Result` type alias using the crate's `SavError` type.
pub type Result<T> = std::result::Result<T, SavError>;

/// The recoverable conditions reported while decoding.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WarningKind {
    #[error("Compression bias is {0} instead of the usual 100")]
    UnexpectedBias(f64),

    #[error("Floating-point format of the bias is not recognized; assuming IEEE double in file byte order")]
    UnknownFloatFormat,

    #[error("Missing values on a continuation variable record are ignored")]
    ContinuationMissingValues,

    #[error("Variable index {index} is outside the range 1..={max}")]
    VarIndexOutOfRange { index: i32, max: usize },

    #[error("Machine integer info declares {field} {declared} but the file uses {detected}")]
    IntegerInfoMismatch {
        field: &'static str,
        declared: i32,
        detected: i32,
    },

    #[error("{name} is {actual:e} but {expected:e} was expected")]
    FloatInfoMismatch {
        name: &'static str,
        actual: f64,
        expected: f64,
    },

    #[error("Character encoding {0:?} is not recognized")]
    UnknownEncoding(String),

    #[error("Extension subtype {subtype}: {message}")]
    TextSyntax { subtype: i32, message: String },

    #[error("Attribute value {0:?} is not enclosed in single quotes")]
    UnquotedAttribute(String),

    #[error("Could not decode extension subtype {subtype}: {message}")]
    ExtensionDecode { subtype: i32, message: String },

    #[error("Unrecognized record type 7, subtype {0}")]
    UnknownSubtype(i32),

    #[error("zlib layout: {0}")]
    ZlibLayout(String),

    #[error("Opcode {opcode} is not valid for the {kind} variable in case slot {slot}")]
    OpcodeKindMismatch {
        opcode: u8,
        slot: usize,
        kind: &'static str,
    },
}

/// A recoverable condition together with the byte offset where it was found.
#[derive(Debug, Clone, PartialEq)]
pub struct Warning {
    pub offset: u64,
    pub kind: WarningKind,
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "offset {:#x}: {}", self.offset, self.kind)
    }
}

/// Accumulates warnings for one reader session, logging each as it arrives.
///
/// An optional limit caps how many are retained; the rest are only counted.
#[derive(Debug, Default)]
pub struct Warnings {
    items: Vec<Warning>,
    limit: Option<usize>,
    suppressed: usize,
}

impl Warnings {
    pub fn with_limit(limit: Option<usize>) -> Self {
        Self {
            items: Vec::new(),
            limit,
            suppressed: 0,
        }
    }

    pub fn push(&mut self, offset: u64, kind: WarningKind) {
        warn!("offset {:#x}: {}", offset, kind);
        if self.limit.is_some_and(|limit| self.items.len() >= limit) {
            self.suppressed += 1;
            return;
        }
        self.items.push(Warning { offset, kind });
    }

    pub fn as_slice(&self) -> &[Warning] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of warnings dropped after the limit was reached.
    pub fn suppressed(&self) -> usize {
        self.suppressed
    }

    pub fn take(&mut self) -> Vec<Warning> {
        std::mem::take(&mut self.items)
    }
}
