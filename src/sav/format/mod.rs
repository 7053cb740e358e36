//! File format parsing layer for system files.
//!
//! This module sits between the primitive reads of [`codec`](crate::sav::codec)
//! and the session in [`SavReader`](crate::sav::reader::SavReader).
//!
//! # Module Organization
//!
//! - [`header`]: Fixed 176-byte header and format detection
//! - [`records`]: Tag dispatch for dictionary records
//! - [`extension`]: Subtype dispatch for type-7 records
//! - [`text`]: Tokenizer for text-valued extension payloads
//! - [`zlib`]: ZHeader/ZTrailer container of `$FL3` case data
//!
//! # Architecture
//!
//! ```text
//! File Structure:
//! ┌─────────────────┐
//! │  Header         │ ← header::parse()
//! ├─────────────────┤
//! │  Dictionary     │ ← records::read_record()
//! │  records 2..7   │     └─ tag 7 → extension::decode()
//! │  999 + filler   │
//! ├─────────────────┤
//! │  Case data      │ ← codec::compression
//! │  ($FL3: zlib    │   zlib::read_zheader() / read_blocks()
//! │   container)    │
//! └─────────────────┘
//! ```

pub mod extension;
pub mod header;
pub mod records;
pub mod text;
pub mod zlib;
