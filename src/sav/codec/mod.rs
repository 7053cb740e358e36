//! Codec layer: primitive reads, encryption and compression.
//!
//! # Submodules
//!
//! - [`endian`][]: Byte-order and float-format detection and decoding
//! - [`cmac`][]: CMAC-AES256, the PRF of the key derivation
//! - [`crypto`][]: Encryption envelope (password unlock, decrypting reader)
//! - [`compression`][]: Opcode and DEFLATE-block case-data decoders

pub mod cmac;
pub mod compression;
pub mod crypto;
pub mod endian;
