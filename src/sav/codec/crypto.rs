//! Encryption envelope for password-protected system files.
//!
//! An encrypted file keeps a short cleartext prefix followed by the system
//! file encrypted with AES-256 in ECB mode:
//!
//! ```text
//! 0        8              20         36                52
//! ┌────────┬──────────────┬──────────┬─────────────────┬──────────────
//! │  ...   │ ENCRYPTEDSAV │   ...    │ ciphertext blk 0│ blk 1 ...
//! └────────┴──────────────┴──────────┴─────────────────┴──────────────
//! ```
//!
//! The key is derived from the password with CMAC-AES256 used as the PRF of a
//! NIST SP 800-108 counter-mode KDF. Passwords may also be supplied in the
//! legacy obfuscated form, which [`decode_password`] reverses.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use aes::Aes256;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, KeyInit};
use log::{debug, info, trace};

use super::cmac::{BLOCK_LEN, Cmac};
use crate::sav::types::error::{Result, SavError};
use crate::sav::utils;

/// Marker at bytes 8..20 of an encrypted file.
pub const ENCRYPTED_MARKER: &[u8; 12] = b"ENCRYPTEDSAV";

/// Length of the prefix read when opening, ending with the first ciphertext block.
pub const PREFIX_LEN: usize = 52;

/// File offset of the first ciphertext block.
pub const CIPHERTEXT_OFFSET: usize = 36;

/// Passwords are truncated to this many bytes before key derivation.
pub const MAX_PASSWORD_LEN: usize = 10;

/// Longest obfuscated password accepted by [`decode_password`].
pub const MAX_ENCODED_LEN: usize = 20;

/// KDF input: counter `i = 1`, label, `0x00`, context, output length `L = 256`.
pub const KDF_INPUT: [u8; 73] = [
    // i
    0x00, 0x00, 0x00, 0x01,
    // label
    0x35, 0x27, 0x13, 0xcc, 0x53, 0xa7, 0x78, 0x89, 0x87, 0x53, 0x22, 0x11, 0xd6, 0x5b, 0x31, 0x58,
    0xdc, 0xfe, 0x2e, 0x7e, 0x94, 0xda, 0x2f, 0x00, 0xcc, 0x15, 0x71, 0x80, 0x0a, 0x6c, 0x63, 0x53,
    // delimiter
    0x00,
    // context
    0x38, 0xc3, 0x38, 0xac, 0x22, 0xf3, 0x63, 0x62, 0x0e, 0xce, 0x85, 0x3f, 0xb8, 0x07, 0x4c, 0x4e,
    0x2b, 0x77, 0xc7, 0x21, 0xf5, 0x1a, 0x80, 0x1d, 0x67, 0xfb, 0xe1, 0xe1, 0x83, 0x07, 0xd8, 0x0d,
    // L
    0x00, 0x00, 0x01, 0x00,
];

/// True if `prefix` carries the encryption marker.
pub fn is_encrypted_prefix(prefix: &[u8]) -> bool {
    prefix.len() >= PREFIX_LEN && prefix[8..20] == ENCRYPTED_MARKER[..]
}

/// Derives the AES-256 key for `password`.
///
/// # Algorithm
/// 1. Truncate the password to 10 bytes and zero-pad it to 32
/// 2. `mac = CMAC-AES256(padded, KDF_INPUT)`
/// 3. `key = mac || mac`
pub fn derive_key(password: &[u8]) -> [u8; 32] {
    let mut padded = [0u8; 32];
    let n = password.len().min(MAX_PASSWORD_LEN);
    padded[..n].copy_from_slice(&password[..n]);

    let mac = Cmac::new(&padded).mac(&KDF_INPUT);
    let mut key = [0u8; 32];
    key[..BLOCK_LEN].copy_from_slice(&mac);
    key[BLOCK_LEN..].copy_from_slice(&mac);
    key
}

/// A validated key schedule and the first decrypted block.
pub struct CipherState {
    cipher: Aes256,
    first_plaintext: [u8; BLOCK_LEN],
}

impl CipherState {
    pub fn first_plaintext(&self) -> &[u8; BLOCK_LEN] {
        &self.first_plaintext
    }
}

/// Tries `password` against the first ciphertext block.
///
/// Returns the cipher state only when the decrypted block starts with `$FL`.
pub fn derive_and_verify(password: &[u8], first_block: &[u8; BLOCK_LEN]) -> Option<CipherState> {
    let key = derive_key(password);
    let cipher = Aes256::new(GenericArray::from_slice(&key));
    let mut block = *first_block;
    decrypt_in_place(&cipher, &mut block);
    trace!("Trial decryption of first block: {}", hex::encode(block));
    block.starts_with(b"$FL").then_some(CipherState {
        cipher,
        first_plaintext: block,
    })
}

fn decrypt_in_place(cipher: &Aes256, block: &mut [u8; BLOCK_LEN]) {
    cipher.decrypt_block(GenericArray::from_mut_slice(block));
}

// Candidate masks for each nibble of a decoded byte. Bit `n` of a mask is set
// when nibble value `n` is possible. A pair decodes when the masks for each
// nibble intersect in exactly one bit.

/// High nibble candidates, indexed by the high nibble of the first character.
const HIGH_A: [u16; 16] = [
    0, 0, 0x00cc, 0x0033, 0x3300, 0xcc00, 0xcc00, 0x3300, 0, 0, 0, 0, 0, 0, 0, 0,
];

/// High nibble candidates, indexed by the high nibble of the second character.
const HIGH_B: [u16; 16] = [
    0, 0, 0x0a0a, 0x0505, 0x5050, 0xa0a0, 0xa0a0, 0x5050, 0, 0, 0, 0, 0, 0, 0, 0,
];

/// Low nibble candidates, indexed by the low nibble of the first character.
const LOW_A: [u16; 16] = [
    0x0033, 0x00cc, 0x00cc, 0x0033, 0x3300, 0xcc00, 0xcc00, 0x3300, 0x3300, 0xcc00, 0xcc00,
    0x3300, 0x0033, 0x00cc, 0x00cc, 0x0033,
];

/// Low nibble candidates, indexed by the low nibble of the second character.
const LOW_B: [u16; 16] = [
    0x0505, 0x0a0a, 0x0a0a, 0x0505, 0x5050, 0xa0a0, 0xa0a0, 0x5050, 0x5050, 0xa0a0, 0xa0a0,
    0x5050, 0x0505, 0x0a0a, 0x0a0a, 0x0505,
];

fn single_nibble(mask: u16) -> Option<u8> {
    (mask.count_ones() == 1).then(|| mask.trailing_zeros() as u8)
}

/// Decodes one obfuscated character pair into a plaintext byte.
pub fn decode_pair(a: u8, b: u8) -> Option<u8> {
    let high = single_nibble(HIGH_A[(a >> 4) as usize] & HIGH_B[(b >> 4) as usize])?;
    let low = single_nibble(LOW_A[(a & 15) as usize] & LOW_B[(b & 15) as usize])?;
    Some((high << 4) | low)
}

/// Reverses the legacy password obfuscation.
///
/// The encoded form has an even length of at most 20 bytes; each pair maps to
/// one plaintext byte. A pair that does not resolve, or resolves to NUL,
/// rejects the whole password.
pub fn decode_password(encoded: &[u8]) -> Option<Vec<u8>> {
    if encoded.len() > MAX_ENCODED_LEN || encoded.len() % 2 != 0 {
        return None;
    }
    encoded
        .chunks_exact(2)
        .map(|pair| decode_pair(pair[0], pair[1]).filter(|&byte| byte != 0))
        .collect()
}

/// Decrypting byte stream over an encrypted system file.
///
/// Created locked by [`EncryptedReader::open`] or [`EncryptedReader::from_reader`];
/// reads fail until [`EncryptedReader::unlock`] succeeds. The plaintext starts
/// at offset 0 of the inner system file.
pub struct EncryptedReader<R> {
    inner: R,
    cipher: Option<Aes256>,
    first_block: [u8; BLOCK_LEN],
    plaintext: [u8; BLOCK_LEN],
    cursor: usize,
    /// File offset of the next ciphertext block.
    offset: u64,
}

impl EncryptedReader<BufReader<File>> {
    /// Opens `path`, returning `Ok(None)` if it is not an encrypted file.
    pub fn open(path: impl AsRef<Path>) -> Result<Option<Self>> {
        let file = File::open(path.as_ref())?;
        Self::from_reader(BufReader::new(file))
    }
}

impl<R: Read> EncryptedReader<R> {
    /// Reads the 52-byte prefix of `inner`.
    ///
    /// A short stream or a missing marker yields `Ok(None)`; I/O failures are errors.
    pub fn from_reader(mut inner: R) -> Result<Option<Self>> {
        let mut prefix = [0u8; PREFIX_LEN];
        let n = utils::read_up_to(&mut inner, &mut prefix)?;
        if !is_encrypted_prefix(&prefix[..n]) {
            debug!("No encryption marker in {}-byte prefix", n);
            return Ok(None);
        }
        info!("Encrypted system file detected");
        let mut first_block = [0u8; BLOCK_LEN];
        first_block.copy_from_slice(&prefix[CIPHERTEXT_OFFSET..]);
        Ok(Some(Self {
            inner,
            cipher: None,
            first_block,
            plaintext: [0u8; BLOCK_LEN],
            cursor: BLOCK_LEN,
            offset: PREFIX_LEN as u64,
        }))
    }

    pub fn is_locked(&self) -> bool {
        self.cipher.is_none()
    }

    /// Tries `password` as given, then its legacy decoding.
    ///
    /// A failed attempt leaves the reader unchanged. Unlocking an unlocked
    /// reader is a no-op that reports success.
    pub fn unlock(&mut self, password: &[u8]) -> bool {
        if !self.is_locked() {
            return true;
        }
        let state = derive_and_verify(password, &self.first_block).or_else(|| {
            let decoded = decode_password(password)?;
            debug!("Retrying with decoded legacy password");
            derive_and_verify(&decoded, &self.first_block)
        });
        match state {
            Some(state) => {
                info!("Password accepted");
                self.plaintext = state.first_plaintext;
                self.cursor = 0;
                self.cipher = Some(state.cipher);
                true
            }
            None => {
                debug!("Password rejected");
                false
            }
        }
    }

    /// Loads and decrypts the next block. Returns `false` at a clean end of stream.
    fn refill(&mut self) -> io::Result<bool> {
        let Some(cipher) = &self.cipher else {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                SavError::Locked,
            ));
        };
        let mut block = [0u8; BLOCK_LEN];
        let n = utils::read_up_to(&mut self.inner, &mut block)?;
        match n {
            0 => Ok(false),
            BLOCK_LEN => {
                decrypt_in_place(cipher, &mut block);
                self.plaintext = block;
                self.cursor = 0;
                self.offset += BLOCK_LEN as u64;
                Ok(true)
            }
            partial => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                SavError::CorruptCiphertext {
                    offset: self.offset,
                    len: partial,
                },
            )),
        }
    }
}

impl<R: Read> Read for EncryptedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.cursor == BLOCK_LEN && !self.refill()? {
            return Ok(0);
        }
        let available = &self.plaintext[self.cursor..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.cursor += n;
        Ok(n)
    }
}
