//! CMAC over AES-256 (NIST SP 800-38B).
//!
//! Only the key derivation of the encryption envelope uses this MAC; it is
//! never used to authenticate file contents.

use aes::Aes256;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit};

pub const BLOCK_LEN: usize = 16;

/// Constant XORed into a doubled block whose top bit was shifted out.
const RB: u8 = 0x87;

/// A CMAC-AES256 instance with its precomputed subkeys.
pub struct Cmac {
    cipher: Aes256,
    k1: [u8; BLOCK_LEN],
    k2: [u8; BLOCK_LEN],
}

impl Cmac {
    /// Expands `key` and derives the subkeys.
    ///
    /// # Algorithm
    /// 1. `L = AES-256(key, 0^128)`
    /// 2. `K1 = L << 1`, XOR `0x87` into the last byte if the MSB of `L` was set
    /// 3. `K2` is derived from `K1` the same way
    pub fn new(key: &[u8; 32]) -> Self {
        let cipher = Aes256::new(GenericArray::from_slice(key));
        let mut l = [0u8; BLOCK_LEN];
        encrypt_in_place(&cipher, &mut l);
        let k1 = double(&l);
        let k2 = double(&k1);
        Self { cipher, k1, k2 }
    }

    pub fn subkeys(&self) -> (&[u8; BLOCK_LEN], &[u8; BLOCK_LEN]) {
        (&self.k1, &self.k2)
    }

    /// Computes the 128-bit tag of `message`.
    ///
    /// The final block is XORed with `K1` when complete, otherwise padded with
    /// `0x80 00..` and XORed with `K2`. An empty message is one padded block.
    pub fn mac(&self, message: &[u8]) -> [u8; BLOCK_LEN] {
        let n_blocks = message.len().div_ceil(BLOCK_LEN).max(1);
        let complete = !message.is_empty() && message.len() % BLOCK_LEN == 0;

        let mut state = [0u8; BLOCK_LEN];
        for chunk in message.chunks(BLOCK_LEN).take(n_blocks - 1) {
            xor_into(&mut state, chunk);
            encrypt_in_place(&self.cipher, &mut state);
        }

        let tail = &message[(n_blocks - 1) * BLOCK_LEN..];
        let mut last = [0u8; BLOCK_LEN];
        last[..tail.len()].copy_from_slice(tail);
        if complete {
            xor_into(&mut last, &self.k1);
        } else {
            last[tail.len()] = 0x80;
            xor_into(&mut last, &self.k2);
        }
        xor_into(&mut state, &last);
        encrypt_in_place(&self.cipher, &mut state);
        state
    }
}

/// One-shot CMAC-AES256.
pub fn cmac_aes256(key: &[u8; 32], message: &[u8]) -> [u8; BLOCK_LEN] {
    Cmac::new(key).mac(message)
}

fn encrypt_in_place(cipher: &Aes256, block: &mut [u8; BLOCK_LEN]) {
    cipher.encrypt_block(GenericArray::from_mut_slice(block));
}

/// Doubling in GF(2^128): shift left one bit, reduce by `RB`.
fn double(block: &[u8; BLOCK_LEN]) -> [u8; BLOCK_LEN] {
    let mut out = [0u8; BLOCK_LEN];
    for i in 0..BLOCK_LEN {
        let carry = block.get(i + 1).map_or(0, |next| next >> 7);
        out[i] = (block[i] << 1) | carry;
    }
    if block[0] & 0x80 != 0 {
        out[BLOCK_LEN - 1] ^= RB;
    }
    out
}

fn xor_into(target: &mut [u8; BLOCK_LEN], other: &[u8]) {
    for (t, o) in target.iter_mut().zip(other) {
        *t ^= o;
    }
}
