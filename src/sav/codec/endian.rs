//! Byte-order and float-format aware primitive reads.
//!
//! A system file records its integers in the writer's native byte order and
//! its doubles in the writer's native floating-point encoding. Neither is
//! flagged explicitly; both are inferred from constants in the header:
//!
//! ```text
//! offset 64  [4 bytes]  layout code   -> must decode to 2 or 3
//! offset 84  [8 bytes]  bias          -> must decode to 100.0
//! ```
//!
//! [`EndianReader`] wraps any `Read`, tracks the absolute stream offset for
//! error reporting, and decodes every field with the detected formats.

use std::io::{self, Read};

use byteorder::{BigEndian, ByteOrder as _, LittleEndian};
use log::trace;

use crate::sav::types::error::{Result, SavError};
use crate::sav::types::models::{ByteOrder, FloatFormat};
use crate::sav::utils;

const EXPECTED_BIAS: f64 = 100.0;

/// Candidate byte orders, in the order they are tried.
const BYTE_ORDERS: [ByteOrder; 2] = [ByteOrder::Big, ByteOrder::Little];

/// Reader for fixed-width fields in the detected file formats.
#[derive(Debug)]
pub struct EndianReader<R> {
    inner: R,
    offset: u64,
    byte_order: ByteOrder,
    float_format: FloatFormat,
}

impl<R: Read> EndianReader<R> {
    /// Wraps `inner`, assuming little-endian IEEE until formats are detected.
    pub fn new(inner: R) -> Self {
        Self::with_offset(inner, 0)
    }

    /// Wraps `inner` whose first byte sits at `offset` in the logical stream.
    pub fn with_offset(inner: R, offset: u64) -> Self {
        Self {
            inner,
            offset,
            byte_order: ByteOrder::Little,
            float_format: FloatFormat::IeeeDoubleLe,
        }
    }

    /// A reader over `bytes` sharing this reader's formats, for decoding a
    /// payload that has already been read in full.
    pub fn slice<'b>(&self, bytes: &'b [u8], offset: u64) -> EndianReader<&'b [u8]> {
        EndianReader {
            inner: bytes,
            offset,
            byte_order: self.byte_order,
            float_format: self.float_format,
        }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    pub fn float_format(&self) -> FloatFormat {
        self.float_format
    }

    pub fn set_formats(&mut self, byte_order: ByteOrder, float_format: FloatFormat) {
        self.byte_order = byte_order;
        self.float_format = float_format;
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    pub fn read_bytes<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        self.inner
            .read_exact(&mut buf)
            .map_err(|e| SavError::from_io(e, self.offset))?;
        self.offset += N as u64;
        Ok(buf)
    }

    /// Reads exactly `len` bytes without trusting `len` for preallocation.
    pub fn read_vec(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        let got = (&mut self.inner)
            .take(len as u64)
            .read_to_end(&mut buf)
            .map_err(|e| SavError::from_io(e, self.offset))?;
        if got < len {
            return Err(SavError::UnexpectedEof {
                offset: self.offset + got as u64,
            });
        }
        self.offset += len as u64;
        Ok(buf)
    }

    /// Reads an `n`-byte fixed-width string field verbatim.
    pub fn read_fixed_string(&mut self, n: usize) -> Result<Vec<u8>> {
        self.read_vec(n)
    }

    pub fn skip(&mut self, n: u64) -> Result<()> {
        let skipped = io::copy(&mut (&mut self.inner).take(n), &mut io::sink())
            .map_err(|e| SavError::from_io(e, self.offset))?;
        if skipped < n {
            return Err(SavError::UnexpectedEof {
                offset: self.offset + skipped,
            });
        }
        self.offset += n;
        Ok(())
    }

    /// Reads up to `buf.len()` bytes, stopping early only at end of stream.
    pub fn fill(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = utils::read_up_to(&mut self.inner, buf)
            .map_err(|e| SavError::from_io(e, self.offset))?;
        self.offset += n as u64;
        Ok(n)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bytes::<1>()?[0])
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        let bytes = self.read_bytes::<4>()?;
        Ok(self.decode_i32(bytes))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let bytes = self.read_bytes::<4>()?;
        Ok(match self.byte_order {
            ByteOrder::Big => BigEndian::read_u32(&bytes),
            ByteOrder::Little => LittleEndian::read_u32(&bytes),
        })
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        let bytes = self.read_bytes::<8>()?;
        Ok(match self.byte_order {
            ByteOrder::Big => BigEndian::read_i64(&bytes),
            ByteOrder::Little => LittleEndian::read_i64(&bytes),
        })
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let bytes = self.read_bytes::<8>()?;
        Ok(match self.byte_order {
            ByteOrder::Big => BigEndian::read_u64(&bytes),
            ByteOrder::Little => LittleEndian::read_u64(&bytes),
        })
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        let bytes = self.read_bytes::<8>()?;
        Ok(self.decode_f64(bytes))
    }

    /// Reads a 32-bit length or count that must not be negative.
    pub fn read_len(&mut self, what: &str) -> Result<usize> {
        let offset = self.offset;
        let value = self.read_i32()?;
        usize::try_from(value)
            .map_err(|_| SavError::invalid(offset, format!("negative {}: {}", what, value)))
    }

    pub fn decode_i32(&self, bytes: [u8; 4]) -> i32 {
        decode_i32(self.byte_order, bytes)
    }

    pub fn decode_f64(&self, bytes: [u8; 8]) -> f64 {
        decode_float(self.float_format, bytes)
    }
}

pub fn decode_i32(byte_order: ByteOrder, bytes: [u8; 4]) -> i32 {
    match byte_order {
        ByteOrder::Big => BigEndian::read_i32(&bytes),
        ByteOrder::Little => LittleEndian::read_i32(&bytes),
    }
}

/// Infers the integer byte order from the 4-byte layout code.
///
/// Returns the byte order and the decoded code, which is always 2 or 3.
pub fn detect_byte_order(layout_code: [u8; 4]) -> Option<(ByteOrder, i32)> {
    BYTE_ORDERS.iter().find_map(|&order| {
        let code = decode_i32(order, layout_code);
        matches!(code, 2 | 3).then_some((order, code))
    })
}

/// Infers the float encoding from the 8-byte compression bias.
///
/// The IEEE encoding implied by `byte_order` is tried first. `None` means no
/// encoding decodes the bias to 100.0.
pub fn detect_float_format(bias: [u8; 8], byte_order: ByteOrder) -> Option<FloatFormat> {
    let implied = FloatFormat::ieee_for(byte_order);
    let other = match implied {
        FloatFormat::IeeeDoubleBe => FloatFormat::IeeeDoubleLe,
        _ => FloatFormat::IeeeDoubleBe,
    };
    [implied, other, FloatFormat::VaxD, FloatFormat::VaxG, FloatFormat::IbmHex]
        .into_iter()
        .find(|&format| {
            let value = decode_float(format, bias);
            trace!("Bias candidate {:?} decodes to {}", format, value);
            (value - EXPECTED_BIAS).abs() < 1e-9
        })
}

/// Decodes an 8-byte double stored in `format`.
///
/// # Layouts
/// ```text
/// VAX D   s eeeeeeee fff...(55)   value = (1 + f/2^55) * 2^(e-129)
/// VAX G   s eeeeeeeeeee fff...(52) value = (1 + f/2^52) * 2^(e-1025)
/// IBM     s eeeeeee fff...(56)     value = f/2^56 * 16^(e-64)
/// ```
/// VAX bit patterns are stored as four little-endian 16-bit words, most
/// significant word first. IBM doubles are big-endian. A zero VAX exponent
/// decodes to 0.0 whatever the sign.
pub fn decode_float(format: FloatFormat, bytes: [u8; 8]) -> f64 {
    match format {
        FloatFormat::IeeeDoubleBe => BigEndian::read_f64(&bytes),
        FloatFormat::IeeeDoubleLe => LittleEndian::read_f64(&bytes),
        FloatFormat::VaxD | FloatFormat::VaxG => {
            let bits = vax_bits(bytes);
            let negative = bits >> 63 != 0;
            let (exponent, fraction, fraction_bits, exponent_bias) = match format {
                FloatFormat::VaxD => ((bits >> 55) & 0xff, bits & ((1 << 55) - 1), 55, 129),
                _ => ((bits >> 52) & 0x7ff, bits & ((1 << 52) - 1), 52, 1025),
            };
            if exponent == 0 {
                return 0.0;
            }
            let mantissa = 1.0 + fraction as f64 / 2f64.powi(fraction_bits);
            let value = mantissa * 2f64.powi(exponent as i32 - exponent_bias);
            if negative { -value } else { value }
        }
        FloatFormat::IbmHex => {
            let bits = BigEndian::read_u64(&bytes);
            let negative = bits >> 63 != 0;
            let exponent = ((bits >> 56) & 0x7f) as i32;
            let fraction = bits & 0x00ff_ffff_ffff_ffff;
            let value = fraction as f64 / 2f64.powi(56) * 16f64.powi(exponent - 64);
            if negative { -value } else { value }
        }
    }
}

/// Encodes `value` as an 8-byte double in `format`.
///
/// Magnitudes a VAX or IBM encoding cannot represent saturate to that
/// format's largest value; values too small become zero.
pub fn encode_float(format: FloatFormat, value: f64) -> [u8; 8] {
    let mut out = [0u8; 8];
    match format {
        FloatFormat::IeeeDoubleBe => BigEndian::write_f64(&mut out, value),
        FloatFormat::IeeeDoubleLe => LittleEndian::write_f64(&mut out, value),
        FloatFormat::VaxD | FloatFormat::VaxG => {
            let Some((negative, exponent, mantissa)) = split_double(value) else {
                return out;
            };
            let sign = (negative as u64) << 63;
            let bits = match format {
                FloatFormat::VaxD => {
                    let e = exponent + 129;
                    if e <= 0 {
                        0
                    } else if e > 0xff {
                        sign | (0xff << 55) | ((1 << 55) - 1)
                    } else {
                        sign | ((e as u64) << 55) | ((mantissa & ((1 << 52) - 1)) << 3)
                    }
                }
                _ => {
                    let e = exponent + 1025;
                    if e <= 0 {
                        0
                    } else if e > 0x7ff {
                        sign | (0x7ff << 52) | ((1 << 52) - 1)
                    } else {
                        sign | ((e as u64) << 52) | (mantissa & ((1 << 52) - 1))
                    }
                }
            };
            for (i, chunk) in out.chunks_exact_mut(2).enumerate() {
                let word = (bits >> (48 - 16 * i)) as u16;
                LittleEndian::write_u16(chunk, word);
            }
        }
        FloatFormat::IbmHex => {
            let Some((negative, exponent, mantissa)) = split_double(value) else {
                return out;
            };
            // value lies in [2^(q-1), 2^q); pick the hex exponent covering q.
            let q = exponent + 1;
            let hex_exponent = q.div_euclid(4) + i32::from(q.rem_euclid(4) != 0);
            let biased = hex_exponent + 64;
            let bits = if biased < 0 {
                0
            } else if biased > 0x7f {
                0x7fff_ffff_ffff_ffff
            } else {
                let shift = (q + 3 - 4 * hex_exponent) as u32;
                ((biased as u64) << 56) | (mantissa << shift)
            };
            let sign = (negative as u64) << 63;
            BigEndian::write_u64(&mut out, sign | bits);
        }
    }
    out
}

/// Splits a finite nonzero normal double into sign, unbiased exponent and
/// its 53-bit mantissa including the hidden bit.
fn split_double(value: f64) -> Option<(bool, i32, u64)> {
    let bits = value.to_bits();
    let biased = ((bits >> 52) & 0x7ff) as i32;
    if biased == 0 || !value.is_finite() {
        return None;
    }
    let mantissa = (bits & ((1 << 52) - 1)) | (1 << 52);
    Some((bits >> 63 != 0, biased - 1023, mantissa))
}

fn vax_bits(bytes: [u8; 8]) -> u64 {
    bytes
        .chunks_exact(2)
        .fold(0u64, |acc, word| (acc << 16) | LittleEndian::read_u16(word) as u64)
}
