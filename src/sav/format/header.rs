//! File header parsing and format detection.
//!
//! # Header Structure (176 bytes)
//! ```text
//! [  4] magic              "$FL2" or "$FL3"
//! [ 60] product            eye catcher
//! [  4] layout code        2 or 3, detects integer byte order
//! [  4] nominal case size
//! [  4] compression        $FL2: 0 or 1, $FL3: 2
//! [  4] weight index
//! [  4] case count         -1 if unknown
//! [  8] bias               100.0, detects float format
//! [  9] creation date
//! [  8] creation time
//! [ 64] file label
//! [  3] padding
//! ```

use std::io::Read;

use log::{debug, info};

use crate::sav::codec::crypto::ENCRYPTED_MARKER;
use crate::sav::codec::endian::{EndianReader, detect_byte_order, detect_float_format};
use crate::sav::types::error::{Result, SavError, WarningKind, Warnings};
use crate::sav::types::models::{Compression, FileFormat, FileHeader, FloatFormat, Magic};
use crate::sav::utils;

pub const HEADER_LEN: u64 = 176;

/// Parses the header and configures `stream` with the detected formats.
///
/// # Errors
/// - [`SavError::Encrypted`] if the stream is an unopened encryption envelope
/// - [`SavError::NotASystemFile`] for an unknown magic or layout code
/// - [`SavError::BadCompression`] if the compression flag does not fit the magic
pub fn parse<R: Read>(stream: &mut EndianReader<R>, warnings: &mut Warnings) -> Result<FileHeader> {
    info!("Parsing system file header");

    // Magic and product are read together so an encryption marker at
    // bytes 8..20 can be recognized.
    let start = stream.read_bytes::<64>()?;
    let magic_bytes: [u8; 4] = [start[0], start[1], start[2], start[3]];
    let magic = Magic::try_from(magic_bytes).map_err(|bytes| {
        if start[8..20] == ENCRYPTED_MARKER[..] {
            SavError::Encrypted
        } else {
            SavError::NotASystemFile {
                offset: 0,
                reason: format!("unrecognized magic {}", utils::printable(&bytes)),
            }
        }
    })?;
    let product = utils::trim_end_spaces(&start[4..]).to_vec();

    let layout_offset = stream.offset();
    let layout_bytes = stream.read_bytes::<4>()?;
    let (byte_order, layout_code) =
        detect_byte_order(layout_bytes).ok_or_else(|| SavError::NotASystemFile {
            offset: layout_offset,
            reason: format!("layout code {} is not 2 or 3 in either byte order", hex::encode(layout_bytes)),
        })?;
    stream.set_formats(byte_order, FloatFormat::ieee_for(byte_order));
    debug!("Integer byte order: {:?} (layout code {})", byte_order, layout_code);

    let nominal_case_size = stream.read_i32()?;
    let compression_offset = stream.offset();
    let compression_code = stream.read_i32()?;
    let weight_index = stream.read_i32()?;
    let n_cases = stream.read_i32()?;

    let bias_offset = stream.offset();
    let bias_bytes = stream.read_bytes::<8>()?;
    let float_format = match detect_float_format(bias_bytes, byte_order) {
        Some(format) => format,
        None => {
            warnings.push(bias_offset, WarningKind::UnknownFloatFormat);
            FloatFormat::ieee_for(byte_order)
        }
    };
    stream.set_formats(byte_order, float_format);
    let bias = stream.decode_f64(bias_bytes);
    if bias != 100.0 {
        warnings.push(bias_offset, WarningKind::UnexpectedBias(bias));
    }
    debug!("Float format: {:?}, bias {}", float_format, bias);

    let compression = match (magic, compression_code) {
        (Magic::Sav, 0) => Compression::None,
        (Magic::Sav, 1) => Compression::Opcode,
        (Magic::Zsav, 2) => Compression::ZlibBlocks,
        (magic, code) => {
            return Err(SavError::BadCompression {
                offset: compression_offset,
                magic: magic.as_str(),
                code,
            });
        }
    };

    let creation_date = utils::ascii_field(&stream.read_fixed_string(9)?);
    let creation_time = utils::ascii_field(&stream.read_fixed_string(8)?);
    let file_label = utils::trim_end_spaces(&stream.read_fixed_string(64)?).to_vec();
    stream.skip(3)?;

    let header = FileHeader {
        magic,
        product,
        layout_code,
        nominal_case_size,
        compression_code,
        weight_index,
        n_cases: (n_cases >= 0).then_some(n_cases),
        bias,
        creation_date,
        creation_time,
        file_label,
        format: FileFormat {
            byte_order,
            float_format,
            compression,
            bias,
        },
    };

    info!(
        "Header parsed: magic={}, byte order={:?}, float={:?}, compression={:?}, cases={:?}",
        magic.as_str(),
        byte_order,
        float_format,
        compression,
        header.n_cases
    );
    Ok(header)
}
