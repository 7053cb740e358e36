//! Dictionary record dispatcher.
//!
//! After the header, the dictionary is a sequence of records, each introduced
//! by a 4-byte tag:
//!
//! ```text
//! 2    variable            one per 8-byte case slot
//! 3    value labels        must be followed by a type 4 record
//! 4    variable indexes    only valid directly after type 3
//! 6    document            80-byte lines
//! 7    extension           subtype, size, count, size*count bytes
//! 999  end of dictionary   followed by a 4-byte filler, then case data
//! ```

use std::io::Read;

use log::{debug, trace};

use super::extension;
use crate::sav::codec::endian::EndianReader;
use crate::sav::types::error::{Result, SavError, WarningKind, Warnings};
use crate::sav::types::models::{
    Dictionary, DocumentRecord, ExtensionHeader, ExtensionRecord, MissingValues, RawFormat,
    RawValue, Record, ValueLabel, ValueLabelRecord, VariableRecord,
};
use crate::sav::utils;

pub const TAG_VARIABLE: i32 = 2;
pub const TAG_VALUE_LABELS: i32 = 3;
pub const TAG_VAR_INDEXES: i32 = 4;
pub const TAG_DOCUMENT: i32 = 6;
pub const TAG_EXTENSION: i32 = 7;
pub const TAG_END: i32 = 999;

/// Width of one document line.
pub const DOCUMENT_LINE_LEN: usize = 80;

/// Reads and decodes the next dictionary record.
///
/// # Errors
/// Any structural violation is fatal: an unknown tag, a misplaced type 4
/// record, invalid label or missing-value codes, or a short read.
pub fn read_record<R: Read>(
    stream: &mut EndianReader<R>,
    dict: &mut Dictionary,
    warnings: &mut Warnings,
) -> Result<Record> {
    let offset = stream.offset();
    let tag = stream.read_i32()?;
    trace!("Record tag {} at {:#x}", tag, offset);
    match tag {
        TAG_VARIABLE => read_variable(stream, offset, dict, warnings).map(Record::Variable),
        TAG_VALUE_LABELS => {
            read_value_labels(stream, offset, dict, warnings).map(Record::ValueLabels)
        }
        TAG_VAR_INDEXES => Err(SavError::MisplacedVarIndexRecord { offset }),
        TAG_DOCUMENT => read_document(stream, offset).map(Record::Document),
        TAG_EXTENSION => read_extension(stream, offset, dict, warnings).map(Record::Extension),
        TAG_END => {
            stream.skip(4)?;
            let data_offset = stream.offset();
            debug!(
                "End of dictionary at {:#x}: {} variables in {} slots, data at {:#x}",
                offset,
                dict.n_variables,
                dict.var_widths.len(),
                data_offset
            );
            Ok(Record::EndOfDictionary {
                offset,
                data_offset,
            })
        }
        tag => Err(SavError::UnrecognizedRecordType { offset, tag }),
    }
}

/// # Record Structure
/// ```text
/// [4] width            0 numeric, >0 string, <0 continuation
/// [4] has label        0 or 1
/// [4] missing code     0, 1..3, -2, -3
/// [4] print format
/// [4] write format
/// [8] name
/// if has label:   [4] length, label padded to a multiple of 4
/// missing values: 8 bytes each
/// ```
fn read_variable<R: Read>(
    stream: &mut EndianReader<R>,
    offset: u64,
    dict: &mut Dictionary,
    warnings: &mut Warnings,
) -> Result<VariableRecord> {
    let width = stream.read_i32()?;
    let label_offset = stream.offset();
    let has_label = stream.read_i32()?;
    let missing_offset = stream.offset();
    let missing_code = stream.read_i32()?;
    let print_format = RawFormat(stream.read_u32()?);
    let write_format = RawFormat(stream.read_u32()?);
    let name = utils::ascii_field(&stream.read_bytes::<8>()?);

    if width >= 0 {
        dict.n_variables += 1;
    }
    dict.var_widths.push(width);

    let label = match has_label {
        0 => None,
        1 => {
            let len = stream.read_len("variable label length")?;
            let padded = stream.read_vec(utils::round_up(len, 4))?;
            Some(padded[..len].to_vec())
        }
        value => {
            return Err(SavError::BadVariableLabelCode {
                offset: label_offset,
                value,
            });
        }
    };

    let mut missing = MissingValues::default();
    match (width, missing_code) {
        (_, 0) => {}
        (0, n @ 1..=3) => {
            for _ in 0..n {
                missing.values.push(RawValue::Number(stream.read_f64()?));
            }
        }
        (0, code @ (-2 | -3)) => {
            let low = stream.read_f64()?;
            let high = stream.read_f64()?;
            missing.range = Some((low, high));
            if code == -3 {
                missing.values.push(RawValue::Number(stream.read_f64()?));
            }
        }
        (w, n @ 1..=3) if w > 0 => {
            for _ in 0..n {
                missing.values.push(RawValue::String(stream.read_bytes::<8>()?));
            }
        }
        (w, -2 | -3) if w > 0 => {
            return Err(SavError::MissingValueStringRange {
                offset: missing_offset,
            });
        }
        (w, code @ (1..=3 | -2 | -3)) if w < 0 => {
            warnings.push(missing_offset, WarningKind::ContinuationMissingValues);
            stream.skip(8 * code.unsigned_abs() as u64)?;
        }
        (width, code) => {
            return Err(SavError::BadMissingValueCode {
                offset: missing_offset,
                width,
                code,
            });
        }
    }

    debug!("Variable {} (width {}) at {:#x}", name, width, offset);
    Ok(VariableRecord {
        offset,
        width,
        missing_code,
        print_format,
        write_format,
        name,
        label,
        missing,
    })
}

/// Reads a type 3 record and the type 4 record that must follow it.
///
/// Labels are typed by the width of the first variable they apply to.
fn read_value_labels<R: Read>(
    stream: &mut EndianReader<R>,
    offset: u64,
    dict: &Dictionary,
    warnings: &mut Warnings,
) -> Result<ValueLabelRecord> {
    let n_labels = stream.read_len("value label count")?;
    let mut raw_labels = Vec::new();
    for _ in 0..n_labels {
        let value = stream.read_bytes::<8>()?;
        let len = stream.read_u8()? as usize;
        let padded = stream.read_vec(utils::round_up(len + 1, 8) - 1)?;
        raw_labels.push((value, padded[..len].to_vec()));
    }

    let tag_offset = stream.offset();
    let tag = stream.read_i32()?;
    if tag != TAG_VAR_INDEXES {
        return Err(SavError::ExpectedVarIndexRecord {
            offset: tag_offset,
            tag,
        });
    }
    let n_indexes = stream.read_len("variable index count")?;
    let mut var_indexes = Vec::new();
    for _ in 0..n_indexes {
        let index_offset = stream.offset();
        let index = stream.read_i32()?;
        let max = dict.var_widths.len();
        if index < 1 || index as usize > max {
            warnings.push(
                index_offset,
                WarningKind::VarIndexOutOfRange { index, max },
            );
        }
        var_indexes.push(index);
    }

    let numeric = var_indexes
        .iter()
        .find_map(|&i| dict.var_widths.get(usize::try_from(i).ok()?.checked_sub(1)?))
        .is_none_or(|&width| width == 0);
    let labels = raw_labels
        .into_iter()
        .map(|(value, label)| ValueLabel {
            value: if numeric {
                RawValue::Number(stream.decode_f64(value))
            } else {
                RawValue::String(value)
            },
            label,
        })
        .collect();

    Ok(ValueLabelRecord {
        offset,
        labels,
        var_indexes,
    })
}

fn read_document<R: Read>(stream: &mut EndianReader<R>, offset: u64) -> Result<DocumentRecord> {
    let n_lines = stream.read_len("document line count")?;
    let mut lines = Vec::new();
    for _ in 0..n_lines {
        lines.push(stream.read_vec(DOCUMENT_LINE_LEN)?);
    }
    Ok(DocumentRecord { offset, lines })
}

fn read_extension<R: Read>(
    stream: &mut EndianReader<R>,
    offset: u64,
    dict: &mut Dictionary,
    warnings: &mut Warnings,
) -> Result<ExtensionRecord> {
    let subtype = stream.read_i32()?;
    let size = stream.read_u32()?;
    let count = stream.read_u32()?;
    let header = ExtensionHeader {
        offset,
        subtype,
        size,
        count,
    };
    let len = size
        .checked_mul(count)
        .ok_or(SavError::ExtensionTooLarge {
            offset,
            subtype,
            size,
            count,
        })?;
    let payload = stream.read_vec(len as usize)?;
    let extension = extension::decode(stream, &header, &payload, dict, warnings)?;
    Ok(ExtensionRecord {
        header,
        payload,
        extension,
    })
}
