//! Decoders for extension (type 7) records.
//!
//! The payload of every extension record is read in full before it is decoded,
//! so the record stream stays synchronized whatever a decoder does. Only the
//! two machine-info subtypes are integrity critical: a wrong size or count
//! there is fatal. Every other decoding failure is downgraded to a warning and
//! the record is surfaced as [`Extension::Unknown`].
//!
//! # Subtypes
//! | subtype | contents |
//! |---|---|
//! | 3 | machine integer info |
//! | 4 | machine float info |
//! | 5 | variable sets |
//! | 7, 19 | multiple response sets |
//! | 10 | extra product info |
//! | 11 | variable display parameters |
//! | 13 | long variable names |
//! | 14 | very long string widths |
//! | 16 | 64-bit case count |
//! | 17 | data file attributes |
//! | 18 | variable attributes |
//! | 20 | character encoding |
//! | 21 | long string value labels |
//! | 22 | long string missing values |

use std::io::Read;

use encoding_rs::Encoding;
use log::{debug, trace};

use super::text::TextRecord;
use crate::sav::codec::endian::EndianReader;
use crate::sav::types::error::{Result, SavError, WarningKind, Warnings};
use crate::sav::types::models::{
    Alignment, Attribute, CaseCount, CategoryLabels, Dictionary, Extension, ExtensionHeader,
    FloatFormat, FloatInfo, IntegerInfo, LongName, LongStringMissingValues,
    LongStringValueLabels, Measure, MrSet, MrSetKind, VarDisplay, VariableAttributes,
    VariableSet, VeryLongString,
};
use crate::sav::utils;

/// Longest variable name accepted in subtypes 21 and 22.
const MAX_NAME_LEN: usize = 64;

/// Upper bound on the bytes rendered for an unknown subtype.
const MAX_DUMP_LEN: usize = 65536;

/// Decodes the payload of one extension record.
///
/// `stream` supplies the detected formats; `dict` is updated by the subtypes
/// that define the text encoding.
///
/// # Errors
/// Only subtypes 3 and 4 fail, and only when their size or count is wrong.
pub fn decode<R: Read>(
    stream: &EndianReader<R>,
    header: &ExtensionHeader,
    payload: &[u8],
    dict: &mut Dictionary,
    warnings: &mut Warnings,
) -> Result<Extension> {
    let mut data = stream.slice(payload, header.payload_offset());
    trace!(
        "Extension subtype {} at {:#x}: size {}, count {}",
        header.subtype, header.offset, header.size, header.count
    );

    let decoded = match header.subtype {
        3 => return integer_info(&mut data, header, dict, warnings),
        4 => return float_info(&mut data, header, warnings),
        5 => Ok(variable_sets(payload, header, dict, warnings)),
        7 | 19 => Ok(multiple_response_sets(payload, header, dict, warnings)),
        10 => Ok(Extension::ProductInfo(dict.decode(payload))),
        11 => var_display(&mut data, header, dict),
        13 => long_names(payload, header, dict),
        14 => very_long_strings(payload, header, dict),
        16 => case_count(&mut data, header),
        17 => file_attributes(payload, header, dict, warnings),
        18 => variable_attributes(payload, header, dict, warnings),
        20 => Ok(encoding(payload, header, dict, warnings)),
        21 => long_string_value_labels(&mut data, header, payload.len(), dict),
        22 => long_string_missing_values(&mut data, header, payload.len(), dict),
        other => {
            warnings.push(header.offset, WarningKind::UnknownSubtype(other));
            return Ok(Extension::Unknown {
                dump: dump(header, payload),
            });
        }
    };

    decoded.or_else(|err| {
        debug!("Subtype {} downgraded to raw dump: {}", header.subtype, err);
        warnings.push(
            header.offset,
            WarningKind::ExtensionDecode {
                subtype: header.subtype,
                message: err.to_string(),
            },
        );
        Ok(Extension::Unknown {
            dump: dump(header, payload),
        })
    })
}

/// Renders a payload for display: printable text when elements are single
/// bytes, otherwise one hex string per element. Past 64 KiB only a prefix is
/// rendered, followed by a line counting the bytes left out.
pub fn dump(header: &ExtensionHeader, payload: &[u8]) -> Vec<String> {
    let size = header.size as usize;
    if size == 0 {
        return Vec::new();
    }
    let shown = payload.len().min(MAX_DUMP_LEN / size * size);
    let mut lines = if size == 1 {
        vec![utils::printable(&payload[..shown])]
    } else {
        payload[..shown].chunks(size).map(hex::encode).collect()
    };
    if shown < payload.len() {
        lines.push(format!("... {} more bytes", payload.len() - shown));
    }
    lines
}

fn expect_size(
    header: &ExtensionHeader,
    size: u32,
    count: u32,
    expected: &'static str,
) -> Result<()> {
    if header.size == size && header.count == count {
        Ok(())
    } else {
        Err(SavError::BadExtensionSize {
            offset: header.offset,
            subtype: header.subtype,
            size: header.size,
            count: header.count,
            expected,
        })
    }
}

fn integer_info(
    data: &mut EndianReader<&[u8]>,
    header: &ExtensionHeader,
    dict: &mut Dictionary,
    warnings: &mut Warnings,
) -> Result<Extension> {
    expect_size(header, 4, 8, "size 4, count 8")?;
    let info = IntegerInfo {
        version: (data.read_i32()?, data.read_i32()?, data.read_i32()?),
        machine_code: data.read_i32()?,
        float_representation: data.read_i32()?,
        compression_code: data.read_i32()?,
        endianness: data.read_i32()?,
        character_code: data.read_i32()?,
    };

    let detected_float = data.float_format().code();
    if info.float_representation != detected_float {
        warnings.push(
            header.offset,
            WarningKind::IntegerInfoMismatch {
                field: "float representation",
                declared: info.float_representation,
                detected: detected_float,
            },
        );
    }
    let detected_order = data.byte_order().code();
    if info.endianness != detected_order {
        warnings.push(
            header.offset,
            WarningKind::IntegerInfoMismatch {
                field: "endianness",
                declared: info.endianness,
                detected: detected_order,
            },
        );
    }
    if !dict.explicit_encoding
        && let Some(encoding) = utils::code_page_encoding(info.character_code)
    {
        debug!("Character code {} selects {}", info.character_code, encoding.name());
        dict.encoding = encoding;
    }
    Ok(Extension::IntegerInfo(info))
}

fn float_info(
    data: &mut EndianReader<&[u8]>,
    header: &ExtensionHeader,
    warnings: &mut Warnings,
) -> Result<Extension> {
    expect_size(header, 8, 3, "size 8, count 3")?;
    let info = FloatInfo {
        sysmis: data.read_f64()?,
        highest: data.read_f64()?,
        lowest: data.read_f64()?,
    };

    // Sentinels are only pinned down for IEEE files.
    if matches!(
        data.float_format(),
        FloatFormat::IeeeDoubleBe | FloatFormat::IeeeDoubleLe
    ) {
        let sysmis = -f64::MAX;
        let lowest = f64::from_bits(sysmis.to_bits() - 1);
        let mut check = |name, actual: f64, expected: f64| {
            if actual != expected {
                warnings.push(
                    header.offset,
                    WarningKind::FloatInfoMismatch {
                        name,
                        actual,
                        expected,
                    },
                );
            }
        };
        check("sysmis", info.sysmis, sysmis);
        check("highest", info.highest, f64::MAX);
        if info.lowest != sysmis {
            check("lowest", info.lowest, lowest);
        }
    }
    Ok(Extension::FloatInfo(info))
}

/// `name= var1 var2 ...`, one set per line.
fn variable_sets(
    payload: &[u8],
    header: &ExtensionHeader,
    dict: &Dictionary,
    warnings: &mut Warnings,
) -> Extension {
    let text = dict.decode(payload);
    let mut sets = Vec::new();
    for line in text.split('\n').map(str::trim).filter(|l| !l.is_empty()) {
        match line.split_once('=') {
            Some((name, variables)) => sets.push(VariableSet {
                name: name.trim().to_string(),
                variables: variables.split_whitespace().map(str::to_string).collect(),
            }),
            None => warnings.push(
                header.offset,
                WarningKind::TextSyntax {
                    subtype: header.subtype,
                    message: format!("variable set line {:?} has no '='", line),
                },
            ),
        }
    }
    Extension::VariableSets(sets)
}

/// One set per line:
///
/// ```text
/// $name=C <label> var1 var2...
/// $name=D<counted value> <label> var1 var2...
/// $name=E <1|11> <counted value> <label> var1 var2...
/// ```
/// where values and labels are counted strings. A malformed line is reported
/// and skipped.
fn multiple_response_sets(
    payload: &[u8],
    header: &ExtensionHeader,
    dict: &Dictionary,
    warnings: &mut Warnings,
) -> Extension {
    let mut text = TextRecord::new(payload, header.payload_offset());
    let mut sets = Vec::new();
    loop {
        while text.matches(b'\n') {}
        let Some(name) = text.tokenize(b'=') else {
            break;
        };
        match parse_mrset(&mut text, dict.decode(name), header.subtype, dict, warnings) {
            Ok(set) => sets.push(set),
            Err(err) => {
                warnings.push(
                    text.offset(),
                    WarningKind::TextSyntax {
                        subtype: header.subtype,
                        message: err.to_string(),
                    },
                );
                text.skip_line();
            }
        }
    }
    Extension::MultipleResponse(sets)
}

fn parse_mrset(
    text: &mut TextRecord<'_>,
    name: String,
    subtype: i32,
    dict: &Dictionary,
    warnings: &mut Warnings,
) -> Result<MrSet> {
    let mut label_from_var_label = false;
    let kind = if text.matches(b'C') {
        if !text.matches(b' ') {
            return Err(text.error(format!("missing space after 'C' in set {}", name)));
        }
        MrSetKind::MultipleCategory
    } else if text.matches(b'D') {
        MrSetKind::MultipleDichotomy {
            counted_value: dict.decode(text.parse_counted_string()?),
            category_labels: CategoryLabels::VarLabels,
        }
    } else if text.matches(b'E') {
        if !text.matches(b' ') {
            return Err(text.error(format!("missing space after 'E' in set {}", name)));
        }
        let source_offset = text.offset();
        label_from_var_label = match text.tokenize(b' ') {
            Some(b"11") => true,
            Some(b"1") => false,
            other => {
                warnings.push(
                    source_offset,
                    WarningKind::TextSyntax {
                        subtype,
                        message: format!(
                            "unexpected label source {:?} in set {}",
                            other.map(utils::printable),
                            name
                        ),
                    },
                );
                false
            }
        };
        MrSetKind::MultipleDichotomy {
            counted_value: dict.decode(text.parse_counted_string()?),
            category_labels: CategoryLabels::CountedValues,
        }
    } else {
        return Err(text.error(format!("missing 'C', 'D' or 'E' after '=' in set {}", name)));
    };

    let label = dict.decode(text.parse_counted_string()?);
    let variables = text
        .tokenize(b'\n')
        .map(|vars| dict.decode(vars))
        .unwrap_or_default()
        .split_whitespace()
        .map(str::to_string)
        .collect::<Vec<_>>();
    if variables.is_empty() {
        return Err(text.error(format!("set {} has no variables", name)));
    }
    Ok(MrSet {
        name,
        kind,
        label,
        label_from_var_label,
        variables,
    })
}

fn var_display(
    data: &mut EndianReader<&[u8]>,
    header: &ExtensionHeader,
    dict: &Dictionary,
) -> Result<Extension> {
    if header.size != 4 {
        return Err(SavError::invalid(
            header.offset,
            format!("display parameter size is {}, expected 4", header.size),
        ));
    }
    let n_vars = dict.n_variables;
    let count = header.count as usize;
    let includes_width = if count == 3 * n_vars {
        true
    } else if count == 2 * n_vars {
        false
    } else {
        return Err(SavError::invalid(
            header.offset,
            format!("display parameter count {} is not 2 or 3 per variable ({} variables)", count, n_vars),
        ));
    };

    let mut displays = Vec::with_capacity(n_vars);
    for _ in 0..n_vars {
        let measure = Measure::try_from(data.read_i32()?).ok();
        let width = if includes_width {
            u32::try_from(data.read_i32()?).ok()
        } else {
            None
        };
        let alignment = Alignment::try_from(data.read_i32()?).ok();
        displays.push(VarDisplay {
            measure,
            width,
            alignment,
        });
    }
    Ok(Extension::VarDisplay(displays))
}

/// Walks `key=value` pairs separated by tabs, with NULs allowed as padding.
fn variable_value_pairs<'a>(text: &mut TextRecord<'a>) -> Vec<(&'a [u8], &'a [u8])> {
    let mut pairs = Vec::new();
    while let Some(key) = text.tokenize(b'=') {
        let Some(value) = text.tokenize(b'\t') else {
            break;
        };
        while text.matches(b'\t') || text.matches(0) {}
        pairs.push((key, value));
    }
    pairs
}

fn long_names(payload: &[u8], header: &ExtensionHeader, dict: &Dictionary) -> Result<Extension> {
    let mut text = TextRecord::new(payload, header.payload_offset());
    let names = variable_value_pairs(&mut text)
        .into_iter()
        .map(|(short, long)| LongName {
            short_name: dict.decode(short),
            long_name: dict.decode(long),
        })
        .collect();
    Ok(Extension::LongNames(names))
}

fn very_long_strings(
    payload: &[u8],
    header: &ExtensionHeader,
    dict: &Dictionary,
) -> Result<Extension> {
    let mut text = TextRecord::new(payload, header.payload_offset());
    variable_value_pairs(&mut text)
        .into_iter()
        .map(|(name, width)| {
            let short_name = dict.decode(name);
            let width = dict
                .decode(width)
                .trim()
                .parse::<u32>()
                .map_err(|_| SavError::TextRecord {
                    offset: header.offset,
                    message: format!("invalid string width {:?} for {}", utils::printable(width), short_name),
                })?;
            Ok(VeryLongString { short_name, width })
        })
        .collect::<Result<Vec<_>>>()
        .map(Extension::VeryLongStrings)
}

fn case_count(data: &mut EndianReader<&[u8]>, header: &ExtensionHeader) -> Result<Extension> {
    if header.size != 8 || header.count != 2 {
        return Err(SavError::invalid(
            header.offset,
            format!("case count record has size {} and count {}, expected 8 and 2", header.size, header.count),
        ));
    }
    Ok(Extension::CaseCount(CaseCount {
        unknown: data.read_i64()?,
        n_cases: data.read_i64()?,
    }))
}

/// Parses `name('value'\n'value'\n)name2(...)...`, stopping after a `/`.
fn attribute_set(
    text: &mut TextRecord<'_>,
    dict: &Dictionary,
    warnings: &mut Warnings,
) -> Result<Vec<Attribute>> {
    let mut attributes = Vec::new();
    while let Some(name) = text.tokenize(b'(') {
        let name = dict.decode(name);
        let mut values = Vec::new();
        loop {
            let value_offset = text.offset();
            let Some(value) = text.tokenize(b'\n') else {
                return Err(SavError::TextRecord {
                    offset: value_offset,
                    message: format!("attribute {} is missing a value", name),
                });
            };
            values.push(unquote(dict.decode(value), value_offset, warnings));
            if text.matches(b')') {
                break;
            }
        }
        attributes.push(Attribute { name, values });
        if text.matches(b'/') {
            break;
        }
    }
    Ok(attributes)
}

fn unquote(value: String, offset: u64, warnings: &mut Warnings) -> String {
    match value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')) {
        Some(inner) => inner.to_string(),
        None => {
            warnings.push(offset, WarningKind::UnquotedAttribute(value.clone()));
            value
        }
    }
}

fn file_attributes(
    payload: &[u8],
    header: &ExtensionHeader,
    dict: &Dictionary,
    warnings: &mut Warnings,
) -> Result<Extension> {
    let mut text = TextRecord::new(payload, header.payload_offset());
    attribute_set(&mut text, dict, warnings).map(Extension::FileAttributes)
}

/// `var:attributes/var2:attributes/...`
fn variable_attributes(
    payload: &[u8],
    header: &ExtensionHeader,
    dict: &Dictionary,
    warnings: &mut Warnings,
) -> Result<Extension> {
    let mut text = TextRecord::new(payload, header.payload_offset());
    let mut sets = Vec::new();
    while let Some(variable) = text.tokenize(b':') {
        let variable = dict.decode(variable);
        let attributes = attribute_set(&mut text, dict, warnings)?;
        sets.push(VariableAttributes {
            variable,
            attributes,
        });
    }
    Ok(Extension::VariableAttributes(sets))
}

fn encoding(
    payload: &[u8],
    header: &ExtensionHeader,
    dict: &mut Dictionary,
    warnings: &mut Warnings,
) -> Extension {
    let name = utils::ascii_field(payload);
    match Encoding::for_label(name.as_bytes()) {
        Some(encoding) => {
            debug!("Encoding record selects {}", encoding.name());
            dict.encoding = encoding;
            dict.explicit_encoding = true;
        }
        None => warnings.push(header.offset, WarningKind::UnknownEncoding(name.clone())),
    }
    Extension::Encoding(name)
}

fn read_name(data: &mut EndianReader<&[u8]>, dict: &Dictionary) -> Result<String> {
    let offset = data.offset();
    let len = data.read_len("variable name length")?;
    if len > MAX_NAME_LEN {
        return Err(SavError::invalid(
            offset,
            format!("variable name length {} exceeds {}", len, MAX_NAME_LEN),
        ));
    }
    Ok(dict.decode(&data.read_vec(len)?))
}

fn long_string_value_labels(
    data: &mut EndianReader<&[u8]>,
    header: &ExtensionHeader,
    len: usize,
    dict: &Dictionary,
) -> Result<Extension> {
    let end = header.payload_offset() + len as u64;
    let mut groups = Vec::new();
    while data.offset() < end {
        let variable = read_name(data, dict)?;
        let width = data.read_i32()?;
        let n_labels = data.read_len("value label count")?;
        let mut labels = Vec::new();
        for _ in 0..n_labels {
            let value_len = data.read_len("value length")?;
            let value = data.read_vec(value_len)?;
            let label_len = data.read_len("label length")?;
            let label = data.read_vec(label_len)?;
            labels.push((value, label));
        }
        groups.push(LongStringValueLabels {
            variable,
            width,
            labels,
        });
    }
    Ok(Extension::LongStringValueLabels(groups))
}

fn long_string_missing_values(
    data: &mut EndianReader<&[u8]>,
    header: &ExtensionHeader,
    len: usize,
    dict: &Dictionary,
) -> Result<Extension> {
    let end = header.payload_offset() + len as u64;
    let mut groups = Vec::new();
    while data.offset() < end {
        let variable = read_name(data, dict)?;
        let n_values = data.read_u8()?;
        let mut values = Vec::with_capacity(n_values as usize);
        for _ in 0..n_values {
            let value_len = data.read_len("missing value length")?;
            values.push(data.read_vec(value_len)?);
        }
        groups.push(LongStringMissingValues { variable, values });
    }
    Ok(Extension::LongStringMissingValues(groups))
}
