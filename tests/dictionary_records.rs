mod common;

use common::{SavBuilder, str8, write_temp};
use sav_reader::sav::models::{Extension, RawValue, SlotValue};
use sav_reader::{Record, SavError, SavReader, WarningKind};

const LITERAL: [u8; 8] = [0x00, 0x00, 0x00, 0x00, 0x00, 0x40, 0x8f, 0x40]; // 1000.0 LE

/// `$FL2`, little-endian, opcode compression, one numeric variable, opcodes
/// `[1, 253, 252]` with one literal, padded to 500 bytes.
fn end_to_end_fixture() -> Vec<u8> {
    let mut builder = SavBuilder::little().variable(0, "X", None, &[]);
    builder.n_cases = 2;
    let mut bytes = builder
        .data(&[1, 253, 252, 0, 0, 0, 0, 0])
        .data(&LITERAL)
        .build();
    bytes.resize(500, 0);
    bytes
}

#[test]
fn end_to_end_opcode_scenario() {
    let file = write_temp(&end_to_end_fixture());
    assert_eq!(std::fs::metadata(file.path()).expect("stat").len(), 500);
    let mut reader = SavReader::open(file.path()).expect("open");

    let records = reader.read_dictionary().expect("dictionary");
    assert_eq!(records.len(), 3, "header, variable, end: {:?}", records);
    match &records[0] {
        Record::Header(h) => {
            assert_eq!(h.magic.as_str(), "$FL2");
            assert_eq!(h.layout_code, 2);
            assert_eq!(h.compression_code, 1);
            assert_eq!(h.nominal_case_size, 1);
            assert_eq!(h.n_cases, Some(2));
            assert_eq!(h.bias, 100.0);
        }
        other => panic!("expected header, got {:?}", other),
    }
    match &records[1] {
        Record::Variable(v) => {
            assert_eq!(v.offset, 176);
            assert_eq!(v.width, 0);
            assert_eq!(v.name, "X");
            assert_eq!(v.label, None);
            assert_eq!(v.print_format.to_string(), "F8.2");
        }
        other => panic!("expected variable, got {:?}", other),
    }
    assert_eq!(
        records[2],
        Record::EndOfDictionary {
            offset: 208,
            data_offset: 216
        }
    );
    assert_eq!(reader.next_record().expect("after end"), None);

    let values: Vec<_> = reader
        .case_values()
        .collect::<sav_reader::Result<_>>()
        .expect("case data");
    assert_eq!(values.len(), 2, "{:?}", values);
    assert_eq!(values[0].value, SlotValue::Number(-99.0));
    assert_eq!(values[0].opcode, Some(1));
    assert_eq!(values[0].offset, 216);
    assert_eq!((values[0].case_index, values[0].slot), (0, 0));
    assert_eq!(values[1].value, SlotValue::Literal(LITERAL));
    assert_eq!(values[1].opcode, Some(253));
    assert_eq!((values[1].case_index, values[1].slot), (1, 0));
    assert_eq!(reader.number(&values[1]), Some(1000.0));

    assert_eq!(reader.next_case_value().expect("clean end"), None);
    assert!(reader.warnings().is_empty(), "{:?}", reader.warnings());
}

#[test]
fn end_to_end_case_bytes_match_an_uncompressed_file() {
    let mut reader = SavReader::from_bytes(end_to_end_fixture()).expect("open");
    let bytes = reader.read_case_bytes(100).expect("case bytes");
    let mut expected = (-99.0f64).to_le_bytes().to_vec();
    expected.extend_from_slice(&LITERAL);
    assert_eq!(bytes, expected);
    assert!(reader.read_case_bytes(8).expect("at end").is_empty());
}

#[test]
fn case_bytes_can_be_read_in_partial_slots() {
    let mut reader = SavReader::from_bytes(end_to_end_fixture()).expect("open");
    let head = reader.read_case_bytes(3).expect("head");
    let tail = reader.read_case_bytes(13).expect("tail");
    let mut joined = head;
    joined.extend_from_slice(&tail);
    assert_eq!(joined.len(), 16);
    assert_eq!(&joined[8..], &LITERAL);
}

#[test]
fn unknown_subtype_is_dumped_and_parsing_continues() {
    let bytes = SavBuilder::little()
        .variable(0, "X", None, &[])
        .extension(99, 1, 10, b"abcdefghij")
        .document(&["after the unknown record"])
        .build();
    let mut reader = SavReader::from_bytes(bytes).expect("open");
    let records = reader.read_dictionary().expect("dictionary");

    let extension = records
        .iter()
        .find_map(|r| match r {
            Record::Extension(x) => Some(x),
            _ => None,
        })
        .expect("extension record");
    assert_eq!(extension.header.subtype, 99);
    assert_eq!(extension.payload.len(), 10);
    assert_eq!(
        extension.extension,
        Extension::Unknown {
            dump: vec!["abcdefghij".to_string()]
        }
    );
    assert!(matches!(records.last(), Some(Record::EndOfDictionary { .. })));
    assert!(records.iter().any(|r| matches!(r, Record::Document(_))));
    assert_eq!(
        reader.warnings().iter().map(|w| &w.kind).collect::<Vec<_>>(),
        vec![&WarningKind::UnknownSubtype(99)]
    );
}

#[test]
fn variable_labels_and_missing_values() {
    let builder = SavBuilder::little();
    let range = [builder.float(1.0), builder.float(9.0), builder.float(-1.0)];
    let bytes = builder
        .variable(0, "AGE", Some("Age in years"), &[-9.0, 999.0])
        .raw_variable(0, -3, &range)
        .variable(8, "NAME", Some("Name"), &[])
        .raw_variable(8, 2, &[str8("N/A"), str8("NONE")])
        .build();
    let mut reader = SavReader::from_bytes(bytes).expect("open");
    let variables: Vec<_> = reader
        .read_dictionary()
        .expect("dictionary")
        .into_iter()
        .filter_map(|r| match r {
            Record::Variable(v) => Some(v),
            _ => None,
        })
        .collect();
    assert_eq!(variables.len(), 4);

    assert_eq!(variables[0].label.as_deref(), Some(&b"Age in years"[..]));
    assert_eq!(
        variables[0].missing.values,
        vec![RawValue::Number(-9.0), RawValue::Number(999.0)]
    );
    assert_eq!(variables[1].missing.range, Some((1.0, 9.0)));
    assert_eq!(variables[1].missing.values, vec![RawValue::Number(-1.0)]);
    assert_eq!(variables[2].label.as_deref(), Some(&b"Name"[..]));
    assert_eq!(
        variables[3].missing.values,
        vec![RawValue::String(str8("N/A")), RawValue::String(str8("NONE"))]
    );
    assert_eq!(reader.n_variables(), 4);
    assert_eq!(reader.var_widths(), &[0, 0, 8, 8]);
}

#[test]
fn continuation_records_occupy_slots_but_are_not_variables() {
    let bytes = SavBuilder::little().string_variable(20, "LONG").build();
    let mut reader = SavReader::from_bytes(bytes).expect("open");
    reader.read_dictionary().expect("dictionary");
    assert_eq!(reader.var_widths(), &[20, -1, -1]);
    assert_eq!(reader.n_variables(), 1);
}

#[test]
fn continuation_missing_values_are_skipped_with_a_warning() {
    let bytes = SavBuilder::little()
        .variable(12, "S", None, &[])
        .raw_variable(-1, 1, &[str8("ignored")])
        .document(&["still aligned"])
        .build();
    let mut reader = SavReader::from_bytes(bytes).expect("open");
    let records = reader.read_dictionary().expect("dictionary");
    assert!(records.iter().any(|r| matches!(r, Record::Document(_))));
    assert_eq!(reader.warnings().len(), 1);
    assert_eq!(reader.warnings()[0].kind, WarningKind::ContinuationMissingValues);
}

#[test]
fn string_missing_range_is_fatal() {
    let bytes = SavBuilder::little()
        .raw_variable(8, -2, &[str8("A"), str8("B")])
        .build();
    let mut reader = SavReader::from_bytes(bytes).expect("open");
    let err = reader.read_dictionary().expect_err("range on a string");
    assert!(matches!(err, SavError::MissingValueStringRange { offset: 188 }), "{:?}", err);
}

#[test]
fn bad_label_indicator_is_fatal() {
    let builder = SavBuilder::little();
    let mut rec = Vec::new();
    for value in [2, 0, 5, 0] {
        rec.extend_from_slice(&builder.int(value));
    }
    rec.extend_from_slice(&[0; 8]);
    rec.extend_from_slice(&str8("X"));
    let mut reader = SavReader::from_bytes(builder.raw(&rec).build()).expect("open");
    let err = reader.read_dictionary().expect_err("label code 5");
    assert!(
        matches!(err, SavError::BadVariableLabelCode { offset: 184, value: 5 }),
        "{:?}",
        err
    );
}

#[test]
fn value_labels_are_typed_by_the_first_variable() {
    let builder = SavBuilder::little();
    let one = builder.float(1.0);
    let two = builder.float(2.0);
    let bytes = builder
        .variable(0, "Q1", None, &[])
        .variable(8, "CODE", None, &[])
        .value_labels(&[(one, "Yes"), (two, "No")], &[1])
        .value_labels(&[(str8("A"), "Apples, and more text to pad")], &[2])
        .build();
    let mut reader = SavReader::from_bytes(bytes).expect("open");
    let labels: Vec<_> = reader
        .read_dictionary()
        .expect("dictionary")
        .into_iter()
        .filter_map(|r| match r {
            Record::ValueLabels(l) => Some(l),
            _ => None,
        })
        .collect();
    assert_eq!(labels.len(), 2);
    assert_eq!(labels[0].var_indexes, vec![1]);
    assert_eq!(labels[0].labels[0].value, RawValue::Number(1.0));
    assert_eq!(labels[0].labels[1].label, b"No");
    assert_eq!(labels[1].labels[0].value, RawValue::String(str8("A")));
    assert_eq!(labels[1].labels[0].label, b"Apples, and more text to pad");
    assert!(reader.warnings().is_empty());
}

#[test]
fn out_of_range_label_index_is_a_warning() {
    let builder = SavBuilder::little();
    let one = builder.float(1.0);
    let bytes = builder
        .variable(0, "Q1", None, &[])
        .value_labels(&[(one, "Yes")], &[1, 7])
        .build();
    let mut reader = SavReader::from_bytes(bytes).expect("open");
    reader.read_dictionary().expect("dictionary");
    assert_eq!(
        reader.warnings()[0].kind,
        WarningKind::VarIndexOutOfRange { index: 7, max: 1 }
    );
}

#[test]
fn value_labels_must_be_followed_by_indexes() {
    let builder = SavBuilder::little().variable(0, "Q1", None, &[]);
    let mut rec = Vec::new();
    rec.extend_from_slice(&builder.int(3));
    rec.extend_from_slice(&builder.int(0));
    rec.extend_from_slice(&builder.int(6));
    let mut reader = SavReader::from_bytes(builder.raw(&rec).build()).expect("open");
    let err = reader.read_dictionary().expect_err("missing type 4");
    assert!(
        matches!(err, SavError::ExpectedVarIndexRecord { offset: 216, tag: 6 }),
        "{:?}",
        err
    );
}

#[test]
fn stray_index_record_is_fatal() {
    let builder = SavBuilder::little();
    let tag = builder.int(4);
    let mut reader = SavReader::from_bytes(builder.raw(&tag).build()).expect("open");
    let err = reader.read_dictionary().expect_err("type 4 alone");
    assert!(matches!(err, SavError::MisplacedVarIndexRecord { offset: 176 }), "{:?}", err);
}

#[test]
fn unknown_record_tag_is_fatal_and_stops_the_session() {
    let builder = SavBuilder::little();
    let tag = builder.int(42);
    let mut reader = SavReader::from_bytes(builder.raw(&tag).build()).expect("open");
    let results: Vec<_> = reader.records().collect();
    assert_eq!(results.len(), 2, "header then the error");
    assert!(matches!(
        results[1],
        Err(SavError::UnrecognizedRecordType { offset: 176, tag: 42 })
    ));
    assert_eq!(reader.next_record().expect("session finished"), None);
}

#[test]
fn documents_are_split_into_80_byte_lines() {
    let bytes = SavBuilder::little()
        .document(&["first line", "second line"])
        .build();
    let mut reader = SavReader::from_bytes(bytes).expect("open");
    let records = reader.read_dictionary().expect("dictionary");
    let Record::Document(doc) = &records[1] else {
        panic!("expected document, got {:?}", records[1]);
    };
    assert_eq!(doc.lines.len(), 2);
    assert!(doc.lines.iter().all(|line| line.len() == 80));
    assert!(doc.lines[1].starts_with(b"second line  "));
}

#[test]
fn truncated_dictionary_reports_eof_offset() {
    let mut bytes = SavBuilder::little().variable(0, "X", None, &[]).build();
    bytes.truncate(190);
    let mut reader = SavReader::from_bytes(bytes).expect("open");
    let err = reader.read_dictionary().expect_err("truncated");
    assert!(matches!(err, SavError::UnexpectedEof { offset: 188 }), "{:?}", err);
}

#[test]
fn big_endian_dictionary_decodes_the_same() {
    use sav_reader::sav::models::{ByteOrder, FloatFormat};
    let builder = SavBuilder::new(ByteOrder::Big, FloatFormat::IeeeDoubleBe);
    let one = builder.float(1.0);
    let bytes = builder
        .variable(0, "Q1", Some("Question"), &[99.0])
        .value_labels(&[(one, "One")], &[1])
        .build();
    let mut reader = SavReader::from_bytes(bytes).expect("open");
    let records = reader.read_dictionary().expect("dictionary");
    let Record::Variable(v) = &records[1] else {
        panic!("expected variable");
    };
    assert_eq!(v.missing.values, vec![RawValue::Number(99.0)]);
    let Record::ValueLabels(l) = &records[2] else {
        panic!("expected labels");
    };
    assert_eq!(l.labels[0].value, RawValue::Number(1.0));
}
