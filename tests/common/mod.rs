#![allow(dead_code)]

use std::io::Write;

use sav_reader::sav::codec::endian::encode_float;
use sav_reader::sav::models::{ByteOrder, FloatFormat};

/// F8.2
pub const NUMERIC_FORMAT: u32 = 0x05_08_02;
/// A8
pub const STRING_FORMAT: u32 = 0x01_08_00;

pub const PRODUCT: &str = "@(#) SPSS DATA FILE sav-reader test fixture";
pub const CREATION_DATE: &str = "19 Oct 26";
pub const CREATION_TIME: &str = "12:34:56";
pub const FILE_LABEL: &str = "Fixture label";

/// Assembles a synthetic system file in any byte order and float format.
#[derive(Debug, Clone)]
pub struct SavBuilder {
    pub byte_order: ByteOrder,
    pub float_format: FloatFormat,
    pub magic: [u8; 4],
    pub layout_code: i32,
    pub compression: i32,
    pub n_cases: i32,
    pub bias: f64,
    n_slots: i32,
    records: Vec<u8>,
    data: Vec<u8>,
}

impl SavBuilder {
    pub fn new(byte_order: ByteOrder, float_format: FloatFormat) -> Self {
        Self {
            byte_order,
            float_format,
            magic: *b"$FL2",
            layout_code: 2,
            compression: 1,
            n_cases: -1,
            bias: 100.0,
            n_slots: 0,
            records: Vec::new(),
            data: Vec::new(),
        }
    }

    /// Little-endian IEEE, the most common layout.
    pub fn little() -> Self {
        Self::new(ByteOrder::Little, FloatFormat::IeeeDoubleLe)
    }

    pub fn int(&self, value: i32) -> [u8; 4] {
        match self.byte_order {
            ByteOrder::Big => value.to_be_bytes(),
            ByteOrder::Little => value.to_le_bytes(),
        }
    }

    pub fn uint(&self, value: u32) -> [u8; 4] {
        match self.byte_order {
            ByteOrder::Big => value.to_be_bytes(),
            ByteOrder::Little => value.to_le_bytes(),
        }
    }

    pub fn int64(&self, value: i64) -> [u8; 8] {
        match self.byte_order {
            ByteOrder::Big => value.to_be_bytes(),
            ByteOrder::Little => value.to_le_bytes(),
        }
    }

    pub fn float(&self, value: f64) -> [u8; 8] {
        match self.float_format {
            FloatFormat::IeeeDoubleBe => value.to_be_bytes(),
            FloatFormat::IeeeDoubleLe => value.to_le_bytes(),
            other => encode_float(other, value),
        }
    }

    /// The 176-byte header.
    pub fn header(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.magic);
        out.extend_from_slice(&padded(PRODUCT.as_bytes(), 60));
        out.extend_from_slice(&self.int(self.layout_code));
        out.extend_from_slice(&self.int(self.n_slots));
        out.extend_from_slice(&self.int(self.compression));
        out.extend_from_slice(&self.int(0));
        out.extend_from_slice(&self.int(self.n_cases));
        out.extend_from_slice(&self.float(self.bias));
        out.extend_from_slice(CREATION_DATE.as_bytes());
        out.extend_from_slice(CREATION_TIME.as_bytes());
        out.extend_from_slice(&padded(FILE_LABEL.as_bytes(), 64));
        out.extend_from_slice(&[0; 3]);
        assert_eq!(out.len(), 176);
        out
    }

    /// A type-2 record. Numeric missing values use codes 1..=3.
    pub fn variable(mut self, width: i32, name: &str, label: Option<&str>, missing: &[f64]) -> Self {
        let format = if width == 0 { NUMERIC_FORMAT } else { STRING_FORMAT };
        let mut rec = Vec::new();
        rec.extend_from_slice(&self.int(2));
        rec.extend_from_slice(&self.int(width));
        rec.extend_from_slice(&self.int(label.is_some() as i32));
        rec.extend_from_slice(&self.int(missing.len() as i32));
        rec.extend_from_slice(&self.uint(format));
        rec.extend_from_slice(&self.uint(format));
        rec.extend_from_slice(&padded(name.as_bytes(), 8));
        if let Some(label) = label {
            rec.extend_from_slice(&self.int(label.len() as i32));
            rec.extend_from_slice(&padded_zero(label.as_bytes(), label.len().div_ceil(4) * 4));
        }
        for &value in missing {
            rec.extend_from_slice(&self.float(value));
        }
        self.records.extend_from_slice(&rec);
        self.n_slots += 1;
        self
    }

    /// A string variable of `width` bytes with its continuation records.
    pub fn string_variable(mut self, width: i32, name: &str) -> Self {
        self = self.variable(width, name, None, &[]);
        for _ in 1..(width as usize).div_ceil(8) {
            self = self.raw_variable(-1, 0, &[]);
        }
        self
    }

    /// A type-2 record with arbitrary width and missing-value code.
    pub fn raw_variable(mut self, width: i32, missing_code: i32, missing: &[[u8; 8]]) -> Self {
        let mut rec = Vec::new();
        rec.extend_from_slice(&self.int(2));
        rec.extend_from_slice(&self.int(width));
        rec.extend_from_slice(&self.int(0));
        rec.extend_from_slice(&self.int(missing_code));
        rec.extend_from_slice(&self.uint(0));
        rec.extend_from_slice(&self.uint(0));
        rec.extend_from_slice(&[b' '; 8]);
        for value in missing {
            rec.extend_from_slice(value);
        }
        self.records.extend_from_slice(&rec);
        self.n_slots += 1;
        self
    }

    /// A type-3 record and its type-4 index record.
    pub fn value_labels(mut self, labels: &[([u8; 8], &str)], indexes: &[i32]) -> Self {
        let mut rec = Vec::new();
        rec.extend_from_slice(&self.int(3));
        rec.extend_from_slice(&self.int(labels.len() as i32));
        for (value, label) in labels {
            rec.extend_from_slice(value);
            rec.push(label.len() as u8);
            let padded_len = (label.len() + 1).div_ceil(8) * 8 - 1;
            rec.extend_from_slice(&padded(label.as_bytes(), padded_len));
        }
        rec.extend_from_slice(&self.int(4));
        rec.extend_from_slice(&self.int(indexes.len() as i32));
        for &index in indexes {
            rec.extend_from_slice(&self.int(index));
        }
        self.records.extend_from_slice(&rec);
        self
    }

    pub fn document(mut self, lines: &[&str]) -> Self {
        let mut rec = Vec::new();
        rec.extend_from_slice(&self.int(6));
        rec.extend_from_slice(&self.int(lines.len() as i32));
        for line in lines {
            rec.extend_from_slice(&padded(line.as_bytes(), 80));
        }
        self.records.extend_from_slice(&rec);
        self
    }

    /// A type-7 record with an explicit size and count.
    pub fn extension(mut self, subtype: i32, size: u32, count: u32, payload: &[u8]) -> Self {
        let mut rec = Vec::new();
        rec.extend_from_slice(&self.int(7));
        rec.extend_from_slice(&self.int(subtype));
        rec.extend_from_slice(&self.uint(size));
        rec.extend_from_slice(&self.uint(count));
        rec.extend_from_slice(payload);
        self.records.extend_from_slice(&rec);
        self
    }

    /// A type-7 record of single-byte elements.
    pub fn text_extension(self, subtype: i32, text: &[u8]) -> Self {
        self.extension(subtype, 1, text.len() as u32, text)
    }

    /// Raw bytes appended to the record stream.
    pub fn raw(mut self, bytes: &[u8]) -> Self {
        self.records.extend_from_slice(bytes);
        self
    }

    /// Bytes following the end-of-dictionary record.
    pub fn data(mut self, bytes: &[u8]) -> Self {
        self.data.extend_from_slice(bytes);
        self
    }

    /// Offset at which case data starts.
    pub fn data_offset(&self) -> usize {
        176 + self.records.len() + 8
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = self.header();
        out.extend_from_slice(&self.records);
        out.extend_from_slice(&self.int(999));
        out.extend_from_slice(&self.int(0));
        out.extend_from_slice(&self.data);
        out
    }
}

pub fn padded(bytes: &[u8], len: usize) -> Vec<u8> {
    let mut out = bytes[..bytes.len().min(len)].to_vec();
    out.resize(len, b' ');
    out
}

pub fn padded_zero(bytes: &[u8], len: usize) -> Vec<u8> {
    let mut out = bytes[..bytes.len().min(len)].to_vec();
    out.resize(len, 0);
    out
}

/// An 8-byte string value padded with spaces.
pub fn str8(s: &str) -> [u8; 8] {
    let mut out = [b' '; 8];
    out[..s.len()].copy_from_slice(s.as_bytes());
    out
}

/// Writes `bytes` to a temporary `.sav` file.
pub fn write_temp(bytes: &[u8]) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".sav")
        .tempfile()
        .expect("create temp file");
    file.write_all(bytes).expect("write fixture");
    file.flush().expect("flush fixture");
    file
}
