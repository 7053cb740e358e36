//! Core data structures for system-file components.
//!
//! This module defines the fundamental types used throughout the library:
//! - The detected file format and the fixed header
//! - Dictionary records (variables, value labels, documents)
//! - Decoded extension records
//! - The DEFLATE container layout and decoded case values

use encoding_rs::{Encoding, WINDOWS_1252};

/// The two magic numbers that open a system file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Magic {
    /// `$FL2`: uncompressed or opcode-compressed.
    Sav,
    /// `$FL3`: DEFLATE-block compressed.
    Zsav,
}

impl Magic {
    pub const SAV: [u8; 4] = *b"$FL2";
    pub const ZSAV: [u8; 4] = *b"$FL3";

    pub fn as_str(&self) -> &'static str {
        match self {
            Magic::Sav => "$FL2",
            Magic::Zsav => "$FL3",
        }
    }
}

impl TryFrom<[u8; 4]> for Magic {
    type Error = [u8; 4];
    fn try_from(bytes: [u8; 4]) -> std::result::Result<Self, Self::Error> {
        match bytes {
            Self::SAV => Ok(Self::Sav),
            Self::ZSAV => Ok(Self::Zsav),
            other => Err(other),
        }
    }
}

/// Integer byte order, detected from the layout code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Big,
    Little,
}

impl ByteOrder {
    /// Endianness code used by the machine integer info record.
    pub fn code(&self) -> i32 {
        match self {
            ByteOrder::Big => 1,
            ByteOrder::Little => 2,
        }
    }
}

/// Floating-point encoding, detected from the compression bias.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatFormat {
    IeeeDoubleBe,
    IeeeDoubleLe,
    /// VAX D-floating: 8-bit exponent, 55-bit fraction.
    VaxD,
    /// VAX G-floating: 11-bit exponent, 52-bit fraction.
    VaxG,
    /// IBM System/370 hexadecimal long.
    IbmHex,
}

impl FloatFormat {
    /// Float representation code used by the machine integer info record.
    pub fn code(&self) -> i32 {
        match self {
            FloatFormat::IeeeDoubleBe | FloatFormat::IeeeDoubleLe => 1,
            FloatFormat::IbmHex => 2,
            FloatFormat::VaxD | FloatFormat::VaxG => 3,
        }
    }

    /// The IEEE encoding that matches a detected integer byte order.
    pub fn ieee_for(byte_order: ByteOrder) -> Self {
        match byte_order {
            ByteOrder::Big => FloatFormat::IeeeDoubleBe,
            ByteOrder::Little => FloatFormat::IeeeDoubleLe,
        }
    }
}

/// How the case data following the dictionary is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    /// Opcode bytes in groups of eight, with literals following each group.
    Opcode,
    /// Opcode stream split into independently deflated blocks.
    ZlibBlocks,
}

/// Formats detected from the header; immutable once the header is parsed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FileFormat {
    pub byte_order: ByteOrder,
    pub float_format: FloatFormat,
    pub compression: Compression,
    pub bias: f64,
}

/// The fixed 176-byte preamble.
#[derive(Debug, Clone, PartialEq)]
pub struct FileHeader {
    pub magic: Magic,
    /// 60-byte product identification ("eye catcher").
    pub product: Vec<u8>,
    pub layout_code: i32,
    pub nominal_case_size: i32,
    pub compression_code: i32,
    /// 1-based case slot of the weight variable, 0 if unweighted.
    pub weight_index: i32,
    /// `None` when the writer did not know the case count (-1).
    pub n_cases: Option<i32>,
    pub bias: f64,
    pub creation_date: String,
    pub creation_time: String,
    /// 64-byte file label, padded with spaces.
    pub file_label: Vec<u8>,
    pub format: FileFormat,
}

/// A print or write format packed into 32 bits: type, width, decimals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawFormat(pub u32);

const FORMAT_NAMES: &[(u8, &str)] = &[
    (1, "A"),
    (2, "AHEX"),
    (3, "COMMA"),
    (4, "DOLLAR"),
    (5, "F"),
    (6, "IB"),
    (7, "PIBHEX"),
    (8, "P"),
    (9, "PIB"),
    (10, "PK"),
    (11, "RB"),
    (12, "RBHEX"),
    (15, "Z"),
    (16, "N"),
    (17, "E"),
    (20, "DATE"),
    (21, "TIME"),
    (22, "DATETIME"),
    (23, "ADATE"),
    (24, "JDATE"),
    (25, "DTIME"),
    (26, "WKDAY"),
    (27, "MONTH"),
    (28, "MOYR"),
    (29, "QYR"),
    (30, "WKYR"),
    (31, "PCT"),
    (32, "DOT"),
    (33, "CCA"),
    (34, "CCB"),
    (35, "CCC"),
    (36, "CCD"),
    (37, "CCE"),
    (38, "EDATE"),
    (39, "SDATE"),
    (40, "MTIME"),
    (41, "YMDHMS"),
];

impl RawFormat {
    pub fn format_type(&self) -> u8 {
        (self.0 >> 16) as u8
    }

    pub fn width(&self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub fn decimals(&self) -> u8 {
        self.0 as u8
    }

    pub fn type_name(&self) -> Option<&'static str> {
        let code = self.format_type();
        FORMAT_NAMES
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, name)| *name)
    }
}

impl std::fmt::Display for RawFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self.type_name() {
            Some(name) => write!(f, "{}{}.{}", name, self.width(), self.decimals()),
            None => write!(f, "?{}?{}.{}", self.format_type(), self.width(), self.decimals()),
        }
    }
}

/// An 8-byte dictionary value, typed by the variable it belongs to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawValue {
    Number(f64),
    String([u8; 8]),
}

/// Missing-value specification of one variable record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MissingValues {
    /// Discrete missing values, at most three.
    pub values: Vec<RawValue>,
    /// Inclusive numeric range `(low, high)`.
    pub range: Option<(f64, f64)>,
}

impl MissingValues {
    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.range.is_none()
    }
}

/// A type-2 record. Every record occupies one 8-byte case slot.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableRecord {
    pub offset: u64,
    /// 0 numeric, >0 string width in bytes, <0 continuation of a long string.
    pub width: i32,
    pub missing_code: i32,
    pub print_format: RawFormat,
    pub write_format: RawFormat,
    /// 8-byte short name with trailing spaces removed.
    pub name: String,
    pub label: Option<Vec<u8>>,
    pub missing: MissingValues,
}

impl VariableRecord {
    pub fn is_continuation(&self) -> bool {
        self.width < 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValueLabel {
    pub value: RawValue,
    pub label: Vec<u8>,
}

/// A type-3 record together with its mandatory type-4 variable index list.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueLabelRecord {
    pub offset: u64,
    pub labels: Vec<ValueLabel>,
    /// 1-based case slot indexes the labels apply to.
    pub var_indexes: Vec<i32>,
}

/// A type-6 record: free text in fixed 80-byte lines.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentRecord {
    pub offset: u64,
    pub lines: Vec<Vec<u8>>,
}

/// The fixed fields that open every type-7 record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtensionHeader {
    pub offset: u64,
    pub subtype: i32,
    pub size: u32,
    pub count: u32,
}

impl ExtensionHeader {
    /// File offset of the first payload byte.
    pub fn payload_offset(&self) -> u64 {
        self.offset + 16
    }
}

/// Subtype 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntegerInfo {
    pub version: (i32, i32, i32),
    pub machine_code: i32,
    pub float_representation: i32,
    pub compression_code: i32,
    pub endianness: i32,
    pub character_code: i32,
}

/// Subtype 4.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FloatInfo {
    pub sysmis: f64,
    pub highest: f64,
    pub lowest: f64,
}

/// Subtype 5.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableSet {
    pub name: String,
    pub variables: Vec<String>,
}

/// Where a multiple-dichotomy set takes its category labels from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CategoryLabels {
    CountedValues,
    VarLabels,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MrSetKind {
    MultipleCategory,
    MultipleDichotomy {
        counted_value: String,
        category_labels: CategoryLabels,
    },
}

/// Subtypes 7 and 19: one multiple-response set.
#[derive(Debug, Clone, PartialEq)]
pub struct MrSet {
    pub name: String,
    pub kind: MrSetKind,
    pub label: String,
    /// Set label is the first variable's label (`E 11`).
    pub label_from_var_label: bool,
    pub variables: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Measure {
    Nominal,
    Ordinal,
    Scale,
}

impl TryFrom<i32> for Measure {
    type Error = i32;
    fn try_from(value: i32) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Nominal),
            2 => Ok(Self::Ordinal),
            3 => Ok(Self::Scale),
            other => Err(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alignment {
    Left,
    Right,
    Centre,
}

impl TryFrom<i32> for Alignment {
    type Error = i32;
    fn try_from(value: i32) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Left),
            1 => Ok(Self::Right),
            2 => Ok(Self::Centre),
            other => Err(other),
        }
    }
}

/// Subtype 11: display parameters of one variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VarDisplay {
    pub measure: Option<Measure>,
    pub width: Option<u32>,
    pub alignment: Option<Alignment>,
}

/// Subtype 13.
#[derive(Debug, Clone, PartialEq)]
pub struct LongName {
    pub short_name: String,
    pub long_name: String,
}

/// Subtype 14.
#[derive(Debug, Clone, PartialEq)]
pub struct VeryLongString {
    pub short_name: String,
    pub width: u32,
}

/// Subtype 16.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaseCount {
    /// Always 1 in files seen so far.
    pub unknown: i64,
    pub n_cases: i64,
}

/// One named attribute and its ordered values (subtypes 17 and 18).
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub values: Vec<String>,
}

/// Subtype 18: the attribute set of one variable.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableAttributes {
    pub variable: String,
    pub attributes: Vec<Attribute>,
}

/// Subtype 21: value labels of one long string variable.
#[derive(Debug, Clone, PartialEq)]
pub struct LongStringValueLabels {
    pub variable: String,
    pub width: i32,
    pub labels: Vec<(Vec<u8>, Vec<u8>)>,
}

/// Subtype 22: missing values of one long string variable.
#[derive(Debug, Clone, PartialEq)]
pub struct LongStringMissingValues {
    pub variable: String,
    pub values: Vec<Vec<u8>>,
}

/// A decoded type-7 record.
#[derive(Debug, Clone, PartialEq)]
pub enum Extension {
    IntegerInfo(IntegerInfo),
    FloatInfo(FloatInfo),
    VariableSets(Vec<VariableSet>),
    MultipleResponse(Vec<MrSet>),
    ProductInfo(String),
    VarDisplay(Vec<VarDisplay>),
    LongNames(Vec<LongName>),
    VeryLongStrings(Vec<VeryLongString>),
    CaseCount(CaseCount),
    FileAttributes(Vec<Attribute>),
    VariableAttributes(Vec<VariableAttributes>),
    Encoding(String),
    LongStringValueLabels(Vec<LongStringValueLabels>),
    LongStringMissingValues(Vec<LongStringMissingValues>),
    /// Unrecognized or undecodable payload: printable text for byte-sized
    /// elements, otherwise one hex string per element.
    Unknown { dump: Vec<String> },
}

/// A type-7 record: header, raw payload and its decoded form.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtensionRecord {
    pub header: ExtensionHeader,
    pub payload: Vec<u8>,
    pub extension: Extension,
}

/// One event produced while walking the dictionary.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Header(FileHeader),
    Variable(VariableRecord),
    ValueLabels(ValueLabelRecord),
    Document(DocumentRecord),
    Extension(ExtensionRecord),
    /// Tag 999; case data starts at `data_offset`.
    EndOfDictionary { offset: u64, data_offset: u64 },
}

/// Dictionary state accumulated while records are dispatched.
///
/// Later decoders depend on it: value labels are typed by the widths seen so
/// far, display parameters are counted against `n_variables`, and text payloads
/// are decoded with `encoding`.
#[derive(Debug, Clone)]
pub struct Dictionary {
    /// Width of every type-2 record, continuations included, in slot order.
    pub var_widths: Vec<i32>,
    /// Number of type-2 records that are not continuations.
    pub n_variables: usize,
    pub encoding: &'static Encoding,
    /// Set once subtype 20 has named the encoding explicitly.
    pub explicit_encoding: bool,
}

impl Default for Dictionary {
    fn default() -> Self {
        Self {
            var_widths: Vec::new(),
            n_variables: 0,
            encoding: WINDOWS_1252,
            explicit_encoding: false,
        }
    }
}

impl Dictionary {
    /// Decodes text from the file using the current dictionary encoding.
    pub fn decode(&self, bytes: &[u8]) -> String {
        let (text, _) = self.encoding.decode_without_bom_handling(bytes);
        text.into_owned()
    }
}

/// `ZHeader`: the 24-byte descriptor at the start of `$FL3` case data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZHeader {
    /// Where the descriptor was actually read.
    pub offset: u64,
    pub this_offset: u64,
    pub trailer_offset: u64,
    pub trailer_length: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockDescriptor {
    pub uncompressed_ofs: u64,
    pub compressed_ofs: u64,
    pub uncompressed_size: u32,
    pub compressed_size: u32,
}

/// `ZTrailer`: block index that ends a `$FL3` file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZTrailer {
    pub offset: u64,
    /// Negated compression bias.
    pub int_bias: i64,
    pub zero: i64,
    pub block_size: u32,
    pub n_blocks: u32,
    pub blocks: Vec<BlockDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZlibLayout {
    pub header: ZHeader,
    pub trailer: ZTrailer,
}

/// Value of one 8-byte case slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SlotValue {
    /// `opcode - bias`.
    Number(f64),
    Sysmis,
    /// Eight spaces.
    Spaces,
    /// Eight bytes stored verbatim in the file's own representation.
    Literal([u8; 8]),
}

/// A decoded case slot and where it came from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaseValue {
    /// 0-based case number.
    pub case_index: u64,
    /// 0-based slot within the case.
    pub slot: usize,
    /// Offset of the opcode (or of the raw slot in uncompressed data).
    pub offset: u64,
    /// `None` for uncompressed data.
    pub opcode: Option<u8>,
    pub value: SlotValue,
}
