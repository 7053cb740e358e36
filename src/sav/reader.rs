use std::fs::File;
use std::io::{self, BufReader, Cursor, Read};
use std::path::Path;

use encoding_rs::Encoding;
use log::{debug, info};

use super::codec::compression::{OpcodeDecoder, RawDecoder, SYSMIS, slot_bytes};
use super::codec::crypto::{EncryptedReader, PREFIX_LEN, is_encrypted_prefix};
use super::codec::endian::{EndianReader, decode_float};
use super::format::{header, records, zlib};
use super::iter::{CaseValueIter, RecordIter};
use super::types::error::{Result, SavError, Warning, Warnings};
use super::types::models::*;
use super::utils;

/// Warnings kept per session unless configured otherwise.
pub const DEFAULT_MAX_WARNINGS: usize = 1000;

/// Session configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderOptions {
    /// Cap on retained warnings; `None` keeps all of them.
    pub max_warnings: Option<usize>,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            max_warnings: Some(DEFAULT_MAX_WARNINGS),
        }
    }
}

/// The byte stream under a session: a plain file or the decrypted envelope.
enum Source {
    Plain(Box<dyn Read>),
    Encrypted(EncryptedReader<Box<dyn Read>>),
}

impl Read for Source {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Source::Plain(inner) => inner.read(buf),
            Source::Encrypted(inner) => inner.read(buf),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Header,
    Dictionary,
    Data,
    Done,
}

/// Case-data decoder chosen from the header's compression.
enum CaseDecoder {
    Uncompressed(RawDecoder),
    Opcode(OpcodeDecoder),
    Zlib {
        decoder: OpcodeDecoder,
        inflated: EndianReader<zlib::ZlibBlocks>,
    },
}

/// A forward-only reading session over one system file.
///
/// The file is consumed in order: header, dictionary records up to the
/// end-of-dictionary marker, then case data.
///
/// ```text
/// open ──► [unlock] ──► next_record* ──► case_values / read_case_bytes
///                        Header
///                        Variable | ValueLabels | Document | Extension
///                        EndOfDictionary
/// ```
///
/// Case-data access drains any dictionary records not yet read.
pub struct SavReader {
    stream: EndianReader<Source>,
    state: State,
    header: Option<FileHeader>,
    dictionary: Dictionary,
    data: Option<CaseDecoder>,
    zlib: Option<ZlibLayout>,
    /// Slot bytes decoded but not yet returned by `read_case_bytes`.
    pending: Vec<u8>,
    warnings: Warnings,
}

impl SavReader {
    /// Opens a system file, detecting the encryption envelope.
    ///
    /// An encrypted file must be unlocked before any record is read.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or its prefix cannot be read.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_options(path, ReaderOptions::default())
    }

    pub fn open_with_options(path: impl AsRef<Path>, options: ReaderOptions) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening system file: {}", path.display());
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file), options)
    }

    /// A session over an in-memory file image.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        Self::from_reader(Cursor::new(bytes), ReaderOptions::default())
    }

    /// A session over any byte stream positioned at the start of the file.
    pub fn from_reader(mut inner: impl Read + 'static, options: ReaderOptions) -> Result<Self> {
        let mut prefix = [0u8; PREFIX_LEN];
        let n = utils::read_up_to(&mut inner, &mut prefix)?;
        let replay: Box<dyn Read> = Box::new(Cursor::new(prefix[..n].to_vec()).chain(inner));

        let source = if is_encrypted_prefix(&prefix[..n]) {
            EncryptedReader::from_reader(replay)?
                .map(Source::Encrypted)
                .ok_or_else(|| SavError::invalid(0, "encryption prefix could not be re-read"))?
        } else {
            Source::Plain(replay)
        };

        Ok(Self {
            stream: EndianReader::new(source),
            state: State::Header,
            header: None,
            dictionary: Dictionary::default(),
            data: None,
            zlib: None,
            pending: Vec::new(),
            warnings: Warnings::with_limit(options.max_warnings),
        })
    }

    pub fn is_encrypted(&self) -> bool {
        matches!(self.stream.get_ref(), Source::Encrypted(_))
    }

    pub fn is_locked(&self) -> bool {
        match self.stream.get_ref() {
            Source::Encrypted(inner) => inner.is_locked(),
            Source::Plain(_) => false,
        }
    }

    /// Unlocks an encrypted session with `password`, trying its legacy
    /// decoding as well. Plain files need no password and always succeed.
    pub fn unlock(&mut self, password: impl AsRef<[u8]>) -> bool {
        match self.stream.get_mut() {
            Source::Encrypted(inner) => inner.unlock(password.as_ref()),
            Source::Plain(_) => true,
        }
    }

    /// Reads the next dictionary record, or `None` once the end-of-dictionary
    /// marker has been returned.
    ///
    /// # Errors
    /// [`SavError::Locked`] if the session is encrypted and still locked; any
    /// structural error of the record. After an error the session yields no
    /// further records.
    pub fn next_record(&mut self) -> Result<Option<Record>> {
        if self.is_locked() {
            return Err(SavError::Locked);
        }
        let result = match self.state {
            State::Header => self.read_header().map(|h| Some(Record::Header(h))),
            State::Dictionary => {
                records::read_record(&mut self.stream, &mut self.dictionary, &mut self.warnings)
                    .map(|record| {
                        if let Record::EndOfDictionary { .. } = record {
                            info!(
                                "Dictionary finished: {} variables, {} warnings",
                                self.dictionary.n_variables,
                                self.warnings.len()
                            );
                            self.state = State::Data;
                        }
                        Some(record)
                    })
            }
            State::Data | State::Done => Ok(None),
        };
        if result.is_err() {
            self.state = State::Done;
        }
        result
    }

    fn read_header(&mut self) -> Result<FileHeader> {
        let header = header::parse(&mut self.stream, &mut self.warnings)?;
        self.header = Some(header.clone());
        self.state = State::Dictionary;
        Ok(header)
    }

    /// Iterator over the remaining dictionary records.
    pub fn records(&mut self) -> RecordIter<'_> {
        RecordIter::new(self)
    }

    /// Reads every remaining dictionary record.
    pub fn read_dictionary(&mut self) -> Result<Vec<Record>> {
        self.records().collect()
    }

    /// Prepares the case-data decoder, finishing the dictionary first.
    /// Returns `false` if the session already failed.
    fn ensure_decoder(&mut self) -> Result<bool> {
        if matches!(self.state, State::Header | State::Dictionary) {
            while self.next_record()?.is_some() {}
        }
        if self.state == State::Done {
            return Ok(false);
        }
        if self.data.is_none() {
            let decoder = self.init_decoder()?;
            self.data = Some(decoder);
        }
        Ok(true)
    }

    fn init_decoder(&mut self) -> Result<CaseDecoder> {
        let format = self
            .header
            .as_ref()
            .map(|h| h.format)
            .ok_or_else(|| SavError::invalid(self.stream.offset(), "case data requested before the header"))?;
        let widths = self.dictionary.var_widths.clone();
        debug!(
            "Case data at {:#x}: {:?} compression, {} slots per case",
            self.stream.offset(),
            format.compression,
            widths.len()
        );
        Ok(match format.compression {
            Compression::None => CaseDecoder::Uncompressed(RawDecoder::new(widths)),
            Compression::Opcode => CaseDecoder::Opcode(OpcodeDecoder::new(format.bias, widths)),
            Compression::ZlibBlocks => {
                let zheader = zlib::read_zheader(&mut self.stream, &mut self.warnings)?;
                let (layout, blocks) =
                    zlib::read_blocks(&mut self.stream, zheader, format.bias, &mut self.warnings)?;
                let mut inflated = EndianReader::with_offset(blocks, zheader.this_offset);
                inflated.set_formats(format.byte_order, format.float_format);
                self.zlib = Some(layout);
                CaseDecoder::Zlib {
                    decoder: OpcodeDecoder::new(format.bias, widths),
                    inflated,
                }
            }
        })
    }

    /// Decodes the next case slot, or `None` at the end of the data.
    pub fn next_case_value(&mut self) -> Result<Option<CaseValue>> {
        if self.is_locked() {
            return Err(SavError::Locked);
        }
        let result = self.ensure_decoder().and_then(|ready| match &mut self.data {
            Some(CaseDecoder::Uncompressed(decoder)) if ready => decoder.next_value(&mut self.stream),
            Some(CaseDecoder::Opcode(decoder)) if ready => {
                decoder.next_value(&mut self.stream, &mut self.warnings)
            }
            Some(CaseDecoder::Zlib { decoder, inflated }) if ready => {
                let value = decoder.next_value(inflated, &mut self.warnings);
                let blocks = inflated.get_mut();
                // Blocks past the end-of-data opcode still get their descriptor checks.
                let drained = match &value {
                    Ok(None) => blocks.finish(),
                    _ => Ok(()),
                };
                for warning in blocks.take_warnings() {
                    self.warnings.push(warning.offset, warning.kind);
                }
                drained.and(value)
            }
            _ => Ok(None),
        });
        if result.is_err() {
            self.state = State::Done;
        }
        result
    }

    /// Iterator over decoded case slots.
    pub fn case_values(&mut self) -> CaseValueIter<'_> {
        CaseValueIter::new(self)
    }

    /// Reads up to `n` bytes of case data as an uncompressed file would store
    /// it: 8 bytes per slot in the file's own formats.
    ///
    /// Fewer than `n` bytes are returned only at the end of the data.
    pub fn read_case_bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        while self.pending.len() < n {
            match self.next_case_value()? {
                Some(value) => {
                    let bytes = slot_bytes(&value.value, self.stream.float_format());
                    self.pending.extend_from_slice(&bytes);
                }
                None => break,
            }
        }
        let take = n.min(self.pending.len());
        Ok(self.pending.drain(..take).collect())
    }

    /// The numeric value of `value` if its slot belongs to a numeric variable.
    pub fn number(&self, value: &CaseValue) -> Option<f64> {
        if self.dictionary.var_widths.get(value.slot) != Some(&0) {
            return None;
        }
        match value.value {
            SlotValue::Number(x) => Some(x),
            SlotValue::Sysmis => Some(SYSMIS),
            SlotValue::Literal(bytes) => Some(decode_float(self.stream.float_format(), bytes)),
            SlotValue::Spaces => None,
        }
    }

    /// The `$FL3` block layout, once case data has been reached.
    pub fn zlib_layout(&self) -> Option<&ZlibLayout> {
        self.zlib.as_ref()
    }

    pub fn header(&self) -> Option<&FileHeader> {
        self.header.as_ref()
    }

    pub fn format(&self) -> Option<FileFormat> {
        self.header.as_ref().map(|h| h.format)
    }

    /// Width of every case slot read so far, continuations included.
    pub fn var_widths(&self) -> &[i32] {
        &self.dictionary.var_widths
    }

    pub fn n_variables(&self) -> usize {
        self.dictionary.n_variables
    }

    /// Text encoding in effect: from subtype 20, the integer info character
    /// code, or windows-1252 by default.
    pub fn encoding(&self) -> &'static Encoding {
        self.dictionary.encoding
    }

    pub fn decode_text(&self, bytes: &[u8]) -> String {
        self.dictionary.decode(bytes)
    }

    pub fn warnings(&self) -> &[Warning] {
        self.warnings.as_slice()
    }

    /// Number of warnings dropped past the configured cap.
    pub fn suppressed_warnings(&self) -> usize {
        self.warnings.suppressed()
    }

    pub fn take_warnings(&mut self) -> Vec<Warning> {
        self.warnings.take()
    }
}
