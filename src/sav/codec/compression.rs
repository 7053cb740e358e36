//! Case-data decoders.
//!
//! Case data is a sequence of 8-byte slots, one per type-2 record. It is
//! stored in one of three ways:
//! - Uncompressed: slots stored verbatim
//! - Opcode (`$FL2`, flag 1): one control byte per slot, in groups of eight
//! - DEFLATE blocks (`$FL3`): the opcode stream split into zlib blocks
//!
//! # Opcode stream
//! ```text
//! ┌─────────────────────────┬──────────────┬──────────────┬───────────
//! │ 8 opcodes               │ literal for  │ literal for  │ 8 opcodes
//! │ [1, 253, 254, 253, ...] │ 1st 253      │ 2nd 253      │ ...
//! └─────────────────────────┴──────────────┴──────────────┴───────────
//! ```
//! `0` pads, `252` ends the data, `253` takes the next 8-byte literal, `254`
//! is eight spaces, `255` is system-missing, `1..=251` encode `opcode - bias`.

use std::io::{self, Cursor, Read};

use flate2::bufread::ZlibDecoder;
use log::{debug, trace};

use super::endian::{EndianReader, encode_float};
use crate::sav::types::error::{Result, SavError, WarningKind, Warnings};
use crate::sav::types::models::{CaseValue, FloatFormat, SlotValue};

pub const OPCODE_PADDING: u8 = 0;
pub const OPCODE_END: u8 = 252;
pub const OPCODE_LITERAL: u8 = 253;
pub const OPCODE_SPACES: u8 = 254;
pub const OPCODE_SYSMIS: u8 = 255;

/// System-missing value in IEEE files.
pub const SYSMIS: f64 = -f64::MAX;

const SLOT_LEN: usize = 8;

/// Cursor over the case slots implied by the variable widths.
#[derive(Debug, Clone)]
struct SlotCursor {
    widths: Vec<i32>,
    slot: usize,
    case_index: u64,
}

impl SlotCursor {
    fn new(widths: Vec<i32>) -> Self {
        Self {
            widths,
            slot: 0,
            case_index: 0,
        }
    }

    fn at_case_start(&self) -> bool {
        self.slot == 0
    }

    fn is_numeric(&self) -> bool {
        self.widths[self.slot] == 0
    }

    fn advance(&mut self) -> (u64, usize) {
        let position = (self.case_index, self.slot);
        self.slot += 1;
        if self.slot == self.widths.len() {
            self.slot = 0;
            self.case_index += 1;
        }
        position
    }
}

/// State machine for the opcode scheme.
///
/// Holds the current 8-byte opcode window and the per-case slot cursor. The
/// window is refilled from the stream whenever it is exhausted.
#[derive(Debug, Clone)]
pub struct OpcodeDecoder {
    window: [u8; SLOT_LEN],
    index: usize,
    /// Offset of the current window in the stream.
    window_offset: u64,
    bias: f64,
    cursor: SlotCursor,
    finished: bool,
}

impl OpcodeDecoder {
    /// `widths` holds one entry per case slot, continuations included.
    pub fn new(bias: f64, widths: Vec<i32>) -> Self {
        let finished = widths.is_empty();
        Self {
            window: [0; SLOT_LEN],
            index: SLOT_LEN,
            window_offset: 0,
            bias,
            cursor: SlotCursor::new(widths),
            finished,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Decodes the next slot value, or `None` once the data has ended.
    ///
    /// End of data is either opcode 252 or end of stream when refilling the
    /// window at the start of a case. End of stream anywhere else is an error.
    pub fn next_value<R: Read>(
        &mut self,
        stream: &mut EndianReader<R>,
        warnings: &mut Warnings,
    ) -> Result<Option<CaseValue>> {
        loop {
            if self.finished {
                return Ok(None);
            }
            if self.index == SLOT_LEN {
                self.window_offset = stream.offset();
                let n = stream.fill(&mut self.window)?;
                if n == 0 && self.cursor.at_case_start() {
                    debug!("Compressed data ends at case {}", self.cursor.case_index);
                    self.finished = true;
                    return Ok(None);
                }
                if n < SLOT_LEN {
                    return Err(SavError::UnexpectedEof {
                        offset: stream.offset(),
                    });
                }
                self.index = 0;
            }

            let opcode = self.window[self.index];
            let offset = self.window_offset + self.index as u64;
            self.index += 1;
            trace!("Opcode {} at {:#x}", opcode, offset);

            let numeric = self.cursor.is_numeric();
            let value = match opcode {
                OPCODE_PADDING => continue,
                OPCODE_END => {
                    debug!("End-of-data opcode at {:#x}", offset);
                    self.finished = true;
                    return Ok(None);
                }
                OPCODE_LITERAL => SlotValue::Literal(stream.read_bytes::<SLOT_LEN>()?),
                OPCODE_SPACES => {
                    if numeric {
                        self.mismatch(warnings, offset, opcode, "numeric");
                    }
                    SlotValue::Spaces
                }
                OPCODE_SYSMIS => {
                    if !numeric {
                        self.mismatch(warnings, offset, opcode, "string");
                    }
                    SlotValue::Sysmis
                }
                code => {
                    if !numeric {
                        self.mismatch(warnings, offset, opcode, "string");
                    }
                    SlotValue::Number(code as f64 - self.bias)
                }
            };

            let (case_index, slot) = self.cursor.advance();
            return Ok(Some(CaseValue {
                case_index,
                slot,
                offset,
                opcode: Some(opcode),
                value,
            }));
        }
    }

    fn mismatch(&self, warnings: &mut Warnings, offset: u64, opcode: u8, kind: &'static str) {
        warnings.push(
            offset,
            WarningKind::OpcodeKindMismatch {
                opcode,
                slot: self.cursor.slot,
                kind,
            },
        );
    }
}

/// Reader for uncompressed case data: every slot is a literal.
#[derive(Debug, Clone)]
pub struct RawDecoder {
    cursor: SlotCursor,
    finished: bool,
}

impl RawDecoder {
    pub fn new(widths: Vec<i32>) -> Self {
        let finished = widths.is_empty();
        Self {
            cursor: SlotCursor::new(widths),
            finished,
        }
    }

    pub fn next_value<R: Read>(&mut self, stream: &mut EndianReader<R>) -> Result<Option<CaseValue>> {
        if self.finished {
            return Ok(None);
        }
        let offset = stream.offset();
        let mut slot = [0u8; SLOT_LEN];
        let n = stream.fill(&mut slot)?;
        if n == 0 && self.cursor.at_case_start() {
            self.finished = true;
            return Ok(None);
        }
        if n < SLOT_LEN {
            return Err(SavError::UnexpectedEof {
                offset: stream.offset(),
            });
        }
        let (case_index, slot_index) = self.cursor.advance();
        Ok(Some(CaseValue {
            case_index,
            slot: slot_index,
            offset,
            opcode: None,
            value: SlotValue::Literal(slot),
        }))
    }
}

/// The 8 bytes an uncompressed file in `format` would store for `value`.
pub fn slot_bytes(value: &SlotValue, format: FloatFormat) -> [u8; SLOT_LEN] {
    match *value {
        SlotValue::Number(x) => encode_float(format, x),
        SlotValue::Sysmis => encode_float(format, SYSMIS),
        SlotValue::Spaces => [b' '; SLOT_LEN],
        SlotValue::Literal(bytes) => bytes,
    }
}

/// Streaming inflater over consecutive zlib streams.
///
/// Holds the compressed payload and inflates one block at a time: when a
/// block's stream ends, the next decoder starts where it stopped consuming.
/// Blocks are found by decoding, not from the advisory trailer.
pub struct BlockInflater {
    /// `None` once the last block has been drained.
    decoder: Option<ZlibDecoder<Cursor<Vec<u8>>>>,
    payload_offset: u64,
    /// Payload position of the current block.
    block_start: u64,
    sizes: Vec<(u64, u64)>,
}

impl BlockInflater {
    pub fn new(payload: Vec<u8>, payload_offset: u64) -> Self {
        let decoder = (!payload.is_empty()).then(|| ZlibDecoder::new(Cursor::new(payload)));
        Self {
            decoder,
            payload_offset,
            block_start: 0,
            sizes: Vec::new(),
        }
    }

    /// File offset of the block being inflated.
    pub fn block_offset(&self) -> u64 {
        self.payload_offset + self.block_start
    }

    /// `(compressed, uncompressed)` size of every block finished so far.
    pub fn block_sizes(&self) -> &[(u64, u64)] {
        &self.sizes
    }

    fn corrupt(&self, message: String) -> io::Error {
        io::Error::new(
            io::ErrorKind::InvalidData,
            SavError::DecompressionError {
                offset: self.block_offset(),
                message,
            },
        )
    }

    /// Closes the finished block and starts a decoder on the next one.
    fn next_block(&mut self) -> io::Result<()> {
        let Some(decoder) = self.decoder.take() else {
            return Ok(());
        };
        let consumed = decoder.total_in();
        let inflated = decoder.total_out();
        if consumed == 0 {
            return Err(self.corrupt("zlib block consumed no input".to_string()));
        }
        trace!(
            "Inflated block at {:#x}: {} -> {} bytes",
            self.block_offset(),
            consumed,
            inflated
        );
        self.sizes.push((consumed, inflated));

        let cursor = decoder.into_inner();
        self.block_start = cursor.position();
        if self.block_start < cursor.get_ref().len() as u64 {
            self.decoder = Some(ZlibDecoder::new(cursor));
        } else {
            debug!("All {} zlib blocks inflated", self.sizes.len());
        }
        Ok(())
    }
}

impl Read for BlockInflater {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while let Some(decoder) = self.decoder.as_mut() {
            match decoder.read(buf) {
                Ok(0) => self.next_block()?,
                Ok(n) => return Ok(n),
                Err(e) => return Err(self.corrupt(format!("zlib block: {}", e))),
            }
        }
        Ok(0)
    }
}
