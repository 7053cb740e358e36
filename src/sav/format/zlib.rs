//! DEFLATE-block container of `$FL3` files.
//!
//! # Layout
//! ```text
//! data_offset ┌──────────────────────────────────────┐
//!             │ ZHeader (24 bytes)                   │
//!             │   this_offset, trailer_offset,       │
//!             │   trailer_length                     │
//!             ├──────────────────────────────────────┤
//!             │ zlib block 0                         │
//!             │ zlib block 1                         │
//!             │ ...                                  │
//! trailer_ofs ├──────────────────────────────────────┤
//!             │ ZTrailer: -bias, 0, block size,      │
//!             │   n_blocks (24 bytes)                │
//!             │ n_blocks x BlockDescriptor (24 each) │
//!             └──────────────────────────────────────┘
//! ```
//!
//! The trailer is an index for random access. Its consistency checks only
//! produce warnings: the blocks are inflated sequentially regardless, one
//! block at a time as case data is pulled.

use std::io::{self, Read};

use log::{debug, info};

use crate::sav::codec::compression::BlockInflater;
use crate::sav::codec::endian::EndianReader;
use crate::sav::types::error::{Result, SavError, Warning, WarningKind, Warnings};
use crate::sav::types::models::{BlockDescriptor, ZHeader, ZTrailer, ZlibLayout};

pub const ZHEADER_LEN: u64 = 24;
pub const DESCRIPTOR_LEN: u64 = 24;

/// Block size every known writer uses.
pub const EXPECTED_BLOCK_SIZE: u32 = 0x3ff000;

/// Reads the 24-byte header at the start of the case data.
///
/// # Errors
/// The trailer must start after the header, otherwise the payload length is
/// meaningless.
pub fn read_zheader<R: Read>(stream: &mut EndianReader<R>, warnings: &mut Warnings) -> Result<ZHeader> {
    let offset = stream.offset();
    let this_offset = read_offset(stream, "zheader offset")?;
    let trailer_offset = read_offset(stream, "ztrailer offset")?;
    let trailer_length = read_offset(stream, "ztrailer length")?;

    if this_offset != offset {
        warn_layout(
            warnings,
            offset,
            format!("zheader offset is {:#x} but the header was found at {:#x}", this_offset, offset),
        );
    }
    if trailer_length < DESCRIPTOR_LEN || trailer_length % DESCRIPTOR_LEN != 0 {
        warn_layout(
            warnings,
            offset + 16,
            format!("ztrailer length {} is not a positive multiple of 24", trailer_length),
        );
    }
    if trailer_offset < offset + ZHEADER_LEN {
        return Err(SavError::invalid(
            offset + 8,
            format!("ztrailer offset {:#x} precedes the end of the zheader", trailer_offset),
        ));
    }
    debug!(
        "zheader at {:#x}: trailer at {:#x}, {} bytes",
        offset, trailer_offset, trailer_length
    );
    Ok(ZHeader {
        offset,
        this_offset,
        trailer_offset,
        trailer_length,
    })
}

/// Reads the compressed payload and the trailer behind it.
///
/// The payload is kept compressed; the returned [`ZlibBlocks`] inflates it
/// on demand and checks each block against its descriptor as it completes.
pub fn read_blocks<R: Read>(
    stream: &mut EndianReader<R>,
    zheader: ZHeader,
    bias: f64,
    warnings: &mut Warnings,
) -> Result<(ZlibLayout, ZlibBlocks)> {
    let payload_offset = stream.offset();
    let payload_len = zheader.trailer_offset - payload_offset;
    let payload = stream.read_vec(payload_len as usize)?;

    let trailer = read_ztrailer(stream, &zheader, bias, warnings)?;
    check_chain(&zheader, &trailer, warnings);

    info!(
        "zlib payload: {} bytes in {} blocks at {:#x}",
        payload.len(),
        trailer.blocks.len(),
        payload_offset
    );
    let blocks = ZlibBlocks {
        inflater: BlockInflater::new(payload, payload_offset),
        descriptors: trailer.blocks.clone(),
        trailer_offset: trailer.offset,
        checked: 0,
        count_checked: false,
        warnings: Vec::new(),
    };
    Ok((ZlibLayout { header: zheader, trailer }, blocks))
}

/// Inflated view of the payload, read block by block.
pub struct ZlibBlocks {
    inflater: BlockInflater,
    descriptors: Vec<BlockDescriptor>,
    trailer_offset: u64,
    /// Blocks already compared against their descriptors.
    checked: usize,
    count_checked: bool,
    warnings: Vec<Warning>,
}

impl ZlibBlocks {
    /// Layout warnings raised since the last call.
    pub fn take_warnings(&mut self) -> Vec<Warning> {
        std::mem::take(&mut self.warnings)
    }

    /// Inflates whatever is left so that every block gets checked.
    ///
    /// # Errors
    /// A corrupt block after the end-of-data opcode is still fatal.
    pub fn finish(&mut self) -> Result<()> {
        let offset = self.inflater.block_offset();
        io::copy(self, &mut io::sink()).map_err(|e| SavError::from_io(e, offset))?;
        Ok(())
    }

    fn check_blocks(&mut self, at_end: bool) {
        let sizes = self.inflater.block_sizes();
        while self.checked < sizes.len() {
            let i = self.checked;
            let (compressed, uncompressed) = sizes[i];
            if let Some(block) = self.descriptors.get(i)
                && (u64::from(block.compressed_size) != compressed
                    || u64::from(block.uncompressed_size) != uncompressed)
            {
                self.warnings.push(Warning {
                    offset: self.trailer_offset + DESCRIPTOR_LEN * (i as u64 + 1),
                    kind: WarningKind::ZlibLayout(format!(
                        "block {} is {} -> {} bytes but its descriptor says {} -> {}",
                        i, compressed, uncompressed, block.compressed_size, block.uncompressed_size
                    )),
                });
            }
            self.checked += 1;
        }
        if at_end && !self.count_checked {
            self.count_checked = true;
            debug!("Inflated {} zlib blocks", sizes.len());
            if sizes.len() != self.descriptors.len() {
                self.warnings.push(Warning {
                    offset: self.trailer_offset,
                    kind: WarningKind::ZlibLayout(format!(
                        "trailer lists {} blocks but the payload holds {}",
                        self.descriptors.len(),
                        sizes.len()
                    )),
                });
            }
        }
    }
}

impl Read for ZlibBlocks {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inflater.read(buf)?;
        self.check_blocks(n == 0 && !buf.is_empty());
        Ok(n)
    }
}

fn read_ztrailer<R: Read>(
    stream: &mut EndianReader<R>,
    zheader: &ZHeader,
    bias: f64,
    warnings: &mut Warnings,
) -> Result<ZTrailer> {
    let offset = stream.offset();
    let int_bias = stream.read_i64()?;
    let zero = stream.read_i64()?;
    let block_size = stream.read_u32()?;
    let n_blocks = stream.read_u32()?;

    if int_bias as f64 != -bias {
        warn_layout(
            warnings,
            offset,
            format!("ztrailer bias is {} but the header bias is {}", int_bias, bias),
        );
    }
    if zero != 0 {
        warn_layout(warnings, offset + 8, format!("ztrailer zero field is {}", zero));
    }
    if block_size != EXPECTED_BLOCK_SIZE {
        warn_layout(
            warnings,
            offset + 16,
            format!("ztrailer block size is {:#x}, expected {:#x}", block_size, EXPECTED_BLOCK_SIZE),
        );
    }
    let expected_blocks = (zheader.trailer_length / DESCRIPTOR_LEN).saturating_sub(1);
    if u64::from(n_blocks) != expected_blocks {
        warn_layout(
            warnings,
            offset + 20,
            format!(
                "ztrailer declares {} blocks but its length implies {}",
                n_blocks, expected_blocks
            ),
        );
    }

    let mut blocks = Vec::new();
    for _ in 0..n_blocks {
        blocks.push(BlockDescriptor {
            uncompressed_ofs: stream.read_u64()?,
            compressed_ofs: stream.read_u64()?,
            uncompressed_size: stream.read_u32()?,
            compressed_size: stream.read_u32()?,
        });
    }
    Ok(ZTrailer {
        offset,
        int_bias,
        zero,
        block_size,
        n_blocks,
        blocks,
    })
}

/// Checks that descriptors tile the payload contiguously.
fn check_chain(zheader: &ZHeader, trailer: &ZTrailer, warnings: &mut Warnings) {
    let mut expected_uncompressed = zheader.this_offset;
    let mut expected_compressed = zheader.this_offset + ZHEADER_LEN;
    for (i, block) in trailer.blocks.iter().enumerate() {
        let at = trailer.offset + DESCRIPTOR_LEN * (i as u64 + 1);
        if block.uncompressed_ofs != expected_uncompressed {
            warn_layout(
                warnings,
                at,
                format!(
                    "block {} uncompressed offset is {:#x}, expected {:#x}",
                    i, block.uncompressed_ofs, expected_uncompressed
                ),
            );
        }
        if block.compressed_ofs != expected_compressed {
            warn_layout(
                warnings,
                at + 8,
                format!(
                    "block {} compressed offset is {:#x}, expected {:#x}",
                    i, block.compressed_ofs, expected_compressed
                ),
            );
        }
        if u64::from(block.compressed_size)
            > u64::from(block.uncompressed_size) + u64::from(block.uncompressed_size) / 7 + 11
        {
            warn_layout(
                warnings,
                at + 20,
                format!(
                    "block {} compresses {} bytes into an implausible {} bytes",
                    i, block.uncompressed_size, block.compressed_size
                ),
            );
        }
        let ends = (
            block.uncompressed_ofs.checked_add(u64::from(block.uncompressed_size)),
            block.compressed_ofs.checked_add(u64::from(block.compressed_size)),
        );
        match ends {
            (Some(uncompressed_end), Some(compressed_end)) => {
                expected_uncompressed = uncompressed_end;
                expected_compressed = compressed_end;
            }
            _ => {
                warn_layout(warnings, at, format!("block {} ends past the largest file offset", i));
                return;
            }
        }
    }
    if expected_compressed != zheader.trailer_offset {
        warn_layout(
            warnings,
            trailer.offset,
            format!(
                "blocks end at {:#x} but the ztrailer starts at {:#x}",
                expected_compressed, zheader.trailer_offset
            ),
        );
    }
}

fn read_offset<R: Read>(stream: &mut EndianReader<R>, what: &str) -> Result<u64> {
    let offset = stream.offset();
    let value = stream.read_i64()?;
    u64::try_from(value).map_err(|_| SavError::invalid(offset, format!("negative {}: {}", what, value)))
}

fn warn_layout(warnings: &mut Warnings, offset: u64, message: String) {
    warnings.push(offset, WarningKind::ZlibLayout(message));
}
