//! Byte-level ZIP stream rewriter for sequential ZIP parsers.
//!
//! Some ZIP consumers (java.util.zip.ZipInputStream and the SiGa back-end
//! behind it) read archives sequentially and never consult the central
//! directory. They require the first-entry `mimetype` to carry its CRC-32
//! and sizes in the local file header rather than in a trailing data
//! descriptor. [`ZipInputStream`] rewrites a well-formed ASiC-E stream into
//! that shape: it moves the known mimetype descriptor into the local
//! header, drops the descriptor bytes, and patches every affected offset in
//! the central directory and the end-of-central-directory record.
//!
//! The rewriter performs very little verification on its input; feeding it
//! something that is not a valid single-disk, non-ZIP64 archive results in
//! an error at best.

use crate::infra::error::{SigaError, SigaResult};
use flate2::{Decompress, FlushDecompress, Status};
use std::io::Write;

const LOCAL_SIGNATURE: [u8; 4] = [0x50, 0x4b, 0x03, 0x04];
const CENTRAL_SIGNATURE: [u8; 4] = [0x50, 0x4b, 0x01, 0x02];
const EOCD_SIGNATURE: [u8; 4] = [0x50, 0x4b, 0x05, 0x06];

const ASICE_MIMETYPE: &[u8] = b"application/vnd.etsi.asic-e+zip";
const ASICE_MIMETYPE_CRC32: [u8; 4] = [0x8a, 0x21, 0xf9, 0x45];
const ASICE_MIMETYPE_SIZE: [u8; 4] = [0x1f, 0x00, 0x00, 0x00];

/// The data descriptor a streaming ZIP writer emits after the 31-byte
/// ASiC-E mimetype entry: signature, CRC-32, compressed and uncompressed
/// size.
const ASICE_MIMETYPE_DESCRIPTOR: [u8; 16] = [
    0x50, 0x4b, 0x07, 0x08, // descriptor signature
    0x8a, 0x21, 0xf9, 0x45, // CRC-32 of the mimetype contents
    0x1f, 0x00, 0x00, 0x00, // compressed size (31)
    0x1f, 0x00, 0x00, 0x00, // uncompressed size (31)
];

const DEFLATE_METHOD: u16 = 8;

/// Streaming rewriter wrapping an output sink.
///
/// Bytes are pushed in with [`write`](Self::write) in arbitrary chunks; the
/// rewriter buffers until it can identify the next record by its 4-byte
/// signature and flushes each record as soon as it is complete. After the
/// whole archive has been written, [`finish`](Self::finish) returns the
/// inner writer.
pub struct ZipInputStream<W: Write> {
    buf: Vec<u8>,
    output: W,
    written: u64,
    /// Bytes stripped from the stream so far; the delta applied to every
    /// subsequent central-directory and EOCD offset.
    removed: u32,
}

impl<W: Write> ZipInputStream<W> {
    pub fn new(output: W) -> Self {
        Self {
            buf: Vec::new(),
            output,
            written: 0,
            removed: 0,
        }
    }

    /// Push a chunk of the input archive through the rewriter.
    ///
    /// After an error the stream is in an undefined state and must be
    /// discarded.
    pub fn write(&mut self, data: &[u8]) -> SigaResult<()> {
        self.buf.extend_from_slice(data);

        // Flush as many complete records as possible.
        loop {
            if self.buf.len() < 4 {
                break; // Not enough data to identify the next record.
            }
            let signature: [u8; 4] = self.buf[..4].try_into().expect("four bytes");
            let progressed = match signature {
                LOCAL_SIGNATURE => self.flush_local()?,
                CENTRAL_SIGNATURE => self.flush_central()?,
                EOCD_SIGNATURE => self.flush_eocd()?,
                other => {
                    return Err(SigaError::BadContainer(format!(
                        "unknown signature: {}",
                        hex::encode(other)
                    )))
                }
            };
            if !progressed {
                break;
            }
        }
        Ok(())
    }

    /// Complete the stream, returning the inner writer.
    pub fn finish(self) -> SigaResult<W> {
        if !self.buf.is_empty() {
            return Err(SigaError::BadContainer(format!(
                "truncated archive: {} buffered bytes remain",
                self.buf.len()
            )));
        }
        Ok(self.output)
    }

    /// Process one local file entry. Returns false when the buffer does
    /// not yet hold the full record.
    fn flush_local(&mut self) -> SigaResult<bool> {
        if self.buf.len() < 30 {
            return Ok(false);
        }
        let descriptor = self.buf[6] & 8 == 8;
        let compression = u16::from_le_bytes([self.buf[8], self.buf[9]]);
        let compressed_size =
            u32::from_le_bytes(self.buf[18..22].try_into().expect("four bytes")) as usize;
        let name_len = u16::from_le_bytes([self.buf[26], self.buf[27]]) as usize;
        let extra_len = u16::from_le_bytes([self.buf[28], self.buf[29]]) as usize;

        let header = 30 + name_len + extra_len;
        if self.buf.len() < header {
            return Ok(false);
        }

        // Without a descriptor the sizes are in the header: pass the entry
        // through verbatim.
        if !descriptor {
            return self.flush_bytes(header + compressed_size);
        }

        // DEFLATE indicates which block is final, so the end of the
        // compressed stream can be found by decompressing into a sink.
        // Header, data, and the 16 descriptor bytes pass through verbatim.
        if compression == DEFLATE_METHOD {
            return match raw_deflate_len(&self.buf[header..])? {
                Some(data_len) => self.flush_bytes(header + data_len + 16),
                None => Ok(false), // Not enough data yet.
            };
        }

        // Uncompressed with a descriptor: only the first-entry mimetype of
        // an ASiC-E container is allowed to look like this.
        if &self.buf[30..30 + name_len] != b"mimetype" {
            return Err(SigaError::BadContainer(
                "only mimetype may use a data descriptor and be uncompressed".into(),
            ));
        }
        if self.written > 0 {
            return Err(SigaError::BadContainer(
                "mimetype not first file in stream".into(),
            ));
        }

        // Do not scan raw data for the descriptor signature; compare
        // against the single value a conformant writer can produce.
        let end = header + ASICE_MIMETYPE.len() + ASICE_MIMETYPE_DESCRIPTOR.len();
        if self.buf.len() < end {
            return Ok(false);
        }
        let data_end = header + ASICE_MIMETYPE.len();
        if &self.buf[header..data_end] != ASICE_MIMETYPE
            || self.buf[data_end..end] != ASICE_MIMETYPE_DESCRIPTOR
        {
            return Err(SigaError::BadContainer(format!(
                "unexpected mimetype data: {:?}",
                String::from_utf8_lossy(&self.buf[header..end])
            )));
        }

        // Move the descriptor values into the local file header, flush the
        // entry, and drop the descriptor from the stream.
        self.buf[6] &= !8;
        self.buf[14..18].copy_from_slice(&ASICE_MIMETYPE_CRC32);
        self.buf[18..22].copy_from_slice(&ASICE_MIMETYPE_SIZE);
        self.buf[22..26].copy_from_slice(&ASICE_MIMETYPE_SIZE);
        let flushed = self.flush_bytes(header + ASICE_MIMETYPE.len())?;
        if flushed {
            let descriptor_len = ASICE_MIMETYPE_DESCRIPTOR.len();
            self.buf.drain(..descriptor_len);
            self.removed += descriptor_len as u32;
        }
        Ok(flushed)
    }

    /// Process one central directory entry, adjusting its local header
    /// offset by the number of bytes removed from the stream.
    fn flush_central(&mut self) -> SigaResult<bool> {
        if self.buf.len() < 46 {
            return Ok(false);
        }
        let name_len = u16::from_le_bytes([self.buf[28], self.buf[29]]) as usize;
        let extra_len = u16::from_le_bytes([self.buf[30], self.buf[31]]) as usize;
        let comment_len = u16::from_le_bytes([self.buf[32], self.buf[33]]) as usize;

        // Ensure the whole record is buffered before patching so the
        // adjustment happens at most once.
        let record = 46 + name_len + extra_len + comment_len;
        if self.buf.len() < record {
            return Ok(false);
        }

        if self.removed > 0 {
            let offset = u32::from_le_bytes(self.buf[42..46].try_into().expect("four bytes"));
            // The first entry sits before the removed bytes and keeps its
            // offset.
            if offset > 0 {
                self.buf[42..46].copy_from_slice(&(offset - self.removed).to_le_bytes());
            }
        }
        self.flush_bytes(record)
    }

    /// Process the end-of-central-directory record, adjusting the central
    /// directory offset.
    fn flush_eocd(&mut self) -> SigaResult<bool> {
        if self.buf.len() < 22 {
            return Ok(false);
        }
        let comment_len = u16::from_le_bytes([self.buf[20], self.buf[21]]) as usize;

        let record = 22 + comment_len;
        if self.buf.len() < record {
            return Ok(false);
        }

        if self.removed > 0 {
            let offset = u32::from_le_bytes(self.buf[16..20].try_into().expect("four bytes"));
            self.buf[16..20].copy_from_slice(&(offset - self.removed).to_le_bytes());
        }
        self.flush_bytes(record)
    }

    fn flush_bytes(&mut self, n: usize) -> SigaResult<bool> {
        if self.buf.len() < n {
            return Ok(false);
        }
        self.output
            .write_all(&self.buf[..n])
            .map_err(|e| SigaError::Internal(format!("write output: {e}")))?;
        self.written += n as u64;
        self.buf.drain(..n);
        Ok(true)
    }
}

/// Length of the raw DEFLATE stream at the start of `data`, or `None` when
/// `data` ends before the final block.
fn raw_deflate_len(data: &[u8]) -> SigaResult<Option<usize>> {
    let mut inflater = Decompress::new(false);
    let mut sink = vec![0u8; 32 * 1024];
    loop {
        let consumed = inflater.total_in() as usize;
        let status = inflater
            .decompress(&data[consumed..], &mut sink, FlushDecompress::None)
            .map_err(|e| SigaError::BadContainer(format!("invalid deflate stream: {e}")))?;
        match status {
            Status::StreamEnd => return Ok(Some(inflater.total_in() as usize)),
            Status::Ok => {}
            Status::BufError => return Ok(None), // Needs more input.
        }
    }
}
