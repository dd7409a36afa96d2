//! BGZF block decoding
//!
//! BGZF files are sequences of independent gzip members, each carrying its
//! compressed size in a `BC` extra subfield and its uncompressed size in the
//! gzip `ISIZE` footer. Blocks are fully independent, which permits decoding
//! a batch of staged blocks in parallel into disjoint parts of the output
//! window.
//!
//! The decoder stages compressed bytes in a [`crate::DECOMPRESS_CHUNK`]-sized
//! buffer, decodes every fully staged block that fits the caller's window,
//! and carries a partial trailing block over to the next refill.

use crate::error::{BiotextError, Result};
use crate::format::is_bgzf_prefix;
use crate::DECOMPRESS_CHUNK;
use flate2::{Decompress, FlushDecompress, Status};
use rayon::prelude::*;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::ops::Range;

use super::Fill;

/// Fixed BGZF header length: 12 gzip header bytes plus the 6-byte `BC`
/// subfield.
const HEADER_LEN: usize = 18;

/// CRC32 plus ISIZE.
const FOOTER_LEN: usize = 8;

/// Upper bound on the uncompressed payload of one block, per the format.
const MAX_BLOCK_OUT: usize = 65536;

/// Blocks decoded per rayon batch when parallel decoding is enabled.
const PARALLEL_BLOCK_COUNT: usize = 8;

const ERR_INVALID: &str = "malformed BGZF block";
const ERR_TRUNCATED: &str = "BGZF file appears to be truncated";

/// One fully staged block: payload bytes in the staging buffer and the
/// uncompressed length promised by the footer.
struct BlockSpec {
    payload: Range<usize>,
    out_len: usize,
}

/// Streaming single-file BGZF decoder.
pub(crate) struct BgzfDecoder {
    file: File,
    input: Vec<u8>,
    in_pos: usize,
    in_len: usize,
    file_eof: bool,
    inflater: Decompress,
    threads: usize,
}

impl BgzfDecoder {
    /// Wraps `file`, replaying the already-sniffed `prefix` bytes ahead of
    /// whatever the file yields next.
    pub(crate) fn new(file: File, prefix: &[u8], threads: usize) -> Self {
        let mut input = vec![0u8; DECOMPRESS_CHUNK];
        input[..prefix.len()].copy_from_slice(prefix);
        BgzfDecoder {
            file,
            input,
            in_pos: 0,
            in_len: prefix.len(),
            file_eof: false,
            inflater: Decompress::new(false),
            threads,
        }
    }

    /// Reopens the stream at position zero, discarding staged bytes.
    pub(crate) fn rewind(&mut self) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        self.in_pos = 0;
        self.in_len = 0;
        self.file_eof = false;
        Ok(())
    }

    /// Switches to a new file of the same format, reusing the staging buffer
    /// and inflate state. `prefix` holds the bytes already sniffed from it.
    pub(crate) fn retarget(&mut self, file: File, prefix: &[u8]) {
        self.file = file;
        self.input[..prefix.len()].copy_from_slice(prefix);
        self.in_pos = 0;
        self.in_len = prefix.len();
        self.file_eof = false;
    }

    /// Adjusts block-decode parallelism (used when a synchronous reader is
    /// promoted to a stream).
    pub(crate) fn set_threads(&mut self, threads: usize) {
        self.threads = threads;
    }

    /// Decompresses staged blocks into `dst`.
    ///
    /// Returns early with `eof == false` when the next block's payload does
    /// not fit the remaining window, so the caller can drain and retry.
    pub(crate) fn fill(&mut self, dst: &mut [u8]) -> Result<Fill> {
        let mut n = 0;
        loop {
            if self.in_pos == self.in_len && self.file_eof {
                return Ok(Fill { len: n, eof: true });
            }
            let batch_cap = if self.threads > 1 { PARALLEL_BLOCK_COUNT } else { 1 };
            let mut specs: Vec<BlockSpec> = Vec::new();
            let mut scan = self.in_pos;
            let mut out_total = 0;
            let mut window_full = false;
            while specs.len() < batch_cap {
                match self.parse_block(scan)? {
                    None => break,
                    Some((spec, block_len)) => {
                        if n + out_total + spec.out_len > dst.len() {
                            window_full = true;
                            break;
                        }
                        scan += block_len;
                        out_total += spec.out_len;
                        specs.push(spec);
                    }
                }
            }
            if !specs.is_empty() {
                self.decode_batch(&specs, &mut dst[n..n + out_total])?;
                self.in_pos = scan;
                n += out_total;
                continue;
            }
            if window_full {
                return Ok(Fill { len: n, eof: false });
            }
            self.refill()?;
        }
    }

    /// Parses the block starting at `pos` in the staging buffer. Returns the
    /// payload spec and total block length, or `None` when the staged bytes
    /// do not cover a whole block yet.
    fn parse_block(&self, pos: usize) -> Result<Option<(BlockSpec, usize)>> {
        let avail = self.in_len - pos;
        if avail <= HEADER_LEN + FOOTER_LEN - 1 {
            return Ok(None);
        }
        if !is_bgzf_prefix(&self.input[pos..pos + 16]) {
            return Err(BiotextError::Decompress(ERR_INVALID.into()));
        }
        let bsize_minus1 =
            u16::from_le_bytes([self.input[pos + 16], self.input[pos + 17]]) as usize;
        if bsize_minus1 < HEADER_LEN + FOOTER_LEN - 1 {
            return Err(BiotextError::Decompress(ERR_INVALID.into()));
        }
        if bsize_minus1 >= avail {
            return Ok(None);
        }
        let in_size = bsize_minus1 + 1 - HEADER_LEN - FOOTER_LEN;
        let isize_at = pos + HEADER_LEN + in_size + 4;
        let out_len = u32::from_le_bytes([
            self.input[isize_at],
            self.input[isize_at + 1],
            self.input[isize_at + 2],
            self.input[isize_at + 3],
        ]) as usize;
        if out_len > MAX_BLOCK_OUT {
            return Err(BiotextError::Decompress(ERR_INVALID.into()));
        }
        let payload = pos + HEADER_LEN..pos + HEADER_LEN + in_size;
        Ok(Some((BlockSpec { payload, out_len }, bsize_minus1 + 1)))
    }

    /// Decodes `specs` into `out`, which is exactly their combined length.
    fn decode_batch(&mut self, specs: &[BlockSpec], out: &mut [u8]) -> Result<()> {
        if self.threads <= 1 || specs.len() == 1 {
            let mut offset = 0;
            for spec in specs {
                inflate_block(
                    &mut self.inflater,
                    &self.input[spec.payload.clone()],
                    &mut out[offset..offset + spec.out_len],
                )?;
                offset += spec.out_len;
            }
            return Ok(());
        }
        let mut outs: Vec<&mut [u8]> = Vec::with_capacity(specs.len());
        let mut rest = out;
        for spec in specs {
            let (head, tail) = std::mem::take(&mut rest).split_at_mut(spec.out_len);
            outs.push(head);
            rest = tail;
        }
        let input = &self.input;
        specs
            .par_iter()
            .zip(outs.into_par_iter())
            .try_for_each(|(spec, out_slice)| {
                let mut inflater = Decompress::new(false);
                inflate_block(&mut inflater, &input[spec.payload.clone()], out_slice)
            })
    }

    /// Compacts the partial trailing block to the front of the staging
    /// buffer and reads more compressed bytes behind it.
    fn refill(&mut self) -> Result<()> {
        let leftover = self.in_len - self.in_pos;
        self.input.copy_within(self.in_pos..self.in_len, 0);
        self.in_pos = 0;
        self.in_len = leftover;
        loop {
            match self.file.read(&mut self.input[self.in_len..]) {
                Ok(0) => {
                    self.file_eof = true;
                    if self.in_len != 0 {
                        return Err(BiotextError::Decompress(ERR_TRUNCATED.into()));
                    }
                    return Ok(());
                }
                Ok(k) => {
                    self.in_len += k;
                    return Ok(());
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(BiotextError::read(&e)),
            }
        }
    }
}

/// One-shot raw-deflate decode of a single block payload. The output slice
/// length is the block's promised uncompressed size; anything else is a
/// framing violation.
fn inflate_block(inflater: &mut Decompress, payload: &[u8], out: &mut [u8]) -> Result<()> {
    inflater.reset(false);
    if out.is_empty() {
        // EOF-marker block: an empty final deflate block, no output.
        let mut scratch = [0u8; 16];
        let status = inflater
            .decompress(payload, &mut scratch, FlushDecompress::Finish)
            .map_err(|e| BiotextError::Decompress(format!("{ERR_INVALID}: {e}")))?;
        if status != Status::StreamEnd || inflater.total_out() != 0 {
            return Err(BiotextError::Decompress(ERR_INVALID.into()));
        }
        return Ok(());
    }
    let status = inflater
        .decompress(payload, out, FlushDecompress::Finish)
        .map_err(|e| BiotextError::Decompress(format!("{ERR_INVALID}: {e}")))?;
    if status != Status::StreamEnd
        || inflater.total_out() != out.len() as u64
        || inflater.total_in() != payload.len() as u64
    {
        return Err(BiotextError::Decompress(ERR_INVALID.into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    /// Hand-assembled BGZF block holding `data`.
    fn bgzf_block(data: &[u8]) -> Vec<u8> {
        let mut deflater =
            flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
        deflater.write_all(data).unwrap();
        let deflated = deflater.finish().unwrap();

        let mut block = vec![0x1f, 0x8b, 0x08, 0x04, 0, 0, 0, 0, 0, 0xff];
        block.extend_from_slice(&[6, 0, b'B', b'C', 2, 0]);
        let bsize = (HEADER_LEN + deflated.len() + FOOTER_LEN - 1) as u16;
        block.extend_from_slice(&bsize.to_le_bytes());
        block.extend_from_slice(&deflated);
        block.extend_from_slice(&crc32fast::hash(data).to_le_bytes());
        block.extend_from_slice(&(data.len() as u32).to_le_bytes());
        block
    }

    const EOF_MARKER: [u8; 28] = [
        0x1f, 0x8b, 0x08, 0x04, 0, 0, 0, 0, 0, 0xff, 6, 0, b'B', b'C', 2, 0, 27, 0, 3, 0, 0, 0,
        0, 0, 0, 0, 0, 0,
    ];

    fn decoder_for(bytes: &[u8], threads: usize) -> BgzfDecoder {
        let mut tmp = tempfile::tempfile().unwrap();
        tmp.write_all(bytes).unwrap();
        tmp.seek(SeekFrom::Start(0)).unwrap();
        let mut prefix = [0u8; 16];
        let n = crate::format::read_prefix(&mut tmp, &mut prefix).unwrap();
        BgzfDecoder::new(tmp, &prefix[..n], threads)
    }

    #[test]
    fn decodes_blocks_and_eof_marker() {
        let mut bytes = bgzf_block(b"chr1\t100\n");
        bytes.extend_from_slice(&bgzf_block(b"chr2\t200\n"));
        bytes.extend_from_slice(&EOF_MARKER);
        let mut dec = decoder_for(&bytes, 1);
        let mut out = vec![0u8; 64];
        let fill = dec.fill(&mut out).unwrap();
        assert_eq!(&out[..fill.len], b"chr1\t100\nchr2\t200\n");
        assert!(fill.eof);
    }

    #[test]
    fn parallel_batch_matches_sequential() {
        let mut bytes = Vec::new();
        let mut expected = Vec::new();
        for i in 0..20 {
            let line = format!("record_{i}\t{}\n", i * 7).repeat(50);
            expected.extend_from_slice(line.as_bytes());
            bytes.extend_from_slice(&bgzf_block(line.as_bytes()));
        }
        bytes.extend_from_slice(&EOF_MARKER);

        for threads in [1, 4] {
            let mut dec = decoder_for(&bytes, threads);
            let mut out = vec![0u8; expected.len() + 128];
            let fill = dec.fill(&mut out).unwrap();
            assert_eq!(&out[..fill.len], &expected[..], "threads={threads}");
            assert!(fill.eof);
        }
    }

    #[test]
    fn flushes_when_window_is_smaller_than_next_block() {
        let mut bytes = bgzf_block(&vec![b'x'; 1000]);
        bytes.extend_from_slice(&EOF_MARKER);
        let mut dec = decoder_for(&bytes, 1);
        let mut out = vec![0u8; 100];
        let fill = dec.fill(&mut out).unwrap();
        assert_eq!(fill.len, 0);
        assert!(!fill.eof);
        let mut out = vec![0u8; 2000];
        let fill = dec.fill(&mut out).unwrap();
        assert_eq!(fill.len, 1000);
        assert!(fill.eof);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut bytes = bgzf_block(b"ok\n");
        bytes.extend_from_slice(&[0u8; 64]);
        let mut dec = decoder_for(&bytes, 1);
        let mut out = vec![0u8; 256];
        let err = dec.fill(&mut out).unwrap_err();
        assert!(matches!(err, BiotextError::Decompress(_)));
    }

    #[test]
    fn truncated_trailing_block_is_rejected() {
        let block = bgzf_block(b"chr1\t100\n");
        let bytes = &block[..block.len() - 4];
        let mut dec = decoder_for(bytes, 1);
        let mut out = vec![0u8; 256];
        let err = dec.fill(&mut out).unwrap_err();
        assert_eq!(
            err,
            BiotextError::Decompress(ERR_TRUNCATED.into())
        );
    }

    #[test]
    fn undersized_bsize_is_rejected() {
        let mut block = bgzf_block(b"data\n");
        block[16] = 10;
        block[17] = 0;
        let mut dec = decoder_for(&block, 1);
        let mut out = vec![0u8; 256];
        let err = dec.fill(&mut out).unwrap_err();
        assert_eq!(err, BiotextError::Decompress(ERR_INVALID.into()));
    }
}
