//! Shared fixtures for the integration tests: on-disk files in every
//! supported framing.

use std::io::Write;
use std::path::PathBuf;
use tempfile::TempDir;

pub fn write_file(dir: &TempDir, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    enc.write_all(data).unwrap();
    enc.finish().unwrap()
}

pub fn zst(data: &[u8]) -> Vec<u8> {
    zstd::stream::encode_all(data, 0).unwrap()
}

const BGZF_HEADER_LEN: usize = 18;
const BGZF_FOOTER_LEN: usize = 8;

/// Uncompressed payload per BGZF block; small enough that the compressed
/// block size always fits the 16-bit BSIZE field.
const BGZF_BLOCK_INPUT: usize = 60 * 1024;

fn bgzf_block(data: &[u8]) -> Vec<u8> {
    let mut deflater =
        flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
    deflater.write_all(data).unwrap();
    let deflated = deflater.finish().unwrap();

    let mut block = vec![0x1f, 0x8b, 0x08, 0x04, 0, 0, 0, 0, 0, 0xff];
    block.extend_from_slice(&[6, 0, b'B', b'C', 2, 0]);
    let bsize = BGZF_HEADER_LEN + deflated.len() + BGZF_FOOTER_LEN - 1;
    block.extend_from_slice(&u16::try_from(bsize).unwrap().to_le_bytes());
    block.extend_from_slice(&deflated);
    block.extend_from_slice(&crc32fast::hash(data).to_le_bytes());
    block.extend_from_slice(&u32::try_from(data.len()).unwrap().to_le_bytes());
    block
}

/// bgzip-style framing: fixed-size blocks plus the 28-byte EOF marker.
pub fn bgzf(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    for chunk in data.chunks(BGZF_BLOCK_INPUT) {
        out.extend_from_slice(&bgzf_block(chunk));
    }
    out.extend_from_slice(&[
        0x1f, 0x8b, 0x08, 0x04, 0, 0, 0, 0, 0, 0xff, 6, 0, b'B', b'C', 2, 0, 27, 0, 3, 0, 0, 0,
        0, 0, 0, 0, 0, 0,
    ]);
    out
}

/// Tab-separated record lines totalling at least `min_len` bytes.
pub fn record_lines(min_len: usize) -> Vec<u8> {
    let mut data = Vec::with_capacity(min_len + 64);
    let mut i = 0u64;
    while data.len() < min_len {
        data.extend_from_slice(
            format!("chr{}\t{}\trs{}\tA\tG\n", i % 23 + 1, i * 37 + 11, i).as_bytes(),
        );
        i += 1;
    }
    data
}
