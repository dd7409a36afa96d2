//! Format-uniform streaming decompression
//!
//! [`Decompressor`] presents one `fill` operation over the four supported
//! on-disk formats. Each variant owns exactly its format's working set: the
//! open file, and for compressed formats the decoder state. Gzip and
//! Zstandard are pull decoders over the file with the 16 sniffed bytes
//! replayed in front; BGZF drives its own block loop (see [`bgzf`]).
//!
//! Entering or leaving a variant (retarget to a different format) is the only
//! time decoder resources are created or dropped.

mod bgzf;

use crate::error::{BiotextError, Result};
use crate::format::FileFormat;
use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{self, BufReader, Cursor, Read, Seek, SeekFrom};

/// Largest slice handed to a single plain-file `read` call, keeping
/// single-shot I/O within what every platform accepts.
const MAX_BYTES_PER_IO: usize = 1 << 30;

/// Result of one fill call.
#[derive(Debug)]
pub(crate) struct Fill {
    /// Bytes written to the window.
    pub len: usize,
    /// True when the underlying stream is exhausted. A fill that stops short
    /// without setting this needs a larger window before it can continue.
    pub eof: bool,
}

/// A file with its already-sniffed prefix bytes replayed in front.
type PrefixedFile = io::Chain<Cursor<Vec<u8>>, File>;

fn prefixed(file: File, prefix: &[u8]) -> PrefixedFile {
    Cursor::new(prefix.to_vec()).chain(file)
}

/// Fill `dst` from a pull decoder, retrying on interruption.
fn fill_from(reader: &mut impl Read, dst: &mut [u8]) -> io::Result<Fill> {
    let mut n = 0;
    while n < dst.len() {
        match reader.read(&mut dst[n..]) {
            Ok(0) => return Ok(Fill { len: n, eof: true }),
            Ok(k) => n += k,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(Fill { len: n, eof: false })
}

/// Classify a pull-decoder failure: decoder-shaped kinds are corruption,
/// everything else is transport.
fn decode_error(e: &io::Error) -> BiotextError {
    match e.kind() {
        io::ErrorKind::InvalidData
        | io::ErrorKind::InvalidInput
        | io::ErrorKind::UnexpectedEof
        | io::ErrorKind::Other => BiotextError::Decompress(e.to_string()),
        _ => BiotextError::Read(e.to_string()),
    }
}

/// Streaming gzip state: the decoder plus a duplicated handle used to rewind
/// the shared file offset when the decoder is rebuilt.
struct GzipState {
    file: File,
    inner: MultiGzDecoder<PrefixedFile>,
}

impl GzipState {
    fn new(file: File, prefix: &[u8]) -> io::Result<Self> {
        let dup = file.try_clone()?;
        Ok(GzipState {
            file,
            inner: MultiGzDecoder::new(prefixed(dup, prefix)),
        })
    }

    fn rewind(&mut self) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        self.inner = MultiGzDecoder::new(prefixed(self.file.try_clone()?, &[]));
        Ok(())
    }

    fn retarget(&mut self, file: File, prefix: &[u8]) -> io::Result<()> {
        let dup = file.try_clone()?;
        self.file = file;
        self.inner = MultiGzDecoder::new(prefixed(dup, prefix));
        Ok(())
    }
}

/// Streaming Zstandard state, mirroring [`GzipState`].
struct ZstdState {
    file: File,
    inner: zstd::stream::read::Decoder<'static, BufReader<PrefixedFile>>,
}

impl ZstdState {
    fn new(file: File, prefix: &[u8]) -> io::Result<Self> {
        let dup = file.try_clone()?;
        Ok(ZstdState {
            file,
            inner: zstd::stream::read::Decoder::new(prefixed(dup, prefix))?,
        })
    }

    fn rewind(&mut self) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        self.inner = zstd::stream::read::Decoder::new(prefixed(self.file.try_clone()?, &[]))?;
        Ok(())
    }

    fn retarget(&mut self, file: File, prefix: &[u8]) -> io::Result<()> {
        let dup = file.try_clone()?;
        self.file = file;
        self.inner = zstd::stream::read::Decoder::new(prefixed(dup, prefix))?;
        Ok(())
    }
}

/// Uniform decompressor over the supported formats.
pub(crate) enum Decompressor {
    /// No compression framing; reads go straight to the file.
    Plain(File),
    /// RFC 1952 gzip, multi-member.
    Gzip(GzipState),
    /// Blocked gzip.
    Bgzf(bgzf::BgzfDecoder),
    /// Zstandard frames.
    Zstd(ZstdState),
}

impl Decompressor {
    /// Builds the decoder for `format` over `file`, seeding decode input with
    /// the sniffed `prefix`. For [`FileFormat::Plain`] the prefix bytes are
    /// data and the caller keeps them; the file is read from its current
    /// position.
    pub(crate) fn new(
        file: File,
        format: FileFormat,
        prefix: &[u8],
        threads: usize,
    ) -> Result<Self> {
        match format {
            FileFormat::Plain => Ok(Decompressor::Plain(file)),
            FileFormat::Gzip => GzipState::new(file, prefix)
                .map(Decompressor::Gzip)
                .map_err(|e| BiotextError::read(&e)),
            FileFormat::Bgzf => Ok(Decompressor::Bgzf(bgzf::BgzfDecoder::new(
                file, prefix, threads,
            ))),
            FileFormat::Zstd => ZstdState::new(file, prefix)
                .map(Decompressor::Zstd)
                .map_err(|e| BiotextError::Decompress(e.to_string())),
        }
    }

    /// Format this decompressor was built for.
    pub(crate) fn format(&self) -> FileFormat {
        match self {
            Decompressor::Plain(_) => FileFormat::Plain,
            Decompressor::Gzip(_) => FileFormat::Gzip,
            Decompressor::Bgzf(_) => FileFormat::Bgzf,
            Decompressor::Zstd(_) => FileFormat::Zstd,
        }
    }

    /// Fills `dst` with decompressed bytes.
    pub(crate) fn fill(&mut self, dst: &mut [u8]) -> Result<Fill> {
        match self {
            Decompressor::Plain(file) => {
                let mut n = 0;
                while n < dst.len() {
                    let end = dst.len().min(n + MAX_BYTES_PER_IO);
                    match file.read(&mut dst[n..end]) {
                        Ok(0) => return Ok(Fill { len: n, eof: true }),
                        Ok(k) => n += k,
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) => return Err(BiotextError::read(&e)),
                    }
                }
                Ok(Fill { len: n, eof: false })
            }
            Decompressor::Gzip(gz) => fill_from(&mut gz.inner, dst).map_err(|e| decode_error(&e)),
            Decompressor::Bgzf(bz) => bz.fill(dst),
            Decompressor::Zstd(zs) => fill_from(&mut zs.inner, dst).map_err(|e| decode_error(&e)),
        }
    }

    /// Reopens the current file at position zero and resets decoder state.
    pub(crate) fn rewind(&mut self) -> Result<()> {
        match self {
            Decompressor::Plain(file) => file
                .seek(SeekFrom::Start(0))
                .map(|_| ())
                .map_err(|e| BiotextError::read(&e)),
            Decompressor::Gzip(gz) => gz.rewind().map_err(|e| BiotextError::read(&e)),
            Decompressor::Bgzf(bz) => bz.rewind().map_err(|e| BiotextError::read(&e)),
            Decompressor::Zstd(zs) => zs.rewind().map_err(|e| BiotextError::read(&e)),
        }
    }

    /// Switches to `file` (sniffed as `format`, prefix bytes in `prefix`).
    ///
    /// The same format resets decoder state in place; a different format
    /// drops this variant's resources and builds the new variant. Each arm
    /// ends its own branch.
    pub(crate) fn retarget(
        &mut self,
        file: File,
        format: FileFormat,
        prefix: &[u8],
        threads: usize,
    ) -> Result<()> {
        match (&mut *self, format) {
            (Decompressor::Plain(slot), FileFormat::Plain) => {
                *slot = file;
                Ok(())
            }
            (Decompressor::Gzip(gz), FileFormat::Gzip) => gz
                .retarget(file, prefix)
                .map_err(|e| BiotextError::read(&e)),
            (Decompressor::Bgzf(bz), FileFormat::Bgzf) => {
                bz.retarget(file, prefix);
                Ok(())
            }
            (Decompressor::Zstd(zs), FileFormat::Zstd) => zs
                .retarget(file, prefix)
                .map_err(|e| BiotextError::Decompress(e.to_string())),
            (slot, _) => {
                *slot = Decompressor::new(file, format, prefix, threads)?;
                Ok(())
            }
        }
    }

    /// Adjusts BGZF block-decode parallelism; no effect on other formats.
    pub(crate) fn set_threads(&mut self, threads: usize) {
        if let Decompressor::Bgzf(bz) = self {
            bz.set_threads(threads);
        }
    }
}
