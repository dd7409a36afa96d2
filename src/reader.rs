//! Synchronous text reader
//!
//! [`TextReader`] decompresses on the calling thread into a private buffer
//! and hands out newline-terminated regions. It shares the format detection,
//! decompressor, and scanning primitives with [`crate::TextStream`]; a
//! partially consumed `TextReader` can be promoted into a stream with
//! [`crate::TextStream::from_reader`].

use crate::decompress::Decompressor;
use crate::error::{BiotextError, Result};
use crate::format::{classify_prefix, read_prefix, FileFormat, SNIFF_LEN};
use crate::options::{next_buffer_capacity, ReadOptions};
use crate::scan;
use crate::sync::StreamState;
use crate::{DECOMPRESS_CHUNK, MAX_TOKEN_LEN};
use memchr::{memchr, memchr_iter};
use std::fs::File;
use std::path::Path;

pub(crate) const ERR_LONG_LINE: &str = "pathologically long line";
pub(crate) const ERR_LONG_TOKEN: &str = "pathologically long token";

/// Everything produced by opening a file: the decompressor seeded with the
/// sniffed prefix, and the destination buffer (holding the prefix bytes as
/// data when the file is plain).
pub(crate) struct OpenParts {
    pub decomp: Decompressor,
    pub buf: Vec<u8>,
    pub dst_len: usize,
    pub max_line_len: usize,
    pub fixed: bool,
}

pub(crate) fn open_parts(path: &Path, opts: &ReadOptions, threads: usize) -> Result<OpenParts> {
    opts.validate()?;
    let mut file = File::open(path).map_err(|e| BiotextError::open(path, &e))?;
    let mut prefix = [0u8; SNIFF_LEN];
    let n = read_prefix(&mut file, &mut prefix).map_err(|e| BiotextError::read(&e))?;
    let format = classify_prefix(&prefix[..n]);
    log::debug!("opened {} as {:?}", path.display(), format);

    let capacity = opts.initial_capacity();
    let mut buf = Vec::new();
    buf.try_reserve_exact(capacity)
        .map_err(|_| BiotextError::Nomem("destination buffer allocation failed".into()))?;
    buf.resize(capacity, 0);

    let mut dst_len = 0;
    if format == FileFormat::Plain {
        buf[..n].copy_from_slice(&prefix[..n]);
        dst_len = n;
    }
    let decomp = Decompressor::new(file, format, &prefix[..n], threads)?;
    Ok(OpenParts {
        decomp,
        buf,
        dst_len,
        max_line_len: opts.max_line_len,
        fixed: opts.fixed_buffer,
    })
}

/// Open and sniff a retarget destination; returns the decoder inputs plus the
/// prefix bytes that become buffer data for plain files.
pub(crate) fn open_target(path: &Path) -> Result<(File, FileFormat, [u8; SNIFF_LEN], usize)> {
    let mut file = File::open(path).map_err(|e| BiotextError::open(path, &e))?;
    let mut prefix = [0u8; SNIFF_LEN];
    let n = read_prefix(&mut file, &mut prefix).map_err(|e| BiotextError::read(&e))?;
    let format = classify_prefix(&prefix[..n]);
    log::debug!("retargeting to {} as {:?}", path.display(), format);
    Ok((file, format, prefix, n))
}

/// Synchronous line-oriented reader over a possibly compressed file.
///
/// Regions handed to the caller always end immediately after a `'\n'`; a
/// final line without one gets a synthetic newline appended. Lines returned
/// by the iteration helpers never include the terminating newline.
///
/// # Example
///
/// ```no_run
/// use biotext::TextReader;
///
/// # fn main() -> biotext::Result<()> {
/// let mut reader = TextReader::open("samples.tsv.zst")?;
/// let mut line_idx = 0u64;
/// while let Some(line) = reader.next_nonempty_line(&mut line_idx)? {
///     // line borrows the internal buffer; no per-line copy
///     let _ = line;
/// }
/// # Ok(())
/// # }
/// ```
pub struct TextReader {
    pub(crate) decomp: Decompressor,
    pub(crate) dst: Vec<u8>,
    pub(crate) dst_len: usize,
    pub(crate) consume_iter: usize,
    pub(crate) consume_stop: usize,
    pub(crate) fixed: bool,
    pub(crate) max_line_len: usize,
    pub(crate) state: StreamState,
}

impl std::fmt::Debug for TextReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextReader").finish_non_exhaustive()
    }
}

impl TextReader {
    /// Opens `path` with default options.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, &ReadOptions::default())
    }

    /// Opens `path` with explicit options. BGZF decoding in the synchronous
    /// reader is always single threaded; `decompress_threads` takes effect
    /// only after promotion to a stream.
    pub fn open_with<P: AsRef<Path>>(path: P, options: &ReadOptions) -> Result<Self> {
        let parts = open_parts(path.as_ref(), options, 1)?;
        Ok(TextReader {
            decomp: parts.decomp,
            dst: parts.buf,
            dst_len: parts.dst_len,
            consume_iter: 0,
            consume_stop: 0,
            fixed: parts.fixed,
            max_line_len: parts.max_line_len,
            state: StreamState::Active,
        })
    }

    /// Detected compression framing of the current file.
    pub fn format(&self) -> FileFormat {
        self.decomp.format()
    }

    fn length_bound(&self) -> usize {
        if self.max_line_len == 0 {
            MAX_TOKEN_LEN
        } else {
            self.max_line_len
        }
    }

    fn long_input_error(&self) -> BiotextError {
        if self.max_line_len == 0 {
            BiotextError::MalformedInput(ERR_LONG_TOKEN.into())
        } else {
            BiotextError::MalformedInput(ERR_LONG_LINE.into())
        }
    }

    /// Makes the next region available, returning false at end of input.
    ///
    /// The unfinished line (if any) moves to the front of the buffer first,
    /// growing the buffer when it is owned and the line still fits the
    /// configured bound.
    pub(crate) fn advance(&mut self) -> Result<bool> {
        match &self.state {
            StreamState::Failed(e) => return Err(e.clone()),
            StreamState::Eof => return Ok(false),
            StreamState::Active => {}
        }
        debug_assert_eq!(self.consume_iter, self.consume_stop);
        let mut line_start = self.consume_stop;
        let result = loop {
            let tail_len = self.dst_len - line_start;
            if tail_len < self.dst.len() - DECOMPRESS_CHUNK {
                self.dst.copy_within(line_start..self.dst_len, 0);
            } else if self.fixed {
                break Err(BiotextError::Nomem(
                    "fixed buffer cannot hold the current line".into(),
                ));
            } else {
                let Some(next) = next_buffer_capacity(self.dst.len(), self.length_bound())
                else {
                    break Err(BiotextError::Nomem("buffer growth exceeds 2 GiB".into()));
                };
                if line_start == 0 {
                    if self.dst.try_reserve_exact(next - self.dst.len()).is_err() {
                        break Err(BiotextError::Nomem("buffer growth failed".into()));
                    }
                    self.dst.resize(next, 0);
                } else {
                    let mut grown = Vec::new();
                    if grown.try_reserve_exact(next).is_err() {
                        break Err(BiotextError::Nomem("buffer growth failed".into()));
                    }
                    grown.resize(next, 0);
                    grown[..tail_len].copy_from_slice(&self.dst[line_start..self.dst_len]);
                    self.dst = grown;
                }
            }
            // The unfinished line now starts at the front of the buffer.
            line_start = 0;
            self.dst_len = tail_len;
            let load_start = tail_len;
            self.consume_iter = 0;
            self.consume_stop = 0;

            let fill = match self.decomp.fill(&mut self.dst[load_start..]) {
                Ok(f) => f,
                Err(e) => break Err(e),
            };
            let read_end = load_start + fill.len;
            self.dst_len = read_end;
            if read_end == 0 {
                break Ok(false);
            }
            if fill.eof && read_end < self.dst.len() {
                let mut end = read_end;
                if self.dst[end - 1] != b'\n' {
                    self.dst[end] = b'\n';
                    end += 1;
                    self.dst_len = end;
                }
                self.consume_stop = end;
                if scan::exceeds_length_bound(&self.dst[..end], load_start, self.max_line_len) {
                    break Err(self.long_input_error());
                }
                break Ok(true);
            }
            let window = &self.dst[load_start..read_end];
            let boundary = if self.max_line_len == 0 {
                scan::last_token_boundary(window)
            } else {
                scan::last_line_boundary(window)
            };
            if let Some(rel) = boundary {
                let stop = load_start + rel;
                self.consume_stop = stop;
                if scan::exceeds_length_bound(&self.dst[..stop], load_start, self.max_line_len) {
                    break Err(self.long_input_error());
                }
                break Ok(true);
            }
            // No boundary in the freshly loaded bytes; widen and retry
            // unless the bound is already exhausted.
            if self.dst_len >= self.length_bound() {
                break Err(self.long_input_error());
            }
        };
        match result {
            Ok(true) => Ok(true),
            Ok(false) => {
                self.state = StreamState::Eof;
                Ok(false)
            }
            Err(e) => {
                self.state = StreamState::Failed(e.clone());
                Err(e)
            }
        }
    }

    /// Next line without its terminating newline; `Ok(None)` at end of input.
    pub fn next_line(&mut self) -> Result<Option<&[u8]>> {
        if self.consume_iter == self.consume_stop && !self.advance()? {
            return Ok(None);
        }
        let start = self.consume_iter;
        let end = match memchr(b'\n', &self.dst[start..self.consume_stop]) {
            Some(p) => start + p,
            None => self.consume_stop,
        };
        self.consume_iter = (end + 1).min(self.consume_stop);
        Ok(Some(&self.dst[start..end]))
    }

    /// Next line that is nonempty after left-stripping spaces and tabs,
    /// without its terminating newline. Every visited line (empty ones
    /// included) increments `line_idx`.
    pub fn next_nonempty_line(&mut self, line_idx: &mut u64) -> Result<Option<&[u8]>> {
        let (start, end) = loop {
            *line_idx += 1;
            if self.consume_iter == self.consume_stop && !self.advance()? {
                return Ok(None);
            }
            let region_start = self.consume_iter;
            let start =
                region_start + scan::first_non_hspace(&self.dst[region_start..self.consume_stop]);
            let end = match memchr(b'\n', &self.dst[start..self.consume_stop]) {
                Some(p) => start + p,
                None => self.consume_stop,
            };
            self.consume_iter = (end + 1).min(self.consume_stop);
            if start < self.consume_stop && !scan::is_eoln(self.dst[start]) {
                break (start, end);
            }
        };
        Ok(Some(&self.dst[start..end]))
    }

    /// Skips past `n` newlines. Reaching end of input first is
    /// [`BiotextError::UnexpectedEof`].
    pub fn skip_lines(&mut self, mut n: u64) -> Result<()> {
        while n > 0 {
            if self.consume_iter == self.consume_stop && !self.advance()? {
                return Err(BiotextError::UnexpectedEof);
            }
            let region = &self.dst[self.consume_iter..self.consume_stop];
            let mut consumed = region.len();
            for pos in memchr_iter(b'\n', region) {
                n -= 1;
                if n == 0 {
                    consumed = pos + 1;
                    break;
                }
            }
            self.consume_iter += consumed;
        }
        Ok(())
    }

    /// Abandons the rest of the current region and returns the next whole
    /// region; `Ok(None)` at end of input.
    pub fn next_region(&mut self) -> Result<Option<&[u8]>> {
        self.consume_iter = self.consume_stop;
        if !self.advance()? {
            return Ok(None);
        }
        Ok(Some(&self.dst[self.consume_iter..self.consume_stop]))
    }

    /// Reopens the current file at position zero. Clears a stored EOF; a
    /// stored failure is returned instead.
    pub fn rewind(&mut self) -> Result<()> {
        if let StreamState::Failed(e) = &self.state {
            return Err(e.clone());
        }
        if let Err(e) = self.decomp.rewind() {
            self.state = StreamState::Failed(e.clone());
            return Err(e);
        }
        self.state = StreamState::Active;
        self.dst_len = 0;
        self.consume_iter = 0;
        self.consume_stop = 0;
        Ok(())
    }

    /// Switches to reading `path`, resetting decoder state (in place when the
    /// format matches, rebuilt otherwise). Clears a stored EOF; a stored
    /// failure is returned instead.
    pub fn retarget<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        if let StreamState::Failed(e) = &self.state {
            return Err(e.clone());
        }
        let (file, format, prefix, n) = match open_target(path.as_ref()) {
            Ok(t) => t,
            Err(e) => {
                self.state = StreamState::Failed(e.clone());
                return Err(e);
            }
        };
        if let Err(e) = self.decomp.retarget(file, format, &prefix[..n], 1) {
            self.state = StreamState::Failed(e.clone());
            return Err(e);
        }
        self.state = StreamState::Active;
        self.dst_len = 0;
        self.consume_iter = 0;
        self.consume_stop = 0;
        if format == FileFormat::Plain {
            self.dst[..n].copy_from_slice(&prefix[..n]);
            self.dst_len = n;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_temp(bytes: &[u8]) -> NamedTempFile {
        let mut tmp = NamedTempFile::new().unwrap();
        tmp.write_all(bytes).unwrap();
        tmp.flush().unwrap();
        tmp
    }

    #[test]
    fn lines_from_plain_file() {
        let tmp = write_temp(b"a\nb\nc\n");
        let mut reader = TextReader::open(tmp.path()).unwrap();
        assert_eq!(reader.next_line().unwrap().unwrap(), b"a");
        assert_eq!(reader.next_line().unwrap().unwrap(), b"b");
        assert_eq!(reader.next_line().unwrap().unwrap(), b"c");
        assert!(reader.next_line().unwrap().is_none());
        // End of input is sticky until rewind.
        assert!(reader.next_line().unwrap().is_none());
    }

    #[test]
    fn synthetic_newline_on_unterminated_file() {
        let tmp = write_temp(b"hello");
        let mut reader = TextReader::open(tmp.path()).unwrap();
        let region = reader.next_region().unwrap().unwrap();
        assert_eq!(region, b"hello\n");
        assert!(reader.next_region().unwrap().is_none());
    }

    #[test]
    fn empty_file_is_immediate_eof() {
        let tmp = write_temp(b"");
        let mut reader = TextReader::open(tmp.path()).unwrap();
        assert!(reader.next_line().unwrap().is_none());
    }

    #[test]
    fn rewind_replays_the_file() {
        let tmp = write_temp(b"x\ny\n");
        let mut reader = TextReader::open(tmp.path()).unwrap();
        assert_eq!(reader.next_line().unwrap().unwrap(), b"x");
        reader.rewind().unwrap();
        assert_eq!(reader.next_line().unwrap().unwrap(), b"x");
        assert_eq!(reader.next_line().unwrap().unwrap(), b"y");
    }

    #[test]
    fn nonempty_line_skips_blank_and_counts() {
        let tmp = write_temp(b"\n  \t\nfirst\n\nsecond\n");
        let mut reader = TextReader::open(tmp.path()).unwrap();
        let mut idx = 0u64;
        assert_eq!(reader.next_nonempty_line(&mut idx).unwrap().unwrap(), b"first");
        assert_eq!(idx, 3);
        assert_eq!(reader.next_nonempty_line(&mut idx).unwrap().unwrap(), b"second");
        assert_eq!(idx, 5);
        assert!(reader.next_nonempty_line(&mut idx).unwrap().is_none());
    }

    #[test]
    fn skip_lines_lands_after_kth_newline() {
        let tmp = write_temp(b"1\n2\n3\n4\n");
        let mut reader = TextReader::open(tmp.path()).unwrap();
        reader.skip_lines(2).unwrap();
        assert_eq!(reader.next_line().unwrap().unwrap(), b"3");
        assert_eq!(reader.skip_lines(5).unwrap_err(), BiotextError::UnexpectedEof);
    }

    #[test]
    fn retarget_switches_files() {
        let a = write_temp(b"a1\n");
        let b = write_temp(b"b1\nb2\n");
        let mut reader = TextReader::open(a.path()).unwrap();
        assert_eq!(reader.next_line().unwrap().unwrap(), b"a1");
        reader.retarget(b.path()).unwrap();
        assert_eq!(reader.next_line().unwrap().unwrap(), b"b1");
        assert_eq!(reader.next_line().unwrap().unwrap(), b"b2");
        assert!(reader.next_line().unwrap().is_none());
    }
}
