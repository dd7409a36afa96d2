//! Asynchronous text stream
//!
//! [`TextStream`] runs decompression on a background reader thread that fills
//! a shared buffer while the consumer walks previously published regions.
//! The two sides meet only at the [`crate::sync::StreamSync`] mutex: the
//! producer publishes `available_end` (and, on wraparound,
//! `cur_circular_end`), the consumer releases bytes by advancing
//! `consume_tail`, and each wakes the other through a condition variable.
//!
//! The producer writes forward until it runs out of room, then either waits
//! for the consumer, relocates the unfinished line to the buffer start, grows
//! the buffer, or wraps around and continues from offset zero while the
//! consumer finishes the region near the end. A region never crosses the
//! wrap boundary and always ends just after a newline.

use crate::buffer::SharedBuffer;
use crate::decompress::Decompressor;
use crate::error::{BiotextError, Result};
use crate::format::FileFormat;
use crate::options::{next_buffer_capacity, ReadOptions};
use crate::reader::{open_parts, open_target, TextReader, ERR_LONG_LINE, ERR_LONG_TOKEN};
use crate::scan;
use crate::sync::{Interrupt, StreamState, StreamSync};
use crate::{DECOMPRESS_CHUNK, MAX_TOKEN_LEN};
use memchr::{memchr, memchr_iter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;

/// State shared with the reader thread.
struct Shared {
    buf: SharedBuffer,
    sync: StreamSync,
}

/// Locals handed to the reader thread at spawn.
struct ReaderInit {
    cur_block_start: usize,
    read_head: usize,
    max_line_len: usize,
    threads: usize,
}

/// Why the fill loop stopped.
enum Parked {
    /// Input exhausted; wait for rewind/retarget or shutdown.
    Eof,
    /// Unrecoverable failure; publish it and wait for shutdown.
    Fail(BiotextError),
    /// A consumer request arrived mid-fill.
    Interrupted,
}

fn long_input_error(is_token: bool) -> BiotextError {
    if is_token {
        BiotextError::MalformedInput(ERR_LONG_TOKEN.into())
    } else {
        BiotextError::MalformedInput(ERR_LONG_LINE.into())
    }
}

/// Streaming line-oriented reader with a background decompression thread.
///
/// Regions handed to the caller always end immediately after a `'\n'`; a
/// final line without one gets a synthetic newline appended. Lines returned
/// by the iteration helpers never include the terminating newline and borrow
/// the shared buffer directly; nothing is copied per line.
///
/// # Example
///
/// ```no_run
/// use biotext::TextStream;
///
/// # fn main() -> biotext::Result<()> {
/// let mut stream = TextStream::open("cohort.pvar.zst")?;
/// stream.skip_lines(1)?; // header
/// while let Some(line) = stream.next_line()? {
///     let _ = line;
/// }
/// # Ok(())
/// # }
/// ```
pub struct TextStream {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
    consume_iter: usize,
    consume_stop: usize,
    state: StreamState,
    max_line_len: usize,
}

impl std::fmt::Debug for TextStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextStream").finish_non_exhaustive()
    }
}

impl TextStream {
    /// Opens `path` with default options.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, &ReadOptions::default())
    }

    /// Opens `path` with explicit options.
    pub fn open_with<P: AsRef<Path>>(path: P, options: &ReadOptions) -> Result<Self> {
        let threads = options.decompress_threads.max(1);
        let parts = open_parts(path.as_ref(), options, threads)?;
        Self::spawn(
            parts.decomp,
            parts.buf,
            parts.dst_len,
            0,
            parts.max_line_len,
            parts.fixed,
            threads,
        )
    }

    /// Promotes a synchronous [`TextReader`] into a stream, moving its file,
    /// buffer, decoder state, and any bytes not yet handed to the caller.
    ///
    /// The reader must be open and carry no stored EOF or failure.
    pub fn from_reader(reader: TextReader, options: &ReadOptions) -> Result<Self> {
        if !matches!(reader.state, StreamState::Active) {
            return Err(BiotextError::ImproperCall(
                "TextStream::from_reader needs a reader with no stored EOF or failure",
            ));
        }
        options.validate()?;
        let threads = options.decompress_threads.max(1);
        let TextReader {
            mut decomp,
            mut dst,
            mut dst_len,
            consume_iter,
            mut consume_stop,
            fixed,
            ..
        } = reader;
        // Drop already-consumed bytes so the stream starts at the buffer
        // front.
        if consume_iter > 0 {
            dst.copy_within(consume_iter..dst_len, 0);
            dst_len -= consume_iter;
            consume_stop -= consume_iter;
        }
        decomp.set_threads(threads);
        if !fixed {
            let want = options.initial_capacity().max(dst.len());
            if want > dst.len() {
                dst.try_reserve_exact(want - dst.len())
                    .map_err(|_| BiotextError::Nomem("destination buffer growth failed".into()))?;
                dst.resize(want, 0);
            }
        }
        Self::spawn(
            decomp,
            dst,
            dst_len,
            consume_stop,
            options.max_line_len,
            fixed,
            threads,
        )
    }

    fn spawn(
        decomp: Decompressor,
        buf: Vec<u8>,
        dst_len: usize,
        consume_stop: usize,
        max_line_len: usize,
        fixed: bool,
        threads: usize,
    ) -> Result<Self> {
        let shared = Arc::new(Shared {
            buf: SharedBuffer::new(buf, fixed),
            sync: StreamSync::new(consume_stop),
        });
        let worker = Arc::clone(&shared);
        let init = ReaderInit {
            cur_block_start: consume_stop,
            read_head: dst_len,
            max_line_len,
            threads,
        };
        let handle = std::thread::Builder::new()
            .name("biotext-reader".into())
            .spawn(move || reader_main(&worker, decomp, init))
            .map_err(|e| BiotextError::ThreadCreate(e.to_string()))?;
        Ok(TextStream {
            shared,
            handle: Some(handle),
            consume_iter: 0,
            consume_stop,
            state: StreamState::Active,
            max_line_len,
        })
    }

    /// Consumer-side view of published bytes.
    fn region_slice(&self, start: usize, end: usize) -> &[u8] {
        // Safety: [start, end) lies within the region published to this
        // consumer; the producer does not touch it until consume_tail moves
        // past it, which only happens in advance().
        unsafe { self.shared.buf.region(start..end) }
    }

    /// Makes the next region available, returning false at end of input.
    fn advance(&mut self) -> Result<bool> {
        match &self.state {
            StreamState::Failed(e) => return Err(e.clone()),
            StreamState::Eof => return Ok(false),
            StreamState::Active => {}
        }
        let sync = &self.shared.sync;
        let mut g = sync.lock();
        loop {
            if let StreamState::Failed(e) = &g.state {
                let e = e.clone();
                self.state = StreamState::Failed(e.clone());
                return Err(e);
            }
            if g.cur_circular_end == Some(self.consume_iter) {
                // End of the wrapped region: continue at the buffer front.
                self.consume_iter = 0;
                g.cur_circular_end = None;
                if self.consume_iter != g.available_end {
                    sync.signal_consumer(&mut g);
                }
            }
            if g.dst_reallocated {
                self.consume_iter = 0;
                g.dst_reallocated = false;
            }
            g.consume_tail = self.consume_iter;
            if self.consume_iter != g.available_end || g.cur_circular_end.is_some() {
                self.consume_stop = match g.cur_circular_end {
                    Some(end) => end,
                    None => g.available_end,
                };
                return Ok(true);
            }
            if g.state.is_eof() {
                self.state = StreamState::Eof;
                return Ok(false);
            }
            sync.signal_consumer(&mut g);
            g = sync.wait_reader(g);
            // The producer may have rebased the cursor while wrapping.
            self.consume_iter = g.consume_tail;
        }
    }

    /// Next line without its terminating newline; `Ok(None)` at end of input.
    pub fn next_line(&mut self) -> Result<Option<&[u8]>> {
        if self.consume_iter == self.consume_stop && !self.advance()? {
            return Ok(None);
        }
        let start = self.consume_iter;
        let region = self.region_slice(start, self.consume_stop);
        let end = match memchr(b'\n', region) {
            Some(p) => start + p,
            None => self.consume_stop,
        };
        self.consume_iter = (end + 1).min(self.consume_stop);
        Ok(Some(self.region_slice(start, end)))
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
            let region = self.region_slice(self.consume_iter, self.consume_stop);
            let start = self.consume_iter + scan::first_non_hspace(region);
            let rest = self.region_slice(start, self.consume_stop);
            let end = match memchr(b'\n', rest) {
                Some(p) => start + p,
                None => self.consume_stop,
            };
            self.consume_iter = (end + 1).min(self.consume_stop);
            if start < self.consume_stop && !scan::is_eoln(self.region_slice(start, start + 1)[0])
            {
                break (start, end);
            }
        };
        Ok(Some(self.region_slice(start, end)))
    }

    /// Skips past `n` newlines. Reaching end of input first is
    /// [`BiotextError::UnexpectedEof`].
    pub fn skip_lines(&mut self, mut n: u64) -> Result<()> {
        while n > 0 {
            if self.consume_iter == self.consume_stop && !self.advance()? {
                return Err(BiotextError::UnexpectedEof);
            }
            let region = self.region_slice(self.consume_iter, self.consume_stop);
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
        Ok(Some(self.region_slice(self.consume_iter, self.consume_stop)))
    }

    /// Reopens the current file at position zero. Clears a stored EOF; a
    /// stored failure is returned instead.
    pub fn rewind(&mut self) -> Result<()> {
        self.request_retarget(None)
    }

    /// Switches to reading `path`. The reader thread resets decoder state in
    /// place when the format matches and rebuilds it otherwise. Clears a
    /// stored EOF; a stored failure is returned instead.
    pub fn retarget<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.request_retarget(Some(path.as_ref().to_path_buf()))
    }

    fn request_retarget(&mut self, path: Option<PathBuf>) -> Result<()> {
        let sync = &self.shared.sync;
        let mut g = sync.lock();
        if let StreamState::Failed(e) = &g.state {
            let e = e.clone();
            drop(g);
            self.state = StreamState::Failed(e.clone());
            return Err(e);
        }
        g.state = StreamState::Active;
        g.consume_tail = 0;
        g.cur_circular_end = None;
        g.available_end = 0;
        g.dst_reallocated = false;
        g.interrupt = Interrupt::Retarget;
        g.new_path = path;
        sync.signal_consumer(&mut g);
        drop(g);
        self.consume_iter = 0;
        self.consume_stop = 0;
        self.state = StreamState::Active;
        Ok(())
    }

    /// Configured line-length bound (zero in token mode).
    pub fn max_line_len(&self) -> usize {
        self.max_line_len
    }

    /// Shuts the stream down, joining the reader thread and releasing the
    /// file, decoder state, and buffer. Equivalent to dropping the stream.
    pub fn close(self) {
        drop(self);
    }

    fn shutdown(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let sync = &self.shared.sync;
        let mut g = sync.lock();
        g.interrupt = Interrupt::Shutdown;
        sync.signal_consumer(&mut g);
        drop(g);
        let _ = handle.join();
    }
}

impl Drop for TextStream {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Reader-thread entry point: fill, publish, and park until interrupted.
fn reader_main(shared: &Shared, mut decomp: Decompressor, init: ReaderInit) {
    let sync = &shared.sync;
    let buf = &shared.buf;
    let is_token = init.max_line_len == 0;
    let bound = if is_token { MAX_TOKEN_LEN } else { init.max_line_len };
    // Safety (here and below): the producer owns everything outside the
    // published region; index publication happens only under the sync mutex.
    let mut capacity = unsafe { buf.capacity() };
    let mut cur_block_start = init.cur_block_start;
    let mut read_head = init.read_head;
    let mut read_stop = capacity;
    let mut pending: Option<Parked> = None;

    'session: loop {
        let parked = match pending.take() {
            Some(p) => p,
            None => 'fill: loop {
                let mut read_attempt = read_stop - read_head;
                if read_attempt > DECOMPRESS_CHUNK {
                    read_attempt = DECOMPRESS_CHUNK;
                }
                let mut need_space = read_attempt == 0;
                if !need_space {
                    let window = unsafe { buf.window(read_head..read_head + read_attempt) };
                    let fill = match decomp.fill(window) {
                        Ok(f) => f,
                        Err(e) => break 'fill Parked::Fail(e),
                    };
                    let cur_read_end = read_head + fill.len;
                    if fill.eof && fill.len < read_attempt {
                        let mut final_read_head = cur_read_end;
                        if cur_block_start != final_read_head {
                            let last = unsafe { buf.region(final_read_head - 1..final_read_head) };
                            if last[0] != b'\n' {
                                // Synthetic newline so every region ends on one.
                                (unsafe { buf.window(final_read_head..final_read_head + 1) })[0] =
                                    b'\n';
                                final_read_head += 1;
                            }
                        }
                        let tail = unsafe { buf.region(cur_block_start..final_read_head) };
                        if scan::exceeds_length_bound(
                            tail,
                            read_head - cur_block_start,
                            init.max_line_len,
                        ) {
                            break 'fill Parked::Fail(long_input_error(is_token));
                        }
                        read_head = final_read_head;
                        break 'fill Parked::Eof;
                    }
                    if fill.len > 0 {
                        let loaded = unsafe { buf.region(read_head..cur_read_end) };
                        let boundary = if is_token {
                            scan::last_token_boundary(loaded)
                        } else {
                            scan::last_line_boundary(loaded)
                        };
                        if let Some(rel) = boundary {
                            let next_available_end = read_head + rel;
                            let block =
                                unsafe { buf.region(cur_block_start..next_available_end) };
                            if scan::exceeds_length_bound(
                                block,
                                read_head - cur_block_start,
                                init.max_line_len,
                            ) {
                                break 'fill Parked::Fail(long_input_error(is_token));
                            }
                            let mut g = sync.lock();
                            if g.interrupt != Interrupt::None {
                                break 'fill Parked::Interrupted;
                            }
                            let tail = g.consume_tail;
                            let all_later_consumed = tail <= cur_block_start;
                            let return_to_start =
                                all_later_consumed && tail >= DECOMPRESS_CHUNK;
                            if return_to_start {
                                // Publish the wrap; the forward region restarts
                                // at the buffer front.
                                g.cur_circular_end = Some(next_available_end);
                                g.available_end = 0;
                            } else {
                                g.available_end = next_available_end;
                            }
                            // Drain the sticky flag inside the lock so the next
                            // producer wait cannot ride an old signal.
                            g.consumer_progress = false;
                            sync.signal_reader();
                            drop(g);
                            if return_to_start {
                                let trailing = cur_read_end - next_available_end;
                                unsafe {
                                    buf.move_within(next_available_end..cur_read_end, 0)
                                };
                                cur_block_start = 0;
                                read_head = trailing;
                                read_stop = scan::round_down_cacheline(tail);
                                continue 'fill;
                            }
                            if all_later_consumed {
                                read_stop = capacity;
                            } else {
                                read_stop = scan::round_down_cacheline(tail);
                            }
                            cur_block_start = next_available_end;
                        }
                        read_head = cur_read_end;
                        continue 'fill;
                    }
                    // No bytes and no EOF: the decoder needs a wider window.
                    need_space = true;
                }
                if need_space {
                    let memmove_required = read_stop == capacity;
                    if cur_block_start == 0 && memmove_required {
                        // The whole buffer is one unterminated line.
                        if buf.is_fixed() || capacity >= bound {
                            break 'fill Parked::Fail(long_input_error(is_token));
                        }
                        let Some(next) = next_buffer_capacity(capacity, bound) else {
                            break 'fill Parked::Fail(BiotextError::Nomem(
                                "buffer growth exceeds the address-space bound".into(),
                            ));
                        };
                        if unsafe { buf.grow_to(next) }.is_err() {
                            break 'fill Parked::Fail(BiotextError::Nomem(
                                "buffer growth failed".into(),
                            ));
                        }
                        {
                            let mut g = sync.lock();
                            g.consume_tail = 0;
                            g.available_end = 0;
                            g.dst_reallocated = true;
                        }
                        // read_head is unchanged: growth preserves the
                        // in-flight line in place.
                        capacity = next;
                        read_stop = next;
                        cur_block_start = 0;
                        continue 'fill;
                    }
                    let mut g = sync.lock();
                    if memmove_required {
                        // Wait until the consumer releases everything up to the
                        // unfinished line, then reclaim the whole buffer.
                        loop {
                            if g.interrupt != Interrupt::None {
                                break 'fill Parked::Interrupted;
                            }
                            if g.consume_tail == cur_block_start {
                                g.consume_tail = 0;
                                g.available_end = 0;
                                break;
                            }
                            g = sync.wait_consumer(g);
                        }
                    } else {
                        // Wait until all bytes in front of the fence are
                        // consumed. The signal that parked us may predate this
                        // wait, so wait first and re-check.
                        loop {
                            g = sync.wait_consumer(g);
                            if g.interrupt != Interrupt::None {
                                break 'fill Parked::Interrupted;
                            }
                            if g.consume_tail <= cur_block_start {
                                break;
                            }
                        }
                    }
                    drop(g);
                    if memmove_required {
                        let len = read_head - cur_block_start;
                        unsafe { buf.move_within(cur_block_start..read_head, 0) };
                        cur_block_start = 0;
                        read_head = len;
                    } else {
                        read_stop = capacity;
                    }
                    continue 'fill;
                }
            },
        };

        // Publish the terminal state and wait for an interrupt that is at
        // least as strong as what this state can absorb.
        let mut g = sync.lock();
        let min_interrupt = match parked {
            Parked::Eof => {
                g.state = StreamState::Eof;
                if g.interrupt < Interrupt::Retarget {
                    g.available_end = read_head;
                    sync.signal_reader();
                }
                Interrupt::Retarget
            }
            Parked::Fail(e) => {
                log::error!("reader thread parked on failure: {e}");
                g.state = StreamState::Failed(e);
                if g.interrupt < Interrupt::Shutdown {
                    sync.signal_reader();
                }
                Interrupt::Shutdown
            }
            Parked::Interrupted => Interrupt::Retarget,
        };
        while g.interrupt < min_interrupt {
            g = sync.wait_consumer(g);
        }
        let interrupt = g.interrupt;
        let mut target = None;
        if interrupt == Interrupt::Retarget {
            target = g.new_path.take();
            g.interrupt = Interrupt::None;
            g.state = StreamState::Active;
        }
        drop(g);
        if interrupt == Interrupt::Shutdown {
            // Resources (file, decoder, buffer reference) drop here; the
            // consumer's close path joins us.
            return;
        }

        read_head = 0;
        match target {
            None => {
                if let Err(e) = decomp.rewind() {
                    pending = Some(Parked::Fail(e));
                    continue 'session;
                }
            }
            Some(path) => match open_target(&path) {
                Err(e) => {
                    pending = Some(Parked::Fail(e));
                    continue 'session;
                }
                Ok((file, format, prefix, n)) => {
                    if let Err(e) = decomp.retarget(file, format, &prefix[..n], init.threads) {
                        pending = Some(Parked::Fail(e));
                        continue 'session;
                    }
                    if format == FileFormat::Plain {
                        // Sniffed bytes are data; they seed the buffer front.
                        unsafe { buf.window(0..n) }.copy_from_slice(&prefix[..n]);
                        read_head = n;
                    }
                }
            },
        }
        cur_block_start = 0;
        read_stop = capacity;
    }
}
