//! biotext: streaming line-oriented text input for bioinformatics pipelines
//!
//! # Overview
//!
//! biotext feeds line-by-line parsers from text files that may be stored
//! uncompressed, gzip-compressed, BGZF-compressed (blocked gzip, as written
//! by bgzip), or Zstandard-compressed. The caller always sees a contiguous
//! in-memory region of decompressed bytes ending on a newline boundary, so
//! lines are scanned in place and never copied out of the buffer.
//!
//! ## Key features
//!
//! - **Overlapped I/O**: [`TextStream`] decompresses on a background thread
//!   while the caller parses, coordinated through one shared buffer
//! - **Format detection**: gzip, BGZF, and Zstandard are recognized by magic
//!   bytes; everything else streams through unchanged
//! - **Bounded lines**: a configurable per-line byte limit turns pathological
//!   input into an error instead of unbounded memory growth
//! - **Parallel BGZF**: independent BGZF blocks decode in rayon batches
//!
//! ## Quick start
//!
//! ```no_run
//! use biotext::TextStream;
//!
//! # fn main() -> biotext::Result<()> {
//! let mut stream = TextStream::open("variants.vcf.gz")?;
//! while let Some(line) = stream.next_line()? {
//!     // `line` borrows the shared buffer; parse it in place.
//!     let _ = line;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Module organization
//!
//! - [`TextStream`]: asynchronous reader (background decompression thread)
//! - [`TextReader`]: synchronous reader on the calling thread, promotable
//!   into a [`TextStream`]
//! - [`detect_file_format`]: magic-byte classification
//! - [`error`]: error taxonomy

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

mod buffer;
mod decompress;
pub mod error;
mod format;
mod options;
mod reader;
mod scan;
mod stream;
mod sync;

pub use error::{BiotextError, Result};
pub use format::{detect_file_format, FileFormat};
pub use options::ReadOptions;
pub use reader::TextReader;
pub use stream::TextStream;

/// Unit of forward progress for disk reads and decompression (1 MiB).
///
/// Line-length bounds must be at least this large, and buffer capacities at
/// least twice this large.
pub const DECOMPRESS_CHUNK: usize = 1 << 20;

/// Fixed length bound for a single token in token mode
/// (`max_line_len == 0`).
pub const MAX_TOKEN_LEN: usize = DECOMPRESS_CHUNK;

/// Default per-line byte limit, effectively unbounded for real-world text.
pub const DEFAULT_MAX_LINE_LEN: usize = 0x7FE0_0000;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
