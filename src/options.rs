//! Open-time configuration

use crate::error::{BiotextError, Result};
use crate::{DECOMPRESS_CHUNK, DEFAULT_MAX_LINE_LEN};

/// Configuration accepted when opening a [`crate::TextReader`] or
/// [`crate::TextStream`].
///
/// # Example
///
/// ```no_run
/// use biotext::{ReadOptions, TextStream};
///
/// # fn main() -> biotext::Result<()> {
/// let opts = ReadOptions {
///     max_line_len: 16 * 1024 * 1024,
///     ..ReadOptions::default()
/// };
/// let stream = TextStream::open_with("calls.vcf.gz", &opts)?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ReadOptions {
    /// Upper bound on a single line in bytes, newline included. Must be at
    /// least [`DECOMPRESS_CHUNK`]. Zero selects token mode, where regions end
    /// at the last space, tab, or newline of a fill window and the fixed
    /// bound [`crate::MAX_TOKEN_LEN`] applies instead.
    pub max_line_len: usize,
    /// Initial buffer capacity; defaults to `2 * DECOMPRESS_CHUNK`. Must be
    /// at least that much.
    pub capacity: Option<usize>,
    /// Caps the buffer at its initial capacity. Growth then surfaces an
    /// error instead of reallocating; `capacity` must be explicit and
    /// `max_line_len + DECOMPRESS_CHUNK` must cover it.
    pub fixed_buffer: bool,
    /// BGZF block-decode parallelism for streams. Values above one decode
    /// batches of blocks on the rayon pool.
    pub decompress_threads: usize,
}

impl Default for ReadOptions {
    fn default() -> Self {
        ReadOptions {
            max_line_len: DEFAULT_MAX_LINE_LEN,
            capacity: None,
            fixed_buffer: false,
            decompress_threads: 1,
        }
    }
}

impl ReadOptions {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.max_line_len != 0 && self.max_line_len < DECOMPRESS_CHUNK {
            return Err(BiotextError::ImproperCall(
                "max_line_len must be at least the 1 MiB decompression chunk",
            ));
        }
        let capacity = self.capacity.unwrap_or(2 * DECOMPRESS_CHUNK);
        if capacity < 2 * DECOMPRESS_CHUNK {
            return Err(BiotextError::ImproperCall(
                "buffer capacity must be at least 2 MiB",
            ));
        }
        if self.fixed_buffer {
            if self.capacity.is_none() {
                return Err(BiotextError::ImproperCall(
                    "a fixed buffer needs an explicit capacity",
                ));
            }
            if self.max_line_len != 0 && self.max_line_len + DECOMPRESS_CHUNK < capacity {
                return Err(BiotextError::ImproperCall(
                    "fixed buffer capacity exceeds max_line_len plus one chunk",
                ));
            }
        }
        Ok(())
    }

    pub(crate) fn initial_capacity(&self) -> usize {
        self.capacity.unwrap_or(2 * DECOMPRESS_CHUNK)
    }
}

/// Next buffer capacity when growing toward `target_max + DECOMPRESS_CHUNK`:
/// double until the target is within reach, then land on it exactly. `None`
/// when the address space cannot hold the next step.
pub(crate) fn next_buffer_capacity(current: usize, target_max: usize) -> Option<usize> {
    let mut next = target_max + DECOMPRESS_CHUNK;
    if next / 2 > current {
        next = current * 2;
    }
    #[cfg(target_pointer_width = "32")]
    {
        if next >= 0x8000_0000 {
            return None;
        }
    }
    Some(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        ReadOptions::default().validate().unwrap();
    }

    #[test]
    fn small_max_line_len_rejected() {
        let opts = ReadOptions {
            max_line_len: 1024,
            ..ReadOptions::default()
        };
        assert!(matches!(
            opts.validate().unwrap_err(),
            BiotextError::ImproperCall(_)
        ));
    }

    #[test]
    fn fixed_buffer_constraints() {
        let opts = ReadOptions {
            fixed_buffer: true,
            ..ReadOptions::default()
        };
        assert!(opts.validate().is_err(), "capacity required");

        let opts = ReadOptions {
            max_line_len: 2 * DECOMPRESS_CHUNK,
            capacity: Some(4 * DECOMPRESS_CHUNK),
            fixed_buffer: true,
            ..ReadOptions::default()
        };
        assert!(opts.validate().is_err(), "capacity beyond max_line_len + chunk");

        let opts = ReadOptions {
            max_line_len: 3 * DECOMPRESS_CHUNK,
            capacity: Some(4 * DECOMPRESS_CHUNK),
            fixed_buffer: true,
            ..ReadOptions::default()
        };
        opts.validate().unwrap();
    }

    #[test]
    fn growth_doubles_then_lands_on_target() {
        let chunk = DECOMPRESS_CHUNK;
        // Far target: double.
        assert_eq!(next_buffer_capacity(2 * chunk, 64 * chunk), Some(4 * chunk));
        // Near target: land exactly.
        assert_eq!(next_buffer_capacity(32 * chunk, 48 * chunk), Some(49 * chunk));
    }
}
