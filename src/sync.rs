//! Producer/consumer handoff state
//!
//! All coordination between the reader thread and the consumer goes through
//! one mutex-guarded [`SyncState`] plus two condition variables. The consumer
//! side carries a sticky progress flag that is drained on wait, so spurious
//! wakeups and signals sent for unrelated reasons cannot confuse the
//! producer's wait loops.

use crate::error::BiotextError;
use std::path::PathBuf;
use std::sync::{Condvar, Mutex, MutexGuard};

/// Consumer-to-producer request, ordered by precedence.
///
/// A request never downgrades: shutdown overrides a pending retarget. The
/// producer compares against a minimum level before leaving a wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum Interrupt {
    /// No request pending
    None,
    /// Reopen at position zero (`new_path` empty) or switch files
    Retarget,
    /// Terminate the reader thread
    Shutdown,
}

/// Terminal status of the byte stream, held in one place.
///
/// `Eof` is cleared by rewind/retarget; `Failed` persists until close.
#[derive(Debug, Clone)]
pub(crate) enum StreamState {
    /// Producing normally
    Active,
    /// Producer exhausted the input
    Eof,
    /// Producer stopped on an error
    Failed(BiotextError),
}

impl StreamState {
    pub(crate) fn is_eof(&self) -> bool {
        matches!(self, StreamState::Eof)
    }
}

/// Fields shared between the reader thread and the consumer.
pub(crate) struct SyncState {
    /// Lowest unreleased byte index; everything before it may be overwritten.
    pub consume_tail: usize,
    /// End of the forward region published to the consumer.
    pub available_end: usize,
    /// End of the wrapped-around region logically preceding the forward one.
    pub cur_circular_end: Option<usize>,
    /// Terminal status, if any.
    pub state: StreamState,
    /// Set by the producer after buffer growth; the consumer rebases its
    /// cursor before touching the buffer again.
    pub dst_reallocated: bool,
    /// Pending consumer request.
    pub interrupt: Interrupt,
    /// Target of a pending retarget; empty means rewind.
    pub new_path: Option<PathBuf>,
    /// Sticky consumer-progress flag, drained by [`StreamSync::wait_consumer`].
    pub consumer_progress: bool,
}

/// The mutex and condition variables guarding [`SyncState`].
pub(crate) struct StreamSync {
    state: Mutex<SyncState>,
    reader_progress: Condvar,
    consumer_progress: Condvar,
}

impl StreamSync {
    /// Handoff state for a stream whose buffer already holds a published
    /// region ending at `available_end` (zero for a fresh open).
    pub(crate) fn new(available_end: usize) -> Self {
        StreamSync {
            state: Mutex::new(SyncState {
                consume_tail: 0,
                available_end,
                cur_circular_end: None,
                state: StreamState::Active,
                dst_reallocated: false,
                interrupt: Interrupt::None,
                new_path: None,
                consumer_progress: false,
            }),
            reader_progress: Condvar::new(),
            consumer_progress: Condvar::new(),
        }
    }

    /// Acquire the shared state. A poisoned mutex is not propagated; the
    /// state itself stays consistent because every update completes before
    /// the guard drops.
    pub(crate) fn lock(&self) -> MutexGuard<'_, SyncState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record consumer progress and wake the producer.
    pub(crate) fn signal_consumer(&self, state: &mut SyncState) {
        state.consumer_progress = true;
        self.consumer_progress.notify_one();
    }

    /// Block until the consumer signals progress, draining the sticky flag.
    pub(crate) fn wait_consumer<'a>(
        &self,
        mut guard: MutexGuard<'a, SyncState>,
    ) -> MutexGuard<'a, SyncState> {
        while !guard.consumer_progress {
            guard = self
                .consumer_progress
                .wait(guard)
                .unwrap_or_else(|e| e.into_inner());
        }
        guard.consumer_progress = false;
        guard
    }

    /// Wake the consumer after publishing bytes, EOF, or an error.
    pub(crate) fn signal_reader(&self) {
        self.reader_progress.notify_one();
    }

    /// Block until the producer signals progress. Callers re-check their
    /// predicate afterwards, so no sticky flag is needed on this side.
    pub(crate) fn wait_reader<'a>(
        &self,
        guard: MutexGuard<'a, SyncState>,
    ) -> MutexGuard<'a, SyncState> {
        self.reader_progress
            .wait(guard)
            .unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupt_precedence() {
        assert!(Interrupt::None < Interrupt::Retarget);
        assert!(Interrupt::Retarget < Interrupt::Shutdown);
    }

    #[test]
    fn sticky_flag_survives_early_signal() {
        // A signal sent before the producer waits must not be lost.
        let sync = StreamSync::new(0);
        {
            let mut g = sync.lock();
            sync.signal_consumer(&mut g);
        }
        let g = sync.lock();
        let g = sync.wait_consumer(g);
        assert!(!g.consumer_progress);
    }
}
