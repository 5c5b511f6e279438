//! Library-level concurrency configuration.
//!
//! The codec concurrency target is the process-wide budget that parallel
//! chunked writes draw from: a worker pool sizes itself to
//! `min(parallel_workers, codec_concurrent_target())` and reserves the
//! budget with a [`ConcurrentTargetGuard`] while it runs, so stacked pools
//! (or a caller embedding the backend under its own pool) do not
//! oversubscribe the machine. The previous target is restored when the
//! guard drops.

use std::sync::atomic::{AtomicUsize, Ordering};

static CODEC_CONCURRENT_TARGET: AtomicUsize = AtomicUsize::new(0);

fn default_target() -> usize {
    std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
}

/// The current codec concurrency target.
///
/// Defaults to the machine's available parallelism; a
/// [`ConcurrentTargetGuard`] lowers it for its lifetime.
#[must_use]
pub fn codec_concurrent_target() -> usize {
    match CODEC_CONCURRENT_TARGET.load(Ordering::Relaxed) {
        0 => default_target(),
        target => target,
    }
}

/// Set the codec concurrency target, returning the previous raw value.
fn set_codec_concurrent_target(target: usize) -> usize {
    CODEC_CONCURRENT_TARGET.swap(target, Ordering::Relaxed)
}

/// Caps the codec concurrency target for the lifetime of the guard.
pub struct ConcurrentTargetGuard {
    previous: usize,
}

impl ConcurrentTargetGuard {
    /// Apply `target` until the guard drops.
    #[must_use]
    pub fn cap(target: usize) -> Self {
        Self {
            previous: set_codec_concurrent_target(target.max(1)),
        }
    }
}

impl Drop for ConcurrentTargetGuard {
    fn drop(&mut self) {
        set_codec_concurrent_target(self.previous);
    }
}
