//! Progress-callback trait for per-slide flashcard generation events.
//!
//! Pass an [`Arc<dyn GenerationProgressCallback>`] to
//! [`crate::generate::generate_cards`] to receive events as each slide is
//! summarised. The CLI forwards them to an `indicatif` progress bar; the
//! HTTP service uses [`NoopProgressCallback`].
//!
//! # Example
//!
//! ```rust
//! use lecture2anki::GenerationProgressCallback;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct CountingCallback {
//!     completed: AtomicUsize,
//! }
//!
//! impl GenerationProgressCallback for CountingCallback {
//!     fn on_slide_complete(&self, slide_number: usize, total_slides: usize) {
//!         let done = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("slide {slide_number}: {done}/{total_slides} cards");
//!     }
//! }
//! ```

use std::sync::Arc;

/// Called by the generation stage as it processes each slide.
///
/// Slides are summarised concurrently, so `on_slide_start`,
/// `on_slide_complete` and `on_slide_error` may be called from different
/// tasks at once. All methods default to no-ops.
pub trait GenerationProgressCallback: Send + Sync {
    /// Called once before any LLM request is sent.
    fn on_generation_start(&self, total_slides: usize) {
        let _ = total_slides;
    }

    /// Called just before the LLM request for a slide.
    ///
    /// `slide_number` is the slide's page number in the source PDF, not its
    /// position in the batch.
    fn on_slide_start(&self, slide_number: usize, total_slides: usize) {
        let _ = (slide_number, total_slides);
    }

    /// Called when a slide produced a card.
    fn on_slide_complete(&self, slide_number: usize, total_slides: usize) {
        let _ = (slide_number, total_slides);
    }

    /// Called when a slide's LLM call failed or timed out. Generation stops
    /// after the first failure.
    fn on_slide_error(&self, slide_number: usize, total_slides: usize, error: &str) {
        let _ = (slide_number, total_slides, error);
    }

    /// Called once after generation finished or stopped.
    ///
    /// * `success_count`: cards produced before completion or the first failure
    fn on_generation_complete(&self, total_slides: usize, success_count: usize) {
        let _ = (total_slides, success_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl GenerationProgressCallback for NoopProgressCallback {}

/// Shared handle to a progress callback.
pub type ProgressCallback = Arc<dyn GenerationProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingCallback {
        starts: AtomicUsize,
        completes: AtomicUsize,
        errors: AtomicUsize,
        started_total: AtomicUsize,
        completed_total: AtomicUsize,
    }

    impl GenerationProgressCallback for TrackingCallback {
        fn on_generation_start(&self, total_slides: usize) {
            self.started_total.store(total_slides, Ordering::SeqCst);
        }

        fn on_slide_start(&self, _slide_number: usize, _total_slides: usize) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_slide_complete(&self, _slide_number: usize, _total_slides: usize) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_slide_error(&self, _slide_number: usize, _total_slides: usize, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_generation_complete(&self, _total_slides: usize, success_count: usize) {
            self.completed_total.store(success_count, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_generation_start(5);
        cb.on_slide_start(1, 5);
        cb.on_slide_complete(1, 5);
        cb.on_slide_error(2, 5, "timeout");
        cb.on_generation_complete(5, 1);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();

        tracker.on_generation_start(3);
        tracker.on_slide_start(2, 3);
        tracker.on_slide_complete(2, 3);
        tracker.on_slide_start(5, 3);
        tracker.on_slide_error(5, 3, "LLM timeout");
        tracker.on_generation_complete(3, 1);

        assert_eq!(tracker.started_total.load(Ordering::SeqCst), 3);
        assert_eq!(tracker.starts.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.completed_total.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_generation_start(10);
        cb.on_slide_start(1, 10);
    }
}
