//! Progress-callback trait for pipeline events.
//!
//! Inject an [`Arc<dyn AnalysisProgressCallback>`] via
//! [`crate::config::AnalysisConfigBuilder::progress_callback`] to receive
//! events as the pipeline moves through its states.
//!
//! Callers can forward events to a channel, a log, or a terminal spinner
//! without the library knowing how the host application communicates.
//!
//! # Example
//!
//! ```rust
//! use edgequake_nutrition::{AnalysisConfig, AnalysisProgressCallback, PipelineState};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     transitions: AtomicUsize,
//! }
//!
//! impl AnalysisProgressCallback for CountingCallback {
//!     fn on_state_change(&self, _state: &PipelineState) {
//!         self.transitions.fetch_add(1, Ordering::SeqCst);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { transitions: AtomicUsize::new(0) });
//!
//! let config = AnalysisConfig::builder()
//!     .progress_callback(counter as Arc<dyn AnalysisProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::analyze::PipelineState;
use crate::output::ExtractionAttempt;
use crate::pipeline::quality::EscalationReason;
use std::sync::Arc;

/// Called by the pipeline as it processes a document.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Implementations must be `Send + Sync`; the pipeline
/// may run on any Tokio worker thread.
pub trait AnalysisProgressCallback: Send + Sync {
    /// Called after each state transition, including the terminal one.
    fn on_state_change(&self, state: &PipelineState) {
        let _ = state;
    }

    /// Called once per extraction stage the cascade runs.
    fn on_stage_attempt(&self, attempt: &ExtractionAttempt) {
        let _ = attempt;
    }

    /// Called when the quality gate asks for visual re-analysis.
    fn on_escalation(&self, reason: &EscalationReason) {
        let _ = reason;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl AnalysisProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::AnalysisConfig`].
pub type ProgressCallback = Arc<dyn AnalysisProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::cascade::ExtractionStage;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        states: Mutex<Vec<PipelineState>>,
        attempts: Mutex<Vec<ExtractionStage>>,
    }

    impl AnalysisProgressCallback for Recorder {
        fn on_state_change(&self, state: &PipelineState) {
            self.states.lock().unwrap().push(*state);
        }

        fn on_stage_attempt(&self, attempt: &ExtractionAttempt) {
            self.attempts.lock().unwrap().push(attempt.stage);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_state_change(&PipelineState::Extracted);
        cb.on_escalation(&EscalationReason::AllNutrientsNull);
    }

    #[test]
    fn recorder_receives_events() {
        let rec = Recorder::default();
        rec.on_state_change(&PipelineState::Extracted);
        rec.on_stage_attempt(&ExtractionAttempt {
            stage: ExtractionStage::DigitalText,
            text: String::new(),
            char_count: 0,
            succeeded: false,
            error: None,
        });
        assert_eq!(rec.states.lock().unwrap().as_slice(), &[PipelineState::Extracted]);
        assert_eq!(
            rec.attempts.lock().unwrap().as_slice(),
            &[ExtractionStage::DigitalText]
        );
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_state_change(&PipelineState::Done);
    }
}
