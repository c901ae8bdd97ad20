//! Generic sequential pipeline of named, progress-reporting stages.
//!
//! A pipeline runs its stages strictly in order, initialising the status
//! sink text from each stage's progress label, emitting an `OK` line on
//! success and stopping on the first fatal failure. Item-level failures
//! are reported and skipped over so the remaining stages still run;
//! cancellation aborts without error framing.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;

/// Output seam for pipeline display.
///
/// Spinner or terminal rendering lives behind this trait; the pipeline
/// itself only produces lines and transient status updates.
pub trait Reporter: Send + Sync {
    /// Emits a user-visible output line.
    fn line(&self, text: &str);
    /// Replaces the transient status text shown while a stage runs.
    fn status(&self, text: &str);
    /// Updates the displayed progress fraction, in `[0, 1]`.
    fn progress(&self, fraction: f32);
}

/// Write-only status handle passed to a running stage.
///
/// Cloning shares the underlying display slot; the last value set wins.
#[derive(Clone)]
pub struct StageStatus {
    reporter: Arc<dyn Reporter>,
    index: usize,
    count: usize,
    text: Arc<Mutex<String>>,
}

impl StageStatus {
    fn new(reporter: Arc<dyn Reporter>, index: usize, count: usize) -> Self {
        Self {
            reporter,
            index,
            count,
            text: Arc::new(Mutex::new(String::new())),
        }
    }

    /// Returns the `[i/N]` prefix, or an empty string for single-stage
    /// pipelines. The index is space-padded to the width of `N` so the
    /// prefixes line up across a long pipeline.
    #[must_use]
    pub fn index_text(&self) -> String {
        if self.index == 0 || self.count < 2 {
            return String::new();
        }
        let width = self.count.to_string().len();
        format!("[{index:>width$}/{count}]", index = self.index, count = self.count)
    }

    /// Replaces the status text.
    pub fn set_text(&self, text: &str) {
        if let Ok(mut current) = self.text.lock() {
            text.clone_into(&mut current);
        }
        self.reporter.status(&self.prefixed(text));
    }

    /// Updates the progress fraction; values outside `[0, 1]` are clamped.
    pub fn set_progress(&self, fraction: f32) {
        self.reporter.progress(fraction.clamp(0.0, 1.0));
    }

    /// Appends a remaining-duration hint to the current status text.
    ///
    /// A zero duration restores the plain text.
    pub fn set_remaining(&self, remaining: Duration) {
        let base = self
            .text
            .lock()
            .map(|text| text.clone())
            .unwrap_or_default();
        if remaining.is_zero() {
            self.reporter.status(&self.prefixed(&base));
        } else {
            let secs = remaining.as_secs();
            self.reporter
                .status(&self.prefixed(&format!("{base} ({secs}s left)")));
        }
    }

    fn prefixed(&self, text: &str) -> String {
        let index = self.index_text();
        if index.is_empty() {
            text.to_owned()
        } else {
            format!("{index} {text}")
        }
    }
}

/// How a stage ended, when it did not end cleanly.
///
/// The three variants replace an error-wrapping convention: `Fatal` stops
/// the pipeline, `Item` marks one unit of work as failed while letting the
/// pipeline continue, and `Cancelled` aborts without failure framing.
#[derive(Debug)]
pub enum StageFailure<E> {
    /// The pipeline must stop; no later stage runs.
    Fatal(E),
    /// Only this stage's unit of work failed; later stages still run.
    Item(E),
    /// Cooperative cancellation; the pipeline stops cleanly.
    Cancelled,
}

/// Future returned by a stage body.
pub type StageFuture<'a, E> =
    Pin<Box<dyn Future<Output = Result<(), StageFailure<E>>> + Send + 'a>>;

type StageFn<'s, C, E> =
    Box<dyn for<'a> FnMut(&'a mut C, &'a StageStatus) -> StageFuture<'a, E> + Send + 's>;

/// One named unit of sequential work.
///
/// Stages are immutable once built and owned exclusively by the pipeline
/// that executes them; a fresh list is built per invocation.
pub struct Stage<'s, C, E> {
    progress_label: String,
    success_label: String,
    failure_label: String,
    run: StageFn<'s, C, E>,
}

impl<'s, C, E> Stage<'s, C, E> {
    /// Creates a stage from its display labels and body.
    #[must_use]
    pub fn new<F>(
        progress_label: impl Into<String>,
        success_label: impl Into<String>,
        failure_label: impl Into<String>,
        run: F,
    ) -> Self
    where
        F: for<'a> FnMut(&'a mut C, &'a StageStatus) -> StageFuture<'a, E> + Send + 's,
    {
        Self {
            progress_label: progress_label.into(),
            success_label: success_label.into(),
            failure_label: failure_label.into(),
            run: Box::new(run),
        }
    }
}

/// Errors surfaced by [`execute`].
#[derive(Debug, Error)]
pub enum PipelineError<E>
where
    E: std::error::Error + 'static,
{
    /// A stage failed fatally; the failure label is attached for display.
    #[error("{label}: {source}")]
    Stage {
        /// The failing stage's failure label.
        label: String,
        /// Underlying cause reported by the stage.
        #[source]
        source: E,
    },
    /// The pipeline was cancelled, either by the operator or in-band.
    #[error("cancelled")]
    Cancelled,
}

/// Runs `stages` strictly in order against the shared `state`.
///
/// Stage *i + 1* starts only after stage *i* returns. The stage count used
/// for `[i/N]` display always equals the number of stages supplied. An
/// empty stage list completes immediately with no output.
///
/// # Errors
///
/// Returns [`PipelineError::Stage`] on the first fatal stage failure and
/// [`PipelineError::Cancelled`] when a stage reports cancellation. Item
/// failures are reported on the [`Reporter`] and do not stop execution.
pub async fn execute<C, E>(
    state: &mut C,
    reporter: &Arc<dyn Reporter>,
    stages: Vec<Stage<'_, C, E>>,
) -> Result<(), PipelineError<E>>
where
    E: std::error::Error + 'static,
{
    let count = stages.len();
    for (offset, mut stage) in stages.into_iter().enumerate() {
        let status = StageStatus::new(Arc::clone(reporter), offset + 1, count);
        status.set_text(&stage.progress_label);
        match (stage.run)(state, &status).await {
            Ok(()) => {
                reporter.line(&with_prefix(
                    "OK",
                    &status.index_text(),
                    &format!("{}.", stage.success_label),
                ));
            }
            Err(StageFailure::Item(cause)) => {
                reporter.line(&with_prefix(
                    "ERROR",
                    &status.index_text(),
                    &format!("{}: {cause}", stage.failure_label),
                ));
            }
            Err(StageFailure::Fatal(cause)) => {
                return Err(PipelineError::Stage {
                    label: stage.failure_label,
                    source: cause,
                });
            }
            Err(StageFailure::Cancelled) => return Err(PipelineError::Cancelled),
        }
    }
    Ok(())
}

fn with_prefix(marker: &str, index: &str, text: &str) -> String {
    if index.is_empty() {
        format!("{marker} {text}")
    } else {
        format!("{marker} {index} {text}")
    }
}

#[cfg(test)]
mod tests;
