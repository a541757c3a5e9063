//! Optional stage timing: a flat list of named spans with hierarchical labels.

use std::time::{Duration, Instant};

/// One finished stage, e.g. `render/trips/reconcile`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageTiming {
    pub label: String,
    pub elapsed: Duration,
}

/// Records elapsed time around pipeline stages.
///
/// A disabled timer still runs the wrapped stage but records nothing, so components can
/// take `&mut StageTimer` unconditionally.
#[derive(Debug, Default)]
pub struct StageTimer {
    enabled: bool,
    path: Vec<String>,
    timings: Vec<StageTiming>,
}

impl StageTimer {
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Run `f` as stage `name`, nested under any stage currently running.
    pub fn time<T>(&mut self, name: &str, f: impl FnOnce(&mut Self) -> T) -> T {
        if !self.enabled {
            return f(self);
        }
        self.path.push(name.to_string());
        let label = self.path.join("/");
        let span = tracing::debug_span!("stage", label = %label).entered();
        let start = Instant::now();
        let out = f(self);
        let elapsed = start.elapsed();
        drop(span);
        self.path.pop();
        tracing::debug!(stage = %label, elapsed_ms = elapsed.as_secs_f64() * 1000.0, "stage finished");
        self.timings.push(StageTiming { label, elapsed });
        out
    }

    /// Finished stages in completion order (children before their parent).
    pub fn timings(&self) -> &[StageTiming] {
        &self.timings
    }

    pub fn take(&mut self) -> Vec<StageTiming> {
        std::mem::take(&mut self.timings)
    }
}
