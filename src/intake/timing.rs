//! Per-step wall-clock timing for the intake pipeline.

use std::fmt;
use std::time::{Duration, Instant};

use serde::Serialize;

/// Named pipeline steps, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    LoadProject,
    CreateContact,
    CheckEnrichment,
    FetchContent,
    ExtractContext,
    PersistContext,
    ResolveCaller,
    ProvisionAgent,
    Dispatch,
    MarkCalling,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::LoadProject => "load_project",
            Self::CreateContact => "create_contact",
            Self::CheckEnrichment => "check_enrichment",
            Self::FetchContent => "fetch_content",
            Self::ExtractContext => "extract_context",
            Self::PersistContext => "persist_context",
            Self::ResolveCaller => "resolve_caller",
            Self::ProvisionAgent => "provision_agent",
            Self::Dispatch => "dispatch",
            Self::MarkCalling => "mark_calling",
        };
        f.write_str(s)
    }
}

/// Recorded durations, in the order steps finished.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StepTimings {
    steps: Vec<(Step, Duration)>,
    #[serde(skip)]
    started: Option<Instant>,
}

impl StepTimings {
    pub fn start() -> Self {
        Self {
            steps: Vec::new(),
            started: Some(Instant::now()),
        }
    }

    pub fn record(&mut self, step: Step, elapsed: Duration) {
        self.steps.push((step, elapsed));
    }

    /// Time `fut` and record it under `step`, whatever its outcome.
    pub async fn time<F, T>(&mut self, step: Step, fut: F) -> T
    where
        F: Future<Output = T>,
    {
        let start = Instant::now();
        let out = fut.await;
        self.record(step, start.elapsed());
        out
    }

    pub fn get(&self, step: Step) -> Option<Duration> {
        self.steps
            .iter()
            .find(|(s, _)| *s == step)
            .map(|(_, d)| *d)
    }

    /// Steps that ran, in order.
    pub fn steps(&self) -> impl Iterator<Item = Step> + '_ {
        self.steps.iter().map(|(s, _)| *s)
    }

    /// Wall-clock since `start()`.
    pub fn total(&self) -> Duration {
        self.started
            .map(|s| s.elapsed())
            .unwrap_or_else(|| self.steps.iter().map(|(_, d)| *d).sum())
    }
}

/// `load_project=3ms create_contact=12ms ...`
impl fmt::Display for StepTimings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (step, d)) in self.steps.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{step}={}ms", d.as_millis())?;
        }
        Ok(())
    }
}
