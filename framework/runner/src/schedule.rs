use std::fmt::{Display, Formatter};
use std::time::Duration;

use crate::definition::InvalidDefinitionError;

/// Hold `target` concurrent callers, ramping linearly from the previous stage's target over
/// `duration`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage {
    pub duration: Duration,
    pub target: usize,
}

impl Stage {
    pub fn new(duration: Duration, target: usize) -> Self {
        Self { duration, target }
    }
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} -> {} callers", self.duration, self.target)
    }
}

/// The planned number of concurrent callers over the life of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RampSchedule {
    stages: Vec<Stage>,
}

impl RampSchedule {
    pub fn new(stages: Vec<Stage>) -> Result<Self, InvalidDefinitionError> {
        if stages.is_empty() {
            return Err(InvalidDefinitionError::new(
                "at least one load stage is required",
            ));
        }

        Ok(Self { stages })
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn total_duration(&self) -> Duration {
        self.stages.iter().map(|s| s.duration).sum()
    }

    pub fn max_target(&self) -> usize {
        self.stages.iter().map(|s| s.target).max().unwrap_or(0)
    }

    /// The stage that is active at `elapsed`, or `None` once the schedule is complete.
    pub fn stage_index_at(&self, elapsed: Duration) -> Option<usize> {
        let mut stage_end = Duration::ZERO;
        for (index, stage) in self.stages.iter().enumerate() {
            stage_end += stage.duration;
            if elapsed < stage_end {
                return Some(index);
            }
        }

        None
    }

    /// Number of callers that should be active at `elapsed`.
    ///
    /// The value is interpolated between the previous target (0 before the first stage) and the
    /// current stage's target and rounded down, so it never exceeds the ramp curve. A stage's
    /// target is where the ramp ends, not a cap: while ramping down, for example 10 to 5, the
    /// value stays above 5 until the stage ends. A zero-length stage jumps straight to its target.
    /// Ramping up from zero yields no callers until the curve reaches one, so a stage like
    /// `30s:1` from zero starts its caller only at the end of the stage.
    pub fn target_at(&self, elapsed: Duration) -> usize {
        let mut from = 0usize;
        let mut stage_start = Duration::ZERO;

        for stage in &self.stages {
            let stage_end = stage_start + stage.duration;
            if elapsed < stage_end {
                // Non-zero, otherwise `elapsed < stage_end` could not hold.
                let progress =
                    (elapsed - stage_start).as_secs_f64() / stage.duration.as_secs_f64();
                let value = from as f64 + (stage.target as f64 - from as f64) * progress;

                return (value.floor().max(0.0) as usize).min(from.max(stage.target));
            }

            from = stage.target;
            stage_start = stage_end;
        }

        0
    }
}
