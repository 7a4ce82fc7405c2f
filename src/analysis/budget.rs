use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::analysis::AnalysisAbort;

/// Cost limits applied to equation generation and solve requests.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AnalysisConfig {
    /// Interpreter steps allowed for one equation.
    pub step_limit: usize,
    /// Keys allowed across all components of one pending result.
    pub component_limit: usize,
    /// Distinct keys one solve request may pull in.
    pub key_limit: usize,
    /// Steps between two cancellation checks.
    pub cancel_check_interval: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            step_limit: 30_000,
            component_limit: 30_000,
            key_limit: 100_000,
            cancel_check_interval: 1_024,
        }
    }
}

/// Cooperative cancellation probe polled by long-running analyses.
pub trait Cancellation: Send + Sync {
    fn is_cancelled(&self) -> bool;
}

/// Probe that never fires.
#[derive(Clone, Copy, Debug, Default)]
pub struct NeverCancel;

impl Cancellation for NeverCancel {
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Shared flag a host can set to stop in-flight analyses.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }
}

impl Cancellation for CancellationToken {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// Per-equation step counter.
pub struct Budget<'a> {
    config: &'a AnalysisConfig,
    cancellation: &'a dyn Cancellation,
    steps: usize,
}

impl<'a> Budget<'a> {
    pub fn new(config: &'a AnalysisConfig, cancellation: &'a dyn Cancellation) -> Self {
        Self {
            config,
            cancellation,
            steps: 0,
        }
    }

    /// Accounts for one interpreter step.
    pub fn step(&mut self) -> Result<(), AnalysisAbort> {
        self.steps += 1;
        if self.steps > self.config.step_limit {
            return Err(AnalysisAbort::StepBudget);
        }
        let interval = self.config.cancel_check_interval.max(1);
        if self.steps % interval == 0 && self.cancellation.is_cancelled() {
            return Err(AnalysisAbort::Cancelled);
        }
        Ok(())
    }

    /// Rejects pending results whose components reference too many keys.
    pub fn check_size(&self, id_count: usize) -> Result<(), AnalysisAbort> {
        if id_count > self.config.component_limit {
            return Err(AnalysisAbort::SizeBudget);
        }
        Ok(())
    }

    pub fn steps(&self) -> usize {
        self.steps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_budget_overrun_aborts() {
        let config = AnalysisConfig {
            step_limit: 3,
            ..AnalysisConfig::default()
        };
        let mut budget = Budget::new(&config, &NeverCancel);
        for _ in 0..3 {
            budget.step().expect("within budget");
        }
        assert_eq!(budget.step(), Err(AnalysisAbort::StepBudget));
    }

    #[test]
    fn cancellation_is_polled_on_interval() {
        let config = AnalysisConfig {
            cancel_check_interval: 4,
            ..AnalysisConfig::default()
        };
        let token = CancellationToken::new();
        token.cancel();
        let mut budget = Budget::new(&config, &token);
        for _ in 0..3 {
            budget.step().expect("not yet polled");
        }
        assert_eq!(budget.step(), Err(AnalysisAbort::Cancelled));
    }

    #[test]
    fn oversized_components_are_rejected() {
        let config = AnalysisConfig {
            component_limit: 2,
            ..AnalysisConfig::default()
        };
        let budget = Budget::new(&config, &NeverCancel);
        assert!(budget.check_size(2).is_ok());
        assert_eq!(budget.check_size(3), Err(AnalysisAbort::SizeBudget));
    }
}
