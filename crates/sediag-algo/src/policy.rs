//! Tunable thresholds and budgets for the diagnosis controller.
//!
//! Nothing in the controller hard-codes a cutoff; every threshold lives
//! here so runs can be tuned or driven by synthetic test scenarios.

use serde::{Deserialize, Serialize};

/// Configuration for one diagnosis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosisPolicy {
    /// Largest-normalized-residual cutoff below which the hypothesis is
    /// declared clean (the classical bad-data detection bound).
    pub lnr_threshold: f64,
    /// Decay-index cutoff: above it the anomaly is treated as an isolated
    /// bad datum, below it as a topology error. The index is the fitted
    /// per-rank decay exponent, on a scale where residuals halving at every
    /// rank score exactly 1.0 and a flat profile scores 0; the default of
    /// 1.2 demands a somewhat sharper fall-off than a clean halving.
    pub decay_index_threshold: f64,
    /// Secondary per-measurement bound applied to the neighborhood of a fix
    /// during acceptance (the local check).
    pub local_residual_threshold: f64,
    /// Required objective drop for a measurement fix, as a multiple of the
    /// removed measurement's squared normalized residual.
    pub expected_drop_factor: f64,
    /// Branch-status changes the oracle may make in one topology trial.
    pub max_topology_changes: usize,
    /// Branch-status changes allowed during the initial screening solve.
    pub screen_topology_changes: usize,
    /// Upper bound on disjoint suspect regions kept after screening.
    pub max_disjoint_regions: usize,
    /// How many neighborhood residuals feed the decay-index fit.
    pub decay_top_k: usize,
    /// Residuals below this value are ignored by the decay-index fit.
    pub decay_noise_floor: f64,
    /// Wall-clock budget for one measurement-fix trial solve.
    pub measurement_trial_seconds: u64,
    /// Wall-clock budget for one topology trial or screening solve.
    pub topology_trial_seconds: u64,
    /// Run a single wide heuristic screening solve before the main loop.
    pub screen_first: bool,
    /// Explicit iteration bound; when unset the bound is derived from the
    /// number of disjoint regions found by screening.
    pub max_iterations: Option<usize>,
}

impl Default for DiagnosisPolicy {
    fn default() -> Self {
        Self {
            lnr_threshold: 3.0,
            decay_index_threshold: 1.2,
            local_residual_threshold: 10.0,
            expected_drop_factor: 1.0,
            max_topology_changes: 2,
            screen_topology_changes: 10,
            max_disjoint_regions: 5,
            decay_top_k: 5,
            decay_noise_floor: 0.0,
            measurement_trial_seconds: 30,
            topology_trial_seconds: 60,
            screen_first: false,
            max_iterations: None,
        }
    }
}

impl DiagnosisPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lnr_threshold(mut self, threshold: f64) -> Self {
        self.lnr_threshold = threshold;
        self
    }

    pub fn with_decay_index_threshold(mut self, threshold: f64) -> Self {
        self.decay_index_threshold = threshold;
        self
    }

    pub fn with_local_residual_threshold(mut self, threshold: f64) -> Self {
        self.local_residual_threshold = threshold;
        self
    }

    pub fn with_expected_drop_factor(mut self, factor: f64) -> Self {
        self.expected_drop_factor = factor;
        self
    }

    pub fn with_max_topology_changes(mut self, changes: usize) -> Self {
        self.max_topology_changes = changes;
        self
    }

    pub fn with_screen_first(mut self, screen: bool) -> Self {
        self.screen_first = screen;
        self
    }

    pub fn with_max_iterations(mut self, iterations: usize) -> Self {
        self.max_iterations = Some(iterations);
        self
    }

    /// Iteration bound for the main loop: an explicit setting wins; without
    /// one, scale with the disjoint regions found by screening, or fall
    /// back to a flat bound of 8 when no region information exists.
    pub fn effective_max_iterations(&self, region_count: usize) -> usize {
        match self.max_iterations {
            Some(n) => n,
            None if region_count > 0 => 2 + 2 * region_count,
            None => 8,
        }
    }
}
