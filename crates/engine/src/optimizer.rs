//! Adaptive parameter optimization
//!
//! Retunes the live strategy parameters from the recent closed-trade window.
//! The confidence threshold comes from a grid search, the position size from
//! drawdown and win rate, and the signal cooldown from average holding time.
//! Each step is gated on sample size and clamped; thin or degenerate data
//! leaves the parameters where they were.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use tracing::{debug, info};

use crate::config::MonitorConfig;
use crate::types::{
    OptimizationRecord, ParameterSet, PerformanceSnapshot, TradeRecord, MAX_POSITION_SIZE_FACTOR,
    MAX_SIGNAL_COOLDOWN_SECS, MIN_POSITION_SIZE_FACTOR, MIN_SIGNAL_COOLDOWN_SECS,
};

// ============================================================================
// Constants
// ============================================================================

/// Candidate thresholds, in hundredths: 0.50, 0.55, ..., 0.85
const CONFIDENCE_GRID_START: u32 = 50;
const CONFIDENCE_GRID_END: u32 = 85;
const CONFIDENCE_GRID_STEP: u32 = 5;

/// A threshold subset needs strictly more trades than this to be considered
pub const MIN_THRESHOLD_SAMPLE: usize = 10;

/// Position-size multiplier when drawdown breaches the ceiling
pub const RISK_OFF_MULTIPLIER: f64 = 0.8;
/// Position-size multiplier when performance is above target
pub const RISK_ON_MULTIPLIER: f64 = 1.2;

/// New cooldown as a fraction of the average trade duration
pub const COOLDOWN_DURATION_FRACTION: f64 = 0.2;

// ============================================================================
// Grid Generation
// ============================================================================

/// Generate the confidence threshold grid (8 candidates, ascending)
pub fn generate_confidence_grid() -> Vec<f64> {
    (CONFIDENCE_GRID_START..=CONFIDENCE_GRID_END)
        .step_by(CONFIDENCE_GRID_STEP as usize)
        .map(|hundredths| hundredths as f64 / 100.0)
        .collect()
}

// ============================================================================
// Individual steps
// ============================================================================

/// Outcome of the threshold sweep
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdSearch {
    pub threshold: f64,
    /// Win rate of the winning subset, `None` if nothing beat the baseline
    pub win_rate: Option<f64>,
    pub sample_size: usize,
}

/// Sweep the confidence grid and keep the candidate with the highest subset
/// win rate, provided it strictly beats `baseline_win_rate`. Equal win rates
/// resolve to the lower candidate; if nothing beats the baseline,
/// `current_threshold` is kept.
pub fn search_confidence_threshold(
    window: &[TradeRecord],
    current_threshold: f64,
    baseline_win_rate: f64,
) -> ThresholdSearch {
    let closed: Vec<&TradeRecord> = window.iter().filter(|t| t.pnl.is_some()).collect();

    let mut best = ThresholdSearch {
        threshold: current_threshold,
        win_rate: None,
        sample_size: 0,
    };
    let mut best_win_rate = baseline_win_rate;

    for candidate in generate_confidence_grid() {
        let subset: Vec<&&TradeRecord> = closed
            .iter()
            .filter(|t| t.signal_confidence >= candidate)
            .collect();

        if subset.len() <= MIN_THRESHOLD_SAMPLE {
            debug!(candidate, trades = subset.len(), "Threshold subset too small");
            continue;
        }

        let wins = subset.iter().filter(|t| t.is_win()).count();
        let win_rate = wins as f64 / subset.len() as f64;
        debug!(candidate, trades = subset.len(), win_rate, "Threshold candidate");

        if win_rate > best_win_rate {
            best_win_rate = win_rate;
            best = ThresholdSearch {
                threshold: candidate,
                win_rate: Some(win_rate),
                sample_size: subset.len(),
            };
        }
    }

    best
}

/// Risk-off when drawdown breaches the ceiling, risk-on when the win rate is
/// above target with drawdown under half the ceiling. Not clamped.
pub fn adjust_position_size(
    factor: f64,
    metrics: &PerformanceSnapshot,
    max_drawdown_threshold: f64,
    target_win_rate: f64,
) -> f64 {
    if metrics.max_drawdown > max_drawdown_threshold {
        factor * RISK_OFF_MULTIPLIER
    } else if metrics.win_rate > target_win_rate
        && metrics.max_drawdown < max_drawdown_threshold * 0.5
    {
        factor * RISK_ON_MULTIPLIER
    } else {
        factor
    }
}

/// 20% of the average trade duration, clamped to [30, 300] seconds.
/// Keeps `current` when the average is zero or undefined.
pub fn recalculate_cooldown(window: &[TradeRecord], current: f64) -> f64 {
    let durations: Vec<f64> = window.iter().filter_map(|t| t.duration_secs()).collect();
    if durations.is_empty() {
        return current;
    }

    let avg = durations.iter().sum::<f64>() / durations.len() as f64;
    if !(avg > 0.0) {
        return current;
    }

    (avg * COOLDOWN_DURATION_FRACTION).clamp(MIN_SIGNAL_COOLDOWN_SECS, MAX_SIGNAL_COOLDOWN_SECS)
}

// ============================================================================
// Optimizer
// ============================================================================

/// Owns the live parameter set and its history
#[derive(Debug, Clone)]
pub struct ParameterOptimizer {
    params: ParameterSet,
    history: VecDeque<OptimizationRecord>,
    history_capacity: usize,
    next_sequence: u64,
    max_drawdown_threshold: f64,
    target_win_rate: f64,
}

impl ParameterOptimizer {
    pub fn new(config: &MonitorConfig) -> Self {
        Self {
            params: ParameterSet::initial(config.confidence_threshold),
            history: VecDeque::new(),
            history_capacity: config.history_capacity.max(1),
            next_sequence: 0,
            max_drawdown_threshold: config.max_drawdown_threshold,
            target_win_rate: config.target_win_rate,
        }
    }

    pub fn params(&self) -> ParameterSet {
        self.params
    }

    /// History entries still held in memory, oldest first
    pub fn history(&self) -> impl Iterator<Item = &OptimizationRecord> {
        self.history.iter()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Drop held entries up to and including `sequence` (after they were
    /// persisted elsewhere)
    pub fn truncate_history_through(&mut self, sequence: u64) -> usize {
        let before = self.history.len();
        self.history.retain(|r| r.sequence > sequence);
        before - self.history.len()
    }

    /// Run one optimization cycle.
    ///
    /// `window` is the most recent `window_size` closed trades and `metrics`
    /// the snapshot computed from it. Below `window_size` closed trades in
    /// total, the current parameters are returned unchanged and nothing is
    /// recorded.
    pub fn optimize(
        &mut self,
        window: &[TradeRecord],
        total_closed: usize,
        window_size: usize,
        metrics: &PerformanceSnapshot,
        now: DateTime<Utc>,
    ) -> ParameterSet {
        if total_closed < window_size {
            info!(
                closed = total_closed,
                required = window_size,
                "Not enough closed trades for optimization"
            );
            return self.params;
        }

        let previous = self.params;

        let search =
            search_confidence_threshold(window, previous.confidence_threshold, metrics.win_rate);

        let factor = adjust_position_size(
            previous.position_size_factor,
            metrics,
            self.max_drawdown_threshold,
            self.target_win_rate,
        )
        .clamp(MIN_POSITION_SIZE_FACTOR, MAX_POSITION_SIZE_FACTOR);

        let cooldown = recalculate_cooldown(window, previous.signal_cooldown_seconds);

        self.params = ParameterSet {
            confidence_threshold: search.threshold,
            position_size_factor: factor,
            signal_cooldown_seconds: cooldown,
        };

        self.record(now, metrics);

        info!(
            confidence_threshold = self.params.confidence_threshold,
            threshold_win_rate = ?search.win_rate,
            position_size_factor = self.params.position_size_factor,
            signal_cooldown = self.params.signal_cooldown_seconds,
            win_rate = metrics.win_rate,
            max_drawdown = metrics.max_drawdown,
            "Parameters optimized"
        );

        self.params
    }

    fn record(&mut self, now: DateTime<Utc>, metrics: &PerformanceSnapshot) {
        if self.history.len() >= self.history_capacity {
            if let Some(evicted) = self.history.pop_front() {
                debug!(sequence = evicted.sequence, "History full, evicting oldest entry");
            }
        }

        self.history.push_back(OptimizationRecord {
            sequence: self.next_sequence,
            timestamp: now,
            params: self.params,
            metrics: metrics.summary(),
        });
        self.next_sequence += 1;
    }
}
