//! Trigger decision engine
//!
//! Applies the three-tier threshold rule (absolute ceiling, minimum floor
//! plus relative growth) to one sample of one resource kind, then gates a
//! positive decision through the per-kind cooldown. Each kind keeps its own
//! [`CheckState`] and never looks at another kind.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::TriggerConfig;
use crate::models::ResourceKind;

/// Why a kind matched its trigger rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerReason {
    /// `current >= abs`
    AbsoluteCeiling,
    /// `current >= min` and growth over the baseline `>= diff`
    RelativeGrowth,
}

impl fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerReason::AbsoluteCeiling => write!(f, "absolute ceiling exceeded"),
            TriggerReason::RelativeGrowth => write!(f, "relative growth exceeded floor + delta"),
        }
    }
}

/// Result of evaluating one sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Not enough ticks observed yet
    WarmingUp,
    /// Rule did not match
    Quiet,
    /// Count exceeds the configured cap; dumping is skipped
    OverMax,
    /// Rule matched but the previous dump is too recent
    CoolingDown(TriggerReason),
    /// Rule matched and the cooldown admitted a dump
    Fired(TriggerReason),
}

impl Outcome {
    pub fn fired(&self) -> bool {
        matches!(self, Outcome::Fired(_))
    }

    pub fn reason(&self) -> Option<TriggerReason> {
        match self {
            Outcome::Fired(reason) | Outcome::CoolingDown(reason) => Some(*reason),
            _ => None,
        }
    }
}

/// Outcome plus the baseline it was compared against
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    pub kind: ResourceKind,
    pub outcome: Outcome,
    pub previous: f64,
    pub current: f64,
}

/// Lifecycle phase of a kind, for status reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    WarmingUp,
    Armed,
    Cooling,
}

/// Mutable per-kind state owned by the sampling loop
#[derive(Debug, Clone, Default)]
pub struct CheckState {
    /// Last successfully sampled value
    pub previous: f64,
    /// When the last dump was admitted
    pub last_dump: Option<Instant>,
    /// Ticks observed, including ticks whose sample failed
    pub cycles: u64,
}

impl CheckState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a tick whose sample failed; the baseline is left alone
    pub fn skip_tick(&mut self) {
        self.cycles += 1;
    }

    /// Cooldown gate: admit a dump if none happened within `cooldown`
    ///
    /// An admitted dump restarts the cooldown immediately, whether or not
    /// the capture later succeeds.
    pub fn admit(&mut self, now: Instant, cooldown: Duration) -> bool {
        let allowed = match self.last_dump {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= cooldown,
        };
        if allowed {
            self.last_dump = Some(now);
        }
        allowed
    }

    pub fn phase(&self, now: Instant, cooldown: Duration, warmup_cycles: u64) -> Phase {
        if self.cycles < warmup_cycles {
            return Phase::WarmingUp;
        }
        match self.last_dump {
            Some(last) if now.saturating_duration_since(last) < cooldown => Phase::Cooling,
            _ => Phase::Armed,
        }
    }
}

/// Growth of `current` over `previous` in percent; a zero baseline is infinite growth
pub fn growth_percent(previous: f64, current: f64) -> f64 {
    if previous == 0.0 {
        if current > 0.0 {
            f64::INFINITY
        } else {
            0.0
        }
    } else {
        (current - previous) / previous * 100.0
    }
}

/// Threshold rule without warm-up or cooldown
pub fn matches_rule(current: f64, previous: f64, cfg: &TriggerConfig) -> Option<TriggerReason> {
    if current >= cfg.abs {
        return Some(TriggerReason::AbsoluteCeiling);
    }
    if current >= cfg.min && growth_percent(previous, current) >= cfg.diff {
        return Some(TriggerReason::RelativeGrowth);
    }
    None
}

/// Evaluate one sample of `kind` and advance its state
///
/// `state.previous` always equals `current` afterwards, whatever the outcome.
pub fn evaluate(
    kind: ResourceKind,
    current: f64,
    cfg: &TriggerConfig,
    state: &mut CheckState,
    warmup_cycles: u64,
    now: Instant,
) -> Evaluation {
    state.cycles += 1;
    let previous = state.previous;

    let outcome = if state.cycles < warmup_cycles {
        Outcome::WarmingUp
    } else if cfg.is_disabled() {
        Outcome::Quiet
    } else if cfg.has_max() && current > cfg.max {
        Outcome::OverMax
    } else {
        match matches_rule(current, previous, cfg) {
            None => Outcome::Quiet,
            Some(reason) if state.admit(now, cfg.cooldown) => Outcome::Fired(reason),
            Some(reason) => Outcome::CoolingDown(reason),
        }
    };

    state.previous = current;

    Evaluation {
        kind,
        outcome,
        previous,
        current,
    }
}

/// Per-kind states indexed by [`ResourceKind`]
#[derive(Debug, Clone, Default)]
pub struct StateTable {
    states: [CheckState; 5],
}

impl StateTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, kind: ResourceKind) -> &CheckState {
        &self.states[kind.index()]
    }

    pub fn get_mut(&mut self, kind: ResourceKind) -> &mut CheckState {
        &mut self.states[kind.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WARMUP: u64 = 10;

    fn cfg(min: f64, diff: f64, abs: f64) -> TriggerConfig {
        TriggerConfig::new(min, diff, abs, Duration::from_secs(60)).enabled(true)
    }

    /// State that has completed warm-up with the given baseline
    fn warm_state(previous: f64) -> CheckState {
        CheckState {
            previous,
            last_dump: None,
            cycles: WARMUP,
        }
    }

    #[test]
    fn test_warmup_never_fires() {
        let config = cfg(1.0, 1.0, 2.0);
        let mut state = CheckState::new();
        let now = Instant::now();

        for tick in 1..WARMUP {
            let eval = evaluate(ResourceKind::Memory, 100.0, &config, &mut state, WARMUP, now);
            assert_eq!(eval.outcome, Outcome::WarmingUp, "tick {tick}");
        }

        let eval = evaluate(ResourceKind::Memory, 100.0, &config, &mut state, WARMUP, now);
        assert!(eval.outcome.fired());
    }

    #[test]
    fn test_absolute_ceiling_bypasses_floor() {
        let config = cfg(50.0, 25.0, 70.0);
        let mut state = warm_state(71.0);

        let eval = evaluate(
            ResourceKind::Cpu,
            71.0,
            &config,
            &mut state,
            WARMUP,
            Instant::now(),
        );
        assert_eq!(eval.outcome, Outcome::Fired(TriggerReason::AbsoluteCeiling));
    }

    #[test]
    fn test_absolute_ceiling_below_min_still_fires() {
        // abs below min only happens for hand-built configs, the ceiling still wins
        let config = TriggerConfig {
            min: 80.0,
            ..cfg(80.0, 25.0, 70.0)
        };
        let mut state = warm_state(0.0);

        let eval = evaluate(
            ResourceKind::Memory,
            71.0,
            &config,
            &mut state,
            WARMUP,
            Instant::now(),
        );
        assert_eq!(eval.outcome, Outcome::Fired(TriggerReason::AbsoluteCeiling));
    }

    #[test]
    fn test_min_floor_blocks_growth() {
        let config = cfg(50.0, 10.0, 70.0);
        let mut state = warm_state(5.0);

        let eval = evaluate(
            ResourceKind::Memory,
            6.0,
            &config,
            &mut state,
            WARMUP,
            Instant::now(),
        );
        assert_eq!(eval.outcome, Outcome::Quiet);
    }

    #[test]
    fn test_relative_growth() {
        let config = cfg(10.0, 25.0, 70.0);

        let mut state = warm_state(40.0);
        let eval = evaluate(
            ResourceKind::Memory,
            52.0,
            &config,
            &mut state,
            WARMUP,
            Instant::now(),
        );
        assert_eq!(eval.outcome, Outcome::Fired(TriggerReason::RelativeGrowth));

        let mut state = warm_state(40.0);
        let eval = evaluate(
            ResourceKind::Memory,
            49.0,
            &config,
            &mut state,
            WARMUP,
            Instant::now(),
        );
        assert_eq!(eval.outcome, Outcome::Quiet);
    }

    #[test]
    fn test_zero_baseline_is_infinite_growth() {
        let config = cfg(10.0, 25.0, 70.0);
        let mut state = warm_state(0.0);

        let eval = evaluate(
            ResourceKind::Thread,
            12.0,
            &config,
            &mut state,
            WARMUP,
            Instant::now(),
        );
        assert_eq!(eval.outcome, Outcome::Fired(TriggerReason::RelativeGrowth));
    }

    #[test]
    fn test_zero_baseline_zero_current_with_zero_min() {
        let config = cfg(0.0, 25.0, 70.0);
        let mut state = warm_state(0.0);

        let eval = evaluate(
            ResourceKind::Thread,
            0.0,
            &config,
            &mut state,
            WARMUP,
            Instant::now(),
        );
        assert_eq!(eval.outcome, Outcome::Quiet);
    }

    #[test]
    fn test_cooldown_suppresses_then_admits() {
        let cooldown = Duration::from_secs(60);
        let config = TriggerConfig::new(10.0, 25.0, 70.0, cooldown).enabled(true);
        let mut state = warm_state(0.0);
        let t0 = Instant::now();

        let first = evaluate(ResourceKind::Cpu, 90.0, &config, &mut state, WARMUP, t0);
        assert!(first.outcome.fired());

        let within = evaluate(
            ResourceKind::Cpu,
            95.0,
            &config,
            &mut state,
            WARMUP,
            t0 + Duration::from_secs(59),
        );
        assert_eq!(
            within.outcome,
            Outcome::CoolingDown(TriggerReason::AbsoluteCeiling)
        );

        // Suppression does not restart the cooldown
        let exactly = evaluate(
            ResourceKind::Cpu,
            95.0,
            &config,
            &mut state,
            WARMUP,
            t0 + cooldown,
        );
        assert_eq!(exactly.outcome, Outcome::Fired(TriggerReason::AbsoluteCeiling));
        assert_eq!(state.last_dump, Some(t0 + cooldown));
    }

    #[test]
    fn test_baseline_always_tracks_current() {
        let config = cfg(10.0, 25.0, 70.0);
        let mut state = CheckState::new();
        let t0 = Instant::now();

        let values = [5.0, 50.0, 90.0, 95.0, 12.0, 0.0, 80.0, 81.0, 30.0, 99.0, 1.0, 75.0];
        for (i, value) in values.iter().enumerate() {
            let eval = evaluate(
                ResourceKind::Memory,
                *value,
                &config,
                &mut state,
                3,
                t0 + Duration::from_secs(i as u64),
            );
            assert_eq!(state.previous, *value);
            if i > 0 {
                assert_eq!(eval.previous, values[i - 1]);
            }
        }
    }

    #[test]
    fn test_all_zero_thresholds_never_fire() {
        let config = cfg(0.0, 0.0, 0.0);
        let mut state = warm_state(0.0);

        let eval = evaluate(
            ResourceKind::Memory,
            100.0,
            &config,
            &mut state,
            WARMUP,
            Instant::now(),
        );
        assert_eq!(eval.outcome, Outcome::Quiet);
        assert_eq!(state.previous, 100.0);
    }

    #[test]
    fn test_count_over_max_is_skipped() {
        let config = cfg(3_000.0, 20.0, 200_000.0).with_max(100_000.0);
        let mut state = warm_state(1_000.0);

        let eval = evaluate(
            ResourceKind::LightweightTask,
            150_000.0,
            &config,
            &mut state,
            WARMUP,
            Instant::now(),
        );
        assert_eq!(eval.outcome, Outcome::OverMax);
        assert_eq!(state.previous, 150_000.0);
        assert!(state.last_dump.is_none());
    }

    #[test]
    fn test_phase_transitions() {
        let cooldown = Duration::from_secs(30);
        let config = TriggerConfig::new(10.0, 25.0, 70.0, cooldown).enabled(true);
        let mut state = CheckState::new();
        let t0 = Instant::now();

        assert_eq!(state.phase(t0, cooldown, 2), Phase::WarmingUp);
        evaluate(ResourceKind::Cpu, 1.0, &config, &mut state, 2, t0);
        assert_eq!(state.phase(t0, cooldown, 2), Phase::WarmingUp);
        evaluate(ResourceKind::Cpu, 1.0, &config, &mut state, 2, t0);
        assert_eq!(state.phase(t0, cooldown, 2), Phase::Armed);

        let eval = evaluate(ResourceKind::Cpu, 90.0, &config, &mut state, 2, t0);
        assert!(eval.outcome.fired());
        assert_eq!(state.phase(t0, cooldown, 2), Phase::Cooling);
        assert_eq!(state.phase(t0 + cooldown, cooldown, 2), Phase::Armed);
    }

    #[test]
    fn test_skip_tick_counts_toward_warmup_only() {
        let mut state = CheckState::new();
        state.previous = 42.0;
        state.skip_tick();
        assert_eq!(state.cycles, 1);
        assert_eq!(state.previous, 42.0);
    }

    #[test]
    fn test_state_table_isolates_kinds() {
        let mut table = StateTable::new();
        table.get_mut(ResourceKind::Cpu).previous = 10.0;
        assert_eq!(table.get(ResourceKind::Cpu).previous, 10.0);
        assert_eq!(table.get(ResourceKind::Memory).previous, 0.0);
    }
}
