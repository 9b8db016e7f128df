//! Time-phased intensity profile of a run.
//!
//! A run of `D` minutes is cut into contiguous phases:
//!
//! ```text
//! minute  0        1            burst_after         D - cool_down     D
//!         |populate|   steady    |      burst        |   cool-down    |
//! ```
//!
//! The population minute only exists when data is loaded (not simulate-only).
//! Workers look up their phase from elapsed wall time on every iteration.

use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// `minutes` as a duration, saturating instead of wrapping.
pub fn from_minutes(minutes: u64) -> Duration {
    Duration::from_secs(minutes.saturating_mul(60))
}

/// Tunable burst heuristic: burst begins at minute `burst_after_minutes` of
/// the run and stops `cool_down_minutes` before its end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseTable {
    pub burst_after_minutes: u64,
    pub cool_down_minutes: u64,
}

impl Default for PhaseTable {
    fn default() -> Self {
        Self {
            burst_after_minutes: 3,
            cool_down_minutes: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseKind {
    Population,
    Steady,
    Burst,
    CoolDown,
}

impl fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PhaseKind::Population => "population",
            PhaseKind::Steady => "steady",
            PhaseKind::Burst => "burst",
            PhaseKind::CoolDown => "cooldown",
        };
        f.write_str(name)
    }
}

/// How fast a worker replays operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intensity {
    /// No artificial delay between operations.
    Unthrottled,
    /// Target operations per second for one connection.
    Throttled { tps: u32 },
}

impl Intensity {
    /// Pause after each operation, `None` when unthrottled.
    pub fn delay(&self) -> Option<Duration> {
        match self {
            Intensity::Unthrottled => None,
            Intensity::Throttled { tps } => Some(Duration::from_secs(1) / (*tps).max(1)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Phase {
    pub kind: PhaseKind,
    /// Inclusive, in minutes since the start of the run.
    pub start_minute: u64,
    /// Exclusive.
    pub end_minute: u64,
    pub intensity: Intensity,
}

impl Phase {
    fn new(kind: PhaseKind, start_minute: u64, end_minute: u64, intensity: Intensity) -> Self {
        Self {
            kind,
            start_minute,
            end_minute,
            intensity,
        }
    }

    pub fn minutes(&self) -> u64 {
        self.end_minute - self.start_minute
    }

    pub fn start(&self) -> Duration {
        from_minutes(self.start_minute)
    }

    pub fn end(&self) -> Duration {
        from_minutes(self.end_minute)
    }

    pub fn contains(&self, elapsed: Duration) -> bool {
        elapsed >= self.start() && elapsed < self.end()
    }
}

/// Ordered, contiguous phases covering `[0, total_minutes)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhasePlan {
    phases: Vec<Phase>,
    total_minutes: u64,
}

impl PhasePlan {
    pub fn new(total_minutes: u64, simulate_only: bool, tps: u32, table: &PhaseTable) -> Self {
        let steady = Intensity::Throttled { tps };
        let mut phases = Vec::new();

        let start = if simulate_only || total_minutes == 0 {
            0
        } else {
            phases.push(Phase::new(PhaseKind::Population, 0, 1, Intensity::Unthrottled));
            1
        };

        let burst_start = table.burst_after_minutes.max(start);
        let burst_end = total_minutes.saturating_sub(table.cool_down_minutes);

        if burst_start < burst_end {
            if start < burst_start {
                phases.push(Phase::new(PhaseKind::Steady, start, burst_start, steady));
            }
            phases.push(Phase::new(PhaseKind::Burst, burst_start, burst_end, Intensity::Unthrottled));
            if burst_end < total_minutes {
                phases.push(Phase::new(PhaseKind::CoolDown, burst_end, total_minutes, steady));
            }
        } else if start < total_minutes {
            phases.push(Phase::new(PhaseKind::Steady, start, total_minutes, steady));
        }

        Self {
            phases,
            total_minutes,
        }
    }

    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    pub fn total_minutes(&self) -> u64 {
        self.total_minutes
    }

    pub fn total(&self) -> Duration {
        from_minutes(self.total_minutes)
    }

    /// The phase in force `elapsed` after the run started, `None` once the
    /// run is over.
    pub fn phase_for(&self, elapsed: Duration) -> Option<&Phase> {
        self.phases.iter().find(|phase| phase.contains(elapsed))
    }

    pub fn population(&self) -> Option<&Phase> {
        self.phases
            .iter()
            .find(|phase| phase.kind == PhaseKind::Population)
    }

    /// Minutes left for the simulation step once population is done.
    pub fn simulation_minutes(&self) -> u64 {
        self.total_minutes - self.population().map_or(0, Phase::minutes)
    }
}
