//! Replication scenarios for DST.

use serde::Serialize;

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioId {
    /// DST-001: Observer walks out of and back into a beacon's range
    Proximity,

    /// DST-002: Observer oscillating across the range threshold
    Flicker,

    /// DST-003: Unreachable and lossy links never corrupt visibility state
    FlakyLink,

    /// DST-004: Scheduler-launched flares that fly, fade and expire
    Fireworks,

    /// DST-005: Many random-walking observers around moving beacons
    Crowd,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::Proximity,
            ScenarioId::Flicker,
            ScenarioId::FlakyLink,
            ScenarioId::Fireworks,
            ScenarioId::Crowd,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::Proximity => "proximity",
            ScenarioId::Flicker => "flicker",
            ScenarioId::FlakyLink => "flaky_link",
            ScenarioId::Fireworks => "fireworks",
            ScenarioId::Crowd => "crowd",
        }
    }

    /// Returns the DST number.
    pub fn code(&self) -> &'static str {
        match self {
            ScenarioId::Proximity => "DST-001",
            ScenarioId::Flicker => "DST-002",
            ScenarioId::FlakyLink => "DST-003",
            ScenarioId::Fireworks => "DST-004",
            ScenarioId::Crowd => "DST-005",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::Proximity => "Spawn, Remove, silent dirty move, single re-Spawn",
            ScenarioId::Flicker => "Observer crosses R on a seeded period; counts match transitions",
            ScenarioId::FlakyLink => "Unreachable + 50% lossy observers; marks survive failed sends",
            ScenarioId::Fireworks => "Bounded task launches flares on ballistic paths; all reaped",
            ScenarioId::Crowd => "24 walkers, 12 drifting beacons, clients converge every tick",
        }
    }

    /// Fewest ticks the scenario needs to reach all of its checks.
    pub fn min_ticks(&self) -> u64 {
        match self {
            ScenarioId::Proximity => 8,
            ScenarioId::Flicker => 20,
            ScenarioId::FlakyLink => 40,
            ScenarioId::Fireworks => 80,
            ScenarioId::Crowd => 20,
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "proximity" | "dst-001" => Ok(ScenarioId::Proximity),
            "flicker" | "dst-002" => Ok(ScenarioId::Flicker),
            "flaky_link" | "flakylink" | "dst-003" => Ok(ScenarioId::FlakyLink),
            "fireworks" | "dst-004" => Ok(ScenarioId::Fireworks),
            "crowd" | "dst-005" => Ok(ScenarioId::Crowd),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}
