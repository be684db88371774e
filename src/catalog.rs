//! Fitness test catalog and the result record handed to the dashboard.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifies one of the supported fitness tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestId {
    /// Sit-ups counted over a fixed window.
    #[default]
    Situps,
    /// Best vertical jump height.
    VerticalJump,
    /// Shuttle run time.
    ShuttleRun,
}

impl TestId {
    /// Every test, in catalog order.
    pub const ALL: [Self; 3] = [Self::Situps, Self::VerticalJump, Self::ShuttleRun];

    /// Stable machine name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Situps => "situps",
            Self::VerticalJump => "vertical_jump",
            Self::ShuttleRun => "shuttle_run",
        }
    }

    /// Catalog entry for this test.
    #[must_use]
    pub fn definition(self) -> &'static TestDefinition {
        match self {
            Self::Situps => &CATALOG[0],
            Self::VerticalJump => &CATALOG[1],
            Self::ShuttleRun => &CATALOG[2],
        }
    }
}

impl fmt::Display for TestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Returned when a test name is not in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown test `{0}` (expected situps, vertical_jump or shuttle_run)")]
pub struct UnknownTest(pub String);

impl FromStr for TestId {
    type Err = UnknownTest;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "situps" | "sit-ups" | "sit_ups" => Ok(Self::Situps),
            "vertical_jump" | "vertical-jump" | "jump" => Ok(Self::VerticalJump),
            "shuttle_run" | "shuttle-run" | "shuttle" => Ok(Self::ShuttleRun),
            other => Err(UnknownTest(other.to_owned())),
        }
    }
}

/// Static description of a fitness test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestDefinition {
    /// Catalog id.
    pub id: TestId,
    /// Display name.
    pub name: &'static str,
    /// How long a recording is expected to run.
    pub expected_duration_seconds: u32,
    /// Unit of the headline measurement.
    pub unit: &'static str,
}

static CATALOG: [TestDefinition; 3] = [
    TestDefinition {
        id: TestId::Situps,
        name: "Sit-ups",
        expected_duration_seconds: 60,
        unit: "reps",
    },
    TestDefinition {
        id: TestId::VerticalJump,
        name: "Vertical Jump",
        expected_duration_seconds: 10,
        unit: "cm",
    },
    TestDefinition {
        id: TestId::ShuttleRun,
        name: "Shuttle Run",
        expected_duration_seconds: 30,
        unit: "s",
    },
];

/// The full catalog.
#[must_use]
pub fn catalog() -> &'static [TestDefinition] {
    &CATALOG
}

/// Headline outcome of a test: a rep count or a formatted metric.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Measurement {
    /// Counted repetitions.
    Reps(u32),
    /// A measured value with its unit, e.g. `"28 cm"`.
    Metric(String),
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reps(n) => write!(f, "{n} reps"),
            Self::Metric(value) => f.write_str(value),
        }
    }
}

/// Outcome of one completed analysis run. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRecord {
    test_id: TestId,
    reps_or_metric: Measurement,
    form_score_percent: u8,
    rating_label: String,
    recorded_seconds: u32,
}

impl ResultRecord {
    /// Build a record; the score is clamped to 100 and the label derived from it.
    #[must_use]
    pub fn new(
        test_id: TestId,
        reps_or_metric: Measurement,
        form_score_percent: u8,
        recorded_seconds: u32,
    ) -> Self {
        let form_score_percent = form_score_percent.min(100);
        Self {
            test_id,
            reps_or_metric,
            form_score_percent,
            rating_label: rating_for(form_score_percent).to_owned(),
            recorded_seconds,
        }
    }

    /// Which test this result belongs to.
    pub const fn test_id(&self) -> TestId {
        self.test_id
    }

    /// Rep count or metric.
    pub const fn reps_or_metric(&self) -> &Measurement {
        &self.reps_or_metric
    }

    /// Form score, 0..=100.
    pub const fn form_score_percent(&self) -> u8 {
        self.form_score_percent
    }

    /// Human rating, e.g. "Excellent".
    pub fn rating_label(&self) -> &str {
        &self.rating_label
    }

    /// Length of the recording that was analysed.
    pub const fn recorded_seconds(&self) -> u32 {
        self.recorded_seconds
    }
}

/// Rating label for a form score.
#[must_use]
pub const fn rating_for(form_score_percent: u8) -> &'static str {
    match form_score_percent {
        90.. => "Excellent",
        75..=89 => "Good",
        60..=74 => "Fair",
        _ => "Needs Work",
    }
}

/// Render seconds as `m:ss` for the recording badge.
#[must_use]
pub fn format_elapsed(seconds: u32) -> String {
    format!("{}:{:02}", seconds / 60, seconds % 60)
}
