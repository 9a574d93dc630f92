//! Scenario configuration.

use std::time::Duration;

/// How output is rendered once the scenario finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Plain,
    Json,
}

/// Parameters of one scripted run.
#[derive(Debug, Clone)]
pub struct ScenarioConfig {
    /// Number of players that join.
    pub players: usize,
    /// Character respawns per player.
    pub respawns: usize,
    /// Simulated latency of every activation.
    pub latency: Duration,
    pub output: OutputFormat,
}

impl ScenarioConfig {
    #[must_use]
    pub fn new(players: usize) -> Self {
        Self {
            players,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_respawns(mut self, respawns: usize) -> Self {
        self.respawns = respawns;
        self
    }

    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    #[must_use]
    pub fn with_output(mut self, output: OutputFormat) -> Self {
        self.output = output;
        self
    }

    /// Time to wait for in-flight activations and teardowns to land.
    pub fn settle_time(&self) -> Duration {
        self.latency * 3 + Duration::from_millis(5)
    }
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            players: 3,
            respawns: 2,
            latency: Duration::from_millis(20),
            output: OutputFormat::Plain,
        }
    }
}
