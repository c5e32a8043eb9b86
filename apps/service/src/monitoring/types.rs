use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Status of a probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
    Up,
    Down,
}

impl ProbeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeStatus::Up => "up",
            ProbeStatus::Down => "down",
        }
    }
}

impl std::fmt::Display for ProbeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProbeStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "up" => Ok(ProbeStatus::Up),
            "down" => Ok(ProbeStatus::Down),
            other => Err(format!("unknown probe status: {other}")),
        }
    }
}

/// Outcome of probing one node. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    /// Identifier of the probed node
    pub node_id: String,

    /// Up or down
    pub status: ProbeStatus,

    /// Milliseconds spent on the connection attempt
    pub latency_ms: f64,

    /// When the probe finished
    pub checked_at: DateTime<Utc>,

    /// Short failure reason, only set when the node is down
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProbeResult {
    /// A successful probe, stamped now
    pub fn up(node_id: impl Into<String>, latency_ms: f64) -> Self {
        Self {
            node_id: node_id.into(),
            status: ProbeStatus::Up,
            latency_ms: latency_ms.max(0.0),
            checked_at: Utc::now(),
            error: None,
        }
    }

    /// A failed probe, stamped now
    pub fn down(node_id: impl Into<String>, latency_ms: f64, error: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            status: ProbeStatus::Down,
            latency_ms: latency_ms.max(0.0),
            checked_at: Utc::now(),
            error: Some(error.into()),
        }
    }

    /// Override the check timestamp
    pub fn at(mut self, checked_at: DateTime<Utc>) -> Self {
        self.checked_at = checked_at;
        self
    }

    pub fn is_up(&self) -> bool {
        self.status == ProbeStatus::Up
    }
}
