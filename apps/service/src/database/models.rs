use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::monitoring::types::ProbeResult;
use crate::monitoring::validation::{
    ValidationError, validate_host, validate_name, validate_port, validate_region,
};

fn enabled_by_default() -> bool {
    true
}

/// Node model - a network endpoint to be probed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub region: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

impl Node {
    /// Create a node, trimming and validating every field
    pub fn new(
        name: &str,
        host: &str,
        port: u16,
        region: &str,
        enabled: bool,
    ) -> Result<Self, ValidationError> {
        Ok(Self {
            name: validate_name(name)?,
            host: validate_host(host)?,
            port: validate_port(port)?,
            region: validate_region(region)?,
            enabled,
        })
    }

    /// Re-run validation on a node that was deserialized or built by hand
    pub fn validated(self) -> Result<Self, ValidationError> {
        Self::new(&self.name, &self.host, self.port, &self.region, self.enabled)
    }
}

/// A node after registration, carrying its generated identifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredNode {
    pub node_id: String,
    #[serde(flatten)]
    pub node: Node,
}

impl RegisteredNode {
    /// Assign a fresh identifier to `node`
    pub fn register(node: Node) -> Self {
        Self { node_id: Uuid::new_v4().to_string(), node }
    }

    pub fn host(&self) -> &str {
        &self.node.host
    }

    pub fn port(&self) -> u16 {
        self.node.port
    }

    pub fn enabled(&self) -> bool {
        self.node.enabled
    }
}

/// Filter applied by result listing and summaries.
///
/// Both time bounds are inclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultFilter {
    pub node_id: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl ResultFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    pub fn since(mut self, from: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self
    }

    pub fn until(mut self, to: DateTime<Utc>) -> Self {
        self.to = Some(to);
        self
    }

    pub fn matches(&self, result: &ProbeResult) -> bool {
        if let Some(node_id) = &self.node_id {
            if &result.node_id != node_id {
                return false;
            }
        }
        if let Some(from) = self.from {
            if result.checked_at < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if result.checked_at > to {
                return false;
            }
        }
        true
    }
}

/// Aggregate over a filtered set of probe results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResultsSummary {
    pub total_checks: u64,
    pub up_checks: u64,
    pub down_checks: u64,
    pub availability_pct: f64,
    pub avg_latency_ms: Option<f64>,
    pub last_checked_at: Option<DateTime<Utc>>,
}

impl ProbeResultsSummary {
    /// Build a summary from raw aggregates.
    ///
    /// `avg_up_latency_ms` is the unrounded mean latency of up results.
    pub fn from_aggregates(
        total_checks: u64,
        up_checks: u64,
        avg_up_latency_ms: Option<f64>,
        last_checked_at: Option<DateTime<Utc>>,
    ) -> Self {
        let availability_pct = if total_checks == 0 {
            0.0
        } else {
            round3(up_checks as f64 / total_checks as f64 * 100.0)
        };

        Self {
            total_checks,
            up_checks,
            down_checks: total_checks.saturating_sub(up_checks),
            availability_pct,
            avg_latency_ms: if up_checks == 0 { None } else { avg_up_latency_ms.map(round3) },
            last_checked_at,
        }
    }

    pub fn from_results<'a>(results: impl IntoIterator<Item = &'a ProbeResult>) -> Self {
        let mut total = 0u64;
        let mut up = 0u64;
        let mut latency_sum = 0.0;
        let mut last: Option<DateTime<Utc>> = None;

        for result in results {
            total += 1;
            if result.is_up() {
                up += 1;
                latency_sum += result.latency_ms;
            }
            last = Some(last.map_or(result.checked_at, |seen| seen.max(result.checked_at)));
        }

        let avg = (up > 0).then(|| latency_sum / up as f64);
        Self::from_aggregates(total, up, avg, last)
    }

    pub fn empty() -> Self {
        Self::from_aggregates(0, 0, None, None)
    }
}

/// Round to three decimal places
pub fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}
