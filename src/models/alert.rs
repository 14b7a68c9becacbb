//! Normalized alert event model with enums shared across the core.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// -- Enums matching PostgreSQL --

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash)]
#[sqlx(type_name = "alert_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Firing,
    Resolved,
    Acknowledged,
    Suppressed,
    Maintenance,
}

impl AlertStatus {
    /// Statuses that count as "no longer active" for incident resolution.
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Resolved | Self::Suppressed)
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Firing => "firing",
            Self::Resolved => "resolved",
            Self::Acknowledged => "acknowledged",
            Self::Suppressed => "suppressed",
            Self::Maintenance => "maintenance",
        };
        write!(f, "{s}")
    }
}

impl FromStr for AlertStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "firing" => Ok(Self::Firing),
            "resolved" => Ok(Self::Resolved),
            "acknowledged" => Ok(Self::Acknowledged),
            "suppressed" => Ok(Self::Suppressed),
            "maintenance" => Ok(Self::Maintenance),
            other => Err(format!("unknown alert status '{other}'")),
        }
    }
}

/// Alert severity, ordered by urgency.
///
/// Variant order is the ordinal order: comparisons on severity go through
/// [`Severity::ordinal`] (or the derived `Ord`), never through the string
/// name. `"high" < "info"` lexicographically, which is exactly the trap the
/// ordinal exists to avoid.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[sqlx(type_name = "severity_level", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Info,
    Warning,
    High,
    Critical,
}

impl Severity {
    /// Ordinal rank used by CEL comparisons and the SQL translator.
    pub fn ordinal(&self) -> i16 {
        match self {
            Self::Low => 0,
            Self::Info => 1,
            Self::Warning => 2,
            Self::High => 3,
            Self::Critical => 4,
        }
    }

    /// Normalize a provider-supplied severity string.
    ///
    /// Providers disagree on naming ("crit", "P1", "warn", numeric levels);
    /// anything unrecognized maps to `Info`.
    pub fn from_provider(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "critical" | "crit" | "fatal" | "p1" | "5" => Self::Critical,
            "high" | "error" | "err" | "p2" | "4" => Self::High,
            "warning" | "warn" | "p3" | "3" => Self::Warning,
            "info" | "information" | "informational" | "p4" | "2" => Self::Info,
            "low" | "debug" | "p5" | "1" | "0" => Self::Low,
            _ => Self::Info,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::High => "high",
            Self::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "info" => Ok(Self::Info),
            "warning" => Ok(Self::Warning),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(format!("unknown severity '{other}'")),
        }
    }
}

// -- Core alert event --

/// A normalized alert as produced by the (external) provider ingestion
/// layer. `fingerprint` identifies the logical alert across redeliveries;
/// the dedup content hash is computed separately over [`AlertEvent::context`].
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AlertEvent {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub fingerprint: String,
    pub name: String,
    pub status: AlertStatus,
    /// Only meaningful under the `recover_previous_status` maintenance
    /// strategy; captured when the alert enters a window.
    pub previous_status: Option<AlertStatus>,
    pub severity: Severity,
    pub provider_id: Option<String>,
    pub provider_type: String,
    pub service: Option<String>,
    pub labels: serde_json::Value,
    /// Full normalized provider payload as received.
    pub payload: serde_json::Value,
    pub last_received: DateTime<Utc>,
}

impl AlertEvent {
    /// Attribute-accessible record for CEL evaluation and dedup hashing.
    ///
    /// The provider payload forms the base; typed columns overlay it so a
    /// predicate like `severity >= 'high' && labels.env == 'prod'` always
    /// sees the normalized values.
    pub fn context(&self) -> serde_json::Value {
        let mut map = match &self.payload {
            serde_json::Value::Object(obj) => obj.clone(),
            _ => serde_json::Map::new(),
        };
        map.insert("id".into(), serde_json::json!(self.id.to_string()));
        map.insert("tenant_id".into(), serde_json::json!(self.tenant_id.to_string()));
        map.insert("fingerprint".into(), serde_json::json!(self.fingerprint));
        map.insert("name".into(), serde_json::json!(self.name));
        map.insert("status".into(), serde_json::json!(self.status.to_string()));
        map.insert("severity".into(), serde_json::json!(self.severity.to_string()));
        map.insert("provider_id".into(), serde_json::json!(self.provider_id));
        map.insert("provider_type".into(), serde_json::json!(self.provider_type));
        map.insert("service".into(), serde_json::json!(self.service));
        map.insert("labels".into(), self.labels.clone());
        map.insert(
            "last_received".into(),
            serde_json::json!(self.last_received.to_rfc3339()),
        );
        serde_json::Value::Object(map)
    }
}
