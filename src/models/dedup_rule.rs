//! Deduplication rule model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

/// Fields ignored by every generated default rule: volatile per-delivery
/// attributes that change without the alert payload meaningfully changing.
pub const DEFAULT_IGNORED_FIELDS: &[&str] = &["id", "last_received", "previous_status"];

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DeduplicationRule {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    /// Scope: a concrete provider instance, or None for a generated
    /// provider-type default.
    pub provider_id: Option<String>,
    pub provider_type: String,
    /// Dot-separated field paths removed before hashing. Paths navigate
    /// only through map-typed intermediates.
    pub ignore_fields: Vec<String>,
    /// When false the rule is partial: it inherits the default rule's
    /// ignore list on top of its own.
    pub full_deduplication: bool,
    pub enabled: bool,
    pub priority: i32,
    /// True for the generated per-provider-type default.
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
}

impl DeduplicationRule {
    /// Build the generated default rule for a provider type.
    pub fn default_for_provider(tenant_id: Uuid, provider_type: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            name: format!("{provider_type} default"),
            provider_id: None,
            provider_type: provider_type.to_string(),
            ignore_fields: DEFAULT_IGNORED_FIELDS.iter().map(|s| s.to_string()).collect(),
            full_deduplication: true,
            enabled: true,
            priority: 0,
            is_default: true,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateDeduplicationRule {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub provider_id: Option<String>,
    #[validate(length(min = 1))]
    pub provider_type: String,
    pub ignore_fields: Vec<String>,
    pub full_deduplication: bool,
    pub priority: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateDeduplicationRule {
    pub name: Option<String>,
    pub ignore_fields: Option<Vec<String>>,
    pub full_deduplication: Option<bool>,
    pub enabled: Option<bool>,
    pub priority: Option<i32>,
}

/// Audit row written per rule evaluation when distribution tracking is on.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct DeduplicationEvent {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub rule_id: Uuid,
    pub fingerprint: String,
    pub content_hash: String,
    /// `full`, `partial`, or `none`.
    pub kind: String,
    pub provider_id: Option<String>,
    pub provider_type: String,
    pub created_at: DateTime<Utc>,
}
