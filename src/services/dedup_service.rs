//! Database-backed deduplication: effective-rule resolution, last-hash
//! lookups, audit rows, and the fail-open apply path.
//!
//! The pure hashing/classification logic lives in
//! [`crate::services::dedup`]; this module owns rule precedence and
//! persistence.

use std::collections::HashMap;

use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::CoreError;
use crate::models::alert::AlertEvent;
use crate::models::dedup_rule::DeduplicationRule;
use crate::services::dedup::{
    classify, content_hash, effective_ignore_fields, AnnotatedAlert, DedupClassification,
};

/// Select the rules to evaluate for one provider, in order.
///
/// Precedence: tenant-custom rules (highest priority first, then creation
/// order) override the generated default; when no custom rule matches the
/// provider scope, the default alone is evaluated. The default is also
/// returned separately so partial custom rules can inherit its ignore list.
pub fn applicable_rules<'a>(
    rules: &'a [DeduplicationRule],
    provider_id: Option<&str>,
    provider_type: &str,
) -> (Vec<&'a DeduplicationRule>, Option<&'a DeduplicationRule>) {
    let default = rules
        .iter()
        .find(|r| r.is_default && r.enabled && r.provider_type == provider_type);

    let mut custom: Vec<&DeduplicationRule> = rules
        .iter()
        .filter(|r| {
            !r.is_default
                && r.enabled
                && r.provider_type == provider_type
                && (r.provider_id.is_none() || r.provider_id.as_deref() == provider_id)
        })
        .collect();
    custom.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then(a.created_at.cmp(&b.created_at))
    });

    if custom.is_empty() {
        (default.into_iter().collect(), default)
    } else {
        (custom, default)
    }
}

/// Load all enabled dedup rules for a tenant + provider type.
pub async fn load_rules(
    pool: &PgPool,
    tenant_id: Uuid,
    provider_type: &str,
) -> Result<Vec<DeduplicationRule>, CoreError> {
    let rules = sqlx::query_as::<_, DeduplicationRule>(
        r#"
        SELECT * FROM deduplication_rules
        WHERE tenant_id = $1 AND provider_type = $2 AND enabled
        ORDER BY priority DESC, created_at ASC
        "#,
    )
    .bind(tenant_id)
    .bind(provider_type)
    .fetch_all(pool)
    .await?;
    Ok(rules)
}

/// Batch-load the last stored content hash per fingerprint.
pub async fn last_hashes(
    pool: &PgPool,
    tenant_id: Uuid,
    fingerprints: &[String],
) -> Result<HashMap<String, String>, CoreError> {
    let rows = sqlx::query_as::<_, (String, String)>(
        r#"
        SELECT fingerprint, content_hash FROM alert_hashes
        WHERE tenant_id = $1 AND fingerprint = ANY($2)
        "#,
    )
    .bind(tenant_id)
    .bind(fingerprints)
    .fetch_all(pool)
    .await
    .map_err(|e| CoreError::Deduplication(format!("last-hash lookup failed: {e}")))?;
    Ok(rows.into_iter().collect())
}

async fn store_hash(
    pool: &PgPool,
    tenant_id: Uuid,
    fingerprint: &str,
    hash: &str,
) -> Result<(), CoreError> {
    sqlx::query(
        r#"
        INSERT INTO alert_hashes (tenant_id, fingerprint, content_hash, updated_at)
        VALUES ($1, $2, $3, NOW())
        ON CONFLICT (tenant_id, fingerprint)
        DO UPDATE SET content_hash = EXCLUDED.content_hash, updated_at = NOW()
        "#,
    )
    .bind(tenant_id)
    .bind(fingerprint)
    .bind(hash)
    .execute(pool)
    .await
    .map_err(|e| CoreError::Deduplication(format!("last-hash store failed: {e}")))?;
    Ok(())
}

async fn record_event(
    pool: &PgPool,
    rule: &DeduplicationRule,
    alert: &AlertEvent,
    hash: &str,
    kind: DedupClassification,
) -> Result<(), CoreError> {
    sqlx::query(
        r#"
        INSERT INTO deduplication_events
            (id, tenant_id, rule_id, fingerprint, content_hash, kind, provider_id, provider_type, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(alert.tenant_id)
    .bind(rule.id)
    .bind(&alert.fingerprint)
    .bind(hash)
    .bind(kind.as_str())
    .bind(&alert.provider_id)
    .bind(&alert.provider_type)
    .execute(pool)
    .await?;
    Ok(())
}

/// Apply deduplication to one alert.
///
/// Evaluates the applicable rules in precedence order, stopping at the
/// first rule that finds a duplicate. A hashing or lookup failure is
/// returned as `CoreError::Deduplication`; use [`apply_fail_open`] on the
/// ingestion path.
pub async fn apply(
    pool: &PgPool,
    alert: AlertEvent,
    track_distribution: bool,
) -> Result<AnnotatedAlert, CoreError> {
    let rules = load_rules(pool, alert.tenant_id, &alert.provider_type).await?;
    let generated_default =
        DeduplicationRule::default_for_provider(alert.tenant_id, &alert.provider_type);

    let (candidates, default) =
        applicable_rules(&rules, alert.provider_id.as_deref(), &alert.provider_type);
    // No stored default: fall back to the generated one.
    let default = default.unwrap_or(&generated_default);
    let candidates = if candidates.is_empty() {
        vec![default]
    } else {
        candidates
    };

    let context = alert.context();
    let stored = last_hashes(pool, alert.tenant_id, std::slice::from_ref(&alert.fingerprint)).await?;
    let last = stored.get(&alert.fingerprint).map(String::as_str);

    let mut outcome: Option<(String, DedupClassification)> = None;
    for rule in candidates {
        let ignore = effective_ignore_fields(rule, Some(default));
        let hash = content_hash(&context, &ignore);
        let kind = classify(&hash, last);

        if track_distribution {
            record_event(pool, rule, &alert, &hash, kind).await?;
        }

        let duplicate = kind != DedupClassification::None;
        if outcome.is_none() || duplicate {
            outcome = Some((hash, kind));
        }
        // First match wins.
        if duplicate {
            break;
        }
    }

    let (hash, kind) =
        outcome.ok_or_else(|| CoreError::Deduplication("no applicable dedup rule".to_string()))?;
    store_hash(pool, alert.tenant_id, &alert.fingerprint, &hash).await?;

    Ok(AnnotatedAlert {
        is_full_duplicate: kind == DedupClassification::Full,
        is_partial_duplicate: kind == DedupClassification::Partial,
        content_hash: hash,
        alert,
    })
}

/// Fail-open wrapper for the ingestion path: a dedup failure must never
/// drop an alert, so the alert passes through as non-duplicate.
pub async fn apply_fail_open(
    pool: &PgPool,
    alert: AlertEvent,
    track_distribution: bool,
) -> AnnotatedAlert {
    match apply(pool, alert.clone(), track_distribution).await {
        Ok(annotated) => annotated,
        Err(e) => {
            tracing::warn!(
                tenant_id = %alert.tenant_id,
                fingerprint = %alert.fingerprint,
                error = %e,
                "deduplication failed, treating alert as non-duplicate"
            );
            AnnotatedAlert {
                alert,
                content_hash: String::new(),
                is_full_duplicate: false,
                is_partial_duplicate: false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn rule(
        provider_id: Option<&str>,
        is_default: bool,
        priority: i32,
        age_mins: i64,
    ) -> DeduplicationRule {
        DeduplicationRule {
            id: Uuid::new_v4(),
            tenant_id: Uuid::nil(),
            name: "r".into(),
            provider_id: provider_id.map(String::from),
            provider_type: "prometheus".into(),
            ignore_fields: vec![],
            full_deduplication: true,
            enabled: true,
            priority,
            is_default,
            created_at: Utc::now() - Duration::minutes(age_mins),
        }
    }

    #[test]
    fn custom_rule_overrides_default() {
        let rules = vec![rule(None, true, 0, 10), rule(Some("prom-1"), false, 1, 5)];
        let (candidates, default) = applicable_rules(&rules, Some("prom-1"), "prometheus");
        assert_eq!(candidates.len(), 1);
        assert!(!candidates[0].is_default);
        assert!(default.is_some());
    }

    #[test]
    fn default_used_when_no_custom_matches() {
        let rules = vec![rule(None, true, 0, 10), rule(Some("other"), false, 1, 5)];
        let (candidates, _) = applicable_rules(&rules, Some("prom-1"), "prometheus");
        assert_eq!(candidates.len(), 1);
        assert!(candidates[0].is_default);
    }

    #[test]
    fn higher_priority_custom_rule_first() {
        let low = rule(Some("prom-1"), false, 1, 10);
        let high = rule(Some("prom-1"), false, 5, 5);
        let rules = vec![low.clone(), high.clone()];
        let (candidates, _) = applicable_rules(&rules, Some("prom-1"), "prometheus");
        assert_eq!(candidates[0].id, high.id);
        assert_eq!(candidates[1].id, low.id);
    }

    #[test]
    fn disabled_rules_are_skipped() {
        let mut r = rule(Some("prom-1"), false, 1, 5);
        r.enabled = false;
        let rules = vec![rule(None, true, 0, 10), r];
        let (candidates, _) = applicable_rules(&rules, Some("prom-1"), "prometheus");
        assert!(candidates[0].is_default);
    }

    #[test]
    fn wrong_provider_type_never_matches() {
        let mut r = rule(Some("prom-1"), false, 1, 5);
        r.provider_type = "grafana".into();
        let rules = vec![r];
        let (candidates, default) = applicable_rules(&rules, Some("prom-1"), "prometheus");
        assert!(candidates.is_empty());
        assert!(default.is_none());
    }
}
