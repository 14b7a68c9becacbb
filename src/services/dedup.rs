//! Canonical-hash deduplication: ignore-path removal, deterministic
//! serialization, and duplicate classification.
//!
//! This module contains no database access — the caller resolves the
//! effective rule, supplies the last stored hash per fingerprint, and
//! persists the outcome.

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::models::alert::AlertEvent;
use crate::models::dedup_rule::DeduplicationRule;

/// Duplicate classification against the last stored hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupClassification {
    /// No prior hash for this fingerprint.
    None,
    /// Same fingerprint, unchanged non-ignored payload.
    Full,
    /// Same fingerprint, changed non-ignored payload.
    Partial,
}

impl DedupClassification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Full => "full",
            Self::Partial => "partial",
        }
    }
}

/// An alert annotated with its dedup outcome.
#[derive(Debug, Clone)]
pub struct AnnotatedAlert {
    pub alert: AlertEvent,
    pub content_hash: String,
    pub is_full_duplicate: bool,
    pub is_partial_duplicate: bool,
}

impl AnnotatedAlert {
    pub fn classification(&self) -> DedupClassification {
        if self.is_full_duplicate {
            DedupClassification::Full
        } else if self.is_partial_duplicate {
            DedupClassification::Partial
        } else {
            DedupClassification::None
        }
    }
}

/// Merge a rule's ignore list with the inherited default list.
///
/// A partial custom rule (`full_deduplication = false`) still ignores
/// everything the generated default ignores; a full custom rule stands
/// alone.
pub fn effective_ignore_fields(
    rule: &DeduplicationRule,
    default_rule: Option<&DeduplicationRule>,
) -> Vec<String> {
    let mut fields = rule.ignore_fields.clone();
    if !rule.full_deduplication {
        if let Some(default) = default_rule {
            for f in &default.ignore_fields {
                if !fields.contains(f) {
                    fields.push(f.clone());
                }
            }
        }
    }
    fields
}

/// Remove a dot-separated field path from a JSON object.
///
/// Navigation only descends through map-typed intermediates; a missing
/// segment or a non-map intermediate aborts removal for that path without
/// error, leaving the value untouched.
pub fn remove_path(value: &mut Value, path: &str) {
    let segments: Vec<&str> = path.split('.').collect();
    let Some((last, parents)) = segments.split_last() else {
        return;
    };

    let mut current = value;
    for segment in parents {
        match current {
            Value::Object(map) => match map.get_mut(*segment) {
                Some(next) => current = next,
                None => return,
            },
            _ => return,
        }
    }
    if let Value::Object(map) = current {
        map.remove(*last);
    }
}

/// Canonicalize and hash an alert's attributes after ignore-path removal.
///
/// Canonical form: keys sorted lexicographically at every level, scalars in
/// their JSON encoding (dates and UUIDs are already strings in the
/// context). SHA-256 over the canonical bytes, hex-encoded.
pub fn content_hash(context: &Value, ignore_fields: &[String]) -> String {
    let mut pruned = context.clone();
    for path in ignore_fields {
        remove_path(&mut pruned, path);
    }
    let mut canonical = String::new();
    write_canonical(&pruned, &mut canonical);

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Classify a freshly computed hash against the last stored one.
pub fn classify(new_hash: &str, last_hash: Option<&str>) -> DedupClassification {
    match last_hash {
        None => DedupClassification::None,
        Some(prev) if prev == new_hash => DedupClassification::Full,
        Some(_) => DedupClassification::Partial,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::alert::{AlertStatus, Severity};
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    fn alert_context() -> Value {
        json!({
            "name": "cpu high",
            "status": "firing",
            "severity": "high",
            "labels": {"env": "prod", "pod": "api-7f9"},
            "last_received": "2026-08-06T10:00:00Z"
        })
    }

    #[test]
    fn canonical_hash_is_deterministic() {
        let ctx = alert_context();
        let ignores = vec!["last_received".to_string()];
        assert_eq!(content_hash(&ctx, &ignores), content_hash(&ctx, &ignores));
    }

    #[test]
    fn key_order_does_not_matter() {
        let a = json!({"b": 1, "a": {"y": 2, "x": 3}});
        let b = json!({"a": {"x": 3, "y": 2}, "b": 1});
        assert_eq!(content_hash(&a, &[]), content_hash(&b, &[]));
    }

    #[test]
    fn ignored_field_does_not_affect_hash() {
        let mut changed = alert_context();
        changed["last_received"] = json!("2026-08-06T10:05:00Z");
        let ignores = vec!["last_received".to_string()];
        assert_eq!(
            content_hash(&alert_context(), &ignores),
            content_hash(&changed, &ignores)
        );
    }

    #[test]
    fn non_ignored_change_changes_hash() {
        let mut changed = alert_context();
        changed["labels"]["pod"] = json!("api-8c1");
        assert_eq!(
            classify(
                &content_hash(&changed, &[]),
                Some(&content_hash(&alert_context(), &[]))
            ),
            DedupClassification::Partial
        );
    }

    #[test]
    fn missing_ignore_path_is_silent_and_leaves_rest_unchanged() {
        let ctx = alert_context();
        let ignores = vec![
            "does_not_exist".to_string(),
            "labels.missing.deeper".to_string(),
            // Non-map intermediate: `name` is a string.
            "name.sub".to_string(),
        ];
        // Same hash as with no ignores at all: nothing was removed.
        assert_eq!(content_hash(&ctx, &ignores), content_hash(&ctx, &[]));
    }

    #[test]
    fn nested_ignore_path_removes_only_target() {
        let ctx = alert_context();
        let ignores = vec!["labels.pod".to_string()];
        let mut expected = alert_context();
        expected["labels"].as_object_mut().unwrap().remove("pod");
        assert_eq!(content_hash(&ctx, &ignores), content_hash(&expected, &[]));
    }

    #[test]
    fn classification_full_vs_partial_vs_none() {
        let h1 = content_hash(&alert_context(), &[]);
        assert_eq!(classify(&h1, None), DedupClassification::None);
        assert_eq!(classify(&h1, Some(&h1)), DedupClassification::Full);
        assert_eq!(classify(&h1, Some("other")), DedupClassification::Partial);
    }

    #[test]
    fn partial_rule_inherits_default_ignores() {
        let tenant = Uuid::nil();
        let default = DeduplicationRule::default_for_provider(tenant, "prometheus");
        let mut custom = DeduplicationRule::default_for_provider(tenant, "prometheus");
        custom.is_default = false;
        custom.full_deduplication = false;
        custom.ignore_fields = vec!["labels.pod".to_string()];

        let effective = effective_ignore_fields(&custom, Some(&default));
        assert!(effective.contains(&"labels.pod".to_string()));
        for f in &default.ignore_fields {
            assert!(effective.contains(f), "missing inherited ignore {f}");
        }
    }

    #[test]
    fn full_rule_does_not_inherit() {
        let tenant = Uuid::nil();
        let default = DeduplicationRule::default_for_provider(tenant, "prometheus");
        let mut custom = DeduplicationRule::default_for_provider(tenant, "prometheus");
        custom.is_default = false;
        custom.full_deduplication = true;
        custom.ignore_fields = vec!["labels.pod".to_string()];

        assert_eq!(
            effective_ignore_fields(&custom, Some(&default)),
            vec!["labels.pod".to_string()]
        );
    }

    #[test]
    fn annotated_alert_classification() {
        let alert = AlertEvent {
            id: Uuid::new_v4(),
            tenant_id: Uuid::nil(),
            fingerprint: "fp".into(),
            name: "cpu high".into(),
            status: AlertStatus::Firing,
            previous_status: None,
            severity: Severity::High,
            provider_id: None,
            provider_type: "prometheus".into(),
            service: None,
            labels: json!({}),
            payload: json!({}),
            last_received: Utc::now(),
        };
        let annotated = AnnotatedAlert {
            alert,
            content_hash: "h".into(),
            is_full_duplicate: true,
            is_partial_duplicate: false,
        };
        assert_eq!(annotated.classification(), DedupClassification::Full);
    }
}
