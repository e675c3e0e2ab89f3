//! Suspension tokens and resolution validation.
//!
//! A suspension resolves at most once. The single-use token is generated
//! with the record and compared in constant time; payloads are checked
//! against the suspension's declared shape before any state changes.

use serde_json::Value;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use shipsec_runtime::SuspensionKind;

use crate::error::ResolveError;
use crate::run::{SuspensionRecord, SuspensionStatus};

/// Generate a fresh single-use resolution token.
pub fn generate_token() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

/// Constant-time token comparison.
pub fn token_matches(expected: &str, supplied: &str) -> bool {
    if expected.len() != supplied.len() {
        return false;
    }
    expected.as_bytes().ct_eq(supplied.as_bytes()).into()
}

/// Validate a resolution attempt against the record without mutating
/// anything.
pub fn validate_resolution(
    record: &SuspensionRecord,
    token: &str,
    payload: &Value,
) -> Result<(), ResolveError> {
    match record.status {
        SuspensionStatus::Pending => {}
        SuspensionStatus::Resolved => {
            return Err(ResolveError::AlreadyResolved(record.id.clone()))
        }
        SuspensionStatus::Expired | SuspensionStatus::Cancelled => {
            return Err(ResolveError::Revoked(record.id.clone()))
        }
    }
    if !token_matches(&record.token, token) {
        return Err(ResolveError::InvalidToken);
    }
    validate_payload(record, payload)
}

fn validate_payload(record: &SuspensionRecord, payload: &Value) -> Result<(), ResolveError> {
    match record.kind {
        SuspensionKind::Approval => {
            let approved = payload.get("approved").map(Value::is_boolean);
            if approved != Some(true) {
                return Err(ResolveError::InvalidPayload(
                    "approval payload requires a boolean 'approved' field".to_string(),
                ));
            }
            Ok(())
        }
        SuspensionKind::Form => {
            let Some(schema) = &record.input_schema else {
                return Ok(());
            };
            let validator = jsonschema_compile(schema)?;
            if let Err(errors) = validator.validate(payload) {
                let detail: Vec<String> = errors.map(|e| e.to_string()).collect();
                return Err(ResolveError::InvalidPayload(detail.join("; ")));
            }
            Ok(())
        }
        SuspensionKind::Timer | SuspensionKind::Webhook => Ok(()),
    }
}

fn jsonschema_compile(schema: &Value) -> Result<jsonschema::JSONSchema, ResolveError> {
    jsonschema::JSONSchema::compile(schema)
        .map_err(|e| ResolveError::InvalidPayload(format!("declared input schema is invalid: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn record(kind: SuspensionKind, status: SuspensionStatus) -> SuspensionRecord {
        SuspensionRecord {
            id: "s-1".to_string(),
            run_id: "run-1".to_string(),
            node_id: "gate".to_string(),
            child: None,
            kind,
            title: "Deploy?".to_string(),
            description: None,
            input_schema: None,
            context: Value::Null,
            timeout_at: None,
            token: generate_token(),
            status,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_token_generation_is_unique_and_long() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_token_matching() {
        let token = generate_token();
        assert!(token_matches(&token, &token));
        assert!(!token_matches(&token, "short"));
        assert!(!token_matches(&token, &generate_token()));
    }

    #[test]
    fn test_validate_approval_payload() {
        let record = record(SuspensionKind::Approval, SuspensionStatus::Pending);
        let token = record.token.clone();
        assert!(validate_resolution(&record, &token, &json!({"approved": true})).is_ok());
        assert!(matches!(
            validate_resolution(&record, &token, &json!({"approved": "yes"})),
            Err(ResolveError::InvalidPayload(_))
        ));
        assert!(matches!(
            validate_resolution(&record, &token, &json!({})),
            Err(ResolveError::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_validate_form_payload_against_schema() {
        let mut record = record(SuspensionKind::Form, SuspensionStatus::Pending);
        record.input_schema = Some(json!({
            "type": "object",
            "required": ["severity"],
            "properties": {"severity": {"type": "string"}}
        }));
        let token = record.token.clone();
        assert!(validate_resolution(&record, &token, &json!({"severity": "high"})).is_ok());
        assert!(matches!(
            validate_resolution(&record, &token, &json!({"other": 1})),
            Err(ResolveError::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_resolution_state_gating() {
        let resolved = record(SuspensionKind::Approval, SuspensionStatus::Resolved);
        let token = resolved.token.clone();
        assert!(matches!(
            validate_resolution(&resolved, &token, &json!({"approved": true})),
            Err(ResolveError::AlreadyResolved(_))
        ));

        let expired = record(SuspensionKind::Approval, SuspensionStatus::Expired);
        let token = expired.token.clone();
        assert!(matches!(
            validate_resolution(&expired, &token, &json!({"approved": true})),
            Err(ResolveError::Revoked(_))
        ));
    }

    #[test]
    fn test_wrong_token_rejected_before_payload() {
        let record = record(SuspensionKind::Approval, SuspensionStatus::Pending);
        assert!(matches!(
            validate_resolution(&record, "forged", &json!({"approved": true})),
            Err(ResolveError::InvalidToken)
        ));
    }
}
