mod https_administration;
mod mock_administration;

pub use https_administration::HttpsAdministration;
pub use mock_administration::{MockAdministration, RecordedRequest};

use serde_json::Value;

use crate::error::AdministrationError;

pub const DEFAULT_API_BASE_URL: &str = "https://moneybird.com/api/v2";

/// A Moneybird administration: the tenant scope every resource path lives
/// under. Paths are relative, e.g. `documents/purchase_invoices/synchronization`.
pub trait Administration: Send + Sync {
    fn get(&self, resource_path: &str) -> Result<Value, AdministrationError>;
    fn post(&self, resource_path: &str, data: &Value) -> Result<Value, AdministrationError>;
    fn patch(&self, resource_path: &str, data: &Value) -> Result<Value, AdministrationError>;
    fn delete(&self, resource_path: &str) -> Result<Option<Value>, AdministrationError>;
}

pub fn validate_resource_path(resource_path: &str) -> Result<(), AdministrationError> {
    if resource_path.starts_with('/') {
        return Err(AdministrationError::InvalidResourcePath(
            resource_path.to_string(),
        ));
    }
    Ok(())
}

/// Builds `{api_base_url}/{administration_id}/{resource_path}.json`.
pub fn build_url(
    api_base_url: &str,
    administration_id: u64,
    resource_path: &str,
) -> Result<String, AdministrationError> {
    validate_resource_path(resource_path)?;
    Ok(format!(
        "{}/{}/{}.json",
        api_base_url.trim_end_matches('/'),
        administration_id,
        resource_path
    ))
}

/// Turns a raw status and body into either the decoded JSON or a typed error.
/// Empty success bodies (204) decode to `Value::Null`.
pub fn process_response(status: u16, body: &[u8]) -> Result<Value, AdministrationError> {
    match status {
        200 | 201 | 204 => {
            if body.iter().all(u8::is_ascii_whitespace) {
                return Ok(Value::Null);
            }
            Ok(serde_json::from_slice(body)?)
        }
        _ => {
            let description = serde_json::from_slice::<Value>(body)
                .ok()
                .and_then(|v| v.get("error").map(error_description));
            Err(AdministrationError::from_status(status, description))
        }
    }
}

fn error_description(error: &Value) -> String {
    match error {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_url_appends_json_suffix() -> anyhow::Result<()> {
        assert_eq!(
            build_url(DEFAULT_API_BASE_URL, 3, "test")?,
            "https://moneybird.com/api/v2/3/test.json"
        );
        assert_eq!(
            build_url("http://localhost:8080/", 42, "documents/receipts/synchronization")?,
            "http://localhost:8080/42/documents/receipts/synchronization.json"
        );
        Ok(())
    }

    #[test]
    fn build_url_rejects_leading_slash() {
        for administration_id in [0, 3, u64::MAX] {
            let result = build_url(DEFAULT_API_BASE_URL, administration_id, "/leading");
            assert!(matches!(
                result,
                Err(AdministrationError::InvalidResourcePath(_))
            ));
        }
    }

    #[test]
    fn process_response_success() -> anyhow::Result<()> {
        let value = process_response(200, br#"[{"id": "1", "version": 3}]"#)?;
        assert_eq!(value[0]["version"], 3);
        assert_eq!(process_response(204, b"")?, Value::Null);
        assert_eq!(process_response(201, br#"{"id": "7"}"#)?["id"], "7");
        Ok(())
    }

    #[test]
    fn process_response_reads_error_description() {
        let error = process_response(422, br#"{"error": "Contact is required"}"#).unwrap_err();
        assert!(matches!(error, AdministrationError::InvalidData(_)));
        assert_eq!(error.description(), Some("Contact is required"));

        let error = process_response(404, b"<html>not found</html>").unwrap_err();
        assert!(error.is_not_found());
        assert_eq!(error.description(), None);
    }

    #[test]
    fn process_response_unknown_status() {
        let error = process_response(302, b"").unwrap_err();
        assert!(matches!(error, AdministrationError::UnknownStatus(_)));
        assert_eq!(error.status(), Some(302));
    }

    #[test]
    fn process_response_structured_error() {
        let error = process_response(422, br#"{"error": {"contact": ["is required"]}}"#).unwrap_err();
        assert_eq!(error.description(), Some(r#"{"contact":["is required"]}"#));
    }
}
