//! Incoming webhook handling and webhook registration.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::administration::Administration;
use crate::db::Db;
use crate::error::WebhookError;
use crate::registry::Registry;
use crate::resource::{id_from_value, resource_id, ResourceDiff};
use crate::sync::{apply_diff, ApplyReport};

const WEBHOOKS_PATH: &str = "webhooks";
const TEST_WEBHOOK_ACTION: &str = "test_webhook";

/// What incoming webhooks must match to be accepted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub webhook_id: String,
    pub webhook_token: String,
    pub administration_id: u64,
    /// Subscribed events, either full actions (`sales_invoice_created`) or
    /// their prefix (`sales_invoice`). Empty accepts every action.
    pub events: Vec<String>,
    /// Allows registering a plain `http://` endpoint.
    pub allow_insecure: bool,
}

impl WebhookConfig {
    fn subscribed(&self, action: &str) -> bool {
        self.events.is_empty()
            || self.events.iter().any(|event| {
                action == event
                    || action
                        .strip_prefix(event.as_str())
                        .is_some_and(|rest| rest.starts_with('_'))
            })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPayload {
    pub webhook_id: Value,
    pub webhook_token: String,
    pub administration_id: Value,
    pub action: String,
    #[serde(default)]
    pub entity_type: String,
    #[serde(default)]
    pub entity_id: Option<Value>,
    #[serde(default)]
    pub entity: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WebhookOutcome {
    /// A `test_webhook` ping. Nothing was changed.
    Acknowledged,
    Applied(ApplyReport),
}

/// A webhook registered with the administration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Webhook {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub events: Vec<String>,
    /// Only returned when the webhook is created.
    #[serde(default)]
    pub token: Option<String>,
}

/// Validates a webhook and applies the entity it carries to the local
/// mirror. Payloads without an entity, or whose action destroys it, remove
/// the local row.
pub fn process_webhook_payload(
    db: &Db,
    registry: &Registry,
    config: &WebhookConfig,
    payload: &Value,
) -> Result<WebhookOutcome, WebhookError> {
    let payload: WebhookPayload = serde_json::from_value(payload.clone())?;

    if id_from_value(&payload.webhook_id).as_deref() != Some(config.webhook_id.as_str()) {
        log::warn!("Received webhook with wrong id");
        return Err(WebhookError::WrongWebhookId);
    }
    if payload.webhook_token != config.webhook_token {
        log::warn!("Received webhook with wrong token");
        return Err(WebhookError::WrongToken);
    }
    let administration_id = id_from_value(&payload.administration_id).unwrap_or_default();
    if administration_id != config.administration_id.to_string() {
        log::warn!("Received webhook for administration {}", administration_id);
        return Err(WebhookError::WrongAdministration(administration_id));
    }
    if payload.action == TEST_WEBHOOK_ACTION {
        log::info!("Received test webhook");
        return Ok(WebhookOutcome::Acknowledged);
    }
    if !config.subscribed(&payload.action) {
        log::warn!("Received webhook with unknown event {}", payload.action);
        return Err(WebhookError::UnknownEvent(payload.action));
    }

    let resource_type = registry
        .for_entity_type(&payload.entity_type)
        .ok_or_else(|| WebhookError::UnknownEntityType(payload.entity_type.clone()))?;

    let entity = payload
        .entity
        .filter(|entity| entity.as_object().is_some_and(|object| !object.is_empty()));
    let destroyed = payload.action.ends_with("_destroyed") || payload.action.ends_with("_deleted");
    let diff = match entity {
        Some(entity) if !destroyed => ResourceDiff {
            changed: vec![entity],
            ..Default::default()
        },
        entity => {
            let id = entity
                .as_ref()
                .and_then(resource_id)
                .or_else(|| payload.entity_id.as_ref().and_then(id_from_value))
                .ok_or(WebhookError::MissingEntity)?;
            ResourceDiff {
                removed: vec![id],
                ..Default::default()
            }
        }
    };

    log::debug!("WEBHOOK {} for {}", payload.action, resource_type.entity_type);
    Ok(WebhookOutcome::Applied(apply_diff(db, resource_type, &diff)?))
}

/// Subscribes `url` to `events`. Plain `http://` endpoints are refused
/// unless `allow_insecure` is set.
pub fn register_webhook(
    administration: &dyn Administration,
    url: &str,
    events: &[String],
    allow_insecure: bool,
) -> Result<Webhook, WebhookError> {
    if url.starts_with("http://") && !allow_insecure {
        log::warn!("Webhook endpoint {} is not secure", url);
        return Err(WebhookError::InsecureEndpoint(url.to_string()));
    }
    let response = administration.post(WEBHOOKS_PATH, &json!({"url": url, "events": events}))?;
    Ok(serde_json::from_value(response)?)
}

pub fn list_webhooks(administration: &dyn Administration) -> Result<Vec<Webhook>, WebhookError> {
    let response = administration.get(WEBHOOKS_PATH)?;
    Ok(serde_json::from_value(response)?)
}

pub fn delete_webhook(administration: &dyn Administration, webhook_id: &str) -> Result<(), WebhookError> {
    administration.delete(&format!("{}/{}", WEBHOOKS_PATH, webhook_id))?;
    Ok(())
}

fn deserialize_id<'de, D: serde::Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let value = Value::deserialize(deserializer)?;
    id_from_value(&value).ok_or_else(|| serde::de::Error::custom("expected a string or integer id"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounting;
    use crate::administration::MockAdministration;

    fn config() -> WebhookConfig {
        WebhookConfig {
            webhook_id: "900".to_string(),
            webhook_token: "secret".to_string(),
            administration_id: 123,
            events: vec!["contact".to_string(), "sales_invoice_created".to_string()],
            allow_insecure: false,
        }
    }

    fn payload(action: &str, entity: Value) -> Value {
        json!({
            "webhook_id": "900",
            "webhook_token": "secret",
            "administration_id": 123,
            "action": action,
            "entity_type": "Contact",
            "entity_id": "5",
            "entity": entity
        })
    }

    fn contact_names(db: &Db) -> anyhow::Result<Vec<Option<String>>> {
        db.transaction(|t| {
            Ok(t.query_records("SELECT * FROM contacts ORDER BY id", [])?
                .into_iter()
                .map(|r| r.get_str("company_name").map(str::to_string))
                .collect())
        })
    }

    #[test]
    fn applies_and_removes_entities() -> anyhow::Result<()> {
        let db = accounting::open_memory_database()?;
        let registry = accounting::registry();

        let outcome = process_webhook_payload(
            &db,
            &registry,
            &config(),
            &payload("contact_created", json!({"id": "5", "version": 1, "company_name": "Landolfio"})),
        )?;
        assert!(matches!(outcome, WebhookOutcome::Applied(report) if report.created == 1));

        process_webhook_payload(
            &db,
            &registry,
            &config(),
            &payload("contact_changed", json!({"id": "5", "version": 2, "company_name": "Landolfio BV"})),
        )?;
        assert_eq!(contact_names(&db)?, vec![Some("Landolfio BV".to_string())]);

        let outcome = process_webhook_payload(&db, &registry, &config(), &payload("contact_destroyed", json!({})))?;
        assert!(matches!(outcome, WebhookOutcome::Applied(report) if report.deleted == 1));
        assert!(contact_names(&db)?.is_empty());
        Ok(())
    }

    #[test]
    fn rejects_foreign_webhooks() -> anyhow::Result<()> {
        let db = accounting::open_memory_database()?;
        let registry = accounting::registry();
        let entity = json!({"id": "5", "version": 1});

        let mut wrong_token = payload("contact_created", entity.clone());
        wrong_token["webhook_token"] = json!("guess");
        assert!(matches!(
            process_webhook_payload(&db, &registry, &config(), &wrong_token),
            Err(WebhookError::WrongToken)
        ));

        let mut wrong_administration = payload("contact_created", entity.clone());
        wrong_administration["administration_id"] = json!("456");
        assert!(matches!(
            process_webhook_payload(&db, &registry, &config(), &wrong_administration),
            Err(WebhookError::WrongAdministration(id)) if id == "456"
        ));

        assert!(matches!(
            process_webhook_payload(&db, &registry, &config(), &payload("sales_invoice_paid", entity.clone())),
            Err(WebhookError::UnknownEvent(_))
        ));

        let mut unknown_type = payload("contact_created", entity);
        unknown_type["entity_type"] = json!("Estimate");
        assert!(matches!(
            process_webhook_payload(&db, &registry, &config(), &unknown_type),
            Err(WebhookError::UnknownEntityType(_))
        ));

        assert!(matches!(
            process_webhook_payload(&db, &registry, &config(), &json!({"action": "contact_created"})),
            Err(WebhookError::Malformed(_))
        ));
        assert!(contact_names(&db)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_webhook_is_acknowledged() -> anyhow::Result<()> {
        let db = accounting::open_memory_database()?;
        let outcome = process_webhook_payload(
            &db,
            &accounting::registry(),
            &config(),
            &payload(TEST_WEBHOOK_ACTION, Value::Null),
        )?;
        assert_eq!(outcome, WebhookOutcome::Acknowledged);
        Ok(())
    }

    #[test]
    fn registration() -> anyhow::Result<()> {
        let administration = MockAdministration::new();
        let events = vec!["contact".to_string()];

        assert!(matches!(
            register_webhook(&administration, "http://localhost:8000/webhook", &events, false),
            Err(WebhookError::InsecureEndpoint(_))
        ));
        assert!(administration.requests()?.is_empty());

        let webhook = register_webhook(&administration, "https://example.com/webhook", &events, false)?;
        assert_eq!(webhook.url, "https://example.com/webhook");
        assert_eq!(webhook.events, events);
        assert_eq!(list_webhooks(&administration)?, vec![webhook.clone()]);

        delete_webhook(&administration, &webhook.id)?;
        assert!(list_webhooks(&administration)?.is_empty());
        Ok(())
    }
}
