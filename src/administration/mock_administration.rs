use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::{json, Map, Value};

use super::{validate_resource_path, Administration};
use crate::error::{AdministrationError, ApiError};
use crate::resource::{resource_id, Resource, ResourceId};

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub body: Option<Value>,
}

#[derive(Default)]
struct MockState {
    collections: HashMap<String, Vec<Resource>>,
    requests: Vec<RecordedRequest>,
    throttle_after: Option<usize>,
    next_id: u64,
}

/// In-memory administration. Collections are keyed by api path
/// (`contacts`, `documents/purchase_invoices`, ...). Clones share state.
#[derive(Clone, Default)]
pub struct MockAdministration {
    state: Arc<RwLock<MockState>>,
}

enum Route {
    Synchronization(String),
    Collection(String),
    Item(String, ResourceId),
}

const LINE_ATTRIBUTES_SUFFIX: &str = "_attributes";

impl MockAdministration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a resource in a collection, keyed by its id.
    pub fn insert(&self, api_path: &str, resource: Resource) -> anyhow::Result<()> {
        let id = resource_id(&resource)
            .ok_or_else(|| anyhow::anyhow!("Mock resource has no id: {}", resource))?;
        let mut state = self.write()?;
        let collection = state.collections.entry(api_path.to_string()).or_default();
        match collection.iter_mut().find(|r| resource_id(r).as_ref() == Some(&id)) {
            Some(existing) => *existing = resource,
            None => collection.push(resource),
        }
        Ok(())
    }

    /// Registers an empty collection so item lookups on it resolve.
    pub fn add_collection(&self, api_path: &str) -> anyhow::Result<()> {
        self.write()?
            .collections
            .entry(api_path.to_string())
            .or_default();
        Ok(())
    }

    pub fn remove(&self, api_path: &str, id: &str) -> anyhow::Result<()> {
        if let Some(collection) = self.write()?.collections.get_mut(api_path) {
            collection.retain(|r| resource_id(r).as_deref() != Some(id));
        }
        Ok(())
    }

    pub fn resource(&self, api_path: &str, id: &str) -> anyhow::Result<Option<Resource>> {
        Ok(self
            .read()?
            .collections
            .get(api_path)
            .and_then(|c| c.iter().find(|r| resource_id(r).as_deref() == Some(id)))
            .cloned())
    }

    pub fn resources(&self, api_path: &str) -> anyhow::Result<Vec<Resource>> {
        Ok(self
            .read()?
            .collections
            .get(api_path)
            .cloned()
            .unwrap_or_default())
    }

    /// Every request after the first `request_count` answers 429.
    pub fn throttle_after(&self, request_count: usize) -> anyhow::Result<()> {
        self.write()?.throttle_after = Some(request_count);
        Ok(())
    }

    pub fn requests(&self) -> anyhow::Result<Vec<RecordedRequest>> {
        Ok(self.read()?.requests.clone())
    }

    pub fn clear_requests(&self) -> anyhow::Result<()> {
        self.write()?.requests.clear();
        Ok(())
    }

    fn read(&self) -> anyhow::Result<std::sync::RwLockReadGuard<'_, MockState>> {
        self.state
            .read()
            .map_err(|_| anyhow::anyhow!("Failed to acquire read lock"))
    }

    fn write(&self) -> anyhow::Result<std::sync::RwLockWriteGuard<'_, MockState>> {
        self.state
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to acquire write lock"))
    }

    fn handle(
        &self,
        method: &str,
        resource_path: &str,
        body: Option<&Value>,
    ) -> Result<Value, AdministrationError> {
        validate_resource_path(resource_path)?;
        let mut state = self
            .state
            .write()
            .map_err(|_| server_error("mock state poisoned"))?;

        state.requests.push(RecordedRequest {
            method: method.to_string(),
            path: resource_path.to_string(),
            body: body.cloned(),
        });
        if let Some(limit) = state.throttle_after {
            if state.requests.len() > limit {
                return Err(AdministrationError::Throttled(ApiError::new(
                    429,
                    Some("Too many requests".to_string()),
                )));
            }
        }

        let route = state.route(resource_path);
        match (method, route) {
            ("GET", Route::Synchronization(path)) => Ok(Value::Array(
                state
                    .collection(&path)
                    .iter()
                    .map(|r| json!({"id": r["id"], "version": r["version"]}))
                    .collect(),
            )),
            ("POST", Route::Synchronization(path)) => {
                let ids: Vec<ResourceId> = body
                    .and_then(|b| b.get("ids"))
                    .and_then(Value::as_array)
                    .map(|ids| ids.iter().filter_map(crate::resource::id_from_value).collect())
                    .unwrap_or_default();
                Ok(Value::Array(
                    state
                        .collection(&path)
                        .iter()
                        .filter(|r| resource_id(r).is_some_and(|id| ids.contains(&id)))
                        .cloned()
                        .collect(),
                ))
            }
            ("GET", Route::Collection(path)) => Ok(Value::Array(state.collection(&path))),
            ("GET", Route::Item(path, id)) => state.find(&path, &id).cloned().ok_or_else(not_found),
            ("POST", Route::Collection(path)) => {
                let attributes = unwrap_envelope(body)?;
                state.next_id += 1;
                let id = state.next_id.to_string();
                let mut resource = Map::new();
                resource.insert("id".to_string(), Value::String(id));
                resource.insert("version".to_string(), json!(1));
                let mut resource = Value::Object(resource);
                merge_attributes(&mut resource, &attributes, &mut state.next_id);
                state
                    .collections
                    .entry(path)
                    .or_default()
                    .push(resource.clone());
                Ok(resource)
            }
            ("PATCH", Route::Item(path, id)) => {
                let attributes = unwrap_envelope(body)?;
                let MockState {
                    collections,
                    next_id,
                    ..
                } = &mut *state;
                let resource = collections
                    .get_mut(&path)
                    .and_then(|c| c.iter_mut().find(|r| resource_id(r).as_deref() == Some(id.as_str())))
                    .ok_or_else(not_found)?;
                merge_attributes(resource, &attributes, next_id);
                let version = resource["version"].as_i64().unwrap_or(0) + 1;
                resource["version"] = json!(version);
                Ok(resource.clone())
            }
            ("DELETE", Route::Item(path, id)) => {
                let collection = state.collections.get_mut(&path).ok_or_else(not_found)?;
                let before = collection.len();
                collection.retain(|r| resource_id(r).as_deref() != Some(id.as_str()));
                if collection.len() == before {
                    return Err(not_found());
                }
                Ok(Value::Null)
            }
            _ => Err(not_found()),
        }
    }
}

impl MockState {
    fn route(&self, resource_path: &str) -> Route {
        if let Some(path) = resource_path.strip_suffix("/synchronization") {
            return Route::Synchronization(path.to_string());
        }
        if self.collections.contains_key(resource_path) {
            return Route::Collection(resource_path.to_string());
        }
        match resource_path.rsplit_once('/') {
            Some((path, id)) if self.collections.contains_key(path) => {
                Route::Item(path.to_string(), id.to_string())
            }
            _ => Route::Collection(resource_path.to_string()),
        }
    }

    fn collection(&self, path: &str) -> Vec<Resource> {
        self.collections.get(path).cloned().unwrap_or_default()
    }

    fn find(&self, path: &str, id: &str) -> Option<&Resource> {
        self.collections
            .get(path)?
            .iter()
            .find(|r| resource_id(r).as_deref() == Some(id))
    }
}

/// Write bodies look like `{"contact": {...}}`; returns the inner object.
/// Bodies without an envelope, like webhook registrations, are taken as is.
fn unwrap_envelope(body: Option<&Value>) -> Result<Map<String, Value>, AdministrationError> {
    let body = body.and_then(Value::as_object).ok_or_else(|| {
        AdministrationError::InvalidData(ApiError::new(
            422,
            Some("Request body must be a JSON object".to_string()),
        ))
    })?;
    match body.values().next() {
        Some(Value::Object(inner)) if body.len() == 1 => Ok(inner.clone()),
        _ => Ok(body.clone()),
    }
}

/// Merges written attributes into a stored resource. `<key>_attributes` lists
/// edit the nested `<key>` lines: entries with `_destroy` are removed, entries
/// with a known id are merged, the rest are appended with a fresh id.
fn merge_attributes(resource: &mut Value, attributes: &Map<String, Value>, next_id: &mut u64) {
    for (key, value) in attributes {
        let Some(lines_key) = key.strip_suffix(LINE_ATTRIBUTES_SUFFIX) else {
            resource[key.as_str()] = value.clone();
            continue;
        };
        if !resource[lines_key].is_array() {
            resource[lines_key] = Value::Array(Vec::new());
        }
        let Some(lines) = resource[lines_key].as_array_mut() else {
            continue;
        };
        for line in value.as_array().map(Vec::as_slice).unwrap_or_default() {
            let line_id = resource_id(line);
            let destroy = line.get("_destroy").and_then(Value::as_bool).unwrap_or(false);
            let position = line_id
                .as_ref()
                .and_then(|id| lines.iter().position(|l| resource_id(l).as_ref() == Some(id)));
            match (position, destroy) {
                (Some(index), true) => {
                    lines.remove(index);
                }
                (Some(index), false) => {
                    if let (Some(existing), Some(update)) =
                        (lines[index].as_object_mut(), line.as_object())
                    {
                        for (k, v) in update {
                            existing.insert(k.clone(), v.clone());
                        }
                    }
                }
                (None, true) => {}
                (None, false) => {
                    *next_id += 1;
                    let mut new_line = line.clone();
                    new_line["id"] = Value::String(next_id.to_string());
                    lines.push(new_line);
                }
            }
        }
    }
}

fn not_found() -> AdministrationError {
    AdministrationError::NotFound(ApiError::new(404, Some("Resource not found".to_string())))
}

fn server_error(description: &str) -> AdministrationError {
    AdministrationError::ServerError(ApiError::new(500, Some(description.to_string())))
}

impl Administration for MockAdministration {
    fn get(&self, resource_path: &str) -> Result<Value, AdministrationError> {
        self.handle("GET", resource_path, None)
    }

    fn post(&self, resource_path: &str, data: &Value) -> Result<Value, AdministrationError> {
        self.handle("POST", resource_path, Some(data))
    }

    fn patch(&self, resource_path: &str, data: &Value) -> Result<Value, AdministrationError> {
        self.handle("PATCH", resource_path, Some(data))
    }

    fn delete(&self, resource_path: &str) -> Result<Option<Value>, AdministrationError> {
        let value = self.handle("DELETE", resource_path, None)?;
        Ok(if value.is_null() { None } else { Some(value) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn administration() -> anyhow::Result<MockAdministration> {
        let administration = MockAdministration::new();
        administration.insert(
            "documents/purchase_invoices",
            json!({"id": "1", "version": 3, "details": [{"id": "11", "description": "a"}]}),
        )?;
        administration.insert(
            "documents/purchase_invoices",
            json!({"id": "2", "version": 5, "details": []}),
        )?;
        Ok(administration)
    }

    #[test]
    fn synchronization_endpoints() -> anyhow::Result<()> {
        let administration = administration()?;
        let versions = administration.get("documents/purchase_invoices/synchronization")?;
        assert_eq!(
            versions,
            json!([{"id": "1", "version": 3}, {"id": "2", "version": 5}])
        );

        let documents = administration.post(
            "documents/purchase_invoices/synchronization",
            &json!({"ids": ["2"]}),
        )?;
        assert_eq!(documents.as_array().map(Vec::len), Some(1));
        assert_eq!(documents[0]["id"], "2");

        let unknown = administration.get("documents/receipts/synchronization")?;
        assert_eq!(unknown, json!([]));
        Ok(())
    }

    #[test]
    fn create_patch_and_delete() -> anyhow::Result<()> {
        let administration = MockAdministration::new();
        let created = administration.post(
            "contacts",
            &json!({"contact": {"company_name": "Landolfio"}}),
        )?;
        let id = resource_id(&created).ok_or_else(|| anyhow::anyhow!("no id"))?;
        assert_eq!(created["version"], 1);

        let patched = administration.patch(
            &format!("contacts/{}", id),
            &json!({"contact": {"company_name": "Landolfio BV"}}),
        )?;
        assert_eq!(patched["company_name"], "Landolfio BV");
        assert_eq!(patched["version"], 2);

        assert_eq!(administration.delete(&format!("contacts/{}", id))?, None);
        let result = administration.get(&format!("contacts/{}", id));
        assert!(matches!(result, Err(AdministrationError::NotFound(_))));
        Ok(())
    }

    #[test]
    fn line_attributes_edit_nested_lines() -> anyhow::Result<()> {
        let administration = administration()?;
        let patched = administration.patch(
            "documents/purchase_invoices/1",
            &json!({"purchase_invoice": {"details_attributes": [
                {"id": "11", "_destroy": true},
                {"description": "new line"}
            ]}}),
        )?;
        let details = patched["details"].as_array().cloned().unwrap_or_default();
        assert_eq!(details.len(), 1);
        assert_eq!(details[0]["description"], "new line");
        assert!(resource_id(&details[0]).is_some());
        assert_eq!(patched["version"], 4);
        Ok(())
    }

    #[test]
    fn throttles_after_limit() -> anyhow::Result<()> {
        let administration = administration()?;
        administration.throttle_after(1)?;
        administration.get("documents/purchase_invoices/synchronization")?;
        let result = administration.get("documents/purchase_invoices/synchronization");
        assert!(matches!(result, Err(AdministrationError::Throttled(_))));
        assert_eq!(administration.requests()?.len(), 2);
        Ok(())
    }

    #[test]
    fn rejects_leading_slash() {
        let administration = MockAdministration::new();
        let result = administration.get("/contacts");
        assert!(matches!(
            result,
            Err(AdministrationError::InvalidResourcePath(_))
        ));
    }
}
