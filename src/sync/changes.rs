//! Tag based change feed: given the tag returned by a previous call, fetch
//! everything that changed in the administration since.

use std::collections::{BTreeMap, HashMap, HashSet};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::administration::Administration;
use crate::registry::Registry;
use crate::resource::{
    chunks, diff_resource_versions, id_from_value, resource_id, resource_version, Resource,
    ResourceDiff, ResourceId, ResourceVersion,
};
use crate::resource_type::ResourceType;
use crate::sync::ThrottlePolicy;

/// Remote versions per entity type as of the last fetch. Stored as JSON,
/// `{"PurchaseInvoice": {"1": 3}}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tag(pub BTreeMap<String, BTreeMap<ResourceId, ResourceVersion>>);

impl Tag {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn versions(&self, entity_type: &str) -> Option<&BTreeMap<ResourceId, ResourceVersion>> {
        self.0.get(entity_type)
    }

    /// Puts `ids` back to the version `previous` had for them, or forgets
    /// them, so the next call reports them again.
    pub fn revert(&mut self, previous: Option<&Tag>, entity_type: &str, ids: &[ResourceId]) {
        if ids.is_empty() {
            return;
        }
        let before = previous.and_then(|tag| tag.versions(entity_type));
        let versions = self.0.entry(entity_type.to_string()).or_default();
        for id in ids {
            match before.and_then(|before| before.get(id)) {
                Some(version) => versions.insert(id.clone(), *version),
                None => versions.remove(id),
            };
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdministrationChanges {
    /// The tag to pass to the next call. Only records what was fetched.
    pub tag: Tag,
    /// Diffs in registry order, one per synchronizable type that was reached.
    pub changes: Vec<(String, ResourceDiff)>,
    /// Set when the API throttled and `StopEarly` cut the feed short.
    pub throttled: bool,
}

impl AdministrationChanges {
    pub fn diff(&self, entity_type: &str) -> Option<&ResourceDiff> {
        self.changes
            .iter()
            .find(|(name, _)| name == entity_type)
            .map(|(_, diff)| diff)
    }
}

/// Computes the changes of every synchronizable type since `tag`, or
/// everything when there is no tag.
pub fn get_administration_changes(
    administration: &dyn Administration,
    registry: &Registry,
    tag: Option<&Tag>,
    max_request_size: usize,
    throttle_policy: ThrottlePolicy,
) -> Result<AdministrationChanges> {
    let mut new_tag = tag.cloned().unwrap_or_default();
    let mut result = AdministrationChanges::default();

    for resource_type in registry.synchronizable() {
        let remote = match remote_versions(administration, resource_type) {
            Ok(remote) => remote,
            Err(e) if stop_early(&e, throttle_policy) => {
                log::warn!("Throttled listing {}, stopping early", resource_type.entity_type);
                result.throttled = true;
                break;
            }
            Err(e) => return Err(e),
        };

        let current: HashMap<ResourceId, ResourceVersion> = new_tag
            .versions(resource_type.entity_type)
            .map(|versions| versions.iter().map(|(id, v)| (id.clone(), *v)).collect())
            .unwrap_or_default();
        let version_diff = diff_resource_versions(&current, &remote);

        let (added, throttled) = fetch_resources(
            administration,
            resource_type,
            &version_diff.added,
            max_request_size,
            throttle_policy,
        )?;
        let (changed, more_throttled) = if throttled {
            (Vec::new(), true)
        } else {
            fetch_resources(
                administration,
                resource_type,
                &version_diff.changed,
                max_request_size,
                throttle_policy,
            )?
        };
        result.throttled |= more_throttled;

        let versions = new_tag.0.entry(resource_type.entity_type.to_string()).or_default();
        for id in &version_diff.removed {
            versions.remove(id);
        }
        for resource in added.iter().chain(changed.iter()) {
            if let (Some(id), Some(version)) = (resource_id(resource), resource_version(resource)) {
                versions.insert(id, version);
            }
        }

        result.changes.push((
            resource_type.entity_type.to_string(),
            ResourceDiff {
                added,
                changed,
                removed: version_diff.removed,
            },
        ));

        if result.throttled {
            break;
        }
    }

    result.tag = new_tag;
    Ok(result)
}

/// `GET {api_path}/synchronization` as an id to version map.
pub(crate) fn remote_versions(
    administration: &dyn Administration,
    resource_type: &ResourceType,
) -> Result<HashMap<ResourceId, ResourceVersion>> {
    let listing = administration.get(&resource_type.synchronization_path())?;
    let entries = listing.as_array().ok_or_else(|| {
        anyhow::anyhow!(
            "Expected a list from {}, got {}",
            resource_type.synchronization_path(),
            listing
        )
    })?;
    let mut versions = HashMap::with_capacity(entries.len());
    for entry in entries {
        let id = entry.get("id").and_then(id_from_value);
        let version = entry.get("version").and_then(Value::as_i64);
        match (id, version) {
            (Some(id), Some(version)) => {
                versions.insert(id, version);
            }
            _ => log::warn!(
                "Ignoring malformed {} synchronization entry: {}",
                resource_type.entity_type,
                entry
            ),
        }
    }
    Ok(versions)
}

/// Fetches full payloads in order, at most `max_request_size` per request.
/// The flag is set when throttling stopped the fetch early; the payloads
/// fetched before that are still returned.
pub(crate) fn fetch_resources(
    administration: &dyn Administration,
    resource_type: &ResourceType,
    ids: &[ResourceId],
    max_request_size: usize,
    throttle_policy: ThrottlePolicy,
) -> Result<(Vec<Resource>, bool)> {
    let mut resources = Vec::with_capacity(ids.len());
    for chunk in chunks(ids, max_request_size) {
        let requested: HashSet<&ResourceId> = chunk.iter().collect();
        let response = administration.post(
            &resource_type.synchronization_path(),
            &json!({ "ids": chunk }),
        );
        match response {
            Ok(Value::Array(batch)) => resources.extend(batch.into_iter().filter(|resource| {
                resource_id(resource).is_some_and(|id| requested.contains(&id))
            })),
            Ok(other) => {
                return Err(anyhow::anyhow!(
                    "Expected a list of {} payloads, got {}",
                    resource_type.entity_type,
                    other
                ))
            }
            Err(e) if e.is_throttled() && throttle_policy == ThrottlePolicy::StopEarly => {
                log::warn!(
                    "Throttled fetching {}, keeping {} of {} payloads",
                    resource_type.entity_type,
                    resources.len(),
                    ids.len()
                );
                return Ok((resources, true));
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok((resources, false))
}

pub(crate) fn stop_early(error: &anyhow::Error, throttle_policy: ThrottlePolicy) -> bool {
    throttle_policy == ThrottlePolicy::StopEarly
        && error
            .downcast_ref::<crate::error::AdministrationError>()
            .is_some_and(|e| e.is_throttled())
}
