//! Remote resource identities, versions and the diffs computed between them.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque identifier assigned by Moneybird.
pub type ResourceId = String;

/// Coarse change token. Increases whenever the remote content changes.
pub type ResourceVersion = i64;

/// A full resource payload as returned by the API.
pub type Resource = Value;

/// Local view of resource versions. `None` marks a row that was never synced,
/// e.g. a stub created while resolving a reference.
pub type VersionMap = HashMap<ResourceId, Option<ResourceVersion>>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceVersionDiff {
    pub added: Vec<ResourceId>,
    pub changed: Vec<ResourceId>,
    pub removed: Vec<ResourceId>,
}

impl ResourceVersionDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceDiff {
    pub added: Vec<Resource>,
    pub changed: Vec<Resource>,
    pub removed: Vec<ResourceId>,
}

impl ResourceDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }
}

/// Reads the `id` of a payload. Moneybird sends ids as strings, but integer ids
/// are accepted and normalized to their decimal form.
pub fn resource_id(resource: &Resource) -> Option<ResourceId> {
    id_from_value(resource.get("id")?)
}

pub fn resource_version(resource: &Resource) -> Option<ResourceVersion> {
    resource.get("version").and_then(Value::as_i64)
}

pub(crate) fn id_from_value(value: &Value) -> Option<ResourceId> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Compares two version maps. A version that differs in either direction counts
/// as changed, so a remote correction that lowers a version is never skipped.
/// Ids present on both sides with the same version are in none of the sets.
pub fn diff_resource_versions<O, N>(
    old: &HashMap<ResourceId, O>,
    new: &HashMap<ResourceId, N>,
) -> ResourceVersionDiff
where
    O: VersionLike,
    N: VersionLike,
{
    let mut diff = ResourceVersionDiff::default();

    for (id, new_version) in new {
        match old.get(id) {
            None => diff.added.push(id.clone()),
            Some(old_version) if old_version.version() != new_version.version() => {
                diff.changed.push(id.clone())
            }
            Some(_) => {}
        }
    }

    diff.removed = old
        .keys()
        .filter(|id| !new.contains_key(*id))
        .cloned()
        .collect();

    diff
}

/// Lets version maps with plain and optional versions be compared.
pub trait VersionLike {
    fn version(&self) -> Option<ResourceVersion>;
}

impl VersionLike for ResourceVersion {
    fn version(&self) -> Option<ResourceVersion> {
        Some(*self)
    }
}

impl VersionLike for Option<ResourceVersion> {
    fn version(&self) -> Option<ResourceVersion> {
        *self
    }
}

/// Membership-only diff for resources without a synchronization endpoint.
/// Every remote resource that also exists locally is treated as changed.
pub fn diff_resources(old: &[ResourceId], new: Vec<Resource>) -> ResourceDiff {
    let old_ids: HashSet<&ResourceId> = old.iter().collect();
    let mut new_ids = HashSet::new();
    let mut diff = ResourceDiff::default();

    for resource in new {
        let Some(id) = resource_id(&resource) else {
            log::warn!("Ignoring remote resource without an id: {}", resource);
            continue;
        };
        if old_ids.contains(&id) {
            diff.changed.push(resource);
        } else {
            diff.added.push(resource);
        }
        new_ids.insert(id);
    }

    diff.removed = old
        .iter()
        .filter(|id| !new_ids.contains(*id))
        .cloned()
        .collect();

    diff
}

/// Splits `items` into consecutive chunks of at most `chunk_size`, in order.
pub fn chunks<T: Clone>(items: &[T], chunk_size: usize) -> Vec<Vec<T>> {
    items
        .chunks(chunk_size.max(1))
        .map(|chunk| chunk.to_vec())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn versions(pairs: &[(&str, i64)]) -> HashMap<ResourceId, ResourceVersion> {
        pairs.iter().map(|(id, v)| (id.to_string(), *v)).collect()
    }

    fn sorted(mut ids: Vec<ResourceId>) -> Vec<ResourceId> {
        ids.sort();
        ids
    }

    #[test]
    fn version_decrease_counts_as_changed() {
        let diff = diff_resource_versions(&versions(&[("1", 5)]), &versions(&[("1", 3)]));
        assert_eq!(diff.changed, vec!["1".to_string()]);
        assert!(diff.added.is_empty());
        assert!(diff.removed.is_empty());
    }

    #[test]
    fn everything_removed() {
        let diff = diff_resource_versions(&versions(&[("1", 3), ("2", 7)]), &versions(&[]));
        assert_eq!(sorted(diff.removed), vec!["1".to_string(), "2".to_string()]);
        assert!(diff.added.is_empty());
        assert!(diff.changed.is_empty());
    }

    #[test]
    fn unchanged_ids_are_excluded() {
        let old = versions(&[("1", 1), ("2", 2), ("3", 3)]);
        let new = versions(&[("1", 1), ("2", 4), ("4", 1)]);
        let diff = diff_resource_versions(&old, &new);
        assert_eq!(diff.added, vec!["4".to_string()]);
        assert_eq!(diff.changed, vec!["2".to_string()]);
        assert_eq!(diff.removed, vec!["3".to_string()]);
    }

    #[test]
    fn never_synced_local_version_is_changed() {
        let old: VersionMap = [("1".to_string(), None), ("2".to_string(), Some(2))]
            .into_iter()
            .collect();
        let new = versions(&[("1", 1), ("2", 2)]);
        let diff = diff_resource_versions(&old, &new);
        assert_eq!(diff.changed, vec!["1".to_string()]);
    }

    #[test]
    fn diff_partitions_all_ids() {
        // A small deterministic spread of maps with overlapping ids.
        for seed in 0..50i64 {
            let old: HashMap<ResourceId, ResourceVersion> = (0..20)
                .filter(|i| (i * 7 + seed) % 3 != 0)
                .map(|i| (i.to_string(), (i * seed) % 4))
                .collect();
            let new: HashMap<ResourceId, ResourceVersion> = (0..20)
                .filter(|i| (i * 5 + seed) % 4 != 0)
                .map(|i| (i.to_string(), (i + seed) % 4))
                .collect();
            let diff = diff_resource_versions(&old, &new);

            let added: HashSet<_> = diff.added.iter().cloned().collect();
            let changed: HashSet<_> = diff.changed.iter().cloned().collect();
            let removed: HashSet<_> = diff.removed.iter().cloned().collect();
            assert!(added.is_disjoint(&changed));
            assert!(added.is_disjoint(&removed));
            assert!(changed.is_disjoint(&removed));

            let unchanged: HashSet<_> = old
                .iter()
                .filter(|(id, v)| new.get(*id) == Some(*v))
                .map(|(id, _)| id.clone())
                .collect();
            let mut union: HashSet<_> = added.union(&changed).cloned().collect();
            union.extend(removed);
            union.extend(unchanged);
            let all: HashSet<_> = old.keys().chain(new.keys()).cloned().collect();
            assert_eq!(union, all);
        }
    }

    #[test]
    fn membership_diff() {
        let old = vec!["1".to_string(), "2".to_string()];
        let new = vec![json!({"id": "2", "name": "b"}), json!({"id": 3, "name": "c"})];
        let diff = diff_resources(&old, new);
        assert_eq!(diff.added, vec![json!({"id": 3, "name": "c"})]);
        assert_eq!(diff.changed, vec![json!({"id": "2", "name": "b"})]);
        assert_eq!(diff.removed, vec!["1".to_string()]);
    }

    #[test]
    fn chunking_preserves_order() {
        let ids: Vec<String> = (0..250).map(|i| i.to_string()).collect();
        let chunked = chunks(&ids, 100);
        assert_eq!(
            chunked.iter().map(Vec::len).collect::<Vec<_>>(),
            vec![100, 100, 50]
        );
        assert_eq!(chunked.concat(), ids);

        assert!(chunks::<String>(&[], 100).is_empty());
        assert_eq!(chunks(&["foo", "bar", "baz", "qux"], 3), vec![vec!["foo", "bar", "baz"], vec!["qux"]]);
    }

    #[test]
    fn ids_normalize() {
        assert_eq!(resource_id(&json!({"id": "340246538381952245"})), Some("340246538381952245".to_string()));
        assert_eq!(resource_id(&json!({"id": 10})), Some("10".to_string()));
        assert_eq!(resource_id(&json!({"id": null})), None);
        assert_eq!(resource_version(&json!({"version": 3})), Some(3));
    }
}
