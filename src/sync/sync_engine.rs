use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::administration::{Administration, HttpsAdministration};
use crate::db::Db;
use crate::notifier::Notifier;
use crate::registry::Registry;
use crate::resource::{diff_resource_versions, diff_resources, Resource, ResourceDiff};
use crate::resource_type::ResourceType;
use crate::storage::{StorageBuilder, SyncStorage};
use crate::sync::applier::{apply_diff, apply_diff_reporting_skipped, ApplyReport};
use crate::sync::changes::{fetch_resources, get_administration_changes, remote_versions, stop_early, Tag};
use crate::sync::push::{delete_line, delete_resource, push_line, push_resource};
use crate::sync::SyncConfig;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    /// Per entity type, in sync order.
    pub resource_types: Vec<(String, ApplyReport)>,
    /// A throttled fetch cut this pass short.
    pub throttled: bool,
}

impl SyncReport {
    pub fn total(&self) -> ApplyReport {
        let mut total = ApplyReport::default();
        for (_, report) in &self.resource_types {
            total.merge(report);
        }
        total
    }

    pub fn for_entity_type(&self, entity_type: &str) -> Option<&ApplyReport> {
        self.resource_types
            .iter()
            .find(|(name, _)| name == entity_type)
            .map(|(_, report)| report)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// Another pass was already running on this engine. Nothing was done.
    Busy,
    Finished(SyncReport),
}

impl SyncOutcome {
    pub fn report(&self) -> Option<&SyncReport> {
        match self {
            SyncOutcome::Busy => None,
            SyncOutcome::Finished(report) => Some(report),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    Started,
    ResourceTypeSynced {
        entity_type: String,
        report: ApplyReport,
    },
    Finished(SyncReport),
    /// A pass was requested while one was in flight.
    Skipped,
}

/// Mirrors the resource types of a registry from one administration into a
/// local database.
pub struct SyncEngine {
    administration: Arc<dyn Administration>,
    db: Db,
    registry: Registry,
    config: SyncConfig,
    in_flight: AtomicBool,
    notifier: Notifier<SyncEvent>,
}

/// Releases the in-flight flag on every exit path.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl SyncEngine {
    pub fn new(administration: Arc<dyn Administration>, db: Db, registry: Registry, config: SyncConfig) -> Self {
        Self {
            administration,
            db,
            registry,
            config,
            in_flight: AtomicBool::new(false),
            notifier: Notifier::new(),
        }
    }

    pub fn builder() -> SyncEngineBuilder {
        SyncEngineBuilder::default()
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn administration(&self) -> &dyn Administration {
        self.administration.as_ref()
    }

    pub fn notifier(&self) -> &Notifier<SyncEvent> {
        &self.notifier
    }

    pub fn is_syncing(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Runs one pass over every registered type in order. Returns `Busy`
    /// without doing anything when a pass is already running.
    pub fn perform_sync(&self) -> Result<SyncOutcome> {
        self.guarded(|| self.sync_all())
    }

    /// Forgets every synced version, then runs a pass, so every
    /// synchronizable resource is fetched again.
    pub fn full_sync(&self) -> Result<SyncOutcome> {
        self.guarded(|| {
            let reset = self.db.transaction(|t| {
                let mut count = 0;
                for resource_type in self.registry.synchronizable() {
                    count += t.reset_versions(resource_type.table, resource_type.scope)?;
                }
                Ok(count)
            })?;
            log::info!("Reset {} synced versions for a full sync", reset);
            self.sync_all()
        })
    }

    /// Syncs through the tag feed. The tag is read from and written back to
    /// `config.tag_path` in `storage`; a missing tag means everything is new.
    pub fn perform_tagged_sync(&self, storage: &dyn SyncStorage) -> Result<SyncOutcome> {
        self.guarded(|| {
            let tag_path = self.config.tag_path.as_str();
            let tag = if storage.exists(tag_path)? {
                Some(Tag::from_bytes(&storage.get(tag_path)?)?)
            } else {
                log::info!("No tag at {}, fetching everything", tag_path);
                None
            };

            let changes = get_administration_changes(
                self.administration.as_ref(),
                &self.registry,
                tag.as_ref(),
                self.config.max_request_size,
                self.config.throttle_policy,
            )?;

            let mut report = SyncReport {
                throttled: changes.throttled,
                ..Default::default()
            };
            let mut new_tag = changes.tag.clone();
            for resource_type in self.registry.synchronizable() {
                let Some(diff) = changes.diff(resource_type.entity_type) else {
                    continue;
                };
                let (applied, skipped) = apply_diff_reporting_skipped(&self.db, resource_type, diff)?;
                // skipped resources are reported again by the next call
                new_tag.revert(tag.as_ref(), resource_type.entity_type, &skipped);
                self.type_synced(&mut report, resource_type, applied);
            }

            storage.delete(tag_path)?;
            storage.put(tag_path, &new_tag.to_bytes()?)?;
            Ok(report)
        })
    }

    /// Finishes `backend` as the storage for tagged syncs, encrypted with
    /// `config.passphrase` when one is set.
    pub fn tag_storage(&self, backend: StorageBuilder) -> Result<Arc<dyn SyncStorage>> {
        backend.encrypted(self.config.passphrase.as_deref()).build()
    }

    /// Writes row `local_id` of `table` upstream, using the registered type
    /// that owns the row.
    pub fn push(&self, table: &str, local_id: i64) -> Result<Option<Resource>> {
        let resource_type = self.record_owner(table, local_id)?;
        push_resource(self.administration.as_ref(), &self.db, &resource_type, local_id)
    }

    pub fn delete_on_remote(&self, table: &str, local_id: i64) -> Result<()> {
        let resource_type = self.record_owner(table, local_id)?;
        delete_resource(self.administration.as_ref(), &self.db, &resource_type, local_id)
    }

    pub fn push_line(&self, table: &str, line_id: i64) -> Result<Option<Resource>> {
        let resource_type = self.line_owner(table, line_id)?;
        push_line(self.administration.as_ref(), &self.db, &resource_type, line_id)
    }

    pub fn delete_line_on_remote(&self, table: &str, line_id: i64) -> Result<()> {
        let resource_type = self.line_owner(table, line_id)?;
        delete_line(self.administration.as_ref(), &self.db, &resource_type, line_id)
    }

    fn record_owner(&self, table: &str, local_id: i64) -> Result<ResourceType> {
        let record = self
            .db
            .transaction(|t| t.get(table, local_id))?
            .ok_or_else(|| anyhow::anyhow!("No row {} in {}", local_id, table))?;
        self.registry
            .for_record(table, &record)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("No resource type stores row {} of {}", local_id, table))
    }

    /// The type of the document a line belongs to. Line tables can be shared,
    /// so the parent row decides.
    fn line_owner(&self, table: &str, line_id: i64) -> Result<ResourceType> {
        self.db.transaction(|t| {
            let line = t
                .get(table, line_id)?
                .ok_or_else(|| anyhow::anyhow!("No line {} in {}", line_id, table))?;
            for resource_type in self.registry.iter() {
                let Some(lines) = resource_type.document_lines.filter(|l| l.table == table) else {
                    continue;
                };
                let Some(parent_id) = line.get_i64(lines.document_foreign_key) else {
                    continue;
                };
                let Some(parent) = t.get(resource_type.table, parent_id)? else {
                    continue;
                };
                let scope_value = resource_type.scope.and_then(|(column, _)| parent.get_str(column));
                if let Some(owner) = self.registry.for_document_lines_table(table, scope_value) {
                    return Ok(*owner);
                }
            }
            Err(anyhow::anyhow!("No document type owns line {} of {}", line_id, table))
        })
    }

    fn guarded(&self, pass: impl FnOnce() -> Result<SyncReport>) -> Result<SyncOutcome> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log::info!("Sync already in progress, skipping");
            self.notifier.notify(SyncEvent::Skipped);
            return Ok(SyncOutcome::Busy);
        }
        let _guard = InFlightGuard(&self.in_flight);

        self.notifier.notify(SyncEvent::Started);
        let report = pass()?;
        let total = report.total();
        log::info!(
            "SYNC finished: created={}, updated={}, deleted={}, skipped={}{}",
            total.created,
            total.updated,
            total.deleted,
            total.skipped,
            if report.throttled { " (throttled)" } else { "" }
        );
        self.notifier.notify(SyncEvent::Finished(report.clone()));
        Ok(SyncOutcome::Finished(report))
    }

    fn sync_all(&self) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        for resource_type in self.registry.iter() {
            let (applied, throttled) = if resource_type.synchronizable {
                self.sync_versioned(resource_type)?
            } else {
                (self.sync_simple(resource_type)?, false)
            };
            self.type_synced(&mut report, resource_type, applied);
            if throttled {
                report.throttled = true;
                break;
            }
        }
        Ok(report)
    }

    /// Types without a synchronization endpoint are listed in full.
    fn sync_simple(&self, resource_type: &ResourceType) -> Result<ApplyReport> {
        let listing = self.administration.get(resource_type.api_path)?;
        let remote = match listing {
            serde_json::Value::Array(resources) => resources,
            other => anyhow::bail!("Expected a list from {}, got {}", resource_type.api_path, other),
        };
        let local = self
            .db
            .transaction(|t| t.moneybird_ids(resource_type.table, resource_type.scope))?;
        apply_diff(&self.db, resource_type, &diff_resources(&local, remote))
    }

    fn sync_versioned(&self, resource_type: &ResourceType) -> Result<(ApplyReport, bool)> {
        let remote = match remote_versions(self.administration.as_ref(), resource_type) {
            Ok(remote) => remote,
            Err(e) if stop_early(&e, self.config.throttle_policy) => {
                log::warn!("Throttled listing {}, stopping early", resource_type.entity_type);
                return Ok((ApplyReport::default(), true));
            }
            Err(e) => return Err(e),
        };
        let local = self
            .db
            .transaction(|t| t.version_map(resource_type.table, resource_type.scope))?;
        let version_diff = diff_resource_versions(&local, &remote);
        log::debug!(
            "{}: {} added, {} changed, {} removed",
            resource_type.entity_type,
            version_diff.added.len(),
            version_diff.changed.len(),
            version_diff.removed.len()
        );

        let (added, throttled) = fetch_resources(
            self.administration.as_ref(),
            resource_type,
            &version_diff.added,
            self.config.max_request_size,
            self.config.throttle_policy,
        )?;
        let (changed, throttled) = if throttled {
            (Vec::new(), true)
        } else {
            fetch_resources(
                self.administration.as_ref(),
                resource_type,
                &version_diff.changed,
                self.config.max_request_size,
                self.config.throttle_policy,
            )?
        };

        let diff = ResourceDiff {
            added,
            changed,
            removed: version_diff.removed,
        };
        Ok((apply_diff(&self.db, resource_type, &diff)?, throttled))
    }

    fn type_synced(&self, report: &mut SyncReport, resource_type: &ResourceType, applied: ApplyReport) {
        self.notifier.notify(SyncEvent::ResourceTypeSynced {
            entity_type: resource_type.entity_type.to_string(),
            report: applied,
        });
        report
            .resource_types
            .push((resource_type.entity_type.to_string(), applied));
    }
}

#[derive(Default)]
pub struct SyncEngineBuilder {
    administration: Option<Arc<dyn Administration>>,
    db: Option<Db>,
    registry: Option<Registry>,
    config: SyncConfig,
}

impl SyncEngineBuilder {
    pub fn administration(mut self, administration: Arc<dyn Administration>) -> Self {
        self.administration = Some(administration);
        self
    }

    pub fn db(mut self, db: Db) -> Self {
        self.db = Some(db);
        self
    }

    pub fn registry(mut self, registry: Registry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Defaults: an HTTPS client built from the config, an in-memory
    /// database with the accounting schema and the accounting registry.
    pub fn build(self) -> Result<SyncEngine> {
        let administration = match self.administration {
            Some(administration) => administration,
            None => Arc::new(HttpsAdministration::from_config(&self.config)?),
        };
        let db = match self.db {
            Some(db) => db,
            None => crate::accounting::open_memory_database()?,
        };
        let registry = self.registry.unwrap_or_else(crate::accounting::registry);
        Ok(SyncEngine::new(administration, db, registry, self.config))
    }
}
