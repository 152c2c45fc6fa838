//! One-shot copy of locally stored data into an owner-scoped backend.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::backend::Backend;
use crate::datastore::LocalStorage;
use crate::task::{NO_CATEGORY_ID, NewCategory};

pub const MIGRATED_MARKER: &str = "dataMigrated";
pub const MIGRATION_DATE_MARKER: &str = "migrationDate";

const MIGRATED_COLLECTIONS: [&str; 3] = ["tasks", "categories", "lastDeletedTask"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    pub categories_found: usize,
    pub categories_migrated: usize,
    pub tasks_found: usize,
    pub tasks_migrated: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationInfo {
    pub has_migrated: bool,
    pub migration_date: Option<DateTime<Utc>>,
    pub local_tasks_count: usize,
    pub local_categories_count: usize,
}

/// Creates every local category (except "No Category") and then every local
/// task under `owner`. Tasks follow their category to its new id; a task
/// whose category did not make it lands in "No Category". Individual
/// failures are logged and skipped. Local data is left in place.
#[tracing::instrument(skip(local, backend))]
pub fn migrate_local_to_backend<B: Backend>(
    local: &LocalStorage,
    backend: &B,
    owner: &str,
) -> anyhow::Result<MigrationReport> {
    let tasks = local.tasks()?.unwrap_or_default();
    let categories = local.categories()?.unwrap_or_default();

    let mut report = MigrationReport {
        categories_found: categories.iter().filter(|c| !c.is_sentinel()).count(),
        tasks_found: tasks.len(),
        ..MigrationReport::default()
    };
    if tasks.is_empty() && categories.is_empty() {
        info!("no local data to migrate");
        return Ok(report);
    }

    let mut remapped: HashMap<String, String> = HashMap::new();
    for category in categories.iter().filter(|category| !category.is_sentinel()) {
        let new = NewCategory {
            name: category.name.clone(),
            color: category.color.clone(),
        };
        match backend.create_category(owner, &new) {
            Ok(created) => {
                remapped.insert(category.id.clone(), created.id);
                report.categories_migrated += 1;
            }
            Err(err) => {
                warn!(name = %category.name, error = %err, "failed to migrate category");
            }
        }
    }

    for task in &tasks {
        let mut new = task.to_new();
        new.category_id = remapped
            .get(&task.category_id)
            .cloned()
            .unwrap_or_else(|| NO_CATEGORY_ID.to_string());
        match backend.create_task(owner, &new) {
            Ok(_) => report.tasks_migrated += 1,
            Err(err) => {
                warn!(title = %task.title, error = %err, "failed to migrate task");
            }
        }
    }

    local.set_marker(MIGRATED_MARKER, "true")?;
    local.set_marker(MIGRATION_DATE_MARKER, &Utc::now().to_rfc3339())?;
    info!(
        categories = report.categories_migrated,
        categories_found = report.categories_found,
        tasks = report.tasks_migrated,
        tasks_found = report.tasks_found,
        "migration finished"
    );
    Ok(report)
}

pub fn has_migrated(local: &LocalStorage) -> anyhow::Result<bool> {
    Ok(local.marker(MIGRATED_MARKER)?.as_deref() == Some("true"))
}

/// Drops the migrated collections. Refuses, returning false, until a
/// migration has been recorded.
#[tracing::instrument(skip(local))]
pub fn clear_local_after_migration(local: &LocalStorage) -> anyhow::Result<bool> {
    if !has_migrated(local)? {
        warn!("migration has not completed; keeping local data");
        return Ok(false);
    }
    for name in MIGRATED_COLLECTIONS {
        local.remove_collection(name)?;
    }
    info!("local data cleared after migration");
    Ok(true)
}

pub fn migration_info(local: &LocalStorage) -> anyhow::Result<MigrationInfo> {
    let migration_date = local
        .marker(MIGRATION_DATE_MARKER)?
        .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
        .map(|date| date.with_timezone(&Utc));

    Ok(MigrationInfo {
        has_migrated: has_migrated(local)?,
        migration_date,
        local_tasks_count: local.tasks()?.map(|tasks| tasks.len()).unwrap_or(0),
        local_categories_count: local
            .categories()?
            .map(|categories| categories.len())
            .unwrap_or(0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::task::{seed_categories, seed_tasks};

    fn seeded_local() -> LocalStorage {
        let local = LocalStorage::in_memory();
        local.save_categories(&seed_categories()).unwrap();
        local.save_tasks(&seed_tasks()).unwrap();
        local
    }

    #[test]
    fn tasks_follow_their_category_to_the_new_id() {
        let local = seeded_local();
        let backend = MemoryBackend::new();

        let report = migrate_local_to_backend(&local, &backend, "alice").unwrap();
        assert_eq!(report.categories_migrated, 3);
        assert_eq!(report.tasks_migrated, 6);

        let categories = backend.fetch_categories("alice").unwrap();
        assert_eq!(categories.len(), 4);
        let work = categories.iter().find(|c| c.name == "Work").unwrap();
        let tasks = backend.fetch_tasks("alice").unwrap();
        let proposal = tasks
            .iter()
            .find(|task| task.title == "Complete Project Proposal")
            .unwrap();
        assert_eq!(proposal.category_id, work.id);

        assert!(has_migrated(&local).unwrap());
        assert!(migration_info(&local).unwrap().migration_date.is_some());
    }

    #[test]
    fn failed_category_sends_its_tasks_to_no_category() {
        let local = seeded_local();
        let backend = MemoryBackend::new();
        backend.fail_next(1);

        let report = migrate_local_to_backend(&local, &backend, "alice").unwrap();
        assert_eq!(report.categories_migrated, 2);
        assert_eq!(report.tasks_migrated, 6);

        let tasks = backend.fetch_tasks("alice").unwrap();
        let orphaned = tasks.iter().filter(|task| task.category_id == NO_CATEGORY_ID).count();
        assert_eq!(orphaned, 2);
    }

    #[test]
    fn clearing_requires_a_recorded_migration() {
        let local = seeded_local();
        assert!(!clear_local_after_migration(&local).unwrap());
        assert_eq!(local.tasks().unwrap().map(|t| t.len()), Some(6));

        migrate_local_to_backend(&local, &MemoryBackend::new(), "alice").unwrap();
        assert!(clear_local_after_migration(&local).unwrap());
        let info = migration_info(&local).unwrap();
        assert!(info.has_migrated);
        assert_eq!(info.local_tasks_count, 0);
        assert_eq!(info.local_categories_count, 0);
    }

    #[test]
    fn empty_local_store_is_not_marked() {
        let local = LocalStorage::in_memory();
        let report = migrate_local_to_backend(&local, &MemoryBackend::new(), "alice").unwrap();
        assert_eq!(report, MigrationReport::default());
        assert!(!has_migrated(&local).unwrap());
    }
}
