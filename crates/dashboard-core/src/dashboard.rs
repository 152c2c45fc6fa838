//! The owned state container a presentation layer talks to.
//!
//! `Dashboard` wires the caches, the filter pipeline, the animation
//! reconciler and the backend together. Time never advances on its own:
//! every timer-driven step takes an explicit `now`.

use std::collections::BTreeMap;
use std::time::Instant;

use anyhow::{Context, anyhow, bail};
use tracing::{debug, info, warn};

use crate::animation::{Reconciler, RenderPlan};
use crate::backend::Backend;
use crate::config::Timings;
use crate::datastore::LocalStorage;
use crate::debounce::Debouncer;
use crate::error::ValidationError;
use crate::filter::{
    FilterState, StatusLabel, count_by_category, count_completed, count_pending,
};
use crate::mutation::{MutationState, Optimistic, QueryCache};
use crate::notify::{Notification, Notifications};
use crate::task::{
    Category, CategoryPatch, NO_CATEGORY_ID, NewCategory, NewTask, Task, TaskPatch,
    validate_category_name,
};

#[derive(Debug, Clone)]
struct PendingDelete {
    task: Task,
    due: Instant,
}

/// Everything the presentation layer needs for one frame.
#[derive(Debug, Clone)]
pub struct DashboardView {
    pub search_term: String,
    pub filtered: Vec<Task>,
    pub plan: RenderPlan,
    pub pending: usize,
    pub completed: usize,
    pub per_category: BTreeMap<String, usize>,
}

#[derive(Debug)]
pub struct Dashboard<B> {
    backend: B,
    storage: LocalStorage,
    owner: String,
    timings: Timings,
    tasks: QueryCache<Task>,
    categories: QueryCache<Category>,
    filter: FilterState,
    search: Debouncer<String>,
    reconciler: Reconciler,
    pending_deletes: Vec<PendingDelete>,
    notifications: Notifications,
}

impl<B: Backend> Dashboard<B> {
    /// Restores the persisted filter state; call [`Dashboard::load`] to
    /// fetch the collections.
    pub fn new(
        backend: B,
        storage: LocalStorage,
        owner: impl Into<String>,
        timings: Timings,
    ) -> anyhow::Result<Self> {
        let mut filter = FilterState::default();
        if let Some(checkboxes) = storage.filter_checkboxes()? {
            filter.checkboxes = checkboxes;
        }
        if let Some(selected) = storage.selected_categories()? {
            filter.selected_categories = selected;
        }
        if let Some(term) = storage.search_term()? {
            filter.search_term = term;
        }

        Ok(Self {
            search: Debouncer::new(filter.search_term.clone(), timings.debounce),
            reconciler: Reconciler::new(timings.enter, timings.exit),
            backend,
            storage,
            owner: owner.into(),
            timings,
            tasks: QueryCache::new("tasks"),
            categories: QueryCache::new("categories"),
            filter,
            pending_deletes: Vec::new(),
            notifications: Notifications::default(),
        })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn storage(&self) -> &LocalStorage {
        &self.storage
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn tasks(&self) -> &[Task] {
        self.tasks.data()
    }

    pub fn categories(&self) -> &[Category] {
        self.categories.data()
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.get(id)
    }

    pub fn filter(&self) -> &FilterState {
        &self.filter
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn drain_notifications(&mut self) -> Vec<Notification> {
        self.notifications.drain()
    }

    pub fn last_deleted(&self) -> anyhow::Result<Option<Task>> {
        self.storage.last_deleted_task()
    }

    #[tracing::instrument(skip(self), fields(owner = %self.owner))]
    pub fn load(&mut self) -> anyhow::Result<()> {
        let owner = self.owner.clone();
        let backend = &self.backend;
        self.categories
            .refresh(|| backend.fetch_categories(&owner))
            .context("failed to load categories")?;
        self.tasks
            .refresh(|| backend.fetch_tasks(&owner))
            .context("failed to load tasks")?;
        info!(
            tasks = self.tasks.data().len(),
            categories = self.categories.data().len(),
            "dashboard loaded"
        );
        Ok(())
    }

    /// Re-reads whatever a settled mutation marked stale. A failed read
    /// keeps the cached data; the next call tries again.
    fn resync(&mut self) {
        let owner = self.owner.clone();
        let backend = &self.backend;
        if let Err(err) = self
            .categories
            .refresh_if_stale(|| backend.fetch_categories(&owner))
        {
            warn!(error = %err, "category resync failed");
        }
        if let Err(err) = self.tasks.refresh_if_stale(|| backend.fetch_tasks(&owner)) {
            warn!(error = %err, "task resync failed");
        }
    }

    #[tracing::instrument(skip(self, new), fields(title = %new.title))]
    pub fn add_task(&mut self, new: NewTask) -> anyhow::Result<Task> {
        let new = new.validated(self.categories.data())?;
        let result = self.create_task(new);
        match &result {
            Ok(_) => self.notifications.success("Task added successfully!"),
            Err(_) => self.notifications.error("Failed to add task"),
        }
        self.resync();
        result
    }

    fn create_task(&mut self, new: NewTask) -> anyhow::Result<Task> {
        let owner = self.owner.clone();
        let backend = &self.backend;
        let remote = new.clone();
        let (_, result) = self.tasks.run(Optimistic::add(new), |_| {
            backend.create_task(&owner, &remote).map(Some)
        });
        result?.ok_or_else(|| anyhow!("backend returned no task"))
    }

    fn patch_task(&mut self, id: &str, patch: TaskPatch) -> anyhow::Result<MutationState> {
        let backend = &self.backend;
        let remote = patch.clone();
        let (state, result) = self.tasks.run(Optimistic::update(id, patch), |_| {
            backend.update_task(id, &remote).map(|_| None)
        });
        result?;
        Ok(state)
    }

    #[tracing::instrument(skip(self, patch))]
    pub fn update_task(&mut self, id: &str, patch: TaskPatch) -> anyhow::Result<()> {
        if self.tasks.get(id).is_none() {
            bail!("task not found: {id}");
        }
        let patch = patch.validated(self.categories.data())?;
        if patch.is_empty() {
            debug!(id, "empty task patch; nothing to do");
            return Ok(());
        }

        let result = self.patch_task(id, patch);
        match &result {
            Ok(_) => self.notifications.success("Task updated successfully"),
            Err(_) => self.notifications.error("Failed to update task"),
        }
        self.resync();
        result.map(|_| ())
    }

    pub fn set_task_status(&mut self, id: &str, completed: bool) -> anyhow::Result<()> {
        self.update_task(id, TaskPatch::status(completed))
    }

    /// Starts the flip-out of an explicit delete. The task stays in the
    /// collection until [`Dashboard::advance`] passes the delete delay.
    /// Returns false for an unknown id or one already being removed.
    #[tracing::instrument(skip(self, now))]
    pub fn request_delete_task(&mut self, id: &str, now: Instant) -> anyhow::Result<bool> {
        let Some(task) = self.tasks.get(id).cloned() else {
            debug!(id, "delete of unknown task ignored");
            return Ok(false);
        };
        if self.reconciler.is_removing(id)
            || self.pending_deletes.iter().any(|pending| pending.task.id == id)
        {
            debug!(id, "task already being removed");
            return Ok(false);
        }

        self.reconciler.mark_removing(id);
        self.pending_deletes.push(PendingDelete {
            task,
            due: now + self.timings.delete_delay,
        });
        Ok(true)
    }

    /// Runs every delete whose delay has elapsed and expires finished
    /// transitions. Returns the number of tasks actually deleted; failures
    /// are rolled back and reported through the notifications. Only a
    /// completed delete fills the undo slot.
    pub fn advance(&mut self, now: Instant) -> usize {
        let (due, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending_deletes)
            .into_iter()
            .partition(|pending| pending.due <= now);
        self.pending_deletes = waiting;

        let mut deleted = 0;
        for pending in due {
            let backend = &self.backend;
            let id = pending.task.id.as_str();
            let (_, result) = self
                .tasks
                .run(Optimistic::delete(id), |_| backend.delete_task(id).map(|_| None));
            self.reconciler.clear_removing(id);
            match result {
                Ok(_) => {
                    deleted += 1;
                    if let Err(err) = self.storage.save_last_deleted_task(&pending.task) {
                        warn!(id, error = %err, "failed to save undo slot");
                    }
                    self.notifications.success("Task deleted successfully");
                }
                Err(err) => {
                    warn!(id, error = %err, "delete failed");
                    self.notifications.error("Failed to delete task");
                }
            }
        }

        if deleted > 0 || self.tasks.is_stale() {
            self.resync();
        }
        self.reconciler.expire(now);
        self.search.poll(now);
        deleted
    }

    /// Earliest instant at which [`Dashboard::advance`] has work to do.
    pub fn next_wakeup(&self) -> Option<Instant> {
        let delete = self.pending_deletes.iter().map(|pending| pending.due).min();
        match (delete, self.reconciler.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Re-adds the most recently deleted task and empties the undo slot.
    #[tracing::instrument(skip(self))]
    pub fn undo_delete(&mut self) -> anyhow::Result<Task> {
        let Some(task) = self.storage.last_deleted_task()? else {
            self.notifications.error("No task to restore");
            bail!("No task to restore");
        };

        let mut new = task.to_new();
        let known = self
            .categories
            .data()
            .iter()
            .any(|category| category.id == new.category_id);
        if !known {
            new.category_id = NO_CATEGORY_ID.to_string();
        }

        let result = self.create_task(new);
        match &result {
            Ok(restored) => {
                self.storage.clear_last_deleted_task()?;
                info!(old = %task.id, new = %restored.id, "task restored");
                self.notifications.success("Task restored successfully");
            }
            Err(_) => self.notifications.error("Failed to add task"),
        }
        self.resync();
        result
    }

    #[tracing::instrument(skip(self))]
    pub fn add_category(&mut self, name: &str) -> anyhow::Result<Category> {
        let new = NewCategory::with_next_color(name, self.categories.data())
            .validated(self.categories.data())?;

        let owner = self.owner.clone();
        let backend = &self.backend;
        let remote = new.clone();
        let (_, result) = self.categories.run(Optimistic::add(new), |_| {
            backend.create_category(&owner, &remote).map(Some)
        });
        let result = result.and_then(|created| {
            created.ok_or_else(|| anyhow!("backend returned no category"))
        });

        match &result {
            Ok(_) => self.notifications.success("Category added successfully!"),
            Err(_) => self.notifications.error("Failed to add category"),
        }
        self.resync();
        result
    }

    #[tracing::instrument(skip(self))]
    pub fn rename_category(&mut self, id: &str, name: &str) -> anyhow::Result<()> {
        self.editable_category(id)?;
        let name = validate_category_name(name, self.categories.data(), Some(id))?;

        let backend = &self.backend;
        let patch = CategoryPatch {
            name: Some(name),
            color: None,
        };
        let remote = patch.clone();
        let (_, result) = self.categories.run(Optimistic::update(id, patch), |_| {
            backend.update_category(id, &remote).map(|_| None)
        });

        match &result {
            Ok(_) => self.notifications.success("Category updated successfully!"),
            Err(_) => self.notifications.error("Failed to update category"),
        }
        self.resync();
        result.map(|_| ())
    }

    /// Moves every task of the category to "No Category", then deletes the
    /// category. The two collections are not updated atomically: if a
    /// reassignment fails the category is kept, and tasks already moved
    /// stay moved. Returns how many tasks were reassigned.
    #[tracing::instrument(skip(self))]
    pub fn delete_category(&mut self, id: &str) -> anyhow::Result<usize> {
        self.editable_category(id)?;

        let affected: Vec<String> = self
            .tasks
            .data()
            .iter()
            .filter(|task| task.category_id == id)
            .map(|task| task.id.clone())
            .collect();

        let mut moved = 0;
        for task_id in &affected {
            if let Err(err) = self.patch_task(task_id, TaskPatch::category(NO_CATEGORY_ID)) {
                self.notifications.error("Failed to update task");
                self.resync();
                return Err(err.context(format!(
                    "category {id} kept: reassigned {moved} of {} task(s)",
                    affected.len()
                )));
            }
            moved += 1;
        }

        let backend = &self.backend;
        let (_, result) = self
            .categories
            .run(Optimistic::delete(id), |_| backend.delete_category(id).map(|_| None));

        match &result {
            Ok(_) => {
                self.notifications.success("Category deleted");
                if self.filter.selected_categories.iter().any(|selected| selected == id) {
                    self.filter.selected_categories.retain(|selected| selected != id);
                    if let Err(err) = self
                        .storage
                        .save_selected_categories(&self.filter.selected_categories)
                    {
                        warn!(id, error = %err, "failed to persist selected categories");
                    }
                }
            }
            Err(_) => self.notifications.error("Failed to delete category"),
        }
        self.resync();
        result.map(|_| moved)
    }

    fn editable_category(&self, id: &str) -> anyhow::Result<()> {
        if id == NO_CATEGORY_ID {
            return Err(ValidationError::new(
                "categoryId",
                "The No Category entry cannot be changed",
            )
            .into());
        }
        if self.categories.get(id).is_none() {
            bail!("category not found: {id}");
        }
        Ok(())
    }

    /// Records a keystroke in the search box; the filter picks it up once
    /// input has been quiet for the debounce interval.
    pub fn set_search(&mut self, term: &str, now: Instant) -> anyhow::Result<()> {
        self.filter.set_search_term(term);
        self.search.push(term.to_string(), now);
        self.storage.save_search_term(term)
    }

    /// Applies the raw search term without waiting.
    pub fn flush_search(&mut self) -> &str {
        self.search.flush()
    }

    pub fn set_status_filter(&mut self, label: StatusLabel, checked: bool) -> anyhow::Result<()> {
        self.filter.set_status(label, checked);
        self.storage.save_filter_checkboxes(&self.filter.checkboxes)
    }

    pub fn toggle_checkbox(&mut self, checkbox_id: &str, checked: bool) -> anyhow::Result<()> {
        self.filter.toggle_checkbox(checkbox_id, checked);
        self.storage.save_filter_checkboxes(&self.filter.checkboxes)
    }

    pub fn clear_status_filters(&mut self) -> anyhow::Result<()> {
        self.filter.clear_all_checkboxes();
        self.storage.save_filter_checkboxes(&self.filter.checkboxes)
    }

    pub fn set_selected_categories(&mut self, ids: Vec<String>) -> anyhow::Result<()> {
        self.filter.set_selected_categories(ids);
        self.storage
            .save_selected_categories(&self.filter.selected_categories)
    }

    pub fn toggle_category_filter(&mut self, id: &str) -> anyhow::Result<()> {
        self.filter.toggle_category_selection(id);
        self.storage
            .save_selected_categories(&self.filter.selected_categories)
    }

    /// Resets search, status and category filters.
    pub fn clear_filters(&mut self, now: Instant) -> anyhow::Result<()> {
        self.filter.set_search_term("");
        self.search.push(String::new(), now);
        self.search.flush();
        self.storage.save_search_term("")?;
        self.clear_status_filters()?;
        self.set_selected_categories(Vec::new())
    }

    /// Derives one frame: the filtered list, what to draw and the counters.
    pub fn view(&mut self, now: Instant) -> DashboardView {
        let search_term = self.search.poll(now).clone();
        let all = self.tasks.data();
        let filtered = self.filter.apply(all, &search_term);
        let plan = self.reconciler.reconcile(all, &filtered, now);

        DashboardView {
            pending: count_pending(all),
            completed: count_completed(all),
            per_category: count_by_category(all, self.categories.data()),
            search_term,
            filtered,
            plan,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::animation::AnimationStatus;
    use std::sync::Arc;

    use crate::backend::LocalBackend;
    use crate::datastore::{KEY_PREFIX, KvStore, MemoryKvStore};
    use crate::error::validation_of;
    use crate::notify::Level;

    fn local() -> Dashboard<LocalBackend> {
        let storage = LocalStorage::in_memory();
        let backend = LocalBackend::new(storage.clone());
        let mut dashboard =
            Dashboard::new(backend, storage, "local", Timings::default()).expect("dashboard");
        dashboard.load().expect("load");
        dashboard
    }

    #[test]
    fn invalid_title_is_rejected_before_any_mutation() {
        let mut dashboard = local();
        let before = dashboard.tasks().to_vec();

        let err = dashboard.add_task(NewTask::new("  ab ", "1")).unwrap_err();
        let validation = validation_of(&err).expect("validation error");
        assert_eq!(validation.field, "title");
        assert_eq!(dashboard.tasks(), before.as_slice());
        assert!(dashboard.drain_notifications().is_empty());
    }

    #[test]
    fn delete_waits_for_the_flip_out() {
        let mut dashboard = local();
        let start = Instant::now();

        assert!(dashboard.request_delete_task("3", start).unwrap());
        assert_eq!(dashboard.last_deleted().unwrap(), None);
        let view = dashboard.view(start);
        let item = view.plan.items.iter().find(|item| item.task.id == "3").unwrap();
        assert_eq!(item.animation, AnimationStatus::Removing);

        assert_eq!(dashboard.advance(start + Duration::from_millis(499)), 0);
        assert!(dashboard.task("3").is_some());

        assert_eq!(dashboard.advance(start + Duration::from_millis(500)), 1);
        assert!(dashboard.task("3").is_none());
        assert!(!dashboard.reconciler().is_removing("3"));
        assert_eq!(dashboard.last_deleted().unwrap().unwrap().id, "3");
    }

    #[test]
    fn undo_restores_once() {
        let mut dashboard = local();
        let start = Instant::now();
        dashboard.request_delete_task("5", start).unwrap();
        dashboard.advance(start + Duration::from_secs(1));
        dashboard.drain_notifications();

        let restored = dashboard.undo_delete().unwrap();
        assert_eq!(restored.title, "Bug Fixes");
        assert!(dashboard.task(&restored.id).is_some());
        assert_eq!(dashboard.last_deleted().unwrap(), None);

        assert!(dashboard.undo_delete().is_err());
        let messages: Vec<_> = dashboard
            .drain_notifications()
            .into_iter()
            .map(|note| (note.level, note.message))
            .collect();
        assert_eq!(
            messages,
            vec![
                (Level::Success, "Task restored successfully".to_string()),
                (Level::Error, "No task to restore".to_string()),
            ]
        );
    }

    #[test]
    fn search_applies_after_debounce() {
        let mut dashboard = local();
        let start = Instant::now();

        dashboard.set_search("review", start).unwrap();
        assert_eq!(dashboard.view(start).filtered.len(), 6);

        let later = start + Duration::from_millis(300);
        let view = dashboard.view(later);
        assert_eq!(view.search_term, "review");
        assert_eq!(
            view.filtered.iter().map(|task| task.id.as_str()).collect::<Vec<_>>(),
            vec!["3"]
        );
    }

    #[test]
    fn filter_state_survives_a_restart() {
        let storage = LocalStorage::in_memory();
        {
            let backend = LocalBackend::new(storage.clone());
            let mut dashboard =
                Dashboard::new(backend, storage.clone(), "local", Timings::default()).unwrap();
            dashboard.set_status_filter(StatusLabel::Pending, true).unwrap();
            dashboard.toggle_category_filter("2").unwrap();
        }

        let backend = LocalBackend::new(storage.clone());
        let dashboard = Dashboard::new(backend, storage, "local", Timings::default()).unwrap();
        assert_eq!(dashboard.filter().active_labels(), vec![StatusLabel::Pending]);
        assert_eq!(dashboard.filter().selected_categories, vec!["2".to_string()]);
    }

    #[test]
    fn clear_filters_settles_the_empty_search_at_the_given_instant() {
        let mut dashboard = local();
        let start = Instant::now();
        dashboard.set_search("review", start).unwrap();
        dashboard.set_status_filter(StatusLabel::Completed, true).unwrap();
        dashboard.toggle_category_filter("2").unwrap();
        dashboard.view(start + Duration::from_millis(300));

        dashboard.clear_filters(start + Duration::from_millis(400)).unwrap();

        let view = dashboard.view(start + Duration::from_millis(400));
        assert_eq!(view.search_term, "");
        assert_eq!(view.filtered.len(), dashboard.tasks().len());
        assert!(dashboard.filter().active_labels().is_empty());
        assert!(dashboard.filter().selected_categories.is_empty());
        assert_eq!(dashboard.storage().search_term().unwrap(), Some(String::new()));
    }

    /// Memory store that rejects writes to one key.
    #[derive(Debug)]
    struct RejectingStore {
        inner: MemoryKvStore,
        rejected: String,
    }

    impl KvStore for RejectingStore {
        fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
            if key == self.rejected {
                bail!("disk full");
            }
            self.inner.set(key, value)
        }

        fn remove(&self, key: &str) -> anyhow::Result<()> {
            self.inner.remove(key)
        }

        fn keys(&self) -> anyhow::Result<Vec<String>> {
            self.inner.keys()
        }
    }

    #[test]
    fn category_delete_resyncs_when_selection_cannot_be_saved() {
        let memory = MemoryKvStore::new();
        memory
            .set(&format!("{KEY_PREFIX}selectedCategories"), r#"["2"]"#)
            .unwrap();
        let storage = LocalStorage::new(Arc::new(RejectingStore {
            inner: memory,
            rejected: format!("{KEY_PREFIX}selectedCategories"),
        }));
        let backend = LocalBackend::new(storage.clone());
        let mut dashboard =
            Dashboard::new(backend, storage, "local", Timings::default()).unwrap();
        dashboard.load().unwrap();
        assert_eq!(dashboard.filter().selected_categories, vec!["2".to_string()]);

        let moved = dashboard.delete_category("2").unwrap();

        assert!(moved > 0);
        assert!(dashboard.filter().selected_categories.is_empty());
        assert!(dashboard.categories().iter().all(|category| category.id != "2"));
        assert!(dashboard.tasks().iter().all(|task| task.category_id != "2"));
    }

    #[test]
    fn sentinel_category_is_not_editable() {
        let mut dashboard = local();
        assert!(dashboard.rename_category(NO_CATEGORY_ID, "Other").is_err());
        assert!(dashboard.delete_category(NO_CATEGORY_ID).is_err());
        assert_eq!(dashboard.categories()[0], Category::no_category());
    }
}
