use anyhow::{Context, anyhow, bail};
use parking_lot::Mutex;
use tracing::{debug, instrument, warn};

use crate::datastore::LocalStorage;
use crate::task::{
    Category, CategoryPatch, NO_CATEGORY_ID, NewCategory, NewTask, Record, Task, TaskPatch,
    new_record_id, seed_categories, seed_tasks,
};

/// The persistence collaborator: four operations per collection, no
/// transactions across collections.
pub trait Backend {
    fn fetch_tasks(&self, owner: &str) -> anyhow::Result<Vec<Task>>;
    fn create_task(&self, owner: &str, new: &NewTask) -> anyhow::Result<Task>;
    fn update_task(&self, id: &str, patch: &TaskPatch) -> anyhow::Result<()>;
    fn delete_task(&self, id: &str) -> anyhow::Result<()>;

    /// Always starts with the "No Category" entry.
    fn fetch_categories(&self, owner: &str) -> anyhow::Result<Vec<Category>>;
    fn create_category(&self, owner: &str, new: &NewCategory) -> anyhow::Result<Category>;
    fn update_category(&self, id: &str, patch: &CategoryPatch) -> anyhow::Result<()>;
    fn delete_category(&self, id: &str) -> anyhow::Result<()>;
}

impl<B: Backend + ?Sized> Backend for &B {
    fn fetch_tasks(&self, owner: &str) -> anyhow::Result<Vec<Task>> {
        (**self).fetch_tasks(owner)
    }
    fn create_task(&self, owner: &str, new: &NewTask) -> anyhow::Result<Task> {
        (**self).create_task(owner, new)
    }
    fn update_task(&self, id: &str, patch: &TaskPatch) -> anyhow::Result<()> {
        (**self).update_task(id, patch)
    }
    fn delete_task(&self, id: &str) -> anyhow::Result<()> {
        (**self).delete_task(id)
    }
    fn fetch_categories(&self, owner: &str) -> anyhow::Result<Vec<Category>> {
        (**self).fetch_categories(owner)
    }
    fn create_category(&self, owner: &str, new: &NewCategory) -> anyhow::Result<Category> {
        (**self).create_category(owner, new)
    }
    fn update_category(&self, id: &str, patch: &CategoryPatch) -> anyhow::Result<()> {
        (**self).update_category(id, patch)
    }
    fn delete_category(&self, id: &str) -> anyhow::Result<()> {
        (**self).delete_category(id)
    }
}

fn with_sentinel_first(mut categories: Vec<Category>) -> Vec<Category> {
    categories.retain(|category| !category.is_sentinel());
    categories.insert(0, Category::no_category());
    categories
}

fn guard_sentinel(id: &str, action: &str) -> anyhow::Result<()> {
    if id == NO_CATEGORY_ID {
        bail!("the No Category entry cannot be {action}");
    }
    Ok(())
}

/// Local-storage variant: whole collections as JSON blobs, single owner.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    storage: LocalStorage,
}

impl LocalBackend {
    pub fn new(storage: LocalStorage) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &LocalStorage {
        &self.storage
    }

    fn load_tasks(&self) -> anyhow::Result<Vec<Task>> {
        Ok(self.storage.tasks()?.unwrap_or_else(seed_tasks))
    }

    fn load_categories(&self) -> anyhow::Result<Vec<Category>> {
        let stored = self.storage.categories()?.unwrap_or_else(seed_categories);
        Ok(with_sentinel_first(stored))
    }
}

impl Backend for LocalBackend {
    #[instrument(skip(self))]
    fn fetch_tasks(&self, _owner: &str) -> anyhow::Result<Vec<Task>> {
        self.load_tasks()
    }

    #[instrument(skip(self, new))]
    fn create_task(&self, _owner: &str, new: &NewTask) -> anyhow::Result<Task> {
        let mut tasks = self.load_tasks()?;
        let task = Task::from_new(new_record_id(), new);
        tasks.push(task.clone());
        self.storage.save_tasks(&tasks)?;
        debug!(id = %task.id, count = tasks.len(), "task stored");
        Ok(task)
    }

    #[instrument(skip(self, patch))]
    fn update_task(&self, id: &str, patch: &TaskPatch) -> anyhow::Result<()> {
        let mut tasks = self.load_tasks()?;
        let task = tasks
            .iter_mut()
            .find(|task| task.id == id)
            .ok_or_else(|| anyhow!("task not found: {id}"))?;
        task.apply_patch(patch);
        self.storage.save_tasks(&tasks)
    }

    #[instrument(skip(self))]
    fn delete_task(&self, id: &str) -> anyhow::Result<()> {
        let mut tasks = self.load_tasks()?;
        tasks.retain(|task| task.id != id);
        self.storage.save_tasks(&tasks)
    }

    #[instrument(skip(self))]
    fn fetch_categories(&self, _owner: &str) -> anyhow::Result<Vec<Category>> {
        self.load_categories()
    }

    #[instrument(skip(self, new))]
    fn create_category(&self, _owner: &str, new: &NewCategory) -> anyhow::Result<Category> {
        let mut categories = self.load_categories()?;
        let category = Category::from_new(new_record_id(), new);
        categories.push(category.clone());
        self.storage.save_categories(&categories)?;
        Ok(category)
    }

    #[instrument(skip(self, patch))]
    fn update_category(&self, id: &str, patch: &CategoryPatch) -> anyhow::Result<()> {
        guard_sentinel(id, "edited")?;
        let mut categories = self.load_categories()?;
        let category = categories
            .iter_mut()
            .find(|category| category.id == id)
            .ok_or_else(|| anyhow!("category not found: {id}"))?;
        category.apply_patch(patch);
        self.storage.save_categories(&categories)
    }

    #[instrument(skip(self))]
    fn delete_category(&self, id: &str) -> anyhow::Result<()> {
        guard_sentinel(id, "deleted")?;
        let mut categories = self.load_categories()?;
        categories.retain(|category| category.id != id);
        self.storage.save_categories(&categories)
    }
}

#[derive(Debug, Default)]
struct MemoryDocuments {
    tasks: Vec<(String, Task)>,
    categories: Vec<(String, Category)>,
    failures_left: usize,
    offline: bool,
    calls: usize,
}

impl MemoryDocuments {
    fn call(&mut self, op: &str) -> anyhow::Result<()> {
        self.calls += 1;
        if self.offline {
            bail!("{op}: backend unreachable");
        }
        if self.failures_left > 0 {
            self.failures_left -= 1;
            bail!("{op}: backend unavailable");
        }
        Ok(())
    }
}

/// Owner-scoped document collections held in memory, standing in for the
/// hosted database. Failures can be injected to exercise rollback paths.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    docs: Mutex<MemoryDocuments>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `count` calls fail, whatever they are.
    pub fn fail_next(&self, count: usize) {
        self.docs.lock().failures_left = count;
    }

    pub fn set_offline(&self, offline: bool) {
        self.docs.lock().offline = offline;
    }

    pub fn calls(&self) -> usize {
        self.docs.lock().calls
    }

    /// Seeds a task with a known id, bypassing failure injection.
    pub fn insert_task(&self, owner: &str, task: Task) {
        self.docs.lock().tasks.push((owner.to_string(), task));
    }

    pub fn insert_category(&self, owner: &str, category: Category) {
        self.docs.lock().categories.push((owner.to_string(), category));
    }
}

impl Backend for MemoryBackend {
    fn fetch_tasks(&self, owner: &str) -> anyhow::Result<Vec<Task>> {
        let mut docs = self.docs.lock();
        docs.call("fetch tasks")?;
        Ok(docs
            .tasks
            .iter()
            .filter(|(doc_owner, _)| doc_owner == owner)
            .map(|(_, task)| task.clone())
            .collect())
    }

    fn create_task(&self, owner: &str, new: &NewTask) -> anyhow::Result<Task> {
        let mut docs = self.docs.lock();
        docs.call("create task")?;
        let task = Task::from_new(new_record_id(), new);
        docs.tasks.push((owner.to_string(), task.clone()));
        Ok(task)
    }

    fn update_task(&self, id: &str, patch: &TaskPatch) -> anyhow::Result<()> {
        let mut docs = self.docs.lock();
        docs.call("update task")?;
        let (_, task) = docs
            .tasks
            .iter_mut()
            .find(|(_, task)| task.id == id)
            .ok_or_else(|| anyhow!("no task document {id}"))?;
        task.apply_patch(patch);
        Ok(())
    }

    fn delete_task(&self, id: &str) -> anyhow::Result<()> {
        let mut docs = self.docs.lock();
        docs.call("delete task")?;
        docs.tasks.retain(|(_, task)| task.id != id);
        Ok(())
    }

    fn fetch_categories(&self, owner: &str) -> anyhow::Result<Vec<Category>> {
        let mut docs = self.docs.lock();
        docs.call("fetch categories")?;
        let owned = docs
            .categories
            .iter()
            .filter(|(doc_owner, _)| doc_owner == owner)
            .map(|(_, category)| category.clone())
            .collect();
        Ok(with_sentinel_first(owned))
    }

    fn create_category(&self, owner: &str, new: &NewCategory) -> anyhow::Result<Category> {
        let mut docs = self.docs.lock();
        docs.call("create category")?;
        let category = Category::from_new(new_record_id(), new);
        docs.categories.push((owner.to_string(), category.clone()));
        Ok(category)
    }

    fn update_category(&self, id: &str, patch: &CategoryPatch) -> anyhow::Result<()> {
        guard_sentinel(id, "edited")?;
        let mut docs = self.docs.lock();
        docs.call("update category")?;
        let (_, category) = docs
            .categories
            .iter_mut()
            .find(|(_, category)| category.id == id)
            .ok_or_else(|| anyhow!("no category document {id}"))?;
        category.apply_patch(patch);
        Ok(())
    }

    fn delete_category(&self, id: &str) -> anyhow::Result<()> {
        guard_sentinel(id, "deleted")?;
        let mut docs = self.docs.lock();
        docs.call("delete category")?;
        docs.categories.retain(|(_, category)| category.id != id);
        Ok(())
    }
}

/// Retry budget applied beneath the mutation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub reads: u32,
    pub writes: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            reads: 2,
            writes: 1,
        }
    }
}

/// Transparently retries failed calls; callers only see the final outcome.
#[derive(Debug)]
pub struct Retrying<B> {
    inner: B,
    policy: RetryPolicy,
}

impl<B: Backend> Retrying<B> {
    pub fn new(inner: B, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }

    fn attempt<T>(
        &self,
        op: &'static str,
        retries: u32,
        mut call: impl FnMut(&B) -> anyhow::Result<T>,
    ) -> anyhow::Result<T> {
        let mut attempt = 0;
        loop {
            match call(&self.inner) {
                Ok(value) => return Ok(value),
                Err(err) if attempt < retries => {
                    attempt += 1;
                    warn!(op, attempt, error = %err, "backend call failed; retrying");
                }
                Err(err) => {
                    return Err(err).with_context(|| {
                        format!("{op} failed after {} attempt(s)", attempt + 1)
                    });
                }
            }
        }
    }
}

impl<B: Backend> Backend for Retrying<B> {
    fn fetch_tasks(&self, owner: &str) -> anyhow::Result<Vec<Task>> {
        self.attempt("fetch tasks", self.policy.reads, |b| b.fetch_tasks(owner))
    }

    fn create_task(&self, owner: &str, new: &NewTask) -> anyhow::Result<Task> {
        self.attempt("create task", self.policy.writes, |b| {
            b.create_task(owner, new)
        })
    }

    fn update_task(&self, id: &str, patch: &TaskPatch) -> anyhow::Result<()> {
        self.attempt("update task", self.policy.writes, |b| {
            b.update_task(id, patch)
        })
    }

    fn delete_task(&self, id: &str) -> anyhow::Result<()> {
        self.attempt("delete task", self.policy.writes, |b| b.delete_task(id))
    }

    fn fetch_categories(&self, owner: &str) -> anyhow::Result<Vec<Category>> {
        self.attempt("fetch categories", self.policy.reads, |b| {
            b.fetch_categories(owner)
        })
    }

    fn create_category(&self, owner: &str, new: &NewCategory) -> anyhow::Result<Category> {
        self.attempt("create category", self.policy.writes, |b| {
            b.create_category(owner, new)
        })
    }

    fn update_category(&self, id: &str, patch: &CategoryPatch) -> anyhow::Result<()> {
        self.attempt("update category", self.policy.writes, |b| {
            b.update_category(id, patch)
        })
    }

    fn delete_category(&self, id: &str) -> anyhow::Result<()> {
        self.attempt("delete category", self.policy.writes, |b| {
            b.delete_category(id)
        })
    }
}
