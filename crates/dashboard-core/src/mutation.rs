//! Optimistic cache patching.
//!
//! A mutation snapshots the cached collection, patches it immediately, and
//! is settled once the remote call returns: success keeps the patch (and
//! swaps a placeholder for the authoritative record), failure restores the
//! snapshot verbatim. Either way the collection is marked stale so the next
//! refresh reconciles it with the source of truth.

use anyhow::anyhow;
use tracing::{debug, info, warn};

use crate::task::{Record, placeholder_id};

#[derive(Debug, Clone)]
pub enum Optimistic<R: Record> {
    Add { placeholder: String, new: R::New },
    Update { id: String, patch: R::Patch },
    Delete { id: String },
}

impl<R: Record> Optimistic<R> {
    pub fn add(new: R::New) -> Self {
        Self::Add {
            placeholder: placeholder_id(),
            new,
        }
    }

    pub fn update(id: impl Into<String>, patch: R::Patch) -> Self {
        Self::Update {
            id: id.into(),
            patch,
        }
    }

    pub fn delete(id: impl Into<String>) -> Self {
        Self::Delete { id: id.into() }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Add { .. } => "add",
            Self::Update { .. } => "update",
            Self::Delete { .. } => "delete",
        }
    }

    /// Id of the record this mutation touches in the cache.
    pub fn target_id(&self) -> &str {
        match self {
            Self::Add { placeholder, .. } => placeholder,
            Self::Update { id, .. } | Self::Delete { id } => id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationState {
    Idle,
    Applied,
    Succeeded,
    RolledBack,
}

impl MutationState {
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Succeeded | Self::RolledBack)
    }
}

#[derive(Debug, Clone)]
pub struct Mutation<R: Record> {
    op: Optimistic<R>,
    snapshot: Option<Vec<R>>,
    state: MutationState,
}

impl<R: Record> Mutation<R> {
    pub fn new(op: Optimistic<R>) -> Self {
        Self {
            op,
            snapshot: None,
            state: MutationState::Idle,
        }
    }

    pub fn op(&self) -> &Optimistic<R> {
        &self.op
    }

    pub fn state(&self) -> MutationState {
        self.state
    }

    /// The collection as it was right before the optimistic patch.
    pub fn snapshot(&self) -> Option<&[R]> {
        self.snapshot.as_deref()
    }
}

/// One cached collection (tasks or categories).
#[derive(Debug, Clone)]
pub struct QueryCache<R> {
    name: &'static str,
    data: Vec<R>,
    loaded: bool,
    stale: bool,
}

impl<R: Record> QueryCache<R> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            data: Vec::new(),
            loaded: false,
            stale: true,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn data(&self) -> &[R] {
        &self.data
    }

    pub fn get(&self, id: &str) -> Option<&R> {
        self.data.iter().find(|record| record.id() == id)
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn set_data(&mut self, data: Vec<R>) {
        self.data = data;
        self.loaded = true;
        self.stale = false;
    }

    pub fn invalidate(&mut self) {
        self.stale = true;
    }

    /// Replaces the cached data with a fresh read. On failure the cached data
    /// is kept and the collection stays stale.
    #[tracing::instrument(skip_all, fields(cache = self.name))]
    pub fn refresh(
        &mut self,
        fetch: impl FnOnce() -> anyhow::Result<Vec<R>>,
    ) -> anyhow::Result<()> {
        match fetch() {
            Ok(data) => {
                debug!(count = data.len(), "cache refreshed");
                self.set_data(data);
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "cache refresh failed; keeping cached data");
                self.stale = true;
                Err(err)
            }
        }
    }

    pub fn refresh_if_stale(
        &mut self,
        fetch: impl FnOnce() -> anyhow::Result<Vec<R>>,
    ) -> anyhow::Result<()> {
        if self.stale { self.refresh(fetch) } else { Ok(()) }
    }

    /// Snapshots the collection and applies the optimistic patch.
    pub fn apply(&mut self, mutation: &mut Mutation<R>) -> anyhow::Result<()> {
        if mutation.state != MutationState::Idle {
            return Err(anyhow!(
                "{} mutation already {:?}",
                mutation.op.kind(),
                mutation.state
            ));
        }

        self.patch(mutation);
        Ok(())
    }

    pub fn begin(&mut self, op: Optimistic<R>) -> Mutation<R> {
        let mut mutation = Mutation::new(op);
        self.patch(&mut mutation);
        mutation
    }

    fn patch(&mut self, mutation: &mut Mutation<R>) {
        mutation.snapshot = Some(self.data.clone());
        match &mutation.op {
            Optimistic::Add { placeholder, new } => {
                self.data.push(R::from_new(placeholder.clone(), new));
            }
            Optimistic::Update { id, patch } => {
                for record in self.data.iter_mut().filter(|record| record.id() == id) {
                    record.apply_patch(patch);
                }
            }
            Optimistic::Delete { id } => {
                self.data.retain(|record| record.id() != id);
            }
        }
        mutation.state = MutationState::Applied;

        debug!(
            cache = self.name,
            kind = mutation.op.kind(),
            id = mutation.op.target_id(),
            "optimistic patch applied"
        );
    }

    /// Settles an applied mutation with the remote outcome. `created` carries
    /// the authoritative record returned for an add.
    pub fn settle(
        &mut self,
        mutation: &mut Mutation<R>,
        outcome: anyhow::Result<Option<R>>,
    ) -> anyhow::Result<Option<R>> {
        if mutation.state != MutationState::Applied {
            return Err(anyhow!(
                "{} mutation is not in flight ({:?})",
                mutation.op.kind(),
                mutation.state
            ));
        }

        self.stale = true;
        match outcome {
            Ok(created) => {
                if let (Optimistic::Add { placeholder, .. }, Some(record)) =
                    (&mutation.op, created.as_ref())
                {
                    for slot in self
                        .data
                        .iter_mut()
                        .filter(|slot| slot.id() == placeholder.as_str())
                    {
                        *slot = record.clone();
                    }
                }
                mutation.state = MutationState::Succeeded;
                info!(
                    cache = self.name,
                    kind = mutation.op.kind(),
                    "mutation settled"
                );
                Ok(created)
            }
            Err(err) => {
                if let Some(snapshot) = mutation.snapshot.take() {
                    self.data = snapshot;
                }
                mutation.state = MutationState::RolledBack;
                warn!(
                    cache = self.name,
                    kind = mutation.op.kind(),
                    error = %err,
                    "mutation failed; rolled back"
                );
                Err(err)
            }
        }
    }

    /// Begin, call the remote, settle.
    pub fn run(
        &mut self,
        op: Optimistic<R>,
        remote: impl FnOnce(&Optimistic<R>) -> anyhow::Result<Option<R>>,
    ) -> (MutationState, anyhow::Result<Option<R>>) {
        let mut mutation = self.begin(op);
        let outcome = remote(mutation.op());
        let result = self.settle(&mut mutation, outcome);
        (mutation.state(), result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{NewTask, Task, TaskPatch, is_placeholder_id, seed_tasks};

    fn cache() -> QueryCache<Task> {
        let mut cache = QueryCache::new("tasks");
        cache.set_data(seed_tasks());
        cache
    }

    #[test]
    fn add_shows_placeholder_until_settled() {
        let mut cache = cache();
        let mut mutation = cache.begin(Optimistic::add(NewTask::new("Buy milk", "1")));

        assert_eq!(mutation.state(), MutationState::Applied);
        let last = cache.data().last().unwrap();
        assert!(is_placeholder_id(&last.id));
        assert_eq!(last.title, "Buy milk");

        let authoritative = Task::from_new("server-1".to_string(), &NewTask::new("Buy milk", "1"));
        cache
            .settle(&mut mutation, Ok(Some(authoritative.clone())))
            .unwrap();

        assert_eq!(cache.data().last(), Some(&authoritative));
        assert_eq!(mutation.state(), MutationState::Succeeded);
        assert!(cache.is_stale());
    }

    #[test]
    fn failed_update_restores_snapshot_exactly() {
        let mut cache = cache();
        let before = cache.data().to_vec();

        let mut mutation = cache.begin(Optimistic::update("1", TaskPatch::status(true)));
        assert!(cache.get("1").unwrap().completed);

        let err = cache
            .settle(&mut mutation, Err(anyhow!("offline")))
            .unwrap_err();
        assert_eq!(err.to_string(), "offline");
        assert_eq!(cache.data(), before.as_slice());
        assert_eq!(mutation.state(), MutationState::RolledBack);
    }

    #[test]
    fn failed_delete_brings_the_record_back() {
        let mut cache = cache();
        let before = cache.data().to_vec();

        let (state, result) = cache.run(Optimistic::delete("3"), |_| Err(anyhow!("offline")));

        assert!(result.is_err());
        assert_eq!(state, MutationState::RolledBack);
        assert_eq!(cache.data(), before.as_slice());
    }

    #[test]
    fn applied_mutation_cannot_be_applied_twice() {
        let mut cache = cache();
        let mut mutation = cache.begin(Optimistic::delete("3"));
        assert_eq!(mutation.snapshot().map(<[Task]>::len), Some(seed_tasks().len()));

        let err = cache.apply(&mut mutation).unwrap_err();
        assert!(err.to_string().contains("already Applied"));

        let mut fresh = Mutation::new(Optimistic::delete("4"));
        cache.apply(&mut fresh).unwrap();
        assert_eq!(fresh.state(), MutationState::Applied);
        assert!(cache.get("4").is_none());
    }

    #[test]
    fn settled_mutation_cannot_settle_again() {
        let mut cache = cache();
        let mut mutation = cache.begin(Optimistic::delete("3"));
        cache.settle(&mut mutation, Ok(None)).unwrap();
        assert!(cache.settle(&mut mutation, Err(anyhow!("late"))).is_err());
        assert!(cache.get("3").is_none());
    }

    #[test]
    fn rollback_of_older_mutation_clobbers_newer_patch() {
        let mut cache = cache();
        let mut first = cache.begin(Optimistic::update("1", TaskPatch::status(true)));
        let mut second = cache.begin(Optimistic::delete("2"));

        cache.settle(&mut second, Ok(None)).unwrap();
        cache.settle(&mut first, Err(anyhow!("offline"))).unwrap_err();

        // Last settled wins: the first snapshot predates the delete.
        assert!(cache.get("2").is_some());
        assert!(!cache.get("1").unwrap().completed);
    }

    #[test]
    fn refresh_failure_keeps_data() {
        let mut cache = cache();
        cache.invalidate();
        assert!(cache.refresh(|| Err(anyhow!("offline"))).is_err());
        assert_eq!(cache.data().len(), 6);
        assert!(cache.is_stale());

        cache.refresh_if_stale(|| Ok(vec![])).unwrap();
        assert!(cache.data().is_empty());
        assert!(!cache.is_stale());
    }
}
