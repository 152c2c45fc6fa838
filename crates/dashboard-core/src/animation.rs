//! Decouples "which tasks match the filter" from "which tasks are on screen".
//!
//! Every tracked task id carries exactly one [`AnimationStatus`]. A task that
//! stops matching the filter stays rendered as `Exiting` until its exit
//! transition runs out; a task that starts matching is flagged `Entering` for
//! the length of its entrance. Explicit deletes go through `Removing`, which
//! takes precedence over both filter-driven transitions.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::task::Task;

pub const DEFAULT_ENTER: Duration = Duration::from_millis(600);
pub const DEFAULT_EXIT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnimationStatus {
    Stable,
    Entering,
    Exiting,
    Removing,
}

impl AnimationStatus {
    /// Cards flip out both when deleted and when filtered away.
    pub fn is_leaving(self) -> bool {
        matches!(self, Self::Exiting | Self::Removing)
    }
}

#[derive(Debug, Clone, Copy)]
struct Transition {
    status: AnimationStatus,
    until: Option<Instant>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderItem {
    pub task: Task,
    pub animation: AnimationStatus,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderPlan {
    pub items: Vec<RenderItem>,
}

impl RenderPlan {
    /// Nothing to draw: the view shows its "No tasks found" placeholder.
    pub fn shows_placeholder(&self) -> bool {
        self.items.is_empty()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.items.iter().map(|item| item.task.id.as_str()).collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.items.iter().any(|item| item.task.id == id)
    }
}

#[derive(Debug, Clone)]
pub struct Reconciler {
    enter: Duration,
    exit: Duration,
    tracked: HashMap<String, Transition>,
    previous: HashSet<String>,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new(DEFAULT_ENTER, DEFAULT_EXIT)
    }
}

impl Reconciler {
    pub fn new(enter: Duration, exit: Duration) -> Self {
        Self {
            enter,
            exit,
            tracked: HashMap::new(),
            previous: HashSet::new(),
        }
    }

    pub fn status(&self, id: &str) -> AnimationStatus {
        self.tracked
            .get(id)
            .map(|transition| transition.status)
            .unwrap_or(AnimationStatus::Stable)
    }

    pub fn is_removing(&self, id: &str) -> bool {
        self.status(id) == AnimationStatus::Removing
    }

    pub fn is_entering(&self, id: &str) -> bool {
        self.status(id) == AnimationStatus::Entering
    }

    pub fn is_exiting(&self, id: &str) -> bool {
        self.status(id) == AnimationStatus::Exiting
    }

    /// Flags an explicit delete. Returns false when the id is already being
    /// removed, so a second delete of the same task is a no-op.
    pub fn mark_removing(&mut self, id: &str) -> bool {
        if self.is_removing(id) {
            return false;
        }
        debug!(id, "task removing");
        self.tracked.insert(
            id.to_string(),
            Transition {
                status: AnimationStatus::Removing,
                until: None,
            },
        );
        true
    }

    pub fn clear_removing(&mut self, id: &str) {
        if self.is_removing(id) {
            self.tracked.remove(id);
        }
    }

    /// Drops entrance and exit flags whose transition has run out.
    pub fn expire(&mut self, now: Instant) {
        self.tracked.retain(|id, transition| match transition.until {
            Some(until) if until <= now => {
                trace!(id = %id, status = ?transition.status, "transition finished");
                false
            }
            _ => true,
        });
    }

    /// One render pass. `all` is the backing list in display order,
    /// `filtered` the subset currently matching the filter.
    #[tracing::instrument(skip_all, fields(all = all.len(), filtered = filtered.len()))]
    pub fn reconcile(&mut self, all: &[Task], filtered: &[Task], now: Instant) -> RenderPlan {
        self.expire(now);

        let present: HashSet<&str> = all.iter().map(|task| task.id.as_str()).collect();
        self.tracked.retain(|id, transition| {
            transition.status == AnimationStatus::Removing || present.contains(id.as_str())
        });

        let current: HashSet<String> = filtered.iter().map(|task| task.id.clone()).collect();

        let newly_exiting: Vec<String> = self
            .previous
            .iter()
            .filter(|id| !current.contains(*id))
            .filter(|id| present.contains(id.as_str()))
            .filter(|id| !self.is_removing(id))
            .cloned()
            .collect();

        let newly_entering: Vec<String> = filtered
            .iter()
            .map(|task| task.id.clone())
            .filter(|id| !self.previous.contains(id))
            .filter(|id| !self.is_removing(id))
            .collect();

        for id in newly_exiting {
            trace!(id = %id, "task exiting");
            self.tracked.insert(
                id,
                Transition {
                    status: AnimationStatus::Exiting,
                    until: Some(now + self.exit),
                },
            );
        }
        for id in newly_entering {
            trace!(id = %id, "task entering");
            self.tracked.insert(
                id,
                Transition {
                    status: AnimationStatus::Entering,
                    until: Some(now + self.enter),
                },
            );
        }

        let items = all
            .iter()
            .filter_map(|task| {
                let animation = self.status(&task.id);
                let rendered = current.contains(&task.id) || animation.is_leaving();
                rendered.then(|| RenderItem {
                    task: task.clone(),
                    animation,
                })
            })
            .collect();

        self.previous = current;
        RenderPlan { items }
    }

    /// Earliest pending transition deadline, for callers that schedule a
    /// wake-up instead of polling.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.tracked
            .values()
            .filter_map(|transition| transition.until)
            .min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{NewTask, Record};

    fn task(id: &str) -> Task {
        Task::from_new(id.to_string(), &NewTask::new(format!("task {id}"), "1"))
    }

    fn tasks(ids: &[&str]) -> Vec<Task> {
        ids.iter().map(|id| task(id)).collect()
    }

    #[test]
    fn first_pass_flags_everything_entering() {
        let mut reconciler = Reconciler::default();
        let all = tasks(&["a", "b"]);
        let plan = reconciler.reconcile(&all, &all, Instant::now());

        assert_eq!(plan.ids(), vec!["a", "b"]);
        assert!(plan
            .items
            .iter()
            .all(|item| item.animation == AnimationStatus::Entering));
    }

    #[test]
    fn entering_flag_clears_after_enter_duration() {
        let start = Instant::now();
        let mut reconciler = Reconciler::default();
        let all = tasks(&["a"]);
        reconciler.reconcile(&all, &all, start);

        let plan = reconciler.reconcile(&all, &all, start + Duration::from_millis(599));
        assert_eq!(plan.items[0].animation, AnimationStatus::Entering);

        let plan = reconciler.reconcile(&all, &all, start + DEFAULT_ENTER);
        assert_eq!(plan.items[0].animation, AnimationStatus::Stable);
    }

    #[test]
    fn filtered_out_task_stays_rendered_until_exit_elapses() {
        let start = Instant::now();
        let mut reconciler = Reconciler::default();
        let all = tasks(&["a", "b"]);
        reconciler.reconcile(&all, &all, start);

        let only_b = tasks(&["b"]);
        let t1 = start + Duration::from_millis(10);
        let plan = reconciler.reconcile(&all, &only_b, t1);
        assert_eq!(plan.ids(), vec!["a", "b"]);
        assert!(reconciler.is_exiting("a"));

        let plan = reconciler.reconcile(&all, &only_b, t1 + Duration::from_millis(499));
        assert!(plan.contains("a"));

        let plan = reconciler.reconcile(&all, &only_b, t1 + DEFAULT_EXIT);
        assert_eq!(plan.ids(), vec!["b"]);
        assert_eq!(reconciler.status("a"), AnimationStatus::Stable);
    }

    #[test]
    fn removing_task_is_not_also_exiting() {
        let start = Instant::now();
        let mut reconciler = Reconciler::default();
        let all = tasks(&["a", "b"]);
        reconciler.reconcile(&all, &all, start);

        assert!(reconciler.mark_removing("a"));
        let only_b = tasks(&["b"]);
        let plan = reconciler.reconcile(&all, &only_b, start + Duration::from_millis(1));

        assert!(plan.contains("a"));
        assert_eq!(reconciler.status("a"), AnimationStatus::Removing);
    }

    #[test]
    fn task_deleted_mid_entrance_becomes_removing() {
        let start = Instant::now();
        let mut reconciler = Reconciler::default();
        let all = tasks(&["a"]);
        reconciler.reconcile(&all, &all, start);
        assert!(reconciler.is_entering("a"));

        assert!(reconciler.mark_removing("a"));
        assert!(!reconciler.is_entering("a"));
        assert!(reconciler.is_removing("a"));

        let plan = reconciler.reconcile(&all, &all, start + Duration::from_millis(700));
        assert_eq!(plan.items[0].animation, AnimationStatus::Removing);
    }

    #[test]
    fn second_mark_removing_is_rejected() {
        let mut reconciler = Reconciler::default();
        assert!(reconciler.mark_removing("x"));
        assert!(!reconciler.mark_removing("x"));
        reconciler.clear_removing("x");
        assert_eq!(reconciler.status("x"), AnimationStatus::Stable);
    }

    #[test]
    fn deleted_task_is_not_tracked_as_exiting() {
        let start = Instant::now();
        let mut reconciler = Reconciler::default();
        let all = tasks(&["a", "b"]);
        reconciler.reconcile(&all, &all, start);

        reconciler.mark_removing("a");
        let remaining = tasks(&["b"]);
        reconciler.clear_removing("a");
        let plan = reconciler.reconcile(&remaining, &remaining, start + Duration::from_millis(500));

        assert_eq!(plan.ids(), vec!["b"]);
        assert_eq!(reconciler.status("a"), AnimationStatus::Stable);
    }

    #[test]
    fn returning_task_switches_from_exiting_to_entering() {
        let start = Instant::now();
        let mut reconciler = Reconciler::default();
        let all = tasks(&["a"]);
        reconciler.reconcile(&all, &all, start + DEFAULT_ENTER);
        reconciler.reconcile(&all, &[], start + DEFAULT_ENTER);
        assert!(reconciler.is_exiting("a"));

        reconciler.reconcile(&all, &all, start + DEFAULT_ENTER + Duration::from_millis(100));
        assert!(reconciler.is_entering("a"));
    }

    #[test]
    fn empty_render_set_shows_placeholder() {
        let mut reconciler = Reconciler::default();
        let plan = reconciler.reconcile(&[], &[], Instant::now());
        assert!(plan.shows_placeholder());
    }

    #[test]
    fn next_deadline_tracks_earliest_transition() {
        let start = Instant::now();
        let mut reconciler = Reconciler::default();
        assert_eq!(reconciler.next_deadline(), None);
        let all = tasks(&["a"]);
        reconciler.reconcile(&all, &all, start);
        assert_eq!(reconciler.next_deadline(), Some(start + DEFAULT_ENTER));
    }
}
