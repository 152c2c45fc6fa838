use std::collections::BTreeMap;

use serde::{
  Deserialize,
  Serialize
};
use tracing::trace;

use crate::task::{
  Category,
  Task
};

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
)]
pub enum StatusLabel {
  Completed,
  Pending
}

impl StatusLabel {
  pub fn as_str(
    self
  ) -> &'static str {
    match self {
      | Self::Completed => "Completed",
      | Self::Pending => "Pending"
    }
  }

  pub fn of(task: &Task) -> Self {
    if task.completed {
      Self::Completed
    } else {
      Self::Pending
    }
  }

  pub fn parse(
    raw: &str
  ) -> Option<Self> {
    match raw
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "completed" | "done" => {
        Some(Self::Completed)
      }
      | "pending" | "open" => {
        Some(Self::Pending)
      }
      | _ => None
    }
  }
}

#[derive(
  Debug,
  Clone,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
)]
pub struct StatusCheckbox {
  pub id:      String,
  pub label:   StatusLabel,
  pub checked: bool
}

pub fn default_checkboxes()
-> Vec<StatusCheckbox> {
  vec![
    StatusCheckbox {
      id:      "1".to_string(),
      label:   StatusLabel::Completed,
      checked: false
    },
    StatusCheckbox {
      id:      "2".to_string(),
      label:   StatusLabel::Pending,
      checked: false
    },
  ]
}

/// Search text, status checkboxes and selected categories. An empty
/// selection in either set disables that predicate.
#[derive(
  Debug, Clone, PartialEq, Eq,
)]
pub struct FilterState {
  pub search_term:         String,
  pub checkboxes:
    Vec<StatusCheckbox>,
  pub selected_categories: Vec<String>
}

impl Default for FilterState {
  fn default() -> Self {
    Self {
      search_term:         String::new(
      ),
      checkboxes:
        default_checkboxes(),
      selected_categories: vec![]
    }
  }
}

impl FilterState {
  pub fn set_search_term(
    &mut self,
    term: impl Into<String>
  ) {
    self.search_term = term.into();
  }

  pub fn toggle_checkbox(
    &mut self,
    checkbox_id: &str,
    checked: bool
  ) {
    for checkbox in
      self.checkboxes.iter_mut()
    {
      if checkbox.id == checkbox_id {
        checkbox.checked = checked;
      }
    }
  }

  pub fn set_status(
    &mut self,
    label: StatusLabel,
    checked: bool
  ) {
    for checkbox in
      self.checkboxes.iter_mut()
    {
      if checkbox.label == label {
        checkbox.checked = checked;
      }
    }
  }

  pub fn clear_all_checkboxes(
    &mut self
  ) {
    for checkbox in
      self.checkboxes.iter_mut()
    {
      checkbox.checked = false;
    }
  }

  pub fn set_selected_categories(
    &mut self,
    category_ids: Vec<String>
  ) {
    self.selected_categories =
      category_ids;
  }

  pub fn toggle_category_selection(
    &mut self,
    category_id: &str
  ) {
    if let Some(pos) = self
      .selected_categories
      .iter()
      .position(|id| id == category_id)
    {
      self
        .selected_categories
        .remove(pos);
    } else {
      self
        .selected_categories
        .push(category_id.to_string());
    }
  }

  pub fn active_labels(
    &self
  ) -> Vec<StatusLabel> {
    active_labels(&self.checkboxes)
  }

  /// Applies the state with an explicit search term, which lets callers
  /// pass the debounced value instead of the raw input.
  pub fn apply(
    &self,
    tasks: &[Task],
    search_term: &str
  ) -> Vec<Task> {
    filter_tasks(
      tasks,
      search_term,
      &self.active_labels(),
      &self.selected_categories
    )
  }
}

pub fn active_labels(
  checkboxes: &[StatusCheckbox]
) -> Vec<StatusLabel> {
  checkboxes
    .iter()
    .filter(|checkbox| checkbox.checked)
    .map(|checkbox| checkbox.label)
    .collect()
}

/// Ordered subsequence of `tasks` matching all three predicates.
#[tracing::instrument(skip_all, fields(
  total = tasks.len()
))]
pub fn filter_tasks(
  tasks: &[Task],
  search_term: &str,
  active_labels: &[StatusLabel],
  selected_categories: &[String]
) -> Vec<Task> {
  let needle =
    search_term.to_lowercase();

  let out: Vec<Task> = tasks
    .iter()
    .filter(|task| {
      matches_search(task, &needle)
        && matches_status(
          task,
          active_labels
        )
        && matches_category(
          task,
          selected_categories
        )
    })
    .cloned()
    .collect();

  trace!(
    matched = out.len(),
    "filtered tasks"
  );
  out
}

fn matches_search(
  task: &Task,
  needle: &str
) -> bool {
  if needle.is_empty() {
    return true;
  }

  task
    .title
    .to_lowercase()
    .contains(needle)
    || task
      .description
      .as_deref()
      .map(|text| {
        text
          .to_lowercase()
          .contains(needle)
      })
      .unwrap_or(false)
}

fn matches_status(
  task: &Task,
  active_labels: &[StatusLabel]
) -> bool {
  active_labels.is_empty()
    || active_labels
      .contains(&StatusLabel::of(task))
}

fn matches_category(
  task: &Task,
  selected_categories: &[String]
) -> bool {
  selected_categories.is_empty()
    || selected_categories
      .iter()
      .any(|id| *id == task.category_id)
}

pub fn count_pending(
  tasks: &[Task]
) -> usize {
  tasks
    .iter()
    .filter(|task| !task.completed)
    .count()
}

pub fn count_completed(
  tasks: &[Task]
) -> usize {
  tasks
    .iter()
    .filter(|task| task.completed)
    .count()
}

/// Task count per known category, zero-filled. Tasks pointing at an
/// unknown category are not counted.
pub fn count_by_category(
  tasks: &[Task],
  categories: &[Category]
) -> BTreeMap<String, usize> {
  let mut counts: BTreeMap<
    String,
    usize
  > = categories
    .iter()
    .map(|category| {
      (category.id.clone(), 0)
    })
    .collect();

  for task in tasks {
    if let Some(count) =
      counts.get_mut(&task.category_id)
    {
      *count += 1;
    }
  }

  counts
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq,
)]
pub enum SortBy {
  Title,
  Completed,
  Created
}

pub fn sort_tasks(
  tasks: &[Task],
  sort_by: SortBy
) -> Vec<Task> {
  let mut sorted = tasks.to_vec();
  match sort_by {
    | SortBy::Title => {
      sorted.sort_by(|a, b| {
        a.title
          .to_lowercase()
          .cmp(&b.title.to_lowercase())
      })
    }
    | SortBy::Completed => {
      sorted
        .sort_by_key(|task| task.completed)
    }
    | SortBy::Created => {}
  }
  sorted
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::task::{
    NO_CATEGORY_ID,
    seed_categories,
    seed_tasks
  };

  fn ids(tasks: &[Task]) -> Vec<&str> {
    tasks
      .iter()
      .map(|task| task.id.as_str())
      .collect()
  }

  #[test]
  fn empty_filter_returns_everything_in_order()
  {
    let tasks = seed_tasks();
    let out =
      filter_tasks(&tasks, "", &[], &[]);
    assert_eq!(out, tasks);
  }

  #[test]
  fn search_matches_title_or_description_ignoring_case()
  {
    let tasks = seed_tasks();
    let by_title = filter_tasks(
      &tasks,
      "code REVIEW",
      &[],
      &[]
    );
    assert_eq!(ids(&by_title), vec![
      "3"
    ]);

    let by_description = filter_tasks(
      &tasks,
      "standup",
      &[],
      &[]
    );
    assert_eq!(
      ids(&by_description),
      vec!["2"]
    );
  }

  #[test]
  fn task_without_description_matches_on_title_only()
  {
    let mut tasks = seed_tasks();
    tasks[0].description = None;
    let out = filter_tasks(
      &tasks,
      "budget",
      &[],
      &[]
    );
    assert!(out.is_empty());
  }

  #[test]
  fn status_labels_are_disjunctive()
  {
    let tasks = seed_tasks();
    let completed = filter_tasks(
      &tasks,
      "",
      &[StatusLabel::Completed],
      &[]
    );
    assert_eq!(ids(&completed), vec![
      "2", "4"
    ]);

    let both = filter_tasks(
      &tasks,
      "",
      &[
        StatusLabel::Completed,
        StatusLabel::Pending
      ],
      &[]
    );
    assert_eq!(both.len(), tasks.len());
  }

  #[test]
  fn predicates_are_conjunctive() {
    let tasks = seed_tasks();
    let out = filter_tasks(
      &tasks,
      "",
      &[StatusLabel::Pending],
      &["1".to_string(), "3".to_string()]
    );
    assert_eq!(ids(&out), vec![
      "1", "3", "6"
    ]);
  }

  #[test]
  fn adding_predicates_never_grows_the_result()
  {
    let tasks = seed_tasks();
    let base =
      filter_tasks(&tasks, "", &[], &[]);
    let searched =
      filter_tasks(&tasks, "e", &[], &[]);
    let with_status = filter_tasks(
      &tasks,
      "e",
      &[StatusLabel::Pending],
      &[]
    );
    let with_category = filter_tasks(
      &tasks,
      "e",
      &[StatusLabel::Pending],
      &["2".to_string()]
    );
    assert!(searched.len() <= base.len());
    assert!(
      with_status.len() <= searched.len()
    );
    assert!(
      with_category.len()
        <= with_status.len()
    );
  }

  #[test]
  fn filtering_is_idempotent() {
    let tasks = seed_tasks();
    let labels = [StatusLabel::Pending];
    let once = filter_tasks(
      &tasks, "o", &labels, &[]
    );
    let twice = filter_tasks(
      &once, "o", &labels, &[]
    );
    assert_eq!(once, twice);
  }

  #[test]
  fn counts_cover_every_category() {
    let tasks = seed_tasks();
    let categories = seed_categories();
    let counts = count_by_category(
      &tasks,
      &categories
    );

    assert_eq!(
      counts.get(NO_CATEGORY_ID),
      Some(&0)
    );
    assert_eq!(counts.get("1"), Some(&2));
    assert_eq!(
      counts.values().sum::<usize>(),
      tasks.len()
    );
    assert_eq!(
      count_pending(&tasks)
        + count_completed(&tasks),
      tasks.len()
    );
  }

  #[test]
  fn filter_state_toggles() {
    let mut state =
      FilterState::default();
    assert!(
      state.active_labels().is_empty()
    );

    state.toggle_checkbox("2", true);
    assert_eq!(
      state.active_labels(),
      vec![StatusLabel::Pending]
    );

    state.toggle_category_selection("1");
    state.toggle_category_selection("3");
    state.toggle_category_selection("1");
    assert_eq!(
      state.selected_categories,
      vec!["3".to_string()]
    );

    state.clear_all_checkboxes();
    assert!(
      state.active_labels().is_empty()
    );
  }

  #[test]
  fn sort_by_completed_puts_pending_first()
  {
    let tasks = seed_tasks();
    let sorted =
      sort_tasks(&tasks, SortBy::Completed);
    assert!(!sorted[0].completed);
    assert!(sorted[sorted.len() - 1].completed);
    assert_eq!(
      sort_tasks(&tasks, SortBy::Created),
      tasks
    );
  }
}
