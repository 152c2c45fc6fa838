use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

/// Id of the reserved "No Category" entry.
pub const NO_CATEGORY_ID: &str = "0";
pub const NO_CATEGORY_NAME: &str = "No Category";
pub const NO_CATEGORY_COLOR: &str = "#64748b";

pub const TITLE_MIN_CHARS: usize = 3;
pub const TITLE_MAX_CHARS: usize = 100;
pub const DESCRIPTION_MAX_CHARS: usize = 500;
pub const CATEGORY_NAME_MAX_CHARS: usize = 30;

const PLACEHOLDER_PREFIX: &str = "temp-";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaletteColor {
    pub name: &'static str,
    pub hex: &'static str,
}

pub const PALETTE: [PaletteColor; 8] = [
    PaletteColor { name: "Blue", hex: "#3b82f6" },
    PaletteColor { name: "Indigo", hex: "#6366f1" },
    PaletteColor { name: "Purple", hex: "#a855f7" },
    PaletteColor { name: "Pink", hex: "#ec4899" },
    PaletteColor { name: "Red", hex: "#ef4444" },
    PaletteColor { name: "Orange", hex: "#f97316" },
    PaletteColor { name: "Yellow", hex: "#eab308" },
    PaletteColor { name: "Green", hex: "#22c55e" },
];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,

    pub title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub completed: bool,

    #[serde(default = "default_category_id")]
    pub category_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Category {
    pub id: String,
    pub name: String,
    pub color: String,
}

/// Fields of a task before an id has been assigned.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default = "default_category_id")]
    pub category_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewCategory {
    pub name: String,
    pub color: String,
}

/// Partial update of a task. `description: Some(None)` clears it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub completed: Option<bool>,
    pub category_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CategoryPatch {
    pub name: Option<String>,
    pub color: Option<String>,
}

/// A record addressable by id inside a cached collection.
pub trait Record: Clone + PartialEq + std::fmt::Debug {
    type New: Clone + std::fmt::Debug;
    type Patch: Clone + std::fmt::Debug;

    fn id(&self) -> &str;
    fn from_new(id: String, new: &Self::New) -> Self;
    fn apply_patch(&mut self, patch: &Self::Patch);
}

impl Record for Task {
    type New = NewTask;
    type Patch = TaskPatch;

    fn id(&self) -> &str {
        &self.id
    }

    fn from_new(id: String, new: &NewTask) -> Self {
        Self {
            id,
            title: new.title.clone(),
            description: new.description.clone(),
            completed: new.completed,
            category_id: new.category_id.clone(),
        }
    }

    fn apply_patch(&mut self, patch: &TaskPatch) {
        if let Some(title) = patch.title.as_ref() {
            self.title = title.clone();
        }
        if let Some(description) = patch.description.as_ref() {
            self.description = description.clone();
        }
        if let Some(completed) = patch.completed {
            self.completed = completed;
        }
        if let Some(category_id) = patch.category_id.as_ref() {
            self.category_id = category_id.clone();
        }
    }
}

impl Record for Category {
    type New = NewCategory;
    type Patch = CategoryPatch;

    fn id(&self) -> &str {
        &self.id
    }

    fn from_new(id: String, new: &NewCategory) -> Self {
        Self {
            id,
            name: new.name.clone(),
            color: new.color.clone(),
        }
    }

    fn apply_patch(&mut self, patch: &CategoryPatch) {
        if let Some(name) = patch.name.as_ref() {
            self.name = name.clone();
        }
        if let Some(color) = patch.color.as_ref() {
            self.color = color.clone();
        }
    }
}

impl Task {
    pub fn status_label(&self) -> &'static str {
        if self.completed { "Completed" } else { "Pending" }
    }

    pub fn to_new(&self) -> NewTask {
        NewTask {
            title: self.title.clone(),
            description: self.description.clone(),
            completed: self.completed,
            category_id: self.category_id.clone(),
        }
    }
}

impl Category {
    pub fn no_category() -> Self {
        Self {
            id: NO_CATEGORY_ID.to_string(),
            name: NO_CATEGORY_NAME.to_string(),
            color: NO_CATEGORY_COLOR.to_string(),
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.id == NO_CATEGORY_ID
    }
}

impl NewTask {
    pub fn new(title: impl Into<String>, category_id: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: None,
            completed: false,
            category_id: category_id.into(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Trims the title, drops a blank description, and checks every field
    /// against the known categories.
    pub fn validated(mut self, categories: &[Category]) -> Result<Self, ValidationError> {
        self.title = validate_title(&self.title)?;
        self.description = validate_description(self.description)?;
        self.category_id = validate_category_ref(&self.category_id, categories)?;
        Ok(self)
    }
}

impl TaskPatch {
    pub fn status(completed: bool) -> Self {
        Self {
            completed: Some(completed),
            ..Self::default()
        }
    }

    pub fn category(category_id: impl Into<String>) -> Self {
        Self {
            category_id: Some(category_id.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.completed.is_none()
            && self.category_id.is_none()
    }

    pub fn validated(mut self, categories: &[Category]) -> Result<Self, ValidationError> {
        if let Some(title) = self.title.as_deref() {
            self.title = Some(validate_title(title)?);
        }
        if let Some(description) = self.description.take() {
            self.description = Some(validate_description(description)?);
        }
        if let Some(category_id) = self.category_id.as_deref() {
            self.category_id = Some(validate_category_ref(category_id, categories)?);
        }
        Ok(self)
    }
}

impl NewCategory {
    /// Builds a category with the next free palette color.
    pub fn with_next_color(name: impl Into<String>, existing: &[Category]) -> Self {
        Self {
            name: name.into(),
            color: next_color(existing).to_string(),
        }
    }

    pub fn validated(mut self, existing: &[Category]) -> Result<Self, ValidationError> {
        self.name = validate_category_name(&self.name, existing, None)?;
        Ok(self)
    }
}

pub fn new_record_id() -> String {
    Uuid::new_v4().to_string()
}

pub fn placeholder_id() -> String {
    format!("{PLACEHOLDER_PREFIX}{}", Uuid::new_v4())
}

pub fn is_placeholder_id(id: &str) -> bool {
    id.starts_with(PLACEHOLDER_PREFIX)
}

/// Least-used palette color; palette order breaks ties, so every color is
/// handed out once before any is repeated.
pub fn next_color(categories: &[Category]) -> &'static str {
    let mut best = PALETTE[0].hex;
    let mut best_uses = usize::MAX;

    for color in PALETTE.iter() {
        let uses = categories
            .iter()
            .filter(|category| !category.is_sentinel())
            .filter(|category| category.color.eq_ignore_ascii_case(color.hex))
            .count();
        if uses < best_uses {
            best = color.hex;
            best_uses = uses;
        }
    }

    best
}

pub fn validate_title(raw: &str) -> Result<String, ValidationError> {
    let title = raw.trim();
    let len = title.chars().count();
    if len == 0 {
        return Err(ValidationError::new("title", "Title is required"));
    }
    if len < TITLE_MIN_CHARS {
        return Err(ValidationError::new(
            "title",
            "Title must be at least 3 characters",
        ));
    }
    if len > TITLE_MAX_CHARS {
        return Err(ValidationError::new(
            "title",
            "Title must be less than 100 characters",
        ));
    }
    Ok(title.to_string())
}

fn validate_description(raw: Option<String>) -> Result<Option<String>, ValidationError> {
    let Some(description) = raw else {
        return Ok(None);
    };
    if description.chars().count() > DESCRIPTION_MAX_CHARS {
        return Err(ValidationError::new(
            "description",
            "Description must be less than 500 characters",
        ));
    }
    if description.trim().is_empty() {
        Ok(None)
    } else {
        Ok(Some(description))
    }
}

fn validate_category_ref(raw: &str, categories: &[Category]) -> Result<String, ValidationError> {
    let id = raw.trim();
    if id.is_empty() {
        return Err(ValidationError::new("categoryId", "Category is required"));
    }
    if id != NO_CATEGORY_ID && !categories.iter().any(|category| category.id == id) {
        return Err(ValidationError::new(
            "categoryId",
            format!("Unknown category: {id}"),
        ));
    }
    Ok(id.to_string())
}

/// `renaming` is the id of the category being renamed, which may keep its own name.
pub fn validate_category_name(
    raw: &str,
    existing: &[Category],
    renaming: Option<&str>,
) -> Result<String, ValidationError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(ValidationError::new("name", "Category name is required"));
    }
    if name.chars().count() > CATEGORY_NAME_MAX_CHARS {
        return Err(ValidationError::new(
            "name",
            "Category name must be less than 30 characters",
        ));
    }
    let taken = existing.iter().any(|category| {
        Some(category.id.as_str()) != renaming && category.name.eq_ignore_ascii_case(name)
    });
    if taken {
        return Err(ValidationError::new(
            "name",
            format!("A category named {name} already exists"),
        ));
    }
    Ok(name.to_string())
}

pub fn seed_categories() -> Vec<Category> {
    vec![
        Category::no_category(),
        Category {
            id: "1".to_string(),
            name: "Work".to_string(),
            color: "#3b82f6".to_string(),
        },
        Category {
            id: "2".to_string(),
            name: "Personal".to_string(),
            color: "#a855f7".to_string(),
        },
        Category {
            id: "3".to_string(),
            name: "Urgent".to_string(),
            color: "#ef4444".to_string(),
        },
    ]
}

pub fn seed_tasks() -> Vec<Task> {
    let seed = [
        (
            "1",
            "Complete Project Proposal",
            "Write and submit the quarterly project proposal including budget analysis and timeline estimates.",
            false,
            "1",
        ),
        (
            "2",
            "Team Meeting",
            "Weekly standup meeting to discuss project progress and upcoming deadlines.",
            true,
            "2",
        ),
        (
            "3",
            "Code Review",
            "Review pull requests from team members and provide constructive feedback on implementation.",
            false,
            "3",
        ),
        (
            "4",
            "Update Documentation",
            "Update API documentation and user guide to reflect recent changes in the application.",
            true,
            "1",
        ),
        (
            "5",
            "Bug Fixes",
            "Investigate and fix reported bugs in the authentication module and user dashboard.",
            false,
            "2",
        ),
        (
            "6",
            "Deploy to Production",
            "Deploy the latest version to production environment after thorough testing and approval.",
            false,
            "3",
        ),
    ];

    seed.into_iter()
        .map(|(id, title, description, completed, category_id)| Task {
            id: id.to_string(),
            title: title.to_string(),
            description: Some(description.to_string()),
            completed,
            category_id: category_id.to_string(),
        })
        .collect()
}

fn default_category_id() -> String {
    NO_CATEGORY_ID.to_string()
}
