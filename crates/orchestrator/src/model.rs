use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Which template/role a page plays. The engine only ever distinguishes
/// `Cover` from everything else; `Ending` is kept as a distinct tag for
/// callers (and because the original outline format has it) but is never
/// treated differently from `Content` by the templater or the pipeline —
/// see DESIGN.md's Open Question (a).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageType {
    Cover,
    Content,
    Ending,
}

impl PageType {
    pub fn is_cover(&self) -> bool {
        matches!(self, PageType::Cover)
    }
}

/// One unit of illustrated output. Immutable after a task starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    /// Monotonic ordinal, 1-based, unique within a task.
    pub index: u32,
    #[serde(rename = "type")]
    pub page_type: PageType,
    pub content: String,
}

/// Ordered sequence of pages plus the serialized form of the whole outline
/// fed to the prompt templater for context.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Outline {
    pub pages: Vec<Page>,
    pub full_outline: String,
}

/// Opaque task identifier: 8+ hex chars, unique per task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn generate() -> Self {
        Self(format!("task_{}", &uuid::Uuid::new_v4().simple().to_string()[..8]))
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Per-task, process-wide state. `generated` and `failed` are disjoint on
/// keys; every key in either is the `index` of some page in `pages`; once
/// `cover_image` is set it is never replaced for the lifetime of the task.
#[derive(Debug, Clone, Default)]
pub struct TaskState {
    pub pages: Vec<Page>,
    pub generated: BTreeMap<u32, String>,
    pub failed: BTreeMap<u32, String>,
    pub cover_image: Option<Vec<u8>>,
    pub full_outline: String,
    pub user_images: Option<Vec<Vec<u8>>>,
    pub user_topic: String,
}

impl TaskState {
    pub fn new(pages: Vec<Page>, full_outline: String, user_images: Option<Vec<Vec<u8>>>, user_topic: String) -> Self {
        Self {
            pages,
            generated: BTreeMap::new(),
            failed: BTreeMap::new(),
            cover_image: None,
            full_outline,
            user_images,
            user_topic,
        }
    }

    pub fn mark_generated(&mut self, index: u32, filename: String) {
        self.failed.remove(&index);
        self.generated.insert(index, filename);
    }

    pub fn mark_failed(&mut self, index: u32, message: String) {
        self.generated.remove(&index);
        self.failed.insert(index, message);
    }

    /// Derived catalog status per the external interface contract:
    /// `draft` if nothing generated yet, `completed` if every page is
    /// generated, `partial` otherwise.
    pub fn status(&self) -> TaskStatus {
        if self.generated.is_empty() {
            TaskStatus::Draft
        } else if self.generated.len() == self.pages.len() {
            TaskStatus::Completed
        } else {
            TaskStatus::Partial
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Draft,
    Partial,
    Completed,
}
