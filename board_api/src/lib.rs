use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Account role. Only admin, staff and hod may post.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Student,
    Staff,
    Hod,
    Admin,
}

impl Role {
    /// Whether this role may create, edit, delete, pin and reorder notices.
    pub fn has_post_authority(self) -> bool {
        matches!(self, Role::Admin | Role::Staff | Role::Hod)
    }
}

/// Department, used both as a user's home department and a notice's audience.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Dept {
    #[default]
    All,
    #[serde(rename = "CSE")]
    Cse,
    #[serde(rename = "MECH")]
    Mech,
    #[serde(rename = "CIVIL")]
    Civil,
    #[serde(rename = "EEE")]
    Eee,
    #[serde(rename = "ECE")]
    Ece,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[default]
    Normal,
    Important,
    Urgent,
}

impl Priority {
    /// Sort weight: urgent(2) > important(1) > normal(0).
    pub fn weight(self) -> u8 {
        match self {
            Priority::Normal => 0,
            Priority::Important => 1,
            Priority::Urgent => 2,
        }
    }
}

/// Plain category discriminant, see [`NoticeKind`] for the payload-carrying form.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Announcement,
    Event,
    Exam,
}

/// Category together with its category-specific data.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "category")]
pub enum NoticeKind {
    Announcement,
    Event {
        #[serde(default)]
        event_date: Option<i64>,
    },
    Exam,
}

impl NoticeKind {
    pub fn category(&self) -> Category {
        match self {
            NoticeKind::Announcement => Category::Announcement,
            NoticeKind::Event { .. } => Category::Event,
            NoticeKind::Exam => Category::Exam,
        }
    }

    /// Event date, only ever present on events.
    pub fn event_date(&self) -> Option<i64> {
        match self {
            NoticeKind::Event { event_date } => *event_date,
            _ => None,
        }
    }
}

impl Default for NoticeKind {
    fn default() -> Self {
        NoticeKind::Announcement
    }
}

/// Category selector of the list view. `All` disables the filter.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum CategoryFilter {
    #[default]
    All,
    Announcement,
    Event,
    Exam,
}

impl CategoryFilter {
    pub fn matches(self, category: Category) -> bool {
        match self {
            CategoryFilter::All => true,
            CategoryFilter::Announcement => category == Category::Announcement,
            CategoryFilter::Event => category == Category::Event,
            CategoryFilter::Exam => category == Category::Exam,
        }
    }
}

/// Current list filters of a viewer.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct FilterState {
    #[serde(default)]
    pub category: CategoryFilter,
    #[serde(default)]
    pub search: String,
    #[serde(default)]
    pub saved_only: bool,
}

impl FilterState {
    /// True when no search, category or saved-only restriction is active.
    pub fn is_unfiltered(&self) -> bool {
        self.search.is_empty() && self.category == CategoryFilter::All && !self.saved_only
    }
}

/// A directory account as persisted.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct User {
    pub username: String,
    pub email: String,
    /// Argon2 PHC string, empty for accounts created through OAuth.
    #[serde(default)]
    pub password_hash: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub dept: Dept,
    #[serde(default)]
    pub read_notices: BTreeSet<i64>,
    #[serde(default)]
    pub google: bool,
}

/// Public view of a [`User`], never carries credentials.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub username: String,
    pub email: String,
    pub role: Role,
    pub dept: Dept,
    pub google: bool,
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        Self {
            username: user.username.clone(),
            email: user.email.clone(),
            role: user.role,
            dept: user.dept,
            google: user.google,
        }
    }
}

/// Fields a poster supplies when creating or editing a notice.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct NoticeDraft {
    pub title: String,
    pub desc: String,
    #[serde(flatten)]
    pub kind: NoticeKind,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub dept: Dept,
    #[serde(default)]
    pub expiry_date: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Notice {
    pub id: i64,
    pub title: String,
    pub desc: String,
    #[serde(flatten)]
    pub kind: NoticeKind,
    pub priority: Priority,
    pub dept: Dept,
    #[serde(default)]
    pub expiry_date: Option<i64>,
    #[serde(default)]
    pub attachment: Option<String>,
    #[serde(default)]
    pub attachment_name: Option<String>,
    #[serde(default)]
    pub attachment_size: Option<u64>,
    #[serde(default)]
    pub is_uploading_file: bool,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub order: Option<i64>,
    pub date: i64,
    #[serde(default)]
    pub likes: BTreeSet<String>,
    #[serde(default)]
    pub bookmarks: BTreeSet<String>,
}

impl Notice {
    pub fn category(&self) -> Category {
        self.kind.category()
    }
}

/// Events pushed to connected clients.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "topic", content = "payload", rename_all = "snake_case")]
pub enum BoardEvent {
    NoticeCreated { id: i64, title: String, dept: Dept },
    NoticeUpdated { id: i64 },
    NoticeDeleted { id: i64 },
    AttachmentReady { id: i64, url: String },
    AttachmentFailed { id: i64, reason: String },
}
