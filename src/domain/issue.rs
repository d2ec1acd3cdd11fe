use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub id: i64,
    pub title: String,
    pub slug: String,
    pub description: Option<String>,
    pub content: Option<String>,
    pub published_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub sent_to_subscribers: bool,
    pub sent_at: Option<DateTime<Utc>>,
}

impl Issue {
    /// Markdown body, if there is anything besides whitespace in it.
    pub fn sendable_content(&self) -> Option<&str> {
        self.content.as_deref().filter(|c| !c.trim().is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewIssue {
    pub title: String,
    pub slug: String,
    pub description: Option<String>,
    pub content: Option<String>,
    #[serde(rename = "publishingDate")]
    pub published_at: DateTime<Utc>,
}

/// Partial update; `None` leaves the stored value alone.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueUpdate {
    pub title: Option<String>,
    pub slug: Option<String>,
    pub description: Option<String>,
    pub content: Option<String>,
    #[serde(rename = "publishingDate")]
    pub published_at: Option<DateTime<Utc>>,
}

/// How a caller points at an issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssueRef {
    Id(i64),
    Slug(String),
}

impl std::fmt::Display for IssueRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IssueRef::Id(id) => write!(f, "#{}", id),
            IssueRef::Slug(slug) => f.write_str(slug),
        }
    }
}
