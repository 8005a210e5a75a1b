use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Default page size for message listings
pub const DEFAULT_PAGE_SIZE: i64 = 50;
pub const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub group_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub attachments: Vec<String>,
    /// Grows only; the sender is always the first entry
    #[sqlx(skip)]
    pub read_by: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(group_id: Uuid, sender_id: Uuid, content: String, attachments: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            group_id,
            sender_id,
            content,
            attachments,
            read_by: vec![sender_id],
            created_at: Utc::now(),
        }
    }

    pub fn is_read_by(&self, user_id: Uuid) -> bool {
        self.read_by.contains(&user_id)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListMessagesQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

/// Offset pagination over a newest-first feed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: i64,
    pub page_size: i64,
}

impl PageRequest {
    pub fn new(page: Option<i64>, page_size: Option<i64>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            page_size: page_size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
        }
    }

    /// Rows to skip. Pages past the end saturate instead of overflowing.
    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.page_size)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(None, None)
    }
}

impl From<ListMessagesQuery> for PageRequest {
    fn from(query: ListMessagesQuery) -> Self {
        Self::new(query.page, query.limit)
    }
}
