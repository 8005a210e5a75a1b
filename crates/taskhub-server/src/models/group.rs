use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use taskhub_protocol::UserSummary;
use uuid::Uuid;

/// A group of users sharing tasks and a chat room.
///
/// `members` always contains the admin and keeps join order.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub image_url: Option<String>,
    pub admin_id: Uuid,
    #[sqlx(skip)]
    pub members: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Group {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        image_url: Option<String>,
        admin_id: Uuid,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: description.into(),
            image_url,
            admin_id,
            members: vec![admin_id],
            created_at: now,
            updated_at: now,
        }
    }
}

/// Entry of the "my groups" listing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupSummary {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub image_url: Option<String>,
    pub admin: UserSummary,
    pub members_count: usize,
}

/// Group with admin and members populated
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupDetails {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub image_url: Option<String>,
    pub admin: UserSummary,
    pub members: Vec<UserSummary>,
    pub members_count: usize,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddMember {
    pub group_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinGroup {
    pub group_id: Option<Uuid>,
}
