use crate::db::DynStore;
use crate::error::{AppError, Result};
use crate::models::{UpsertProfile, User};
use chrono::Utc;
use std::collections::HashMap;
use taskhub_protocol::UserSummary;
use uuid::Uuid;

#[derive(Clone)]
pub struct UserService {
    store: DynStore,
}

impl UserService {
    pub fn new(store: DynStore) -> Self {
        Self { store }
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<User> {
        self.store
            .get_user(id)
            .await?
            .ok_or_else(|| AppError::not_found("User not found"))
    }

    /// Makes sure an authenticated identity has a profile row. Existing
    /// profiles are left untouched.
    pub async fn ensure_profile(&self, id: Uuid, username: &str) -> Result<User> {
        if let Some(user) = self.store.get_user(id).await? {
            return Ok(user);
        }

        tracing::info!("Creating profile for user {} ({})", id, username);
        self.store.upsert_user(User::new(id, username, username)).await
    }

    pub async fn update_profile(&self, id: Uuid, username: &str, input: UpsertProfile) -> Result<User> {
        let mut user = self.ensure_profile(id, username).await?;

        if let Some(display_name) = input.display_name {
            let display_name = display_name.trim();
            if display_name.is_empty() {
                return Err(AppError::bad_request("Display name cannot be empty"));
            }
            user.display_name = display_name.to_string();
        }
        if let Some(avatar_url) = input.avatar_url {
            user.avatar_url = Some(avatar_url).filter(|url| !url.is_empty());
        }
        user.updated_at = Utc::now();

        self.store.upsert_user(user).await
    }

    /// Summaries for the given ids; ids without a profile are absent from the map.
    pub async fn summaries(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, UserSummary>> {
        let users = self.store.get_users(ids).await?;
        Ok(users.into_iter().map(|u| (u.id, u.into())).collect())
    }

    /// Ids of every group the user belongs to
    pub async fn group_ids(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        let groups = self.store.groups_for_member(user_id).await?;
        Ok(groups.into_iter().map(|g| g.id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::Fixture;

    #[tokio::test]
    async fn test_ensure_profile_is_idempotent() {
        let fx = Fixture::new();
        let users = &fx.state.user_service;
        let id = Uuid::new_v4();

        let first = users.ensure_profile(id, "alice").await.unwrap();
        let second = users.ensure_profile(id, "renamed").await.unwrap();

        assert_eq!(first.username, "alice");
        assert_eq!(second.username, "alice");
        assert_eq!(second.created_at, first.created_at);
    }

    #[tokio::test]
    async fn test_update_profile() {
        let fx = Fixture::new();
        let users = &fx.state.user_service;
        let id = Uuid::new_v4();

        let user = users
            .update_profile(
                id,
                "bob",
                UpsertProfile {
                    display_name: Some(" Bob B ".to_string()),
                    avatar_url: Some("https://img.test/bob.png".to_string()),
                },
            )
            .await
            .unwrap();
        assert_eq!(user.display_name, "Bob B");
        assert_eq!(user.avatar_url.as_deref(), Some("https://img.test/bob.png"));

        let err = users
            .update_profile(
                id,
                "bob",
                UpsertProfile {
                    display_name: Some("  ".to_string()),
                    avatar_url: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }
}
