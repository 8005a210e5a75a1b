use crate::authority;
use crate::blob::{DynBlobStore, PendingUpload};
use crate::db::DynStore;
use crate::error::{AppError, Result};
use crate::models::{AddMember, Group, GroupDetails, GroupSummary, JoinGroup};
use crate::services::user::UserService;
use crate::ws::Realtime;
use taskhub_protocol::UserSummary;
use uuid::Uuid;

#[derive(Debug)]
pub struct NewGroup {
    pub name: Option<String>,
    pub description: Option<String>,
    pub image: Option<PendingUpload>,
}

#[derive(Clone)]
pub struct GroupService {
    store: DynStore,
    blobs: DynBlobStore,
    realtime: Realtime,
    users: UserService,
}

impl GroupService {
    pub fn new(store: DynStore, blobs: DynBlobStore, realtime: Realtime, users: UserService) -> Self {
        Self {
            store,
            blobs,
            realtime,
            users,
        }
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Group> {
        self.store
            .get_group(id)
            .await?
            .ok_or_else(|| AppError::not_found("Group not found"))
    }

    pub async fn create(&self, creator_id: Uuid, input: NewGroup) -> Result<GroupDetails> {
        let name = input.name.as_deref().map(str::trim).unwrap_or_default();
        let description = input.description.as_deref().map(str::trim).unwrap_or_default();
        if name.is_empty() || description.is_empty() {
            return Err(AppError::bad_request("Name and description are required"));
        }

        let image_url = match input.image {
            Some(file) => Some(
                self.blobs
                    .upload(file)
                    .await
                    .ok_or_else(|| AppError::bad_request("Error uploading group image"))?,
            ),
            None => None,
        };

        let group = Group::new(name, description, image_url, creator_id);
        self.store.insert_group(&group).await?;

        tracing::info!("User {} created group {} ({})", creator_id, group.id, group.name);
        self.populate(&group).await
    }

    pub async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<GroupSummary>> {
        let groups = self.store.groups_for_member(user_id).await?;
        let admin_ids: Vec<Uuid> = groups.iter().map(|g| g.admin_id).collect();
        let admins = self.users.summaries(&admin_ids).await?;

        Ok(groups
            .into_iter()
            .map(|g| GroupSummary {
                admin: admins
                    .get(&g.admin_id)
                    .cloned()
                    .unwrap_or_else(|| UserSummary::unknown(g.admin_id)),
                members_count: g.members.len(),
                id: g.id,
                name: g.name,
                description: g.description,
                image_url: g.image_url,
            })
            .collect())
    }

    pub async fn details(&self, group_id: Uuid, requester_id: Uuid) -> Result<GroupDetails> {
        let group = self.get_by_id(group_id).await?;
        authority::require_member(&group, requester_id)?;
        self.populate(&group).await
    }

    pub async fn add_member(&self, requester_id: Uuid, input: AddMember) -> Result<GroupDetails> {
        let (Some(group_id), Some(user_id)) = (input.group_id, input.user_id) else {
            return Err(AppError::bad_request("Both groupId and userId are required"));
        };

        let group = self.get_by_id(group_id).await?;
        self.users.get_by_id(user_id).await?;

        if !authority::can_manage_members(&group, requester_id) {
            return Err(AppError::forbidden("Only admin can add members"));
        }
        if authority::is_member(&group, user_id) || !self.store.add_member(group_id, user_id).await? {
            return Err(AppError::bad_request("User is already a member"));
        }

        tracing::info!("User {} added to group {} by {}", user_id, group_id, requester_id);
        self.populate(&self.get_by_id(group_id).await?).await
    }

    pub async fn remove_member(
        &self,
        group_id: Uuid,
        member_id: Uuid,
        requester_id: Uuid,
    ) -> Result<GroupDetails> {
        let hub = self.realtime.hub()?;
        let group = self.get_by_id(group_id).await?;

        if !authority::can_manage_members(&group, requester_id) {
            return Err(AppError::forbidden("Only admin can remove members"));
        }
        if authority::is_admin(&group, member_id) {
            return Err(AppError::bad_request("Admin cannot be removed from the group"));
        }
        if !authority::is_member(&group, member_id) || !self.store.remove_member(group_id, member_id).await? {
            return Err(AppError::not_found("User is not a member of this group"));
        }

        // A removed member stops receiving the group's live events
        hub.evict_user(group_id, member_id).await;

        tracing::info!("User {} removed from group {} by {}", member_id, group_id, requester_id);
        self.populate(&self.get_by_id(group_id).await?).await
    }

    pub async fn join(&self, user_id: Uuid, input: JoinGroup) -> Result<GroupDetails> {
        let Some(group_id) = input.group_id else {
            return Err(AppError::bad_request("Group ID is required"));
        };

        let group = self.get_by_id(group_id).await?;
        if authority::is_member(&group, user_id) || !self.store.add_member(group_id, user_id).await? {
            return Err(AppError::bad_request("You are already a member of this group"));
        }

        tracing::info!("User {} joined group {}", user_id, group_id);
        self.populate(&self.get_by_id(group_id).await?).await
    }

    /// Deletes the group with all of its tasks and messages.
    pub async fn delete(&self, group_id: Uuid, requester_id: Uuid) -> Result<()> {
        let hub = self.realtime.hub()?;
        let group = self.get_by_id(group_id).await?;

        if !authority::can_delete_group(&group, requester_id) {
            return Err(AppError::forbidden("You do not have permission to delete this group"));
        }
        if !self.store.delete_group(group_id).await? {
            return Err(AppError::not_found("Group not found"));
        }

        hub.close_room(group_id).await;

        tracing::info!("Group {} deleted by {}", group_id, requester_id);
        Ok(())
    }

    async fn populate(&self, group: &Group) -> Result<GroupDetails> {
        let mut ids = group.members.clone();
        if !ids.contains(&group.admin_id) {
            ids.push(group.admin_id);
        }
        let users = self.users.summaries(&ids).await?;
        let summary = |id: &Uuid| users.get(id).cloned().unwrap_or_else(|| UserSummary::unknown(*id));

        Ok(GroupDetails {
            id: group.id,
            name: group.name.clone(),
            description: group.description.clone(),
            image_url: group.image_url.clone(),
            admin: summary(&group.admin_id),
            members: group.members.iter().map(summary).collect(),
            members_count: group.members.len(),
            created_at: group.created_at,
        })
    }
}
