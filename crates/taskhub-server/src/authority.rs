//! Membership and ownership rules shared by groups, tasks and chat.
//!
//! Pure decisions over records that are already loaded. Services call these
//! before any write and bail out on `false`.

use crate::error::{AppError, Result};
use crate::models::{Group, Message, Task};
use uuid::Uuid;

pub fn is_admin(group: &Group, user_id: Uuid) -> bool {
    group.admin_id == user_id
}

/// The admin counts as a member even if the member list was loaded without it.
pub fn is_member(group: &Group, user_id: Uuid) -> bool {
    is_admin(group, user_id) || group.members.contains(&user_id)
}

pub fn can_delete_message(message: &Message, group: &Group, user_id: Uuid) -> bool {
    message.sender_id == user_id || is_admin(group, user_id)
}

pub fn can_delete_task(task: &Task, group: &Group, user_id: Uuid) -> bool {
    task.created_by == user_id || is_admin(group, user_id)
}

pub fn can_manage_members(group: &Group, user_id: Uuid) -> bool {
    is_admin(group, user_id)
}

pub fn can_delete_group(group: &Group, user_id: Uuid) -> bool {
    is_admin(group, user_id)
}

pub fn require_member(group: &Group, user_id: Uuid) -> Result<()> {
    if is_member(group, user_id) {
        Ok(())
    } else {
        Err(AppError::forbidden("You are not a member of this group"))
    }
}
