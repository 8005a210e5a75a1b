use crate::authority;
use crate::blob::{DynBlobStore, PendingUpload};
use crate::db::DynStore;
use crate::error::{AppError, Result};
use crate::models::{Group, Message, PageRequest};
use crate::services::user::UserService;
use crate::ws::Realtime;
use taskhub_protocol::{MessageData, ReceivedMessage, ServerEvent, UserSummary};
use uuid::Uuid;

#[derive(Clone)]
pub struct MessageService {
    store: DynStore,
    blobs: DynBlobStore,
    realtime: Realtime,
    users: UserService,
}

impl MessageService {
    pub fn new(store: DynStore, blobs: DynBlobStore, realtime: Realtime, users: UserService) -> Self {
        Self {
            store,
            blobs,
            realtime,
            users,
        }
    }

    async fn member_group(&self, group_id: Uuid, user_id: Uuid) -> Result<Group> {
        let group = self
            .store
            .get_group(group_id)
            .await?
            .ok_or_else(|| AppError::not_found("Group not found"))?;
        authority::require_member(&group, user_id)?;
        Ok(group)
    }

    /// Persists a message and pushes it to the group's room.
    ///
    /// Attachments that fail to upload are dropped; the message is still sent.
    pub async fn send(
        &self,
        group_id: Uuid,
        sender_id: Uuid,
        content: Option<String>,
        attachments: Vec<PendingUpload>,
    ) -> Result<MessageData> {
        let hub = self.realtime.hub()?;
        self.member_group(group_id, sender_id).await?;

        let content = content.unwrap_or_default();
        if content.trim().is_empty() {
            return Err(AppError::bad_request("Message content is required"));
        }

        let mut urls = Vec::with_capacity(attachments.len());
        for file in attachments {
            if let Some(url) = self.blobs.upload(file).await {
                urls.push(url);
            }
        }

        let message = Message::new(group_id, sender_id, content, urls);
        self.store.insert_message(&message).await?;

        let data = self.populate(vec![message]).await?.remove(0);
        let delivered = hub
            .broadcast_to_group(
                group_id,
                &ServerEvent::ReceiveMessage {
                    message: ReceivedMessage::Stored(data.clone()),
                    ephemeral: false,
                },
            )
            .await;

        tracing::debug!("Message {} sent to group {} ({} live)", data.id, group_id, delivered);
        Ok(data)
    }

    /// One page of the group's messages, newest first.
    ///
    /// Fetching a page marks every message on it as read by the requester.
    pub async fn list(&self, group_id: Uuid, requester_id: Uuid, page: PageRequest) -> Result<Vec<MessageData>> {
        self.member_group(group_id, requester_id).await?;

        let mut messages = self.store.list_messages(group_id, page).await?;
        let unread: Vec<Uuid> = messages
            .iter()
            .filter(|m| !m.is_read_by(requester_id))
            .map(|m| m.id)
            .collect();

        if !unread.is_empty() {
            self.store.mark_read(&unread, requester_id).await?;
            for message in messages.iter_mut().filter(|m| unread.contains(&m.id)) {
                message.read_by.push(requester_id);
            }
        }

        self.populate(messages).await
    }

    pub async fn unread_count(&self, group_id: Uuid, requester_id: Uuid) -> Result<i64> {
        self.member_group(group_id, requester_id).await?;
        self.store.count_unread(group_id, requester_id).await
    }

    /// Broadcasts a typing indicator. Nothing is stored.
    pub async fn notify_typing(&self, group_id: Uuid, requester_id: Uuid, username: String) -> Result<()> {
        let hub = self.realtime.hub()?;
        self.member_group(group_id, requester_id).await?;

        hub.broadcast_to_group(group_id, &ServerEvent::UserTyping { group_id, username })
            .await;
        Ok(())
    }

    pub async fn delete(&self, message_id: Uuid, requester_id: Uuid) -> Result<()> {
        let hub = self.realtime.hub()?;
        let message = self
            .store
            .get_message(message_id)
            .await?
            .ok_or_else(|| AppError::not_found("Message not found"))?;
        let group = self
            .store
            .get_group(message.group_id)
            .await?
            .ok_or_else(|| AppError::not_found("Group not found"))?;

        if !authority::can_delete_message(&message, &group, requester_id) {
            return Err(AppError::forbidden(
                "You do not have permission to delete this message",
            ));
        }
        if !self.store.delete_message(message_id).await? {
            return Err(AppError::not_found("Message not found"));
        }

        hub.broadcast_to_group(
            group.id,
            &ServerEvent::MessageDeleted {
                group_id: group.id,
                message_id,
            },
        )
        .await;

        tracing::info!("Message {} deleted by {}", message_id, requester_id);
        Ok(())
    }

    async fn populate(&self, messages: Vec<Message>) -> Result<Vec<MessageData>> {
        let mut sender_ids: Vec<Uuid> = messages.iter().map(|m| m.sender_id).collect();
        sender_ids.sort();
        sender_ids.dedup();
        let senders = self.users.summaries(&sender_ids).await?;

        Ok(messages
            .into_iter()
            .map(|m| MessageData {
                sender: senders
                    .get(&m.sender_id)
                    .cloned()
                    .unwrap_or_else(|| UserSummary::unknown(m.sender_id)),
                id: m.id,
                group_id: m.group_id,
                content: m.content,
                attachments: m.attachments,
                read_by: m.read_by,
                created_at: m.created_at,
            })
            .collect())
    }
}
