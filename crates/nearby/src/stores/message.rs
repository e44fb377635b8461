//! Message store: conversations, direct message threads, system
//! notifications and unread counters.

use std::sync::RwLock;

use serde_json::{json, Value};
use tracing::{debug, warn};

use nearby_core::validation::{validate_coordinates, validate_message};
use nearby_core::{
    ClearUnread, Conversation, Coordinates, Cursor, DirectMessage, MarkRead, MarkReadRequest,
    SendDirectMessageRequest, SendDirectMessageResponse, UnreadCounts, UserId, THREAD_PAGE_LIMIT,
};
use nearby_sync::{ApiExt, Collection, CollectionKey, EntityCache, PageQuery};

use crate::error::Result;
use crate::stores::{Services, Status};

pub const CONVERSATIONS: &str = "conversations";
pub const NOTIFICATIONS: &str = "notifications";

fn thread_key(conversation_id: &str) -> CollectionKey {
    CollectionKey::scoped("messages", conversation_id)
}

// ─────────────────────────────────────────────────────────────────────────────
// Queries
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct Conversations {
    pub limit: Option<usize>,
}

impl PageQuery for Conversations {
    type Item = Conversation;

    fn path(&self) -> &str {
        "/message/conversations"
    }

    fn body(&self, cursor: Option<&Cursor>, limit: usize) -> Value {
        json!({ "cursor": cursor, "limit": limit })
    }

    fn limit_hint(&self) -> Option<usize> {
        self.limit
    }
}

/// One conversation's messages, newest first, 20 per page.
#[derive(Debug, Clone)]
pub struct DirectHistory {
    pub conversation_id: String,
    /// The peer, for a conversation the server has not created yet.
    pub user_id: Option<UserId>,
    pub limit: Option<usize>,
}

impl PageQuery for DirectHistory {
    type Item = DirectMessage;

    fn path(&self) -> &str {
        "/message/direct_history"
    }

    fn body(&self, cursor: Option<&Cursor>, limit: usize) -> Value {
        json!({
            "conversation_id": self.conversation_id,
            "user_id": self.user_id,
            "cursor": cursor,
            "limit": limit,
        })
    }

    fn limit_hint(&self) -> Option<usize> {
        self.limit
    }

    fn default_limit(&self) -> usize {
        THREAD_PAGE_LIMIT
    }
}

#[derive(Debug, Clone, Default)]
pub struct Notifications {
    pub limit: Option<usize>,
}

impl PageQuery for Notifications {
    type Item = DirectMessage;

    fn path(&self) -> &str {
        "/message/notifications"
    }

    fn body(&self, cursor: Option<&Cursor>, limit: usize) -> Value {
        json!({ "cursor": cursor, "limit": limit })
    }

    fn limit_hint(&self) -> Option<usize> {
        self.limit
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Store
// ─────────────────────────────────────────────────────────────────────────────

pub struct MessageStore {
    services: Services,
    conversations: EntityCache<Conversation>,
    messages: EntityCache<DirectMessage>,
    current: RwLock<Option<String>>,
    unread: RwLock<UnreadCounts>,
    status: Status,
}

impl MessageStore {
    pub fn new(services: Services) -> Self {
        Self {
            services,
            conversations: EntityCache::new(),
            messages: EntityCache::new(),
            current: RwLock::new(None),
            unread: RwLock::new(UnreadCounts::default()),
            status: Status::default(),
        }
    }

    pub fn conversations(&self) -> Collection<Conversation> {
        self.conversations.collection(&CONVERSATIONS.into())
    }

    pub fn thread(&self, conversation_id: &str) -> Collection<DirectMessage> {
        self.messages.collection(&thread_key(conversation_id))
    }

    pub fn notifications(&self) -> Collection<DirectMessage> {
        self.messages.collection(&NOTIFICATIONS.into())
    }

    pub fn messages(&self) -> &EntityCache<DirectMessage> {
        &self.messages
    }

    /// The conversation whose history was fetched last.
    pub fn current_conversation(&self) -> Option<String> {
        match self.current.read() {
            Ok(current) => current.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn close_conversation(&self) {
        self.set_current(None);
    }

    fn set_current(&self, conversation_id: Option<String>) {
        match self.current.write() {
            Ok(mut current) => *current = conversation_id,
            Err(poisoned) => *poisoned.into_inner() = conversation_id,
        }
    }

    pub fn unread(&self) -> UnreadCounts {
        match self.unread.read() {
            Ok(unread) => *unread,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn set_unread(&self, counts: UnreadCounts) {
        match self.unread.write() {
            Ok(mut unread) => *unread = counts,
            Err(poisoned) => *poisoned.into_inner() = counts,
        }
    }

    pub fn last_error(&self) -> Option<String> {
        self.status.last_error()
    }

    pub fn is_loading(&self) -> bool {
        self.status.is_loading()
    }

    pub fn clear(&self) {
        self.conversations.reset_all();
        self.messages.reset_all();
        self.set_current(None);
        self.set_unread(UnreadCounts::default());
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Fetches
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn fetch_conversations(&self, refresh: bool) -> Result<Collection<Conversation>> {
        self.status.track(self.fetch_conversations_inner(refresh)).await
    }

    async fn fetch_conversations_inner(&self, refresh: bool) -> Result<Collection<Conversation>> {
        let key = CollectionKey::new(CONVERSATIONS);
        let view = if refresh {
            self.services
                .pages
                .refresh(&self.conversations, &key, Conversations::default())
                .await?
        } else {
            self.services.pages.load_more(&self.conversations, &key).await?
        };
        Ok(view)
    }

    /// Fetch a conversation's messages and make it the current one.
    pub async fn fetch_history(
        &self,
        conversation_id: &str,
        user_id: Option<UserId>,
        refresh: bool,
    ) -> Result<Collection<DirectMessage>> {
        self.set_current(Some(conversation_id.to_string()));
        self.status
            .track(self.fetch_history_inner(conversation_id, user_id, refresh))
            .await
    }

    async fn fetch_history_inner(
        &self,
        conversation_id: &str,
        user_id: Option<UserId>,
        refresh: bool,
    ) -> Result<Collection<DirectMessage>> {
        let key = thread_key(conversation_id);
        let view = if refresh {
            let query = DirectHistory {
                conversation_id: conversation_id.to_string(),
                user_id,
                limit: None,
            };
            self.services.pages.refresh(&self.messages, &key, query).await?
        } else {
            self.services.pages.load_more(&self.messages, &key).await?
        };
        Ok(view)
    }

    pub async fn fetch_notifications(&self, refresh: bool) -> Result<Collection<DirectMessage>> {
        self.status.track(self.fetch_notifications_inner(refresh)).await
    }

    async fn fetch_notifications_inner(&self, refresh: bool) -> Result<Collection<DirectMessage>> {
        let key = CollectionKey::new(NOTIFICATIONS);
        let view = if refresh {
            self.services
                .pages
                .refresh(&self.messages, &key, Notifications::default())
                .await?
        } else {
            self.services.pages.load_more(&self.messages, &key).await?
        };
        Ok(view)
    }

    pub async fn unread_counts(&self) -> Result<UnreadCounts> {
        let result = self.unread_counts_inner().await;
        self.status.record(result)
    }

    async fn unread_counts_inner(&self) -> Result<UnreadCounts> {
        let counts: UnreadCounts = self.services.api.call_empty("/message/unread_count").await?;
        self.set_unread(counts);
        Ok(counts)
    }

    /// Follow-up refresh after a read receipt. Failure only logs.
    async fn refresh_unread_quietly(&self) {
        if let Err(e) = self.unread_counts_inner().await {
            warn!(error = %e, "could not refresh unread counts");
        }
    }

    /// Conversations, notifications and unread counters, fetched concurrently.
    pub async fn load_initial(&self) -> Result<()> {
        let (conversations, notifications, unread) = tokio::join!(
            self.fetch_conversations(true),
            self.fetch_notifications(true),
            self.unread_counts(),
        );
        let result = conversations
            .and(notifications)
            .and(unread)
            .map(|_| ());
        self.status.record(result)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Commands
    // ─────────────────────────────────────────────────────────────────────────

    /// Send a direct message, then refresh the conversation list and the
    /// open thread when the message belongs to it.
    pub async fn send_direct(
        &self,
        recipient_id: UserId,
        content: &str,
        message_type: &str,
        at: Coordinates,
    ) -> Result<SendDirectMessageResponse> {
        let request = SendDirectMessageRequest {
            recipient_id,
            content: content.to_string(),
            message_type: message_type.to_string(),
            latitude: at.latitude,
            longitude: at.longitude,
        };
        self.status.track(self.send_direct_inner(request)).await
    }

    async fn send_direct_inner(
        &self,
        request: SendDirectMessageRequest,
    ) -> Result<SendDirectMessageResponse> {
        validate_message(&request.message_type, &request.content)?;
        validate_coordinates(Coordinates::new(request.latitude, request.longitude))?;
        let sent: SendDirectMessageResponse =
            self.services.api.call("/message/send_direct", &request).await?;
        debug!(message = %sent.message_id, conversation = %sent.conversation_id, "message sent");

        let open = self.current_conversation().as_deref() == Some(sent.conversation_id.as_str());
        let thread = async {
            if open {
                self.fetch_history_inner(&sent.conversation_id, None, true)
                    .await
                    .map(|_| ())
            } else {
                Ok(())
            }
        };
        let (conversations, thread) = tokio::join!(self.fetch_conversations_inner(true), thread);
        if let Err(e) = conversations.and(thread) {
            warn!(error = %e, "could not refresh after sending");
        }
        Ok(sent)
    }

    /// Mark one message read. The receipt shows locally right away.
    pub async fn mark_read(&self, conversation_id: &str, message_id: &str) -> Result<()> {
        let result = self.mark_read_inner(conversation_id, message_id).await;
        self.status.record(result)
    }

    async fn mark_read_inner(&self, conversation_id: &str, message_id: &str) -> Result<()> {
        let request = MarkReadRequest {
            conversation_id: conversation_id.to_string(),
            message_id: Some(message_id.to_string()),
        };
        let confirm = self.services.api.command("/message/mark_read", &request);
        let id = message_id.to_string();
        if self.messages.contains(&id) {
            self.services
                .mutations
                .apply_and_confirm(&self.messages, &id, &MarkRead::now(), confirm)
                .await?;
        } else {
            confirm.await?;
        }
        self.refresh_unread_quietly().await;
        Ok(())
    }

    /// Mark a whole conversation read: every unread message of the thread
    /// gets a receipt and the conversation's counter drops to zero.
    pub async fn mark_conversation_read(&self, conversation_id: &str) -> Result<()> {
        let result = self.mark_conversation_read_inner(conversation_id).await;
        self.status.record(result)
    }

    async fn mark_conversation_read_inner(&self, conversation_id: &str) -> Result<()> {
        let request = MarkReadRequest {
            conversation_id: conversation_id.to_string(),
            message_id: None,
        };
        self.services.api.command("/message/mark_read", &request).await?;

        let receipt = MarkRead::now();
        for message in self.messages.items(&thread_key(conversation_id)) {
            if !message.is_read() {
                self.messages.mutate_everywhere(&message.message_id, &receipt);
            }
        }
        self.conversations
            .mutate_everywhere(&conversation_id.to_string(), &ClearUnread);
        self.refresh_unread_quietly().await;
        Ok(())
    }

    pub async fn delete(&self, message_id: &str) -> Result<()> {
        let result = self.delete_inner(message_id).await;
        self.status.record(result)
    }

    async fn delete_inner(&self, message_id: &str) -> Result<()> {
        self.services
            .api
            .command("/message/delete", &json!({ "message_id": message_id }))
            .await?;
        self.messages.remove_everywhere(&message_id.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nearby_core::message::kinds;
    use nearby_sync::transport::memory::{fail, ok, ok_empty, MemoryTransport};
    use nearby_sync::{ConfirmPolicy, RequestGateway};
    use std::sync::Arc;

    fn message(id: &str, conversation: &str, read: bool) -> Value {
        json!({
            "message_id": id,
            "conversation_id": conversation,
            "sender_id": 2,
            "recipient_id": 1,
            "content": "hi",
            "sent_at": "2024-05-01T08:00:00Z",
            "read_at": if read { json!("2024-05-01T08:01:00Z") } else { Value::Null }
        })
    }

    fn conversation(id: &str, unread: i64) -> Value {
        json!({ "conversation_id": id, "peer_id": 2, "peer_name": "bo", "unread_count": unread })
    }

    fn store(transport: Arc<MemoryTransport>) -> MessageStore {
        let api = Arc::new(RequestGateway::anonymous(transport));
        MessageStore::new(Services::new(api, ConfirmPolicy::default()))
    }

    fn backend() -> Arc<MemoryTransport> {
        let transport = MemoryTransport::new();
        transport.route("/message/conversations", |_| {
            Ok(ok(json!({ "items": [conversation("c1", 2)], "has_more": false })))
        });
        transport.route("/message/direct_history", |_| {
            Ok(ok(json!({
                "items": [message("m1", "c1", false), message("m2", "c1", false), message("m0", "c1", true)],
                "has_more": false
            })))
        });
        transport.route("/message/notifications", |_| {
            Ok(ok(json!({ "items": [], "has_more": false })))
        });
        transport.route("/message/unread_count", |_| {
            Ok(ok(json!({ "total": 2, "direct": 2 })))
        });
        transport.route("/message/mark_read", |_| Ok(ok(json!({ "success": true }))));
        transport
    }

    #[tokio::test]
    async fn test_history_sets_current_and_page_size() {
        let transport = backend();
        let store = store(transport.clone());

        let view = store.fetch_history("c1", Some(UserId(2)), true).await.unwrap();
        assert_eq!(view.len(), 3);
        assert_eq!(store.current_conversation().as_deref(), Some("c1"));

        let call = &transport.calls_to("/message/direct_history")[0];
        assert_eq!(call.arg("limit"), &json!(20));
        assert_eq!(call.arg("user_id"), &json!(2));
    }

    #[tokio::test]
    async fn test_load_initial() {
        let store = store(backend());
        store.load_initial().await.unwrap();

        assert_eq!(store.conversations().len(), 1);
        assert!(store.notifications().is_empty());
        assert_eq!(store.unread().total, 2);
        assert_eq!(store.unread().comment, 0);
        assert!(store.last_error().is_none());
    }

    #[tokio::test]
    async fn test_load_initial_reports_failure() {
        let transport = backend();
        transport.route("/message/unread_count", |_| Ok(fail(5000, "服务器错误")));
        let store = store(transport);

        let err = store.load_initial().await.unwrap_err();
        assert_eq!(err.to_string(), "服务器错误");
        assert_eq!(store.conversations().len(), 1);
    }

    #[tokio::test]
    async fn test_mark_read_is_optimistic() {
        let transport = backend();
        transport.route("/message/mark_read", |_| Ok(fail(5000, "busy")));
        let store = store(transport);
        store.fetch_history("c1", None, true).await.unwrap();

        assert!(store.mark_read("c1", "m1").await.is_err());
        let m1 = store.messages().find(&"m1".to_string()).unwrap();
        assert!(m1.is_read());
    }

    #[tokio::test]
    async fn test_mark_read_sends_message_id() {
        let transport = backend();
        let store = store(transport.clone());

        store.mark_read("c1", "m9").await.unwrap();
        let call = &transport.calls_to("/message/mark_read")[0];
        assert_eq!(call.arg("message_id"), &json!("m9"));
        assert_eq!(transport.call_count("/message/unread_count"), 1);
    }

    #[tokio::test]
    async fn test_mark_conversation_read() {
        let transport = backend();
        let store = store(transport.clone());
        store.fetch_conversations(true).await.unwrap();
        store.fetch_history("c1", None, true).await.unwrap();
        let already = store.messages().find(&"m0".to_string()).unwrap().read_at;

        store.mark_conversation_read("c1").await.unwrap();

        let thread = store.thread("c1");
        assert!(thread.items.iter().all(DirectMessage::is_read));
        assert_eq!(store.messages().find(&"m0".to_string()).unwrap().read_at, already);
        assert_eq!(store.conversations().items[0].unread_count, 0);
        assert!(transport.calls_to("/message/mark_read")[0].arg("message_id").is_null());
    }

    #[tokio::test]
    async fn test_send_refreshes_open_thread() {
        let transport = backend();
        transport.route("/message/send_direct", |_| {
            Ok(ok(json!({
                "message_id": "m3",
                "conversation_id": "c1",
                "recipient_id": 2,
                "sent_at": "2024-05-01T09:00:00Z"
            })))
        });
        let store = store(transport.clone());
        store.fetch_history("c1", None, true).await.unwrap();
        transport.clear_calls();

        store
            .send_direct(UserId(2), "hello", kinds::TEXT, Coordinates::new(35.16, 112.68))
            .await
            .unwrap();

        assert_eq!(transport.call_count("/message/conversations"), 1);
        assert_eq!(transport.call_count("/message/direct_history"), 1);

        store.close_conversation();
        transport.clear_calls();
        store
            .send_direct(UserId(2), "again", kinds::TEXT, Coordinates::new(35.16, 112.68))
            .await
            .unwrap();
        assert_eq!(transport.call_count("/message/direct_history"), 0);
    }

    #[tokio::test]
    async fn test_send_validates_content() {
        let transport = backend();
        let store = store(transport.clone());

        let err = store
            .send_direct(UserId(2), "", kinds::TEXT, Coordinates::new(35.16, 112.68))
            .await
            .unwrap_err();
        assert!(matches!(err, crate::ClientError::Invalid(_)));
        assert_eq!(transport.call_count("/message/send_direct"), 0);
    }

    #[tokio::test]
    async fn test_delete_drops_message() {
        let transport = backend();
        transport.route("/message/delete", |_| Ok(ok_empty()));
        let store = store(transport);
        store.fetch_history("c1", None, true).await.unwrap();

        store.delete("m1").await.unwrap();
        assert_eq!(store.thread("c1").len(), 2);
    }
}
