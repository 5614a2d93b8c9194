//! Storage collaborator boundary.
//!
//! The relational store that owns users, chats and messages lives in the main
//! API; this service only needs the handful of reads and writes below. Backed
//! by an in-memory implementation until it is wired to the shared database.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::error::ApiError;

pub type UserId = i64;
pub type ChatId = i64;
pub type MessageId = i64;

/// User row as this service sees it.
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: UserId,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub avatar: Option<String>,
    pub is_admin: bool,
    pub is_banned: bool,
}

/// Conversation row: participant list plus the group flag.
#[derive(Debug, Clone)]
pub struct ChatRecord {
    pub id: ChatId,
    pub participants: Vec<UserId>,
    pub is_group: bool,
}

/// Authoritative persisted message, as returned by the store.
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// CRUD operations this service performs against the main API's database.
#[async_trait]
pub trait Store: Send + Sync {
    async fn user_by_id(&self, id: UserId) -> Result<Option<UserRecord>, ApiError>;
    async fn chat_by_id(&self, id: ChatId) -> Result<Option<ChatRecord>, ApiError>;
    async fn create_message(
        &self,
        chat_id: ChatId,
        sender_id: UserId,
        content: &str,
    ) -> Result<StoredMessage, ApiError>;
    async fn set_chat_last_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        at: DateTime<Utc>,
    ) -> Result<(), ApiError>;
    /// Ids of admin-flagged users, for "admins only" broadcasts.
    async fn admin_user_ids(&self) -> Result<Vec<UserId>, ApiError>;
    /// Whether a session token (sha256 hex of the raw token) has been revoked.
    async fn is_token_revoked(&self, token_hash: &str) -> Result<bool, ApiError>;
}

// ---------------------------------------------------------------------------
// In-memory implementation (for Phase 1 / tests)
// ---------------------------------------------------------------------------

pub struct MemoryStore {
    users: Mutex<HashMap<UserId, UserRecord>>,
    chats: Mutex<HashMap<ChatId, ChatRecord>>,
    messages: Mutex<Vec<StoredMessage>>,
    last_message: Mutex<HashMap<ChatId, (MessageId, DateTime<Utc>)>>,
    revoked: Mutex<HashSet<String>>,
    next_message_id: AtomicI64,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            users: Mutex::new(HashMap::new()),
            chats: Mutex::new(HashMap::new()),
            messages: Mutex::new(Vec::new()),
            last_message: Mutex::new(HashMap::new()),
            revoked: Mutex::new(HashSet::new()),
            next_message_id: AtomicI64::new(1),
            fail_writes: AtomicBool::new(false),
        }
    }

    pub fn add_user(&self, user: UserRecord) {
        self.users.lock().insert(user.id, user);
    }

    pub fn add_chat(&self, chat: ChatRecord) {
        self.chats.lock().insert(chat.id, chat);
    }

    pub fn revoke_token(&self, token_hash: &str) {
        self.revoked.lock().insert(token_hash.to_string());
    }

    /// Make subsequent message writes fail, to exercise persistence-error paths.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn message_count(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn last_message_of(&self, chat_id: ChatId) -> Option<MessageId> {
        self.last_message.lock().get(&chat_id).map(|(id, _)| *id)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn user_by_id(&self, id: UserId) -> Result<Option<UserRecord>, ApiError> {
        Ok(self.users.lock().get(&id).cloned())
    }

    async fn chat_by_id(&self, id: ChatId) -> Result<Option<ChatRecord>, ApiError> {
        Ok(self.chats.lock().get(&id).cloned())
    }

    async fn create_message(
        &self,
        chat_id: ChatId,
        sender_id: UserId,
        content: &str,
    ) -> Result<StoredMessage, ApiError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ApiError::internal("storage unavailable"));
        }
        let message = StoredMessage {
            id: self.next_message_id.fetch_add(1, Ordering::SeqCst),
            chat_id,
            sender_id,
            content: content.to_string(),
            created_at: Utc::now(),
        };
        self.messages.lock().push(message.clone());
        Ok(message)
    }

    async fn set_chat_last_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        at: DateTime<Utc>,
    ) -> Result<(), ApiError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ApiError::internal("storage unavailable"));
        }
        self.last_message.lock().insert(chat_id, (message_id, at));
        Ok(())
    }

    async fn admin_user_ids(&self) -> Result<Vec<UserId>, ApiError> {
        let mut ids: Vec<UserId> = self
            .users
            .lock()
            .values()
            .filter(|u| u.is_admin)
            .map(|u| u.id)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn is_token_revoked(&self, token_hash: &str) -> Result<bool, ApiError> {
        Ok(self.revoked.lock().contains(token_hash))
    }
}
