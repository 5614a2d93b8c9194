//! Domain-event routing and fan-out to live connections.
//!
//! The router owns the connection table, the presence registry and the room
//! table. Connection lifecycle handlers mutate them through `register` /
//! `unregister` / `join` / `leave`; `dispatch` only reads them. Delivery is
//! at-most-once: a recipient that is offline at dispatch time is skipped
//! silently, with no retry and no backlog.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::config::MultiLoginPolicy;
use crate::error::ApiError;
use crate::store::{Store, UserId};

use super::events::{
    AdminNotice, CommentCreated, CommentLikeUpdate, CommentRemoved, FriendshipUpdate,
    MessageRecord, PostLikeUpdate, ServerEvent, UserSummary,
};
use super::presence::PresenceRegistry;
use super::rooms::{Room, RoomMembership};

/// Outbound sink for one connection. Frames pushed here are written to the
/// socket in order by the connection's own task, which preserves FIFO per
/// connection.
pub type OutboundSender = mpsc::UnboundedSender<Arc<str>>;

struct ConnectionHandle {
    user_id: UserId,
    sender: OutboundSender,
}

/// Recipient set for an admin notification.
#[derive(Debug, Clone)]
pub enum BroadcastTarget {
    /// Every currently connected client.
    All,
    /// The private rooms of the listed user ids.
    Users(Vec<UserId>),
    /// Every admin-flagged user, resolved from storage at dispatch time.
    Admins,
}

/// A typed unit of work for the fan-out engine. One payload shape per
/// variant; the `dispatch` match is exhaustive by construction.
#[derive(Debug, Clone)]
pub enum DomainEvent {
    /// A chat message was persisted. Delivered to every participant except
    /// the sender, resolved through the presence registry (not room
    /// membership) so participants who never joined the room still get it.
    MessageSent {
        message: MessageRecord,
        participants: Vec<UserId>,
    },
    /// Broadcast to all connected clients; clients update their feeds
    /// opportunistically.
    NewPost { post: Value },
    PostLikeUpdated(PostLikeUpdate),
    CommentLikeUpdated(CommentLikeUpdate),
    NewComment(CommentCreated),
    CommentDeleted(CommentRemoved),
    /// Delivered only to the target user's private room.
    NewNotification { user_id: UserId, notification: Value },
    /// One event to each party's private room, with role-specific payloads:
    /// each side sees the *other* party as `friend`.
    FriendshipUpdated {
        kind: String,
        sender: UserSummary,
        receiver: UserSummary,
    },
    AdminNotification {
        target: BroadcastTarget,
        notice: AdminNotice,
    },
    /// A user's first connection came up; everyone else learns about it.
    UserOnline { user_id: UserId, origin: String },
    /// A user's last registered connection went away.
    UserOffline {
        user_id: UserId,
        reason: String,
        origin: String,
    },
}

/// Connection registry plus fan-out engine. One per process, owned by the
/// composition root and injected into every collaborator that raises events.
pub struct EventRouter {
    connections: DashMap<String, ConnectionHandle>,
    presence: PresenceRegistry,
    rooms: RoomMembership,
    store: Arc<dyn Store>,
    multi_login: MultiLoginPolicy,
}

impl EventRouter {
    pub fn new(store: Arc<dyn Store>, multi_login: MultiLoginPolicy) -> Self {
        Self {
            connections: DashMap::new(),
            presence: PresenceRegistry::new(),
            rooms: RoomMembership::new(),
            store,
            multi_login,
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle (called only by the connection handlers)
    // -----------------------------------------------------------------------

    /// Register a new authenticated connection. Returns the evicted
    /// connection id when the same user was already registered.
    ///
    /// Under `ForceClose` the evicted connection's handle is dropped, which
    /// closes its outbound channel and makes its task shut the socket down.
    /// Under `Replace` the old connection stays open but stops receiving
    /// presence-resolved pushes.
    pub fn register(
        &self,
        user_id: UserId,
        connection_id: &str,
        sender: OutboundSender,
    ) -> Option<String> {
        self.connections.insert(
            connection_id.to_string(),
            ConnectionHandle {
                user_id,
                sender,
            },
        );
        let evicted = self.presence.register(user_id, connection_id);
        if let Some(old) = &evicted {
            match self.multi_login {
                MultiLoginPolicy::ForceClose => {
                    self.connections.remove(old);
                    self.rooms.purge(old);
                }
                MultiLoginPolicy::Replace => {}
            }
        }
        evicted
    }

    /// Tear down a connection: drop its handle, purge its room memberships,
    /// and clear the presence entry if it still points at this connection.
    /// Returns whether the user actually went offline.
    pub fn unregister(&self, connection_id: &str, user_id: UserId) -> bool {
        self.connections.remove(connection_id);
        self.rooms.purge(connection_id);
        self.presence.remove_if(user_id, connection_id)
    }

    pub fn join(&self, connection_id: &str, room: Room) {
        self.rooms.join(connection_id, room);
    }

    pub fn leave(&self, connection_id: &str, room: Room) {
        self.rooms.leave(connection_id, room);
    }

    pub fn is_online(&self, user_id: UserId) -> bool {
        self.presence.lookup(user_id).is_some()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    // -----------------------------------------------------------------------
    // Delivery primitives
    // -----------------------------------------------------------------------

    fn push(&self, connection_id: &str, frame: &Arc<str>) -> bool {
        match self.connections.get(connection_id) {
            Some(handle) => handle.sender.send(Arc::clone(frame)).is_ok(),
            None => false,
        }
    }

    /// Send one event to one connection. Returns whether a push happened.
    pub fn send_to_connection(&self, connection_id: &str, event: &ServerEvent) -> bool {
        let frame: Arc<str> = event.to_frame().into();
        self.push(connection_id, &frame)
    }

    /// Send to every member of the user's private room.
    pub fn send_to_user(&self, user_id: UserId, event: &ServerEvent) -> usize {
        self.send_to_room(Room::User(user_id), event)
    }

    pub fn send_to_room(&self, room: Room, event: &ServerEvent) -> usize {
        let frame: Arc<str> = event.to_frame().into();
        self.rooms
            .members_of(room)
            .iter()
            .filter(|conn| self.push(conn, &frame))
            .count()
    }

    /// Room send that skips one connection (typing indicators never echo back
    /// to their author).
    pub fn send_to_room_except(&self, room: Room, except: &str, event: &ServerEvent) -> usize {
        let frame: Arc<str> = event.to_frame().into();
        self.rooms
            .members_of(room)
            .iter()
            .filter(|conn| conn.as_str() != except && self.push(conn, &frame))
            .count()
    }

    /// Push to every live connection.
    pub fn broadcast(&self, event: &ServerEvent) -> usize {
        let frame: Arc<str> = event.to_frame().into();
        self.connections
            .iter()
            .filter(|entry| entry.value().sender.send(Arc::clone(&frame)).is_ok())
            .count()
    }

    pub fn broadcast_except(&self, except: &str, event: &ServerEvent) -> usize {
        let frame: Arc<str> = event.to_frame().into();
        self.connections
            .iter()
            .filter(|entry| {
                entry.key() != except && entry.value().sender.send(Arc::clone(&frame)).is_ok()
            })
            .count()
    }

    // -----------------------------------------------------------------------
    // Fan-out
    // -----------------------------------------------------------------------

    /// Resolve the recipient set for a domain event and push it out.
    ///
    /// Returns the target count: for most variants the number of pushes that
    /// reached a live connection, for admin `Users`/`Admins` targets the
    /// number of *requested* recipients (the count reported back to the
    /// admin UI, whether or not each recipient was online).
    pub async fn dispatch(&self, event: DomainEvent) -> Result<usize, ApiError> {
        let count = match event {
            DomainEvent::MessageSent {
                message,
                participants,
            } => {
                let sender_id = message.sender_id;
                let chat_id = message.chat_id;
                let mut delivered = 0;
                for participant in participants {
                    if participant == sender_id {
                        continue;
                    }
                    let Some(conn) = self.presence.lookup(participant) else {
                        // Offline participant: skipped, no backlog.
                        continue;
                    };
                    let event = ServerEvent::NewMessage {
                        chat_id,
                        message: message.clone(),
                    };
                    if self.send_to_connection(&conn, &event) {
                        delivered += 1;
                    }
                }
                delivered
            }

            DomainEvent::NewPost { post } => self.broadcast(&ServerEvent::NewPost(post)),
            DomainEvent::PostLikeUpdated(update) => {
                self.broadcast(&ServerEvent::PostLikeUpdated(update))
            }
            DomainEvent::CommentLikeUpdated(update) => {
                self.broadcast(&ServerEvent::CommentLikeUpdated(update))
            }
            DomainEvent::NewComment(comment) => {
                self.broadcast(&ServerEvent::NewComment(comment))
            }
            DomainEvent::CommentDeleted(removed) => {
                self.broadcast(&ServerEvent::CommentDeleted(removed))
            }

            DomainEvent::NewNotification {
                user_id,
                notification,
            } => self.send_to_user(user_id, &ServerEvent::NewNotification(notification)),

            DomainEvent::FriendshipUpdated {
                kind,
                sender,
                receiver,
            } => {
                let to_sender = ServerEvent::FriendshipUpdated(FriendshipUpdate {
                    kind: kind.clone(),
                    user_id: receiver.id,
                    friend: receiver.clone(),
                });
                let to_receiver = ServerEvent::FriendshipUpdated(FriendshipUpdate {
                    kind,
                    user_id: sender.id,
                    friend: sender.clone(),
                });
                self.send_to_user(sender.id, &to_sender)
                    + self.send_to_user(receiver.id, &to_receiver)
            }

            DomainEvent::AdminNotification { target, notice } => {
                let event = ServerEvent::AdminNotification(notice);
                match target {
                    BroadcastTarget::All => self.broadcast(&event),
                    BroadcastTarget::Users(user_ids) => {
                        for user_id in &user_ids {
                            self.send_to_user(*user_id, &event);
                        }
                        user_ids.len()
                    }
                    BroadcastTarget::Admins => {
                        let admin_ids = self.store.admin_user_ids().await?;
                        for user_id in &admin_ids {
                            self.send_to_user(*user_id, &event);
                        }
                        admin_ids.len()
                    }
                }
            }

            DomainEvent::UserOnline { user_id, origin } => self.broadcast_except(
                &origin,
                &ServerEvent::UserOnline {
                    user_id,
                    timestamp: Utc::now(),
                },
            ),

            DomainEvent::UserOffline {
                user_id,
                reason,
                origin,
            } => self.broadcast_except(
                &origin,
                &ServerEvent::UserOffline {
                    user_id,
                    reason,
                    timestamp: Utc::now(),
                },
            ),
        };
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::connection_id;
    use crate::store::{MemoryStore, UserRecord};

    fn test_user(id: UserId, is_admin: bool) -> UserRecord {
        UserRecord {
            id,
            username: format!("user{id}"),
            first_name: "Test".to_string(),
            last_name: format!("U{id}"),
            avatar: None,
            is_admin,
            is_banned: false,
        }
    }

    fn summary(id: UserId) -> UserSummary {
        (&test_user(id, false)).into()
    }

    fn test_router(policy: MultiLoginPolicy) -> (EventRouter, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (EventRouter::new(store.clone(), policy), store)
    }

    /// Attach a fake connection for a user: registers it, joins its private
    /// room, and hands back the receiving end of the outbound channel.
    fn attach(
        router: &EventRouter,
        user_id: UserId,
    ) -> (String, mpsc::UnboundedReceiver<Arc<str>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = connection_id();
        router.register(user_id, &conn, tx);
        router.join(&conn, Room::User(user_id));
        (conn, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Arc<str>>) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(serde_json::from_str(&frame).unwrap());
        }
        frames
    }

    fn test_message(chat_id: i64, sender_id: UserId) -> MessageRecord {
        MessageRecord {
            id: 1,
            chat_id,
            sender_id,
            content: "hello".to_string(),
            created_at: Utc::now(),
            sender: summary(sender_id),
        }
    }

    #[tokio::test]
    async fn message_fanout_excludes_sender_and_skips_offline() {
        let (router, _) = test_router(MultiLoginPolicy::Replace);
        let (_conn_a, mut rx_a) = attach(&router, 1);
        let (_conn_b, mut rx_b) = attach(&router, 2);
        // User 3 is a participant but offline.

        let delivered = router
            .dispatch(DomainEvent::MessageSent {
                message: test_message(10, 1),
                participants: vec![1, 2, 3],
            })
            .await
            .unwrap();

        assert_eq!(delivered, 1);
        let frames = drain(&mut rx_b);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["event"], "new_message");
        assert_eq!(frames[0]["data"]["chatId"], 10);
        assert_eq!(frames[0]["data"]["message"]["content"], "hello");

        // The sender never sees its own message via the broadcast path.
        assert!(drain(&mut rx_a).is_empty());
    }

    #[tokio::test]
    async fn broadcast_events_reach_every_connection_once() {
        let (router, _) = test_router(MultiLoginPolicy::Replace);
        let (_c1, mut rx1) = attach(&router, 1);
        let (_c2, mut rx2) = attach(&router, 2);
        let (_c3, mut rx3) = attach(&router, 3);

        let delivered = router
            .dispatch(DomainEvent::NewPost {
                post: serde_json::json!({"id": 42, "content": "hi"}),
            })
            .await
            .unwrap();

        assert_eq!(delivered, 3);
        for rx in [&mut rx1, &mut rx2, &mut rx3] {
            let frames = drain(rx);
            assert_eq!(frames.len(), 1);
            assert_eq!(frames[0]["event"], "new_post");
            assert_eq!(frames[0]["data"]["id"], 42);
        }
    }

    #[tokio::test]
    async fn notification_goes_only_to_target_private_room() {
        let (router, _) = test_router(MultiLoginPolicy::Replace);
        let (_c1, mut rx1) = attach(&router, 1);
        let (_c2, mut rx2) = attach(&router, 2);

        let delivered = router
            .dispatch(DomainEvent::NewNotification {
                user_id: 2,
                notification: serde_json::json!({"id": 9, "type": "friend_request"}),
            })
            .await
            .unwrap();

        assert_eq!(delivered, 1);
        assert!(drain(&mut rx1).is_empty());
        let frames = drain(&mut rx2);
        assert_eq!(frames[0]["event"], "new_notification");

        // Offline target: silent no-op.
        let delivered = router
            .dispatch(DomainEvent::NewNotification {
                user_id: 77,
                notification: serde_json::json!({"id": 10}),
            })
            .await
            .unwrap();
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn friendship_update_sends_role_specific_payloads() {
        let (router, _) = test_router(MultiLoginPolicy::Replace);
        let (_c1, mut rx1) = attach(&router, 1);
        let (_c2, mut rx2) = attach(&router, 2);

        router
            .dispatch(DomainEvent::FriendshipUpdated {
                kind: "accepted".to_string(),
                sender: summary(1),
                receiver: summary(2),
            })
            .await
            .unwrap();

        let to_sender = drain(&mut rx1);
        assert_eq!(to_sender[0]["event"], "friendship_updated");
        assert_eq!(to_sender[0]["data"]["userId"], 2);
        assert_eq!(to_sender[0]["data"]["friend"]["id"], 2);

        let to_receiver = drain(&mut rx2);
        assert_eq!(to_receiver[0]["data"]["userId"], 1);
        assert_eq!(to_receiver[0]["data"]["friend"]["id"], 1);
    }

    fn test_notice() -> AdminNotice {
        AdminNotice {
            kind: "admin_broadcast".to_string(),
            sub_type: "info".to_string(),
            message: "scheduled maintenance".to_string(),
            from: "Admin: Ada Root".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn admin_specific_target_counts_requested_recipients() {
        let (router, _) = test_router(MultiLoginPolicy::Replace);
        let (_c2, mut rx2) = attach(&router, 2);
        // User 5 is requested but offline.

        let count = router
            .dispatch(DomainEvent::AdminNotification {
                target: BroadcastTarget::Users(vec![2, 5]),
                notice: test_notice(),
            })
            .await
            .unwrap();

        // Count reflects the requested set, delivery only the online part.
        assert_eq!(count, 2);
        let frames = drain(&mut rx2);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["event"], "admin_notification");
    }

    #[tokio::test]
    async fn admin_admins_target_resolves_from_storage() {
        let (router, store) = test_router(MultiLoginPolicy::Replace);
        store.add_user(test_user(1, true));
        store.add_user(test_user(2, false));
        store.add_user(test_user(3, true));

        let (_c1, mut rx1) = attach(&router, 1);
        let (_c2, mut rx2) = attach(&router, 2);

        let count = router
            .dispatch(DomainEvent::AdminNotification {
                target: BroadcastTarget::Admins,
                notice: test_notice(),
            })
            .await
            .unwrap();

        assert_eq!(count, 2); // admins 1 and 3, whether or not online
        assert_eq!(drain(&mut rx1).len(), 1);
        assert!(drain(&mut rx2).is_empty());
    }

    #[tokio::test]
    async fn force_close_drops_the_evicted_connection() {
        let (router, _) = test_router(MultiLoginPolicy::ForceClose);
        let (conn_a, mut rx_a) = attach(&router, 1);
        let (_conn_b, _rx_b) = attach(&router, 1);

        // The first connection's channel is closed and its memberships gone.
        assert!(rx_a.recv().await.is_none());
        assert!(!router.send_to_connection(&conn_a, &ServerEvent::Pong {
            timestamp: Utc::now(),
        }));
        assert_eq!(router.connection_count(), 1);
    }

    #[tokio::test]
    async fn replace_keeps_old_connection_in_rooms_but_not_presence() {
        let (router, _) = test_router(MultiLoginPolicy::Replace);
        let (_conn_a, mut rx_a) = attach(&router, 1);
        let (_conn_b, mut rx_b) = attach(&router, 1);

        // Room-scoped delivery still reaches both live sockets of the user.
        let delivered = router
            .dispatch(DomainEvent::NewNotification {
                user_id: 1,
                notification: serde_json::json!({"id": 1}),
            })
            .await
            .unwrap();
        assert_eq!(delivered, 2);
        assert_eq!(drain(&mut rx_a).len(), 1);
        assert_eq!(drain(&mut rx_b).len(), 1);

        // Presence-resolved delivery only reaches the replacement.
        router
            .dispatch(DomainEvent::MessageSent {
                message: test_message(5, 9),
                participants: vec![9, 1],
            })
            .await
            .unwrap();
        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(drain(&mut rx_b).len(), 1);
    }

    #[tokio::test]
    async fn unregister_purges_rooms_and_presence() {
        let (router, _) = test_router(MultiLoginPolicy::Replace);
        let (conn_a, _rx_a) = attach(&router, 1);
        router.join(&conn_a, Room::Chat(4));

        assert!(router.unregister(&conn_a, 1));
        assert!(!router.is_online(1));
        assert_eq!(router.send_to_room(Room::Chat(4), &ServerEvent::Pong {
            timestamp: Utc::now(),
        }), 0);
        assert_eq!(router.connection_count(), 0);
    }

    #[tokio::test]
    async fn user_online_skips_the_origin_connection() {
        let (router, _) = test_router(MultiLoginPolicy::Replace);
        let (conn_a, mut rx_a) = attach(&router, 1);
        let (_c2, mut rx2) = attach(&router, 2);

        let delivered = router
            .dispatch(DomainEvent::UserOnline {
                user_id: 1,
                origin: conn_a.clone(),
            })
            .await
            .unwrap();

        assert_eq!(delivered, 1);
        assert!(drain(&mut rx_a).is_empty());
        let frames = drain(&mut rx2);
        assert_eq!(frames[0]["event"], "user_online");
        assert_eq!(frames[0]["data"]["userId"], 1);
    }
}
