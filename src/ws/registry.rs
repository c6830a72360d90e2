//! Process-wide owner of every live room.
//!
//! All state sits behind one mutex. Critical sections only touch maps and
//! enqueue onto per-connection queues with `try_send`, so the lock is never
//! held across an await point or a socket write. Because fan-out happens
//! inside the lock, every peer of a room sees that room's events in the
//! order the registry processed them.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use crate::models::{DocumentId, PresenceUser, RoomSummary, ServerMessage, UserId};
use super::color;
use super::connctx::{ConnectionHandle, ConnectionId, CLOSE_SESSION_REPLACED};
use super::room::{Delivery, Room, Session};

/// What a successful join hands back to the connection handler.
#[derive(Debug, Clone)]
pub struct JoinAck {
    pub color: &'static str,
    /// Document the user was previously joined to, if this join evicted it.
    pub replaced: Option<DocumentId>,
    /// Peers that received `user_joined`.
    pub announced: Delivery,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStats {
    pub rooms: usize,
    pub sessions: usize,
}

#[derive(Debug, Default)]
struct RegistryState {
    rooms: HashMap<DocumentId, Room>,
    user_rooms: HashMap<UserId, DocumentId>,
}

impl RegistryState {
    /// Take `user_id` out of its room, announce the departure and drop the
    /// room if it emptied. Keeps `rooms` and `user_rooms` in step.
    fn remove_session(&mut self, user_id: &str) -> Option<(DocumentId, Session)> {
        let document_id = self.user_rooms.remove(user_id)?;
        let room = self.rooms.get_mut(&document_id)?;
        let session = room.sessions.remove(user_id)?;

        let left = ServerMessage::UserLeft {
            user_id: session.user_id.clone(),
            display_name: session.display_name.clone(),
            users: room.users(),
        };
        room.fan_out(&left, None);

        if room.is_empty() {
            self.rooms.remove(&document_id);
            debug!(document_id, "Room emptied and removed");
        }
        Some((document_id, session))
    }

    /// The room holding `user_id`, but only while its session is still the
    /// one opened by `connection_id`. A replaced connection gets `None`.
    fn session_mut(&mut self, user_id: &str, connection_id: ConnectionId) -> Option<(&mut Room, UserId)> {
        let document_id = *self.user_rooms.get(user_id)?;
        let room = self.rooms.get_mut(&document_id)?;
        let owned = room.sessions.get(user_id)?.handle.id() == connection_id;
        owned.then(|| (room, user_id.to_string()))
    }
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    state: Mutex<RegistryState>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Join `user_id` to the room for `document_id`.
    ///
    /// A user already joined anywhere is evicted first: its old room hears
    /// `user_left` and its old connection is asked to close with
    /// [`CLOSE_SESSION_REPLACED`]. The joiner's own queue receives
    /// `room_state` before any other event of the room can reach it.
    pub fn connect(
        &self,
        document_id: DocumentId,
        user_id: &str,
        display_name: &str,
        handle: ConnectionHandle,
    ) -> JoinAck {
        let mut state = self.state();

        let replaced = state.remove_session(user_id).map(|(previous_doc, previous)| {
            info!(user_id, previous_doc, "User connected again, replacing previous session");
            previous.handle.evict(CLOSE_SESSION_REPLACED, "Session replaced");
            previous_doc
        });

        let room = state
            .rooms
            .entry(document_id)
            .or_insert_with(|| Room::new(document_id));
        let color = color::allocate(&room.used_colors());

        let own_handle = handle.clone();
        room.sessions.insert(
            user_id.to_string(),
            Session::new(user_id.to_string(), display_name.to_string(), color, handle),
        );
        let users = room.users();

        let announced = room.fan_out(
            &ServerMessage::UserJoined {
                user_id: user_id.to_string(),
                display_name: display_name.to_string(),
                color: color.to_string(),
                users: users.clone(),
            },
            Some(user_id),
        );
        let _ = own_handle.deliver(ServerMessage::RoomState {
            document_id,
            content: room.content.clone(),
            users,
            your_color: color.to_string(),
        });

        state.user_rooms.insert(user_id.to_string(), document_id);

        JoinAck { color, replaced, announced }
    }

    /// Remove `user_id` from whatever room it is in. Returns false when the
    /// user was not registered, which makes repeated cleanup harmless.
    pub fn disconnect(&self, user_id: &str) -> bool {
        self.state().remove_session(user_id).is_some()
    }

    /// Disconnect `user_id` only if its registered session still belongs to
    /// `connection_id`. A connection that was replaced must not tear down
    /// its replacement when its own loop finally exits.
    pub fn release(&self, user_id: &str, connection_id: ConnectionId) -> bool {
        let mut state = self.state();
        let owned = state
            .user_rooms
            .get(user_id)
            .and_then(|doc| state.rooms.get(doc))
            .and_then(|room| room.sessions.get(user_id))
            .is_some_and(|s| s.handle.id() == connection_id);
        owned && state.remove_session(user_id).is_some()
    }

    /// Record the caller's cursor and tell everyone else. `None` when the
    /// user is not registered or `connection_id` no longer owns its session.
    pub fn update_cursor(
        &self,
        user_id: &str,
        connection_id: ConnectionId,
        position: i64,
        selection_start: Option<i64>,
        selection_end: Option<i64>,
    ) -> Option<Delivery> {
        let mut state = self.state();
        let (room, user_id) = state.session_mut(user_id, connection_id)?;

        let session = room.sessions.get_mut(&user_id)?;
        session.cursor_position = Some(position);
        session.selection_start = selection_start;
        session.selection_end = selection_end;

        let msg = ServerMessage::CursorUpdate {
            user_id: session.user_id.clone(),
            display_name: session.display_name.clone(),
            color: session.color.to_string(),
            position,
            selection_start,
            selection_end,
        };
        Some(room.fan_out(&msg, Some(&user_id)))
    }

    /// Overwrite the room's content and tell everyone else.
    pub fn update_content(
        &self,
        user_id: &str,
        connection_id: ConnectionId,
        content: String,
        cursor_position: Option<i64>,
    ) -> Option<Delivery> {
        let mut state = self.state();
        let (room, user_id) = state.session_mut(user_id, connection_id)?;

        let display_name = room.sessions.get(&user_id)?.display_name.clone();
        room.set_content(content.clone());

        let msg = ServerMessage::ContentUpdate {
            user_id: user_id.clone(),
            display_name,
            content,
            cursor_position,
        };
        Some(room.fan_out(&msg, Some(&user_id)))
    }

    /// Who is in the room right now. Never creates a room.
    pub fn room_presence(&self, document_id: DocumentId) -> Vec<PresenceUser> {
        self.state()
            .rooms
            .get(&document_id)
            .map(Room::presence)
            .unwrap_or_default()
    }

    pub fn room_count(&self, document_id: DocumentId) -> usize {
        self.state()
            .rooms
            .get(&document_id)
            .map_or(0, |room| room.sessions.len())
    }

    pub fn room_content(&self, document_id: DocumentId) -> Option<String> {
        self.state().rooms.get(&document_id).map(|room| room.content.clone())
    }

    pub fn room_summary(&self, document_id: DocumentId) -> Option<RoomSummary> {
        self.state().rooms.get(&document_id).map(Room::summary)
    }

    /// One summary per live room, ordered by document id.
    pub fn room_summaries(&self) -> Vec<RoomSummary> {
        let mut summaries: Vec<_> = self.state().rooms.values().map(Room::summary).collect();
        summaries.sort_by_key(|summary| summary.document_id);
        summaries
    }

    pub fn contains_room(&self, document_id: DocumentId) -> bool {
        self.state().rooms.contains_key(&document_id)
    }

    pub fn room_of(&self, user_id: &str) -> Option<DocumentId> {
        self.state().user_rooms.get(user_id).copied()
    }

    pub fn stats(&self) -> RegistryStats {
        let state = self.state();
        RegistryStats {
            rooms: state.rooms.len(),
            sessions: state.rooms.values().map(|room| room.sessions.len()).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::connctx::{Eviction, EvictionWatch};
    use tokio::sync::mpsc;

    fn handle() -> (ConnectionHandle, mpsc::Receiver<ServerMessage>) {
        let (handle, rx, _evicted) = ConnectionHandle::channel(ConnectionId::new(), 32);
        (handle, rx)
    }

    fn watched(capacity: usize) -> (ConnectionHandle, mpsc::Receiver<ServerMessage>, EvictionWatch) {
        ConnectionHandle::channel(ConnectionId::new(), capacity)
    }

    fn messages(rx: &mut mpsc::Receiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut items = Vec::new();
        while let Ok(item) = rx.try_recv() {
            items.push(item);
        }
        items
    }

    /// Every user in the reverse index sits in exactly the room it points to,
    /// every session is indexed, and no room is empty.
    fn assert_consistent(registry: &SessionRegistry) {
        let state = registry.state();
        for (user_id, doc) in &state.user_rooms {
            let rooms_holding = state
                .rooms
                .values()
                .filter(|room| room.sessions.contains_key(user_id))
                .count();
            assert_eq!(rooms_holding, 1, "{user_id} must be in exactly one room");
            assert!(state.rooms[doc].sessions.contains_key(user_id));
        }
        for room in state.rooms.values() {
            assert!(!room.is_empty(), "room {} is empty but alive", room.document_id);
            for user_id in room.sessions.keys() {
                assert_eq!(state.user_rooms.get(user_id), Some(&room.document_id));
            }
        }
    }

    #[test]
    fn room_lives_exactly_as_long_as_its_sessions() {
        let registry = SessionRegistry::new();
        let (a, _rx_a) = handle();

        registry.connect(1, "A", "Ada", a);
        assert!(registry.contains_room(1));
        assert_eq!(registry.room_count(1), 1);
        assert_consistent(&registry);

        assert!(registry.disconnect("A"));
        assert!(!registry.contains_room(1));
        assert_eq!(registry.room_of("A"), None);
        assert_consistent(&registry);
    }

    #[test]
    fn joiner_gets_room_state_and_peers_get_user_joined() {
        let registry = SessionRegistry::new();
        let (a, mut rx_a) = handle();
        let a_id = a.id();
        let (b, mut rx_b) = handle();

        let ack_a = registry.connect(1, "A", "Ada", a);
        registry.update_content("A", a_id, "draft".into(), None);
        let ack_b = registry.connect(1, "B", "Bob", b);
        assert_eq!(ack_b.announced, Delivery { delivered: 1, failed: 0 });

        let to_b = messages(&mut rx_b);
        assert_eq!(to_b.len(), 1);
        match &to_b[0] {
            ServerMessage::RoomState { document_id, content, users, your_color } => {
                assert_eq!(*document_id, 1);
                assert_eq!(content, "draft");
                assert_eq!(users.len(), 2);
                assert_eq!(your_color, ack_b.color);
            }
            other => panic!("expected room_state, got {other:?}"),
        }

        let to_a = messages(&mut rx_a);
        assert!(matches!(to_a[0], ServerMessage::RoomState { .. }));
        match &to_a[1] {
            ServerMessage::UserJoined { user_id, display_name, color, users } => {
                assert_eq!(user_id, "B");
                assert_eq!(display_name, "Bob");
                assert_eq!(color, ack_b.color);
                assert_eq!(users.len(), 2);
            }
            other => panic!("expected user_joined, got {other:?}"),
        }
        assert_ne!(ack_a.color, ack_b.color);
    }

    #[test]
    fn sequential_joiners_get_distinct_colors() {
        let registry = SessionRegistry::new();
        let mut receivers = Vec::new();
        let mut colors = Vec::new();
        for user in ["A", "B", "C"] {
            let (h, rx) = handle();
            receivers.push(rx);
            colors.push(registry.connect(1, user, user, h).color);
        }
        assert_eq!(colors, vec!["#FF6B6B", "#4ECDC4", "#45B7D1"]);
    }

    #[test]
    fn color_frees_up_when_owner_leaves() {
        let registry = SessionRegistry::new();
        let (a, _rx_a) = handle();
        let (b, _rx_b) = handle();
        let (c, _rx_c) = handle();

        assert_eq!(registry.connect(1, "A", "Ada", a).color, "#FF6B6B");
        registry.connect(1, "B", "Bob", b);
        registry.disconnect("A");
        assert_eq!(registry.connect(1, "C", "Cy", c).color, "#FF6B6B");
    }

    #[test]
    fn connecting_elsewhere_replaces_previous_session() {
        let registry = SessionRegistry::new();
        let (b1, mut rx_b1, evicted_b1) = watched(32);
        let (b2, mut rx_b2) = handle();
        let (peer, mut rx_peer) = handle();

        registry.connect(1, "P", "Peer", peer);
        registry.connect(1, "B", "Bob", b1);
        messages(&mut rx_peer);
        messages(&mut rx_b1);

        let ack = registry.connect(2, "B", "Bob", b2);
        assert_eq!(ack.replaced, Some(1));
        assert_eq!(registry.room_of("B"), Some(2));
        assert_eq!(registry.room_count(1), 1);
        assert_eq!(registry.room_count(2), 1);
        assert_consistent(&registry);

        assert_eq!(
            *evicted_b1.borrow(),
            Some(Eviction { code: CLOSE_SESSION_REPLACED, reason: "Session replaced" })
        );
        assert!(messages(&mut rx_b1).is_empty());
        assert!(matches!(
            messages(&mut rx_peer).as_slice(),
            [ServerMessage::UserLeft { user_id, .. }] if user_id == "B"
        ));
        assert!(matches!(messages(&mut rx_b2).as_slice(), [ServerMessage::RoomState { document_id: 2, .. }]));
    }

    #[test]
    fn replaced_connection_with_full_queue_is_evicted_and_muted() {
        let registry = SessionRegistry::new();
        // Capacity 1: room_state alone fills the old connection's queue.
        let (old, _rx_old, evicted_old) = watched(1);
        let old_id = old.id();
        let (new, _rx_new) = handle();
        let new_id = new.id();
        let (peer, mut rx_peer) = handle();

        registry.connect(1, "B", "Bob", old);
        registry.connect(2, "P", "Peer", peer);
        registry.connect(2, "B", "Bob", new);
        messages(&mut rx_peer);

        assert!(evicted_old.borrow().is_some());

        assert_eq!(registry.update_content("B", old_id, "stale".into(), None), None);
        assert_eq!(registry.update_cursor("B", old_id, 3, None, None), None);
        assert_eq!(registry.room_content(2).as_deref(), Some(""));
        assert!(messages(&mut rx_peer).is_empty());

        let sent = registry.update_content("B", new_id, "fresh".into(), None);
        assert_eq!(sent, Some(Delivery { delivered: 1, failed: 0 }));
        assert_eq!(registry.room_content(2).as_deref(), Some("fresh"));
    }

    #[test]
    fn reconnecting_alone_to_same_document_starts_fresh() {
        let registry = SessionRegistry::new();
        let (first, _rx1) = handle();
        let first_id = first.id();
        let (second, mut rx2) = handle();

        registry.connect(5, "B", "Bob", first);
        registry.update_content("B", first_id, "unsaved".into(), None);
        let ack = registry.connect(5, "B", "Bob", second);

        assert_eq!(ack.replaced, Some(5));
        assert_eq!(registry.room_content(5).as_deref(), Some(""));
        assert!(matches!(
            messages(&mut rx2).as_slice(),
            [ServerMessage::RoomState { content, .. }] if content.is_empty()
        ));
    }

    #[test]
    fn stale_connection_release_does_not_remove_replacement() {
        let registry = SessionRegistry::new();
        let (first, _rx1) = handle();
        let first_id = first.id();
        let (second, _rx2) = handle();
        let second_id = second.id();

        registry.connect(1, "B", "Bob", first);
        registry.connect(1, "B", "Bob", second);

        assert!(!registry.release("B", first_id));
        assert_eq!(registry.room_of("B"), Some(1));
        assert!(registry.release("B", second_id));
        assert!(!registry.contains_room(1));
    }

    #[test]
    fn cursor_and_content_updates_never_echo() {
        let registry = SessionRegistry::new();
        let (a, mut rx_a) = handle();
        let a_id = a.id();
        let (b, mut rx_b) = handle();
        registry.connect(1, "A", "Ada", a);
        registry.connect(1, "B", "Bob", b);
        messages(&mut rx_a);
        messages(&mut rx_b);

        let sent = registry.update_cursor("A", a_id, 5, Some(2), Some(5)).unwrap();
        assert_eq!(sent, Delivery { delivered: 1, failed: 0 });
        registry.update_content("A", a_id, "abc".into(), Some(3)).unwrap();

        assert!(messages(&mut rx_a).is_empty());
        let to_b = messages(&mut rx_b);
        assert_eq!(
            to_b,
            vec![
                ServerMessage::CursorUpdate {
                    user_id: "A".into(),
                    display_name: "Ada".into(),
                    color: "#FF6B6B".into(),
                    position: 5,
                    selection_start: Some(2),
                    selection_end: Some(5),
                },
                ServerMessage::ContentUpdate {
                    user_id: "A".into(),
                    display_name: "Ada".into(),
                    content: "abc".into(),
                    cursor_position: Some(3),
                },
            ]
        );
    }

    #[test]
    fn cursor_is_stored_on_own_session_only() {
        let registry = SessionRegistry::new();
        let (a, _rx_a) = handle();
        let a_id = a.id();
        let (b, _rx_b) = handle();
        registry.connect(1, "A", "Ada", a);
        registry.connect(1, "B", "Bob", b);
        registry.update_cursor("A", a_id, 9, None, None);
        registry.disconnect("B");

        let (c, mut rx_c) = handle();
        registry.connect(1, "C", "Cy", c);
        let to_c = messages(&mut rx_c);
        let ServerMessage::RoomState { users, .. } = &to_c[0] else {
            panic!("expected room_state");
        };
        let ada = users.iter().find(|u| u.user_id == "A").unwrap();
        let cy = users.iter().find(|u| u.user_id == "C").unwrap();
        assert_eq!(ada.cursor_position, Some(9));
        assert_eq!(cy.cursor_position, None);
    }

    #[test]
    fn last_content_write_wins() {
        let registry = SessionRegistry::new();
        let (a, _rx_a) = handle();
        let a_id = a.id();
        let (b, _rx_b) = handle();
        let b_id = b.id();
        registry.connect(1, "A", "Ada", a);
        registry.connect(1, "B", "Bob", b);

        registry.update_content("B", b_id, "C1".into(), None);
        registry.update_content("A", a_id, "C2".into(), None);
        assert_eq!(registry.room_content(1).as_deref(), Some("C2"));

        registry.update_content("B", b_id, "C3".into(), Some(1));
        assert_eq!(registry.room_content(1).as_deref(), Some("C3"));
    }

    #[test]
    fn content_write_advances_last_updated() {
        let registry = SessionRegistry::new();
        let (a, _rx_a) = handle();
        let a_id = a.id();
        registry.connect(3, "A", "Ada", a);

        let created = registry.room_summary(3).unwrap();
        assert_eq!(created.content_len, 0);
        assert!(created.oldest_session_at.is_some_and(|at| at >= created.last_updated));

        std::thread::sleep(std::time::Duration::from_millis(5));
        registry.update_cursor("A", a_id, 1, None, None);
        assert_eq!(registry.room_summary(3).unwrap().last_updated, created.last_updated);

        registry.update_content("A", a_id, "hello".into(), None);
        let written = registry.room_summary(3).unwrap();
        assert!(written.last_updated > created.last_updated);
        assert_eq!(written.content_len, 5);
        assert_eq!(written.n_sessions, 1);
    }

    #[test]
    fn room_summaries_cover_live_rooms_in_document_order() {
        let registry = SessionRegistry::new();
        let mut receivers = Vec::new();
        for (doc, user) in [(9, "A"), (4, "B"), (9, "C")] {
            let (h, rx) = handle();
            receivers.push(rx);
            registry.connect(doc, user, user, h);
        }
        registry.disconnect("B");

        let summaries = registry.room_summaries();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].document_id, 9);
        assert_eq!(summaries[0].n_sessions, 2);
        assert_eq!(registry.room_summary(4), None);
    }

    #[test]
    fn updates_from_unregistered_users_are_ignored() {
        let registry = SessionRegistry::new();
        let id = ConnectionId::new();
        assert_eq!(registry.update_cursor("ghost", id, 1, None, None), None);
        assert_eq!(registry.update_content("ghost", id, "x".into(), None), None);
        assert_eq!(registry.stats(), RegistryStats::default());
    }

    #[test]
    fn disconnect_twice_is_a_no_op() {
        let registry = SessionRegistry::new();
        let (a, _rx_a) = handle();
        let (b, mut rx_b) = handle();
        registry.connect(1, "A", "Ada", a);
        registry.connect(1, "B", "Bob", b);
        messages(&mut rx_b);

        assert!(registry.disconnect("A"));
        let after_first = registry.stats();
        assert!(!registry.disconnect("A"));
        assert_eq!(registry.stats(), after_first);
        assert_consistent(&registry);

        let to_b = messages(&mut rx_b);
        assert_eq!(to_b.len(), 1, "second disconnect must not broadcast again");
        match &to_b[0] {
            ServerMessage::UserLeft { user_id, display_name, users } => {
                assert_eq!(user_id, "A");
                assert_eq!(display_name, "Ada");
                assert_eq!(users.len(), 1);
                assert_eq!(users[0].user_id, "B");
            }
            other => panic!("expected user_left, got {other:?}"),
        }
    }

    #[test]
    fn broken_peer_does_not_block_the_others() {
        let registry = SessionRegistry::new();
        let (a, _rx_a) = handle();
        let a_id = a.id();
        let (b, mut rx_b) = handle();
        let (c, rx_c) = handle();
        let (d, mut rx_d) = handle();
        registry.connect(1, "A", "Ada", a);
        registry.connect(1, "B", "Bob", b);
        registry.connect(1, "C", "Cy", c);
        registry.connect(1, "D", "Dee", d);
        messages(&mut rx_b);
        messages(&mut rx_d);
        drop(rx_c);

        let sent = registry.update_content("A", a_id, "hello".into(), None).unwrap();
        assert_eq!(sent, Delivery { delivered: 2, failed: 1 });
        assert_eq!(messages(&mut rx_b).len(), 1);
        assert_eq!(messages(&mut rx_d).len(), 1);
        // The broken peer stays registered until its own loop cleans up.
        assert_eq!(registry.room_of("C"), Some(1));
    }

    #[test]
    fn presence_query_does_not_create_rooms() {
        let registry = SessionRegistry::new();
        assert!(registry.room_presence(42).is_empty());
        assert!(!registry.contains_room(42));
        assert_eq!(registry.room_count(42), 0);

        let (a, _rx_a) = handle();
        registry.connect(42, "A", "Ada", a);
        let presence = registry.room_presence(42);
        assert_eq!(presence.len(), 1);
        assert_eq!(presence[0].display_name, "Ada");
        assert_eq!(presence[0].color, "#FF6B6B");
    }

    #[test]
    fn random_connect_disconnect_sequences_stay_consistent() {
        let registry = SessionRegistry::new();
        let users = ["A", "B", "C", "D", "E"];
        let mut receivers = Vec::new();
        // Deterministic walk over connects to three documents and disconnects.
        let mut seed: u64 = 0x5eed;
        for _ in 0..500 {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let user = users[(seed >> 33) as usize % users.len()];
            match (seed >> 40) % 3 {
                0 => {
                    registry.disconnect(user);
                }
                n => {
                    let (h, rx) = handle();
                    receivers.push(rx);
                    registry.connect(n as DocumentId, user, user, h);
                }
            }
            assert_consistent(&registry);
        }
    }
}
