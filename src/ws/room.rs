use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::models::{DocumentId, PresenceUser, RoomSummary, ServerMessage, UserEntry, UserId};
use super::connctx::{ConnectionHandle, DeliveryError};

/// Per-connection state of one user inside a room.
#[derive(Debug)]
pub struct Session {
    pub user_id: UserId,
    pub display_name: String,
    pub color: &'static str,
    pub cursor_position: Option<i64>,
    pub selection_start: Option<i64>,
    pub selection_end: Option<i64>,
    pub connected_at: DateTime<Utc>,
    pub handle: ConnectionHandle,
}

impl Session {
    pub fn new(user_id: UserId, display_name: String, color: &'static str, handle: ConnectionHandle) -> Self {
        Self {
            user_id,
            display_name,
            color,
            cursor_position: None,
            selection_start: None,
            selection_end: None,
            connected_at: Utc::now(),
            handle,
        }
    }

    fn entry(&self) -> UserEntry {
        UserEntry {
            user_id: self.user_id.clone(),
            display_name: self.display_name.clone(),
            color: self.color.to_string(),
            cursor_position: self.cursor_position,
            selection_start: self.selection_start,
            selection_end: self.selection_end,
        }
    }
}

/// Outcome of one fan-out. Failed peers are counted, never raised.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub failed: usize,
}

/// Shared editing state for one document.
#[derive(Debug)]
pub struct Room {
    pub document_id: DocumentId,
    pub sessions: HashMap<UserId, Session>,
    pub content: String,
    pub last_updated: DateTime<Utc>,
}

impl Room {
    pub fn new(document_id: DocumentId) -> Self {
        Self {
            document_id,
            sessions: HashMap::new(),
            content: String::new(),
            last_updated: Utc::now(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn used_colors(&self) -> Vec<&'static str> {
        self.sessions.values().map(|s| s.color).collect()
    }

    pub fn users(&self) -> Vec<UserEntry> {
        self.sessions.values().map(Session::entry).collect()
    }

    pub fn presence(&self) -> Vec<PresenceUser> {
        self.sessions
            .values()
            .map(|s| PresenceUser {
                user_id: s.user_id.clone(),
                display_name: s.display_name.clone(),
                color: s.color.to_string(),
            })
            .collect()
    }

    pub fn summary(&self) -> RoomSummary {
        RoomSummary {
            document_id: self.document_id,
            n_sessions: self.sessions.len() as u32,
            content_len: self.content.len() as u64,
            last_updated: self.last_updated,
            oldest_session_at: self.sessions.values().map(|s| s.connected_at).min(),
        }
    }

    /// Replace the content snapshot. Last write wins, no version check.
    pub fn set_content(&mut self, content: String) {
        self.content = content;
        self.last_updated = Utc::now();
    }

    /// Queue `msg` for every session except `exclude`.
    ///
    /// A peer whose queue is full or closed is skipped; the rest still get
    /// the message.
    pub fn fan_out(&self, msg: &ServerMessage, exclude: Option<&str>) -> Delivery {
        let mut delivery = Delivery::default();
        for (user_id, session) in &self.sessions {
            if exclude == Some(user_id.as_str()) {
                continue;
            }
            match session.handle.deliver(msg.clone()) {
                Ok(()) => delivery.delivered += 1,
                Err(DeliveryError::Full) => {
                    warn!(document_id = self.document_id, user_id = %user_id, "Outbound queue full, dropping message");
                    delivery.failed += 1;
                }
                Err(DeliveryError::Closed) => {
                    debug!(document_id = self.document_id, user_id = %user_id, "Peer already gone, skipping");
                    delivery.failed += 1;
                }
            }
        }
        delivery
    }
}
