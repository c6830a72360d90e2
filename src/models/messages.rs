use serde::{Deserialize, Serialize};

pub type DocumentId = i64;
pub type UserId = String;

/// One entry of the user list carried by `room_state`, `user_joined` and `user_left`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct UserEntry {
    pub user_id: UserId,
    pub display_name: String,
    pub color: String,
    pub cursor_position: Option<i64>,
    pub selection_start: Option<i64>,
    pub selection_end: Option<i64>,
}

/// Messages a client may send over an open collaboration socket.
///
/// Anything with an unrecognized `type` lands in `Unknown` and is ignored,
/// so older servers keep working with newer clients.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Cursor {
        position: i64,
        selection_start: Option<i64>,
        selection_end: Option<i64>,
    },
    Content {
        content: String,
        cursor_position: Option<i64>,
    },
    Ping,
    #[serde(other)]
    Unknown,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    RoomState {
        document_id: DocumentId,
        content: String,
        users: Vec<UserEntry>,
        your_color: String,
    },
    UserJoined {
        user_id: UserId,
        display_name: String,
        color: String,
        users: Vec<UserEntry>,
    },
    UserLeft {
        user_id: UserId,
        display_name: String,
        users: Vec<UserEntry>,
    },
    CursorUpdate {
        user_id: UserId,
        display_name: String,
        color: String,
        position: i64,
        selection_start: Option<i64>,
        selection_end: Option<i64>,
    },
    ContentUpdate {
        user_id: UserId,
        display_name: String,
        content: String,
        cursor_position: Option<i64>,
    },
    Pong,
}
