pub mod handler;
pub mod msg_content_handler;
pub mod msg_cursor_handler;
pub mod msg_ping_handler;
