/// Cursor colors handed out to the sessions of a room, in allocation order.
pub const PALETTE: [&str; 8] = [
    "#FF6B6B", // red
    "#4ECDC4", // teal
    "#45B7D1", // blue
    "#96CEB4", // green
    "#FFEAA7", // yellow
    "#DDA0DD", // plum
    "#98D8C8", // mint
    "#F7DC6F", // gold
];

/// Pick a color for the next joiner of a room.
///
/// `used` holds the color of every session currently in the room, one entry
/// per session. The first palette entry nobody holds wins; once the palette
/// is exhausted colors are reused by cycling on the session count.
pub fn allocate(used: &[&str]) -> &'static str {
    PALETTE
        .iter()
        .copied()
        .find(|color| !used.contains(color))
        .unwrap_or(PALETTE[used.len() % PALETTE.len()])
}
