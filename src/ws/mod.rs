pub mod color;
pub mod connctx;
pub mod registry;
pub mod room;
