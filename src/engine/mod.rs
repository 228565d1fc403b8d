//! Annotation engine: matching, rendering, change tracking, and the page
//! session that drives them.

pub mod matcher;
pub mod render;
pub mod selection;
pub mod session;
pub mod watch;

pub use session::{MenuAction, Session, SessionEvent};
