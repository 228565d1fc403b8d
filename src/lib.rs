pub mod dom;
pub mod engine;
pub mod error;
pub mod messages;
pub mod net;
pub mod settings;
pub mod vocab;

pub use error::{Error, Result};
