use thiserror::Error;

use crate::dom::NodeId;

/// Structural failures of the live document.
///
/// These are expected under races with later page mutations (a node was
/// detached before we got to it) and are handled per item by callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomError {
    #[error("node {0:?} is not attached to a parent")]
    Detached(NodeId),
    #[error("node {0:?} is not a text node")]
    NotText(NodeId),
    #[error("node {0:?} cannot hold children")]
    NotContainer(NodeId),
    #[error("offset {offset} is out of range for node {node:?}")]
    OffsetOutOfRange { node: NodeId, offset: usize },
    #[error("node {0:?} is not a child of the given parent")]
    NotAChild(NodeId),
    #[error("inserting node {0:?} would create a cycle")]
    HierarchyRequest(NodeId),
    #[error("node {0:?} has been released")]
    Released(NodeId),
    #[error("node {0:?} is still in a tree and cannot be released")]
    StillAttached(NodeId),
}

/// Failures of the persistent key-value store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("store record is malformed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("store rejected the write: {0}")]
    Rejected(String),
}

/// Failures of the remote translation collaborator.
#[derive(Debug, Clone, Error)]
pub enum TranslateError {
    #[error("translation request timed out, try again or enter it manually")]
    Timeout,
    #[error("translation request failed: {0}")]
    Request(String),
    #[error("translation API error: {0}")]
    Status(String),
    #[error("invalid translation response format")]
    InvalidResponse,
}

/// Failures of the remote pronunciation collaborator.
#[derive(Debug, Clone, Error)]
pub enum PronounceError {
    #[error("no valid word for pronunciation")]
    EmptyWord,
    #[error("no pronunciation found")]
    NotFound,
    #[error("pronunciation request failed: {0}")]
    Request(String),
}

/// Crate-level error returned by session and vocabulary operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Dom(#[from] DomError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Translate(#[from] TranslateError),
    #[error(transparent)]
    Pronounce(#[from] PronounceError),
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("no vocabulary entry for {word:?} on {url}")]
    NotFound { word: String, url: String },
    #[error("the hosting context was invalidated, please reload the page")]
    ContextInvalidated,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
