//! Commands sent to a running session by the management surface.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Command {
    /// The word was deleted everywhere; unwrap it on this page.
    DeleteWord { word: String },
    /// New theme color.
    UpdateColor { color: String },
    UpdatePalette { palette: Vec<String> },
    ToggleExtension { disabled: bool },
    ToggleDefinitions { visible: bool },
    /// The stored vocabulary changed elsewhere.
    RefreshVocabulary,
}

impl Command {
    pub fn from_json(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }
}
