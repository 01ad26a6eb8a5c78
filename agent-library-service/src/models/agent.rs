use serde::{Deserialize, Serialize};

/// A catalog entry: a runnable code sample plus its write-up.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub explanation: String,
}
