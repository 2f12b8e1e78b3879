use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningCode {
    IdenticalSelections,
    MissingChoice,
    NotReady,
}

/// A message meant for the person at the keyboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserWarning {
    pub code: WarningCode,
    pub title: String,
    pub message: String,
}

impl UserWarning {
    pub fn new(code: WarningCode, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            title: title.into(),
            message: message.into(),
        }
    }
}
