use shared::{
    domain::SelectionId,
    error::{UserWarning, WarningCode},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PanelError {
    #[error("panel controller has not been initialized")]
    NotInitialized,
    #[error("selection A and selection B are both '{selection}'; choose two different selections")]
    IdenticalSelections { selection: SelectionId },
    #[error("no {field} chosen")]
    MissingChoice { field: &'static str },
    #[error("{context}: {source}")]
    Collaborator {
        context: String,
        source: anyhow::Error,
    },
}

impl PanelError {
    pub fn collaborator(context: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Collaborator {
            context: context.into(),
            source,
        }
    }

    /// The warning to show for errors the user can fix from the form.
    pub fn user_warning(&self) -> Option<UserWarning> {
        match self {
            Self::IdenticalSelections { .. } => Some(UserWarning::new(
                WarningCode::IdenticalSelections,
                "Selections must differ",
                self.to_string(),
            )),
            Self::MissingChoice { .. } => Some(UserWarning::new(
                WarningCode::MissingChoice,
                "Incomplete form",
                self.to_string(),
            )),
            Self::NotInitialized => Some(UserWarning::new(
                WarningCode::NotReady,
                "Panel not ready",
                self.to_string(),
            )),
            Self::Collaborator { .. } => None,
        }
    }
}
