//! UI/backend events and error modeling for the desktop panel.

use panel_core::PanelEvent;
use shared::{
    domain::{MethodRef, SelectionRef, SubmissionId},
    error::UserWarning,
    protocol::ResultRecord,
};

#[derive(Debug, Clone)]
pub enum UiEvent {
    Info(String),
    Ready {
        methods: Vec<MethodRef>,
    },
    SelectionsUpdated(Vec<SelectionRef>),
    Warning(UserWarning),
    SubmissionStarted {
        submission_id: SubmissionId,
        name: String,
    },
    ResultPublished {
        submission_id: SubmissionId,
        name: String,
    },
    SubmissionFailed {
        submission_id: SubmissionId,
        name: String,
        reason: String,
    },
    ResultsUpdated(Vec<ResultRecord>),
    Error(UiError),
}

impl From<PanelEvent> for UiEvent {
    fn from(event: PanelEvent) -> Self {
        match event {
            PanelEvent::SelectionsRefreshed(entries) => UiEvent::SelectionsUpdated(entries),
            PanelEvent::Warning(warning) => UiEvent::Warning(warning),
            PanelEvent::SubmissionStarted {
                submission_id,
                request,
            } => UiEvent::SubmissionStarted {
                submission_id,
                name: request.result_name,
            },
            PanelEvent::ResultPublished {
                submission_id,
                name,
            } => UiEvent::ResultPublished {
                submission_id,
                name,
            },
            PanelEvent::SubmissionFailed {
                submission_id,
                name,
                reason,
            } => UiEvent::SubmissionFailed {
                submission_id,
                name,
                reason,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiErrorCategory {
    Startup,
    Validation,
    Collaborator,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiErrorContext {
    BackendStartup,
    RefreshSelections,
    Submit,
    General,
}

#[derive(Debug, Clone)]
pub struct UiError {
    category: UiErrorCategory,
    context: UiErrorContext,
    message: String,
}

impl UiError {
    pub fn from_message(context: UiErrorContext, message: impl Into<String>) -> Self {
        let message = message.into();
        let message_lower = message.to_ascii_lowercase();
        let category = if context == UiErrorContext::BackendStartup
            || message_lower.contains("startup failure")
            || message_lower.contains("failed to build runtime")
        {
            UiErrorCategory::Startup
        } else if message_lower.contains("no selection")
            || message_lower.contains("no method")
            || message_lower.contains("not been initialized")
        {
            UiErrorCategory::Validation
        } else if message_lower.contains("failed")
            || message_lower.contains("unavailable")
            || message_lower.contains("unknown selection")
            || message_lower.contains("disconnected")
        {
            UiErrorCategory::Collaborator
        } else {
            UiErrorCategory::Unknown
        };

        Self {
            category,
            context,
            message,
        }
    }

    /// Startup failures leave the panel without a backend; nothing else does.
    pub fn is_fatal(&self) -> bool {
        self.category == UiErrorCategory::Startup
    }

    pub fn category(&self) -> UiErrorCategory {
        self.category
    }

    pub fn context(&self) -> UiErrorContext {
        self.context
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}
