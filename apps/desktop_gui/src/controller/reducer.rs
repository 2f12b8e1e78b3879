//! Applies backend events to the state the panel renders from.

use std::collections::HashMap;

use panel_core::{PanelForm, SelectionStore};
use shared::{
    domain::{MethodRef, SubmissionId},
    error::UserWarning,
    protocol::ResultRecord,
};

use crate::controller::events::{UiError, UiErrorContext, UiEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PanelTab {
    #[default]
    Compare,
    Results,
}

#[derive(Debug, Default)]
pub struct PanelViewState {
    pub tab: PanelTab,
    pub ready: bool,
    pub methods: Vec<MethodRef>,
    pub selections: SelectionStore,
    pub form: PanelForm,
    pub results: Vec<ResultRecord>,
    pub running: HashMap<SubmissionId, String>,
    pub status: String,
    pub last_warning: Option<UserWarning>,
    pub last_error: Option<UiError>,
    default_method: Option<String>,
}

impl PanelViewState {
    pub fn new(default_method: Option<String>) -> Self {
        Self {
            default_method,
            status: "Starting backend...".to_string(),
            ..Self::default()
        }
    }

    pub fn apply(&mut self, event: UiEvent) {
        match event {
            UiEvent::Info(message) => self.status = message,
            UiEvent::Ready { methods } => {
                if self.form.method.is_none() {
                    self.form.method =
                        PanelForm::with_default_method(&methods, self.default_method.as_deref())
                            .method;
                }
                self.methods = methods;
                self.ready = true;
                self.status = "Ready".to_string();
            }
            UiEvent::SelectionsUpdated(entries) => {
                self.selections = SelectionStore::from_entries(entries);
                self.form.retain_known(&self.selections, &self.methods);
            }
            UiEvent::Warning(warning) => {
                self.status = format!("{}: {}", warning.title, warning.message);
                self.last_warning = Some(warning);
            }
            UiEvent::SubmissionStarted {
                submission_id,
                name,
            } => {
                self.status = format!("Running differential expression '{name}'...");
                self.running.insert(submission_id, name);
            }
            UiEvent::ResultPublished {
                submission_id,
                name,
            } => {
                self.running.remove(&submission_id);
                self.status = format!("Published '{name}'");
                self.tab = PanelTab::Results;
            }
            UiEvent::SubmissionFailed {
                submission_id,
                name,
                reason,
            } => {
                self.running.remove(&submission_id);
                self.status = format!("'{name}' failed: {reason}");
                self.last_error = Some(UiError::from_message(UiErrorContext::Submit, reason));
            }
            UiEvent::ResultsUpdated(records) => self.results = records,
            UiEvent::Error(err) => {
                self.status = err.message().to_string();
                self.last_error = Some(err);
            }
        }
    }

    pub fn dismiss_warning(&mut self) {
        self.last_warning = None;
    }
}
