//! Values currently entered in the comparison form.

use shared::{
    domain::{MethodId, MethodRef, SelectionId},
    protocol::SubmissionRequest,
};

use crate::{error::PanelError, mirror::SelectionStore};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PanelForm {
    pub selection_a: Option<SelectionId>,
    pub selection_b: Option<SelectionId>,
    pub method: Option<MethodId>,
    pub result_name: String,
}

impl PanelForm {
    /// Starts with `default_method` chosen when the method list offers it.
    pub fn with_default_method(methods: &[MethodRef], default_method: Option<&str>) -> Self {
        let method = default_method
            .and_then(|wanted| methods.iter().find(|m| m.id.as_str() == wanted))
            .map(|m| m.id.clone());
        Self {
            method,
            ..Self::default()
        }
    }

    /// Forgets choices that the latest refresh no longer offers.
    pub fn retain_known(&mut self, selections: &SelectionStore, methods: &[MethodRef]) {
        if self
            .selection_a
            .as_ref()
            .is_some_and(|id| !selections.contains(id))
        {
            self.selection_a = None;
        }
        if self
            .selection_b
            .as_ref()
            .is_some_and(|id| !selections.contains(id))
        {
            self.selection_b = None;
        }
        if self
            .method
            .as_ref()
            .is_some_and(|id| !methods.iter().any(|m| &m.id == id))
        {
            self.method = None;
        }
    }

    /// A blank result name becomes "<A> vs <B>" using the mirrored display names.
    pub fn to_request(&self, selections: &SelectionStore) -> Result<SubmissionRequest, PanelError> {
        let selection_a = self
            .selection_a
            .clone()
            .ok_or(PanelError::MissingChoice { field: "selection A" })?;
        let selection_b = self
            .selection_b
            .clone()
            .ok_or(PanelError::MissingChoice { field: "selection B" })?;
        let method = self
            .method
            .clone()
            .ok_or(PanelError::MissingChoice { field: "method" })?;

        let result_name = match self.result_name.trim() {
            "" => {
                let a_name = selections
                    .display_name(&selection_a)
                    .unwrap_or(selection_a.as_str());
                let b_name = selections
                    .display_name(&selection_b)
                    .unwrap_or(selection_b.as_str());
                format!("{a_name} vs {b_name}")
            }
            name => name.to_string(),
        };

        Ok(SubmissionRequest {
            selection_a,
            selection_b,
            method,
            result_name,
        })
    }
}
