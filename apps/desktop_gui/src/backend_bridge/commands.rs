//! Backend commands queued from UI to backend worker.

use panel_core::PanelForm;

pub enum BackendCommand {
    RefreshSelections,
    ReloadSession,
    Submit { form: PanelForm },
}
