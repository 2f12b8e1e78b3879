//! Runtime bridge between UI command queue and backend event intake.

use std::{collections::HashSet, path::Path, sync::Arc, thread};

use anyhow::Result;
use crossbeam_channel::{Receiver, Sender};
use panel_core::{
    config::{read_session, PanelSettings},
    memory::{
        InMemoryResultsStore, InMemorySelectionManager, MissingComputationService,
        SizeSummaryComputation,
    },
    ComputationService, NotificationBus, PanelDependencies, PanelError, PanelEvent, ResultsView,
    SelectionPanelController,
};
use tokio::{runtime::Handle, sync::broadcast};

use crate::backend_bridge::commands::BackendCommand;
use crate::controller::events::{UiError, UiErrorContext, UiEvent};

/// Refreshes the results tab by pushing the store's records to the UI thread.
struct GuiResultsView {
    store: Arc<InMemoryResultsStore>,
    ui_tx: Sender<UiEvent>,
    runtime: Handle,
}

impl ResultsView for GuiResultsView {
    fn refresh(&self) {
        let store = Arc::clone(&self.store);
        let ui_tx = self.ui_tx.clone();
        self.runtime.spawn(async move {
            let records = store.records().await;
            let _ = ui_tx.try_send(UiEvent::ResultsUpdated(records));
        });
    }
}

pub fn launch(cmd_rx: Receiver<BackendCommand>, ui_tx: Sender<UiEvent>, settings: PanelSettings) {
    thread::spawn(move || {
        let _ = ui_tx.try_send(UiEvent::Info("Backend worker starting...".to_string()));
        let runtime = match tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(err) => {
                let _ = ui_tx.try_send(UiEvent::Error(UiError::from_message(
                    UiErrorContext::BackendStartup,
                    format!("backend worker startup failure: failed to build runtime: {err}"),
                )));
                tracing::error!("failed to build backend runtime: {err}");
                return;
            }
        };

        runtime.block_on(run_backend(cmd_rx, ui_tx, settings));
    });
}

async fn run_backend(cmd_rx: Receiver<BackendCommand>, ui_tx: Sender<UiEvent>, settings: PanelSettings) {
    let session = match settings.session_path.as_deref() {
        Some(path) => match read_session(path) {
            Ok(session) => Some(session),
            Err(err) => {
                let _ = ui_tx.try_send(UiEvent::Error(UiError::from_message(
                    UiErrorContext::General,
                    format!("{err:#}"),
                )));
                tracing::warn!("starting without a session: {err:#}");
                None
            }
        },
        None => {
            let _ = ui_tx.try_send(UiEvent::Info(
                "No session configured; set session_path in panel.toml or pass --session"
                    .to_string(),
            ));
            None
        }
    };

    let bus = NotificationBus::new(settings.notification_capacity);
    let selections = Arc::new(match &session {
        Some(session) => InMemorySelectionManager::from_session(session, bus.clone()),
        None => InMemorySelectionManager::with_bus(Vec::new(), bus.clone()),
    });
    let computation: Arc<dyn ComputationService> = match &session {
        Some(session) => Arc::new(SizeSummaryComputation::new(
            session.methods.clone(),
            selections.clone(),
        )),
        None => Arc::new(MissingComputationService),
    };
    let store = Arc::new(InMemoryResultsStore::new());
    let controller = SelectionPanelController::new(PanelDependencies {
        selections: selections.clone(),
        computation,
        results_store: store.clone(),
        results_view: Arc::new(GuiResultsView {
            store,
            ui_tx: ui_tx.clone(),
            runtime: Handle::current(),
        }),
        bus,
    });

    let forward_task = tokio::spawn(forward_panel_events(
        controller.subscribe_events(),
        ui_tx.clone(),
    ));

    match controller.initialize().await {
        Ok(ready) => {
            let _ = ui_tx.try_send(UiEvent::Ready {
                methods: ready.methods().to_vec(),
            });
        }
        Err(err) => {
            let _ = ui_tx.try_send(UiEvent::Error(UiError::from_message(
                UiErrorContext::BackendStartup,
                format!("backend worker startup failure: {err}"),
            )));
            tracing::error!("selection panel failed to initialize: {err}");
            forward_task.abort();
            return;
        }
    }

    while let Ok(cmd) = cmd_rx.recv() {
        match cmd {
            BackendCommand::RefreshSelections => {
                if let Err(err) = controller.refresh_selection_mirror().await {
                    let _ = ui_tx.try_send(UiEvent::Error(UiError::from_message(
                        UiErrorContext::RefreshSelections,
                        err.to_string(),
                    )));
                }
            }
            BackendCommand::ReloadSession => {
                let Some(path) = settings.session_path.as_deref() else {
                    let _ = ui_tx.try_send(UiEvent::Info("No session file to reload".to_string()));
                    continue;
                };
                match reload_session(&selections, path).await {
                    Ok(count) => {
                        let _ = ui_tx.try_send(UiEvent::Info(format!(
                            "Reloaded {count} selections from {}",
                            path.display()
                        )));
                    }
                    Err(err) => {
                        let _ = ui_tx.try_send(UiEvent::Error(UiError::from_message(
                            UiErrorContext::RefreshSelections,
                            format!("{err:#}"),
                        )));
                    }
                }
            }
            BackendCommand::Submit { form } => {
                let mirror = controller.selections().await;
                let outcome = form
                    .to_request(&mirror)
                    .and_then(|request| controller.submit(request));
                match outcome {
                    Ok(pending) => {
                        tracing::debug!(submission_id = %pending.id(), "submission dispatched");
                    }
                    // Already surfaced through the panel's warning event.
                    Err(PanelError::IdenticalSelections { .. }) => {}
                    Err(err) => {
                        let event = match err.user_warning() {
                            Some(warning) => UiEvent::Warning(warning),
                            None => UiEvent::Error(UiError::from_message(
                                UiErrorContext::Submit,
                                err.to_string(),
                            )),
                        };
                        let _ = ui_tx.try_send(event);
                    }
                }
            }
        }
    }

    controller.shutdown().await;
    forward_task.abort();
}

async fn forward_panel_events(mut rx: broadcast::Receiver<PanelEvent>, ui_tx: Sender<UiEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                if ui_tx.try_send(UiEvent::from(event)).is_err() {
                    tracing::warn!("ui event queue unavailable; dropping panel event");
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "ui event forwarder lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Brings the selection manager in line with the session file on disk.
/// Every change goes through the manager so the panel hears about it.
async fn reload_session(selections: &InMemorySelectionManager, path: &Path) -> Result<usize> {
    let session = read_session(path)?;
    let keep: HashSet<_> = session
        .selections
        .iter()
        .map(|selection| selection.id.clone())
        .collect();

    for existing in selections.snapshot().await {
        if !keep.contains(&existing.id) {
            selections.remove(&existing.id).await;
        }
    }
    let count = session.selections.len();
    for selection in session.selections {
        selections.upsert(selection).await;
    }
    Ok(count)
}
