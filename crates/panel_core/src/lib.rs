use std::{
    collections::{BTreeSet, HashSet},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use shared::{
    domain::{CellId, MethodId, MethodRef, SelectionId, SelectionRef, SubmissionId, Topic},
    error::UserWarning,
    protocol::{DiffExprPayload, ResultRecord, SubmissionRequest},
};
use tokio::{
    sync::{broadcast, Mutex, OnceCell, RwLock},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

pub mod bus;
pub mod config;
pub mod error;
pub mod form;
pub mod memory;
pub mod mirror;

pub use bus::{NotificationBus, Subscription};
pub use error::PanelError;
pub use form::PanelForm;
pub use mirror::SelectionStore;

const PANEL_EVENT_CAPACITY: usize = 256;

#[async_trait]
pub trait SelectionManager: Send + Sync {
    async fn list_selection_ids(&self) -> Result<Vec<SelectionId>>;
    async fn display_name_of(&self, id: &SelectionId) -> Result<String>;
    async fn cells_of(&self, id: &SelectionId) -> Result<BTreeSet<CellId>>;
}

#[async_trait]
pub trait ComputationService: Send + Sync {
    async fn list_available_methods(&self) -> Result<Vec<MethodRef>>;
    /// Resolves once the computation finishes. May never resolve; callers
    /// must not block on it.
    async fn run_differential(
        &self,
        selection_a: &SelectionId,
        selection_b: &SelectionId,
        method: &MethodId,
    ) -> Result<DiffExprPayload>;
}

#[async_trait]
pub trait ResultsStore: Send + Sync {
    async fn publish(&self, record: ResultRecord) -> Result<()>;
}

pub trait ResultsView: Send + Sync {
    fn refresh(&self);
}

/// Observer for the "selection-updated" notification.
#[async_trait]
pub trait SelectionsChanged: Send + Sync {
    async fn selections_changed(&self);
}

#[derive(Debug, Clone)]
pub enum PanelEvent {
    SelectionsRefreshed(Vec<SelectionRef>),
    Warning(UserWarning),
    SubmissionStarted {
        submission_id: SubmissionId,
        request: SubmissionRequest,
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
}

pub struct PanelDependencies {
    pub selections: Arc<dyn SelectionManager>,
    pub computation: Arc<dyn ComputationService>,
    pub results_store: Arc<dyn ResultsStore>,
    pub results_view: Arc<dyn ResultsView>,
    pub bus: NotificationBus,
}

/// State that exists once [`SelectionPanelController::initialize`] has run.
#[derive(Debug)]
pub struct PanelReady {
    methods: Vec<MethodRef>,
}

impl PanelReady {
    pub fn methods(&self) -> &[MethodRef] {
        &self.methods
    }
}

/// The cached selection list plus the refresh that last claimed it.
#[derive(Default)]
struct Mirror {
    store: SelectionStore,
    generation: u64,
}

/// Bridges the comparison form to the computation and results collaborators.
///
/// Construct one per application and share it as `Arc`. Nothing happens until
/// [`initialize`](Self::initialize) is called; after that the controller stays
/// ready for the rest of its life.
pub struct SelectionPanelController {
    selections: Arc<dyn SelectionManager>,
    computation: Arc<dyn ComputationService>,
    results_store: Arc<dyn ResultsStore>,
    results_view: Arc<dyn ResultsView>,
    bus: NotificationBus,
    ready: OnceCell<PanelReady>,
    subscription: Mutex<Option<Subscription>>,
    mirror: RwLock<Mirror>,
    refresh_seq: AtomicU64,
    events: broadcast::Sender<PanelEvent>,
}

impl SelectionPanelController {
    pub fn new(deps: PanelDependencies) -> Arc<Self> {
        let (events, _) = broadcast::channel(PANEL_EVENT_CAPACITY);
        Arc::new(Self {
            selections: deps.selections,
            computation: deps.computation,
            results_store: deps.results_store,
            results_view: deps.results_view,
            bus: deps.bus,
            ready: OnceCell::new(),
            subscription: Mutex::new(None),
            mirror: RwLock::new(Mirror::default()),
            refresh_seq: AtomicU64::new(0),
            events,
        })
    }

    /// Fetches the method list and subscribes to selection notifications.
    /// Runs once; every later call returns the same state.
    ///
    /// The first mirror fill runs in the background, so a slow selection
    /// manager does not hold up readiness. Watch for
    /// [`PanelEvent::SelectionsRefreshed`] or call
    /// [`refresh_selection_mirror`](Self::refresh_selection_mirror) to wait
    /// for it.
    pub async fn initialize(self: &Arc<Self>) -> Result<&PanelReady, PanelError> {
        self.ready
            .get_or_try_init(|| async move {
                let methods = self
                    .computation
                    .list_available_methods()
                    .await
                    .map_err(|err| {
                        PanelError::collaborator("failed to list differential expression methods", err)
                    })?;

                let handler: Arc<dyn SelectionsChanged> = self.clone();
                let subscription = self.bus.subscribe(Topic::SelectionUpdated, &handler);
                *self.subscription.lock().await = Some(subscription);

                let controller = Arc::clone(self);
                tokio::spawn(async move {
                    if let Err(err) = controller.rebuild_mirror().await {
                        warn!("initial selection refresh failed, starting with an empty list: {err}");
                    }
                });

                info!(methods = methods.len(), "selection panel ready");
                Ok::<_, PanelError>(PanelReady { methods })
            })
            .await
    }

    pub fn is_ready(&self) -> bool {
        self.ready.initialized()
    }

    pub fn methods(&self) -> &[MethodRef] {
        self.ready
            .get()
            .map(PanelReady::methods)
            .unwrap_or_default()
    }

    pub async fn selections(&self) -> SelectionStore {
        self.mirror.read().await.store.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<PanelEvent> {
        self.events.subscribe()
    }

    pub fn bus(&self) -> &NotificationBus {
        &self.bus
    }

    /// Discards the mirror and rebuilds it from the selection manager.
    ///
    /// If a later refresh starts before this one finishes, the later one
    /// owns the mirror and this call only returns what it fetched.
    pub async fn refresh_selection_mirror(&self) -> Result<Vec<SelectionRef>, PanelError> {
        if !self.is_ready() {
            return Err(PanelError::NotInitialized);
        }
        self.rebuild_mirror().await
    }

    /// Validates `request` and starts the computation in the background.
    ///
    /// Returns as soon as the task is spawned. Identical selections are
    /// rejected with one warning event and no collaborator call. Must be
    /// called from within a tokio runtime.
    pub fn submit(
        self: &Arc<Self>,
        request: SubmissionRequest,
    ) -> Result<PendingSubmission, PanelError> {
        if !self.is_ready() {
            return Err(PanelError::NotInitialized);
        }

        if request.selection_a == request.selection_b {
            let err = PanelError::IdenticalSelections {
                selection: request.selection_a,
            };
            warn!("rejected differential expression submission: {err}");
            if let Some(warning) = err.user_warning() {
                self.emit(PanelEvent::Warning(warning));
            }
            return Err(err);
        }

        let submission_id = SubmissionId::new_v4();
        self.emit(PanelEvent::SubmissionStarted {
            submission_id,
            request: request.clone(),
        });

        let controller = Arc::clone(self);
        let task =
            tokio::spawn(async move { controller.run_submission(submission_id, request).await });

        Ok(PendingSubmission {
            submission_id,
            task,
        })
    }

    /// Stops listening for selection notifications.
    pub async fn shutdown(&self) {
        if let Some(subscription) = self.subscription.lock().await.take() {
            subscription.cancel();
            debug!("selection panel unsubscribed from notifications");
        }
    }

    async fn rebuild_mirror(&self) -> Result<Vec<SelectionRef>, PanelError> {
        let generation = self.refresh_seq.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut mirror = self.mirror.write().await;
            if generation > mirror.generation {
                mirror.store.clear();
                mirror.generation = generation;
            }
        }

        // The mirror lock is never held across collaborator calls.
        let fresh = match self.fetch_selections().await {
            Ok(fresh) => fresh,
            Err(err) => {
                error!("selection refresh failed: {err}");
                return Err(err);
            }
        };

        let mut mirror = self.mirror.write().await;
        if mirror.generation != generation {
            debug!(
                generation,
                latest = mirror.generation,
                "discarding superseded selection refresh"
            );
            return Ok(fresh.entries().to_vec());
        }
        mirror.store.replace(fresh);
        let entries = mirror.store.entries().to_vec();
        drop(mirror);

        debug!(selections = entries.len(), "selection mirror rebuilt");
        self.emit(PanelEvent::SelectionsRefreshed(entries.clone()));
        Ok(entries)
    }

    async fn fetch_selections(&self) -> Result<SelectionStore, PanelError> {
        let ids = self
            .selections
            .list_selection_ids()
            .await
            .map_err(|err| PanelError::collaborator("failed to list selections", err))?;

        let mut seen = HashSet::with_capacity(ids.len());
        let mut entries = Vec::with_capacity(ids.len());
        for id in ids {
            if !seen.insert(id.clone()) {
                continue;
            }
            let display_name = self.selections.display_name_of(&id).await.map_err(|err| {
                PanelError::collaborator(format!("failed to resolve name of selection '{id}'"), err)
            })?;
            entries.push(SelectionRef { id, display_name });
        }

        Ok(SelectionStore::from_entries(entries))
    }

    async fn run_submission(
        &self,
        submission_id: SubmissionId,
        request: SubmissionRequest,
    ) -> Result<ResultRecord, PanelError> {
        let outcome = self.compute_and_publish(submission_id, &request).await;
        match &outcome {
            Ok(record) => {
                info!(%submission_id, name = %record.name, "published differential expression result");
                self.emit(PanelEvent::ResultPublished {
                    submission_id,
                    name: record.name.clone(),
                });
            }
            Err(err) => {
                error!(%submission_id, name = %request.result_name, "differential expression failed: {err}");
                self.emit(PanelEvent::SubmissionFailed {
                    submission_id,
                    name: request.result_name.clone(),
                    reason: err.to_string(),
                });
            }
        }
        outcome
    }

    async fn compute_and_publish(
        &self,
        submission_id: SubmissionId,
        request: &SubmissionRequest,
    ) -> Result<ResultRecord, PanelError> {
        debug!(
            %submission_id,
            selection_a = %request.selection_a,
            selection_b = %request.selection_b,
            method = %request.method,
            "dispatching differential expression"
        );

        let results = self
            .computation
            .run_differential(&request.selection_a, &request.selection_b, &request.method)
            .await
            .map_err(|err| PanelError::collaborator("differential expression computation failed", err))?;

        let selection_a_cells = self.cells_of(&request.selection_a).await?;
        let selection_b_cells = self.cells_of(&request.selection_b).await?;

        let record = ResultRecord {
            submission_id,
            name: request.result_name.clone(),
            selection_a: request.selection_a.clone(),
            selection_b: request.selection_b.clone(),
            method: request.method.clone(),
            results,
            selection_a_cells,
            selection_b_cells,
            published_at: Utc::now(),
        };

        self.results_store
            .publish(record.clone())
            .await
            .map_err(|err| PanelError::collaborator("failed to store result", err))?;
        self.results_view.refresh();

        Ok(record)
    }

    async fn cells_of(&self, id: &SelectionId) -> Result<BTreeSet<CellId>, PanelError> {
        self.selections.cells_of(id).await.map_err(|err| {
            PanelError::collaborator(format!("failed to resolve cells of selection '{id}'"), err)
        })
    }

    fn emit(&self, event: PanelEvent) {
        // No receivers is fine; events are advisory.
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl SelectionsChanged for SelectionPanelController {
    async fn selections_changed(&self) {
        if let Err(err) = self.rebuild_mirror().await {
            warn!("could not refresh selections after notification: {err}");
        }
    }
}

/// Handle to a computation started by [`SelectionPanelController::submit`].
/// Dropping it leaves the computation running.
pub struct PendingSubmission {
    submission_id: SubmissionId,
    task: JoinHandle<Result<ResultRecord, PanelError>>,
}

impl PendingSubmission {
    pub fn id(&self) -> SubmissionId {
        self.submission_id
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn wait(self) -> Result<ResultRecord, PanelError> {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(err) => Err(PanelError::collaborator(
                "differential expression task did not complete",
                err.into(),
            )),
        }
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
