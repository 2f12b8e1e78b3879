use super::*;
use std::{
    collections::HashMap,
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use anyhow::anyhow;
use serde_json::json;
use shared::error::WarningCode;
use tokio::{sync::Notify, time::timeout};

#[derive(Default)]
struct SelectionState {
    ids: Vec<SelectionId>,
    names: HashMap<SelectionId, String>,
    cells: HashMap<SelectionId, BTreeSet<CellId>>,
    failing_name: Option<SelectionId>,
    listing_gate: Option<Arc<Notify>>,
}

#[derive(Default)]
struct TestSelectionManager {
    state: Mutex<SelectionState>,
    list_calls: AtomicUsize,
}

impl TestSelectionManager {
    fn with(selections: &[(&str, &str, &[&str])]) -> Arc<Self> {
        let manager = Arc::new(Self::default());
        {
            let mut state = manager
                .state
                .try_lock()
                .expect("fresh manager is unlocked");
            for (id, name, cells) in selections {
                let id = SelectionId::new(*id);
                state.ids.push(id.clone());
                state.names.insert(id.clone(), name.to_string());
                state
                    .cells
                    .insert(id, cells.iter().map(|c| CellId::new(*c)).collect());
            }
        }
        manager
    }

    async fn set_ids(&self, ids: &[&str]) {
        let mut state = self.state.lock().await;
        state.ids = ids.iter().map(|id| SelectionId::new(*id)).collect();
        for id in &state.ids.clone() {
            state
                .names
                .entry(id.clone())
                .or_insert_with(|| format!("{id} cells"));
        }
    }

    async fn fail_name_of(&self, id: &str) {
        self.state.lock().await.failing_name = Some(SelectionId::new(id));
    }

    /// Later listings stall until the returned gate is notified. A stalled
    /// listing answers with the ids it saw when it started.
    async fn hold_listing(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.state.lock().await.listing_gate = Some(gate.clone());
        gate
    }

    async fn release_listing(&self) {
        self.state.lock().await.listing_gate = None;
    }
}

#[async_trait]
impl SelectionManager for TestSelectionManager {
    async fn list_selection_ids(&self) -> Result<Vec<SelectionId>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let (ids, gate) = {
            let state = self.state.lock().await;
            (state.ids.clone(), state.listing_gate.clone())
        };
        if let Some(gate) = gate {
            gate.notified().await;
        }
        Ok(ids)
    }

    async fn display_name_of(&self, id: &SelectionId) -> Result<String> {
        let state = self.state.lock().await;
        if state.failing_name.as_ref() == Some(id) {
            return Err(anyhow!("selection store offline"));
        }
        state
            .names
            .get(id)
            .cloned()
            .ok_or_else(|| anyhow!("unknown selection {id}"))
    }

    async fn cells_of(&self, id: &SelectionId) -> Result<BTreeSet<CellId>> {
        Ok(self
            .state
            .lock()
            .await
            .cells
            .get(id)
            .cloned()
            .unwrap_or_default())
    }
}

#[derive(Clone, Copy)]
enum RunBehavior {
    Succeed,
    Fail,
    Hang,
}

struct TestComputation {
    methods: Vec<MethodRef>,
    behavior: RunBehavior,
    list_calls: AtomicUsize,
    runs: Mutex<Vec<(SelectionId, SelectionId, MethodId)>>,
}

impl TestComputation {
    fn new(behavior: RunBehavior) -> Arc<Self> {
        Arc::new(Self {
            methods: vec![
                MethodRef {
                    id: MethodId::new("wilcoxon"),
                    display_name: "Wilcoxon rank-sum".to_string(),
                },
                MethodRef {
                    id: MethodId::new("t-test"),
                    display_name: "Welch t-test".to_string(),
                },
            ],
            behavior,
            list_calls: AtomicUsize::new(0),
            runs: Mutex::new(Vec::new()),
        })
    }

    async fn runs(&self) -> Vec<(SelectionId, SelectionId, MethodId)> {
        self.runs.lock().await.clone()
    }
}

#[async_trait]
impl ComputationService for TestComputation {
    async fn list_available_methods(&self) -> Result<Vec<MethodRef>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.methods.clone())
    }

    async fn run_differential(
        &self,
        selection_a: &SelectionId,
        selection_b: &SelectionId,
        method: &MethodId,
    ) -> Result<DiffExprPayload> {
        self.runs
            .lock()
            .await
            .push((selection_a.clone(), selection_b.clone(), method.clone()));
        match self.behavior {
            RunBehavior::Succeed => Ok(DiffExprPayload(json!({
                "genes": ["CD3E", "MS4A1"],
                "method": method,
            }))),
            RunBehavior::Fail => Err(anyhow!("worker crashed")),
            RunBehavior::Hang => std::future::pending().await,
        }
    }
}

#[derive(Default)]
struct TestResultsStore {
    records: Mutex<Vec<ResultRecord>>,
}

#[async_trait]
impl ResultsStore for TestResultsStore {
    async fn publish(&self, record: ResultRecord) -> Result<()> {
        self.records.lock().await.push(record);
        Ok(())
    }
}

#[derive(Default)]
struct CountingResultsView {
    refreshes: AtomicUsize,
}

impl ResultsView for CountingResultsView {
    fn refresh(&self) {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
    }
}

struct Harness {
    controller: Arc<SelectionPanelController>,
    selections: Arc<TestSelectionManager>,
    computation: Arc<TestComputation>,
    store: Arc<TestResultsStore>,
    view: Arc<CountingResultsView>,
    bus: NotificationBus,
}

fn harness(behavior: RunBehavior) -> Harness {
    harness_with(
        TestSelectionManager::with(&[
            ("A1", "T cells", &["c1", "c2"][..]),
            ("A2", "B cells", &["c3"][..]),
        ]),
        behavior,
    )
}

fn harness_with(selections: Arc<TestSelectionManager>, behavior: RunBehavior) -> Harness {
    let computation = TestComputation::new(behavior);
    let store = Arc::new(TestResultsStore::default());
    let view = Arc::new(CountingResultsView::default());
    let bus = NotificationBus::default();
    let controller = SelectionPanelController::new(PanelDependencies {
        selections: selections.clone(),
        computation: computation.clone(),
        results_store: store.clone(),
        results_view: view.clone(),
        bus: bus.clone(),
    });
    Harness {
        controller,
        selections,
        computation,
        store,
        view,
        bus,
    }
}

fn request(a: &str, b: &str, method: &str, name: &str) -> SubmissionRequest {
    SubmissionRequest {
        selection_a: SelectionId::new(a),
        selection_b: SelectionId::new(b),
        method: MethodId::new(method),
        result_name: name.to_string(),
    }
}

fn drain(rx: &mut broadcast::Receiver<PanelEvent>) -> Vec<PanelEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn mirror_ids(store: &SelectionStore) -> Vec<&str> {
    store.ids().map(SelectionId::as_str).collect()
}

/// Initializes the controller and waits for the background mirror fill.
async fn initialized(behavior: RunBehavior) -> Harness {
    let h = harness(behavior);
    h.controller.initialize().await.expect("initialize");
    wait_for_mirror(&h.controller, &["A1", "A2"]).await;
    h
}

async fn wait_for_mirror(controller: &SelectionPanelController, expected: &[&str]) {
    for _ in 0..200 {
        if mirror_ids(&controller.selections().await) == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!(
        "mirror never became {expected:?}, last seen {:?}",
        mirror_ids(&controller.selections().await)
    );
}

#[tokio::test]
async fn initialize_populates_methods_and_mirror() {
    let h = harness(RunBehavior::Succeed);

    let ready = h.controller.initialize().await.expect("initialize");

    let methods: Vec<_> = ready.methods().iter().map(|m| m.id.as_str()).collect();
    assert_eq!(methods, ["wilcoxon", "t-test"]);
    wait_for_mirror(&h.controller, &["A1", "A2"]).await;
    assert_eq!(
        h.controller
            .selections()
            .await
            .display_name(&SelectionId::new("A2")),
        Some("B cells")
    );
}

#[tokio::test]
async fn initialize_side_effects_happen_once() {
    let h = harness(RunBehavior::Succeed);

    let first = h.controller.initialize().await.expect("first") as *const PanelReady;
    let second = h.controller.initialize().await.expect("second") as *const PanelReady;

    assert_eq!(first, second);
    wait_for_mirror(&h.controller, &["A1", "A2"]).await;
    assert_eq!(h.computation.list_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.selections.list_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.bus.subscriber_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_initialize_runs_once() {
    let h = harness(RunBehavior::Succeed);

    let (a, b) = tokio::join!(h.controller.initialize(), h.controller.initialize());
    a.expect("first");
    b.expect("second");

    assert_eq!(h.computation.list_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.bus.subscriber_count(), 1);
}

#[tokio::test]
async fn refresh_and_submit_require_initialization() {
    let h = harness(RunBehavior::Succeed);

    assert!(matches!(
        h.controller.refresh_selection_mirror().await,
        Err(PanelError::NotInitialized)
    ));
    assert!(matches!(
        h.controller.submit(request("A1", "A2", "wilcoxon", "R1")),
        Err(PanelError::NotInitialized)
    ));
    assert!(h.controller.methods().is_empty());
    assert!(h.computation.runs().await.is_empty());
}

#[tokio::test]
async fn identical_selections_warn_once_without_computing() {
    let h = initialized(RunBehavior::Succeed).await;
    let mut events = h.controller.subscribe_events();

    let err = h
        .controller
        .submit(request("A1", "A1", "wilcoxon", "R1"))
        .err()
        .expect("must be rejected");
    assert!(matches!(err, PanelError::IdenticalSelections { .. }));

    tokio::time::sleep(Duration::from_millis(20)).await;
    let warnings: Vec<_> = drain(&mut events)
        .into_iter()
        .filter_map(|event| match event {
            PanelEvent::Warning(warning) => Some(warning),
            _ => None,
        })
        .collect();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].code, WarningCode::IdenticalSelections);
    assert!(h.computation.runs().await.is_empty());
    assert!(h.store.records.lock().await.is_empty());
    assert_eq!(h.view.refreshes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn distinct_selections_compute_once_and_publish() {
    let h = initialized(RunBehavior::Succeed).await;
    let mut events = h.controller.subscribe_events();

    let pending = h
        .controller
        .submit(request("A1", "A2", "wilcoxon", "R1"))
        .expect("submit");
    let submission_id = pending.id();
    let record = pending.wait().await.expect("record");

    assert_eq!(
        h.computation.runs().await,
        vec![(
            SelectionId::new("A1"),
            SelectionId::new("A2"),
            MethodId::new("wilcoxon")
        )]
    );

    let records = h.store.records.lock().await.clone();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].name, "R1");
    assert_eq!(records[0], record);
    assert_eq!(record.submission_id, submission_id);
    assert_eq!(record.results.0["genes"][0], "CD3E");
    assert_eq!(
        record.selection_a_cells,
        [CellId::new("c1"), CellId::new("c2")]
            .into_iter()
            .collect::<BTreeSet<_>>()
    );
    assert_eq!(
        record.selection_b_cells,
        [CellId::new("c3")].into_iter().collect::<BTreeSet<_>>()
    );
    assert_eq!(h.view.refreshes.load(Ordering::SeqCst), 1);

    let events = drain(&mut events);
    assert!(matches!(
        events.first(),
        Some(PanelEvent::SubmissionStarted { .. })
    ));
    assert!(events.iter().any(|event| matches!(
        event,
        PanelEvent::ResultPublished { name, .. } if name == "R1"
    )));
}

#[tokio::test]
async fn failed_computation_publishes_nothing() {
    let h = initialized(RunBehavior::Fail).await;
    let mut events = h.controller.subscribe_events();

    let err = h
        .controller
        .submit(request("A1", "A2", "t-test", "R2"))
        .expect("submit")
        .wait()
        .await
        .expect_err("must fail");

    assert!(err.to_string().contains("worker crashed"));
    assert_eq!(h.computation.runs().await.len(), 1);
    assert!(h.store.records.lock().await.is_empty());
    assert_eq!(h.view.refreshes.load(Ordering::SeqCst), 0);
    assert!(drain(&mut events).iter().any(|event| matches!(
        event,
        PanelEvent::SubmissionFailed { name, .. } if name == "R2"
    )));
}

#[tokio::test]
async fn hanging_computation_does_not_block_submit() {
    let h = initialized(RunBehavior::Hang).await;

    let pending = h
        .controller
        .submit(request("A1", "A2", "wilcoxon", "R1"))
        .expect("submit returns immediately");

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!pending.is_finished());
    assert_eq!(h.computation.runs().await.len(), 1);
    assert!(h.store.records.lock().await.is_empty());
}

#[tokio::test]
async fn overlapping_submissions_each_publish() {
    let h = initialized(RunBehavior::Succeed).await;

    let first = h
        .controller
        .submit(request("A1", "A2", "wilcoxon", "R1"))
        .expect("first");
    let second = h
        .controller
        .submit(request("A2", "A1", "t-test", "R2"))
        .expect("second");
    assert_ne!(first.id(), second.id());

    first.wait().await.expect("first record");
    second.wait().await.expect("second record");

    let mut names: Vec<_> = h
        .store
        .records
        .lock()
        .await
        .iter()
        .map(|record| record.name.clone())
        .collect();
    names.sort();
    assert_eq!(names, ["R1", "R2"]);
    assert_eq!(h.view.refreshes.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn refresh_matches_manager_ids_without_duplicates() {
    let h = initialized(RunBehavior::Succeed).await;

    h.selections.set_ids(&["A2", "A1", "A2", "A4"]).await;
    let entries = h
        .controller
        .refresh_selection_mirror()
        .await
        .expect("refresh");

    let ids: Vec<_> = entries.iter().map(|entry| entry.id.as_str()).collect();
    assert_eq!(ids, ["A2", "A1", "A4"]);
    assert_eq!(mirror_ids(&h.controller.selections().await), ["A2", "A1", "A4"]);
}

#[tokio::test]
async fn empty_selection_set_empties_mirror() {
    let h = initialized(RunBehavior::Succeed).await;

    h.selections.set_ids(&[]).await;
    let entries = h
        .controller
        .refresh_selection_mirror()
        .await
        .expect("refresh");

    assert!(entries.is_empty());
    assert!(h.controller.selections().await.is_empty());
}

#[tokio::test]
async fn failed_name_lookup_leaves_mirror_empty() {
    let h = initialized(RunBehavior::Succeed).await;

    h.selections.fail_name_of("A2").await;
    let err = h
        .controller
        .refresh_selection_mirror()
        .await
        .expect_err("must fail");

    assert!(matches!(err, PanelError::Collaborator { .. }));
    assert!(h.controller.selections().await.is_empty());
}

#[tokio::test]
async fn notification_rebuilds_mirror() {
    let h = initialized(RunBehavior::Succeed).await;

    h.selections.set_ids(&["A1", "A3"]).await;
    assert_eq!(h.bus.publish(Topic::SelectionUpdated), 1);

    wait_for_mirror(&h.controller, &["A1", "A3"]).await;
}

#[tokio::test]
async fn shutdown_stops_listening() {
    let h = initialized(RunBehavior::Succeed).await;

    h.controller.shutdown().await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(h.bus.subscriber_count(), 0);

    h.selections.set_ids(&["A3"]).await;
    h.bus.publish(Topic::SelectionUpdated);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(mirror_ids(&h.controller.selections().await), ["A1", "A2"]);
}

#[tokio::test]
async fn initial_refresh_failure_still_reaches_ready() {
    let selections = TestSelectionManager::with(&[("A1", "T cells", &["c1"][..])]);
    selections.fail_name_of("A1").await;
    let h = harness_with(selections, RunBehavior::Succeed);

    h.controller.initialize().await.expect("initialize");
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(h.controller.is_ready());
    assert_eq!(h.selections.list_calls.load(Ordering::SeqCst), 1);
    assert!(h.controller.selections().await.is_empty());
    assert_eq!(h.controller.methods().len(), 2);
}

#[tokio::test]
async fn initialize_does_not_wait_for_stalled_selection_manager() {
    let selections = TestSelectionManager::with(&[("A1", "T cells", &["c1"][..])]);
    let _gate = selections.hold_listing().await;
    let h = harness_with(selections, RunBehavior::Succeed);

    let ready = timeout(Duration::from_millis(200), h.controller.initialize())
        .await
        .expect("initialize must not wait for the selection manager")
        .expect("initialize");

    assert_eq!(ready.methods().len(), 2);
    assert!(h.controller.is_ready());
    assert_eq!(h.bus.subscriber_count(), 1);
}

#[tokio::test]
async fn stalled_refresh_does_not_block_readers() {
    let h = initialized(RunBehavior::Succeed).await;
    let _gate = h.selections.hold_listing().await;

    assert_eq!(h.bus.publish(Topic::SelectionUpdated), 1);
    tokio::time::sleep(Duration::from_millis(20)).await;

    let mirror = timeout(Duration::from_millis(200), h.controller.selections())
        .await
        .expect("reading the mirror must not wait for a stalled refresh");
    assert!(mirror.is_empty());

    let pending = h
        .controller
        .submit(request("A1", "A2", "wilcoxon", "R1"))
        .expect("submit");
    timeout(Duration::from_millis(200), pending.wait())
        .await
        .expect("submission must not wait for a stalled refresh")
        .expect("record");

    h.selections.release_listing().await;
    h.selections.set_ids(&["A1", "A3"]).await;
    let entries = timeout(
        Duration::from_millis(200),
        h.controller.refresh_selection_mirror(),
    )
    .await
    .expect("a later refresh must not queue behind the stalled one")
    .expect("refresh");

    let ids: Vec<_> = entries.iter().map(|entry| entry.id.as_str()).collect();
    assert_eq!(ids, ["A1", "A3"]);
    assert_eq!(mirror_ids(&h.controller.selections().await), ["A1", "A3"]);
}

#[tokio::test]
async fn superseded_refresh_does_not_overwrite_newer_mirror() {
    let h = initialized(RunBehavior::Succeed).await;
    let gate = h.selections.hold_listing().await;

    // The stalled listing answers with A1, A2 once released.
    h.bus.publish(Topic::SelectionUpdated);
    tokio::time::sleep(Duration::from_millis(20)).await;

    h.selections.release_listing().await;
    h.selections.set_ids(&["A3"]).await;
    h.controller
        .refresh_selection_mirror()
        .await
        .expect("refresh");
    assert_eq!(mirror_ids(&h.controller.selections().await), ["A3"]);

    gate.notify_one();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(h.selections.list_calls.load(Ordering::SeqCst), 3);
    assert_eq!(mirror_ids(&h.controller.selections().await), ["A3"]);
}

fn three_selections() -> Harness {
    harness_with(
        TestSelectionManager::with(&[
            ("A1", "T cells", &["c1", "c2"][..]),
            ("A2", "B cells", &["c3"][..]),
            ("A3", "NK cells", &["c4", "c5"][..]),
        ]),
        RunBehavior::Succeed,
    )
}

#[tokio::test]
async fn every_identical_pair_warns_once_without_computing() {
    let h = three_selections();
    h.controller.initialize().await.expect("initialize");
    wait_for_mirror(&h.controller, &["A1", "A2", "A3"]).await;
    let mut events = h.controller.subscribe_events();

    for (id, method) in [("A1", "wilcoxon"), ("A2", "t-test"), ("A3", "wilcoxon")] {
        let err = h
            .controller
            .submit(request(id, id, method, "same"))
            .err()
            .expect("identical pair must be rejected");
        assert!(
            matches!(&err, PanelError::IdenticalSelections { selection } if selection.as_str() == id)
        );

        let warnings = drain(&mut events)
            .into_iter()
            .filter(|event| matches!(event, PanelEvent::Warning(_)))
            .count();
        assert_eq!(warnings, 1, "pair ({id}, {id})");
    }

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(h.computation.runs().await.is_empty());
    assert!(h.store.records.lock().await.is_empty());
    assert_eq!(h.view.refreshes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn every_distinct_pair_computes_exactly_once() {
    let h = three_selections();
    h.controller.initialize().await.expect("initialize");
    wait_for_mirror(&h.controller, &["A1", "A2", "A3"]).await;

    let pairs = [
        ("A1", "A2", "wilcoxon"),
        ("A2", "A1", "wilcoxon"),
        ("A1", "A3", "t-test"),
        ("A3", "A1", "t-test"),
        ("A2", "A3", "wilcoxon"),
        ("A3", "A2", "t-test"),
    ];

    for (index, (a, b, method)) in pairs.into_iter().enumerate() {
        let name = format!("{a} vs {b}");
        let record = h
            .controller
            .submit(request(a, b, method, &name))
            .expect("submit")
            .wait()
            .await
            .expect("record");

        let runs = h.computation.runs().await;
        assert_eq!(runs.len(), index + 1, "pair ({a}, {b})");
        assert_eq!(
            runs[index],
            (
                SelectionId::new(a),
                SelectionId::new(b),
                MethodId::new(method)
            )
        );
        assert_eq!(record.name, name);
        assert_eq!(record.selection_a.as_str(), a);
        assert_eq!(record.selection_b.as_str(), b);
    }

    assert_eq!(h.store.records.lock().await.len(), pairs.len());
    assert_eq!(h.view.refreshes.load(Ordering::SeqCst), pairs.len());
}
