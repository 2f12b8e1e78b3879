//! In-process collaborators backed by a loaded [`SessionSnapshot`].
//!
//! These stand in for the analysis application's real selection manager and
//! results store when the panel runs on its own.

use std::{collections::BTreeSet, sync::Arc};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::json;
use shared::{
    domain::{CellId, MethodId, MethodRef, SelectionId, Topic},
    protocol::{DiffExprPayload, ResultRecord, SelectionDefinition, SessionSnapshot},
};
use tokio::sync::RwLock;
use tracing::info;

use crate::{
    bus::NotificationBus, ComputationService, ResultsStore, ResultsView, SelectionManager,
};

pub struct InMemorySelectionManager {
    selections: RwLock<Vec<SelectionDefinition>>,
    bus: Option<NotificationBus>,
}

impl InMemorySelectionManager {
    pub fn new(selections: Vec<SelectionDefinition>) -> Self {
        Self {
            selections: RwLock::new(selections),
            bus: None,
        }
    }

    /// Publishes `selection-updated` on `bus` after every change.
    pub fn with_bus(selections: Vec<SelectionDefinition>, bus: NotificationBus) -> Self {
        Self {
            selections: RwLock::new(selections),
            bus: Some(bus),
        }
    }

    pub fn from_session(session: &SessionSnapshot, bus: NotificationBus) -> Self {
        Self::with_bus(session.selections.clone(), bus)
    }

    /// Adds `selection`, or replaces the one with the same id in place.
    pub async fn upsert(&self, selection: SelectionDefinition) {
        {
            let mut guard = self.selections.write().await;
            match guard.iter_mut().find(|existing| existing.id == selection.id) {
                Some(existing) => *existing = selection,
                None => guard.push(selection),
            }
        }
        self.notify();
    }

    pub async fn remove(&self, id: &SelectionId) -> bool {
        let removed = {
            let mut guard = self.selections.write().await;
            let before = guard.len();
            guard.retain(|existing| &existing.id != id);
            guard.len() != before
        };
        if removed {
            self.notify();
        }
        removed
    }

    pub async fn snapshot(&self) -> Vec<SelectionDefinition> {
        self.selections.read().await.clone()
    }

    fn notify(&self) {
        if let Some(bus) = &self.bus {
            bus.publish(Topic::SelectionUpdated);
        }
    }

    async fn find<T>(
        &self,
        id: &SelectionId,
        project: impl FnOnce(&SelectionDefinition) -> T,
    ) -> Result<T> {
        let guard = self.selections.read().await;
        guard
            .iter()
            .find(|selection| &selection.id == id)
            .map(project)
            .ok_or_else(|| anyhow!("unknown selection '{id}'"))
    }
}

#[async_trait]
impl SelectionManager for InMemorySelectionManager {
    async fn list_selection_ids(&self) -> Result<Vec<SelectionId>> {
        let guard = self.selections.read().await;
        Ok(guard.iter().map(|selection| selection.id.clone()).collect())
    }

    async fn display_name_of(&self, id: &SelectionId) -> Result<String> {
        self.find(id, |selection| selection.display_name.clone()).await
    }

    async fn cells_of(&self, id: &SelectionId) -> Result<BTreeSet<CellId>> {
        self.find(id, |selection| selection.cells.iter().cloned().collect())
            .await
    }
}

#[derive(Default)]
pub struct InMemoryResultsStore {
    records: RwLock<Vec<ResultRecord>>,
}

impl InMemoryResultsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<ResultRecord> {
        self.records.read().await.clone()
    }

    /// Most recently published record with this name.
    pub async fn get(&self, name: &str) -> Option<ResultRecord> {
        self.records
            .read()
            .await
            .iter()
            .rev()
            .find(|record| record.name == name)
            .cloned()
    }
}

#[async_trait]
impl ResultsStore for InMemoryResultsStore {
    async fn publish(&self, record: ResultRecord) -> Result<()> {
        self.records.write().await.push(record);
        Ok(())
    }
}

/// Reports group sizes instead of running statistics. Useful for wiring the
/// panel up without the analysis backend.
pub struct SizeSummaryComputation {
    methods: Vec<MethodRef>,
    selections: Arc<dyn SelectionManager>,
}

impl SizeSummaryComputation {
    pub fn new(methods: Vec<MethodRef>, selections: Arc<dyn SelectionManager>) -> Self {
        Self {
            methods,
            selections,
        }
    }
}

#[async_trait]
impl ComputationService for SizeSummaryComputation {
    async fn list_available_methods(&self) -> Result<Vec<MethodRef>> {
        Ok(self.methods.clone())
    }

    async fn run_differential(
        &self,
        selection_a: &SelectionId,
        selection_b: &SelectionId,
        method: &MethodId,
    ) -> Result<DiffExprPayload> {
        if !self.methods.iter().any(|known| &known.id == method) {
            return Err(anyhow!("unsupported differential expression method '{method}'"));
        }

        let cells_a = self.selections.cells_of(selection_a).await?;
        let cells_b = self.selections.cells_of(selection_b).await?;
        let shared_cells = cells_a.intersection(&cells_b).count();

        Ok(DiffExprPayload(json!({
            "method": method,
            "selection_a": { "id": selection_a, "cells": cells_a.len() },
            "selection_b": { "id": selection_b, "cells": cells_b.len() },
            "shared_cells": shared_cells,
        })))
    }
}

/// Used when no computation backend is configured.
pub struct MissingComputationService;

#[async_trait]
impl ComputationService for MissingComputationService {
    async fn list_available_methods(&self) -> Result<Vec<MethodRef>> {
        Ok(Vec::new())
    }

    async fn run_differential(
        &self,
        selection_a: &SelectionId,
        selection_b: &SelectionId,
        _method: &MethodId,
    ) -> Result<DiffExprPayload> {
        Err(anyhow!(
            "differential expression backend unavailable for {selection_a} vs {selection_b}"
        ))
    }
}

pub struct LoggingResultsView;

impl ResultsView for LoggingResultsView {
    fn refresh(&self) {
        info!("differential expression results changed");
    }
}

#[cfg(test)]
#[path = "tests/memory_tests.rs"]
mod tests;
