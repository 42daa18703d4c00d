//! Argument status store and judgment application
//!
//! A judgment scores nodes with confidences. [`Progress::apply`] turns every
//! score at or above the cutoff into a proof attempt; the attempt succeeds
//! only when the node's `depends_on` expression holds against the store.
//!
//! Phases are tracked on top of that. A phase completes once any of its
//! `completion_nodes` is proven. A phase unlocks when its own `depends_on`
//! holds over the completed phases, either as a single phase id string or as
//! an expression whose leaves are phase ids.

use crate::condition::{Expression, LookupFn, StatusLookup};
use crate::level::PhaseRecord;
use crate::model::{NodeRecord, NodeRegistry, RefereeResult};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Current proven/unproven flag of each argument. Unknown ids read as
/// unproven.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArgumentStore {
    statuses: BTreeMap<String, bool>,
}

impl ArgumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store with every id in `ids` proven
    pub fn with_proven<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            statuses: ids.into_iter().map(|id| (id.into(), true)).collect(),
        }
    }

    pub fn set(&mut self, id: impl Into<String>, proven: bool) {
        self.statuses.insert(id.into(), proven);
    }

    pub fn is_proven(&self, id: &str) -> bool {
        self.statuses.get(id).copied().unwrap_or(false)
    }

    /// Proven ids in id order
    pub fn proven(&self) -> impl Iterator<Item = &str> {
        self.statuses
            .iter()
            .filter(|(_, proven)| **proven)
            .map(|(id, _)| id.as_str())
    }
}

impl StatusLookup for ArgumentStore {
    fn status(&self, argument_id: &str) -> bool {
        self.is_proven(argument_id)
    }
}

/// Outcome of applying one judgment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressReport {
    /// Newly proven, in the order they were proven
    pub proven: Vec<String>,
    /// Scored high enough but gated by an unmet `depends_on`
    pub blocked: Vec<String>,
    /// Scored ids that name no node in the level
    pub unknown: Vec<String>,
    /// Phases completed by this judgment, in level order
    pub completed_phases: Vec<String>,
    /// Phases that became enterable with this judgment
    pub unlocked_phases: Vec<String>,
}

impl ProgressReport {
    pub fn is_empty(&self) -> bool {
        self.proven.is_empty()
            && self.blocked.is_empty()
            && self.unknown.is_empty()
            && self.completed_phases.is_empty()
            && self.unlocked_phases.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Progress {
    nodes: NodeRegistry,
    store: ArgumentStore,
    cutoff: f64,
    phases: Vec<PhaseRecord>,
    completed_phases: BTreeSet<String>,
    last_report: Option<ProgressReport>,
}

impl Progress {
    pub fn new(nodes: NodeRegistry, cutoff: f64) -> Self {
        Self::with_store(nodes, ArgumentStore::new(), cutoff)
    }

    pub fn with_store(nodes: NodeRegistry, store: ArgumentStore, cutoff: f64) -> Self {
        Self {
            nodes,
            store,
            cutoff,
            phases: Vec::new(),
            completed_phases: BTreeSet::new(),
            last_report: None,
        }
    }

    /// Track completion and unlocking of `phases`. A phase whose completion
    /// nodes are already proven starts out completed.
    pub fn with_phases(mut self, phases: Vec<PhaseRecord>) -> Self {
        self.phases = phases;
        let completed: BTreeSet<String> = self
            .phases
            .iter()
            .filter(|p| self.completion_met(p))
            .map(|p| p.id.clone())
            .collect();
        self.completed_phases = completed;
        self
    }

    pub fn store(&self) -> &ArgumentStore {
        &self.store
    }

    pub fn cutoff(&self) -> f64 {
        self.cutoff
    }

    pub fn last_report(&self) -> Option<&ProgressReport> {
        self.last_report.as_ref()
    }

    pub fn is_phase_completed(&self, phase_id: &str) -> bool {
        self.completed_phases.contains(phase_id)
    }

    fn completion_met(&self, phase: &PhaseRecord) -> bool {
        phase
            .completion_nodes
            .iter()
            .any(|id| self.store.is_proven(id))
    }

    /// Whether `phase`'s own prerequisites hold over the completed phases.
    /// A hidden phase without `depends_on` can never be entered.
    pub fn phase_unlocked(&self, phase: &PhaseRecord) -> bool {
        let completed = LookupFn(|id: &str| self.completed_phases.contains(id));
        match phase.depends_on.as_ref() {
            None => !phase.hidden,
            Some(Value::String(id)) => completed.status(id),
            Some(raw) => match Expression::from_value(raw) {
                Ok(expression) => expression.evaluate(&completed),
                Err(e) => {
                    tracing::error!(phase = %phase.id, "Invalid phase depends_on: {}", e);
                    false
                }
            },
        }
    }

    /// Phases not yet completed whose prerequisites hold, in level order
    pub fn open_phases(&self) -> impl Iterator<Item = &PhaseRecord> {
        self.phases
            .iter()
            .filter(|p| !self.is_phase_completed(&p.id) && self.phase_unlocked(p))
    }

    /// Whether `node`'s prerequisites hold right now. Nodes without
    /// `depends_on` are ungated; a malformed expression never holds.
    pub fn gate_open(&self, node: &NodeRecord) -> bool {
        let Some(raw) = node.depends_on.as_ref() else {
            return true;
        };
        match Expression::from_value(raw) {
            Ok(expression) => {
                for problem in expression.diagnostics() {
                    tracing::warn!(node = %node.id, "Prerequisite issue: {}", problem);
                }
                expression.evaluate(&self.store)
            }
            Err(e) => {
                tracing::error!(node = %node.id, "Invalid depends_on: {}", e);
                false
            }
        }
    }

    /// Apply a judgment to the store.
    ///
    /// Candidates are tried in node registry order. Proving one node can open
    /// the gate of another candidate in the same judgment, so passes repeat
    /// until nothing changes.
    pub fn apply(&mut self, result: &RefereeResult) -> ProgressReport {
        let scored: BTreeSet<&str> = result.nodes_at_least(self.cutoff).collect();
        let mut report = ProgressReport {
            unknown: scored
                .iter()
                .filter(|id| self.nodes.get(id).is_none())
                .map(|id| id.to_string())
                .collect(),
            ..Default::default()
        };

        let open_before: BTreeSet<String> = self.open_phases().map(|p| p.id.clone()).collect();

        let candidates: Vec<&NodeRecord> = self
            .nodes
            .iter()
            .filter(|n| scored.contains(n.id.as_str()) && !self.store.is_proven(&n.id))
            .collect();

        let mut pending = candidates;
        loop {
            let before = pending.len();
            let mut still_blocked = Vec::with_capacity(pending.len());
            for node in pending {
                if self.gate_open(node) {
                    tracing::info!(node = %node.id, "Node proven");
                    self.store.set(node.id.clone(), true);
                    report.proven.push(node.id.clone());
                } else {
                    still_blocked.push(node);
                }
            }
            pending = still_blocked;
            if pending.len() == before || pending.is_empty() {
                break;
            }
        }

        for node in pending {
            tracing::info!(node = %node.id, "Node blocked by prerequisites");
            report.blocked.push(node.id.clone());
        }
        let newly_completed: Vec<String> = self
            .phases
            .iter()
            .filter(|p| !self.is_phase_completed(&p.id) && self.completion_met(p))
            .map(|p| p.id.clone())
            .collect();
        for id in newly_completed {
            tracing::info!(phase = %id, "Phase completed");
            self.completed_phases.insert(id.clone());
            report.completed_phases.push(id);
        }
        report.unlocked_phases = self
            .open_phases()
            .filter(|p| !open_before.contains(&p.id))
            .map(|p| p.id.clone())
            .collect();
        for id in &report.unlocked_phases {
            tracing::info!(phase = %id, "Phase unlocked");
        }

        if !report.unknown.is_empty() {
            tracing::warn!("Judgment scored unknown nodes: {:?}", report.unknown);
        }

        self.last_report = Some(report.clone());
        report
    }
}
