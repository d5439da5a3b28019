//! In-memory `GraphStore` with MERGE semantics, for tests.

use crate::graph_builder::Properties;
use crate::neo4j_storage::{GraphStore, ImportMetadata, StoreTxn, WriteOp};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoredNode {
    pub labels: BTreeSet<String>,
    pub properties: Properties,
}

/// `(from, type, to)`
pub type EdgeKey = (String, String, String);

#[derive(Debug, Default)]
pub struct MemoryState {
    pub nodes: BTreeMap<String, StoredNode>,
    pub relationships: BTreeMap<EdgeKey, Properties>,
    pub constraints: BTreeSet<(String, String)>,
    pub imports: Vec<ImportMetadata>,
    /// Kind of every committed op, in commit order
    pub committed: Vec<&'static str>,
    pub rollbacks: usize,
    /// Constraints that already exist in an incompatible form
    pub conflicting_constraints: BTreeSet<String>,
    pub fail_on: Option<&'static str>,
}

impl MemoryState {
    pub fn has_edge(&self, from: &str, rel_type: &str, to: &str) -> bool {
        self.relationships
            .contains_key(&(from.to_string(), rel_type.to_string(), to.to_string()))
    }

    fn apply(&mut self, op: WriteOp) {
        match op {
            WriteOp::WipeAll => {
                self.nodes.clear();
                self.relationships.clear();
                self.imports.clear();
            }
            WriteOp::CreateConstraint { label, property } => {
                self.constraints.insert((label, property));
            }
            WriteOp::UpsertNodes { labels, rows } => {
                for row in rows {
                    let node = self.nodes.entry(row.identifier).or_default();
                    node.labels.extend(labels.iter().cloned());
                    node.properties.extend(row.properties);
                }
            }
            WriteOp::UpsertRelationships { key, rows } => {
                for row in rows {
                    // MATCH on a missing or differently labeled endpoint yields no row
                    let source_ok = self
                        .nodes
                        .get(&row.from)
                        .is_some_and(|n| n.labels.contains(&key.source_label));
                    let target_ok = self
                        .nodes
                        .get(&row.to)
                        .is_some_and(|n| n.labels.contains(key.target_label()));
                    if !source_ok || !target_ok {
                        continue;
                    }
                    self.relationships
                        .entry((row.from, key.rel_type.clone(), row.to))
                        .or_default()
                        .extend(row.properties);
                }
            }
            WriteOp::RecordImport(meta) => {
                self.imports.retain(|m| m.import_id != meta.import_id);
                self.imports.push(meta);
            }
        }
    }
}

fn kind(op: &WriteOp) -> &'static str {
    match op {
        WriteOp::WipeAll => "wipe",
        WriteOp::CreateConstraint { .. } => "constraint",
        WriteOp::UpsertNodes { .. } => "nodes",
        WriteOp::UpsertRelationships { .. } => "relationships",
        WriteOp::RecordImport(_) => "metadata",
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every op of the given kind fail when run
    pub fn fail_on(&self, op_kind: &'static str) {
        self.state.lock().unwrap().fail_on = Some(op_kind);
    }

    pub fn conflict_on_constraint(&self, label: &str) {
        self.state.lock().unwrap().conflicting_constraints.insert(label.to_string());
    }

    pub fn inspect<R>(&self, f: impl FnOnce(&MemoryState) -> R) -> R {
        f(&self.state.lock().unwrap())
    }
}

pub struct MemoryTxn {
    state: Arc<Mutex<MemoryState>>,
    pending: Vec<WriteOp>,
}

#[async_trait]
impl GraphStore for MemoryStore {
    type Txn = MemoryTxn;

    async fn begin(&self) -> Result<MemoryTxn> {
        Ok(MemoryTxn {
            state: Arc::clone(&self.state),
            pending: Vec::new(),
        })
    }
}

#[async_trait]
impl StoreTxn for MemoryTxn {
    async fn run(&mut self, op: WriteOp) -> Result<()> {
        {
            let state = self.state.lock().unwrap();
            if state.fail_on == Some(kind(&op)) {
                return Err(anyhow!("injected {} failure", kind(&op)));
            }
            if let WriteOp::CreateConstraint { label, .. } = &op {
                if state.conflicting_constraints.contains(label) {
                    return Err(anyhow!("conflicting constraint on {}", label));
                }
            }
        }
        self.pending.push(op);
        Ok(())
    }

    async fn commit(self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        for op in self.pending {
            state.committed.push(kind(&op));
            state.apply(op);
        }
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        self.state.lock().unwrap().rollbacks += 1;
        Ok(())
    }
}
