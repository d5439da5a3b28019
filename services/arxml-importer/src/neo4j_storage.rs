//! Neo4j Batch Storage
//!
//! Writes an import plan through a wipe-then-load sequence of committed
//! phases using UNWIND queries. The store sits behind `GraphStore` so the
//! phase logic runs unchanged against Neo4j or an in-memory double.

use crate::error::{ImportError, PipelineResult};
use crate::graph_builder::{Properties, PropertyValue, PROP_IDENTIFIER};
use crate::import_batches::{
    ImportPlan, NodeRow, RelationshipBatch, RelationshipGroupKey, RelationshipRow,
};
use crate::progress::ProgressReporter;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use neo4rs::{query, BoltType, Query};
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::OnceLock;
use tracing::{info, warn};
use uuid::Uuid;

// ============================================================================
// Configuration
// ============================================================================

pub const METADATA_LABEL: &str = "ImportMetadata";
pub const METADATA_KEY: &str = "import_id";

// ============================================================================
// Store Abstraction
// ============================================================================

/// Summary record persisted at the end of every import
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportMetadata {
    pub import_id: Uuid,
    pub source_files: Vec<String>,
    pub imported_at: DateTime<Utc>,
    pub node_count: usize,
    pub relationship_count: usize,
    pub unresolved_count: usize,
}

impl ImportMetadata {
    pub fn new(source_files: Vec<String>) -> Self {
        Self {
            import_id: Uuid::new_v4(),
            source_files,
            imported_at: Utc::now(),
            node_count: 0,
            relationship_count: 0,
            unresolved_count: 0,
        }
    }
}

/// The closed set of writes the loader issues
#[derive(Debug, Clone)]
pub enum WriteOp {
    WipeAll,
    CreateConstraint { label: String, property: String },
    UpsertNodes { labels: Vec<String>, rows: Vec<NodeRow> },
    UpsertRelationships { key: RelationshipGroupKey, rows: Vec<RelationshipRow> },
    RecordImport(ImportMetadata),
}

#[async_trait]
pub trait StoreTxn: Send {
    async fn run(&mut self, op: WriteOp) -> Result<()>;
    async fn commit(self) -> Result<()>;
    async fn rollback(self) -> Result<()>;
}

#[async_trait]
pub trait GraphStore: Send + Sync {
    type Txn: StoreTxn;

    async fn begin(&self) -> Result<Self::Txn>;
}

// ============================================================================
// Cypher Statements
// ============================================================================

pub const WIPE_ALL: &str = "MATCH (n) DETACH DELETE n";

const RECORD_IMPORT: &str = "MERGE (m:ImportMetadata {import_id: $import_id})
     SET m.source_files = $source_files,
         m.imported_at = $imported_at,
         m.node_count = $node_count,
         m.relationship_count = $relationship_count,
         m.unresolved_count = $unresolved_count";

fn invalid_name_chars() -> Option<&'static Regex> {
    static INVALID: OnceLock<Option<Regex>> = OnceLock::new();
    INVALID.get_or_init(|| Regex::new(r"[^A-Za-z0-9_]").ok()).as_ref()
}

/// Labels and relationship types cannot be parameters; clean them before
/// they are spliced into query text.
pub fn cypher_name(raw: &str) -> String {
    let cleaned = match invalid_name_chars() {
        Some(re) => re.replace_all(raw, "_").into_owned(),
        None => raw
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
            .collect(),
    };
    if cleaned.is_empty() {
        return "_".to_string();
    }
    if cleaned.starts_with(|c: char| c.is_ascii_digit()) {
        return format!("_{}", cleaned);
    }
    cleaned
}

pub fn constraint_statement(label: &str, property: &str) -> String {
    let label = cypher_name(label);
    let property = cypher_name(property);
    format!(
        "CREATE CONSTRAINT {}_{}_unique IF NOT EXISTS FOR (n:{}) REQUIRE n.{} IS UNIQUE",
        label,
        property,
        label,
        property
    )
}

pub fn node_upsert_statement(labels: &[String]) -> String {
    let labels: Vec<String> = labels.iter().map(|l| cypher_name(l)).collect();
    format!(
        "UNWIND $rows AS row
         MERGE (n:{} {{identifier: row.identifier}})
         SET n += row.properties",
        labels.join(":")
    )
}

pub fn relationship_upsert_statement(key: &RelationshipGroupKey) -> String {
    format!(
        "UNWIND $rows AS row
         MATCH (a:{} {{identifier: row.from}})
         MATCH (b:{} {{identifier: row.to}})
         MERGE (a)-[r:{}]->(b)
         SET r += row.properties",
        cypher_name(&key.source_label),
        cypher_name(key.target_label()),
        cypher_name(&key.rel_type)
    )
}

// ============================================================================
// Helper: Convert to BoltType-compatible HashMap
// ============================================================================

type BoltMap = HashMap<String, BoltType>;

fn property_to_bolt(value: &PropertyValue) -> BoltType {
    match value {
        PropertyValue::String(s) => s.clone().into(),
        PropertyValue::Integer(i) => (*i).into(),
        PropertyValue::Float(f) => (*f).into(),
        PropertyValue::Boolean(b) => (*b).into(),
    }
}

fn properties_to_map(properties: &Properties) -> BoltMap {
    properties
        .iter()
        .map(|(key, value)| (key.clone(), property_to_bolt(value)))
        .collect()
}

fn node_row_to_map(row: &NodeRow) -> BoltMap {
    let mut m: BoltMap = HashMap::new();
    m.insert("identifier".to_string(), row.identifier.clone().into());
    m.insert("properties".to_string(), properties_to_map(&row.properties).into());
    m
}

fn relationship_row_to_map(row: &RelationshipRow) -> BoltMap {
    let mut m: BoltMap = HashMap::new();
    m.insert("from".to_string(), row.from.clone().into());
    m.insert("to".to_string(), row.to.clone().into());
    m.insert("properties".to_string(), properties_to_map(&row.properties).into());
    m
}

fn write_op_to_query(op: &WriteOp) -> Query {
    match op {
        WriteOp::WipeAll => query(WIPE_ALL),
        WriteOp::CreateConstraint { label, property } => query(&constraint_statement(label, property)),
        WriteOp::UpsertNodes { labels, rows } => query(&node_upsert_statement(labels))
            .param("rows", rows.iter().map(node_row_to_map).collect::<Vec<_>>()),
        WriteOp::UpsertRelationships { key, rows } => query(&relationship_upsert_statement(key))
            .param("rows", rows.iter().map(relationship_row_to_map).collect::<Vec<_>>()),
        WriteOp::RecordImport(meta) => query(RECORD_IMPORT)
            .param("import_id", meta.import_id.to_string())
            .param("source_files", meta.source_files.clone())
            .param("imported_at", meta.imported_at.to_rfc3339())
            .param("node_count", meta.node_count as i64)
            .param("relationship_count", meta.relationship_count as i64)
            .param("unresolved_count", meta.unresolved_count as i64),
    }
}

fn describe(op: &WriteOp) -> String {
    match op {
        WriteOp::WipeAll => "wipe".to_string(),
        WriteOp::CreateConstraint { label, .. } => format!("constraint on {}", label),
        WriteOp::UpsertNodes { labels, rows } => format!("{} {} nodes", rows.len(), labels.join(":")),
        WriteOp::UpsertRelationships { key, rows } => format!(
            "{} ({})-[{}]->({}) relationships",
            rows.len(),
            key.source_label,
            key.rel_type,
            key.target_label()
        ),
        WriteOp::RecordImport(_) => "import metadata".to_string(),
    }
}

// ============================================================================
// Neo4j Store
// ============================================================================

#[derive(Clone)]
pub struct Neo4jStore {
    graph: neo4rs::Graph,
}

impl Neo4jStore {
    pub fn new(graph: neo4rs::Graph) -> Self {
        Self { graph }
    }
}

pub struct Neo4jTxn {
    txn: neo4rs::Txn,
}

#[async_trait]
impl GraphStore for Neo4jStore {
    type Txn = Neo4jTxn;

    async fn begin(&self) -> Result<Neo4jTxn> {
        let txn = self.graph.start_txn().await.context("Failed to start transaction")?;
        Ok(Neo4jTxn { txn })
    }
}

#[async_trait]
impl StoreTxn for Neo4jTxn {
    async fn run(&mut self, op: WriteOp) -> Result<()> {
        let q = write_op_to_query(&op);
        self.txn
            .run(q)
            .await
            .with_context(|| format!("Failed to write {}", describe(&op)))
    }

    async fn commit(self) -> Result<()> {
        self.txn.commit().await.context("Failed to commit transaction")
    }

    async fn rollback(self) -> Result<()> {
        self.txn.rollback().await.context("Failed to rollback transaction")
    }
}

// ============================================================================
// Phased Loader
// ============================================================================

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoadSummary {
    pub nodes_written: usize,
    pub relationships_written: usize,
    pub constraints_created: usize,
}

/// Run `ops` inside one transaction; roll back on the first failure
async fn run_in_txn<S: GraphStore>(store: &S, ops: Vec<WriteOp>) -> Result<()> {
    let mut txn = store.begin().await?;

    for op in ops {
        if let Err(e) = txn.run(op).await {
            warn!("❌ Error during batch write, rolling back: {:#}", e);
            if let Err(rollback_err) = txn.rollback().await {
                warn!("Rollback failed: {:#}", rollback_err);
            }
            return Err(e);
        }
    }

    txn.commit().await
}

fn store_error(phase: &str, err: anyhow::Error, summary: &LoadSummary) -> ImportError {
    ImportError::store(
        phase,
        err.context(format!(
            "{} nodes and {} relationships were written before the failure",
            summary.nodes_written, summary.relationships_written
        )),
    )
}

async fn write_relationship_batches<S: GraphStore>(
    store: &S,
    batches: Vec<RelationshipBatch>,
    summary: &mut LoadSummary,
    written: &mut usize,
    total: usize,
    progress: &ProgressReporter,
) -> PipelineResult<()> {
    for batch in batches {
        let count = batch.rows.len();
        let op = WriteOp::UpsertRelationships {
            key: batch.key,
            rows: batch.rows,
        };
        run_in_txn(store, vec![op])
            .await
            .map_err(|e| store_error("relationship upsert", e, summary))?;
        summary.relationships_written += count;
        *written += 1;
        progress.report_scaled(75, 95, *written, total, "Writing relationships");
    }
    Ok(())
}

/// Write an import plan in five committed phases: wipe, constraints, nodes,
/// relationships (real targets first, then virtual targets), metadata.
///
/// Phases already committed are not undone when a later one fails.
pub async fn load_graph<S: GraphStore>(
    store: &S,
    plan: ImportPlan,
    metadata: ImportMetadata,
    progress: &ProgressReporter,
) -> PipelineResult<LoadSummary> {
    let mut summary = LoadSummary::default();
    info!(
        "💾 Starting batch import ({} nodes, {} relationships)",
        plan.node_count(),
        plan.relationship_count()
    );

    // 1. Wipe
    progress.report(40, "Clearing existing graph");
    run_in_txn(store, vec![WriteOp::WipeAll])
        .await
        .map_err(|e| store_error("wipe", e, &summary))?;
    info!("   Cleared existing graph");

    // 2. Constraints, each on its own so one conflict does not poison the rest
    progress.report(45, "Creating constraints");
    let mut constraints: Vec<(String, &str)> = plan
        .labels
        .iter()
        .map(|label| (label.clone(), PROP_IDENTIFIER))
        .collect();
    constraints.push((METADATA_LABEL.to_string(), METADATA_KEY));
    for (label, property) in constraints {
        let op = WriteOp::CreateConstraint {
            label: label.clone(),
            property: property.to_string(),
        };
        match run_in_txn(store, vec![op]).await {
            Ok(()) => summary.constraints_created += 1,
            Err(e) => warn!("⚠️  Constraint on {}.{} not created: {:#}", label, property, e),
        }
    }
    info!("   Ensured {} uniqueness constraints", summary.constraints_created);

    // 3. Nodes
    let node_batch_total = plan.node_batches.len();
    for (i, batch) in plan.node_batches.into_iter().enumerate() {
        let count = batch.rows.len();
        let op = WriteOp::UpsertNodes {
            labels: batch.labels,
            rows: batch.rows,
        };
        run_in_txn(store, vec![op])
            .await
            .map_err(|e| store_error("node upsert", e, &summary))?;
        summary.nodes_written += count;
        progress.report_scaled(50, 75, i + 1, node_batch_total, "Writing nodes");
    }
    info!("   Upserted {} nodes in {} batches", summary.nodes_written, node_batch_total);

    // 4. Relationships
    let rel_batch_total = plan.relationship_batches.len() + plan.virtual_relationship_batches.len();
    let mut rel_batches_written = 0;
    write_relationship_batches(
        store,
        plan.relationship_batches,
        &mut summary,
        &mut rel_batches_written,
        rel_batch_total,
        progress,
    )
    .await?;
    write_relationship_batches(
        store,
        plan.virtual_relationship_batches,
        &mut summary,
        &mut rel_batches_written,
        rel_batch_total,
        progress,
    )
    .await?;
    info!(
        "   Upserted {} relationships in {} batches",
        summary.relationships_written, rel_batch_total
    );

    // 5. Metadata
    progress.report(98, "Recording import metadata");
    let import_id = metadata.import_id;
    run_in_txn(store, vec![WriteOp::RecordImport(metadata)])
        .await
        .map_err(|e| store_error("metadata", e, &summary))?;
    info!("✅ Import {} committed", import_id);

    Ok(summary)
}
