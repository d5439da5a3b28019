//! Import Pipeline
//!
//! documents -> parse (parallel) -> merge -> extract -> resolve -> virtualize
//! -> plan -> load

use crate::document::{merge_documents, parse_documents, SourceDocument};
use crate::error::{ImportError, PipelineResult};
use crate::graph_builder::extract_graph;
use crate::import_batches::{plan_batches, DroppedRelationship, ImportPlan};
use crate::neo4j_storage::{load_graph, GraphStore, ImportMetadata};
use crate::progress::ProgressReporter;
use crate::reference_resolver::{resolve_references, synthesize_virtual_nodes, PathIndex, UnresolvedReference};
use serde::Serialize;
use tracing::{error, info};

/// Outcome of one import run, also used as the job result summary
#[derive(Debug, Clone, Serialize)]
pub struct ImportResult {
    pub success: bool,
    pub node_count: usize,
    pub relationship_count: usize,
    pub unresolved_references: Vec<UnresolvedReference>,
    pub dropped_relationships: Vec<DroppedRelationship>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ImportResult {
    pub fn failure(err: &ImportError) -> Self {
        Self {
            success: false,
            node_count: 0,
            relationship_count: 0,
            unresolved_references: Vec::new(),
            dropped_relationships: Vec::new(),
            error: Some(err.to_string()),
        }
    }
}

/// Everything computed before the store is touched
#[derive(Debug)]
pub struct PreparedImport {
    pub plan: ImportPlan,
    pub unresolved: Vec<UnresolvedReference>,
}

/// Pure half of the pipeline: parse, extract, resolve and plan.
pub fn prepare_import(
    documents: &[SourceDocument],
    batch_size: usize,
    progress: &ProgressReporter,
) -> PipelineResult<PreparedImport> {
    progress.report(0, "Parsing documents");
    let roots = parse_documents(documents)?;
    let root = merge_documents(roots)?;

    progress.report(15, "Extracting graph");
    let graph = extract_graph(&root);

    progress.report(30, "Resolving references");
    let index = PathIndex::build(&graph.nodes);
    let resolution = resolve_references(&index, graph.pending_references, &graph.relationships);
    let virtual_graph = synthesize_virtual_nodes(&index, &resolution.unresolved);

    let mut relationships = graph.relationships;
    relationships.extend(resolution.relationships);

    let plan = plan_batches(
        &graph.nodes,
        &virtual_graph.nodes,
        &relationships,
        &virtual_graph.relationships,
        batch_size,
    );

    Ok(PreparedImport {
        plan,
        unresolved: resolution.unresolved,
    })
}

async fn import_documents<S: GraphStore>(
    store: &S,
    documents: &[SourceDocument],
    batch_size: usize,
    progress: &ProgressReporter,
) -> PipelineResult<ImportResult> {
    let PreparedImport { plan, unresolved } = prepare_import(documents, batch_size, progress)?;

    let node_count = plan.node_count();
    let relationship_count = plan.relationship_count();
    let dropped = plan.dropped.clone();

    let mut metadata = ImportMetadata::new(documents.iter().map(|d| d.file_name.clone()).collect());
    metadata.node_count = node_count;
    metadata.relationship_count = relationship_count;
    metadata.unresolved_count = unresolved.len();

    let summary = load_graph(store, plan, metadata, progress).await?;
    progress.report(100, "Import complete");

    Ok(ImportResult {
        success: true,
        node_count: summary.nodes_written,
        relationship_count: summary.relationships_written,
        unresolved_references: unresolved,
        dropped_relationships: dropped,
        error: None,
    })
}

/// Run a full import. Never fails: errors come back as `success = false`.
pub async fn run_import<S: GraphStore>(
    store: &S,
    documents: &[SourceDocument],
    batch_size: usize,
    progress: &ProgressReporter,
) -> ImportResult {
    info!("📚 Importing {} document(s)", documents.len());
    match import_documents(store, documents, batch_size, progress).await {
        Ok(result) => {
            info!(
                "✅ Imported {} nodes, {} relationships ({} unresolved references virtualized)",
                result.node_count,
                result.relationship_count,
                result.unresolved_references.len()
            );
            result
        }
        Err(e) => {
            error!("❌ Import failed: {}", e);
            ImportResult::failure(&e)
        }
    }
}
