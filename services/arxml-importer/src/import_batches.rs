//! Batch Planning
//!
//! Regroups the in-memory graph into write batches so every UNWIND query can
//! use a narrowly labeled MATCH/MERGE pattern instead of a wildcard match.

use crate::graph_builder::{ExtractedNode, ExtractedRelationship, Properties};
use crate::reference_resolver::{VirtualNode, VIRTUAL_LABEL};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{info, warn};

pub const DEFAULT_BATCH_SIZE: usize = 2000;

#[derive(Debug, Clone, PartialEq)]
pub struct NodeRow {
    pub identifier: String,
    pub properties: Properties,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelationshipRow {
    pub from: String,
    pub to: String,
    pub properties: Properties,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TargetLabel {
    Real(String),
    Virtual,
}

/// `(type, source label, target label)`; virtual targets share one label
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RelationshipGroupKey {
    pub rel_type: String,
    pub source_label: String,
    pub target: TargetLabel,
}

impl RelationshipGroupKey {
    pub fn target_label(&self) -> &str {
        match &self.target {
            TargetLabel::Real(label) => label,
            TargetLabel::Virtual => VIRTUAL_LABEL,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NodeBatch {
    /// Sorted label-set shared by every row
    pub labels: Vec<String>,
    pub rows: Vec<NodeRow>,
}

#[derive(Debug, Clone)]
pub struct RelationshipBatch {
    pub key: RelationshipGroupKey,
    pub rows: Vec<RelationshipRow>,
}

/// A relationship left out of the write plan because an endpoint is unknown
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DroppedRelationship {
    pub relationship_type: String,
    pub from: String,
    pub to: String,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct ImportPlan {
    /// Every label that needs a uniqueness constraint
    pub labels: BTreeSet<String>,
    pub node_batches: Vec<NodeBatch>,
    pub relationship_batches: Vec<RelationshipBatch>,
    pub virtual_relationship_batches: Vec<RelationshipBatch>,
    pub dropped: Vec<DroppedRelationship>,
}

impl ImportPlan {
    pub fn node_count(&self) -> usize {
        self.node_batches.iter().map(|b| b.rows.len()).sum()
    }

    pub fn relationship_count(&self) -> usize {
        self.relationship_batches
            .iter()
            .chain(self.virtual_relationship_batches.iter())
            .map(|b| b.rows.len())
            .sum()
    }
}

fn chunk_groups<K: Clone, T: Clone>(groups: BTreeMap<K, Vec<T>>, batch_size: usize) -> Vec<(K, Vec<T>)> {
    let mut batches = Vec::new();
    for (key, rows) in groups {
        for chunk in rows.chunks(batch_size) {
            batches.push((key.clone(), chunk.to_vec()));
        }
    }
    batches
}

fn dropped(rel: &ExtractedRelationship, reason: String) -> DroppedRelationship {
    DroppedRelationship {
        relationship_type: rel.rel_type.clone(),
        from: rel.from.clone(),
        to: rel.to.clone(),
        reason,
    }
}

/// Group nodes by label-set and relationships by endpoint labels, then split
/// every group into batches of at most `batch_size` rows.
///
/// `virtual_relationships` must all target virtual nodes; they are planned in
/// their own group list so they can be written after the real ones.
pub fn plan_batches(
    nodes: &[ExtractedNode],
    virtual_nodes: &[VirtualNode],
    relationships: &[ExtractedRelationship],
    virtual_relationships: &[ExtractedRelationship],
    batch_size: usize,
) -> ImportPlan {
    let batch_size = batch_size.max(1);
    let mut plan = ImportPlan::default();

    // Endpoint label lookup, by identifier
    let mut label_index: HashMap<&str, &str> = HashMap::with_capacity(nodes.len() + virtual_nodes.len());
    for node in nodes {
        label_index.insert(node.identifier.as_str(), node.label.as_str());
    }
    for node in virtual_nodes {
        label_index.entry(node.path.as_str()).or_insert(VIRTUAL_LABEL);
    }

    let mut node_groups: BTreeMap<Vec<String>, Vec<NodeRow>> = BTreeMap::new();
    for node in nodes {
        let labels = node.label_set();
        plan.labels.extend(labels.iter().cloned());
        node_groups.entry(labels).or_default().push(NodeRow {
            identifier: node.identifier.clone(),
            properties: node.properties.clone(),
        });
    }
    if !virtual_nodes.is_empty() {
        plan.labels.insert(VIRTUAL_LABEL.to_string());
        let rows = node_groups.entry(vec![VIRTUAL_LABEL.to_string()]).or_default();
        for node in virtual_nodes {
            rows.push(NodeRow {
                identifier: node.path.clone(),
                properties: node.properties(),
            });
        }
    }
    plan.node_batches = chunk_groups(node_groups, batch_size)
        .into_iter()
        .map(|(labels, rows)| NodeBatch { labels, rows })
        .collect();

    let mut real_groups: BTreeMap<RelationshipGroupKey, Vec<RelationshipRow>> = BTreeMap::new();
    for rel in relationships {
        let (Some(source), Some(target)) = (label_index.get(rel.from.as_str()), label_index.get(rel.to.as_str())) else {
            plan.dropped.push(dropped(rel, "endpoint label unknown".to_string()));
            continue;
        };
        let key = RelationshipGroupKey {
            rel_type: rel.rel_type.clone(),
            source_label: source.to_string(),
            target: TargetLabel::Real(target.to_string()),
        };
        real_groups.entry(key).or_default().push(RelationshipRow {
            from: rel.from.clone(),
            to: rel.to.clone(),
            properties: rel.properties.clone(),
        });
    }

    let mut virtual_groups: BTreeMap<RelationshipGroupKey, Vec<RelationshipRow>> = BTreeMap::new();
    for rel in virtual_relationships {
        let Some(source) = label_index.get(rel.from.as_str()) else {
            plan.dropped.push(dropped(rel, "source label unknown".to_string()));
            continue;
        };
        if label_index.get(rel.to.as_str()) != Some(&VIRTUAL_LABEL) {
            plan.dropped.push(dropped(rel, "virtual target missing".to_string()));
            continue;
        }
        let key = RelationshipGroupKey {
            rel_type: rel.rel_type.clone(),
            source_label: source.to_string(),
            target: TargetLabel::Virtual,
        };
        virtual_groups.entry(key).or_default().push(RelationshipRow {
            from: rel.from.clone(),
            to: rel.to.clone(),
            properties: rel.properties.clone(),
        });
    }

    plan.relationship_batches = chunk_groups(real_groups, batch_size)
        .into_iter()
        .map(|(key, rows)| RelationshipBatch { key, rows })
        .collect();
    plan.virtual_relationship_batches = chunk_groups(virtual_groups, batch_size)
        .into_iter()
        .map(|(key, rows)| RelationshipBatch { key, rows })
        .collect();

    for entry in &plan.dropped {
        warn!(
            "⚠️  Dropping {} {} -> {}: {}",
            entry.relationship_type, entry.from, entry.to, entry.reason
        );
    }
    info!(
        "📦 Planned {} node batches, {} relationship batches, {} virtual relationship batches (batch_size={})",
        plan.node_batches.len(),
        plan.relationship_batches.len(),
        plan.virtual_relationship_batches.len(),
        batch_size
    );

    plan
}
