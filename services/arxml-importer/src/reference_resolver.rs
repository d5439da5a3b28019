//! Reference Resolution
//!
//! Second pass over an extracted graph. Pending references are looked up in
//! a path index built from every extracted node; whatever stays unresolved is
//! turned into a chain of virtual placeholder nodes so no reference is lost.

use crate::graph_builder::{
    ExtractedNode, ExtractedRelationship, PendingReference, Properties, PropertyValue, CONTAINS,
    PROP_IDENTIFIER, PROP_PATH, PROP_SHORT_NAME,
};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

pub const VIRTUAL_LABEL: &str = "VirtualNode";
pub const UNRESOLVED_REASON: &str = "target path not found";

/// A reference whose target path matched no extracted node
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnresolvedReference {
    pub source_identifier: String,
    pub target_path: String,
    pub relationship_type: String,
    pub reason: String,
    #[serde(skip)]
    pub properties: Properties,
}

/// Placeholder for one segment of an unresolved path
#[derive(Debug, Clone, PartialEq)]
pub struct VirtualNode {
    /// Full sub-path; doubles as the identifier
    pub path: String,
    pub short_name: String,
}

impl VirtualNode {
    pub fn properties(&self) -> Properties {
        let mut properties = Properties::new();
        properties.insert(PROP_IDENTIFIER.to_string(), self.path.as_str().into());
        properties.insert(PROP_SHORT_NAME.to_string(), self.short_name.as_str().into());
        properties.insert(PROP_PATH.to_string(), self.path.as_str().into());
        properties.insert("virtual".to_string(), PropertyValue::Boolean(true));
        properties
    }
}

/// `a//b/` -> `/a/b`
pub fn normalize_path(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').map(str::trim).filter(|s| !s.is_empty()).collect();
    format!("/{}", segments.join("/"))
}

// ============================================================================
// Path Index
// ============================================================================

/// Semantic path lookup over the real nodes of one import
#[derive(Debug, Default)]
pub struct PathIndex {
    by_path: HashMap<String, String>,
    /// Proper prefixes of node paths (packages and other identifier-less ancestors)
    prefixes: HashSet<String>,
}

impl PathIndex {
    /// Index every node path. When two nodes share a path, the later one wins.
    pub fn build(nodes: &[ExtractedNode]) -> Self {
        let mut index = PathIndex::default();

        for node in nodes {
            let Some(path) = node.path() else { continue };

            if let Some(previous) = index.by_path.insert(path.to_string(), node.identifier.clone()) {
                if previous != node.identifier {
                    warn!(
                        "⚠️  Path {} shared by {} and {}; keeping {}",
                        path, previous, node.identifier, node.identifier
                    );
                }
            }

            let mut end = path.len();
            while let Some(pos) = path[..end].rfind('/') {
                if pos == 0 {
                    break;
                }
                if !index.prefixes.insert(path[..pos].to_string()) {
                    break;
                }
                end = pos;
            }
        }

        index
    }

    pub fn lookup(&self, path: &str) -> Option<&str> {
        self.by_path.get(path).map(String::as_str)
    }

    pub fn is_structural_prefix(&self, path: &str) -> bool {
        self.prefixes.contains(path)
    }

    pub fn len(&self) -> usize {
        self.by_path.len()
    }
}

// ============================================================================
// Resolution
// ============================================================================

#[derive(Debug, Default)]
pub struct Resolution {
    pub relationships: Vec<ExtractedRelationship>,
    pub unresolved: Vec<UnresolvedReference>,
}

type EdgeKey = (String, String, String);

fn edge_key(from: &str, to: &str, rel_type: &str) -> EdgeKey {
    (from.to_string(), to.to_string(), rel_type.to_string())
}

/// Resolve pending references against the index.
///
/// Resolved edges are deduplicated by `(from, to, type)` against `existing`
/// and against each other.
pub fn resolve_references(
    index: &PathIndex,
    pending: Vec<PendingReference>,
    existing: &[ExtractedRelationship],
) -> Resolution {
    let mut seen: HashSet<EdgeKey> = existing
        .iter()
        .map(|r| edge_key(&r.from, &r.to, &r.rel_type))
        .collect();
    let mut resolution = Resolution::default();

    for reference in pending {
        let target_path = normalize_path(&reference.target_path);
        if target_path == "/" {
            debug!("Skipping {} from {} with an empty target path", reference.rel_type, reference.from);
            continue;
        }

        match index.lookup(&target_path) {
            Some(target) => {
                if seen.insert(edge_key(&reference.from, target, &reference.rel_type)) {
                    resolution.relationships.push(ExtractedRelationship {
                        rel_type: reference.rel_type,
                        from: reference.from,
                        to: target.to_string(),
                        properties: reference.properties,
                    });
                }
            }
            None => {
                debug!("Unresolved {} {} -> {}", reference.rel_type, reference.from, target_path);
                resolution.unresolved.push(UnresolvedReference {
                    source_identifier: reference.from,
                    target_path,
                    relationship_type: reference.rel_type,
                    reason: UNRESOLVED_REASON.to_string(),
                    properties: reference.properties,
                });
            }
        }
    }

    info!(
        "📚 Resolved {} references, {} unresolved (index of {} paths)",
        resolution.relationships.len(),
        resolution.unresolved.len(),
        index.len()
    );
    resolution
}

// ============================================================================
// Virtual Node Synthesis
// ============================================================================

/// Virtual nodes and the edges that attach them
#[derive(Debug, Default)]
pub struct VirtualGraph {
    pub nodes: Vec<VirtualNode>,
    /// Every edge here targets a virtual node
    pub relationships: Vec<ExtractedRelationship>,
}

enum ChainLink {
    Real(String),
    Virtual(String),
}

impl ChainLink {
    fn identifier(&self) -> &str {
        match self {
            ChainLink::Real(id) | ChainLink::Virtual(id) => id,
        }
    }
}

/// Memo table for one run: shared path prefixes map to one shared chain
#[derive(Default)]
struct VirtualNodeSynthesizer {
    graph: VirtualGraph,
    memo: HashMap<String, usize>,
    edges: HashSet<EdgeKey>,
}

impl VirtualNodeSynthesizer {
    fn ensure_node(&mut self, path: &str, segment: &str) {
        if self.memo.contains_key(path) {
            return;
        }
        self.memo.insert(path.to_string(), self.graph.nodes.len());
        self.graph.nodes.push(VirtualNode {
            path: path.to_string(),
            short_name: segment.to_string(),
        });
    }

    fn add_edge(&mut self, from: &str, to: &str, rel_type: &str, properties: Properties) {
        if self.edges.insert(edge_key(from, to, rel_type)) {
            self.graph.relationships.push(ExtractedRelationship {
                rel_type: rel_type.to_string(),
                from: from.to_string(),
                to: to.to_string(),
                properties,
            });
        }
    }

    fn virtualize(&mut self, index: &PathIndex, reference: &UnresolvedReference) {
        let segments: Vec<&str> = reference
            .target_path
            .split('/')
            .filter(|s| !s.is_empty())
            .collect();
        if segments.is_empty() {
            warn!(
                "⚠️  Cannot virtualize empty path referenced by {}",
                reference.source_identifier
            );
            return;
        }

        let mut previous: Option<ChainLink> = None;
        let mut sub_path = String::new();

        for (i, segment) in segments.iter().enumerate() {
            sub_path.push('/');
            sub_path.push_str(segment);
            let is_target = i == segments.len() - 1;

            if !is_target {
                if let Some(real) = index.lookup(&sub_path) {
                    previous = Some(ChainLink::Real(real.to_string()));
                    continue;
                }
                if self.memo.contains_key(&sub_path) {
                    previous = Some(ChainLink::Virtual(sub_path.clone()));
                    continue;
                }
                if index.is_structural_prefix(&sub_path) {
                    continue;
                }
            }

            self.ensure_node(&sub_path, segment);
            if let Some(link) = &previous {
                let from = link.identifier().to_string();
                self.add_edge(&from, &sub_path, CONTAINS, Properties::new());
            }
            previous = Some(ChainLink::Virtual(sub_path.clone()));
        }

        self.add_edge(
            &reference.source_identifier,
            &sub_path,
            &reference.relationship_type,
            reference.properties.clone(),
        );
    }
}

/// Materialize placeholder chains for references that stayed unresolved
pub fn synthesize_virtual_nodes(index: &PathIndex, unresolved: &[UnresolvedReference]) -> VirtualGraph {
    let mut synthesizer = VirtualNodeSynthesizer::default();
    for reference in unresolved {
        synthesizer.virtualize(index, reference);
    }

    info!(
        "👻 Synthesized {} virtual nodes and {} virtual edges",
        synthesizer.graph.nodes.len(),
        synthesizer.graph.relationships.len()
    );
    synthesizer.graph
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph_builder::extract_graph;
    use crate::graph_builder::tests::{
        autosar, component_with_missing_reference, identifiable, package, reference,
    };

    fn node(identifier: &str, path: &str) -> ExtractedNode {
        let mut properties = Properties::new();
        properties.insert(PROP_PATH.to_string(), path.into());
        ExtractedNode {
            identifier: identifier.to_string(),
            label: "Thing".to_string(),
            extra_labels: Default::default(),
            properties,
        }
    }

    fn pending(from: &str, target: &str) -> PendingReference {
        PendingReference {
            from: from.to_string(),
            target_path: target.to_string(),
            rel_type: "TYPE_TREF".to_string(),
            properties: Properties::new(),
        }
    }

    #[test]
    fn test_forward_reference_round_trip() {
        // The reference precedes its target in document order
        let user = identifiable("SENDER-RECEIVER-PORT", "Port", "A1")
            .with_child(reference("TYPE-TREF", "SENDER-RECEIVER-INTERFACE", "/Ifs/Speed"));
        let target = identifiable("SENDER-RECEIVER-INTERFACE", "Speed", "B1");
        let root = autosar(vec![package("Swc", vec![user]), package("Ifs", vec![target])]);

        let graph = extract_graph(&root);
        let index = PathIndex::build(&graph.nodes);
        let resolution = resolve_references(&index, graph.pending_references, &graph.relationships);

        assert!(resolution.unresolved.is_empty());
        assert_eq!(resolution.relationships.len(), 1);
        let edge = &resolution.relationships[0];
        assert_eq!((edge.from.as_str(), edge.to.as_str()), ("A1", "B1"));
        assert_eq!(edge.rel_type, "TYPE_TREF");
    }

    #[test]
    fn test_duplicate_references_resolve_once() {
        let nodes = vec![node("A", "/P/A"), node("B", "/P/B")];
        let index = PathIndex::build(&nodes);

        let resolution = resolve_references(
            &index,
            vec![pending("A", "/P/B"), pending("A", "/P/B/"), pending("A", "/P/B")],
            &[],
        );

        assert_eq!(resolution.relationships.len(), 1);
    }

    #[test]
    fn test_shared_path_keeps_later_node() {
        let nodes = vec![node("FIRST", "/P/Same"), node("SECOND", "/P/Same")];
        let index = PathIndex::build(&nodes);

        assert_eq!(index.len(), 1);
        assert_eq!(index.lookup("/P/Same"), Some("SECOND"));
    }

    #[test]
    fn test_path_index_tracks_structural_prefixes() {
        let index = PathIndex::build(&[node("A", "/Pkg/Sub/A")]);

        assert!(index.is_structural_prefix("/Pkg"));
        assert!(index.is_structural_prefix("/Pkg/Sub"));
        assert!(!index.is_structural_prefix("/Pkg/Sub/A"));
        assert!(!index.is_structural_prefix("/Other"));
    }

    #[test]
    fn test_example_scenario_virtual_chain() {
        let graph = extract_graph(&component_with_missing_reference());
        let index = PathIndex::build(&graph.nodes);
        let resolution = resolve_references(&index, graph.pending_references, &graph.relationships);

        assert_eq!(resolution.unresolved.len(), 1);
        assert_eq!(resolution.unresolved[0].reason, UNRESOLVED_REASON);

        let virtual_graph = synthesize_virtual_nodes(&index, &resolution.unresolved);
        let paths: Vec<&str> = virtual_graph.nodes.iter().map(|n| n.path.as_str()).collect();
        assert_eq!(paths, vec!["/Pkg/Missing", "/Pkg/Missing/Thing"]);

        assert_eq!(virtual_graph.relationships.len(), 2);
        let contains = &virtual_graph.relationships[0];
        assert_eq!(contains.rel_type, CONTAINS);
        assert_eq!((contains.from.as_str(), contains.to.as_str()), ("/Pkg/Missing", "/Pkg/Missing/Thing"));
        let edge = &virtual_graph.relationships[1];
        assert_eq!(edge.rel_type, "BEHAVIOR_TREF");
        assert_eq!((edge.from.as_str(), edge.to.as_str()), ("U1", "/Pkg/Missing/Thing"));
    }

    #[test]
    fn test_shared_prefixes_share_one_chain() {
        let index = PathIndex::build(&[node("A", "/Pkg/A")]);
        let resolution = resolve_references(
            &index,
            vec![pending("A", "/Ext/Lib/X"), pending("A", "/Ext/Lib/Y"), pending("A", "/Ext/Lib/X")],
            &[],
        );
        assert_eq!(resolution.unresolved.len(), 3);

        let virtual_graph = synthesize_virtual_nodes(&index, &resolution.unresolved);

        let paths: Vec<&str> = virtual_graph.nodes.iter().map(|n| n.path.as_str()).collect();
        assert_eq!(paths, vec!["/Ext", "/Ext/Lib", "/Ext/Lib/X", "/Ext/Lib/Y"]);
        let contains = virtual_graph.relationships.iter().filter(|r| r.rel_type == CONTAINS).count();
        assert_eq!(contains, 3);
        let references = virtual_graph.relationships.iter().filter(|r| r.rel_type == "TYPE_TREF").count();
        assert_eq!(references, 2);
    }

    #[test]
    fn test_virtual_chain_anchors_on_real_ancestor() {
        let index = PathIndex::build(&[node("C", "/Pkg/Comp")]);
        let resolution = resolve_references(&index, vec![pending("C", "/Pkg/Comp/Ghost")], &[]);

        let virtual_graph = synthesize_virtual_nodes(&index, &resolution.unresolved);

        assert_eq!(virtual_graph.nodes.len(), 1);
        assert_eq!(virtual_graph.nodes[0].short_name, "Ghost");
        let anchor = &virtual_graph.relationships[0];
        assert_eq!(anchor.rel_type, CONTAINS);
        assert_eq!((anchor.from.as_str(), anchor.to.as_str()), ("C", "/Pkg/Comp/Ghost"));
    }

    #[test]
    fn test_every_unresolved_target_is_virtualized() {
        // Target is itself a structural prefix without an identifier
        let index = PathIndex::build(&[node("A", "/Pkg/Sub/A")]);
        let unresolved = resolve_references(
            &index,
            vec![pending("A", "/Pkg/Sub"), pending("A", "/Lone")],
            &[],
        )
        .unresolved;

        let virtual_graph = synthesize_virtual_nodes(&index, &unresolved);

        for reference in &unresolved {
            assert!(virtual_graph.nodes.iter().any(|n| n.path == reference.target_path));
            assert!(virtual_graph.relationships.iter().any(|r| {
                r.from == reference.source_identifier
                    && r.to == reference.target_path
                    && r.rel_type == reference.relationship_type
            }));
        }
    }

    #[test]
    fn test_root_only_target_is_skipped() {
        let index = PathIndex::build(&[node("A", "/Pkg/A")]);
        let resolution = resolve_references(&index, vec![pending("A", "/"), pending("A", "//")], &[]);

        assert!(resolution.relationships.is_empty());
        assert!(resolution.unresolved.is_empty());
        let virtual_graph = synthesize_virtual_nodes(&index, &resolution.unresolved);
        assert!(virtual_graph.nodes.is_empty());
    }

    #[test]
    fn test_virtual_prefix_is_reused_over_structural_prefix() {
        let index = PathIndex::build(&[node("A", "/Pkg/Sub/A")]);
        let unresolved = resolve_references(
            &index,
            vec![pending("A", "/Pkg/Sub"), pending("A", "/Pkg/Sub/Ghost")],
            &[],
        )
        .unresolved;

        let virtual_graph = synthesize_virtual_nodes(&index, &unresolved);

        let paths: Vec<&str> = virtual_graph.nodes.iter().map(|n| n.path.as_str()).collect();
        assert_eq!(paths, vec!["/Pkg/Sub", "/Pkg/Sub/Ghost"]);
        assert!(virtual_graph
            .relationships
            .iter()
            .any(|r| r.rel_type == CONTAINS && r.from == "/Pkg/Sub" && r.to == "/Pkg/Sub/Ghost"));
    }

    #[test]
    fn test_virtual_node_properties_are_flagged() {
        let props = VirtualNode {
            path: "/Ext/X".to_string(),
            short_name: "X".to_string(),
        }
        .properties();

        assert_eq!(props.get("virtual"), Some(&PropertyValue::Boolean(true)));
        assert_eq!(props.get(PROP_IDENTIFIER), Some(&PropertyValue::from("/Ext/X")));
    }
}
