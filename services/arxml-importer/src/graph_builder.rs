//! ARXML Graph Builder
//!
//! Walks a merged ARXML tree and builds an in-memory graph: one node per
//! identifiable element, `CONTAINS` edges between nested nodes, and pending
//! cross-references that are resolved once the whole tree has been seen.

use crate::document::XmlElement;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::{debug, info};

pub const SHORT_NAME_TAG: &str = "SHORT-NAME";
pub const UUID_ATTRIBUTE: &str = "UUID";
pub const DEST_ATTRIBUTE: &str = "DEST";

pub const CONTAINS: &str = "CONTAINS";

/// Property keys owned by the extractor
pub const PROP_IDENTIFIER: &str = "identifier";
pub const PROP_SHORT_NAME: &str = "short_name";
pub const PROP_PATH: &str = "path";
pub const PROP_TAG: &str = "tag";

const RESERVED_PROPERTIES: [&str; 4] = [PROP_IDENTIFIER, PROP_SHORT_NAME, PROP_PATH, PROP_TAG];
const RESERVED_PREFIX: &str = "attr_";

// ============================================================================
// Property Model
// ============================================================================

/// Scalar property value stored on nodes and relationships
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
}

impl PropertyValue {
    /// Type raw XML text conservatively.
    ///
    /// Integers must round-trip to the identical text, so values such as
    /// `007` or `+5` stay strings.
    pub fn from_text(text: &str) -> Self {
        match text {
            "true" => return PropertyValue::Boolean(true),
            "false" => return PropertyValue::Boolean(false),
            _ => {}
        }

        if let Ok(value) = text.parse::<i64>() {
            if value.to_string() == text {
                return PropertyValue::Integer(value);
            }
        }

        let looks_decimal = text.contains('.')
            && text
                .chars()
                .all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | 'e' | 'E' | '+'));
        if looks_decimal {
            if let Ok(value) = text.parse::<f64>() {
                if value.is_finite() {
                    return PropertyValue::Float(value);
                }
            }
        }

        PropertyValue::String(text.to_string())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::String(value)
    }
}

pub type Properties = BTreeMap<String, PropertyValue>;

// ============================================================================
// Node and Relationship Types
// ============================================================================

/// A materialized ARXML element
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedNode {
    /// Taken from the element's UUID, never generated
    pub identifier: String,
    /// Primary label derived from the tag of the first occurrence
    pub label: String,
    /// Labels contributed by later duplicates with a different tag
    pub extra_labels: BTreeSet<String>,
    pub properties: Properties,
}

impl ExtractedNode {
    /// Semantic path used for reference lookup
    pub fn path(&self) -> Option<&str> {
        self.properties.get(PROP_PATH).and_then(PropertyValue::as_str)
    }

    /// Sorted label-set used for batch grouping
    pub fn label_set(&self) -> Vec<String> {
        let mut labels: BTreeSet<String> = self.extra_labels.clone();
        labels.insert(self.label.clone());
        labels.into_iter().collect()
    }
}

/// A directed, typed edge between two identifiers
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedRelationship {
    pub rel_type: String,
    pub from: String,
    pub to: String,
    pub properties: Properties,
}

impl ExtractedRelationship {
    pub fn contains(from: &str, to: &str) -> Self {
        Self {
            rel_type: CONTAINS.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            properties: Properties::new(),
        }
    }
}

/// A reference captured during the walk, before the path index exists
#[derive(Debug, Clone, PartialEq)]
pub struct PendingReference {
    pub from: String,
    pub target_path: String,
    pub rel_type: String,
    pub properties: Properties,
}

/// Output of a single extraction pass
#[derive(Debug, Default)]
pub struct ExtractedGraph {
    pub nodes: Vec<ExtractedNode>,
    pub relationships: Vec<ExtractedRelationship>,
    pub pending_references: Vec<PendingReference>,
}

// ============================================================================
// Naming Helpers
// ============================================================================

/// `APPLICATION-SW-COMPONENT-TYPE` -> `ApplicationSwComponentType`
pub fn label_for_tag(tag: &str) -> String {
    tag.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(|part| {
            let lower = part.to_ascii_lowercase();
            let mut chars = lower.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

/// `TYPE-TREF` -> `TYPE_TREF`
pub fn relationship_type_for_tag(tag: &str) -> String {
    tag.to_ascii_uppercase().replace(['-', '.', ':'], "_")
}

/// `INIT-VALUE` -> `init_value`
pub fn normalize_key(key: &str) -> String {
    key.to_ascii_lowercase().replace(['-', '.', ':'], "_")
}

pub fn is_reference_tag(tag: &str) -> bool {
    tag.ends_with("-REF") || tag.ends_with("-TREF")
}

fn join_path(segments: &[String]) -> String {
    format!("/{}", segments.join("/"))
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

// ============================================================================
// Extraction
// ============================================================================

/// Accumulators owned by one extraction call
#[derive(Default)]
struct Extraction {
    nodes: Vec<ExtractedNode>,
    node_index: HashMap<String, usize>,
    relationships: Vec<ExtractedRelationship>,
    contains_keys: HashSet<String>,
    pending_references: Vec<PendingReference>,
    duplicate_count: usize,
}

impl Extraction {
    fn visit(&mut self, element: &XmlElement, parent: Option<&str>, path: &mut Vec<String>) {
        let short_name = non_empty(element.child_text(SHORT_NAME_TAG));
        if let Some(name) = short_name {
            path.push(name.to_string());
        }

        let current = match (short_name, non_empty(element.attribute(UUID_ATTRIBUTE))) {
            (Some(name), Some(identifier)) => {
                self.add_node(element, identifier, name, path);
                if let Some(parent_id) = parent {
                    self.add_contains(parent_id, identifier);
                }
                Some(identifier.to_string())
            }
            _ => None,
        };
        let owner = current.as_deref().or(parent);

        for child in &element.children {
            if child.tag == SHORT_NAME_TAG {
                continue;
            }
            if is_reference_tag(&child.tag) {
                self.add_pending_reference(owner, child);
                continue;
            }
            if current.is_some() && child.is_scalar() {
                // Flattened onto the node by add_node
                continue;
            }
            self.visit(child, owner, path);
        }

        if short_name.is_some() {
            path.pop();
        }
    }

    fn add_node(&mut self, element: &XmlElement, identifier: &str, short_name: &str, path: &[String]) {
        let label = label_for_tag(&element.tag);
        let properties = node_properties(element, identifier, short_name, path);

        if let Some(&position) = self.node_index.get(identifier) {
            // First occurrence wins, later ones only fill gaps
            let existing = &mut self.nodes[position];
            for (key, value) in properties {
                existing.properties.entry(key).or_insert(value);
            }
            if existing.label != label {
                existing.extra_labels.insert(label);
            }
            self.duplicate_count += 1;
            debug!("Merged duplicate identifier {} at {}", identifier, join_path(path));
            return;
        }

        self.node_index.insert(identifier.to_string(), self.nodes.len());
        self.nodes.push(ExtractedNode {
            identifier: identifier.to_string(),
            label,
            extra_labels: BTreeSet::new(),
            properties,
        });
    }

    fn add_contains(&mut self, parent: &str, child: &str) {
        if parent == child {
            return;
        }
        let key = format!("{}→{}", parent, child);
        if self.contains_keys.insert(key) {
            self.relationships.push(ExtractedRelationship::contains(parent, child));
        }
    }

    fn add_pending_reference(&mut self, owner: Option<&str>, reference: &XmlElement) {
        let Some(target_path) = non_empty(reference.text.as_deref()) else {
            debug!("Skipping empty <{}> reference", reference.tag);
            return;
        };
        if target_path.split('/').all(|segment| segment.trim().is_empty()) {
            debug!("Skipping <{}> with root-only path {}", reference.tag, target_path);
            return;
        }
        let Some(from) = owner else {
            debug!("Skipping <{}> {} without a source node", reference.tag, target_path);
            return;
        };

        let mut properties = Properties::new();
        if let Some(dest) = non_empty(reference.attribute(DEST_ATTRIBUTE)) {
            properties.insert("dest".to_string(), dest.into());
        }

        self.pending_references.push(PendingReference {
            from: from.to_string(),
            target_path: target_path.to_string(),
            rel_type: relationship_type_for_tag(&reference.tag),
            properties,
        });
    }
}

/// Insert a captured value, moving keys that collide with reserved names aside
fn insert_captured(properties: &mut Properties, key: &str, value: PropertyValue) {
    let mut key = normalize_key(key);
    if RESERVED_PROPERTIES.contains(&key.as_str()) {
        key = format!("{}{}", RESERVED_PREFIX, key);
    }
    properties.entry(key).or_insert(value);
}

fn node_properties(element: &XmlElement, identifier: &str, short_name: &str, path: &[String]) -> Properties {
    let mut properties = Properties::new();

    for (name, value) in &element.attributes {
        if name == UUID_ATTRIBUTE {
            continue;
        }
        insert_captured(&mut properties, name, PropertyValue::from_text(value));
    }

    for child in &element.children {
        if child.tag == SHORT_NAME_TAG || is_reference_tag(&child.tag) || !child.is_scalar() {
            continue;
        }
        if let Some(text) = non_empty(child.text.as_deref()) {
            insert_captured(&mut properties, &child.tag, PropertyValue::from_text(text));
        }
        for (name, value) in &child.attributes {
            let key = format!("{}_{}", child.tag, name);
            insert_captured(&mut properties, &key, PropertyValue::from_text(value));
        }
    }

    properties.insert(PROP_IDENTIFIER.to_string(), identifier.into());
    properties.insert(PROP_SHORT_NAME.to_string(), short_name.into());
    properties.insert(PROP_PATH.to_string(), join_path(path).into());
    properties.insert(PROP_TAG.to_string(), element.tag.as_str().into());
    properties
}

/// Extract nodes, containment edges and pending references from a merged tree
pub fn extract_graph(root: &XmlElement) -> ExtractedGraph {
    let mut extraction = Extraction::default();
    let mut path = Vec::new();
    extraction.visit(root, None, &mut path);

    info!(
        "🔗 Extracted {} nodes, {} CONTAINS edges, {} pending references ({} duplicate identifiers merged)",
        extraction.nodes.len(),
        extraction.relationships.len(),
        extraction.pending_references.len(),
        extraction.duplicate_count
    );

    ExtractedGraph {
        nodes: extraction.nodes,
        relationships: extraction.relationships,
        pending_references: extraction.pending_references,
    }
}

// ============================================================================
// Tests
// ============================================================================
