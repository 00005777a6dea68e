//! Dependency graph (DAG) construction and traversal
//!
//! Builds forward and reverse dependency graphs from the static `ref()` and
//! `source()` calls in model templates, including the calls reached through
//! the macros a model invokes.

use rivulet_core::{model_id, source_id, Diagnostic, DiagnosticCode, Location, Macro, Model, NodeId, Source};
use rivulet_sql::{LocatedReference, ReferenceExtractor, StaticReference};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;

/// Kind of graph node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Model,
    Source,
}

/// Graph construction or query error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("Model '{consumer}' references {target}, which does not exist")]
    UnknownReference {
        consumer: String,
        target: String,
        path: PathBuf,
        line: usize,
    },

    #[error("Cyclic dependency: {}", .cycle.join(" -> "))]
    CyclicDependency {
        /// Model names along the cycle; first and last are the same
        cycle: Vec<String>,
    },

    #[error("Selector '{0}' does not match any model")]
    UnknownSelector(String),
}

impl GraphError {
    /// Convert to a diagnostic
    pub fn to_diagnostic(&self) -> Diagnostic {
        match self {
            Self::UnknownReference { consumer, path, line, .. } => {
                Diagnostic::error(DiagnosticCode::UnknownReference, self.to_string())
                    .with_node(consumer.clone())
                    .with_location(Location::with_line(path.display().to_string(), *line))
            }
            Self::CyclicDependency { cycle } => {
                let mut diag = Diagnostic::error(DiagnosticCode::CyclicDependency, self.to_string());
                if let Some(first) = cycle.first() {
                    diag = diag.with_node(first.clone());
                }
                diag
            }
            Self::UnknownSelector(_) => Diagnostic::error(DiagnosticCode::UnknownReference, self.to_string()),
        }
    }
}

/// Dependency graph with forward and reverse edges
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// Forward edges: node -> list of nodes it depends on (parents)
    parents: HashMap<NodeId, Vec<NodeId>>,

    /// Reverse edges: node -> list of nodes that depend on it (children)
    children: HashMap<NodeId, Vec<NodeId>>,

    /// All nodes in declaration order (sources first, then models)
    order: Vec<NodeId>,

    /// Position of each node in `order`
    index: HashMap<NodeId, usize>,

    kinds: HashMap<NodeId, NodeKind>,

    /// Node id -> display name (model name or `source.table`)
    names: HashMap<NodeId, String>,
}

impl DependencyGraph {
    /// Build the graph from models and sources that use no macros
    pub fn build(models: &[Model], sources: &[Source]) -> Result<Self, Vec<GraphError>> {
        Self::build_with_macros(models, sources, &[])
    }

    /// Build the graph from loaded models, sources and macros.
    ///
    /// A `ref()` or `source()` inside a macro body becomes an edge of every
    /// model that calls the macro, directly or through other macros. Every
    /// problem is reported: all unknown references, then the first cycle
    /// found.
    pub fn build_with_macros(models: &[Model], sources: &[Source], macros: &[Macro]) -> Result<Self, Vec<GraphError>> {
        let macros: HashMap<&str, &Macro> = macros.iter().map(|m| (m.name.as_str(), m)).collect();
        let mut graph = Self::default();

        for source in sources {
            graph.add_node(
                source.unique_id(),
                NodeKind::Source,
                format!("{}.{}", source.source_name, source.table_name),
            );
        }
        for model in models {
            graph.add_node(model.unique_id(), NodeKind::Model, model.name.clone());
        }

        let mut errors = Vec::new();

        for model in models {
            let consumer = model.unique_id();

            let mut references = ReferenceExtractor::extract(&model.raw_sql);
            for located in macro_references(&model.raw_sql, &macros) {
                if !references.iter().any(|r| r.reference == located.reference) {
                    references.push(located);
                }
            }

            for located in references {
                let producer = match &located.reference {
                    StaticReference::Ref { model_name, .. } => model_id(model_name),
                    StaticReference::Source { source_name, table_name } => source_id(source_name, table_name),
                };

                if !graph.index.contains_key(&producer) {
                    errors.push(GraphError::UnknownReference {
                        consumer: model.name.clone(),
                        target: located.reference.display_call(),
                        path: model.path.clone(),
                        line: located.line,
                    });
                    continue;
                }

                graph.add_edge(&consumer, &producer);
            }
        }

        if !errors.is_empty() {
            return Err(errors);
        }

        if let Some(cycle) = graph.find_cycle() {
            return Err(vec![GraphError::CyclicDependency { cycle }]);
        }

        Ok(graph)
    }

    fn add_node(&mut self, id: NodeId, kind: NodeKind, name: String) {
        if self.index.contains_key(&id) {
            return;
        }
        self.index.insert(id.clone(), self.order.len());
        self.kinds.insert(id.clone(), kind);
        self.names.insert(id.clone(), name);
        self.order.push(id);
    }

    fn add_edge(&mut self, consumer: &str, producer: &str) {
        let parents = self.parents.entry(consumer.to_string()).or_default();
        if parents.iter().any(|p| p == producer) {
            return;
        }
        parents.push(producer.to_string());
        self.children
            .entry(producer.to_string())
            .or_default()
            .push(consumer.to_string());
    }

    /// Depth-first search with a recursion stack; returns the first cycle
    /// as display names, closed on its first member
    fn find_cycle(&self) -> Option<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        fn visit(
            graph: &DependencyGraph,
            node: &NodeId,
            marks: &mut HashMap<NodeId, Mark>,
            stack: &mut Vec<NodeId>,
        ) -> Option<Vec<NodeId>> {
            marks.insert(node.clone(), Mark::Visiting);
            stack.push(node.clone());

            for parent in graph.parents(node) {
                match marks.get(parent) {
                    Some(Mark::Visiting) => {
                        let start = stack.iter().position(|n| n == parent).unwrap_or(0);
                        let mut cycle: Vec<NodeId> = stack[start..].to_vec();
                        cycle.push(parent.clone());
                        return Some(cycle);
                    }
                    Some(Mark::Done) => {}
                    None => {
                        if let Some(cycle) = visit(graph, parent, marks, stack) {
                            return Some(cycle);
                        }
                    }
                }
            }

            stack.pop();
            marks.insert(node.clone(), Mark::Done);
            None
        }

        let mut marks = HashMap::new();
        for node in &self.order {
            if marks.contains_key(node) {
                continue;
            }
            let mut stack = Vec::new();
            if let Some(cycle) = visit(self, node, &mut marks, &mut stack) {
                return Some(cycle.iter().map(|id| self.display_name(id).to_string()).collect());
            }
        }
        None
    }

    /// Model name or `source.table` for a node id
    pub fn display_name<'a>(&'a self, node_id: &'a str) -> &'a str {
        self.names.get(node_id).map(String::as_str).unwrap_or(node_id)
    }

    pub fn kind(&self, node_id: &str) -> Option<NodeKind> {
        self.kinds.get(node_id).copied()
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.index.contains_key(node_id)
    }

    /// Position of a node in declaration order
    pub fn declaration_index(&self, node_id: &str) -> Option<usize> {
        self.index.get(node_id).copied()
    }

    /// All nodes in declaration order
    pub fn all_nodes(&self) -> &[NodeId] {
        &self.order
    }

    /// Model nodes in declaration order
    pub fn models(&self) -> Vec<&NodeId> {
        self.order
            .iter()
            .filter(|id| self.kind(id) == Some(NodeKind::Model))
            .collect()
    }

    /// All (consumer, producer) edges in declaration order
    pub fn edges(&self) -> Vec<(&NodeId, &NodeId)> {
        self.order
            .iter()
            .flat_map(|consumer| self.parents(consumer).into_iter().map(move |p| (consumer, p)))
            .collect()
    }

    /// Get immediate parents (dependencies) of a node
    pub fn parents(&self, node_id: &str) -> Vec<&NodeId> {
        self.parents
            .get(node_id)
            .map(|deps| deps.iter().collect())
            .unwrap_or_default()
    }

    /// Get immediate children (dependents) of a node
    pub fn children(&self, node_id: &str) -> Vec<&NodeId> {
        self.children
            .get(node_id)
            .map(|deps| deps.iter().collect())
            .unwrap_or_default()
    }

    /// Get all downstream nodes (transitive closure of children)
    ///
    /// This is the "blast radius" - all models affected if this node fails.
    pub fn downstream(&self, node_id: &str) -> Vec<NodeId> {
        self.traverse(node_id, &self.children)
    }

    /// Get all upstream nodes (transitive closure of parents)
    pub fn upstream(&self, node_id: &str) -> Vec<NodeId> {
        self.traverse(node_id, &self.parents)
    }

    /// BFS over one edge direction, result in declaration order
    fn traverse(&self, node_id: &str, edges: &HashMap<NodeId, Vec<NodeId>>) -> Vec<NodeId> {
        let mut visited: HashSet<NodeId> = HashSet::new();
        let mut queue: VecDeque<&NodeId> = VecDeque::new();

        if let Some(next) = edges.get(node_id) {
            queue.extend(next.iter());
        }

        while let Some(current) = queue.pop_front() {
            if !visited.insert(current.clone()) {
                continue;
            }
            if let Some(next) = edges.get(current) {
                queue.extend(next.iter().filter(|n| !visited.contains(*n)));
            }
        }

        visited.remove(node_id);
        let mut result: Vec<NodeId> = visited.into_iter().collect();
        result.sort_by_key(|id| self.declaration_index(id).unwrap_or(usize::MAX));
        result
    }

    /// Check if there's a path from source to target
    pub fn has_path(&self, source: &str, target: &str) -> bool {
        self.downstream(source).iter().any(|n| n == target)
    }

    /// Resolve node selectors to model node ids.
    ///
    /// `name` selects one model, `+name` adds its upstream models, `name+`
    /// its downstream models, `+name+` both. No selectors selects every model.
    pub fn select(&self, selectors: &[String]) -> Result<HashSet<NodeId>, GraphError> {
        if selectors.is_empty() {
            return Ok(self.models().into_iter().cloned().collect());
        }

        let mut selected = HashSet::new();

        for selector in selectors {
            let trimmed = selector.trim();
            let with_upstream = trimmed.starts_with('+');
            let with_downstream = trimmed.ends_with('+') && trimmed.len() > 1;
            let name = trimmed.trim_start_matches('+').trim_end_matches('+');

            let id = model_id(name);
            if self.kind(&id) != Some(NodeKind::Model) {
                return Err(GraphError::UnknownSelector(selector.clone()));
            }

            if with_upstream {
                selected.extend(self.upstream(&id));
            }
            if with_downstream {
                selected.extend(self.downstream(&id));
            }
            selected.insert(id);
        }

        selected.retain(|id| self.kind(id) == Some(NodeKind::Model));
        Ok(selected)
    }
}

/// References inside the bodies of the macros `sql` calls, followed
/// transitively. Each is located at the line of the call in `sql`.
fn macro_references(sql: &str, macros: &HashMap<&str, &Macro>) -> Vec<LocatedReference> {
    let mut found: Vec<LocatedReference> = Vec::new();

    for call in ReferenceExtractor::extract_calls(sql) {
        let mut visited: HashSet<String> = HashSet::new();
        let mut stack = vec![call.name];

        while let Some(name) = stack.pop() {
            let Some(body) = macros.get(name.as_str()).map(|m| m.body.as_str()) else {
                continue;
            };
            if !visited.insert(name) {
                continue;
            }

            for located in ReferenceExtractor::extract(body) {
                if !found.iter().any(|f| f.reference == located.reference) {
                    found.push(LocatedReference {
                        reference: located.reference,
                        line: call.line,
                    });
                }
            }
            stack.extend(ReferenceExtractor::extract_calls(body).into_iter().map(|c| c.name));
        }
    }

    found
}
