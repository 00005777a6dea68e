//! Execution planning: group models into dependency waves
//!
//! A wave is a set of models whose upstream models all sit in earlier
//! waves, so every model in a wave can be materialized concurrently.

use rivulet_core::NodeId;
use rivulet_project::{DependencyGraph, GraphError, NodeKind};
use std::collections::{HashMap, HashSet};

/// Ordered waves over a selected set of models
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionPlan {
    waves: Vec<Vec<NodeId>>,
    wave_of: HashMap<NodeId, usize>,
}

impl ExecutionPlan {
    /// Plan every model in the graph
    pub fn for_all(graph: &DependencyGraph) -> Result<Self, GraphError> {
        let selected: HashSet<NodeId> = graph.models().into_iter().cloned().collect();
        Self::build(graph, &selected)
    }

    /// Layer the selected models by in-degree.
    ///
    /// Sources are always satisfied and unselected models count as already
    /// built, so only edges between selected models constrain the order.
    /// Ties within a wave follow declaration order.
    pub fn build(graph: &DependencyGraph, selected: &HashSet<NodeId>) -> Result<Self, GraphError> {
        let is_planned =
            |id: &NodeId| selected.contains(id) && graph.kind(id) == Some(NodeKind::Model);

        let mut in_degree: HashMap<&NodeId, usize> = HashMap::new();
        for id in graph.all_nodes().iter().filter(|id| is_planned(id)) {
            let degree = graph.parents(id).into_iter().filter(|p| is_planned(p)).count();
            in_degree.insert(id, degree);
        }

        let mut current: Vec<&NodeId> = graph
            .all_nodes()
            .iter()
            .filter(|id| in_degree.get(id) == Some(&0))
            .collect();

        let mut plan = Self::default();

        while !current.is_empty() {
            current.sort_by_key(|id| graph.declaration_index(id).unwrap_or(usize::MAX));

            let wave = plan.waves.len();
            let mut next = Vec::new();

            for id in &current {
                for child in graph.children(id) {
                    if let Some(degree) = in_degree.get_mut(child) {
                        *degree -= 1;
                        if *degree == 0 {
                            next.push(child);
                        }
                    }
                }
                plan.wave_of.insert((*id).clone(), wave);
            }

            plan.waves.push(current.into_iter().cloned().collect());
            current = next;
        }

        if plan.wave_of.len() != in_degree.len() {
            let mut remaining: Vec<String> = in_degree
                .keys()
                .filter(|id| !plan.wave_of.contains_key(**id))
                .map(|id| graph.display_name(id).to_string())
                .collect();
            remaining.sort();
            return Err(GraphError::CyclicDependency { cycle: remaining });
        }

        Ok(plan)
    }

    pub fn waves(&self) -> &[Vec<NodeId>] {
        &self.waves
    }

    /// Wave index of a planned model
    pub fn wave_of(&self, node_id: &str) -> Option<usize> {
        self.wave_of.get(node_id).copied()
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.wave_of.contains_key(node_id)
    }

    pub fn len(&self) -> usize {
        self.waves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waves.is_empty()
    }

    /// Number of planned models
    pub fn model_count(&self) -> usize {
        self.wave_of.len()
    }

    /// The wave after which every planned model in `depends_on` is done.
    ///
    /// `None` when none of them is planned.
    pub fn last_wave_of(&self, depends_on: &[NodeId]) -> Option<usize> {
        depends_on.iter().filter_map(|id| self.wave_of(id)).max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rivulet_core::{model_id, Materialization, Model, Relation, Source};
    use std::path::PathBuf;

    fn model(name: &str, sql: &str) -> Model {
        Model {
            name: name.to_string(),
            path: PathBuf::from(format!("models/{}.sql", name)),
            raw_sql: sql.to_string(),
            materialization: Materialization::View,
            relation: Relation::new(None, "analytics", name),
            description: String::new(),
            columns: Vec::new(),
        }
    }

    fn ids(names: &[&str]) -> Vec<NodeId> {
        names.iter().map(|n| model_id(n)).collect()
    }

    /// raw.orders -> stg_orders -> fct_orders -> rpt_revenue
    ///              stg_customers ----^
    ///              dim_dates (independent)
    fn graph() -> DependencyGraph {
        DependencyGraph::build(
            &[
                model("stg_orders", "select * from {{ source('raw', 'orders') }}"),
                model("stg_customers", "select 1 as customer_key"),
                model(
                    "fct_orders",
                    "select * from {{ ref('stg_orders') }} join {{ ref('stg_customers') }} using (customer_key)",
                ),
                model("dim_dates", "select current_date as d"),
                model("rpt_revenue", "select sum(total) from {{ ref('fct_orders') }}"),
            ],
            &[Source {
                source_name: "raw".into(),
                table_name: "orders".into(),
                relation: Relation::new(None, "raw", "orders"),
                path: PathBuf::from("models/sources.yml"),
                columns: Vec::new(),
            }],
        )
        .unwrap()
    }

    #[test]
    fn waves_follow_dependencies_and_declaration_order() {
        let graph = graph();
        let plan = ExecutionPlan::for_all(&graph).unwrap();

        assert_eq!(
            plan.waves(),
            &[
                ids(&["stg_orders", "stg_customers", "dim_dates"]),
                ids(&["fct_orders"]),
                ids(&["rpt_revenue"]),
            ]
        );
        assert_eq!(plan.model_count(), 5);
    }

    #[test]
    fn every_edge_goes_forward() {
        let graph = graph();
        let plan = ExecutionPlan::for_all(&graph).unwrap();

        for (consumer, producer) in graph.edges() {
            if let (Some(c), Some(p)) = (plan.wave_of(consumer), plan.wave_of(producer)) {
                assert!(p < c, "{} must run before {}", producer, consumer);
            }
        }
    }

    #[test]
    fn unselected_models_count_as_built() {
        let graph = graph();
        let selected: HashSet<NodeId> = ids(&["fct_orders", "rpt_revenue"]).into_iter().collect();
        let plan = ExecutionPlan::build(&graph, &selected).unwrap();

        assert_eq!(plan.waves(), &[ids(&["fct_orders"]), ids(&["rpt_revenue"])]);
        assert!(!plan.contains(&model_id("stg_orders")));
    }

    #[test]
    fn empty_selection() {
        let plan = ExecutionPlan::build(&graph(), &HashSet::new()).unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.last_wave_of(&ids(&["fct_orders"])), None);
    }

    #[test]
    fn last_wave_of_dependencies() {
        let plan = ExecutionPlan::for_all(&graph()).unwrap();
        assert_eq!(plan.last_wave_of(&ids(&["stg_orders", "fct_orders"])), Some(1));
        assert_eq!(plan.last_wave_of(&ids(&["dim_dates"])), Some(0));
    }
}
