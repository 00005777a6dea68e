//! Export the execution plan to an external workflow scheduler
//!
//! Each wave becomes one task (`wave_0`, `wave_1`, ...) that runs
//! `rivulet run --select <models>` for the models in that wave. A task
//! depends on every earlier wave that holds one of its models' upstream
//! models.

use crate::planner::ExecutionPlan;
use rivulet_project::DependencyGraph;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One scheduler task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,

    /// Model names, in wave order
    pub models: Vec<String>,

    /// Task ids this task waits for
    pub upstream: Vec<String>,

    pub command: String,
}

/// Scheduler-neutral task graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskGraph {
    pub dag_id: String,
    pub tasks: Vec<Task>,
}

impl TaskGraph {
    pub fn from_plan(dag_id: impl Into<String>, plan: &ExecutionPlan, graph: &DependencyGraph) -> Self {
        let task_id = |wave: usize| format!("wave_{}", wave);

        let tasks = plan
            .waves()
            .iter()
            .enumerate()
            .map(|(wave, node_ids)| {
                let upstream: BTreeSet<usize> = node_ids
                    .iter()
                    .flat_map(|id| graph.parents(id))
                    .filter_map(|parent| plan.wave_of(parent))
                    .collect();

                let models: Vec<String> = node_ids
                    .iter()
                    .map(|id| graph.display_name(id).to_string())
                    .collect();

                Task {
                    task_id: task_id(wave),
                    command: format!("rivulet run --select {}", models.join(" --select ")),
                    models,
                    upstream: upstream.into_iter().map(task_id).collect(),
                }
            })
            .collect();

        Self {
            dag_id: dag_id.into(),
            tasks,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Render an Airflow DAG file with one BashOperator per task
    pub fn to_airflow(&self) -> String {
        let mut out = String::new();

        out.push_str("from datetime import datetime\n\n");
        out.push_str("from airflow import DAG\n");
        out.push_str("from airflow.operators.bash import BashOperator\n\n");
        out.push_str(&format!(
            "with DAG(\n    dag_id={},\n    start_date=datetime(2024, 1, 1),\n    schedule=None,\n    catchup=False,\n) as dag:\n",
            python_string(&self.dag_id)
        ));

        if self.tasks.is_empty() {
            out.push_str("    pass\n");
            return out;
        }

        for task in &self.tasks {
            out.push_str(&format!(
                "    {} = BashOperator(\n        task_id={},\n        bash_command={},\n    )\n",
                task.task_id,
                python_string(&task.task_id),
                python_string(&task.command)
            ));
        }

        let edges: Vec<String> = self
            .tasks
            .iter()
            .flat_map(|task| {
                task.upstream
                    .iter()
                    .map(move |upstream| format!("    {} >> {}\n", upstream, task.task_id))
            })
            .collect();

        if !edges.is_empty() {
            out.push('\n');
            for edge in edges {
                out.push_str(&edge);
            }
        }

        out
    }
}

fn python_string(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rivulet_core::{Materialization, Model, Relation};
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

    fn task_graph() -> TaskGraph {
        let graph = DependencyGraph::build(
            &[
                model("stg_orders", "select 1"),
                model("stg_customers", "select 1"),
                model("fct_orders", "select * from {{ ref('stg_orders') }}, {{ ref('stg_customers') }}"),
                model("rpt", "select * from {{ ref('fct_orders') }} join {{ ref('stg_orders') }} using (id)"),
            ],
            &[],
        )
        .unwrap();
        let plan = ExecutionPlan::for_all(&graph).unwrap();
        TaskGraph::from_plan("rivulet_daily", &plan, &graph)
    }

    #[test]
    fn tasks_per_wave() {
        let graph = task_graph();

        assert_eq!(graph.tasks.len(), 3);
        assert_eq!(graph.tasks[0].models, vec!["stg_orders", "stg_customers"]);
        assert_eq!(
            graph.tasks[0].command,
            "rivulet run --select stg_orders --select stg_customers"
        );
        assert!(graph.tasks[0].upstream.is_empty());
        assert_eq!(graph.tasks[1].upstream, vec!["wave_0"]);
        assert_eq!(graph.tasks[2].upstream, vec!["wave_0", "wave_1"]);
    }

    #[test]
    fn airflow_output() {
        let dag = task_graph().to_airflow();

        assert!(dag.contains("dag_id=\"rivulet_daily\""));
        assert!(dag.contains("    wave_1 = BashOperator(\n        task_id=\"wave_1\",\n        bash_command=\"rivulet run --select fct_orders\",\n    )\n"));
        assert!(dag.contains("    wave_0 >> wave_1\n"));
        assert!(dag.contains("    wave_1 >> wave_2\n"));
    }

    #[test]
    fn json_output() {
        let json = task_graph().to_json().unwrap();
        let parsed: TaskGraph = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.dag_id, "rivulet_daily");
        assert_eq!(parsed.tasks[2].task_id, "wave_2");
    }

    #[test]
    fn empty_plan() {
        let graph = DependencyGraph::build(&[], &[]).unwrap();
        let plan = ExecutionPlan::for_all(&graph).unwrap();
        let dag = TaskGraph::from_plan("empty", &plan, &graph).to_airflow();
        assert!(dag.ends_with("    pass\n"));
    }
}
