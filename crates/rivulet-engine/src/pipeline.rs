//! Run orchestration
//!
//! Waves run strictly in sequence. Models within a wave are spawned onto a
//! `JoinSet` and compete for connection pool slots. A failed model skips its
//! transitive dependents only; unrelated branches keep running.

use crate::materializer::{CompiledModel, Materializer};
use crate::preflight::CompiledProject;
use crate::testing::{CompiledTest, TestRunner};
use rivulet_core::{
    Config, Diagnostic, DiagnosticCode, ModelResult, ModelStatus, NodeId, RunReport, SkipReason,
    TestPolicy, TestResult, TestStatus,
};
use rivulet_warehouse::ConnectionPool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;

/// Shared flag checked before each wave and each model
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Executes a compiled project against a warehouse
pub struct Pipeline {
    materializer: Materializer,
    tests: TestRunner,
    policy: TestPolicy,
    create_schemas: bool,
    cancel: CancellationFlag,
}

/// Mutable state of one run
struct RunState {
    report: RunReport,
    statuses: HashMap<NodeId, ModelStatus>,

    /// Planned models that must not start, with the first reason found
    blocked: HashMap<NodeId, SkipReason>,
}

impl Pipeline {
    pub fn new(pool: ConnectionPool, config: &Config) -> Self {
        Self {
            materializer: Materializer::new(pool.clone()),
            tests: TestRunner::new(pool),
            policy: config.test_policy,
            create_schemas: config.create_schemas,
            cancel: CancellationFlag::new(),
        }
    }

    pub fn with_test_policy(mut self, policy: TestPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation(&self) -> CancellationFlag {
        self.cancel.clone()
    }

    /// Materialize the planned models wave by wave, then run tests
    pub async fn run(&self, compiled: &CompiledProject) -> RunReport {
        let start = Instant::now();
        let mut state = RunState {
            report: RunReport::new(),
            statuses: HashMap::new(),
            blocked: HashMap::new(),
        };

        if self.create_schemas && !compiled.plan.is_empty() {
            if let Err(e) = self.materializer.create_schemas(compiled.planned_models()).await {
                tracing::error!(error = %e, "schema creation failed");
                state.report.add_diagnostic(Diagnostic::error(
                    DiagnosticCode::MaterializationFailed,
                    format!("Could not create target schemas: {}", e),
                ));
            }
        }

        // Tests are grouped by the wave after which all their models are done
        let mut pending: Vec<(Option<usize>, &CompiledTest)> = compiled
            .tests
            .iter()
            .map(|t| (compiled.plan.last_wave_of(&t.depends_on), t))
            .collect();

        for (wave, node_ids) in compiled.plan.waves().iter().enumerate() {
            if self.cancel.is_cancelled() {
                tracing::warn!(wave, "run cancelled, skipping remaining waves");
                break;
            }

            tracing::info!(wave, models = node_ids.len(), "starting wave");
            self.run_wave(compiled, wave, node_ids, &mut state).await;

            if self.policy == TestPolicy::PerWave {
                let (ready, rest): (Vec<_>, Vec<_>) = pending
                    .into_iter()
                    .partition(|(after, _)| after.map_or(wave == 0, |w| w == wave));
                pending = rest;

                let ready: Vec<&CompiledTest> = ready.into_iter().map(|(_, t)| t).collect();
                self.run_tests(compiled, &ready, true, &mut state).await;
            }
        }

        // Models in waves that never started
        for (wave, node_ids) in compiled.plan.waves().iter().enumerate() {
            for id in node_ids {
                if !state.statuses.contains_key(id) {
                    if let Some(model) = compiled.model(id) {
                        let reason = state.blocked.get(id).cloned().unwrap_or(SkipReason::Cancelled);
                        record_model(&mut state, model, wave, ModelStatus::Skipped(reason), 0);
                    }
                }
            }
        }

        let remaining: Vec<&CompiledTest> = pending.into_iter().map(|(_, t)| t).collect();
        self.run_tests(compiled, &remaining, true, &mut state).await;

        if self.cancel.is_cancelled() {
            state.report.add_diagnostic(Diagnostic::error(
                DiagnosticCode::ModelSkipped,
                "Run cancelled before all models and tests completed",
            ));
        }

        state.report.summary.waves = compiled.plan.len();
        state.report.summary.elapsed_ms = start.elapsed().as_millis() as u64;

        tracing::info!(
            success = state.report.success,
            models_failed = state.report.summary.models_failed,
            tests_failed = state.report.summary.tests_failed,
            "run finished"
        );

        state.report
    }

    /// Run the selected tests against relations that already exist
    pub async fn test_only(&self, compiled: &CompiledProject) -> RunReport {
        let start = Instant::now();
        let mut state = RunState {
            report: RunReport::new(),
            statuses: HashMap::new(),
            blocked: HashMap::new(),
        };

        let tests: Vec<&CompiledTest> = compiled.tests.iter().collect();
        self.run_tests(compiled, &tests, false, &mut state).await;

        state.report.summary.elapsed_ms = start.elapsed().as_millis() as u64;
        state.report
    }

    async fn run_wave(&self, compiled: &CompiledProject, wave: usize, node_ids: &[NodeId], state: &mut RunState) {
        let mut tasks = JoinSet::new();
        let mut outcomes: HashMap<NodeId, (ModelStatus, u64)> = HashMap::new();

        for id in node_ids {
            if let Some(reason) = state.blocked.get(id) {
                outcomes.insert(id.clone(), (ModelStatus::Skipped(reason.clone()), 0));
                continue;
            }
            let Some(model) = compiled.model(id) else {
                continue;
            };

            let model = model.clone();
            let materializer = self.materializer.clone();
            let cancel = self.cancel.clone();

            tasks.spawn(async move {
                let connection = match materializer.checkout().await {
                    Ok(connection) => connection,
                    Err(e) => return (model.node_id, ModelStatus::Failed { reason: e.to_string() }, 0),
                };

                // Checked after the slot is granted; queued models may outlive the cancel
                if cancel.is_cancelled() {
                    return (model.node_id, ModelStatus::Skipped(SkipReason::Cancelled), 0);
                }

                let start = Instant::now();
                let status = match materializer.materialize(&connection, &model).await {
                    Ok(()) => ModelStatus::Success,
                    Err(e) => ModelStatus::Failed { reason: e.to_string() },
                };
                (model.node_id, status, start.elapsed().as_millis() as u64)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((id, status, duration_ms)) => {
                    outcomes.insert(id, (status, duration_ms));
                }
                Err(e) => tracing::error!(error = %e, "materialization task aborted"),
            }
        }

        // Record in wave order so reports are deterministic
        for id in node_ids {
            let Some(model) = compiled.model(id) else {
                continue;
            };
            let (status, duration_ms) = outcomes.remove(id).unwrap_or_else(|| {
                (ModelStatus::Failed { reason: "materialization task aborted".to_string() }, 0)
            });

            if let ModelStatus::Failed { .. } = status {
                block_downstream(compiled, state, id, SkipReason::UpstreamFailure { upstream: model.name.clone() });
            }

            record_model(state, model, wave, status, duration_ms);
        }
    }

    /// Run a batch of tests concurrently. With `check_upstream`, tests whose
    /// planned models did not succeed are skipped.
    async fn run_tests(
        &self,
        compiled: &CompiledProject,
        tests: &[&CompiledTest],
        check_upstream: bool,
        state: &mut RunState,
    ) {
        if tests.is_empty() {
            return;
        }

        let mut tasks = JoinSet::new();
        let mut results: Vec<Option<TestResult>> = vec![None; tests.len()];

        for (index, test) in tests.iter().enumerate() {
            if self.cancel.is_cancelled() {
                results[index] = Some(TestRunner::skipped(test, "run cancelled"));
                continue;
            }

            if check_upstream {
                if let Some(reason) = unbuilt_dependency(compiled, state, test) {
                    results[index] = Some(TestRunner::skipped(test, reason));
                    continue;
                }
            }

            let runner = self.tests.clone();
            let cancel = self.cancel.clone();
            let test = (*test).clone();
            tasks.spawn(async move {
                let result = match runner.checkout().await {
                    Ok(_) if cancel.is_cancelled() => TestRunner::skipped(&test, "run cancelled"),
                    Ok(connection) => runner.run(&connection, &test).await,
                    Err(e) => TestRunner::skipped(&test, e.to_string()),
                };
                (index, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => results[index] = Some(result),
                Err(e) => tracing::error!(error = %e, "test task aborted"),
            }
        }

        for (test, result) in tests.iter().zip(results) {
            let result = result.unwrap_or_else(|| TestRunner::skipped(test, "test task aborted"));

            if result.status == TestStatus::Failed && self.policy == TestPolicy::PerWave {
                for guarded in &test.blocks {
                    let upstream = compiled.graph.display_name(guarded).to_string();
                    block_downstream(compiled, state, guarded, SkipReason::UpstreamTestFailure { upstream });
                }
            }

            state.report.add_test(result);
        }
    }
}

/// Why a test cannot run: a planned model it reads did not succeed
fn unbuilt_dependency(compiled: &CompiledProject, state: &RunState, test: &CompiledTest) -> Option<String> {
    test.depends_on
        .iter()
        .filter(|id| compiled.plan.contains(id))
        .find(|id| !state.statuses.get(*id).map_or(false, ModelStatus::is_success))
        .map(|id| format!("model '{}' was not built", compiled.graph.display_name(id)))
}

fn block_downstream(compiled: &CompiledProject, state: &mut RunState, node_id: &str, reason: SkipReason) {
    for dependent in compiled.graph.downstream(node_id) {
        if compiled.plan.contains(&dependent) && !state.statuses.contains_key(&dependent) {
            state.blocked.entry(dependent).or_insert_with(|| reason.clone());
        }
    }
}

fn record_model(state: &mut RunState, model: &CompiledModel, wave: usize, status: ModelStatus, duration_ms: u64) {
    match &status {
        ModelStatus::Success => tracing::info!(model = %model.name, wave, duration_ms, "model built"),
        ModelStatus::Failed { reason } => tracing::error!(model = %model.name, wave, %reason, "model failed"),
        ModelStatus::Skipped(reason) => tracing::warn!(model = %model.name, wave, %reason, "model skipped"),
    }

    state.statuses.insert(model.node_id.clone(), status.clone());
    state.report.add_model(ModelResult {
        model: model.name.clone(),
        relation: model.relation.fqn(),
        materialization: model.materialization,
        wave,
        status,
        duration_ms,
    });
}
