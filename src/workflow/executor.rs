use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::error::{AppError, Result};
use crate::workflow::graph::{Graph, Target};
use crate::workflow::state::{Field, StateUpdate, WorkflowState};
use crate::workflow::step::StepName;

/// Walks a [`Graph`] from its entry step, mutating the state in place.
///
/// Steps never fail (see [`StepRunner`](crate::workflow::step::StepRunner)),
/// so an `Err` from [`Executor::execute`] means the graph itself is broken:
/// a missing step, a conflicting fan-out merge, or a run that exceeded
/// `max_steps` transitions.
pub struct Executor {
    graph: Graph,
    max_steps: usize,
}

impl Executor {
    pub fn new(graph: Graph, max_steps: usize) -> Self {
        Self { graph, max_steps }
    }

    pub async fn execute(&self, state: &mut WorkflowState) -> Result<()> {
        let mut target = Target::Step(self.graph.entry());
        let mut transitions = 0usize;

        loop {
            if transitions >= self.max_steps {
                return Err(AppError::Graph(format!(
                    "run exceeded {} transitions, last step {}",
                    self.max_steps, state.current_step
                )));
            }
            transitions += 1;

            target = match target {
                Target::End => {
                    debug!(
                        ticket_id = %state.ticket_id,
                        last_step = %state.current_step,
                        "Graph reached END"
                    );
                    return Ok(());
                }
                Target::Step(name) => {
                    self.run_step(name, state).await?;
                    self.graph.next(name, state)?
                }
                Target::FanOut => self.run_fan_out(state).await?,
            };
        }
    }

    async fn run_step(&self, name: StepName, state: &mut WorkflowState) -> Result<()> {
        let runner = self
            .graph
            .runner(name)
            .ok_or_else(|| AppError::Graph(format!("step {name} not found in graph")))?;

        state.current_step = name;
        debug!(step = %name, ticket_id = %state.ticket_id, "Executing step");

        let update = runner.run(state).await;
        state.apply(update);
        Ok(())
    }

    /// Start every fan-out member concurrently on a snapshot of the state,
    /// wait for all of them, then apply their merged writes.
    ///
    /// Member tasks live in a [`JoinSet`], so dropping the run aborts them.
    async fn run_fan_out(&self, state: &mut WorkflowState) -> Result<Target> {
        let group = self
            .graph
            .fan_out()
            .ok_or_else(|| AppError::Graph("no fan-out group defined".to_string()))?;

        let snapshot = Arc::new(state.clone());
        let mut tasks = JoinSet::new();
        let mut names = HashMap::with_capacity(group.members.len());

        for &name in &group.members {
            let runner = self
                .graph
                .runner(name)
                .ok_or_else(|| AppError::Graph(format!("fan-out member {name} not found")))?
                .clone();
            let snapshot = Arc::clone(&snapshot);
            state.current_step = name;
            let handle = tasks.spawn(async move { (name, runner.run(&snapshot).await) });
            names.insert(handle.id(), name);
        }

        info!(
            members = ?group.members,
            ticket_id = %state.ticket_id,
            "Fan-out started"
        );

        let mut updates = Vec::with_capacity(group.members.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((name, update)) => updates.push((name, update)),
                Err(join_error) => {
                    let name = names.get(&join_error.id()).copied().ok_or_else(|| {
                        AppError::Graph(format!("unknown fan-out task failed: {join_error}"))
                    })?;
                    error!(step = %name, error = %join_error, "Fan-out task did not complete");
                    let runner = self
                        .graph
                        .runner(name)
                        .ok_or_else(|| AppError::Graph(format!("fan-out member {name} not found")))?;
                    let update =
                        runner.fallback(&snapshot, &AppError::Step(join_error.to_string()));
                    updates.push((name, update));
                }
            }
        }

        // Completion order varies; merge in declaration order.
        updates.sort_by_key(|(name, _)| group.members.iter().position(|m| m == name));

        let merged = merge_disjoint(updates)?;
        state.apply(merged);

        debug!(ticket_id = %state.ticket_id, join = ?group.join, "Fan-out joined");
        Ok(group.join)
    }
}

/// Combine fan-out updates, refusing any field written by two members.
fn merge_disjoint(updates: Vec<(StepName, StateUpdate)>) -> Result<StateUpdate> {
    let mut owners: HashMap<Field, StepName> = HashMap::new();
    let mut merged = StateUpdate::new();

    for (name, update) in updates {
        for field in update.fields() {
            if let Some(owner) = owners.insert(field, name) {
                debug_assert!(
                    owner == name,
                    "fan-out members {owner} and {name} both wrote {field:?}"
                );
                if owner != name {
                    return Err(AppError::Graph(format!(
                        "fan-out members {owner} and {name} both wrote {field:?}"
                    )));
                }
            }
        }
        merged.extend(update);
    }

    Ok(merged)
}
