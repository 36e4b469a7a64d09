//! Static description of a step graph.
//!
//! A graph has one entry step, unconditional edges, at most one conditional
//! branch point and at most one fan-out group. Fan-out members run
//! concurrently against the same snapshot and must write disjoint fields;
//! [`GraphBuilder::build`] rejects groups whose declared write-sets overlap.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{AppError, Result};
use crate::workflow::state::{Field, WorkflowState};
use crate::workflow::step::{Step, StepName, StepRunner};

/// Outcome of the conditional routing function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteDecision {
    Continue,
    Skip,
    Error,
}

impl RouteDecision {
    pub const ALL: [RouteDecision; 3] =
        [RouteDecision::Continue, RouteDecision::Skip, RouteDecision::Error];
}

/// Where control goes after a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Step(StepName),
    /// Run every member of the fan-out group, then continue at its join target.
    FanOut,
    End,
}

#[derive(Debug, Clone, Copy)]
pub struct Edge {
    pub from: StepName,
    pub to: Target,
}

pub type RouteFn = fn(&WorkflowState) -> RouteDecision;

pub struct ConditionalEdge {
    pub from: StepName,
    pub route: RouteFn,
    pub targets: HashMap<RouteDecision, Target>,
}

#[derive(Debug, Clone)]
pub struct FanOutGroup {
    pub members: Vec<StepName>,
    pub join: Target,
}

pub struct Graph {
    entry: StepName,
    steps: HashMap<StepName, StepRunner>,
    edges: Vec<Edge>,
    conditional: Option<ConditionalEdge>,
    fan_out: Option<FanOutGroup>,
}

impl Graph {
    pub fn builder(entry: StepName) -> GraphBuilder {
        GraphBuilder {
            entry,
            steps: Vec::new(),
            edges: Vec::new(),
            conditional: None,
            fan_out: None,
            step_timeout: None,
        }
    }

    pub fn entry(&self) -> StepName {
        self.entry
    }

    pub fn runner(&self, name: StepName) -> Option<&StepRunner> {
        self.steps.get(&name)
    }

    pub fn fan_out(&self) -> Option<&FanOutGroup> {
        self.fan_out.as_ref()
    }

    /// Resolve the next target after `from` has finished.
    ///
    /// The conditional branch wins over static edges. A step with no outgoing
    /// edge ends the run.
    pub fn next(&self, from: StepName, state: &WorkflowState) -> Result<Target> {
        if let Some(conditional) = self.conditional.as_ref().filter(|c| c.from == from) {
            let decision = (conditional.route)(state);
            tracing::info!(
                step = %from,
                decision = ?decision,
                tenant_id = %state.tenant_id,
                ticket_id = %state.ticket_id,
                "Route selected"
            );
            return conditional.targets.get(&decision).copied().ok_or_else(|| {
                AppError::Graph(format!("no target for route {decision:?} after {from}"))
            });
        }

        Ok(self
            .edges
            .iter()
            .find(|e| e.from == from)
            .map(|e| e.to)
            .unwrap_or(Target::End))
    }
}

pub struct GraphBuilder {
    entry: StepName,
    steps: Vec<Arc<dyn Step>>,
    edges: Vec<Edge>,
    conditional: Option<ConditionalEdge>,
    fan_out: Option<FanOutGroup>,
    step_timeout: Option<Duration>,
}

impl GraphBuilder {
    pub fn step(mut self, step: Arc<dyn Step>) -> Self {
        self.steps.push(step);
        self
    }

    pub fn edge(mut self, from: StepName, to: Target) -> Self {
        self.edges.push(Edge { from, to });
        self
    }

    pub fn conditional(
        mut self,
        from: StepName,
        route: RouteFn,
        targets: impl IntoIterator<Item = (RouteDecision, Target)>,
    ) -> Self {
        self.conditional = Some(ConditionalEdge {
            from,
            route,
            targets: targets.into_iter().collect(),
        });
        self
    }

    pub fn fan_out(mut self, members: Vec<StepName>, join: Target) -> Self {
        self.fan_out = Some(FanOutGroup { members, join });
        self
    }

    pub fn step_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.step_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<Graph> {
        let mut steps = HashMap::new();
        for step in self.steps {
            let name = step.name();
            if steps
                .insert(name, StepRunner::new(step, self.step_timeout))
                .is_some()
            {
                return Err(AppError::Graph(format!("step {name} registered twice")));
            }
        }

        let graph = Graph {
            entry: self.entry,
            steps,
            edges: self.edges,
            conditional: self.conditional,
            fan_out: self.fan_out,
        };
        graph.validate()?;
        Ok(graph)
    }
}

impl Graph {
    fn validate(&self) -> Result<()> {
        self.check_step(self.entry, "entry")?;

        for edge in &self.edges {
            self.check_step(edge.from, "edge source")?;
            self.check_target(edge.to)?;
        }

        if let Some(conditional) = &self.conditional {
            self.check_step(conditional.from, "conditional source")?;
            for decision in RouteDecision::ALL {
                let target = conditional.targets.get(&decision).ok_or_else(|| {
                    AppError::Graph(format!(
                        "conditional edge from {} has no target for {decision:?}",
                        conditional.from
                    ))
                })?;
                self.check_target(*target)?;
            }
        }

        if let Some(group) = &self.fan_out {
            if group.members.is_empty() {
                return Err(AppError::Graph("fan-out group has no members".to_string()));
            }
            if group.join == Target::FanOut {
                return Err(AppError::Graph("fan-out group cannot join into itself".to_string()));
            }
            self.check_target(group.join)?;

            let mut owners: HashMap<Field, StepName> = HashMap::new();
            let mut seen = HashSet::new();
            for &member in &group.members {
                if !seen.insert(member) {
                    return Err(AppError::Graph(format!("{member} listed twice in fan-out group")));
                }
                let runner = self.check_step(member, "fan-out member")?;
                for &field in runner.writes() {
                    if let Some(owner) = owners.insert(field, member) {
                        return Err(AppError::Graph(format!(
                            "fan-out members {owner} and {member} both write {field:?}"
                        )));
                    }
                }
            }
        }

        Ok(())
    }

    fn check_step(&self, name: StepName, role: &str) -> Result<&StepRunner> {
        self.steps
            .get(&name)
            .ok_or_else(|| AppError::Graph(format!("{role} {name} is not a registered step")))
    }

    fn check_target(&self, target: Target) -> Result<()> {
        match target {
            Target::Step(name) => self.check_step(name, "target").map(|_| ()),
            Target::FanOut if self.fan_out.is_none() => Err(AppError::Graph(
                "edge targets the fan-out group but none is defined".to_string(),
            )),
            Target::FanOut | Target::End => Ok(()),
        }
    }
}
