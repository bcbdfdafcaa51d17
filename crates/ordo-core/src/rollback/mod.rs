//! Rollback plan builder.
//!
//! Compiles the compensating plan of a stage bottom-up: each step group's
//! `rollbackSteps` (nested groups first), then parallel blocks, then the
//! stage-level `execution.rollbackSteps`, then the provisioner's
//! `rollbackSteps`. Every contribution is guarded by the fully-qualified name
//! of the forward node it compensates, so at run time only the parts whose
//! forward counterpart actually started are rolled back.
//!
//! The result is an ordinary `Plan` built from the structural steps in
//! `crate::step::builtin`, executed by the same strategies as any other plan.

use std::collections::{HashMap, HashSet};

use ordo_types::plan::{ExecutionMode, PlanNode};
use ordo_types::rollback::{
    ExecutionElement, RollbackChild, RollbackChildren, RollbackEdge, RollbackNode,
    RollbackNodeKind, RollbackPlan, StageSection, StepElement, StepGroupElement,
};
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;

use crate::step::StepRegistry;
use crate::step::builtin::{
    PARALLEL, ROLLBACK_OPTIONAL_CHILD_CHAIN, ROLLBACK_OPTIONAL_CHILDREN, SECTION_CHAIN,
};

/// Group tag of a stage root node.
pub const STAGE_GROUP: &str = "STAGE";
/// Group tag of a step group node.
pub const STEP_GROUP: &str = "STEP_GROUP";

const ROLLBACK_STEPS: &str = "rollbackSteps";
const STEP_GROUPS_ROLLBACK: &str = "stepGroupsRollback";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RollbackBuildError {
    #[error("step '{identifier}' uses unregistered step type '{step_type}'")]
    UnknownStepType {
        identifier: String,
        step_type: String,
    },

    #[error("duplicate rollback node '{0}'")]
    DuplicateNode(String),

    #[error("cycle detected involving rollback node '{0}'")]
    Cycle(String),

    #[error("failed to parse stage: {0}")]
    Parse(String),
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Parse a stage section from YAML.
pub fn parse_stage(yaml: &str) -> Result<StageSection, RollbackBuildError> {
    serde_yaml_ng::from_str(yaml).map_err(|e| RollbackBuildError::Parse(e.to_string()))
}

/// Build the rollback plan of a stage running at `pipeline.stages.<id>`.
pub fn build_rollback_plan(
    stage: &StageSection,
    registry: &StepRegistry,
) -> Result<RollbackPlan, RollbackBuildError> {
    let stage_fqn = format!("pipeline.stages.{}", stage.identifier);
    build_rollback_plan_at(stage, &stage_fqn, registry)
}

/// Build the rollback plan of a stage whose forward FQN is `stage_fqn`.
///
/// Returns an empty plan when no section declares rollback steps.
pub fn build_rollback_plan_at(
    stage: &StageSection,
    stage_fqn: &str,
    registry: &StepRegistry,
) -> Result<RollbackPlan, RollbackBuildError> {
    let mut acc = Accumulator::new(registry);
    let stage_id = stage.identifier.as_str();
    let execution_fqn = format!("{stage_fqn}.spec.execution");
    let mut sections = Vec::new();

    // Step groups, latest first.
    let groups = acc.scope_rollback(
        &stage.spec.execution.steps,
        stage_id,
        &format!("{execution_fqn}.steps"),
    )?;
    if !groups.is_empty() {
        let node_id = format!("{stage_id}.{STEP_GROUPS_ROLLBACK}");
        acc.optional_chain(
            &node_id,
            PlanNode::new(
                node_id.clone(),
                STEP_GROUPS_ROLLBACK,
                ROLLBACK_OPTIONAL_CHILD_CHAIN,
                ExecutionMode::ChildChain,
            )
            .skipping_expression_chain(),
            groups,
        )?;
        sections.push(acc.record(
            node_id,
            STEP_GROUPS_ROLLBACK,
            Some(execution_fqn.clone()),
            false,
            RollbackNodeKind::StepGroups,
        ));
    }

    // Stage-level execution rollback steps.
    if !stage.spec.execution.rollback_steps.is_empty() {
        let node_id = acc.rollback_steps(
            &stage.spec.execution.rollback_steps,
            &format!("{stage_id}.{ROLLBACK_STEPS}"),
        )?;
        sections.push(acc.record(
            node_id,
            ROLLBACK_STEPS,
            Some(execution_fqn.clone()),
            false,
            RollbackNodeKind::Execution,
        ));
    }

    // Provisioner rollback steps.
    let provisioner = stage
        .spec
        .infrastructure
        .as_ref()
        .and_then(|infra| infra.provisioner.as_ref());
    if let Some(provisioner) = provisioner.filter(|p| !p.rollback_steps.is_empty()) {
        let node_id = acc.rollback_steps(
            &provisioner.rollback_steps,
            &format!("{stage_id}.infrastructure.{ROLLBACK_STEPS}"),
        )?;
        sections.push(acc.record(
            node_id,
            ROLLBACK_STEPS,
            Some(format!("{stage_fqn}.spec.infrastructure")),
            false,
            RollbackNodeKind::Infrastructure,
        ));
    }

    if sections.is_empty() {
        tracing::debug!(stage = stage_id, "stage declares no rollback steps");
        return Ok(RollbackPlan::default());
    }

    let root_id = format!("{stage_id}.rollback");
    acc.optional_chain(
        &root_id,
        PlanNode::new(
            root_id.clone(),
            stage_id,
            ROLLBACK_OPTIONAL_CHILD_CHAIN,
            ExecutionMode::ChildChain,
        )
        .with_group(STAGE_GROUP),
        sections,
    )?;
    acc.record(root_id.clone(), stage_id, None, false, RollbackNodeKind::Stage);

    let plan = acc.finish(root_id);
    execution_order(&plan)?;
    tracing::debug!(
        stage = stage_id,
        nodes = plan.plan_nodes.len(),
        "rollback plan built"
    );
    Ok(plan)
}

/// Plan node ids of `plan` in an order that respects every edge.
pub fn execution_order(plan: &RollbackPlan) -> Result<Vec<String>, RollbackBuildError> {
    let mut graph = DiGraph::<&str, ()>::new();
    let indices: HashMap<&str, _> = plan
        .plan_nodes
        .iter()
        .map(|n| (n.id.as_str(), graph.add_node(n.id.as_str())))
        .collect();
    for edge in &plan.edges {
        if let (Some(from), Some(to)) = (indices.get(edge.from.as_str()), indices.get(edge.to.as_str())) {
            graph.add_edge(*from, *to, ());
        }
    }
    let sorted = toposort(&graph, None)
        .map_err(|cycle| RollbackBuildError::Cycle(graph[cycle.node_id()].to_string()))?;
    Ok(sorted.into_iter().map(|idx| graph[idx].to_string()).collect())
}

// ---------------------------------------------------------------------------
// Accumulator
// ---------------------------------------------------------------------------

/// State of one build call.
struct Accumulator<'r> {
    registry: &'r StepRegistry,
    plan_nodes: Vec<PlanNode>,
    nodes: Vec<RollbackNode>,
    edges: Vec<RollbackEdge>,
    seen: HashSet<String>,
    parallel_blocks: usize,
}

impl<'r> Accumulator<'r> {
    fn new(registry: &'r StepRegistry) -> Self {
        Self {
            registry,
            plan_nodes: Vec::new(),
            nodes: Vec::new(),
            edges: Vec::new(),
            seen: HashSet::new(),
            parallel_blocks: 0,
        }
    }

    fn finish(self, root_id: String) -> RollbackPlan {
        RollbackPlan {
            root_node_id: Some(root_id),
            nodes: self.nodes,
            plan_nodes: self.plan_nodes,
            edges: self.edges,
        }
    }

    fn add(&mut self, node: PlanNode) -> Result<(), RollbackBuildError> {
        if !self.seen.insert(node.id.clone()) {
            return Err(RollbackBuildError::DuplicateNode(node.id));
        }
        self.plan_nodes.push(node);
        Ok(())
    }

    fn edge(&mut self, from: &str, to: &str) {
        self.edges.push(RollbackEdge {
            from: from.to_string(),
            to: to.to_string(),
        });
    }

    /// Children finish before their parent; consecutive ones finish in order.
    fn link_children(&mut self, parent: &str, children: &[String], sequential: bool) {
        if sequential {
            for pair in children.windows(2) {
                self.edge(&pair[0], &pair[1]);
            }
        }
        for child in children {
            self.edge(child, parent);
        }
    }

    /// Record a structural rollback node and return it as a child entry for
    /// its parent.
    fn record(
        &mut self,
        node_id: String,
        identifier: &str,
        dependent_node_identifier: Option<String>,
        always_run: bool,
        kind: RollbackNodeKind,
    ) -> RollbackChild {
        self.nodes.push(RollbackNode {
            node_id: node_id.clone(),
            identifier: identifier.to_string(),
            dependent_node_identifier: dependent_node_identifier.clone(),
            always_run,
            kind,
        });
        RollbackChild {
            node_id,
            dependent_node_identifier,
            always_run,
        }
    }

    /// Add an optional chain or fan-out node over `children`.
    fn optional_chain(
        &mut self,
        node_id: &str,
        node: PlanNode,
        children: Vec<RollbackChild>,
    ) -> Result<(), RollbackBuildError> {
        let child_ids: Vec<String> = children.iter().map(|c| c.node_id.clone()).collect();
        let sequential = node.mode == ExecutionMode::ChildChain;
        let parameters = serde_json::to_value(RollbackChildren { children })
            .map_err(|e| RollbackBuildError::Parse(e.to_string()))?;
        self.add(
            node.with_children(child_ids.iter().cloned())
                .with_parameters(parameters),
        )?;
        self.link_children(node_id, &child_ids, sequential);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Structural rollback (step groups and parallel blocks)
    // -----------------------------------------------------------------------

    /// Rollback contributions of the step groups and parallel blocks in
    /// `elements`, latest first.
    fn scope_rollback(
        &mut self,
        elements: &[ExecutionElement],
        id_prefix: &str,
        fqn_prefix: &str,
    ) -> Result<Vec<RollbackChild>, RollbackBuildError> {
        let mut children = Vec::new();
        for element in elements.iter().rev() {
            let contribution = match element {
                ExecutionElement::StepGroup(group) => {
                    self.group_rollback(group, id_prefix, fqn_prefix)?
                }
                ExecutionElement::Parallel(items) => {
                    self.parallel_rollback(items, id_prefix, fqn_prefix)?
                }
                ExecutionElement::Step(_) => None,
            };
            children.extend(contribution);
        }
        Ok(children)
    }

    fn group_rollback(
        &mut self,
        group: &StepGroupElement,
        id_prefix: &str,
        fqn_prefix: &str,
    ) -> Result<Option<RollbackChild>, RollbackBuildError> {
        let group_id = format!("{id_prefix}.{}", group.identifier);
        let group_fqn = format!("{fqn_prefix}.{}", group.identifier);

        let mut children =
            self.scope_rollback(&group.steps, &group_id, &format!("{group_fqn}.steps"))?;
        if !group.rollback_steps.is_empty() {
            let node_id =
                self.rollback_steps(&group.rollback_steps, &format!("{group_id}.{ROLLBACK_STEPS}"))?;
            children.push(RollbackChild {
                node_id,
                dependent_node_identifier: None,
                always_run: true,
            });
        }
        if children.is_empty() {
            return Ok(None);
        }

        let node_id = format!("{group_id}.rollback");
        let mut node = PlanNode::new(
            node_id.clone(),
            group.identifier.clone(),
            ROLLBACK_OPTIONAL_CHILD_CHAIN,
            ExecutionMode::ChildChain,
        )
        .with_group(STEP_GROUP);
        if let Some(name) = &group.name {
            node = node.with_name(name.clone());
        }
        self.optional_chain(&node_id, node, children)?;
        Ok(Some(self.record(
            node_id,
            &group.identifier,
            Some(group_fqn),
            false,
            RollbackNodeKind::StepGroup,
        )))
    }

    fn parallel_rollback(
        &mut self,
        items: &[ExecutionElement],
        id_prefix: &str,
        fqn_prefix: &str,
    ) -> Result<Option<RollbackChild>, RollbackBuildError> {
        let mut children = Vec::new();
        for item in items {
            if let ExecutionElement::StepGroup(group) = item {
                children.extend(self.group_rollback(group, id_prefix, fqn_prefix)?);
            }
        }
        if children.is_empty() {
            return Ok(None);
        }

        self.parallel_blocks += 1;
        let identifier = format!("parallel{}", self.parallel_blocks);
        let node_id = format!("{id_prefix}.{identifier}.rollback");
        self.optional_chain(
            &node_id,
            PlanNode::new(
                node_id.clone(),
                identifier.clone(),
                ROLLBACK_OPTIONAL_CHILDREN,
                ExecutionMode::Children,
            )
            .skipping_expression_chain(),
            children,
        )?;
        Ok(Some(self.record(
            node_id,
            &identifier,
            None,
            true,
            RollbackNodeKind::Parallel,
        )))
    }

    // -----------------------------------------------------------------------
    // Executable rollback steps
    // -----------------------------------------------------------------------

    /// Compile a `rollbackSteps` list into a `SECTION_CHAIN` node with id
    /// `node_id` and return that id.
    fn rollback_steps(
        &mut self,
        elements: &[ExecutionElement],
        node_id: &str,
    ) -> Result<String, RollbackBuildError> {
        let children = self.compile_elements(elements, node_id)?;
        self.section(node_id, ROLLBACK_STEPS, None, children)?;
        Ok(node_id.to_string())
    }

    fn section(
        &mut self,
        node_id: &str,
        identifier: &str,
        group: Option<&str>,
        children: Vec<String>,
    ) -> Result<(), RollbackBuildError> {
        let mut node = PlanNode::new(node_id, identifier, SECTION_CHAIN, ExecutionMode::ChildChain)
            .with_children(children.iter().cloned());
        if let Some(group) = group {
            node = node.with_group(group);
        }
        self.add(node)?;
        self.link_children(node_id, &children, true);
        Ok(())
    }

    fn compile_elements(
        &mut self,
        elements: &[ExecutionElement],
        id_prefix: &str,
    ) -> Result<Vec<String>, RollbackBuildError> {
        let mut ids = Vec::with_capacity(elements.len());
        for element in elements {
            let id = match element {
                ExecutionElement::Step(step) => self.compile_step(step, id_prefix)?,
                ExecutionElement::StepGroup(group) => {
                    let node_id = format!("{id_prefix}.{}", group.identifier);
                    let children = self.compile_elements(&group.steps, &node_id)?;
                    self.section(&node_id, &group.identifier, Some(STEP_GROUP), children)?;
                    node_id
                }
                ExecutionElement::Parallel(items) => {
                    self.parallel_blocks += 1;
                    let identifier = format!("parallel{}", self.parallel_blocks);
                    let node_id = format!("{id_prefix}.{identifier}");
                    let children = self.compile_elements(items, &node_id)?;
                    self.add(
                        PlanNode::new(node_id.clone(), identifier, PARALLEL, ExecutionMode::Children)
                            .with_children(children.iter().cloned())
                            .skipping_expression_chain(),
                    )?;
                    self.link_children(&node_id, &children, false);
                    node_id
                }
            };
            ids.push(id);
        }
        Ok(ids)
    }

    fn compile_step(
        &mut self,
        step: &StepElement,
        id_prefix: &str,
    ) -> Result<String, RollbackBuildError> {
        let mode = self.registry.mode_of(&step.step_type).ok_or_else(|| {
            RollbackBuildError::UnknownStepType {
                identifier: step.identifier.clone(),
                step_type: step.step_type.clone(),
            }
        })?;
        let node_id = format!("{id_prefix}.{}", step.identifier);
        let mut node = PlanNode::new(node_id.clone(), step.identifier.clone(), step.step_type.clone(), mode)
            .with_parameters(step.spec.clone());
        if let Some(name) = &step.name {
            node = node.with_name(name.clone());
        }
        self.add(node)?;
        Ok(node_id)
    }
}
