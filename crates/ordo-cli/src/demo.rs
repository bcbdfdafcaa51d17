//! Bundled demo pipeline: a `SHELL` step type, a stage definition with
//! rollback sections, and a compiler that lays the stage out as a forward
//! plan at `pipeline.stages.<stage>`.
//!
//! The `shell` task handler does not spawn processes; it reports the command
//! it was given as if it had exited 0.

use futures_util::future::BoxFuture;
use ordo_core::rollback::{STAGE_GROUP, STEP_GROUP};
use ordo_core::step::builtin::{PARALLEL, SECTION_CHAIN};
use ordo_core::step::{StepContext, StepError, StepRegistry, TaskExecutable};
use ordo_infra::task::FnHandler;
use ordo_types::plan::{ExecutionMode, Plan, PlanNode};
use ordo_types::response::{ResponseData, ResponseMap, StepResponse};
use ordo_types::rollback::{ExecutionElement, StageSection};
use ordo_types::task::TaskRequest;
use serde::Deserialize;

/// Step type of the demo's delegated shell steps.
pub const SHELL: &str = "SHELL";

/// Task type the `SHELL` step delegates.
pub const SHELL_TASK: &str = "shell";

/// Capability the release step requires from its worker.
pub const K8S_CAPABILITY: &str = "k8s";

pub const DEMO_STAGE: &str = r#"
identifier: deploy
name: Deploy
spec:
  execution:
    steps:
      - stepGroup:
          identifier: build
          steps:
            - step: { identifier: compile, type: SHELL, spec: { command: "cargo build --release" } }
            - parallel:
                - step: { identifier: unit, type: SHELL, spec: { command: "cargo test" } }
                - step: { identifier: lint, type: SHELL, spec: { command: "cargo clippy" } }
          rollbackSteps:
            - step: { identifier: clean, type: SHELL, spec: { command: "cargo clean" } }
      - stepGroup:
          identifier: release
          steps:
            - step:
                identifier: apply
                type: SHELL
                spec: { command: "kubectl apply -f deploy.yaml", requires: [k8s] }
          rollbackSteps:
            - step:
                identifier: undo_apply
                type: SHELL
                spec: { command: "kubectl rollout undo deployment/app" }
    rollbackSteps:
      - step: { identifier: notify, type: SHELL, spec: { command: "echo rolled back" } }
"#;

#[derive(Debug, Deserialize)]
struct ShellSpec {
    command: String,
    #[serde(default)]
    requires: Vec<String>,
    #[serde(default)]
    timeout_secs: Option<u64>,
}

/// `SHELL`: delegates its command as a `shell` task.
pub struct Shell;

impl TaskExecutable for Shell {
    fn obtain_task<'a>(&'a self, ctx: &'a StepContext) -> BoxFuture<'a, Result<TaskRequest, StepError>> {
        Box::pin(async move {
            let spec: ShellSpec = ctx.parameters()?;
            let mut task = TaskRequest::new(SHELL_TASK, serde_json::json!({ "command": spec.command }))
                .with_capabilities(spec.requires);
            if let Some(timeout_secs) = spec.timeout_secs {
                task = task.with_timeout_secs(timeout_secs);
            }
            Ok(task)
        })
    }

    fn handle_task_result<'a>(
        &'a self,
        _ctx: &'a StepContext,
        responses: &'a ResponseMap,
    ) -> BoxFuture<'a, Result<StepResponse, StepError>> {
        Box::pin(async move {
            match responses.values().next() {
                Some(ResponseData::Task { data, .. }) => Ok(StepResponse::succeeded_with(data.clone())),
                _ => Err(StepError::Failed("shell task returned no result".to_string())),
            }
        })
    }
}

/// Built-in structural steps plus `SHELL`.
pub fn registry() -> StepRegistry {
    let mut registry = StepRegistry::with_builtins();
    registry.register_task(SHELL, Shell);
    registry
}

/// Handler for `shell` tasks.
pub fn shell_handler() -> FnHandler<fn(&TaskRequest) -> Result<serde_json::Value, String>> {
    FnHandler(simulate_shell)
}

fn simulate_shell(request: &TaskRequest) -> Result<serde_json::Value, String> {
    let command = request
        .parameters
        .get("command")
        .and_then(|c| c.as_str())
        .ok_or_else(|| "shell task without a command".to_string())?;
    tracing::info!(command, "running shell task");
    Ok(serde_json::json!({ "command": command, "exit_code": 0 }))
}

// ---------------------------------------------------------------------------
// Forward plan
// ---------------------------------------------------------------------------

fn chain(id: &str, identifier: &str, children: Vec<String>) -> PlanNode {
    PlanNode::new(id, identifier, SECTION_CHAIN, ExecutionMode::ChildChain).with_children(children)
}

/// Lay `stage` out as a plan rooted at `pipeline`, so the FQN of its step
/// groups is `pipeline.stages.<stage>.spec.execution.steps.<group>` and a
/// group's own steps sit under `<group>.steps`.
pub fn forward_plan(stage: &StageSection, registry: &StepRegistry) -> anyhow::Result<Plan> {
    let stage_id = stage.identifier.as_str();
    let mut nodes = Vec::new();
    let steps = compile(&stage.spec.execution.steps, "steps", registry, &mut nodes)?;

    nodes.push(chain("pipeline", "pipeline", vec!["stages".to_string()]));
    nodes.push(chain("stages", "stages", vec![stage_id.to_string()]));
    nodes.push(chain(stage_id, stage_id, vec!["spec".to_string()]).with_group(STAGE_GROUP));
    nodes.push(chain("spec", "spec", vec!["execution".to_string()]));
    nodes.push(chain("execution", "execution", vec!["steps".to_string()]));
    nodes.push(chain("steps", "steps", steps));

    Ok(Plan::new("pipeline", nodes))
}

fn compile(
    elements: &[ExecutionElement],
    prefix: &str,
    registry: &StepRegistry,
    nodes: &mut Vec<PlanNode>,
) -> anyhow::Result<Vec<String>> {
    let mut ids = Vec::with_capacity(elements.len());
    for (index, element) in elements.iter().enumerate() {
        let id = match element {
            ExecutionElement::Step(step) => {
                let mode = registry.mode_of(&step.step_type).ok_or_else(|| {
                    anyhow::anyhow!("step '{}' uses unknown type '{}'", step.identifier, step.step_type)
                })?;
                let id = format!("{prefix}.{}", step.identifier);
                nodes.push(
                    PlanNode::new(id.clone(), step.identifier.clone(), step.step_type.clone(), mode)
                        .with_parameters(step.spec.clone()),
                );
                id
            }
            ExecutionElement::StepGroup(group) => {
                let id = format!("{prefix}.{}", group.identifier);
                let steps_id = format!("{id}.steps");
                let children = compile(&group.steps, &steps_id, registry, nodes)?;
                nodes.push(chain(&steps_id, "steps", children));
                nodes.push(chain(&id, &group.identifier, vec![steps_id]).with_group(STEP_GROUP));
                id
            }
            ExecutionElement::Parallel(members) => {
                let id = format!("{prefix}.parallel{index}");
                let children = compile(members, &id, registry, nodes)?;
                nodes.push(
                    PlanNode::new(id.clone(), "parallel", PARALLEL, ExecutionMode::Children)
                        .with_children(children)
                        .skipping_expression_chain(),
                );
                id
            }
        };
        ids.push(id);
    }
    Ok(ids)
}
