//! `ordo demo`: run the bundled pipeline, and its rollback when it fails.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use console::style;
use ordo_core::engine::{OrchestrationEngine, PlanExecution};
use ordo_core::event::{EventBus, wait_for_plan};
use ordo_core::repository::NodeExecutionRepository;
use ordo_core::rollback::{build_rollback_plan, parse_stage};
use ordo_core::task::BoxTaskExecutor;
use ordo_core::wait_notify::WaitNotifyEngine;
use ordo_infra::sqlite::node_execution::SqliteNodeExecutionRepository;
use ordo_infra::task::LocalTaskExecutor;
use ordo_types::ambiance::ACCOUNT_ID_KEY;
use ordo_types::execution::Status;
use tokio_util::sync::CancellationToken;

use super::executions::node_table;
use crate::demo;
use crate::state::AppState;

const PLAN_TIMEOUT: Duration = Duration::from_secs(60);

/// Handle `ordo demo`.
pub async fn handle_demo(state: &AppState, fail: bool, json: bool) -> Result<()> {
    let registry = demo::registry();
    let stage = parse_stage(demo::DEMO_STAGE)?;
    let plan = demo::forward_plan(&stage, &registry)?;
    let rollback = build_rollback_plan(&stage, &registry)?;

    let repo = Arc::new(SqliteNodeExecutionRepository::new(state.db_pool.clone()));
    let (wait_notify, queue) = WaitNotifyEngine::channel_with_retention(
        state.config.queue_capacity,
        state.config.notify_retention,
    );

    let mut executor = LocalTaskExecutor::from_config(&state.config.local_executor, Arc::clone(&wait_notify))
        .with_handler(demo::SHELL_TASK, demo::shell_handler());
    if !fail {
        executor = executor.with_capability(demo::K8S_CAPABILITY);
    }

    let engine = OrchestrationEngine::builder(repo, wait_notify)
        .registry(registry)
        .events(EventBus::new(state.config.event_capacity))
        .task_executor(BoxTaskExecutor::new(executor))
        .build();
    let cancel = CancellationToken::new();
    let apply_loop = engine.spawn(queue, cancel.clone());

    let mut setup = BTreeMap::new();
    setup.insert(ACCOUNT_ID_KEY.to_string(), "demo".to_string());

    let forward = engine.start_plan(plan, setup.clone()).await?;
    let forward_status = finish(&engine, &forward).await?;

    let mut rollback_run = None;
    if forward_status.is_broken() {
        if let Some(execution) = engine
            .start_rollback(rollback, forward.plan_execution_id, setup)
            .await?
        {
            let status = finish(&engine, &execution).await?;
            rollback_run = Some((execution, status));
        }
    }

    cancel.cancel();
    if let Err(e) = apply_loop.await {
        tracing::warn!(error = %e, "engine apply loop did not stop cleanly");
    }

    if json {
        let out = serde_json::json!({
            "plan_execution_id": forward.plan_execution_id.to_string(),
            "status": forward_status,
            "rollback": rollback_run.as_ref().map(|(execution, status)| serde_json::json!({
                "plan_execution_id": execution.plan_execution_id.to_string(),
                "status": status,
            })),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    print_run(&engine, "Pipeline", &forward, forward_status).await?;
    if let Some((execution, status)) = &rollback_run {
        print_run(&engine, "Rollback", execution, *status).await?;
    }
    println!("  Database: {}", style(state.data_dir.display()).dim());
    println!(
        "  Inspect later with: {}",
        style(format!("ordo executions {}", forward.plan_execution_id)).dim()
    );
    println!();
    Ok(())
}

async fn finish(
    engine: &OrchestrationEngine<SqliteNodeExecutionRepository>,
    execution: &PlanExecution,
) -> Result<Status> {
    let mut events = engine.subscribe();
    // The plan may have finished before we subscribed.
    let root = engine
        .node_execution(execution.root_node_execution_id)
        .await?
        .context("root node execution disappeared")?;
    if root.status.is_terminal() {
        return Ok(root.status);
    }
    match wait_for_plan(&mut events, execution.plan_execution_id, PLAN_TIMEOUT).await {
        Some(status) => Ok(status),
        None => {
            let root = engine.node_execution(execution.root_node_execution_id).await?;
            match root {
                Some(root) if root.status.is_terminal() => Ok(root.status),
                _ => bail!(
                    "plan execution {} did not finish within {}s",
                    execution.plan_execution_id,
                    PLAN_TIMEOUT.as_secs()
                ),
            }
        }
    }
}

async fn print_run(
    engine: &OrchestrationEngine<SqliteNodeExecutionRepository>,
    label: &str,
    execution: &PlanExecution,
    status: Status,
) -> Result<()> {
    let nodes = engine
        .repository()
        .list_by_plan_execution(execution.plan_execution_id)
        .await?;
    let status = if status == Status::Succeeded {
        style(status.as_str()).green()
    } else {
        style(status.as_str()).red()
    };

    println!();
    println!(
        "  {} {} finished {}",
        style(label).bold(),
        style(execution.plan_execution_id).dim(),
        status
    );
    println!("{}", node_table(&nodes));
    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use ordo_types::config::EngineConfig;

    use super::*;

    async fn state(dir: &tempfile::TempDir) -> AppState {
        AppState::init(dir.path().to_path_buf(), EngineConfig::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn demo_succeeds_with_a_capable_worker() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir).await;
        handle_demo(&state, false, true).await.unwrap();
    }

    #[tokio::test]
    async fn failing_demo_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir).await;
        handle_demo(&state, true, false).await.unwrap();

        let rows: Vec<(String, String)> =
            sqlx_rows(&state, "SELECT plan_node_id, status FROM node_executions").await;
        assert!(rows.iter().any(|(id, status)| id == "steps.release.steps.apply" && status == "failed"));
        assert!(rows.iter().any(|(id, status)| id == "deploy.rollback" && status == "succeeded"));
        // `build` ran, so its rollback ran too.
        assert!(rows.iter().any(|(id, _)| id == "deploy.build.rollbackSteps.clean"));
    }

    async fn sqlx_rows(state: &AppState, sql: &str) -> Vec<(String, String)> {
        sqlx::query_as(sql).fetch_all(&state.db_pool.reader).await.unwrap()
    }
}
