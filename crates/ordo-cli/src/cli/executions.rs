//! `ordo executions`: list the node executions of a plan execution.

use anyhow::{Context, Result};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use ordo_core::repository::NodeExecutionRepository;
use ordo_infra::sqlite::node_execution::SqliteNodeExecutionRepository;
use ordo_types::execution::{NodeExecution, Status};
use uuid::Uuid;

use crate::state::AppState;

/// Handle `ordo executions <plan_execution_id>`.
pub async fn handle_executions(state: &AppState, plan_execution_id: &str, json: bool) -> Result<()> {
    let id = Uuid::parse_str(plan_execution_id)
        .with_context(|| format!("invalid plan execution id '{plan_execution_id}'"))?;
    let repo = SqliteNodeExecutionRepository::new(state.db_pool.clone());

    let nodes = repo
        .list_by_plan_execution(id)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to list node executions: {e}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&nodes)?);
        return Ok(());
    }

    if nodes.is_empty() {
        println!();
        println!("  No node executions for plan execution {id}.");
        println!("  Start one with: {}", style("ordo demo").dim());
        println!();
        return Ok(());
    }

    println!();
    println!("{}", node_table(&nodes));
    println!();
    Ok(())
}

fn status_cell(status: Status) -> Cell {
    let color = match status {
        Status::Succeeded => Color::Green,
        Status::Failed | Status::Expired => Color::Red,
        Status::Aborted => Color::Magenta,
        Status::Suspended => Color::DarkGrey,
        s if s.is_waiting() => Color::Yellow,
        _ => Color::Blue,
    };
    Cell::new(status.as_str()).fg(color)
}

/// Table of node executions in creation order, one row each.
pub(crate) fn node_table(nodes: &[NodeExecution]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("FQN").fg(Color::Cyan),
            Cell::new("Status"),
            Cell::new("Mode"),
            Cell::new("Responses"),
            Cell::new("Failure"),
        ]);

    for node in nodes {
        let mode = node.latest_response().map(|r| r.kind()).unwrap_or("-");
        let failure = node
            .failure
            .as_ref()
            .map(|f| f.message.clone())
            .unwrap_or_default();
        table.add_row(vec![
            Cell::new(node.fqn()),
            status_cell(node.status),
            Cell::new(mode),
            Cell::new(node.executable_responses.len()),
            Cell::new(failure),
        ]);
    }
    table
}
