//! `ordo rollback-plan`: build and print the rollback plan of a stage.

use std::path::Path;

use anyhow::{Context, Result};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use ordo_core::rollback::{build_rollback_plan, build_rollback_plan_at, execution_order, parse_stage};
use ordo_types::rollback::RollbackPlan;

use crate::demo;

/// Handle `ordo rollback-plan <file>`.
pub fn handle_rollback_plan(file: &Path, stage_fqn: Option<&str>, json: bool) -> Result<()> {
    let yaml = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let stage = parse_stage(&yaml)?;
    let registry = demo::registry();

    let plan = match stage_fqn {
        Some(fqn) => build_rollback_plan_at(&stage, fqn, &registry)?,
        None => build_rollback_plan(&stage, &registry)?,
    };
    let order = execution_order(&plan)?;

    if json {
        let out = serde_json::json!({
            "stage": stage.identifier,
            "plan": plan,
            "execution_order": order,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if plan.is_empty() {
        println!();
        println!(
            "  Stage {} declares no rollback steps; nothing to roll back.",
            style(&stage.identifier).bold()
        );
        println!();
        return Ok(());
    }

    println!();
    println!(
        "  Rollback plan for stage {} ({} plan nodes)",
        style(&stage.identifier).bold(),
        plan.plan_nodes.len()
    );
    println!();
    println!("{}", rollback_table(&plan));
    println!();
    println!("  {}", style("Execution order").bold());
    for (position, node_id) in order.iter().enumerate() {
        println!("  {:>3}. {node_id}", position + 1);
    }
    println!();
    Ok(())
}

fn rollback_table(plan: &RollbackPlan) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Node").fg(Color::Cyan),
            Cell::new("Kind"),
            Cell::new("Depends On"),
            Cell::new("Always Run"),
        ]);

    for node in &plan.nodes {
        let kind = serde_json::to_value(node.kind)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        table.add_row(vec![
            Cell::new(&node.node_id),
            Cell::new(kind),
            Cell::new(node.dependent_node_identifier.as_deref().unwrap_or("-")),
            Cell::new(if node.always_run { "yes" } else { "no" }),
        ]);
    }
    table
}
