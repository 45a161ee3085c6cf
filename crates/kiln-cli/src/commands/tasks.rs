//! Tasks command - list tasks or show an execution plan

use super::{load_builder, Options};
use anyhow::Result;
use colored::Colorize;
use kiln_build::{default_mode_for, Builder, Declarations};
use serde_json::json;
use std::path::PathBuf;

/// List the standard tasks, or print the waves `plan` would run
///
/// Works outside a project too: the task graph does not depend on what the
/// project declares.
pub fn run(plan: Option<&str>, options: &Options) -> Result<()> {
    let builder = match load_builder(options) {
        Ok(builder) => builder,
        Err(e) => {
            tracing::debug!("{:#}", e);
            Builder::from_declarations(PathBuf::from("."), PathBuf::from("wwwroot"), Declarations::new())?
                .with_mode(options.mode)
        }
    };

    match plan {
        Some(task) => print_plan(&builder, task, options),
        None => print_tasks(&builder, options),
    }
}

fn print_tasks(builder: &Builder, options: &Options) -> Result<()> {
    let tasks = builder.tasks()?;

    if options.json {
        let tasks: Vec<_> = tasks
            .iter()
            .map(|(name, description)| {
                json!({
                    "name": name,
                    "description": description,
                    "mode": default_mode_for(name).name(),
                })
            })
            .collect();
        println!("{}", json!({ "tasks": tasks }));
        return Ok(());
    }

    let width = tasks.iter().map(|(name, _)| name.len()).max().unwrap_or(0);
    println!("{}", "Available tasks:".bold());
    for (name, description) in &tasks {
        let mode = if default_mode_for(name).is_full() {
            " (full)"
        } else {
            ""
        };
        let padded = format!("{:width$}", name, width = width);
        println!("  {}  {}{}", padded.cyan(), description, mode);
    }
    Ok(())
}

fn print_plan(builder: &Builder, task: &str, options: &Options) -> Result<()> {
    let waves = builder.plan(task)?;
    let mode = builder.mode_for(task);

    if options.json {
        println!(
            "{}",
            json!({ "task": task, "mode": mode.name(), "waves": waves })
        );
        return Ok(());
    }

    println!("Execution plan for '{}' ({} mode):", task.bold(), mode);
    for (index, wave) in waves.iter().enumerate() {
        println!("  {}. {}", index + 1, wave.join(", "));
    }
    Ok(())
}
