//! Task commands - run a task and print a summary

use super::{load_builder, Options};
use anyhow::Result;
use colored::Colorize;
use kiln_build::{BuildError, BuildOutcome, Builder};
use serde_json::{json, Value};

/// Run `task` in the project selected by `options`
pub async fn run(task: &str, options: &Options) -> Result<()> {
    let builder = load_builder(options)?;
    run_with(&builder, task, options).await
}

/// Run `task` on an already loaded builder
pub async fn run_with(builder: &Builder, task: &str, options: &Options) -> Result<()> {
    match builder.run(task).await {
        Ok(outcome) => {
            if options.json {
                println!("{}", summary_json(&outcome));
            } else if !options.quiet {
                print_summary(&outcome);
            }
            Ok(())
        }
        Err(error) => {
            if options.json {
                println!("{}", failure_json(task, &error));
            } else if !options.quiet && !error.is_configuration_error() {
                print_failure(task, &error);
            }
            Err(error.into())
        }
    }
}

pub fn summary_json(outcome: &BuildOutcome) -> Value {
    let pipelines = outcome.pipelines();
    json!({
        "success": true,
        "task": outcome.run.task,
        "mode": outcome.run.mode.name(),
        "total_time": outcome.run.total_time.as_secs_f64(),
        "tasks": outcome.run.executed.iter().map(|record| json!({
            "name": record.name,
            "duration": record.duration.as_secs_f64(),
        })).collect::<Vec<_>>(),
        "files_written": outcome.files_written(),
        "maps_written": outcome.maps_written(),
        "unchanged": pipelines.iter().map(|p| p.unchanged).sum::<usize>(),
        "failures": pipelines.iter().flat_map(|p| &p.failures).map(|failure| json!({
            "file": failure.file.display().to_string(),
            "step": failure.step,
            "message": failure.message,
        })).collect::<Vec<_>>(),
        "cleaned": outcome.outputs.clean.as_ref().map(|clean| {
            clean.removed.iter().map(|p| p.display().to_string()).collect::<Vec<_>>()
        }),
        "bundle": outcome.outputs.bundle.as_ref().map(|bundle| bundle.output.display().to_string()),
    })
}

fn failure_json(task: &str, error: &BuildError) -> Value {
    let failed_task = match error {
        BuildError::TaskFailed { task, .. } => task.as_str(),
        _ => task,
    };
    json!({
        "success": false,
        "task": task,
        "failed_task": failed_task,
        "configuration_error": error.is_configuration_error(),
        "error": error.to_string(),
    })
}

fn print_summary(outcome: &BuildOutcome) {
    let run = &outcome.run;
    println!("\n{}", "=".repeat(60));
    println!(
        "Task '{}' {} in {:.2}s",
        run.task,
        "succeeded".green().bold(),
        run.total_time.as_secs_f64()
    );
    println!("{}", "=".repeat(60));
    println!("  Mode: {}", run.mode);
    let names: Vec<&str> = run.executed.iter().map(|r| r.name.as_str()).collect();
    if !names.is_empty() {
        println!("  Tasks: {}", names.join(", "));
    }
    println!("  Files written: {}", outcome.files_written());
    if run.mode.is_full() {
        println!("  Source maps: {}", outcome.maps_written());
    }

    let unchanged: usize = outcome.pipelines().iter().map(|p| p.unchanged).sum();
    if unchanged > 0 {
        println!("  Up to date: {}", unchanged);
    }
    if let Some(clean) = &outcome.outputs.clean {
        println!("  Cleaned: {} path(s)", clean.removed.len());
    }
    if let Some(bundle) = &outcome.outputs.bundle {
        println!("  Bundle: {}", bundle.output.display());
    }

    let failures: Vec<_> = outcome
        .pipelines()
        .iter()
        .flat_map(|p| &p.failures)
        .collect();
    if !failures.is_empty() {
        println!("  {}: {}", "Skipped".yellow().bold(), failures.len());
        for failure in failures {
            println!("    {}", failure);
        }
    }
    println!("{}", "=".repeat(60));
}

fn print_failure(task: &str, error: &BuildError) {
    println!("\n{}", "=".repeat(60));
    println!("Task '{}' {}", task, "FAILED".red().bold());
    println!("{}", "=".repeat(60));
    if let BuildError::TaskFailed { task: failed, .. } = error {
        if failed != task {
            println!("  Failed task: {}", failed);
        }
    }
    println!("{}", "=".repeat(60));
}
