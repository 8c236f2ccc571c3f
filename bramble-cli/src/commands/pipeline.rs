//! Pipeline command handlers

use anyhow::{Context, Result};
use bramble_client::ClusterClient;
use bramble_core::dto::pipeline::PipelineSummary;
use colored::*;

use crate::config::Config;

/// List pipelines in the configured namespace
pub async fn list(client: &dyn ClusterClient, config: &Config) -> Result<()> {
    let pipelines = client
        .list_pipelines(&config.namespace)
        .await
        .context("Failed to list pipelines")?;

    if pipelines.is_empty() {
        println!(
            "{}",
            format!("No pipelines found in namespace {}.", config.namespace).yellow()
        );
        return Ok(());
    }

    println!(
        "{}",
        format!("Found {} pipeline(s):", pipelines.len()).bold()
    );
    println!();
    for pipeline in &pipelines {
        let valid = pipeline.spec.validate();
        print_pipeline(&PipelineSummary::from(pipeline));
        if let Err(e) = valid {
            println!("    {} {}", "✗".red(), e.to_string().red());
        }
        println!();
    }

    Ok(())
}

fn print_pipeline(pipeline: &PipelineSummary) {
    println!("  {} {}", "▸".cyan(), pipeline.name.bold());
    if pipeline.tasks.is_empty() {
        println!("    {}", "(no tasks)".dimmed());
    }
    for task in &pipeline.tasks {
        let deps = if task.depends_on.is_empty() {
            String::new()
        } else {
            format!(" after {}", task.depends_on.join(", "))
        };
        println!("    - {} ({}){}", task.name.cyan(), task.image.dimmed(), deps);
    }
}
