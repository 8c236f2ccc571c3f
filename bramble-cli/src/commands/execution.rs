//! Execution command handlers
//!
//! Starting executions, checking on one, and listing them.

use anyhow::{Context, Result, bail};
use bramble_client::ClusterClient;
use bramble_core::domain::execution::{Execution, ExecutionSpec, Phase};
use bramble_core::domain::meta::ObjectKey;
use bramble_core::dto::execution::ExecutionSummary;
use bramble_core::naming;
use colored::*;
use uuid::Uuid;

use crate::config::Config;

/// Arguments of `bramble run`
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub pipeline: String,
    pub repo: String,
    pub branch: String,
    pub clone_dir: String,
    pub name: Option<String>,
}

/// Creates an execution for an existing pipeline
pub async fn run(client: &dyn ClusterClient, config: &Config, request: RunRequest) -> Result<()> {
    let pipeline_key = ObjectKey::new(config.namespace.as_str(), request.pipeline.as_str());
    let pipeline = client
        .get_pipeline(&pipeline_key)
        .await
        .context("Failed to look up pipeline")?;

    match pipeline {
        None => bail!("Pipeline {} not found", pipeline_key),
        Some(pipeline) => {
            if let Err(e) = pipeline.spec.validate() {
                bail!("Pipeline {} is invalid: {}", pipeline_key, e);
            }
        }
    }

    let execution = build_execution(&config.namespace, request, Uuid::new_v4());
    let created = client
        .create_execution(&execution)
        .await
        .with_context(|| format!("Failed to create execution {}", execution.key()))?;

    println!(
        "{} Execution {} created",
        "✓".green(),
        created.key().to_string().cyan()
    );
    println!(
        "  Follow it with: {}",
        format!("bramble -n {} status {}", created.namespace(), created.name()).dimmed()
    );

    Ok(())
}

/// Shows one execution in detail
pub async fn status(client: &dyn ClusterClient, config: &Config, name: &str) -> Result<()> {
    let Some(key) = ObjectKey::parse(name, &config.namespace) else {
        bail!("Invalid execution name '{}'", name);
    };

    let execution = client
        .get_execution(&key)
        .await
        .context("Failed to fetch execution")?;

    match execution {
        Some(execution) => {
            print_execution_details(&execution);
            Ok(())
        }
        None => bail!("Execution {} not found", key),
    }
}

/// Lists executions in the configured namespace, or everywhere
pub async fn list(
    client: &dyn ClusterClient,
    config: &Config,
    all_namespaces: bool,
    json: bool,
) -> Result<()> {
    let namespace = (!all_namespaces).then_some(config.namespace.as_str());
    let executions = client
        .list_executions(namespace)
        .await
        .context("Failed to list executions")?;
    let summaries: Vec<ExecutionSummary> = executions.iter().map(ExecutionSummary::from).collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }

    if summaries.is_empty() {
        println!("{}", "No executions found.".yellow());
        return Ok(());
    }

    println!(
        "{}",
        format!("Found {} execution(s):", summaries.len()).bold()
    );
    println!();
    for summary in &summaries {
        print_execution_summary(summary);
    }

    Ok(())
}

/// Builds the execution to submit
///
/// Without an explicit name, the execution is named after the pipeline
/// with a short random suffix.
fn build_execution(namespace: &str, request: RunRequest, nonce: Uuid) -> Execution {
    let name = request.name.unwrap_or_else(|| {
        let suffix = nonce.simple().to_string();
        format!("{}-{}", naming::sanitize(&request.pipeline), &suffix[..8])
    });

    Execution::namespaced(
        namespace,
        &name,
        ExecutionSpec {
            pipeline: request.pipeline,
            repo: request.repo,
            branch: request.branch,
            clone_dir: request.clone_dir,
        },
    )
}

fn colorize_phase(phase: Phase) -> ColoredString {
    let text = phase.to_string();
    match phase {
        Phase::Init => text.dimmed(),
        Phase::VolumeProvisioned | Phase::RepoCloned => text.cyan(),
        Phase::Executing => text.yellow(),
        Phase::Completed => text.green(),
        Phase::Error => text.red(),
    }
}

fn print_execution_summary(summary: &ExecutionSummary) {
    println!(
        "  {} {}/{}",
        "▸".cyan(),
        summary.namespace.dimmed(),
        summary.name.bold()
    );
    println!("    Pipeline: {}", summary.pipeline);
    println!("    Phase:    {}", colorize_phase(summary.phase));
    if let Some(failure) = &summary.failure {
        println!("    Failure:  {}", failure.red());
    }
    println!();
}

fn print_execution_details(execution: &Execution) {
    let status = execution.status();

    println!("{}", "Execution Details:".bold());
    println!("  Name:      {}", execution.key().to_string().cyan());
    println!("  Pipeline:  {}", execution.spec.pipeline);
    println!("  Repo:      {}", execution.spec.repo);
    println!("  Branch:    {}", execution.spec.branch);
    println!("  Clone dir: {}", execution.clone_dir().dimmed());
    println!("  Phase:     {}", colorize_phase(status.phase()));
    if let Some(created) = &execution.metadata.creation_timestamp {
        println!("  Created:   {}", created.0.format("%Y-%m-%d %H:%M:%S"));
    }

    println!("\n{}", "Progress:".bold());
    println!("  Volume:    {}", check(status.volume_provisioned));
    println!("  Cloned:    {}", check(status.repo_cloned));
    for task in &status.completed_tasks {
        println!("  {} {}", "✓".green(), task);
    }
    for task in &status.executing {
        println!("  {} {}", "…".yellow(), task);
    }

    if let Some(failure) = &status.failure {
        println!("\n{}", "Failure:".bold());
        println!("  {}", failure.to_string().red());
        println!(
            "  At: {}",
            failure.failed_at.format("%Y-%m-%d %H:%M:%S").to_string().dimmed()
        );
    }
}

fn check(done: bool) -> ColoredString {
    if done { "✓".green() } else { "✗".dimmed() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bramble_client::InMemoryCluster;
    use bramble_core::domain::pipeline::{Pipeline, PipelineSpec, TaskSpec};

    fn request(name: Option<&str>) -> RunRequest {
        RunRequest {
            pipeline: "Nightly_Build".to_string(),
            repo: "git://x/y".to_string(),
            branch: "main".to_string(),
            clone_dir: String::new(),
            name: name.map(str::to_string),
        }
    }

    #[test]
    fn test_build_execution_generates_name() {
        let nonce = Uuid::parse_str("6f1c3f4e-2a55-4c1e-9a3d-0d0b8f7c1a11").unwrap();
        let execution = build_execution("ci", request(None), nonce);

        assert_eq!(execution.name(), "nightly-build-6f1c3f4e");
        assert_eq!(execution.namespace(), "ci");
        assert_eq!(execution.spec.pipeline, "Nightly_Build");
        assert_eq!(execution.clone_dir(), "nightly-build-6f1c3f4e");
        assert!(!execution.status().is_terminal());
    }

    #[test]
    fn test_build_execution_keeps_explicit_name() {
        let execution = build_execution("ci", request(Some("release-42")), Uuid::new_v4());
        assert_eq!(execution.name(), "release-42");
    }

    fn config() -> Config {
        Config {
            namespace: "ci".to_string(),
            api_url: None,
            token: None,
        }
    }

    #[tokio::test]
    async fn test_run_requires_valid_pipeline() {
        let cluster = InMemoryCluster::new();
        let err = run(&cluster, &config(), request(Some("r1"))).await.unwrap_err();
        assert!(err.to_string().contains("not found"));

        cluster.insert_pipeline(Pipeline::namespaced(
            "ci",
            "Nightly_Build",
            PipelineSpec {
                tasks: vec![TaskSpec::new("a", "alpine").depends_on("a")],
            },
        ));
        let err = run(&cluster, &config(), request(Some("r1"))).await.unwrap_err();
        assert!(err.to_string().contains("invalid"));
        assert!(cluster.list_executions(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_creates_execution() {
        let cluster = InMemoryCluster::new();
        cluster.insert_pipeline(Pipeline::namespaced(
            "ci",
            "Nightly_Build",
            PipelineSpec {
                tasks: vec![TaskSpec::new("build", "rust:1")],
            },
        ));

        run(&cluster, &config(), request(Some("r1"))).await.unwrap();
        let stored = cluster.execution(&ObjectKey::new("ci", "r1")).unwrap();
        assert_eq!(stored.spec.repo, "git://x/y");
        assert!(stored.metadata.uid.is_some());

        // Same name again is rejected by the cluster
        assert!(run(&cluster, &config(), request(Some("r1"))).await.is_err());
        status(&cluster, &config(), "ci/r1").await.unwrap();
        assert!(status(&cluster, &config(), "missing").await.is_err());
    }
}
