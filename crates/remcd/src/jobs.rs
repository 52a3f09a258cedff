//! `remcd job ...`: one-shot task commands against the local store.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::Subcommand;
use serde::Serialize;

use remc_core::{JobSpec, NodeType, RemcConfig};
use remc_tasks::{Orchestrator, TaskOutcome};

use crate::wiring;

#[derive(Debug, Subcommand)]
pub enum JobCommand {
    /// Create and check a job.
    Create {
        /// JSON job spec. Overrides the individual flags.
        #[arg(long)]
        spec: Option<PathBuf>,

        #[arg(long)]
        id: Option<String>,

        #[arg(long)]
        replicas: Option<u32>,

        #[arg(long, default_value = "vm", value_parser = parse_node_type)]
        node_type: NodeType,

        /// Probability definition sampled by the workers.
        #[arg(long)]
        definition: Option<String>,
    },
    /// List all jobs.
    List,
    /// Show one job.
    Get { id: String },
    /// Create the job's nodes.
    Start {
        id: String,
        /// Watch the job until it finishes.
        #[arg(long)]
        watch: bool,
    },
    /// Delete the job's nodes.
    Stop { id: String },
    /// Stop, then start with new nodes.
    Restart {
        id: String,
        #[arg(long)]
        watch: bool,
    },
    /// Set the worker count of a running job.
    Scale {
        id: String,
        #[arg(allow_negative_numbers = true)]
        replicas: i64,
    },
    /// Watch a running job until its control node finishes.
    Watch { id: String },
    /// List the job's nodes.
    Nodes {
        id: String,
        /// Include nodes that no longer belong to the job.
        #[arg(long)]
        all: bool,
    },
    /// Record a controller iteration.
    Iteration { id: String, tag: String },
}

pub async fn run(config: Arc<RemcConfig>, command: JobCommand) -> anyhow::Result<()> {
    let orchestrator = wiring::orchestrator(config).await?;

    match command {
        JobCommand::Create {
            spec,
            id,
            replicas,
            node_type,
            definition,
        } => {
            let spec = build_spec(spec, replicas, node_type, definition)?;
            let job = match id {
                Some(id) => orchestrator.create_job_with_id(&id, spec)?,
                None => orchestrator.create_job(spec)?,
            };
            print_json(&job)
        }
        JobCommand::List => print_json(&orchestrator.list_jobs()?),
        JobCommand::Get { id } => print_json(&orchestrator.get_job(&id)?),
        JobCommand::Start { id, watch } => {
            finish(&id, orchestrator.start(&id).await?)?;
            if watch {
                return watch_job(&orchestrator, &id).await;
            }
            print_json(&orchestrator.get_job(&id)?)
        }
        JobCommand::Stop { id } => {
            finish(&id, orchestrator.stop(&id).await?)?;
            print_json(&orchestrator.get_job(&id)?)
        }
        JobCommand::Restart { id, watch } => {
            finish(&id, orchestrator.restart(&id).await?)?;
            if watch {
                return watch_job(&orchestrator, &id).await;
            }
            print_json(&orchestrator.get_job(&id)?)
        }
        JobCommand::Scale { id, replicas } => {
            finish(&id, orchestrator.scale(&id, replicas).await?)?;
            print_json(&orchestrator.get_job(&id)?)
        }
        JobCommand::Watch { id } => watch_job(&orchestrator, &id).await,
        JobCommand::Nodes { id, all } => print_json(&orchestrator.list_nodes(&id, all)?),
        JobCommand::Iteration { id, tag } => {
            print_json(&orchestrator.add_controller_iteration(&id, &tag)?)
        }
    }
}

async fn watch_job(orchestrator: &Orchestrator, id: &str) -> anyhow::Result<()> {
    let success = orchestrator.watch(id).await?;
    print_json(&orchestrator.get_job(id)?)?;
    if !success {
        bail!("job {id} failed");
    }
    Ok(())
}

fn finish<T>(id: &str, outcome: TaskOutcome<T>) -> anyhow::Result<T> {
    match outcome {
        TaskOutcome::Done(value) => Ok(value),
        TaskOutcome::Busy => bail!("job {id} is busy, try again later"),
    }
}

fn build_spec(
    path: Option<PathBuf>,
    replicas: Option<u32>,
    node_type: NodeType,
    definition: Option<String>,
) -> anyhow::Result<JobSpec> {
    if let Some(path) = path {
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("read job spec {}", path.display()))?;
        return JobSpec::from_json(&raw).with_context(|| format!("parse job spec {}", path.display()));
    }
    let Some(replicas) = replicas else {
        bail!("--replicas is required without --spec");
    };
    let Some(definition) = definition else {
        bail!("--definition is required without --spec");
    };
    Ok(JobSpec::new(replicas, node_type, &definition))
}

fn parse_node_type(raw: &str) -> Result<NodeType, String> {
    match raw {
        "vm" => Ok(NodeType::Vm),
        "pod" => Ok(NodeType::Pod),
        other => Err(format!("unknown node type {other:?}, expected vm or pod")),
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_type_parsing() {
        assert_eq!(parse_node_type("vm").unwrap(), NodeType::Vm);
        assert_eq!(parse_node_type("pod").unwrap(), NodeType::Pod);
        assert!(parse_node_type("lambda").is_err());
    }

    #[test]
    fn spec_from_flags() {
        let spec = build_spec(None, Some(4), NodeType::Pod, Some("defs/potts.py".into())).unwrap();
        assert_eq!(spec.replicas, 4);
        assert_eq!(spec.node_type, NodeType::Pod);
        assert_eq!(spec.probability_definition, "defs/potts.py");
    }

    #[test]
    fn spec_flags_are_required_without_file() {
        assert!(build_spec(None, None, NodeType::Vm, Some("defs/potts.py".into())).is_err());
        assert!(build_spec(None, Some(2), NodeType::Vm, None).is_err());
    }

    #[test]
    fn spec_from_file_keeps_sampler_parameters() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.json");
        std::fs::write(
            &path,
            r#"{"replicas": 8, "probability_definition": "defs/ising.py", "sweeps": 1000}"#,
        )
        .unwrap();

        let spec = build_spec(Some(path), None, NodeType::Pod, None).unwrap();
        assert_eq!(spec.replicas, 8);
        assert_eq!(spec.node_type, NodeType::Vm);
        assert_eq!(spec.extra["sweeps"], 1000);
    }

    #[test]
    fn busy_outcome_is_an_error() {
        assert_eq!(finish("job-1", TaskOutcome::Done(7)).unwrap(), 7);
        let err = finish::<()>("job-1", TaskOutcome::Busy).unwrap_err();
        assert!(err.to_string().contains("busy"));
    }
}
