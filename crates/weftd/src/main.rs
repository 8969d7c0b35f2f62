//! weftd — the weft application master.
//!
//! Single binary over the allocation engine:
//! - `validate` — load a cluster document and build the engine from it,
//!   surfacing configuration errors with their exit codes
//! - `plan` — print the request/release intents of the first scheduling
//!   tick as JSON
//! - `simulate` — dry-run convergence against an in-process resource
//!   manager, with optional mid-run flexing and container kills
//!
//! # Usage
//!
//! ```text
//! weftd validate --cluster clusters/hbase1.json
//! weftd plan --cluster clusters/hbase1.json --max-memory-mb 8192 --max-vcores 16
//! weftd simulate --cluster clusters/hbase1.json --flex worker=5 --kill 2
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;

use weft_model::document::epoch_millis;
use weft_model::error::{EXIT_BAD_CONFIGURATION, EXIT_INTERNAL_ERROR};
use weft_model::{ClusterDocument, ConfigError};
use weft_state::{AllocationEngine, RoleDefinition, SharedEngine, StateError};

mod sim;

#[derive(Parser)]
#[command(name = "weftd", about = "Weft application master")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a cluster document and the engine built from it.
    Validate {
        /// Path to the cluster document.
        #[arg(long)]
        cluster: PathBuf,

        /// Supported roles as name=priority pairs; defaults to the
        /// document's own roles.
        #[arg(long = "role", value_parser = parse_role_def)]
        roles: Vec<(String, u32)>,
    },

    /// Print the first scheduling tick's intents as JSON.
    Plan {
        /// Path to the cluster document.
        #[arg(long)]
        cluster: PathBuf,

        /// Cluster memory ceiling per container, MB.
        #[arg(long, requires = "max_vcores")]
        max_memory_mb: Option<u32>,

        /// Cluster vcore ceiling per container.
        #[arg(long, requires = "max_memory_mb")]
        max_vcores: Option<u32>,
    },

    /// Dry-run convergence against a simulated resource manager.
    Simulate {
        /// Path to the cluster document.
        #[arg(long)]
        cluster: PathBuf,

        /// Number of simulated hosts.
        #[arg(long, default_value = "4")]
        hosts: u32,

        /// Give up after this many scheduling ticks.
        #[arg(long, default_value = "50")]
        ticks: u32,

        /// Flex to apply once converged, as name=count pairs.
        #[arg(long = "flex", value_parser = parse_role_def)]
        flex: Vec<(String, u32)>,

        /// Containers to kill once converged, to exercise self-healing.
        #[arg(long, default_value = "0")]
        kill: u32,

        /// Save the refreshed cluster document here on shutdown.
        #[arg(long)]
        save: Option<PathBuf>,
    },
}

/// Parse a `name=number` command-line pair.
fn parse_role_def(s: &str) -> Result<(String, u32), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got {s:?}"))?;
    let parsed = value
        .parse::<u32>()
        .map_err(|e| format!("bad value in {s:?}: {e}"))?;
    if name.is_empty() {
        return Err(format!("empty role name in {s:?}"));
    }
    Ok((name.to_string(), parsed))
}

/// Supported role set: explicit overrides, or one role per document
/// entry with priorities in name order.
fn role_definitions(doc: &ClusterDocument, overrides: &[(String, u32)]) -> Vec<RoleDefinition> {
    if overrides.is_empty() {
        doc.role_names()
            .enumerate()
            .map(|(i, name)| RoleDefinition::new(name, i as u32 + 1))
            .collect()
    } else {
        overrides
            .iter()
            .map(|(name, priority)| RoleDefinition::new(name, *priority))
            .collect()
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,weftd=debug,weft=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        eprintln!("weftd: {err:#}");
        std::process::exit(exit_code_for(&err));
    }
}

/// Map failures onto the client exit codes.
fn exit_code_for(err: &anyhow::Error) -> i32 {
    if let Some(config) = err.downcast_ref::<ConfigError>() {
        return config.exit_code();
    }
    if let Some(state) = err.downcast_ref::<StateError>() {
        return match state {
            StateError::Config(config) => config.exit_code(),
            StateError::BadConfiguration(_) | StateError::UnknownRole(_) => {
                EXIT_BAD_CONFIGURATION
            }
            _ => EXIT_INTERNAL_ERROR,
        };
    }
    EXIT_INTERNAL_ERROR
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Validate { cluster, roles } => {
            let doc = ClusterDocument::load(&cluster)?;
            let supported = role_definitions(&doc, &roles);
            let engine = AllocationEngine::build(doc, &supported)?;

            println!("cluster document {} is valid", cluster.display());
            for role in engine.roles().iter() {
                println!(
                    "  role {} (priority {}): desired {}",
                    role.name(),
                    role.id(),
                    role.desired()
                );
            }
            Ok(())
        }

        Command::Plan {
            cluster,
            max_memory_mb,
            max_vcores,
        } => {
            let doc = ClusterDocument::load(&cluster)?;
            let supported = role_definitions(&doc, &[]);
            let mut engine = AllocationEngine::build(doc, &supported)?;
            if let (Some(memory), Some(vcores)) = (max_memory_mb, max_vcores) {
                engine.set_container_limits(memory, vcores);
            }

            let outcome = engine.review_request_state();
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            Ok(())
        }

        Command::Simulate {
            cluster,
            hosts,
            ticks,
            flex,
            kill,
            save,
        } => {
            let doc = ClusterDocument::load(&cluster)?;
            let supported = role_definitions(&doc, &[]);
            let engine = SharedEngine::new(AllocationEngine::build(doc, &supported)?);

            let opts = sim::SimOptions {
                hosts,
                max_ticks: ticks,
                flex: (!flex.is_empty())
                    .then(|| flex.iter().cloned().collect::<BTreeMap<String, u32>>()),
                kill,
            };
            let mut rm = sim::SimResourceManager::new(hosts);
            let status = sim::run(&engine, &mut rm, &opts).await?;

            println!("{}", serde_json::to_string_pretty(&status)?);

            if let Some(path) = save {
                let doc = engine.refresh_document(epoch_millis());
                doc.save(&path)?;
                info!(path = %path.display(), "cluster document saved");
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_def_parser_accepts_pairs() {
        assert_eq!(
            parse_role_def("worker=3").unwrap(),
            ("worker".to_string(), 3)
        );
        assert!(parse_role_def("worker").is_err());
        assert!(parse_role_def("worker=three").is_err());
        assert!(parse_role_def("=3").is_err());
    }

    #[test]
    fn default_roles_come_from_the_document() {
        let mut doc = ClusterDocument::new("t");
        doc.set_desired_instances("master", 1);
        doc.set_desired_instances("worker", 2);

        let defs = role_definitions(&doc, &[]);
        assert_eq!(defs.len(), 2);
        // BTreeMap order: master before worker.
        assert_eq!(defs[0].name, "master");
        assert_eq!(defs[1].name, "worker");
        assert_ne!(defs[0].id, defs[1].id);
    }

    #[test]
    fn overrides_replace_document_roles() {
        let doc = ClusterDocument::new("t");
        let defs = role_definitions(&doc, &[("worker".to_string(), 7)]);
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "worker");
    }

    #[test]
    fn config_errors_carry_their_exit_codes() {
        let err = anyhow::Error::new(ConfigError::DocumentNotFound("x".to_string()));
        assert_eq!(exit_code_for(&err), weft_model::error::EXIT_UNKNOWN_CLUSTER);

        let err = anyhow::Error::new(StateError::BadConfiguration("boom".to_string()));
        assert_eq!(exit_code_for(&err), EXIT_BAD_CONFIGURATION);

        let err = anyhow::anyhow!("opaque");
        assert_eq!(exit_code_for(&err), EXIT_INTERNAL_ERROR);
    }

    #[tokio::test]
    async fn simulate_loads_converges_and_saves_the_document() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = dir.path().join("roundtrip.json");
        let saved = dir.path().join("roundtrip-out.json");

        let mut doc = ClusterDocument::new("roundtrip");
        doc.set_desired_instances("worker", 2);
        doc.save(&cluster).unwrap();

        let cli = Cli::parse_from([
            "weftd",
            "simulate",
            "--cluster",
            cluster.to_str().unwrap(),
            "--save",
            saved.to_str().unwrap(),
        ]);
        run(cli).await.unwrap();

        let refreshed = ClusterDocument::load(&saved).unwrap();
        assert_eq!(refreshed.actual_instances("worker").unwrap(), 2);
        assert!(refreshed.statistics.contains_key("worker"));
    }
}
