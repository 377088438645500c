use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use colored::Colorize;
use log::info;

use qube_core::config::StackConfig;
use qube_core::provision::{Provisioner, ReportEntry, StackOutputs};
use qube_provider_aws::{AwsProvider, WaitPolicy};

#[derive(Parser)]
#[command(name = "qube")]
#[command(about = "Idempotent provisioning of the Qube AWS stack", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create whatever is missing from the stack
    Apply {
        /// Path to a JSON configuration file (defaults apply when omitted)
        #[arg(long)]
        config: Option<PathBuf>,

        /// AWS region (falls back to the ambient AWS configuration)
        #[arg(long)]
        region: Option<String>,

        /// Where to write the stack outputs
        #[arg(long, default_value = "qube.outputs.json")]
        outputs: PathBuf,
    },
    /// Validate the configuration without calling AWS
    Validate {
        /// Path to a JSON configuration file (defaults apply when omitted)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print the default configuration
    Config,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Apply {
            config,
            region,
            outputs,
        } => run_apply(config.as_deref(), region.as_deref(), &outputs).await,
        Commands::Validate { config } => run_validate(config.as_deref()),
        Commands::Config => run_config(),
    };

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

/// Load the configuration (or the defaults) and validate it
fn load_config(path: Option<&Path>) -> Result<StackConfig, String> {
    let config = match path {
        Some(path) => StackConfig::load(path).map_err(|e| e.to_string())?,
        None => StackConfig::default(),
    };

    config.validate().map_err(|errors| {
        errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    })?;

    Ok(config)
}

fn run_validate(path: Option<&Path>) -> Result<(), String> {
    load_config(path)?;
    println!("{}", "Configuration is valid.".green());
    Ok(())
}

fn run_config() -> Result<(), String> {
    let json = serde_json::to_string_pretty(&StackConfig::default())
        .map_err(|e| format!("Failed to serialize configuration: {}", e))?;
    println!("{}", json);
    Ok(())
}

async fn run_apply(
    config_path: Option<&Path>,
    region: Option<&str>,
    outputs_path: &Path,
) -> Result<(), String> {
    let config = load_config(config_path)?;

    let provider =
        AwsProvider::new(region).await.with_wait_policy(WaitPolicy::from(&config.wait));
    info!("Applying stack in region {:?}", provider.region());

    println!("{}", "Provisioning stack...".cyan().bold());
    println!();

    let mut provisioner = Provisioner::new(&provider);
    let result = provisioner.run(&config).await;

    // Partial progress is still worth showing when a step fails
    for entry in provisioner.report() {
        println!("  {}", format_entry(entry));
    }
    println!();

    let created = provisioner.created_count();
    let found = provisioner.report().len() - created;

    match result {
        Ok(outputs) => {
            write_outputs(outputs_path, &outputs)?;
            println!(
                "{}",
                format!(
                    "Apply complete! {} created, {} already present.",
                    created, found
                )
                .green()
                .bold()
            );
            println!("Outputs written to {}", outputs_path.display());
            Ok(())
        }
        Err(e) => {
            println!(
                "{}",
                format!(
                    "Apply failed. {} created, {} already present before the failure.",
                    created, found
                )
                .red()
                .bold()
            );
            Err(e.to_string())
        }
    }
}

fn format_entry(entry: &ReportEntry) -> String {
    let (symbol, verb) = if entry.created {
        ("+".green().bold(), "created")
    } else {
        ("=".normal(), "found")
    };
    format!("{} {} {} ({})", symbol, entry.id, verb, entry.identifier)
}

fn write_outputs(path: &Path, outputs: &StackOutputs) -> Result<(), String> {
    let json = serde_json::to_string_pretty(outputs)
        .map_err(|e| format!("Failed to serialize outputs: {}", e))?;
    fs::write(path, json).map_err(|e| format!("Failed to write {}: {}", path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use qube_core::resource::{ResourceId, ResourceKind};

    #[test]
    fn defaults_are_valid() {
        let config = load_config(None).unwrap();
        assert_eq!(config.network.vpc_name, "QubeVPC");
    }

    #[test]
    fn config_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qube.json");
        fs::write(&path, r#"{"queue": {"name": "OtherQueue"}}"#).unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.queue.name, "OtherQueue");
        assert_eq!(config.network.cidr_block, "172.20.0.0/16");
    }

    #[test]
    fn wait_settings_reach_the_provider_policy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qube.json");
        fs::write(&path, r#"{"wait": {"max_attempts": 10, "delay_secs": 1}}"#).unwrap();

        let config = load_config(Some(&path)).unwrap();
        let policy = WaitPolicy::from(&config.wait);
        assert_eq!(policy.max_attempts, 10);
        assert_eq!(policy.delay, std::time::Duration::from_secs(1));
    }

    #[test]
    fn invalid_config_lists_every_problem() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qube.json");
        fs::write(
            &path,
            r#"{"network": {"cidr_block": "not-a-cidr"}, "security": {"port": 0}}"#,
        )
        .unwrap();

        let err = load_config(Some(&path)).unwrap_err();
        assert!(err.lines().count() >= 2, "{}", err);
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(Some(&dir.path().join("absent.json"))).unwrap_err();
        assert!(err.contains("absent.json"));
    }

    #[test]
    fn report_lines_say_created_or_found() {
        colored::control::set_override(false);
        let created = ReportEntry {
            id: ResourceId::new(ResourceKind::Vpc, "QubeVPC"),
            identifier: "vpc-1".to_string(),
            created: true,
        };
        assert_eq!(format_entry(&created), "+ ec2.vpc.QubeVPC created (vpc-1)");

        let found = ReportEntry {
            created: false,
            ..created
        };
        assert_eq!(format_entry(&found), "= ec2.vpc.QubeVPC found (vpc-1)");
    }
}
