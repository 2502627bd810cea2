use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::info;
use tracing_subscriber::EnvFilter;

use optionflow_core::EngineConfig;
use optionflow_graph::{compile_definition, graph_to_pipeline_ast, FunctionDefinition, Graph};
use optionflow_runtime::{OptionResolver, ResolveContext, ResolveRequest};

#[derive(Parser)]
#[command(name = "optionflow", version, about = "Compile and run option-list pipelines")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "optionflow.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a function definition and report any issues
    Validate {
        /// Function definition (JSON)
        definition: PathBuf,
        /// Connector ids to treat as known
        #[arg(long = "connector")]
        connectors: Vec<String>,
    },
    /// Print the linear pipeline form of a graph
    Explain {
        /// Graph (JSON)
        graph: PathBuf,
    },
    /// Resolve a function against a context file
    Resolve {
        /// Resolve context (JSON)
        context: PathBuf,
        /// Function id, custom or `builtin.*`
        function_id: String,
        /// Call arguments as a JSON object
        #[arg(long, default_value = "{}")]
        args: String,
        /// Allow `http_get` and AI steps to run locally
        #[arg(long)]
        allow_http: bool,
        /// Ignore any cached result
        #[arg(long)]
        force_refresh: bool,
    },
    /// Show the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let config = if cli.config.exists() {
        EngineConfig::load(&cli.config)?
    } else {
        info!(path = %cli.config.display(), "No config file, using defaults");
        EngineConfig::default()
    };

    match cli.command {
        Commands::Validate {
            definition,
            connectors,
        } => validate(&definition, connectors)?,
        Commands::Explain { graph } => explain(&graph)?,
        Commands::Resolve {
            context,
            function_id,
            args,
            allow_http,
            force_refresh,
        } => {
            let context: ResolveContext = read_json(&context)?;
            let args: Value =
                serde_json::from_str(&args).context("--args must be a JSON value")?;

            let resolver = OptionResolver::new(config);
            let mut request = ResolveRequest::new(function_id, &context).with_args(args);
            if allow_http {
                request = request.allow_http_get();
            }
            if force_refresh {
                request = request.force_refresh();
            }
            let result = resolver.resolve(request).await;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

fn validate(path: &Path, connectors: Vec<String>) -> anyhow::Result<()> {
    let definition: FunctionDefinition = read_json(path)?;
    let known: BTreeSet<String> = connectors.into_iter().collect();

    match compile_definition(&definition, &known) {
        Ok(plan) => {
            println!(
                "{} ({}): OK, {} nodes",
                definition.id,
                definition.flavour(),
                plan.execution_order.len()
            );
            println!("  order: {}", plan.execution_order.join(" -> "));
            if plan.requires_remote {
                println!("  requires remote capabilities");
            }
            if plan.uses_runtime_row {
                println!("  reads the runtime row");
            }
            Ok(())
        }
        Err(issues) => {
            println!("{} ({}): {} issue(s)", definition.id, definition.flavour(), issues.len());
            for issue in &issues {
                println!("  - {}", issue);
            }
            anyhow::bail!("definition \"{}\" does not compile", definition.id)
        }
    }
}

fn explain(path: &Path) -> anyhow::Result<()> {
    let graph: Graph = read_json(path)?;
    let ast = graph_to_pipeline_ast(&graph)?;
    println!("{}", serde_json::to_string_pretty(&ast)?);
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
}
