//! Promptgate Runtime
//!
//! The entry point for the defended assistant. Handles CLI args,
//! policy bootstrap, and wiring the stores and the inference client
//! into the pipeline.

use std::fs;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use dialoguer::Input;
use tracing::Level;

use promptgate::config::{get_policy_path, load_policy, resolve_path, save_policy};
use promptgate::inference::client::HttpInferenceClient;
use promptgate::pipeline::orchestrator::Pipeline;
use promptgate::store::directory::SqliteDirectory;
use promptgate::store::documents::{demo_document, FileDocumentStore};
use promptgate::types::{default_policy, ChatRequest, LogLevel, PipelineError, PolicyConfig};

const VERSION: &str = "0.1.0";

/// Promptgate -- Prompt-Injection Defense Pipeline
#[derive(Parser, Debug)]
#[command(
    name = "promptgate",
    version = VERSION,
    about = "Promptgate -- Prompt-Injection Defense Pipeline",
    long_about = "A defended assistant over untrusted shared documents. \
                  Injected instructions are screened, separated, gated, and sanitized."
)]
struct Cli {
    /// Ask a single question and print the response
    #[arg(long, value_name = "MESSAGE")]
    ask: Option<String>,

    /// Start an interactive chat loop
    #[arg(long)]
    chat: bool,

    /// Write the default policy and seed the demo stores
    #[arg(long)]
    init: bool,

    /// Show the active policy
    #[arg(long)]
    status: bool,

    /// Path to a policy file (defaults to ~/.promptgate/policy.json)
    #[arg(long, value_name = "PATH")]
    policy: Option<String>,
}

fn init_logging(level: LogLevel) {
    let level = match level {
        LogLevel::Debug => Level::DEBUG,
        LogLevel::Info => Level::INFO,
        LogLevel::Warn => Level::WARN,
        LogLevel::Error => Level::ERROR,
    };
    tracing_subscriber::fmt().with_max_level(level).init();
}

fn load_or_default_policy(path: Option<&str>) -> PolicyConfig {
    load_policy(path).unwrap_or_else(|| {
        eprintln!("No policy file found; using the defended defaults.");
        default_policy()
    })
}

// ---- Init Command -----------------------------------------------------------

/// Write the default policy and seed the demo document and directory.
fn run_init() -> Result<()> {
    let policy_path = get_policy_path();
    if policy_path.exists() {
        println!("Policy already exists at {}", policy_path.display());
    } else {
        let policy = default_policy();
        save_policy(&policy)?;
        println!("{} {}", "Policy written:".green(), policy_path.display());
    }

    let policy = load_or_default_policy(None);

    let docs_dir = resolve_path(&policy.documents_dir);
    fs::create_dir_all(&docs_dir).context("Failed to create documents directory")?;
    let demo = demo_document();
    let demo_path = std::path::Path::new(&docs_dir).join(&demo.id);
    if !demo_path.exists() {
        fs::write(&demo_path, &demo.body).context("Failed to write demo document")?;
        println!("{} {}", "Demo document written:".green(), demo_path.display());
    }

    let db_path = resolve_path(&policy.directory_db_path);
    SqliteDirectory::open(&db_path).context("Failed to seed staff directory")?;
    println!("{} {}", "Staff directory ready:".green(), db_path);

    Ok(())
}

// ---- Status Command ---------------------------------------------------------

/// Display the active policy.
fn show_status(policy_path: Option<&str>) {
    let policy = load_or_default_policy(policy_path);

    println!(
        r#"
=== PROMPTGATE POLICY ===
Input threshold:  {}
Tool execution:   {}
Allowed origins:  {}
Inference:        {} ({})
Model timeout:    {}s
Documents dir:    {}
Directory DB:     {}
Version:          {}
=========================
"#,
        policy.input_risk_threshold,
        if policy.tool_execution_enabled {
            "enabled".yellow()
        } else {
            "disabled (defended)".green()
        },
        if policy.allowed_origins.is_empty() {
            "(none configured)".to_string()
        } else {
            policy.allowed_origins.join(", ")
        },
        policy.inference_api_url,
        policy.inference_model,
        policy.model_timeout_secs,
        resolve_path(&policy.documents_dir),
        resolve_path(&policy.directory_db_path),
        VERSION,
    );
}

// ---- Pipeline Wiring --------------------------------------------------------

fn build_pipeline(policy: PolicyConfig) -> Result<Pipeline> {
    let model = Arc::new(HttpInferenceClient::new(
        policy.inference_api_url.clone(),
        policy.inference_api_key.clone(),
        policy.inference_model.clone(),
        policy.max_tokens,
    ));
    let documents = Arc::new(FileDocumentStore::new(resolve_path(&policy.documents_dir)));
    let directory = Arc::new(
        SqliteDirectory::open(&resolve_path(&policy.directory_db_path))
            .context("Failed to open staff directory")?,
    );

    Ok(Pipeline::new(policy, model, documents, directory))
}

async fn answer(pipeline: &Pipeline, message: &str) -> Result<String> {
    match pipeline
        .handle(ChatRequest {
            message: message.to_string(),
        })
        .await
    {
        Ok(response) => Ok(response.response),
        Err(PipelineError::MalformedRequest(reason)) => {
            anyhow::bail!("Bad request: {reason}")
        }
        Err(e) => anyhow::bail!("Request failed: {e}"),
    }
}

// ---- Chat Loop --------------------------------------------------------------

async fn run_chat(pipeline: Pipeline) -> Result<()> {
    let now = chrono::Utc::now().to_rfc3339();
    println!("[{}] promptgate v{} -- type 'exit' to quit", now, VERSION);

    loop {
        let message: String = Input::new()
            .with_prompt("you")
            .allow_empty(true)
            .interact_text()?;

        let trimmed = message.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed == "exit" || trimmed == "quit" {
            break;
        }

        match answer(&pipeline, trimmed).await {
            Ok(text) => println!("{} {}", "assistant:".cyan().bold(), text),
            Err(e) => eprintln!("{} {}", "error:".red().bold(), e),
        }
    }

    Ok(())
}

// ---- Entry Point -----------------------------------------------------------

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.init {
        if let Err(e) = run_init() {
            eprintln!("Init failed: {}", e);
            std::process::exit(1);
        }
        return;
    }

    if cli.status {
        show_status(cli.policy.as_deref());
        return;
    }

    let policy = load_or_default_policy(cli.policy.as_deref());
    init_logging(policy.log_level);

    if let Some(ref message) = cli.ask {
        let pipeline = match build_pipeline(policy) {
            Ok(p) => p,
            Err(e) => {
                eprintln!("{}", e);
                std::process::exit(1);
            }
        };
        match answer(&pipeline, message).await {
            Ok(text) => println!("{}", text),
            Err(e) => {
                eprintln!("{}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    if cli.chat {
        let pipeline = match build_pipeline(policy) {
            Ok(p) => p,
            Err(e) => {
                eprintln!("{}", e);
                std::process::exit(1);
            }
        };
        if let Err(e) = run_chat(pipeline).await {
            eprintln!("Fatal: {}", e);
            std::process::exit(1);
        }
        return;
    }

    // Default: show help hints
    println!("Run \"promptgate --help\" for usage information.");
    println!("Run \"promptgate --init\" to set up the demo deployment.");
    println!("Run \"promptgate --ask '...'\" or \"promptgate --chat\" to talk.");
}
