//! vibecode command line.
//!
//! Usage:
//!   vibecode run "create and run a script that prints primes"
//!   vibecode exec scripts/main.py
//!   vibecode sandbox provision|start|stop|status|remove
//!   vibecode diff old.py new.py

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use vibecode::agent::{BackendDeps, Orchestrator, TaskInput};
use vibecode::config::AgentConfig;
use vibecode::diff::generate_diff;
use vibecode::error::ServiceError;
use vibecode::llm::{CompletionModel, LlmPool};
use vibecode::notify::{group_key, NotificationHub, ProgressEvent};
use vibecode::sandbox::{DockerCli, SandboxDriver};
use vibecode::store::{MemoryStore, Project, RecordStore};
use vibecode::tools::{standard_tools, Dispatcher, ToolContext, ToolRegistry};
use vibecode::workspace::Workspace;

/// Coding agent that plans, edits and runs project code in a sandbox
#[derive(Parser, Debug)]
#[command(name = "vibecode")]
#[command(about = "Coding agent with a per-project container sandbox")]
struct Cli {
    /// YAML config file; defaults apply when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Project workspace root
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// Project id; defaults to the workspace directory name
    #[arg(long, global = true)]
    project: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send one chat message to the agent
    Run {
        message: String,
        /// File the user is looking at, relative to the workspace root
        #[arg(long)]
        file: Option<String>,
    },
    /// Run a workspace file inside the project's sandbox
    Exec { path: String },
    /// Manage the project's sandbox container
    Sandbox {
        #[command(subcommand)]
        action: SandboxAction,
    },
    /// Print a unified diff between two files
    Diff { original: PathBuf, new: PathBuf },
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum SandboxAction {
    Provision,
    Start,
    Stop,
    Status,
    Remove,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stderr keeps stdout clean for replies and tool output
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(log_filter(std::env::var(EnvFilter::DEFAULT_ENV).ok().as_deref()))
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AgentConfig::load(path)?,
        None => AgentConfig::default(),
    };

    if let Command::Diff { original, new } = &cli.command {
        return print_diff(original, new);
    }

    let project = project_for(&cli)?;
    let runtime = Arc::new(DockerCli::new(config.sandbox.runtime_binary.clone()));
    let sandbox = Arc::new(SandboxDriver::new(runtime, config.sandbox.clone()));

    match cli.command {
        Command::Run { message, file } => run(config, project, sandbox, message, file).await,
        Command::Exec { path } => {
            sandbox.attach(&project).await?;
            let output = sandbox.exec(&project.id, &path).await?;
            print!("{}", output.stdout);
            eprint!("{}", output.stderr);
            std::process::exit(output.exit_code);
        }
        Command::Sandbox { action } => manage_sandbox(&sandbox, &project, action).await,
        Command::Diff { .. } => Ok(()),
    }
}

/// `RUST_LOG` when it is set and parses, `info` otherwise.
fn log_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .filter(|d| !d.trim().is_empty())
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

fn project_for(cli: &Cli) -> anyhow::Result<Project> {
    let root = cli
        .root
        .canonicalize()
        .with_context(|| format!("workspace root {} not found", cli.root.display()))?;
    let title = root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "workspace".to_string());
    Ok(Project {
        id: cli.project.clone().unwrap_or_else(|| title.clone()),
        title,
        root,
        image: None,
    })
}

async fn manage_sandbox(
    sandbox: &SandboxDriver,
    project: &Project,
    action: SandboxAction,
) -> anyhow::Result<()> {
    if !matches!(action, SandboxAction::Provision) {
        sandbox.attach(project).await?;
    }
    let handle = match action {
        SandboxAction::Provision => Some(sandbox.provision(project).await?),
        SandboxAction::Start => Some(sandbox.start(&project.id).await?),
        SandboxAction::Stop => Some(sandbox.stop(&project.id).await?),
        SandboxAction::Status => sandbox.status(&project.id).await?,
        SandboxAction::Remove => {
            sandbox.remove(&project.id).await?;
            None
        }
    };
    match handle {
        Some(handle) => println!("{}", serde_json::to_string_pretty(&handle)?),
        None => println!("absent"),
    }
    Ok(())
}

fn print_diff(original: &Path, new: &Path) -> anyhow::Result<()> {
    let read = |p: &Path| {
        std::fs::read_to_string(p).with_context(|| format!("failed to read {}", p.display()))
    };
    let label = new.file_name().map(|n| n.to_string_lossy().into_owned());
    let outcome = generate_diff(&read(original)?, &read(new)?, label.as_deref());
    if outcome.has_changes {
        print!("{}", outcome.diff);
    } else {
        eprintln!("no changes");
    }
    Ok(())
}

async fn run(
    config: AgentConfig,
    project: Project,
    sandbox: Arc<SandboxDriver>,
    message: String,
    file: Option<String>,
) -> anyhow::Result<()> {
    let workspace = Workspace::open(project.root.clone());
    if sandbox.attach(&project).await?.is_none() {
        tracing::warn!(
            project = %project.id,
            "no sandbox provisioned; run_file and pip_install will fail"
        );
    }

    let tools = standard_tools(ToolContext {
        project_id: project.id.clone(),
        workspace: workspace.clone(),
        sandbox,
        patch_mode: config.patch.mode,
    });
    let dispatcher = Arc::new(Dispatcher::new(Arc::new(ToolRegistry::from_entries(tools)?)));

    let model = match LlmPool::from_config(&config.llm) {
        Ok(pool) => Some(Arc::new(pool) as Arc<dyn CompletionModel>),
        Err(e) => {
            tracing::warn!(error = %e, "completion model unavailable");
            None
        }
    };
    let deps = BackendDeps {
        framework: None,
        model,
    };

    let store = Arc::new(MemoryStore::new());
    store.save_project(project.clone()).await?;
    let hub = Arc::new(NotificationHub::new());
    let mut events = hub.subscribe(&group_key(&project.id)).await;
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "progress listener lagged")
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut task = TaskInput::new(message);
    if let Some(path) = file {
        task.current_file_content = workspace.read(&path).await.ok().map(|f| f.content);
        task.current_file = Some(path);
    }

    let orchestrator = Orchestrator::new(project.id.clone(), config, deps, dispatcher, store, hub);
    let result = orchestrator.handle_task(task).await;
    printer.abort();

    match result {
        Ok(reply) => {
            println!("{}", reply.message);
            Ok(())
        }
        Err(ServiceError::Internal { detail }) => bail!("agent failed: {detail}"),
        Err(e) => Err(e.into()),
    }
}

fn print_event(event: &ProgressEvent) {
    match event {
        ProgressEvent::ToolExecuted { tool_name, result } => {
            eprintln!("[tool] {tool_name}: {}", result.message);
        }
        ProgressEvent::ReasoningStep { step, .. } => {
            let status = serde_json::to_value(step.status)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default();
            eprintln!("[step {}] {} {status}", step.step_number, step.step_type);
        }
    }
}
