use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use parley_core::config::AppConfig;
use parley_core::flow::Flow;
use parley_core::state::StepStatus;
use parley_core::traits::{ModelPort, RetrievalPort};
use parley_core::types::ConversationId;

use parley_engine::{ConversationRunner, HandlerRegistry, TurnRequest};
use parley_llm::ModelInvoker;
use parley_retrieval::{HttpRetriever, RetrievalSupervisor};
use parley_store::{FlowDirectory, SqliteStore};

#[derive(Parser)]
#[command(name = "parley", version, about = "Turn-based conversational flow engine")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "parley.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the chat-completion gateway
    Serve,
    /// Chat with a flow from the terminal, one turn per line
    Chat {
        /// Flow to run
        flow_id: String,
        /// Resume an existing conversation
        #[arg(long)]
        conversation: Option<String>,
    },
    /// Check a flow definition file
    Validate {
        /// Path to a flow JSON file
        file: PathBuf,
    },
    /// Show current configuration
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("parley=info,warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "parley", &mut io::stdout());
        }
        Commands::Validate { file } => validate(&file)?,
        Commands::Config => {
            let config = load_config(&cli.config)?;
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Serve => {
            let config = load_config(&cli.config)?;
            let supervisor = start_backend(&config).await?;
            let runner = build_runner(&config)?;

            let gateway_config = config.gateway.clone().unwrap_or_default();
            info!(bind = %gateway_config.bind, "Starting gateway");
            let server = parley_gateway::GatewayServer::new(gateway_config, runner);

            let cancel = tokio_util::sync::CancellationToken::new();
            let cancel_clone = cancel.clone();

            // Graceful shutdown on Ctrl-C
            tokio::spawn(async move {
                tokio::signal::ctrl_c().await.ok();
                info!("Shutting down gateway...");
                cancel_clone.cancel();
            });

            let result = server.run(cancel).await;
            stop_backend(supervisor).await;
            result?;
        }
        Commands::Chat {
            flow_id,
            conversation,
        } => {
            let config = load_config(&cli.config)?;
            let supervisor = start_backend(&config).await?;
            let runner = build_runner(&config)?;
            let result = run_chat(&runner, &flow_id, conversation).await;
            stop_backend(supervisor).await;
            result?;
        }
    }

    Ok(())
}

fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    AppConfig::load(path)
        .map_err(|e| anyhow::anyhow!("{} (pass --config <path> to use another file)", e))
}

/// Wire the stores, ports and handler registry from config.
fn build_runner(config: &AppConfig) -> anyhow::Result<Arc<ConversationRunner>> {
    let workspace = config.workspace_dir();
    std::fs::create_dir_all(&workspace).ok();

    let store = Arc::new(SqliteStore::open(&config.database_path())?);
    let flows = Arc::new(FlowDirectory::new(config.flows_dir()));
    info!(flows_dir = %flows.dir().display(), "Flow directory");

    let mut invoker = ModelInvoker::new(config.providers.clone());
    if let Some(ref retry) = config.model.retry {
        invoker = invoker.with_retry(retry.clone());
    }
    let model: Arc<dyn ModelPort> = Arc::new(invoker);

    let retrieval_config = config.retrieval.clone().unwrap_or_default();
    let retriever: Arc<dyn RetrievalPort> = Arc::new(HttpRetriever::new(&retrieval_config)?);

    let registry = HandlerRegistry::standard(model, retriever, config.model.clone());
    Ok(Arc::new(ConversationRunner::new(
        flows,
        store,
        registry,
        &config.engine,
    )))
}

async fn start_backend(config: &AppConfig) -> anyhow::Result<Option<RetrievalSupervisor>> {
    let Some(ref retrieval) = config.retrieval else {
        return Ok(None);
    };
    let Some(ref backend) = retrieval.backend else {
        return Ok(None);
    };
    let supervisor = RetrievalSupervisor::new(&retrieval.base_url, backend.clone());
    supervisor.start().await?;
    Ok(Some(supervisor))
}

async fn stop_backend(supervisor: Option<RetrievalSupervisor>) {
    if let Some(supervisor) = supervisor {
        if let Err(e) = supervisor.stop().await {
            warn!(error = %e, "Failed to stop retrieval backend");
        }
    }
}

fn validate(file: &Path) -> anyhow::Result<()> {
    let json = std::fs::read_to_string(file)?;
    let flow = Flow::from_json(&json)?;
    println!(
        "{}: ok ({} nodes, {} edges)",
        file.display(),
        flow.nodes.len(),
        flow.edges.len()
    );
    Ok(())
}

async fn run_chat(
    runner: &ConversationRunner,
    flow_id: &str,
    conversation: Option<String>,
) -> anyhow::Result<()> {
    let mut conversation_id = conversation.map(|s| ConversationId::from_string(&s));
    let mut pending: Option<String> = None;
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        let mut request = TurnRequest::new(flow_id);
        if let Some(ref id) = conversation_id {
            request = request.with_conversation(id.clone());
        }
        if let Some(text) = pending.take() {
            request = request.with_user_message(text);
        }

        let response = runner.turn(request).await?;
        if conversation_id.is_none() {
            println!("Conversation: {}", response.conversation_id);
        }
        conversation_id = Some(response.conversation_id);

        match response.result.status {
            StepStatus::Error => eprintln!("[error] {}", response.result.display_text()),
            _ => println!("{}", response.result.display_text()),
        }
        if response.result.status == StepStatus::Completed {
            println!("[conversation completed]");
            return Ok(());
        }

        print!("> ");
        stdout.flush()?;
        let mut input = String::new();
        if stdin.lock().read_line(&mut input)? == 0 {
            return Ok(()); // EOF
        }
        let input = input.trim();
        if matches!(input, "/quit" | "/exit" | "/q") {
            return Ok(());
        }
        if !input.is_empty() {
            pending = Some(input.to_string());
        }
    }
}
