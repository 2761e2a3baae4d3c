//! Crow Agent CLI.
//!
//! Run with: cargo run --bin crow-core

use anyhow::Result;
use clap::{Parser, Subcommand};
use crow_core::provider::{ProviderClient, ProviderConfig};
use crow_core::tool_proxy::UpstreamConfig;
use crow_core::tools::{create_full_registry, TodoStore};
use crow_core::{agent::AgentConfig, events::AgentEvent, DeltaTracker, Session, SessionToolExecutor, Telemetry, TurnLoop};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

static SHUTDOWN: std::sync::OnceLock<CancellationToken> = std::sync::OnceLock::new();

fn get_shutdown_token() -> CancellationToken {
    SHUTDOWN.get_or_init(CancellationToken::new).clone()
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("crow"))
        .unwrap_or_else(|| PathBuf::from(".crow"))
}

#[derive(Parser)]
#[command(name = "crow")]
#[command(about = "Crow Agent - A standalone LLM agent with tools", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Working directory for the agent
    #[arg(short = 'd', long, default_value = ".")]
    working_dir: PathBuf,

    /// LLM model to use
    #[arg(short, long, default_value = "claude-sonnet-4-20250514")]
    model: String,

    /// Provider name (for auth.json lookup)
    #[arg(short, long, default_value = "anthropic")]
    provider: String,

    /// Base URL override (skips auth.json lookup)
    #[arg(long)]
    base_url: Option<String>,

    /// Upstream tool server URL (JSON-RPC over HTTPS). When set, tool calls
    /// not handled by a local tool are forwarded there.
    #[arg(long)]
    upstream_tools: Option<String>,

    /// Verbose output (show thinking, usage)
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive REPL session (default)
    Repl,

    /// Run a single prompt and exit
    Prompt {
        /// The prompt to send to the agent
        message: String,
    },

    /// Show session statistics
    Stats {
        #[arg(short = 'n', long, default_value = "10")]
        limit: usize,
    },

    /// Show tool usage statistics
    Tools,
}

struct CrowCli {
    turn_loop: TurnLoop,
    session: Session,
    tools: Vec<async_openai::types::ChatCompletionTool>,
    telemetry: Arc<Telemetry>,
    verbose: bool,
    messages: Vec<async_openai::types::ChatCompletionRequestMessage>,
}

impl CrowCli {
    async fn new(
        provider: Arc<ProviderClient>,
        working_dir: PathBuf,
        telemetry: Arc<Telemetry>,
        verbose: bool,
        model: String,
        upstream_tools: Option<String>,
    ) -> Result<Self> {
        let session_id = telemetry.session_id().to_string();
        let todo_store = TodoStore::new();

        let registry = create_full_registry(
            working_dir.clone(),
            session_id,
            todo_store,
            provider.clone(),
        );
        let tools = registry.to_openai_tools();

        let delta_tracker = DeltaTracker::open(&working_dir.join(".crow").join("deltas.db"))?;
        let session = match upstream_tools {
            Some(base_url) => Session::with_upstream_tools(
                working_dir.clone(),
                registry,
                delta_tracker,
                UpstreamConfig { base_url },
            ),
            None => Session::new(working_dir.clone(), registry, delta_tracker),
        };
        session.tool_proxy.initialize().await.ok();

        let mut config = AgentConfig::new("crow");
        config.model = Some(model);
        let turn_loop = TurnLoop::with_telemetry(config, provider, working_dir, telemetry.clone())
            .with_session_id(session.id);

        Ok(Self {
            turn_loop,
            session,
            tools,
            telemetry,
            verbose,
            messages: vec![async_openai::types::ChatCompletionRequestSystemMessageArgs::default()
                .content(system_prompt())
                .build()
                .expect("system message always builds")
                .into()],
        })
    }

    async fn chat(&mut self, message: &str) -> Result<()> {
        self.telemetry.log_user_message(message).await;

        self.messages.push(
            async_openai::types::ChatCompletionRequestUserMessageArgs::default()
                .content(message)
                .build()?
                .into(),
        );

        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancellation = get_shutdown_token();
        let turn_id = self.session.begin_turn();
        let executor = SessionToolExecutor::new(&self.session, turn_id);
        let scratchpad = self.session.scratchpad.clone();
        let verbose = self.verbose;
        let telemetry = self.telemetry.clone();

        let turn_fut = self.turn_loop.process_turn(
            &mut self.messages,
            &self.tools,
            &executor,
            &scratchpad,
            &tx,
            cancellation,
        );

        let event_fut = async {
            while let Some(event) = rx.recv().await {
                match event {
                    AgentEvent::TextDelta { delta, .. } => {
                        print!("{}", delta);
                        std::io::stdout().flush().ok();
                    }
                    AgentEvent::ThinkingDelta { delta, .. } => {
                        if verbose {
                            print!("\x1b[90m{}\x1b[0m", delta);
                            std::io::stdout().flush().ok();
                        }
                    }
                    AgentEvent::ToolCallStart { tool, arguments, .. } => {
                        let preview = arguments.to_string();
                        let preview = if preview.len() > 60 {
                            format!("{}...", &preview[..60])
                        } else {
                            preview
                        };
                        println!("\n\x1b[33m▶ {}: {}\x1b[0m", tool, preview);
                    }
                    AgentEvent::ToolCallEnd {
                        tool,
                        output,
                        duration_ms,
                        is_error,
                        arguments,
                        ..
                    } => {
                        let result = if is_error { Err(output.as_str()) } else { Ok(output.as_str()) };
                        telemetry.log_tool_call(&tool, &arguments, result, duration_ms).await;

                        if is_error {
                            println!("\x1b[31m✗ {} ({}ms): {}\x1b[0m", tool, duration_ms, output);
                        } else {
                            let preview = if output.len() > 100 {
                                format!("{}...", &output[..100])
                            } else {
                                output.clone()
                            };
                            println!("\x1b[32m✓ {} ({}ms): {}\x1b[0m", tool, duration_ms, preview);
                        }
                    }
                    AgentEvent::TurnComplete { .. } => println!(),
                    AgentEvent::Usage {
                        input_tokens,
                        output_tokens,
                        reasoning_tokens,
                        ..
                    } => {
                        if verbose {
                            let reasoning = reasoning_tokens
                                .map(|r| format!(", {} reasoning", r))
                                .unwrap_or_default();
                            println!("\x1b[90m[{} in, {} out{}]\x1b[0m", input_tokens, output_tokens, reasoning);
                        }
                    }
                    AgentEvent::Error { error, .. } => {
                        eprintln!("\x1b[31mError: {}\x1b[0m", error);
                        telemetry.log_error("agent", &error).await;
                    }
                    _ => {}
                }
            }
        };

        let (result, _) = tokio::join!(turn_fut, event_fut);
        let result = result.map_err(|e| anyhow::anyhow!(e))?;

        if let Some(text) = result.text {
            self.messages.push(
                async_openai::types::ChatCompletionRequestAssistantMessageArgs::default()
                    .content(text)
                    .build()?
                    .into(),
            );
        }

        Ok(())
    }

    async fn repl(&mut self) -> Result<()> {
        let mut rl = DefaultEditor::new()?;
        println!("Crow Agent REPL. Type /undo to revert the last turn, Ctrl-D to exit.");

        loop {
            if get_shutdown_token().is_cancelled() {
                break;
            }
            match rl.readline("crow> ") {
                Ok(line) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    rl.add_history_entry(line).ok();

                    if line == "/undo" {
                        match self.session.undo_turn(self.session.begin_turn()) {
                            Ok(affected) if !affected.is_empty() => {
                                println!("Reverted {} file(s).", affected.len());
                            }
                            Ok(_) => println!("Nothing to undo for the last turn."),
                            Err(e) => eprintln!("Undo failed: {}", e),
                        }
                        continue;
                    }

                    if let Err(e) = self.chat(line).await {
                        eprintln!("\x1b[31mError: {}\x1b[0m", e);
                    }
                }
                Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
                Err(e) => {
                    eprintln!("Readline error: {}", e);
                    break;
                }
            }
        }

        self.session.tool_proxy.close();
        Ok(())
    }
}

fn system_prompt() -> String {
    "You are Crow, a helpful software engineering assistant.\n\n\
     You have access to tools to help accomplish tasks. Be concise and direct, \
     and prefer making the change over describing it."
        .to_string()
}

fn build_provider_config(cli: &Cli) -> Result<ProviderConfig> {
    if let Some(base_url) = &cli.base_url {
        return Ok(ProviderConfig::custom(
            &cli.provider,
            base_url,
            format!("{}_API_KEY", cli.provider.to_uppercase()),
            &cli.model,
        ));
    }

    match cli.provider.to_lowercase().as_str() {
        "openai" => Ok(ProviderConfig::openai()),
        "anthropic" => Ok(ProviderConfig::anthropic()),
        "gemini" => Ok(ProviderConfig::gemini()),
        "moonshot" => Ok(ProviderConfig::moonshot()),
        "openrouter" => Ok(ProviderConfig::openrouter()),
        other => {
            let auth = crow_core::AuthConfig::load()?;
            auth.get(other)
                .ok_or_else(|| anyhow::anyhow!("Provider '{}' not found in auth.json", other))?;
            Ok(ProviderConfig::custom(
                other,
                auth.base_url(other).unwrap_or("https://api.openai.com/v1"),
                format!("{}_API_KEY", other.to_uppercase()),
                &cli.model,
            ))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let shutdown = get_shutdown_token();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            tokio::signal::ctrl_c().await.ok();
            shutdown.cancel();
        }
    });

    let working_dir = cli.working_dir.canonicalize().unwrap_or(cli.working_dir.clone());
    let data_dir = default_data_dir();

    let telemetry = Arc::new(Telemetry::init(
        data_dir.join("logs"),
        cli.verbose,
        None,
        Some(&working_dir.display().to_string()),
        Some(&cli.model),
        Some(&cli.provider),
    )?);

    let mut provider_config = build_provider_config(&cli)?;
    provider_config.default_model = cli.model.clone();
    let provider = Arc::new(ProviderClient::new(provider_config).map_err(|e| anyhow::anyhow!(e))?);

    let mut cli_app = CrowCli::new(
        provider,
        working_dir,
        telemetry.clone(),
        cli.verbose,
        cli.model.clone(),
        cli.upstream_tools.clone(),
    )
    .await?;

    match cli.command.unwrap_or(Commands::Repl) {
        Commands::Repl => cli_app.repl().await?,
        Commands::Prompt { message } => cli_app.chat(&message).await?,
        Commands::Stats { limit } => {
            let sessions = telemetry.recent_sessions(limit)?;
            for s in sessions {
                println!("{}", s.id);
            }
        }
        Commands::Tools => {
            for stat in telemetry.tool_stats()? {
                println!("{}: {} calls", stat.name, stat.count);
            }
        }
    }

    Ok(())
}
