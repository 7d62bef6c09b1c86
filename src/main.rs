use clap::Parser;
use colored::*;
use eyre::{Context, Result, eyre};
use log::info;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

use calbot::agent::{AgentDefinition, AgentsClient, CALENDAR_INSTRUCTIONS, Orchestrator, Role, RunDriver, RunDriverConfig};
use calbot::auth::{ClientCredentials, TokenSource};
use calbot::config::Config;
use calbot::graph::{CalendarBackend, GraphCalendar};
use calbot::ipc::{ToolClient, ToolClientConfig, ToolServer, ToolServerConfig};
use calbot::tools::{ToolRegistry, ToolRouter, calendar_registry, normalize_arguments};
use calbot::CalbotError;

mod cli;

use cli::Cli;
use cli::commands::{AgentCommands, Commands};

fn setup_logging() -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("calbot")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("calbot.log");

    // stdout carries the stdio transport, so logs go to a file
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

async fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        eprintln!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        Commands::Serve { socket } => handle_serve_command(socket.as_ref(), config).await,
        Commands::Chat {
            agent_id,
            server_cmd,
            connect,
        } => {
            let tools = connect_tool_server(cli, connect.as_deref(), server_cmd.as_deref()).await?;
            handle_chat_command(tools, agent_id.as_deref(), config).await
        }
        Commands::Call { name, args, connect } => {
            handle_call_command(cli, name, args, connect.as_deref()).await
        }
        Commands::Tools { connect } => handle_tools_command(cli, connect.as_deref()).await,
        Commands::Agent { command } => handle_agent_command(command, config).await,
    }
}

fn build_registry(config: &Config, tokens: Arc<dyn TokenSource>) -> Result<ToolRegistry> {
    let backend: Arc<dyn CalendarBackend> =
        Arc::new(GraphCalendar::new(&config.graph, tokens).context("Failed to create calendar backend")?);
    calendar_registry(backend, &config.graph.default_time_zone).context("Failed to build tool registry")
}

async fn handle_serve_command(socket: Option<&PathBuf>, config: &Config) -> Result<()> {
    config.validate_credentials().context("Invalid configuration")?;

    let tokens: Arc<dyn TokenSource> =
        Arc::new(ClientCredentials::new(&config.auth).context("Failed to create credential source")?);
    let registry = Arc::new(build_registry(config, tokens)?);

    match socket {
        None => {
            let server = ToolServer::new(registry);
            server.serve_stdio().await.context("Tool server failed")?;
        }
        Some(path) => {
            let mut server = ToolServer::with_config(registry, ToolServerConfig::default().with_socket_path(path));
            let shutdown = server.shutdown_handle();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Interrupt received, stopping tool server");
                    let _ = shutdown.send(()).await;
                }
            });
            eprintln!("{} {}", "Listening on".green(), path.display());
            server.run_socket().await.context("Tool server failed")?;
        }
    }

    Ok(())
}

/// Start the tool server as a child process, `calbot serve` unless a
/// command is given.
fn spawn_tool_server(cli: &Cli, server_cmd: Option<&str>) -> Result<ToolClient> {
    let (program, args) = match server_cmd {
        Some(cmd) => {
            let mut parts = cmd.split_whitespace().map(String::from);
            let program = parts.next().ok_or_else(|| eyre!("--server-cmd is empty"))?;
            (program, parts.collect::<Vec<_>>())
        }
        None => {
            let exe = std::env::current_exe().context("Failed to locate calbot executable")?;
            let mut args = Vec::new();
            if let Some(path) = &cli.config {
                args.push("--config".to_string());
                args.push(path.display().to_string());
            }
            args.push("serve".to_string());
            (exe.display().to_string(), args)
        }
    };

    let client = ToolClient::spawn(&program, &args, ToolClientConfig::default())?;
    Ok(client)
}

/// Reach the tool server on `socket` when given, otherwise spawn one
async fn connect_tool_server(cli: &Cli, socket: Option<&Path>, server_cmd: Option<&str>) -> Result<ToolClient> {
    match socket {
        Some(path) => {
            info!("Connecting to tool server at {}", path.display());
            Ok(ToolClient::connect_socket(path, ToolClientConfig::default()).await?)
        }
        None => spawn_tool_server(cli, server_cmd),
    }
}

async fn handle_chat_command(tools: ToolClient, agent_id: Option<&str>, config: &Config) -> Result<()> {
    config.validate().context("Invalid configuration")?;
    let agent_id = config.resolve_agent_id(agent_id)?;

    let tools = Arc::new(tools);
    let hello = tools.initialize().await.context("Tool server handshake failed")?;
    info!("Connected to {} {} with {} tools", hello.name, hello.version, hello.tools.len());

    let tokens: Arc<dyn TokenSource> = Arc::new(ClientCredentials::new(&config.auth)?);
    let orchestrator: Arc<dyn Orchestrator> = Arc::new(AgentsClient::new(&config.agent, tokens)?);
    let router: Arc<dyn ToolRouter> = tools.clone();
    let driver = RunDriver::from_router(
        Arc::clone(&orchestrator),
        router,
        RunDriverConfig::from(&config.agent),
    )
    .await?;

    let thread = orchestrator.create_thread().await.context("Failed to create thread")?;
    info!("Created thread {}", thread.id);

    println!("{} agent {} ({} tools). Type 'quit' to exit.", "Chatting with".cyan(), agent_id, hello.tools.len());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{} ", "you>".bold());
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.eq_ignore_ascii_case("quit") {
            break;
        }

        match driver.send(&thread.id, &agent_id, line).await {
            Ok(outcome) => {
                for failed in outcome.failed_calls() {
                    eprintln!("{} {}", "Tool error:".yellow(), failed.output.text);
                }
                for role in [Role::User, Role::Assistant] {
                    if let Some(message) = outcome.last_by_role(role) {
                        println!("{}: {}", role.as_str().cyan(), message.text());
                    }
                }
            }
            Err(e @ CalbotError::Transport(_)) => {
                eprintln!("{} {}", "Error:".red(), e);
                break;
            }
            Err(e) => eprintln!("{} {}", "Error:".red(), e),
        }
    }

    tools.shutdown().await?;
    Ok(())
}

async fn handle_call_command(cli: &Cli, name: &str, args: &str, socket: Option<&Path>) -> Result<()> {
    let raw: serde_json::Value = serde_json::from_str(args).context("--args is not valid JSON")?;
    // Same normalization the run driver applies to agent calls
    let arguments = normalize_arguments(&raw)?;

    let tools = connect_tool_server(cli, socket, None).await?;
    let result = tools.call_tool(name, arguments).await;
    tools.shutdown().await?;

    let output = result?;
    if output.is_error {
        println!("{} {}", "Tool error:".red(), output.text);
    } else {
        println!("{}", output.text.green());
    }
    if let Some(structured) = &output.structured {
        println!("{}", serde_json::to_string_pretty(structured)?);
    }
    Ok(())
}

async fn handle_tools_command(cli: &Cli, socket: Option<&Path>) -> Result<()> {
    let tools = connect_tool_server(cli, socket, None).await?;
    let specs = tools.list_tools().await;
    tools.shutdown().await?;

    for spec in specs? {
        println!("{}", spec.name.bold());
        println!("  {}", spec.description);
        if let Some(properties) = spec.input_schema.get("properties").and_then(|p| p.as_object()) {
            for (param, schema) in properties {
                let kind = schema.get("type").and_then(|t| t.as_str()).unwrap_or("any");
                println!("    {} ({})", param.cyan(), kind);
            }
        }
    }
    Ok(())
}

async fn handle_agent_command(command: &AgentCommands, config: &Config) -> Result<()> {
    match command {
        AgentCommands::Create { name } => {
            config.validate().context("Invalid configuration")?;

            let tokens: Arc<dyn TokenSource> = Arc::new(ClientCredentials::new(&config.auth)?);
            let registry = build_registry(config, Arc::clone(&tokens))?;
            let client = AgentsClient::new(&config.agent, tokens)?;

            let definition = AgentDefinition {
                model: config.agent.model_deployment.clone(),
                name: name.clone(),
                instructions: CALENDAR_INSTRUCTIONS.to_string(),
                tools: registry.specs().iter().map(|s| s.to_function_tool()).collect(),
            };
            let agent = client.create_agent(&definition).await.context("Failed to create agent")?;

            info!("Created agent {}", agent.id);
            println!("{} {}", "Created agent:".green(), agent.id);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Setup logging first
    setup_logging().context("Failed to setup logging")?;

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, &config).await.context("Application failed")?;

    Ok(())
}
