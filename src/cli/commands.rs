//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - serve: run the tool server over stdio or a Unix socket
//! - chat: interactive conversation with a registered agent
//! - call: invoke one tool by hand
//! - tools: list the advertised tools
//! - agent: manage agents on the orchestrator

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Calbot - calendar tools for a conversational agent
#[derive(Parser, Debug)]
#[command(name = "calbot")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the tool server (stdio unless --socket is given)
    Serve {
        /// Serve on a Unix socket at this path instead of stdio
        #[arg(short, long)]
        socket: Option<PathBuf>,
    },

    /// Chat with the calendar agent
    Chat {
        /// Agent to converse with (falls back to AGENT_ID)
        #[arg(short, long)]
        agent_id: Option<String>,

        /// Command that starts the tool server (defaults to `calbot serve`)
        #[arg(long)]
        server_cmd: Option<String>,

        /// Use the tool server listening on this Unix socket
        #[arg(long, conflicts_with = "server_cmd")]
        connect: Option<PathBuf>,
    },

    /// Invoke one tool through the tool server
    Call {
        /// Tool name
        name: String,

        /// Arguments as a JSON object
        #[arg(short, long, default_value = "{}")]
        args: String,

        /// Use the tool server listening on this Unix socket
        #[arg(long)]
        connect: Option<PathBuf>,
    },

    /// List the tools the server advertises
    Tools {
        /// Use the tool server listening on this Unix socket
        #[arg(long)]
        connect: Option<PathBuf>,
    },

    /// Agent management commands
    Agent {
        #[command(subcommand)]
        command: AgentCommands,
    },
}

/// Agent management subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum AgentCommands {
    /// Register a new agent with the calendar tools
    Create {
        /// Agent name
        #[arg(short, long, default_value = "calendar-agent")]
        name: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_requires_subcommand() {
        assert!(Cli::try_parse_from(["calbot"]).is_err());
    }

    #[test]
    fn test_cli_global_flags() {
        let cli = Cli::try_parse_from(["calbot", "tools", "-v", "-c", "/etc/calbot.yml"]).unwrap();
        assert!(cli.is_verbose());
        assert_eq!(cli.config.as_ref(), Some(&PathBuf::from("/etc/calbot.yml")));
        assert!(matches!(cli.command, Commands::Tools { connect: None }));
    }

    #[test]
    fn test_serve_defaults_to_stdio() {
        let cli = Cli::try_parse_from(["calbot", "serve"]).unwrap();
        match cli.command {
            Commands::Serve { socket } => assert!(socket.is_none()),
            _ => panic!("Expected serve command"),
        }
    }

    #[test]
    fn test_serve_socket() {
        let cli = Cli::try_parse_from(["calbot", "serve", "--socket", "/tmp/calbot.sock"]).unwrap();
        match cli.command {
            Commands::Serve { socket } => assert_eq!(socket, Some(PathBuf::from("/tmp/calbot.sock"))),
            _ => panic!("Expected serve command"),
        }
    }

    #[test]
    fn test_chat_command() {
        let cli = Cli::try_parse_from(["calbot", "chat", "-a", "asst_1", "--server-cmd", "calbot serve"]).unwrap();
        match cli.command {
            Commands::Chat {
                agent_id,
                server_cmd,
                connect,
            } => {
                assert_eq!(agent_id.as_deref(), Some("asst_1"));
                assert_eq!(server_cmd.as_deref(), Some("calbot serve"));
                assert!(connect.is_none());
            }
            _ => panic!("Expected chat command"),
        }
    }

    #[test]
    fn test_connect_to_running_server() {
        let cli = Cli::try_parse_from(["calbot", "tools", "--connect", "/tmp/calbot.sock"]).unwrap();
        match cli.command {
            Commands::Tools { connect } => assert_eq!(connect, Some(PathBuf::from("/tmp/calbot.sock"))),
            _ => panic!("Expected tools command"),
        }

        let cli = Cli::try_parse_from(["calbot", "call", "t", "--connect", "/tmp/calbot.sock"]).unwrap();
        assert!(matches!(cli.command, Commands::Call { connect: Some(_), .. }));
    }

    #[test]
    fn test_chat_connect_conflicts_with_server_cmd() {
        let result = Cli::try_parse_from([
            "calbot",
            "chat",
            "--server-cmd",
            "calbot serve",
            "--connect",
            "/tmp/calbot.sock",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_call_command() {
        let cli = Cli::try_parse_from([
            "calbot",
            "call",
            "get_user_availability_graph",
            "--args",
            r#"{"user_email":"a@x.com"}"#,
        ])
        .unwrap();
        match cli.command {
            Commands::Call { name, args, .. } => {
                assert_eq!(name, "get_user_availability_graph");
                assert!(args.contains("a@x.com"));
            }
            _ => panic!("Expected call command"),
        }
    }

    #[test]
    fn test_call_args_default() {
        let cli = Cli::try_parse_from(["calbot", "call", "ping_tool"]).unwrap();
        match cli.command {
            Commands::Call { args, .. } => assert_eq!(args, "{}"),
            _ => panic!("Expected call command"),
        }
    }

    #[test]
    fn test_agent_create() {
        let cli = Cli::try_parse_from(["calbot", "agent", "create"]).unwrap();
        match cli.command {
            Commands::Agent {
                command: AgentCommands::Create { name },
            } => assert_eq!(name, "calendar-agent"),
            _ => panic!("Expected agent create command"),
        }

        let cli = Cli::try_parse_from(["calbot", "agent", "create", "--name", "scheduler"]).unwrap();
        match cli.command {
            Commands::Agent {
                command: AgentCommands::Create { name },
            } => assert_eq!(name, "scheduler"),
            _ => panic!("Expected agent create command"),
        }
    }

    #[test]
    fn test_help_works() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_version_flag() {
        let result = Cli::try_parse_from(["calbot", "--version"]);
        assert!(result.is_err());
    }
}
