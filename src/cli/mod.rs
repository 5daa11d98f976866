//! CLI command handling.
//!
//! Provides subcommands for:
//! - Running the gateway (`serve`, the default)
//! - Checking how a launch command will be read (`parse`)

use clap::{ColorChoice, Parser, Subcommand};

use crate::launch::{self, DEFAULT_CONTAINER_PORT, LaunchError};

#[derive(Parser, Debug)]
#[command(name = "mcp-gateway")]
#[command(about = "Route MCP clients to local, sidecar and remote servers")]
#[command(
    long_about = "MCP gateway. Use 'mcp-gateway <subcommand> --help' for details.\nExamples:\n  mcp-gateway serve --port 8911\n  mcp-gateway parse \"docker run -e KEY=v ghcr.io/example/server:latest\""
)]
#[command(version)]
#[command(color = ColorChoice::Auto)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the HTTP gateway (default if no subcommand given)
    #[command(
        about = "Run the gateway",
        long_about = "Starts the HTTP gateway.\nExample: mcp-gateway serve --host 127.0.0.1 --port 8911"
    )]
    Serve {
        /// Address to bind, overrides GATEWAY_HOST
        #[arg(long, env = "GATEWAY_HOST")]
        host: Option<String>,

        /// Port to bind, overrides GATEWAY_PORT
        #[arg(long, env = "GATEWAY_PORT")]
        port: Option<u16>,

        /// Emit logs as JSON lines
        #[arg(long)]
        log_json: bool,
    },

    /// Parse a container-run command and print the result
    #[command(
        about = "Parse a launch command",
        long_about = "Prints the structured form of a docker run command as JSON.\nExample: mcp-gateway parse \"docker run -p 9000:9000 img\""
    )]
    Parse {
        /// The full `docker run ...` command, quoted
        command: String,

        /// Port assumed when the command declares none
        #[arg(long, default_value_t = DEFAULT_CONTAINER_PORT)]
        default_port: u16,
    },
}

/// Render the parsed form of `command` as pretty JSON.
pub fn run_parse_command(command: &str, default_port: u16) -> Result<String, LaunchError> {
    let spec = launch::parse_with_default_port(command, default_port)?;
    Ok(serde_json::to_string_pretty(&spec).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_version() {
        let cmd = Cli::command();
        assert_eq!(
            cmd.get_version().unwrap_or("unknown"),
            env!("CARGO_PKG_VERSION")
        );
    }

    #[test]
    fn test_parse_subcommand() {
        let cli = Cli::try_parse_from([
            "mcp-gateway",
            "parse",
            "docker run img",
            "--default-port",
            "9100",
        ])
        .unwrap();
        match cli.command {
            Some(Command::Parse {
                command,
                default_port,
            }) => {
                assert_eq!(command, "docker run img");
                assert_eq!(default_port, 9100);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_run_parse_command() {
        let out = run_parse_command("docker run -e A=1 ghcr.io/x/y:1", 8000).unwrap();
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["image"], "ghcr.io/x/y:1");
        assert_eq!(value["env"]["A"], "1");
        assert_eq!(value["port"], 8000);

        assert!(run_parse_command("kubectl run img", 8000).is_err());
    }
}
