use clap::{Args, Parser, Subcommand};

mod app;
mod doctor;
mod replay;

#[derive(Debug, Parser)]
#[command(
    name = "codex-feishu-relay",
    version,
    about = "Relay Feishu chat messages to a local codex agent"
)]
struct Cli {
    /// Config file (default: ~/.codex/feishu-bridge/config.toml)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Listen for Feishu events and answer them (default)
    Run(AgentOpts),
    /// Push one recorded message event through the pipeline and print the reply
    Replay {
        /// JSON file holding a message event or a full callback body
        fixture: String,
        #[command(flatten)]
        opts: AgentOpts,
    },
    /// Check config, codex, workspaces and storage
    Doctor {
        #[arg(long)]
        codex_path: Option<String>,
    },
}

/// Flags shared by every command that runs the pipeline.
#[derive(Debug, Clone, Default, Args)]
pub struct AgentOpts {
    /// Echo prompts instead of running codex
    #[arg(long)]
    pub dry_run: bool,
    /// codex binary (overrides codex.path)
    #[arg(long)]
    pub codex_path: Option<String>,
    /// The bot's open_id, for exact mention detection
    #[arg(long)]
    pub bot_open_id: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "relay_gateway=info,relay_pipeline=info,relay_feishu=info,relay_agent=info".into()
            }),
        )
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    match cli.command.unwrap_or(Command::Run(AgentOpts::default())) {
        Command::Run(opts) => app::run_service(config_path, opts).await,
        Command::Replay { fixture, opts } => {
            let sent = replay::run_replay(config_path, &fixture, opts).await?;
            println!("{}", serde_json::to_string_pretty(&serde_json::json!({ "sent": sent }))?);
            Ok(())
        }
        Command::Doctor { codex_path } => {
            let results = doctor::run_doctor(config_path, codex_path.as_deref()).await;
            for r in &results {
                println!("{r}");
            }
            let code = doctor::exit_code(&results);
            if code != 0 {
                std::process::exit(code);
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_means_run() {
        let cli = Cli::try_parse_from(["codex-feishu-relay", "--config", "/tmp/c.toml"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.config.as_deref(), Some("/tmp/c.toml"));
    }

    #[test]
    fn replay_accepts_agent_flags() {
        let cli = Cli::try_parse_from([
            "codex-feishu-relay",
            "replay",
            "event.json",
            "--dry-run",
            "--bot-open-id",
            "ou_bot",
        ])
        .unwrap();
        match cli.command {
            Some(Command::Replay { fixture, opts }) => {
                assert_eq!(fixture, "event.json");
                assert!(opts.dry_run);
                assert_eq!(opts.bot_open_id.as_deref(), Some("ou_bot"));
                assert!(opts.codex_path.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn config_flag_is_global() {
        let cli = Cli::try_parse_from(["codex-feishu-relay", "doctor", "--config", "x.toml"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Doctor { .. })));
        assert_eq!(cli.config.as_deref(), Some("x.toml"));
    }
}
