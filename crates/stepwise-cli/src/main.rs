mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::config::ConfigSubcommand;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "stepwise",
    about = "Durable multi-step orchestration engine: run the server, start and inspect instances",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (defaults to the nearest directory containing .stepwise/)
    #[arg(long, global = true, env = "STEPWISE_ROOT")]
    root: Option<PathBuf>,

    /// Emit JSON instead of human-readable output
    #[arg(long, global = true, short = 'j')]
    json: bool,

    /// Server URL for client commands (defaults to http://localhost:{server.port})
    #[arg(long, global = true, env = "STEPWISE_URL")]
    url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server, resuming unfinished instances
    Serve {
        #[arg(long, env = "APP_PORT")]
        port: Option<u16>,
    },

    /// Start an instance from a payload file (`-` for stdin)
    Start { file: PathBuf },

    /// Show an instance's result, or its status while it runs
    Query { instance_id: String },

    /// List all instances, newest first
    List,

    /// Deliver the completion event for an async action
    RaiseEvent {
        instance_id: String,
        correlation_id: String,
        /// Response document as JSON
        response: String,
    },

    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Serve { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let url = cli.url.as_deref();
    let result = match cli.command {
        Commands::Serve { port } => cmd::serve::run(&root, port),
        Commands::Start { file } => cmd::client_url(&root, url)
            .and_then(|url| cmd::workflow::start(&url, &file, cli.json)),
        Commands::Query { instance_id } => cmd::client_url(&root, url)
            .and_then(|url| cmd::workflow::query(&url, &instance_id, cli.json)),
        Commands::List => {
            cmd::client_url(&root, url).and_then(|url| cmd::workflow::list(&url, cli.json))
        }
        Commands::RaiseEvent {
            instance_id,
            correlation_id,
            response,
        } => cmd::client_url(&root, url).and_then(|url| {
            cmd::event::raise(&url, &instance_id, &correlation_id, &response, cli.json)
        }),
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, cli.json),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
