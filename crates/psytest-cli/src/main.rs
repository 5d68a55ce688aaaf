//! psytest CLI — the user-facing command-line interface.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "psytest", version, about = "Psychometric test delivery and scoring")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate test bundles and report authoring issues
    Validate {
        /// Path to a bundle file (.toml or .json) or a directory of bundles
        #[arg(long)]
        bundle: PathBuf,
    },

    /// Calibrate theoretical norms from a bundle's weights
    Norms {
        /// Path to a bundle file
        #[arg(long)]
        bundle: PathBuf,

        /// Only calibrate this scale
        #[arg(long)]
        scale: Option<u64>,

        /// Output format: text, json
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Score an answer sheet against a bundle
    Score {
        /// Path to a bundle file
        #[arg(long)]
        bundle: PathBuf,

        /// Answer sheet JSON (a submission payload or a bare question map)
        #[arg(long)]
        answers: PathBuf,

        /// Output format: text, json
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Take a test served by the test server
    Play {
        #[arg(long)]
        test_id: u64,

        #[arg(long)]
        user_id: u64,

        /// Invitation token
        #[arg(long)]
        token: String,

        #[arg(long, default_value = "")]
        email: String,

        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Create starter config and example bundle
    Init,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("psytest=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Validate { bundle } => commands::validate::execute(bundle),
        Commands::Norms {
            bundle,
            scale,
            format,
        } => commands::norms::execute(bundle, scale, format),
        Commands::Score {
            bundle,
            answers,
            format,
        } => commands::score::execute(bundle, answers, format),
        Commands::Play {
            test_id,
            user_id,
            token,
            email,
            config,
        } => commands::play::execute(test_id, user_id, token, email, config).await,
        Commands::Init => commands::init::execute(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}
