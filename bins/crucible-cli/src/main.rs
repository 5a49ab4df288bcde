mod commands;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "crucible-cli")]
#[command(about = "Crucible CLI - Run C++ programs and inspect runner services", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile and run a C++ source file
    Run {
        /// Source file to compile
        file: PathBuf,

        #[command(flatten)]
        input: InputArgs,

        /// Send the program to a runner service instead of running it locally
        #[arg(short, long)]
        remote: Option<String>,
    },

    /// Check that a runner service is alive
    Health {
        /// Base URL of the service (e.g., http://localhost:3001)
        #[arg(short, long, default_value = "http://localhost:3001")]
        url: String,
    },

    /// Print the effective configuration
    Config,
}

#[derive(Args)]
#[group(multiple = false)]
struct InputArgs {
    /// Text fed to the program's stdin
    #[arg(short, long)]
    input: Option<String>,

    /// File whose contents are fed to the program's stdin
    #[arg(long)]
    input_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let success = match cli.command {
        Commands::Run {
            file,
            input,
            remote,
        } => {
            let stdin = commands::read_input(input.input, input.input_file.as_deref())?;
            commands::run_file(&file, stdin, remote.as_deref()).await?
        }
        Commands::Health { url } => commands::health(&url).await?,
        Commands::Config => {
            commands::print_config()?;
            true
        }
    };

    Ok(if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
