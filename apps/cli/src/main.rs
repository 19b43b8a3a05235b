mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bramble")]
#[command(about = "An incremental static site compiler", long_about = None)]
struct Cli {
    /// Log build stages at info level.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    New {
        name: PathBuf,
    },
    Build {
        #[arg(long, short, default_value = ".")]
        source: PathBuf,

        /// Render every document instead of reusing unchanged output.
        #[arg(long)]
        full: bool,

        #[arg(long)]
        clean: bool,

        #[arg(long)]
        drafts: bool,

        #[arg(long)]
        future: bool,

        #[arg(long)]
        strict: bool,

        /// Print per-stage timings.
        #[arg(long)]
        timings: bool,
    },
    Serve {
        #[arg(long, short, default_value = ".")]
        source: PathBuf,

        #[arg(long, default_value = "4000")]
        port: u16,

        #[arg(long)]
        drafts: bool,

        #[arg(long)]
        future: bool,

        #[arg(long)]
        open: bool,
    },
    Clean {
        #[arg(long, short, default_value = ".")]
        source: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // --verbose selects info, otherwise RUST_LOG, otherwise warnings only
    let filter = if cli.verbose {
        EnvFilter::new("info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let result = match cli.command {
        Commands::New { name } => commands::new_site(&name),
        Commands::Build {
            source,
            full,
            clean,
            drafts,
            future,
            strict,
            timings,
        } => commands::build_site(
            &source,
            &bramble_ssg::BuildOptions {
                incremental: !full,
                clean,
                show_drafts: drafts,
                show_future: future,
                strict,
            },
            timings,
        ),
        Commands::Serve {
            source,
            port,
            drafts,
            future,
            open,
        } => commands::serve_site(&source, port, drafts, future, open).await,
        Commands::Clean { source } => commands::clean_site(&source),
    };

    if let Err(error) = result {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}
