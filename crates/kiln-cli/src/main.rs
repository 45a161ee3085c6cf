use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use std::io;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt as _, util::SubscriberInitExt as _};

mod commands;
mod config;

/// Front-end asset build pipeline.
///
/// Kiln copies vendor libraries and packages into the web root, compiles
/// style sources to CSS, bundles the application and cleans it all up
/// again, driven by `kiln.toml`.
///
/// EXAMPLES:
///     kiln build                   Incremental development build
///     kiln publish                 Full release build
///     kiln watch                   Recompile styles on change
///     kiln tasks --plan publish    Show what publish would run
///
/// ENVIRONMENT VARIABLES:
///     KILN_MODE         Set to 'full' to force full builds
///     KILN_JSON         Set to '1' for JSON output by default
///     KILN_LOG          Tracing filter (default: kiln=info)
///     NO_COLOR          Set to disable colored output
#[derive(Parser)]
#[command(name = "kiln")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Project directory (defaults to the current directory)
    #[arg(long, short = 'C', global = true, value_name = "DIR")]
    project: Option<PathBuf>,
    /// Run in full mode: minify, write source maps, bundle everything
    #[arg(long, global = true)]
    full: bool,
    /// Verbose output (debug logging)
    #[arg(long, short = 'v', global = true)]
    verbose: bool,
    /// Quiet output (warnings and errors only)
    #[arg(long, short = 'q', global = true, conflicts_with = "verbose")]
    quiet: bool,
    /// JSON summary output
    #[arg(long, global = true, env = "KILN_JSON")]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Remove every declared output
    Clean,

    /// Copy libraries, packages and modules
    Copy,

    /// Copy, then compile styles
    Compile,

    /// Compile, then bundle
    ///
    /// EXAMPLES:
    ///     kiln build                   Development build
    ///     kiln build --full            Release-quality build
    #[command(visible_alias = "b")]
    Build,

    /// Clean, then compile
    Full,

    /// Clean, compile, run the program compiler and bundle, in full mode
    Publish,

    /// Compile styles, then recompile whenever a style source changes
    #[command(visible_alias = "w")]
    Watch,

    /// Run any declared task
    ///
    /// EXAMPLES:
    ///     kiln run sass                Compile styles only
    ///     kiln run typescript          Run the program compiler
    #[command(visible_alias = "r")]
    Run {
        /// Task name
        task: String,
    },

    /// List tasks or show a task's execution plan
    Tasks {
        /// Show the waves of work this task would run
        #[arg(long, value_name = "TASK")]
        plan: Option<String>,
    },

    /// Generate shell completions
    ///
    /// EXAMPLES:
    ///     kiln completions bash > ~/.local/share/bash-completion/completions/kiln
    ///     kiln completions zsh > ~/.zfunc/_kiln
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn init_logging(directives: &str) {
    let filter = tracing_subscriber::EnvFilter::try_new(directives)
        .unwrap_or_else(|_| config::DEFAULT_LOG_FILTER.into());
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cli_config = config::Config::from_env()?;

    if cli_config.no_color {
        colored::control::set_override(false);
    }
    init_logging(&cli_config.log_directives(cli.verbose, cli.quiet));

    let project_dir = cli.project.clone().unwrap_or_else(|| PathBuf::from("."));
    let options = commands::Options {
        project_dir,
        mode: cli_config.effective_mode(cli.full),
        quiet: cli.quiet,
        json: cli.json,
    };

    match cli.command {
        Commands::Clean => commands::run::run("clean", &options).await?,
        Commands::Copy => commands::run::run("copy", &options).await?,
        Commands::Compile => commands::run::run("compile", &options).await?,
        Commands::Build => commands::run::run("build", &options).await?,
        Commands::Full => commands::run::run("full", &options).await?,
        Commands::Publish => commands::run::run("publish", &options).await?,
        Commands::Run { task } => commands::run::run(&task, &options).await?,
        Commands::Watch => commands::watch::run_watch(&options).await?,
        Commands::Tasks { plan } => commands::tasks::run(plan.as_deref(), &options)?,
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            generate(shell, &mut cmd, name, &mut io::stdout());
        }
    }

    Ok(())
}
