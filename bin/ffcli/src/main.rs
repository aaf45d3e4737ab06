mod commands;

use clap::{CommandFactory, Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "ffcli")]
#[command(about = "Drive Firefox from the command line through the ffcli extension", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Firefox profile name or directory (default: $FIREFOX_PROFILE, then the default profile)
    #[arg(short = 'P', long, global = true)]
    profile: Option<String>,

    /// Enable debug logging, including wire traffic
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Call an extension function; prints one JSON line per result
    Do {
        /// Dotted function name, e.g. browser.tabs.query
        #[arg(value_name = "FN")]
        function: String,

        /// Arguments, parsed as JSON/YAML when possible
        #[arg(allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// List objects of a type, optionally filtered by key=value
    List {
        #[arg(value_name = "TYPE")]
        kind: String,
        #[arg(value_name = "FILTER")]
        props: Vec<String>,
    },

    /// Create an object from key=value properties
    Create {
        #[arg(value_name = "TYPE")]
        kind: String,
        props: Vec<String>,
    },

    /// Get one object by id
    Get {
        #[arg(value_name = "TYPE")]
        kind: String,
        id: String,
    },

    /// Update one object with key=value properties
    Update {
        #[arg(value_name = "TYPE")]
        kind: String,
        id: String,
        props: Vec<String>,
    },

    /// Delete one object by id
    Delete {
        #[arg(value_name = "TYPE")]
        kind: String,
        id: String,
    },

    /// Show the extension status
    Status,

    /// Print the browser's user agent
    UserAgent {
        /// Read it from inside a tab
        #[arg(long, conflicts_with = "tab")]
        real: bool,

        /// Read it from this tab
        #[arg(long)]
        tab: Option<i64>,
    },

    /// Make an HTTP request with the browser's cookies and user agent
    Curl(commands::curl::CurlArgs),

    /// Import a Netscape cookie file
    ImportCookies {
        file: std::path::PathBuf,

        /// Container to import into
        #[arg(short, long)]
        container: Option<String>,
    },

    /// Capture a tab as an image
    Screenshot(commands::screenshot::ScreenshotArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if cli.debug { "debug" } else { "warn" }));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        return Ok(());
    };

    let profile = cli
        .profile
        .or_else(|| std::env::var("FIREFOX_PROFILE").ok())
        .filter(|p| !p.is_empty());
    let client = commands::connect(profile.as_deref()).await?;

    let result = match command {
        Commands::Do { function, args } => commands::do_cmd::run(&client, &function, &args).await,
        Commands::Status => commands::do_cmd::run(&client, "status", &[]).await,
        Commands::List { kind, props } => {
            commands::crud::run(&client, commands::crud::Verb::List, &kind, None, Some(&props)).await
        }
        Commands::Create { kind, props } => {
            commands::crud::run(&client, commands::crud::Verb::Create, &kind, None, Some(&props)).await
        }
        Commands::Get { kind, id } => {
            commands::crud::run(&client, commands::crud::Verb::Get, &kind, Some(&id), None).await
        }
        Commands::Update { kind, id, props } => {
            commands::crud::run(&client, commands::crud::Verb::Update, &kind, Some(&id), Some(&props)).await
        }
        Commands::Delete { kind, id } => {
            commands::crud::run(&client, commands::crud::Verb::Delete, &kind, Some(&id), None).await
        }
        Commands::UserAgent { real, tab } => commands::user_agent::run(&client, real, tab).await,
        Commands::Curl(args) => commands::curl::run(&client, args).await,
        Commands::ImportCookies { file, container } => {
            commands::import_cookies::run(&client, &file, container.as_deref()).await
        }
        Commands::Screenshot(args) => commands::screenshot::run(&client, args).await,
    };

    client.stop().await;
    let code = result?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
