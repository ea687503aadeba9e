//! hugodev - Hugo development server orchestrator

use anyhow::Context;
use clap::{Parser, Subcommand};
use hugodev_cli::commands::{self, LaunchOptions};
use hugodev_config::GlobalConfig;
use hugodev_core::{listen_for_shutdown, DevEnvironment, Stdio};
use hugodev_provider::{create_provider, ContainerProvider, HttpRegistry};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "hugodev")]
#[command(author, version, about = "Hugo development container orchestrator", long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the Hugo dev server in a container, restarting it when files change
    LaunchServer {
        /// Image to run (default from config)
        #[arg(long)]
        docker_image: Option<String>,
        /// Host port the server is published on
        #[arg(long)]
        host_port: Option<u16>,
        /// Port the server listens on inside the container
        #[arg(long)]
        container_port: Option<u16>,
        /// Directory to mount and watch for changes
        #[arg(long, default_value = ".")]
        watch_dir: PathBuf,
        /// Also mount the site's hugo.toml over the central config
        #[arg(long)]
        mount_toml: bool,
        /// Pull the image first when the registry has a newer digest
        #[arg(long)]
        pull_latest: bool,
        /// Registry prefix to check for newer images (empty disables it)
        #[arg(long)]
        registry: Option<String>,
    },

    /// Pull a prebuilt environment image and tag it locally
    PullImage {
        /// Environment: author-dev or admin-dev
        #[arg(long, value_name = "ENV")]
        env: String,
        /// Registry prefix to pull from (default from config)
        #[arg(long)]
        registry: Option<String>,
    },

    /// Build an environment image from the Dockerfile in the current directory
    BuildImage {
        /// Environment: author-dev or admin-dev
        env: String,
        /// Tag of the hugomods/hugo base image
        #[arg(long, default_value = "latest")]
        hugo_version: String,
    },

    /// Show or edit global configuration
    Config {
        /// Open config in editor
        #[arg(short, long)]
        edit: bool,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config = GlobalConfig::load().unwrap_or_else(|e| {
        tracing::warn!("{}; using defaults", e);
        GlobalConfig::default()
    });

    // Everything below validates its arguments before touching the daemon
    match cli.command {
        Commands::Config { edit } => commands::config(edit).await,

        Commands::LaunchServer {
            docker_image,
            host_port,
            container_port,
            watch_dir,
            mount_toml,
            pull_latest,
            registry,
        } => {
            let opts = LaunchOptions {
                docker_image,
                host_port,
                container_port,
                watch_dir,
                mount_toml,
                pull_latest,
                registry,
            };
            let server = commands::server_config(&config, &opts)?;
            let provider: Arc<dyn ContainerProvider> = Arc::from(connect(&config).await?);
            let registry = Arc::new(HttpRegistry::new()?);

            let shutdown = CancellationToken::new();
            let listener = listen_for_shutdown(shutdown.clone());
            let result = commands::launch_server(
                server,
                provider,
                registry,
                Arc::new(Stdio::new()),
                shutdown.clone(),
            )
            .await;
            shutdown.cancel();
            let _ = listener.await;
            result
        }

        Commands::PullImage { env, registry } => {
            env.parse::<DevEnvironment>()?;
            let prefix = registry.unwrap_or_else(|| config.registry.prefix.clone());
            let provider = connect(&config).await?;
            commands::pull_image(provider.as_ref(), &env, &prefix).await
        }

        Commands::BuildImage { env, hugo_version } => {
            let env: DevEnvironment = env.parse()?;
            let context = std::env::current_dir().context("Failed to read current directory")?;
            let branch = commands::check_build_context(env, &context)?;
            println!("Building {} from the {} branch of the central repository", env, branch);

            let provider = connect(&config).await?;
            commands::build_image(provider.as_ref(), env, &context, &hugo_version).await
        }
    }
}

async fn connect(config: &GlobalConfig) -> anyhow::Result<Box<dyn ContainerProvider>> {
    let provider = create_provider(config).await?;
    commands::preflight(provider.as_ref()).await?;
    Ok(provider)
}
