mod agent;
mod config;
mod discovery;
mod prompt;
mod relay;
mod server;

use anyhow::Context;
use axum::body::Body;
use axum::extract::Request;
use clap::Parser;
use dotenvy::dotenv;
use sentry::integrations::tower::{NewSentryLayer, SentryHttpLayer};
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(
    name = "paautin-ai",
    about = "Companion server bridging a visual flow editor to a local AI agent CLI",
    version
)]
struct Cli {
    /// Port to listen on
    #[arg(short = 'p', long)]
    port: Option<u16>,

    /// Project directory the agent works in
    #[arg(short = 'd', long)]
    project: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv().ok();
    let cli = Cli::parse();

    let mut config = config::Config::from_env();
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(project) = cli.project {
        config.project_dir = project;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("paautin_ai=info,tower_http=warn,hyper=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_tree::HierarchicalLayer::new(2)
                .with_targets(true)
                .with_bracketed_fields(false),
        )
        .with(sentry::integrations::tracing::layer().event_filter(
            |metadata| match *metadata.level() {
                tracing::Level::ERROR => sentry::integrations::tracing::EventFilter::Event,
                tracing::Level::WARN | tracing::Level::INFO => {
                    sentry::integrations::tracing::EventFilter::Breadcrumb
                }
                _ => sentry::integrations::tracing::EventFilter::Ignore,
            },
        ))
        .init();

    let _guard = sentry::init((
        config.sentry_dsn.clone().unwrap_or_default(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: Some(config.environment.clone().into()),
            send_default_pii: false,
            traces_sample_rate: 0.2,
            enable_logs: true,
            ..Default::default()
        },
    ));

    // The agent CLI is a hard startup dependency, not a per-request error.
    let Some(agent_bin) = discovery::find_agent_binary() else {
        tracing::error!(
            "agent CLI '{}' not found on PATH, in editor extension installs, \
             or in common install locations",
            discovery::AGENT_BIN
        );
        std::process::exit(1);
    };

    tracing::info!(
        bin = %agent_bin.display(),
        mode = config.mode.as_str(),
        strategy = config.spawn_strategy.as_str(),
        project = %config.project_dir.display(),
        "resolved agent binary"
    );

    let http_client = Arc::new(
        reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            // No overall timeout: chat responses are long-lived streams.
            .build()
            .context("failed to build HTTP client")?,
    );

    let port = config.port;
    let state = server::AppState {
        config: Arc::new(config),
        http_client,
        agent_bin: Arc::new(agent_bin),
    };

    let app = server::create_app(state)
        .layer(SentryHttpLayer::new().enable_transaction())
        .layer(NewSentryLayer::<Request<Body>>::new_from_top());

    let addr = format!("127.0.0.1:{port}");
    let listener = TcpListener::bind(&addr).await?;
    println!("Listening on http://{addr}");
    axum::serve(listener, app).await?;

    Ok(())
}
