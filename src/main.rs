//! teleforge daemon entrypoint: loads configuration and credentials, opens
//! the store, and starts every long-running component — the Fleet
//! Supervisor, the funnel and broadcast dispatchers, the payment webhook
//! server, and the Master Bot's own dispatcher — side by side under one
//! Tokio runtime.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};

use teleforge::ai::ConversationManager;
use teleforge::config::{load_config, runtime_paths};
use teleforge::credentials::Credentials;
use teleforge::fleet::FleetSupervisor;
use teleforge::logging::init_production;
use teleforge::master_bot;
use teleforge::store::Store;
use teleforge::subscription::SubscriptionGate;
use teleforge::telegram::TgTransport;
use teleforge::webhook::{self, WebhookState};

/// Command-line flags. Every setting also has a `config.toml`/environment
/// fallback; flags exist only to override the default data directory for
/// container and test deployments.
#[derive(Debug, Parser)]
#[command(name = "teleforge", about = "Multi-tenant Telegram bot hosting platform")]
struct Cli {
    /// Root data directory (config.toml, .env, database, logs). Defaults to
    /// the platform data directory, or `TELEFORGE_HOME` if set.
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let data_dir = cli.data_dir.or_else(|| std::env::var_os("TELEFORGE_HOME").map(PathBuf::from));
    let paths = runtime_paths(data_dir.as_deref());

    let _logging_guard = init_production(&paths.logs_dir)?;
    info!(root = %paths.root.display(), "teleforge starting");

    let config = load_config(&paths.config_toml)?;
    let credentials = Arc::new(Credentials::load(&paths.env_file)?);

    let store = Store::open(&paths.database_file).await?;

    let gate = SubscriptionGate::new(store.clone(), config.subscription.clone());
    let conversations = ConversationManager::new(store.clone(), gate.clone());
    let fleet = FleetSupervisor::new(store.clone(), conversations, config.dispatch.clone());

    fleet.start().await.context("failed to start fleet supervisor")?;

    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);

    let reconcile_task = tokio::spawn({
        let fleet = fleet.clone();
        let stop_rx = stop_rx.clone();
        async move { fleet.run_reconcile_loop(stop_rx).await }
    });

    let funnel_task = tokio::spawn(teleforge::funnel::dispatcher::run(
        store.clone(),
        fleet.clone(),
        config.dispatch.clone(),
        stop_rx.clone(),
    ));

    let broadcast_task = tokio::spawn(teleforge::broadcast::dispatcher::run(
        store.clone(),
        fleet.clone(),
        config.dispatch.clone(),
        stop_rx.clone(),
    ));

    let expiration_task = tokio::spawn(run_expiration_sweep(gate.clone(), config.dispatch.reconcile_interval_secs, stop_rx.clone()));

    let master_bot_token = credentials.master_bot_token()?.to_owned();
    let webhook_state = Arc::new(WebhookState {
        store: store.clone(),
        password2: credentials
            .get("ROBOKASSA_PASSWORD2")
            .unwrap_or_default()
            .to_owned(),
        subscription_days_per_payment: config.subscription.subscription_days_per_payment,
        tokens_per_purchase: config.subscription.tokens_per_purchase,
        referral_commission_pct: config.subscription.referral_commission_pct,
        master_bot: TgTransport::new(&master_bot_token),
    });

    let webhook_task = tokio::spawn(run_webhook_server(webhook_state, config.server.port));

    let master_bot_task = tokio::spawn(master_bot::run(
        master_bot_token,
        store.clone(),
        gate,
        fleet,
        config.subscription.clone(),
        config.payments.clone(),
        credentials,
    ));

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    info!("shutdown signal received");
    let _ = stop_tx.send(true);

    reconcile_task.abort();
    funnel_task.abort();
    broadcast_task.abort();
    expiration_task.abort();
    webhook_task.abort();
    master_bot_task.abort();

    info!("teleforge stopped");
    Ok(())
}

/// Run [`SubscriptionGate::sweep_expirations`] on the same cadence as the
/// Fleet Supervisor's reconcile loop until `stop` fires.
async fn run_expiration_sweep(
    gate: SubscriptionGate,
    interval_secs: u64,
    mut stop: tokio::sync::watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                match gate.sweep_expirations().await {
                    Ok(0) => {}
                    Ok(n) => info!(expired = n, "subscription expiration sweep"),
                    Err(err) => warn!(error = %err, "subscription expiration sweep failed"),
                }
            }
            _ = stop.changed() => {
                if *stop.borrow() {
                    break;
                }
            }
        }
    }
}

async fn run_webhook_server(state: Arc<WebhookState>, port: u16) {
    let app = webhook::router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, %addr, "failed to bind payment webhook server");
            return;
        }
    };

    info!(%addr, "payment webhook server listening");
    if let Err(err) = axum::serve(listener, app).await {
        error!(error = %err, "payment webhook server stopped");
    }
}
