#![forbid(unsafe_code)]
#![deny(clippy::float_arithmetic)]
#![deny(clippy::float_cmp)]

use anyhow::Context;
use clap::{Parser, Subcommand};
use fpc_core::config::build_secret_resolver;
use fpc_core::portal::ethers_client::EthersFeeJuicePortal;
use fpc_core::portal::mock_client::MockSettlementBridge;
use fpc_core::portal::SettlementBridge;
use fpc_core::rollup::http_client::JsonRpcRollupNode;
use fpc_core::rollup::mock_client::MockRollupNode;
use fpc_core::rollup::RollupNode;
use fpc_core::secrets::SecretResolver;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use topup_node::bridge::BridgeSubmitter;
use topup_node::bridge_store::BridgeStateStore;
use topup_node::checker::TopupChecker;
use topup_node::config::{self, Backend, TopupNodeConfig};
use topup_node::metrics::TopupMetrics;
use topup_node::monitor::ReserveBalanceMonitor;
use topup_node::ops_server::{self, OpsState};
use topup_node::readiness::ReadinessState;
use topup_node::reconcile::ReconcileOutcome;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "FPC reserve top-up controller")]
struct Args {
    /// Path to a TOML config file. If omitted, uses `FPC_TOPUP_CONFIG`.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Collaborators to use.
    #[arg(long, value_enum, default_value_t = Backend::Live)]
    backend: Backend,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Reconcile, then run the top-up loop (default).
    Run,
    /// Validate config, inspect the bridge state file and print a summary.
    Check,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let cfg_path = resolve_config_path(args.config.as_deref()).unwrap_or_else(|| {
        exit_err("missing config: pass --config or set FPC_TOPUP_CONFIG")
    });
    let cfg = config::load_config(&cfg_path).unwrap_or_else(|e| exit_err(&e));
    cfg.validate(args.backend)
        .unwrap_or_else(|e| exit_err(&format!("invalid config: {e}")));

    init_logging(&cfg);

    match args.command.unwrap_or(Command::Run) {
        Command::Check => check(&cfg, &cfg_path, args.backend),
        Command::Run => {
            if let Err(e) = run(&cfg, args.backend).await {
                exit_err(&format!("{e:#}"));
            }
        }
    }
}

fn check(cfg: &TopupNodeConfig, cfg_path: &Path, backend: Backend) {
    let store = BridgeStateStore::new(&cfg.state.path);
    let pending = store
        .load()
        .unwrap_or_else(|e| exit_err(&format!("bridge state unreadable: {e}")));
    let t = &cfg.topup;
    println!("config ok: {}", cfg_path.display());
    println!("  profile            {}", cfg.runtime.profile.as_str());
    println!("  backend            {}", backend.as_str());
    println!("  facility           {}", cfg.facility.address);
    println!("  threshold          {}", t.threshold);
    println!("  amount             {}", t.amount);
    println!("  check interval     {}ms", t.check_interval_ms);
    println!("  confirm timeout    {}ms", t.confirmation_timeout_ms);
    println!("  ready stale after  {}ms", cfg.stale_after().as_millis());
    println!("  state file         {}", cfg.state.path.display());
    match pending {
        None => println!("  pending bridge     none"),
        Some(r) => println!(
            "  pending bridge     message 0x{} (amount {}, baseline {}, submitted {}ms)",
            hex::encode(r.message_hash),
            r.amount,
            r.baseline_balance,
            r.submitted_at_ms
        ),
    }
}

type Collaborators = (Arc<dyn RollupNode>, Arc<dyn SettlementBridge>);

fn build_collaborators(
    cfg: &TopupNodeConfig,
    backend: Backend,
    resolver: &SecretResolver,
) -> anyhow::Result<Collaborators> {
    match backend {
        Backend::Mock => {
            let m = &cfg.mock;
            let rollup = Arc::new(MockRollupNode::new(m.fee_juice_address));
            rollup.set_balance(m.initial_balance);
            let bridge = MockSettlementBridge::linked(
                rollup.clone(),
                m.credit_after_reads,
                m.message_ready_after_checks,
            );
            warn!(event = "mock_backend", "using in-process rollup node and bridge");
            let rollup: Arc<dyn RollupNode> = rollup;
            Ok((rollup, Arc::new(bridge)))
        }
        Backend::Live => {
            let rollup_cfg = cfg.rollup.clone().context("[rollup] missing")?;
            let l1 = cfg.l1.as_ref().context("[l1] missing")?;
            let signer = cfg.l1_signer.as_ref().context("[l1_signer] missing")?;

            let key = resolver
                .resolve(&signer.key)
                .context("failed to resolve l1_signer.key")?;
            info!(secret = "l1_signer.key", provenance = %key.provenance(), "resolved secret");

            let rollup = JsonRpcRollupNode::new(rollup_cfg).context("invalid [rollup] config")?;
            let bridge =
                EthersFeeJuicePortal::new(l1, key.expose()).context("invalid [l1] config")?;
            let rollup: Arc<dyn RollupNode> = Arc::new(rollup);
            Ok((rollup, Arc::new(bridge)))
        }
    }
}

async fn run(cfg: &TopupNodeConfig, backend: Backend) -> anyhow::Result<()> {
    let resolver = build_secret_resolver(cfg.runtime.profile, &cfg.secrets.mounted)
        .map_err(anyhow::Error::msg)?;
    let (rollup, bridge) = build_collaborators(cfg, backend, &resolver)?;

    let readiness = Arc::new(ReadinessState::new(cfg.stale_after()));
    let metrics = Arc::new(TopupMetrics::new().context("failed to register metrics")?);
    let monitor_cfg = cfg.monitor_config().map_err(anyhow::Error::msg)?;
    let monitor = ReserveBalanceMonitor::connect(
        rollup,
        cfg.facility.address,
        &monitor_cfg,
        readiness.clone(),
        metrics.clone(),
    )
    .await
    .context("failed to initialise the balance monitor")?;
    info!(
        fee_juice = %monitor.fee_juice_address(),
        facility = %cfg.facility.address,
        backend = backend.as_str(),
        profile = cfg.runtime.profile.as_str(),
        "balance monitor ready"
    );

    let (cancel_tx, cancel_rx) = watch::channel(false);
    let checker = TopupChecker::new(
        monitor,
        BridgeSubmitter::new(bridge, cfg.facility.address),
        BridgeStateStore::new(&cfg.state.path),
        readiness.clone(),
        metrics.clone(),
        cfg.policy(),
        cancel_rx.clone(),
    );

    let server = ops_server::bind(&cfg.ops.bind_address).map_err(anyhow::Error::msg)?;
    info!(bind = %cfg.ops.bind_address, "ops server listening");
    let stop = Arc::new(AtomicBool::new(false));
    let ops = {
        let state = OpsState {
            readiness: readiness.clone(),
            metrics,
            metrics_enabled: cfg.ops.metrics_enabled,
        };
        let stop = stop.clone();
        std::thread::Builder::new()
            .name("topup-ops".to_string())
            .spawn(move || ops_server::serve(server, state, stop))
            .context("failed to spawn ops server thread")?
    };

    {
        let readiness = readiness.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            info!(event = "shutdown_requested");
            readiness.begin_shutdown();
            let _ = cancel_tx.send(true);
        });
    }

    match checker
        .reconcile()
        .await
        .context("bridge state file is corrupt; refusing to start")?
    {
        ReconcileOutcome::None => {}
        ReconcileOutcome::Confirmed(r) => {
            info!(event = "reconcile_confirmed", observed_delta = %r.observed_delta)
        }
        ReconcileOutcome::Retained(r) => {
            warn!(event = "reconcile_retained", status = r.status.as_str())
        }
    }

    if !readiness.is_shutting_down() {
        checker.run(cancel_rx).await;
    }

    stop.store(true, Ordering::Relaxed);
    if ops.join().is_err() {
        warn!("ops server thread panicked");
    }
    info!("topup-node stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn resolve_config_path(cli: Option<&Path>) -> Option<PathBuf> {
    if let Some(p) = cli {
        return Some(p.to_path_buf());
    }
    std::env::var("FPC_TOPUP_CONFIG").ok().map(PathBuf::from)
}

fn init_logging(cfg: &TopupNodeConfig) {
    // RUST_LOG wins over logging.level.
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.logging.level));

    if cfg.logging.is_json() {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

fn exit_err(msg: &str) -> ! {
    eprintln!("{msg}");
    std::process::exit(2);
}
