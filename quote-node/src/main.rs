#![forbid(unsafe_code)]
#![deny(clippy::float_arithmetic)]
#![deny(clippy::float_cmp)]

use clap::{Parser, Subcommand};
use fpc_core::config::build_secret_resolver;
use fpc_core::quote::{FinalRate, QuoteBinder};
use fpc_core::secrets::{SecretResolver, SecretSource};
use fpc_core::signing::{Ed25519QuoteSigner, QuoteSigner};
use quote_node::access::AccessGate;
use quote_node::config::{self, QuoteNodeConfig};
use quote_node::http_server;
use quote_node::metrics::QuoteMetrics;
use quote_node::quote_api::QuoteApi;
use quote_node::rate_limit::{FixedWindowLimiter, SystemTimeSource, TimeSource};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "FPC quote issuer")]
struct Args {
    /// Path to a TOML config file. If omitted, uses `FPC_QUOTE_CONFIG`.
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve quotes (default).
    Run,
    /// Validate config, resolve secrets and print a summary.
    Check,
}

fn main() {
    let args = Args::parse();

    let cfg_path = resolve_config_path(args.config.as_deref()).unwrap_or_else(|| {
        exit_err("missing config: pass --config or set FPC_QUOTE_CONFIG")
    });
    let cfg = config::load_config(&cfg_path).unwrap_or_else(|e| exit_err(&e));
    cfg.validate()
        .unwrap_or_else(|e| exit_err(&format!("invalid config: {e}")));

    init_logging(&cfg);

    let resolver = build_secret_resolver(cfg.runtime.profile, &cfg.secrets.mounted)
        .unwrap_or_else(|e| exit_err(&e));
    let parts = build(&cfg, &resolver).unwrap_or_else(|e| exit_err(&e));

    match args.command.unwrap_or(Command::Run) {
        Command::Check => {
            let rate = parts.api_rate;
            println!("config ok: {}", cfg_path.display());
            println!("  profile            {}", cfg.runtime.profile.as_str());
            println!("  facility           {}", cfg.quote.facility_address);
            println!(
                "  accepted asset     {} ({})",
                cfg.quote.accepted_asset_name, cfg.quote.accepted_asset_address
            );
            println!("  final rate         {}/{}", rate.num, rate.den);
            println!("  validity           {}s", cfg.effective_validity_secs());
            println!("  auth mode          {}", cfg.auth.mode.as_str());
            println!("  signer public key  {}", parts.signer_public_key);
        }
        Command::Run => {
            let stop = Arc::new(AtomicBool::new(false));
            {
                let stop = stop.clone();
                let _ = signal_hook::flag::register(signal_hook::consts::SIGINT, stop.clone());
                let _ = signal_hook::flag::register(signal_hook::consts::SIGTERM, stop);
            }
            info!(
                bind = %cfg.server.bind_address,
                profile = cfg.runtime.profile.as_str(),
                "starting quote-node"
            );
            if let Err(e) = http_server::serve(
                &cfg.server.bind_address,
                cfg.server.workers,
                parts.api,
                cfg.server.metrics_enabled,
                stop,
            ) {
                exit_err(&e);
            }
        }
    }
}

struct Parts {
    api: Arc<QuoteApi<Ed25519QuoteSigner>>,
    api_rate: FinalRate,
    signer_public_key: String,
}

fn resolve_secret(
    resolver: &SecretResolver,
    key: &str,
    source: &SecretSource,
) -> Result<String, String> {
    let s = resolver
        .resolve(source)
        .map_err(|e| format!("failed to resolve {key}: {e}"))?;
    info!(secret = key, provenance = %s.provenance(), "resolved secret");
    Ok(s.expose().to_string())
}

fn build(cfg: &QuoteNodeConfig, resolver: &SecretResolver) -> Result<Parts, String> {
    let signing_key = resolve_secret(resolver, "signer.key", &cfg.signer.key)?;
    let signer = Ed25519QuoteSigner::from_hex(&signing_key)
        .map_err(|e| format!("invalid signer.key: {e}"))?;
    let signer_public_key = signer.public_key_hex();

    let api_key = cfg
        .auth
        .api_key
        .as_ref()
        .map(|s| resolve_secret(resolver, "auth.api_key", s))
        .transpose()?;
    let trusted_value = cfg
        .auth
        .trusted_header_value
        .as_ref()
        .map(|s| resolve_secret(resolver, "auth.trusted_header_value", s))
        .transpose()?;
    let gate = AccessGate::new(
        cfg.auth.mode,
        api_key.as_deref(),
        &cfg.auth.trusted_header_name,
        trusted_value.as_deref(),
    )?;

    let q = &cfg.quote;
    let rate = FinalRate::from_market(q.market_rate_num, q.market_rate_den, q.fee_bips)
        .map_err(|e| format!("invalid [quote] rate: {e}"))?;
    if q.validity_seconds > cfg.effective_validity_secs() {
        warn!(
            configured = q.validity_seconds,
            applied = cfg.effective_validity_secs(),
            "quote.validity_seconds capped"
        );
    }
    let binder = QuoteBinder::new(
        q.facility_address,
        q.accepted_asset_address,
        rate,
        q.validity_seconds,
        signer,
    )
    .map_err(|e| format!("invalid [quote] config: {e}"))?;

    let time: Arc<dyn TimeSource> = Arc::new(SystemTimeSource);
    let limiter = FixedWindowLimiter::new(cfg.rate_limit.clone(), time.clone());
    let metrics =
        Arc::new(QuoteMetrics::new().map_err(|e| format!("failed to register metrics: {e}"))?);

    info!(
        facility = %q.facility_address,
        asset = %q.accepted_asset_address,
        rate_num = %rate.num,
        rate_den = %rate.den,
        auth_mode = cfg.auth.mode.as_str(),
        rate_limit_enabled = cfg.rate_limit.enabled,
        signer = %signer_public_key,
        "quote service configured"
    );

    Ok(Parts {
        api: Arc::new(QuoteApi::new(
            binder,
            q.accepted_asset_name.clone(),
            gate,
            limiter,
            metrics,
            time,
        )),
        api_rate: rate,
        signer_public_key,
    })
}

fn resolve_config_path(cli: Option<&Path>) -> Option<PathBuf> {
    if let Some(p) = cli {
        return Some(p.to_path_buf());
    }
    std::env::var("FPC_QUOTE_CONFIG").ok().map(PathBuf::from)
}

fn init_logging(cfg: &QuoteNodeConfig) {
    // Prefer explicit config logging.level unless user set RUST_LOG.
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
