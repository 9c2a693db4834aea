// # announced - Announcement Daemon
//
// Thin host around `announce_core::AnnouncementService`. It owns the
// expiry timer for the configured store so that versions rotate on time
// even when no admin request arrives. All announcement logic lives in
// announce-core.
//
// The daemon is responsible for:
// 1. Reading configuration from environment variables
// 2. Initializing logging and the runtime
// 3. Registering store backends and connecting to the configured one
// 4. Starting the service and logging its events until shutdown
//
// ## Configuration
//
// ### Store
// - `ANNOUNCE_STORE_TYPE`: Store backend (memory, redis). Default: redis
// - `ANNOUNCE_REDIS_URL`: Redis URL. Default: redis://127.0.0.1:6379
//
// ### Versions
// - `ANNOUNCE_CAPACITY`: Announcements per version (1-31). Default: 30
// - `ANNOUNCE_EXPIRE_SECS`: Version lifetime in seconds (at most ten years). Default: 604800
// - `ANNOUNCE_KEY_PREFIX`: Prefix of version keys. Default: ANNOUNCE:
// - `ANNOUNCE_REGISTRY_KEY`: Key of the current-version entry. Default: V:AND:E
// - `ANNOUNCE_EXPIRY_ROTATION`: if_unchanged or unconditional. Default: if_unchanged
// - `ANNOUNCE_RETRY_DELAY_SECS`: Delay before retrying a failed expiry rotation (1-300). Default: 30
//
// ### Daemon
// - `ANNOUNCE_SHUTDOWN_TIMEOUT_SECS`: Time allowed for a clean stop. Default: 10
// - `ANNOUNCE_LOG_LEVEL`: trace, debug, info, warn, error. Default: info
//
// ## Example
//
// ```bash
// export ANNOUNCE_STORE_TYPE=redis
// export ANNOUNCE_REDIS_URL=redis://10.0.0.5:6379
// export ANNOUNCE_EXPIRE_SECS=86400
//
// announced
// ```

use anyhow::{Context, Result};
use announce_core::{
    AnnouncementConfig, AnnouncementEvent, AnnouncementService, ExpiryRotation, StoreConfig,
    StoreRegistry, MAX_CAPACITY,
};
use std::env;
use std::process::ExitCode;
use std::str::FromStr;
use std::time::Duration;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum AnnounceExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<AnnounceExitCode> for ExitCode {
    fn from(code: AnnounceExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Daemon configuration
#[derive(Debug)]
struct Config {
    service: AnnouncementConfig,
    shutdown_timeout: Duration,
    log_level: String,
}

/// Parse an optional variable, naming it in the error
fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{} has invalid value '{}': {}", name, raw, e)),
    }
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration from any variable source
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut service = AnnouncementConfig::new();

        service.store = match lookup("ANNOUNCE_STORE_TYPE")
            .unwrap_or_else(|| "redis".to_string())
            .to_lowercase()
            .as_str()
        {
            "memory" => StoreConfig::Memory,
            "redis" => StoreConfig::Redis {
                url: lookup("ANNOUNCE_REDIS_URL")
                    .unwrap_or_else(|| "redis://127.0.0.1:6379".to_string()),
            },
            other => anyhow::bail!(
                "ANNOUNCE_STORE_TYPE '{}' is not supported. Supported types: memory, redis",
                other
            ),
        };

        if let Some(capacity) = parse_var(&lookup, "ANNOUNCE_CAPACITY")? {
            service.capacity = capacity;
        }
        if let Some(expire_seconds) = parse_var(&lookup, "ANNOUNCE_EXPIRE_SECS")? {
            service.expire_seconds = expire_seconds;
        }
        if let Some(prefix) = lookup("ANNOUNCE_KEY_PREFIX") {
            service.key_prefix = prefix;
        }
        if let Some(registry_key) = lookup("ANNOUNCE_REGISTRY_KEY") {
            service.registry_key = registry_key;
        }
        if let Some(rotation) = parse_var::<ExpiryRotation>(&lookup, "ANNOUNCE_EXPIRY_ROTATION")? {
            service.expiry_rotation = rotation;
        }
        if let Some(retry_delay) = parse_var(&lookup, "ANNOUNCE_RETRY_DELAY_SECS")? {
            service.retry_delay_secs = retry_delay;
        }

        let shutdown_secs: u64 = parse_var(&lookup, "ANNOUNCE_SHUTDOWN_TIMEOUT_SECS")?.unwrap_or(10);

        Ok(Self {
            service,
            shutdown_timeout: Duration::from_secs(shutdown_secs),
            log_level: lookup("ANNOUNCE_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        if !(1..=MAX_CAPACITY).contains(&self.service.capacity) {
            anyhow::bail!(
                "ANNOUNCE_CAPACITY must be between 1 and {}. Got: {}",
                MAX_CAPACITY,
                self.service.capacity
            );
        }

        if self.shutdown_timeout.is_zero() {
            anyhow::bail!("ANNOUNCE_SHUTDOWN_TIMEOUT_SECS must be at least 1");
        }

        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "ANNOUNCE_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }

        self.service
            .validate()
            .context("Invalid announcement configuration")?;

        Ok(())
    }
}

fn main() -> ExitCode {
    // Load configuration from environment
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return AnnounceExitCode::ConfigError.into();
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {:#}", e);
        return AnnounceExitCode::ConfigError.into();
    }

    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return AnnounceExitCode::ConfigError.into();
    }

    info!("Starting announced daemon");
    info!(
        "Store: {}, capacity {}, ttl {}s",
        config.service.store.type_name(),
        config.service.capacity,
        config.service.expire_seconds
    );

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return AnnounceExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        if let Err(e) = run_daemon(config).await {
            error!("Daemon error: {:#}", e);
            AnnounceExitCode::RuntimeError
        } else {
            AnnounceExitCode::CleanShutdown
        }
    });

    result.into()
}

/// Registry with every store backend compiled in
fn store_registry() -> StoreRegistry {
    let registry = StoreRegistry::with_builtin();

    #[cfg(feature = "redis")]
    {
        info!("Registering Redis store");
        announce_store_redis::register(&registry);
    }

    registry
}

/// Run the daemon
async fn run_daemon(config: Config) -> Result<()> {
    let registry = store_registry();
    let store = registry
        .create_store(&config.service.store)
        .await
        .with_context(|| format!("Failed to open {} store", config.service.store.type_name()))?;

    let (service, events): (AnnouncementService, _) =
        AnnouncementService::new(store, config.service.clone())?;

    service.start().await.context("Failed to start announcement service")?;
    match service.get_version().await? {
        Some(version) => info!(
            "Serving version {} (expires at {})",
            version,
            service.get_expire_time().await?
        ),
        None => info!("No version yet; the first announcement will create one"),
    }

    let logger = tokio::spawn(log_events(events));

    let signal = wait_for_shutdown().await?;
    info!("Received shutdown signal: {}", signal);

    if tokio::time::timeout(config.shutdown_timeout, service.stop())
        .await
        .is_err()
    {
        warn!("Service did not stop within {:?}", config.shutdown_timeout);
    }

    drop(service);
    if let Err(e) = logger.await {
        warn!("Event logger ended abnormally: {}", e);
    }

    info!("Shutdown complete");
    Ok(())
}

/// Log every service event until the service is gone
async fn log_events(events: tokio::sync::mpsc::Receiver<AnnouncementEvent>) {
    let mut events = ReceiverStream::new(events);
    while let Some(event) = events.next().await {
        match event {
            AnnouncementEvent::VersionRotated {
                previous,
                current,
                expiry,
                reason,
            } => info!(
                "Version {} -> {} ({}), expires at {}",
                previous.as_deref().unwrap_or("none"),
                current,
                reason,
                expiry
            ),
            AnnouncementEvent::AnnouncementAdded { id, version } => {
                info!("Announcement {} added to {}", id, version)
            }
            AnnouncementEvent::AnnouncementHidden { index, version } => {
                info!("Announcement {} hidden in {}", index, version)
            }
            AnnouncementEvent::ExpiryRotationSkipped { target, current } => warn!(
                "Expiry of {} skipped, current is {}",
                target,
                current.as_deref().unwrap_or("none")
            ),
            AnnouncementEvent::Stopped => info!("Announcement service stopped"),
        }
    }
}

/// Wait for shutdown signals (SIGTERM, SIGINT)
///
/// # Returns
///
/// Returns the name of the signal received.
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Wait for shutdown signals (SIGINT only)
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}
