use crate::auth::{
    AdminDirectory, Authenticator, DefaultBackend, GatewayConfig, Key, KeyRing, Stores,
    SystemClock, clock::Clock,
};
use crate::cli::telemetry;
use crate::store::{MemoryStore, PgStore};
use anyhow::{Context, Result};
use std::{path::Path, sync::Arc, time::Duration};
use tracing::{error, info, warn};
use url::Url;

const PURGE_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: Option<String>,
    pub service_id: String,
    pub known_services: Vec<String>,
    pub admin_users_file: Option<String>,
    pub admin_email_domain: String,
    pub session_idle_seconds: i64,
    pub cookie_secure: bool,
    pub cookie_domain: Option<String>,
    pub store_timeout: Duration,
    pub debug_errors: bool,
    pub global_key: Key,
    pub jwt_key: Key,
}

impl Args {
    fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig::new(self.service_id.clone())
            .with_known_services(self.known_services.clone())
            .with_admin_email_domain(self.admin_email_domain.clone())
            .with_session_idle_seconds(self.session_idle_seconds)
            .with_cookie_secure(self.cookie_secure)
            .with_cookie_domain(self.cookie_domain.clone())
            .with_store_timeout(self.store_timeout)
            .with_debug_errors(self.debug_errors)
    }
}

/// Execute the server action.
/// # Errors
/// Returns an error if keys or admins fail to load, the database is
/// unreachable, or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let keys = Arc::new(KeyRing::resolve(&args.global_key, &args.jwt_key)?);
    let admins = Arc::new(match &args.admin_users_file {
        Some(path) => AdminDirectory::load_json(Path::new(path))?,
        None => AdminDirectory::empty(),
    });
    if admins.is_empty() {
        warn!("No admin users configured");
    } else {
        info!(count = admins.len(), "Loaded admin users");
    }

    let stores = match &args.dsn {
        Some(dsn) => {
            let store = Arc::new(PgStore::connect(dsn).await?);
            spawn_purge(store.clone());
            Stores::shared(store)
        }
        None => {
            warn!("No --dsn given, using the in-memory store");
            Stores::shared(Arc::new(MemoryStore::new()))
        }
    };

    let authenticator = Arc::new(Authenticator::new(
        &args.gateway_config(),
        keys,
        admins,
        stores,
        Arc::new(DefaultBackend),
        Arc::new(SystemClock),
    ));

    let result = crate::warden::new(args.port, authenticator)
        .await
        .context("server failed");
    telemetry::shutdown_tracer();
    result
}

/// Periodically drop expired sessions and replay markers.
fn spawn_purge(store: Arc<PgStore>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PURGE_INTERVAL);
        loop {
            interval.tick().await;
            match store.purge_expired(SystemClock.now()).await {
                Ok(0) => {}
                Ok(removed) => info!(removed, "Purged expired rows"),
                Err(err) => error!("Failed to purge expired rows: {err:#}"),
            }
        }
    });
}

fn log_startup_args(args: &Args) {
    let entries = [
        ("listen", format!("tcp:{}", args.port)),
        (
            "dsn",
            args.dsn
                .as_deref()
                .map_or_else(|| "memory".to_string(), redact_dsn),
        ),
        ("service_id", args.service_id.clone()),
        ("known_services", args.known_services.join(",")),
        (
            "admin_users_file",
            args.admin_users_file
                .clone()
                .unwrap_or_else(|| "none".to_string()),
        ),
        ("session_idle_seconds", args.session_idle_seconds.to_string()),
        ("cookie_secure", args.cookie_secure.to_string()),
        ("store_timeout_ms", args.store_timeout.as_millis().to_string()),
        ("debug_errors", args.debug_errors.to_string()),
        ("global_key", key_kind(&args.global_key).to_string()),
        ("jwt_key", key_kind(&args.jwt_key).to_string()),
    ];
    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!(
        "warden {} - {}\n\nStartup configuration:",
        env!("CARGO_PKG_VERSION"),
        short_commit(crate::GIT_COMMIT_HASH)
    );
    for (key, value) in &entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        let _ =
            std::fmt::Write::write_fmt(&mut message, format_args!("\n  {key}:{padding} {value}"));
    }
    info!("{message}");
}

fn key_kind(key: &Key) -> &'static str {
    match key {
        Key::Shared { .. } => "shared",
        Key::PublicPrivate { private: Some(_), .. } => "public/private",
        Key::PublicPrivate { private: None, .. } => "public",
    }
}

fn redact_dsn(dsn: &str) -> String {
    match Url::parse(dsn) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("REDACTED"));
            }
            parsed.to_string()
        }
        Err(_) => "invalid-dsn".to_string(),
    }
}

fn short_commit(hash: &str) -> &str {
    let trimmed = hash.trim();
    trimmed.get(..7).unwrap_or(trimmed)
}
