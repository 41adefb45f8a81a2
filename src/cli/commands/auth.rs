use clap::{Arg, ArgAction, ArgMatches, Command};
use std::time::Duration;

use crate::auth::directory::DEFAULT_ADMIN_EMAIL_DOMAIN;

pub const ARG_SERVICE_ID: &str = "service-id";
pub const ARG_KNOWN_SERVICES: &str = "known-services";
pub const ARG_ADMIN_USERS_FILE: &str = "admin-users-file";
pub const ARG_ADMIN_EMAIL_DOMAIN: &str = "admin-email-domain";
pub const ARG_SESSION_IDLE_SECONDS: &str = "session-idle-seconds";
pub const ARG_COOKIE_SECURE: &str = "cookie-secure";
pub const ARG_COOKIE_DOMAIN: &str = "cookie-domain";
pub const ARG_STORE_TIMEOUT_MS: &str = "store-timeout-ms";
pub const ARG_DEBUG_ERRORS: &str = "debug-errors";

#[derive(Debug, Clone)]
pub struct Options {
    pub service_id: String,
    pub known_services: Vec<String>,
    pub admin_users_file: Option<String>,
    pub admin_email_domain: String,
    pub session_idle_seconds: i64,
    pub cookie_secure: bool,
    pub cookie_domain: Option<String>,
    pub store_timeout: Duration,
    pub debug_errors: bool,
}

impl Options {
    /// Parse gateway arguments from matches.
    ///
    /// # Errors
    /// Returns an error if required arguments are missing or out of range.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let get_non_empty = |id: &str| {
            matches
                .get_one::<String>(id)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let service_id = get_non_empty(ARG_SERVICE_ID)
            .ok_or_else(|| anyhow::anyhow!("missing required argument: --{ARG_SERVICE_ID}"))?;

        let known_services = matches
            .get_many::<String>(ARG_KNOWN_SERVICES)
            .map(|values| {
                values
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let session_idle_seconds = matches
            .get_one::<i64>(ARG_SESSION_IDLE_SECONDS)
            .copied()
            .unwrap_or(3600);
        if session_idle_seconds <= 0 {
            anyhow::bail!("--{ARG_SESSION_IDLE_SECONDS} must be positive");
        }

        let store_timeout_ms = matches
            .get_one::<u64>(ARG_STORE_TIMEOUT_MS)
            .copied()
            .unwrap_or(5000);
        if store_timeout_ms == 0 {
            anyhow::bail!("--{ARG_STORE_TIMEOUT_MS} must be positive");
        }

        Ok(Self {
            service_id,
            known_services,
            admin_users_file: get_non_empty(ARG_ADMIN_USERS_FILE),
            admin_email_domain: get_non_empty(ARG_ADMIN_EMAIL_DOMAIN)
                .unwrap_or_else(|| DEFAULT_ADMIN_EMAIL_DOMAIN.to_string()),
            session_idle_seconds,
            cookie_secure: matches.get_flag(ARG_COOKIE_SECURE),
            cookie_domain: get_non_empty(ARG_COOKIE_DOMAIN),
            store_timeout: Duration::from_millis(store_timeout_ms),
            debug_errors: matches.get_flag(ARG_DEBUG_ERRORS),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_token_args(command);
    with_session_args(command)
}

fn with_token_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_SERVICE_ID)
                .long(ARG_SERVICE_ID)
                .help("Identifier of this service, used as token issuer and expected audience")
                .env("WARDEN_SERVICE_ID")
                .default_value("api"),
        )
        .arg(
            Arg::new(ARG_KNOWN_SERVICES)
                .long(ARG_KNOWN_SERVICES)
                .help("Comma separated list of services tokens may be minted for")
                .env("WARDEN_KNOWN_SERVICES")
                .value_delimiter(','),
        )
        .arg(
            Arg::new(ARG_ADMIN_USERS_FILE)
                .long(ARG_ADMIN_USERS_FILE)
                .help("Path to the JSON admin directory")
                .long_help(
                    "Path to a JSON array of admin users: {\"username\", \"email\"?, \"key\", \"permissions\"?}.\n\nAdmins authenticate with tokens whose subject is admin/<username>, verified with the key listed here.",
                )
                .env("WARDEN_ADMIN_USERS_FILE"),
        )
        .arg(
            Arg::new(ARG_ADMIN_EMAIL_DOMAIN)
                .long(ARG_ADMIN_EMAIL_DOMAIN)
                .help("Email domain for auto-provisioned admins without an explicit email")
                .env("WARDEN_ADMIN_EMAIL_DOMAIN")
                .default_value(DEFAULT_ADMIN_EMAIL_DOMAIN),
        )
        .arg(
            Arg::new(ARG_DEBUG_ERRORS)
                .long(ARG_DEBUG_ERRORS)
                .help("Expose error causes in responses (development only)")
                .env("WARDEN_DEBUG_ERRORS")
                .action(ArgAction::SetTrue),
        )
}

fn with_session_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_SESSION_IDLE_SECONDS)
                .long(ARG_SESSION_IDLE_SECONDS)
                .help("Session idle timeout in seconds, extended on every honoured request")
                .env("WARDEN_SESSION_IDLE_SECONDS")
                .default_value("3600")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_COOKIE_SECURE)
                .long(ARG_COOKIE_SECURE)
                .help("Mark session cookies Secure")
                .env("WARDEN_COOKIE_SECURE")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_COOKIE_DOMAIN)
                .long(ARG_COOKIE_DOMAIN)
                .help("Domain attribute for session cookies")
                .env("WARDEN_COOKIE_DOMAIN"),
        )
        .arg(
            Arg::new(ARG_STORE_TIMEOUT_MS)
                .long(ARG_STORE_TIMEOUT_MS)
                .help("Per-request deadline for store calls, in milliseconds")
                .env("WARDEN_STORE_TIMEOUT_MS")
                .default_value("5000")
                .value_parser(clap::value_parser!(u64)),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command() -> Command {
        with_args(Command::new("warden"))
    }

    #[test]
    fn defaults() -> anyhow::Result<()> {
        temp_env::with_vars(
            [
                ("WARDEN_SERVICE_ID", None::<&str>),
                ("WARDEN_KNOWN_SERVICES", None),
                ("WARDEN_COOKIE_SECURE", None),
                ("WARDEN_DEBUG_ERRORS", None),
            ],
            || {
                let matches = command().get_matches_from(vec!["warden"]);
                let options = Options::parse(&matches)?;
                assert_eq!(options.service_id, "api");
                assert!(options.known_services.is_empty());
                assert_eq!(options.admin_email_domain, "local");
                assert_eq!(options.session_idle_seconds, 3600);
                assert_eq!(options.store_timeout, Duration::from_secs(5));
                assert!(!options.cookie_secure);
                assert!(!options.debug_errors);
                assert!(options.admin_users_file.is_none());
                Ok(())
            },
        )
    }

    #[test]
    fn known_services_split_on_commas() -> anyhow::Result<()> {
        let matches = command().get_matches_from(vec![
            "warden",
            "--known-services",
            "admin-api, billing,",
            "--cookie-secure",
        ]);
        let options = Options::parse(&matches)?;
        assert_eq!(options.known_services, vec!["admin-api", "billing"]);
        assert!(options.cookie_secure);
        Ok(())
    }

    #[test]
    fn blank_service_id_is_rejected() {
        temp_env::with_vars([("WARDEN_SERVICE_ID", Some("  "))], || {
            let matches = command().get_matches_from(vec!["warden"]);
            assert!(Options::parse(&matches).is_err());
        });
    }

    #[test]
    fn non_positive_idle_timeout_is_rejected() {
        let matches =
            command().get_matches_from(vec!["warden", "--session-idle-seconds", "0"]);
        assert!(Options::parse(&matches).is_err());
    }

    #[test]
    fn env_overrides() -> anyhow::Result<()> {
        temp_env::with_vars(
            [
                ("WARDEN_SERVICE_ID", Some("billing")),
                ("WARDEN_COOKIE_DOMAIN", Some("example.com")),
                ("WARDEN_STORE_TIMEOUT_MS", Some("250")),
                ("WARDEN_ADMIN_USERS_FILE", Some("/etc/warden/admins.json")),
            ],
            || {
                let matches = command().get_matches_from(vec!["warden"]);
                let options = Options::parse(&matches)?;
                assert_eq!(options.service_id, "billing");
                assert_eq!(options.cookie_domain.as_deref(), Some("example.com"));
                assert_eq!(options.store_timeout, Duration::from_millis(250));
                assert_eq!(
                    options.admin_users_file.as_deref(),
                    Some("/etc/warden/admins.json")
                );
                Ok(())
            },
        )
    }
}
