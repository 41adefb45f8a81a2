//! Map parsed CLI arguments to the action the binary runs.

use crate::cli::actions::{Action, server::Args};
use crate::cli::commands::{ARG_DSN, ARG_PORT, auth, keys};
use anyhow::Result;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>(ARG_DSN)
        .cloned()
        .filter(|dsn| !dsn.trim().is_empty());

    let auth_opts = auth::Options::parse(matches)?;
    let key_opts = keys::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        dsn,
        service_id: auth_opts.service_id,
        known_services: auth_opts.known_services,
        admin_users_file: auth_opts.admin_users_file,
        admin_email_domain: auth_opts.admin_email_domain,
        session_idle_seconds: auth_opts.session_idle_seconds,
        cookie_secure: auth_opts.cookie_secure,
        cookie_domain: auth_opts.cookie_domain,
        store_timeout: auth_opts.store_timeout,
        debug_errors: auth_opts.debug_errors,
        global_key: key_opts.global,
        jwt_key: key_opts.jwt,
    }))
}
