//! # Warden (request authentication gateway)
//!
//! `warden` decides who is making an HTTP request before any handler runs.
//!
//! ## Credentials
//!
//! A request may carry a compact signed token in `Authorization: Bearer` or in
//! the `token` query parameter. Tokens are verified with one of three keys:
//!
//! - **Self-signed** tokens (`self_signed: true`) use the process-wide global
//!   shared key. The gateway mints these itself.
//! - **Admin** tokens (subject `admin/<username>`) use the key configured for
//!   that admin in the admin directory.
//! - Everything else uses the service JWT key.
//!
//! The signing algorithm is derived from the selected key, never from the
//! token header. Tokens carrying a `nonce` must also carry `exp` and are
//! accepted exactly once.
//!
//! ## Actors
//!
//! A verified subject resolves to an actor row. Tokens may embed a full actor
//! descriptor, which is upserted. Configured admins are provisioned on first
//! use; unknown admin subjects never create rows.
//!
//! ## Sessions
//!
//! An authenticated request may establish a cookie session. Session-only
//! requests with unsafe methods must echo the XSRF token in `x-xsrf-token`.
//! Sessions slide forward by the idle timeout on every honoured request.
//!
//! ## Routes
//!
//! Each route declares a [`auth::RouteClass`] and optional
//! [`auth::ActorValidator`]s. The resolved [`auth::RequestAuth`] is inserted
//! into the request extensions for downstream handlers.

pub mod auth;
pub mod cli;
pub mod store;
pub mod warden;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};
