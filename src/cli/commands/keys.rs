use clap::{Arg, ArgMatches, Command, builder::ValueParser};

use crate::auth::{Key, KeyData};

pub const ARG_GLOBAL_KEY: &str = "global-key";
pub const ARG_JWT_SECRET: &str = "jwt-secret";
pub const ARG_JWT_PUBLIC_KEY: &str = "jwt-public-key";
pub const ARG_JWT_PRIVATE_KEY: &str = "jwt-private-key";

const KEY_SOURCE_HELP: &str = "Key sources: inline:<value>, file:<path>, file-base64:<path>, env:<VAR>, env-base64:<VAR>, random or random:<length>.\n\nRandom keys are generated once at startup; tokens and sessions signed with them do not survive a restart.";

#[derive(Debug, Clone)]
pub struct Options {
    pub global: Key,
    pub jwt: Key,
}

impl Options {
    /// Parse key arguments from matches.
    ///
    /// # Errors
    /// Returns an error if a required key source is missing.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let read_required = |id: &str| {
            matches
                .get_one::<KeyData>(id)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("missing required argument: --{id}"))
        };

        let global = Key::Shared {
            secret: read_required(ARG_GLOBAL_KEY)?,
        };

        let jwt = match matches.get_one::<KeyData>(ARG_JWT_PUBLIC_KEY) {
            Some(public) => Key::PublicPrivate {
                public: public.clone(),
                private: matches.get_one::<KeyData>(ARG_JWT_PRIVATE_KEY).cloned(),
            },
            None => Key::Shared {
                secret: read_required(ARG_JWT_SECRET)?,
            },
        };

        Ok(Self { global, jwt })
    }
}

fn key_data_parser() -> ValueParser {
    ValueParser::from(|value: &str| value.parse::<KeyData>())
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_GLOBAL_KEY)
                .long(ARG_GLOBAL_KEY)
                .help("Shared key for self-signed tokens")
                .long_help(KEY_SOURCE_HELP)
                .env("WARDEN_GLOBAL_KEY")
                .default_value("random")
                .hide_env_values(true)
                .value_parser(key_data_parser()),
        )
        .arg(
            Arg::new(ARG_JWT_SECRET)
                .long(ARG_JWT_SECRET)
                .help("Shared secret verifying third-party tokens (HS256)")
                .long_help(KEY_SOURCE_HELP)
                .env("WARDEN_JWT_SECRET")
                .default_value("random")
                .hide_env_values(true)
                .conflicts_with(ARG_JWT_PUBLIC_KEY)
                .value_parser(key_data_parser()),
        )
        .arg(
            Arg::new(ARG_JWT_PUBLIC_KEY)
                .long(ARG_JWT_PUBLIC_KEY)
                .help("Public key verifying third-party tokens (Ed25519 raw bytes or RSA PEM/DER)")
                .long_help(KEY_SOURCE_HELP)
                .env("WARDEN_JWT_PUBLIC_KEY")
                .value_parser(key_data_parser()),
        )
        .arg(
            Arg::new(ARG_JWT_PRIVATE_KEY)
                .long(ARG_JWT_PRIVATE_KEY)
                .help("Private half of --jwt-public-key, needed only to mint service tokens")
                .long_help(KEY_SOURCE_HELP)
                .env("WARDEN_JWT_PRIVATE_KEY")
                .hide_env_values(true)
                .requires(ARG_JWT_PUBLIC_KEY)
                .value_parser(key_data_parser()),
        )
}
