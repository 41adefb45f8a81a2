//! Gateway configuration.

use std::time::Duration;

use super::directory::DEFAULT_ADMIN_EMAIL_DOMAIN;

const DEFAULT_SESSION_IDLE_SECONDS: i64 = 60 * 60;
const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub struct GatewayConfig {
    service_id: String,
    known_services: Vec<String>,
    admin_email_domain: String,
    session_idle_seconds: i64,
    cookie_secure: bool,
    cookie_domain: Option<String>,
    store_timeout: Duration,
    debug_errors: bool,
}

impl GatewayConfig {
    #[must_use]
    pub fn new(service_id: impl Into<String>) -> Self {
        Self {
            service_id: service_id.into(),
            known_services: Vec::new(),
            admin_email_domain: DEFAULT_ADMIN_EMAIL_DOMAIN.to_string(),
            session_idle_seconds: DEFAULT_SESSION_IDLE_SECONDS,
            cookie_secure: false,
            cookie_domain: None,
            store_timeout: DEFAULT_STORE_TIMEOUT,
            debug_errors: false,
        }
    }

    /// Other services this instance may issue tokens for.
    #[must_use]
    pub fn with_known_services(mut self, services: Vec<String>) -> Self {
        self.known_services = services;
        self
    }

    #[must_use]
    pub fn with_admin_email_domain(mut self, domain: String) -> Self {
        self.admin_email_domain = domain;
        self
    }

    #[must_use]
    pub fn with_session_idle_seconds(mut self, seconds: i64) -> Self {
        self.session_idle_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_cookie_secure(mut self, secure: bool) -> Self {
        self.cookie_secure = secure;
        self
    }

    #[must_use]
    pub fn with_cookie_domain(mut self, domain: Option<String>) -> Self {
        self.cookie_domain = domain.filter(|d| !d.trim().is_empty());
        self
    }

    #[must_use]
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Expose internal error causes in responses. Development only.
    #[must_use]
    pub fn with_debug_errors(mut self, debug: bool) -> Self {
        self.debug_errors = debug;
        self
    }

    #[must_use]
    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    #[must_use]
    pub fn known_services(&self) -> &[String] {
        &self.known_services
    }

    #[must_use]
    pub fn admin_email_domain(&self) -> &str {
        &self.admin_email_domain
    }

    #[must_use]
    pub fn session_idle_seconds(&self) -> i64 {
        self.session_idle_seconds
    }

    #[must_use]
    pub fn cookie_secure(&self) -> bool {
        self.cookie_secure
    }

    #[must_use]
    pub fn cookie_domain(&self) -> Option<&str> {
        self.cookie_domain.as_deref()
    }

    #[must_use]
    pub fn store_timeout(&self) -> Duration {
        self.store_timeout
    }

    #[must_use]
    pub fn debug_errors(&self) -> bool {
        self.debug_errors
    }
}
