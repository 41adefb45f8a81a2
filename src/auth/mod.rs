//! Request authentication and session establishment.
//!
//! Leaves first: [`selector`] picks key material from unverified claims,
//! [`codec`] signs and verifies compact tokens, [`nonce`] enforces single use,
//! [`directory`] resolves and provisions actors, [`session`] manages the
//! cookie-backed session, and [`orchestrator`] composes them per request.

pub mod admins;
pub mod backend;
pub mod claims;
pub mod clock;
pub mod codec;
pub mod config;
pub mod context;
pub mod directory;
pub mod error;
pub mod keys;
pub mod middleware;
pub mod nonce;
pub mod orchestrator;
pub mod policy;
pub mod selector;
pub mod session;

pub use admins::{AdminDirectory, AdminUser};
pub use backend::{DefaultBackend, SignatureBackend};
pub use claims::{ActorDescriptor, Claims};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::GatewayConfig;
pub use context::{RequestAuth, SessionId};
pub use error::{AuthError, AuthErrorKind};
pub use keys::{Key, KeyData, KeyRing};
pub use middleware::{RouteGuard, guard};
pub use orchestrator::{Authenticator, SessionMerge, Stores};
pub use policy::{ActorValidator, RequireAdmin, RequireLabel, RouteClass, RoutePolicy};
