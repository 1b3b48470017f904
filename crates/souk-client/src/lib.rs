pub mod config;
pub mod error;
pub mod reviews;
pub mod router;
pub mod session;
pub mod state;

use tracing_subscriber::{fmt, EnvFilter};

pub use config::{BackendKind, ClientConfig, RedirectMode};
pub use error::{ClientError, Result};
pub use reviews::{ReviewState, ReviewStore};
pub use router::{GuardDecision, Location, RedirectMemory, RouteName, Router};
pub use session::{
    IdentityProvider, SessionChange, SessionChanges, SessionSource, SessionState, SessionStore,
    SessionSubscription,
};
pub use state::App;

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` overrides the default filter. Calling this twice is harmless;
/// the second install is ignored.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("souk_client=debug,souk_store=info,warn"));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}
