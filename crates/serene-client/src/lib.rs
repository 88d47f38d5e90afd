//! Realtime chat client: configuration, REST collaborator, inbound dispatch
//! and the [`ChatContext`] that ties them to a hub session.

pub mod api;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod state;
pub mod terminal;

pub use api::{ApiClient, ChatUser};
pub use config::ClientConfig;
pub use context::ChatContext;
pub use dispatcher::Dispatcher;
pub use error::{ApiError, ClientError, Result};
pub use events::{emit_event, NotificationLevel, UiEvent};
pub use state::{ChatState, SharedState};

use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global tracing subscriber. Logs go to stderr so they do not
/// interleave with the terminal front end.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("serene_client=debug,serene_net=debug,serene_store=info,warn")
    });

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .init();
}

pub async fn run() -> anyhow::Result<()> {
    let config = ClientConfig::from_env();
    info!(
        hub = %config.hub_url,
        api = %config.api_url,
        "Starting Serene chat v{}",
        env!("CARGO_PKG_VERSION")
    );
    terminal::run_terminal(config).await
}
