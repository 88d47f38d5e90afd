// Realtime hub client: SignalR negotiate, websocket transport and the
// reconnecting session that the chat context owns.

pub mod config;
pub mod error;
pub mod negotiate;
pub mod reconnect;
pub mod session;
pub mod transport;

pub use config::HubConfig;
pub use error::{NetError, Result};
pub use negotiate::{negotiate, HubEndpoint, NegotiateResponse};
pub use reconnect::ReconnectPolicy;
pub use session::{HubEvent, HubSession};
pub use transport::HubConnection;
