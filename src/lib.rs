pub mod api;
pub mod cmd;
pub mod envconfig;
pub mod error;
pub mod events;
pub mod format;
pub mod fs;
pub mod middleware;
pub mod relay;
pub mod server;
pub mod sse;
pub mod store;

pub use api::Client;
pub use envconfig::EnvConfig;
pub use error::{ApiError, RelayError};
pub use events::{Event, EventBus};
pub use relay::{OutwardEvent, Relay, RelayOutcome};
pub use server::{build_router, AppState};
