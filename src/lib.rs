pub mod channels;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod media;
pub mod realtime;
pub mod relay;
pub mod server;
pub mod tokens;
pub mod translate;
pub mod usage;

pub use config::GatewayConfig;
pub use dispatch::{dispatch, resolve_target, GatewayResponse, InboundRequest, RequestContext};
pub use error::{ErrorKind, GatewayError, Result};
pub use logging::{SharedLogger, UsageReport, UsageSink};
pub use server::{build_router, AppState};
pub use translate::Dialect;
pub use usage::UsageRecord;
