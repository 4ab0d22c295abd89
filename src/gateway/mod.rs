//! Gateway server implementation

mod proxy;
mod router;
mod server;

pub use proxy::ReverseProxyGate;
pub use router::{AppState, create_router};
pub use server::Gateway;
