mod routes;

pub use routes::{ServerState, gateway_router};
