pub mod config;
pub mod convo;
pub mod executor;
pub mod request;
pub mod router;
pub mod tools;

pub use config::{RoutingConfig, default_route_name};
pub use executor::RequestExecutor;
pub use request::{EntryEndpoint, ExecBody, ExecutionResult, InboundRequest, RequestMetadata};
pub use router::VirtualRouter;
