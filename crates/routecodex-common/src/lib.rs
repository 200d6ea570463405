pub mod error;
pub mod ids;
pub mod settings;
pub mod snapshot;

pub use error::{ErrorKind, GatewayError, GatewayResult};
pub use ids::{ProviderKey, ProviderKeyParseError, RequestId, TraceId};
pub use settings::Settings;
pub use snapshot::{NoopRecorder, SharedRecorder, SnapshotRecorder, Stage, TracingRecorder};
