pub mod client;
pub mod config;
pub mod http;
pub mod providers;
pub mod registry;
pub mod sse2json;

pub use client::{ByteStream, ProviderClient, ProviderData, ProviderResponse, classify_http_error};
pub use config::{ProviderAuth, ProviderConfig, ProviderType};
pub use registry::ProviderRuntime;
