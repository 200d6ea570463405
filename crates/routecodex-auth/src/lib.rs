pub mod callback;
pub mod error;
pub mod flow;
pub mod lifecycle;
pub mod lock;
pub mod pkce;
pub mod repair;
pub mod store;
pub mod token;

pub use error::{AuthError, AuthResult};
pub use flow::{AuthDescriptor, EnsureOptions, OAuthFlowConfig};
pub use lifecycle::{BrowserOpener, NoBrowser, OAuthLifecycle, SystemBrowser};
pub use repair::{RepairMode, should_trigger_interactive_repair};
pub use store::{AuthHome, TokenStore};
pub use token::StoredToken;
