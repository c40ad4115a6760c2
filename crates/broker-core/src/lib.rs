pub mod bootstrap;
pub mod config;
pub mod dispatcher;
pub mod error_taxonomy;
pub mod load_balancer;
pub mod oauth_flow;
pub mod token_manager;
pub mod upstream_client;
pub mod usage_recorder;

pub use bootstrap::{bootstrap, AppContext};
pub use config::CoreConfig;
pub use dispatcher::{DispatchRequest, DispatchResponse, Dispatcher, ResponseBody};
pub use error_taxonomy::ErrorKind;
pub use oauth_flow::OAuthFlow;
pub use token_manager::{Credential, TokenManager};
