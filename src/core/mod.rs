pub mod context;
pub mod definition;
pub mod options;
pub mod resolver;

pub use context::{ProxyContext, RouteArgs};
pub use definition::{HttpForward, ProxyDefinition, ProxyDefinitionBuilder, WsForward};
pub use options::{HttpOptions, WsOptions};
pub use resolver::EndpointResolver;
