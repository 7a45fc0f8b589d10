pub mod dispatch;
pub mod http;
pub mod ws;

pub use dispatch::execute_proxy;
pub use http::execute_http;
pub use ws::execute_ws;
