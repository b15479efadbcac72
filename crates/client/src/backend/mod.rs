pub mod http;
pub mod local;

pub use http::HttpBackend;
pub use local::LocalBackend;
