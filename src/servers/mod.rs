pub mod http;
mod render;

pub use http::HttpServer;
