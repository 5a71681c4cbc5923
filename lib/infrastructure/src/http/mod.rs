mod server;

pub use server::HttpServerConfig;
