pub mod config;
pub mod gateway;
pub mod handler;
pub mod logging;
pub mod registry;
pub mod server;

pub use config::{ApiFlavor, ConfigError, ConnectionConfig, ServerConfig};
pub use gateway::{Device, Gateway};
pub use handler::GatewayHandler;
pub use logging::{default_directives, init_logging, init_test_logging};
pub use registry::ConnectionRegistry;
pub use server::ApiServer;
