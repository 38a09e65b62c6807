pub mod account_pool;
pub mod common;
pub mod config;
pub mod handlers;
pub mod http_client;
pub mod mappers;
pub mod model_registry;
pub mod server;
pub mod upstream;

pub use account_pool::AccountPool;
pub use config::ProxyConfig;
pub use model_registry::ModelRegistry;
pub use server::AppState;
