pub mod cache;
pub mod config;
pub mod model;
pub mod monitor;
pub mod pool;
pub mod redirect;
pub mod rpc;
pub mod session;
pub mod stuck;

pub use config::Config;
pub use pool::WorkPool;
pub use rpc::CueClient;
