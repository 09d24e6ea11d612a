pub mod config;
pub mod handler;
pub mod runtime;
pub mod tasks;
pub mod util;

pub use config::NodeConfig;
pub use runtime::Node;
