mod config;
mod downstream;
mod node;
mod uplink;

pub use config::C2sConfig;
pub use node::C2sNode;
