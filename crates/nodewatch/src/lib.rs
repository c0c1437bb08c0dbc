#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]

pub mod args;
pub mod client;
pub mod config;
pub mod identity;
pub mod metrics;
pub mod probe;
pub mod server;
pub mod shutdown;
pub mod supervisor;
pub mod watcher;

pub use config::MonitorConfig;
pub use identity::NodeIdentity;
pub use supervisor::{
    Supervisor,
    SupervisorStats,
};
pub use watcher::Watcher;
