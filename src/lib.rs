pub mod bridge;
pub mod classifier;
pub mod collector;
pub mod config;
pub mod context;
pub mod logger;
pub mod message;
pub mod node;
pub mod template;
pub mod util;
