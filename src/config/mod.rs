pub mod manager;

pub use manager::{AppSettings, ConfigManager};
