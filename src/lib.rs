pub mod config;
pub mod input;

pub use config::{AppConfig, ConfigError};
pub use input::{InputManager, InputSettings, ManagerError};
