pub mod ini;
pub mod manifest;

pub use manifest::{load_pre_service_config, load_service_config};
