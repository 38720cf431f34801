mod controller_config;
mod seed_config;

pub use controller_config::ControllerConfig;
pub use seed_config::SeedConfig;
