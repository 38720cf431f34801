use policy::{GrantCreateDto, SpeedRuleDto, TunnelDto, UserDto};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Policy records applied at startup, in admin payload form.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeedConfig {
    #[serde(default)]
    pub tunnels: Vec<TunnelDto>,
    #[serde(default)]
    pub speed_rules: Vec<SpeedRuleDto>,
    #[serde(default)]
    pub users: Vec<UserDto>,
    #[serde(default)]
    pub grants: Vec<GrantCreateDto>,
}

impl SeedConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: SeedConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}
