use dotenv::dotenv;
use std::env;
use std::path::PathBuf;

pub const CONFIG_PATH_VAR: &str = "PAYER_CONFIG";
pub const AMQP_ADDR_VAR: &str = "AMQP_ADDR";
pub const BRAINKEY_VAR: &str = "PAYER_BRAINKEY";

/// Deployment values that may come from the environment (or a `.env` file) instead of
/// the config file.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct EnvOverrides {
    pub config_path: Option<PathBuf>,
    pub amqp_addr: Option<String>,
    pub brainkey: Option<String>,
}

impl EnvOverrides {
    pub fn load() -> Self {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            config_path: non_empty(CONFIG_PATH_VAR).map(PathBuf::from),
            amqp_addr: non_empty(AMQP_ADDR_VAR),
            brainkey: non_empty(BRAINKEY_VAR),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn reads_known_variables() {
        let vars = HashMap::from([
            (CONFIG_PATH_VAR, "/etc/payer.json"),
            (AMQP_ADDR_VAR, "amqp://localhost:5672"),
        ]);
        let overrides = EnvOverrides::from_lookup(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(overrides.config_path, Some(PathBuf::from("/etc/payer.json")));
        assert_eq!(overrides.amqp_addr.as_deref(), Some("amqp://localhost:5672"));
        assert_eq!(overrides.brainkey, None);
    }

    #[test]
    fn blank_values_are_ignored() {
        let overrides = EnvOverrides::from_lookup(|k| (k == BRAINKEY_VAR).then(|| "  ".to_string()));
        assert_eq!(overrides, EnvOverrides::default());
    }
}
