use std::env;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub classifier: ClassifierConfig,
    pub bootstrap: BootstrapConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_size: u32,
}

#[derive(Clone, Debug)]
pub struct ClassifierConfig {
    /// Base URL of the scoring service; keyword rules are used when unset.
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub timeout_ms: u64,
    /// Minimum disposition confidence required to honor auto_resolvable.
    pub auto_resolve_threshold: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            timeout_ms: 3000,
            auto_resolve_threshold: 0.8,
        }
    }
}

#[derive(Clone, Debug)]
pub struct BootstrapConfig {
    pub admin_email: String,
    pub admin_name: String,
    pub seed_kb: bool,
}

fn get_str(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn get_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn get_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn get_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn get_f64(key: &str, default: f64) -> f64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn get_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        Ok(AppConfig {
            database: DatabaseConfig {
                url: get_str("DATABASE_URL", "postgres://localhost/deskserver"),
                pool_size: get_u32("DATABASE_POOL_SIZE", 10),
            },
            classifier: ClassifierConfig {
                endpoint: get_opt("CLASSIFIER_URL"),
                api_key: get_opt("CLASSIFIER_API_KEY"),
                timeout_ms: get_u64("CLASSIFIER_TIMEOUT_MS", 3000),
                auto_resolve_threshold: get_f64("AUTO_RESOLVE_THRESHOLD", 0.8),
            },
            bootstrap: BootstrapConfig {
                admin_email: get_str("ADMIN_EMAIL", "admin@localhost"),
                admin_name: get_str("ADMIN_NAME", "Administrator"),
                seed_kb: get_bool("SEED_KB", true),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifier_defaults() {
        let config = ClassifierConfig::default();
        assert_eq!(config.timeout_ms, 3000);
        assert!((config.auto_resolve_threshold - 0.8).abs() < f64::EPSILON);
        assert!(config.endpoint.is_none());
    }
}
