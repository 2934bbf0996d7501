// Configuration module for crag
// Reads from environment variables with sensible defaults

use std::env;
use std::sync::OnceLock;

/// Global configuration instance
static CONFIG: OnceLock<Config> = OnceLock::new();

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection pool size (CRAG_POOL_SIZE)
    pub pool_size: u32,

    /// Database connection pool minimum idle connections (CRAG_POOL_MIN_IDLE)
    pub pool_min_idle: u32,

    /// Worker threads for parallel symbol extraction (CRAG_INGEST_WORKERS)
    pub ingest_workers: usize,

    /// Maximum inheritance traversal depth (CRAG_HIERARCHY_MAX_DEPTH)
    pub hierarchy_max_depth: usize,

    /// Caller count at which change impact becomes medium (CRAG_IMPACT_MEDIUM_MIN)
    pub impact_medium_min: usize,

    /// Caller count at which change impact becomes high (CRAG_IMPACT_HIGH_MIN)
    pub impact_high_min: usize,

    /// Per-run review agent timeout in seconds (CRAG_AGENT_TIMEOUT_SECS)
    pub agent_timeout_secs: u64,

    /// Findings below this confidence are flagged, not dropped (CRAG_MIN_CONFIDENCE)
    pub min_confidence: f64,

    /// External command invoked per review agent (CRAG_AGENT_CMD)
    pub agent_cmd: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pool_size: 10,
            pool_min_idle: 2,
            ingest_workers: 4,
            hierarchy_max_depth: 32,
            impact_medium_min: 1,
            impact_high_min: 6,
            agent_timeout_secs: 120,
            min_confidence: 0.5,
            agent_cmd: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Self {
        let mut config = Config::default();

        if let Ok(val) = env::var("CRAG_POOL_SIZE") {
            if let Ok(parsed) = val.parse() {
                config.pool_size = parsed;
            } else {
                eprintln!(
                    "crag: Warning: Invalid CRAG_POOL_SIZE value: {}, using default: {}",
                    val, config.pool_size
                );
            }
        }

        if let Ok(val) = env::var("CRAG_POOL_MIN_IDLE") {
            if let Ok(parsed) = val.parse() {
                config.pool_min_idle = parsed;
            } else {
                eprintln!(
                    "crag: Warning: Invalid CRAG_POOL_MIN_IDLE value: {}, using default: {}",
                    val, config.pool_min_idle
                );
            }
        }

        if let Ok(val) = env::var("CRAG_INGEST_WORKERS") {
            if let Ok(parsed) = val.parse() {
                config.ingest_workers = parsed;
            } else {
                eprintln!(
                    "crag: Warning: Invalid CRAG_INGEST_WORKERS value: {}, using default: {}",
                    val, config.ingest_workers
                );
            }
        }

        if let Ok(val) = env::var("CRAG_HIERARCHY_MAX_DEPTH") {
            if let Ok(parsed) = val.parse() {
                config.hierarchy_max_depth = parsed;
            } else {
                eprintln!(
                    "crag: Warning: Invalid CRAG_HIERARCHY_MAX_DEPTH value: {}, using default: {}",
                    val, config.hierarchy_max_depth
                );
            }
        }

        if let Ok(val) = env::var("CRAG_IMPACT_MEDIUM_MIN") {
            if let Ok(parsed) = val.parse() {
                config.impact_medium_min = parsed;
            } else {
                eprintln!(
                    "crag: Warning: Invalid CRAG_IMPACT_MEDIUM_MIN value: {}, using default: {}",
                    val, config.impact_medium_min
                );
            }
        }

        if let Ok(val) = env::var("CRAG_IMPACT_HIGH_MIN") {
            if let Ok(parsed) = val.parse() {
                config.impact_high_min = parsed;
            } else {
                eprintln!(
                    "crag: Warning: Invalid CRAG_IMPACT_HIGH_MIN value: {}, using default: {}",
                    val, config.impact_high_min
                );
            }
        }

        if let Ok(val) = env::var("CRAG_AGENT_TIMEOUT_SECS") {
            if let Ok(parsed) = val.parse() {
                config.agent_timeout_secs = parsed;
            } else {
                eprintln!(
                    "crag: Warning: Invalid CRAG_AGENT_TIMEOUT_SECS value: {}, using default: {}",
                    val, config.agent_timeout_secs
                );
            }
        }

        if let Ok(val) = env::var("CRAG_MIN_CONFIDENCE") {
            if let Ok(parsed) = val.parse() {
                config.min_confidence = parsed;
            } else {
                eprintln!(
                    "crag: Warning: Invalid CRAG_MIN_CONFIDENCE value: {}, using default: {}",
                    val, config.min_confidence
                );
            }
        }

        if let Ok(val) = env::var("CRAG_AGENT_CMD") {
            if !val.trim().is_empty() {
                config.agent_cmd = Some(val);
            }
        }

        config
    }

    /// Get the global configuration instance
    pub fn get() -> &'static Config {
        CONFIG.get_or_init(Config::from_env)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.pool_size, 10);
        assert_eq!(config.pool_min_idle, 2);
        assert_eq!(config.ingest_workers, 4);
        assert_eq!(config.hierarchy_max_depth, 32);
        assert_eq!(config.impact_medium_min, 1);
        assert_eq!(config.impact_high_min, 6);
        assert!(config.agent_cmd.is_none());
    }
}
