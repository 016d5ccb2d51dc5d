//! Configuration management

use crate::db::DbConfig;

// ============================================================================
// Harvest Configuration Constants
// ============================================================================

/// Default number of insert/update/delete operations per transaction.
pub const DEFAULT_COMMIT_LIMIT: usize = 1000;

/// Default number of pending rows tombstoned per sweep page.
pub const DEFAULT_SWEEP_PAGE_SIZE: usize = 500;

/// Harvest binary configuration
#[derive(Debug, Clone)]
pub struct HarvestConfig {
    pub database: DbConfig,
    pub harvest: HarvestSettings,
}

/// Batching settings for a harvest run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HarvestSettings {
    /// Combined insert/update/delete count that forces a commit
    pub commit_limit: usize,
    /// Page size used when sweeping pending rows at the end of a run
    pub sweep_page_size: usize,
}

impl Default for HarvestSettings {
    fn default() -> Self {
        Self {
            commit_limit: DEFAULT_COMMIT_LIMIT,
            sweep_page_size: DEFAULT_SWEEP_PAGE_SIZE,
        }
    }
}

impl HarvestSettings {
    pub fn from_env() -> Self {
        Self {
            commit_limit: std::env::var("HARVEST_COMMIT_LIMIT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_COMMIT_LIMIT),
            sweep_page_size: std::env::var("HARVEST_SWEEP_PAGE_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_SWEEP_PAGE_SIZE),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.commit_limit == 0 {
            anyhow::bail!("Harvest commit_limit must be greater than 0");
        }
        if self.sweep_page_size == 0 {
            anyhow::bail!("Harvest sweep_page_size must be greater than 0");
        }
        Ok(())
    }
}

impl HarvestConfig {
    /// Load configuration from `.env`, the environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = HarvestConfig {
            database: DbConfig::from_env()?,
            harvest: HarvestSettings::from_env(),
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be greater than 0");
        }

        self.harvest.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = HarvestSettings::default();
        assert_eq!(settings.commit_limit, 1000);
        assert_eq!(settings.sweep_page_size, 500);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let config = HarvestConfig {
            database: DbConfig::default(),
            harvest: HarvestSettings {
                commit_limit: 0,
                sweep_page_size: 500,
            },
        };
        assert!(config.validate().is_err());

        let config = HarvestConfig {
            database: DbConfig::default(),
            harvest: HarvestSettings {
                commit_limit: 10,
                sweep_page_size: 0,
            },
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_url() {
        let config = HarvestConfig {
            database: DbConfig {
                url: String::new(),
                ..DbConfig::default()
            },
            harvest: HarvestSettings::default(),
        };
        assert!(config.validate().is_err());
    }
}
