use std::fs;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::error::KiraError;
use crate::pipeline::FailurePolicy;
use crate::workspace::Workspace;

pub const DEFAULT_CONFIG_FILE: &str = "kira-ri.json";
pub const DEFAULT_DELAY_SECS: u64 = 12;
pub const DEFAULT_SEARCH_TIMEOUT_SECS: u64 = 900;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 15;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub forward: Option<Utf8PathBuf>,
    #[serde(default)]
    pub reverse: Option<Utf8PathBuf>,
    #[serde(default)]
    pub database: Option<Utf8PathBuf>,
    #[serde(default)]
    pub checkpoint: Option<Utf8PathBuf>,
    #[serde(default)]
    pub delay_secs: Option<u64>,
    #[serde(default)]
    pub search_timeout_secs: Option<u64>,
    #[serde(default)]
    pub poll_interval_secs: Option<u64>,
    #[serde(default)]
    pub on_failure: Option<FailurePolicy>,
    #[serde(default)]
    pub pacing: Option<PacingEntry>,
    #[serde(default)]
    pub entrez_email: Option<String>,
    #[serde(default)]
    pub entrez_api_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum PacingEntry {
    Shorthand(PacingKind),
    Detailed(PacingEntryObject),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PacingEntryObject {
    pub kind: PacingKind,
    #[serde(default)]
    pub burst: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PacingKind {
    Fixed,
    TokenBucket,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacingConfig {
    Fixed { interval: Duration },
    TokenBucket { burst: u32, interval: Duration },
}

/// Values given on the command line; each one wins over the config file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub forward: Option<Utf8PathBuf>,
    pub reverse: Option<Utf8PathBuf>,
    pub database: Option<Utf8PathBuf>,
    pub checkpoint: Option<Utf8PathBuf>,
    pub delay_secs: Option<u64>,
    pub search_timeout_secs: Option<u64>,
    pub on_failure: Option<FailurePolicy>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub forward: Option<Utf8PathBuf>,
    pub reverse: Option<Utf8PathBuf>,
    pub database: Utf8PathBuf,
    pub checkpoint: Utf8PathBuf,
    pub pacing: PacingConfig,
    pub search_timeout: Duration,
    pub poll_interval: Duration,
    pub on_failure: FailurePolicy,
    pub entrez_email: Option<String>,
    pub entrez_api_key: Option<String>,
}

impl ResolvedConfig {
    pub fn inputs(&self) -> Result<(&Utf8PathBuf, &Utf8PathBuf), KiraError> {
        let forward = self.forward.as_ref().ok_or_else(|| {
            KiraError::InvalidConfig("forward read file is not set".to_string())
        })?;
        let reverse = self.reverse.as_ref().ok_or_else(|| {
            KiraError::InvalidConfig("reverse read file is not set".to_string())
        })?;
        Ok((forward, reverse))
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(
        path: Option<&str>,
        overrides: ConfigOverrides,
        workspace: &Workspace,
    ) -> Result<ResolvedConfig, KiraError> {
        let config_path = match path {
            Some(path) => Utf8PathBuf::from(path),
            None => Utf8PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        let config = if path.is_none() && !config_path.as_std_path().exists() {
            Config::default()
        } else {
            let content = fs::read_to_string(config_path.as_std_path())
                .map_err(|_| KiraError::ConfigRead(config_path.clone().into_std_path_buf()))?;
            serde_json::from_str(&content)
                .map_err(|err| KiraError::ConfigParse(err.to_string()))?
        };

        Self::resolve_config(config, overrides, workspace)
    }

    pub fn resolve_config(
        config: Config,
        overrides: ConfigOverrides,
        workspace: &Workspace,
    ) -> Result<ResolvedConfig, KiraError> {
        let schema_version = config.schema_version.unwrap_or(1);
        if schema_version != 1 {
            return Err(KiraError::InvalidConfig(format!(
                "unsupported schema_version {schema_version}"
            )));
        }

        let delay_secs = overrides
            .delay_secs
            .or(config.delay_secs)
            .unwrap_or(DEFAULT_DELAY_SECS);
        let interval = Duration::from_secs(delay_secs);
        let pacing = match config.pacing {
            None | Some(PacingEntry::Shorthand(PacingKind::Fixed)) => {
                PacingConfig::Fixed { interval }
            }
            Some(PacingEntry::Shorthand(PacingKind::TokenBucket)) => {
                PacingConfig::TokenBucket { burst: 1, interval }
            }
            Some(PacingEntry::Detailed(obj)) => match obj.kind {
                PacingKind::Fixed => PacingConfig::Fixed { interval },
                PacingKind::TokenBucket => {
                    let burst = obj.burst.unwrap_or(1);
                    if burst == 0 {
                        return Err(KiraError::InvalidConfig(
                            "pacing burst must be at least 1".to_string(),
                        ));
                    }
                    PacingConfig::TokenBucket { burst, interval }
                }
            },
        };

        let search_timeout_secs = overrides
            .search_timeout_secs
            .or(config.search_timeout_secs)
            .unwrap_or(DEFAULT_SEARCH_TIMEOUT_SECS);
        if search_timeout_secs == 0 {
            return Err(KiraError::InvalidConfig(
                "search_timeout_secs must be greater than zero".to_string(),
            ));
        }
        let poll_interval_secs = config
            .poll_interval_secs
            .unwrap_or(DEFAULT_POLL_INTERVAL_SECS);
        if poll_interval_secs == 0 {
            return Err(KiraError::InvalidConfig(
                "poll_interval_secs must be greater than zero".to_string(),
            ));
        }

        let entrez_api_key = config.entrez_api_key.or_else(|| {
            std::env::var("NCBI_API_KEY")
                .ok()
                .map(|key| key.trim().to_string())
                .filter(|key| !key.is_empty())
        });

        Ok(ResolvedConfig {
            schema_version,
            forward: overrides.forward.or(config.forward),
            reverse: overrides.reverse.or(config.reverse),
            database: overrides
                .database
                .or(config.database)
                .unwrap_or_else(|| workspace.database_path()),
            checkpoint: overrides
                .checkpoint
                .or(config.checkpoint)
                .unwrap_or_else(|| workspace.checkpoint_path()),
            pacing,
            search_timeout: Duration::from_secs(search_timeout_secs),
            poll_interval: Duration::from_secs(poll_interval_secs),
            on_failure: overrides
                .on_failure
                .or(config.on_failure)
                .unwrap_or_default(),
            entrez_email: config.entrez_email,
            entrez_api_key,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workspace() -> Workspace {
        Workspace::new_with_root(Utf8PathBuf::from("/tmp/project/.kira-ri"))
    }

    #[test]
    fn resolve_defaults() {
        let resolved =
            ConfigLoader::resolve_config(Config::default(), ConfigOverrides::default(), &workspace())
                .unwrap();
        assert_eq!(resolved.schema_version, 1);
        assert_eq!(
            resolved.pacing,
            PacingConfig::Fixed {
                interval: Duration::from_secs(12)
            }
        );
        assert_eq!(resolved.on_failure, FailurePolicy::Halt);
        assert!(resolved.database.ends_with("hits.sqlite"));
        assert!(resolved.checkpoint.ends_with("checkpoint.txt"));
        assert!(resolved.inputs().is_err());
    }

    #[test]
    fn overrides_win_over_file() {
        let config = Config {
            forward: Some(Utf8PathBuf::from("fwd.fastq")),
            reverse: Some(Utf8PathBuf::from("rev.fastq")),
            delay_secs: Some(30),
            ..Config::default()
        };
        let overrides = ConfigOverrides {
            forward: Some(Utf8PathBuf::from("other.fastq")),
            delay_secs: Some(0),
            on_failure: Some(FailurePolicy::Skip),
            ..ConfigOverrides::default()
        };
        let resolved = ConfigLoader::resolve_config(config, overrides, &workspace()).unwrap();
        let (forward, reverse) = resolved.inputs().unwrap();
        assert_eq!(forward.as_str(), "other.fastq");
        assert_eq!(reverse.as_str(), "rev.fastq");
        assert_eq!(
            resolved.pacing,
            PacingConfig::Fixed {
                interval: Duration::ZERO
            }
        );
        assert_eq!(resolved.on_failure, FailurePolicy::Skip);
    }
}
