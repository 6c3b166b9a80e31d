mod file_config;

pub use file_config::FileConfig;

use std::path::PathBuf;

pub const DEFAULT_COLLECTION_SIZE: u32 = 8888;
pub const DEFAULT_BATCH_SIZE: usize = 500;
pub const DEFAULT_FETCH_CONCURRENCY: usize = 50;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
/// Content-addressed root of the collection's metadata documents; one
/// document per token at `{base_url}/{token}`.
pub const DEFAULT_BASE_URL: &str =
    "https://ipfs.io/ipfs/QmWXJXRdExse2YHRY21Wvh4pjRxNRQcWVhcKw4DLVnqGqs";

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub db_file: PathBuf,
    pub batch_size: usize,
    pub refresh_metadata: bool,
    pub refresh_scores: bool,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_file: PathBuf,
    pub batch_size: usize,
    pub collection_size: u32,
    pub base_url: String,
    pub fetch_concurrency: usize,
    pub request_timeout_secs: u64,
    pub refresh_metadata: bool,
    pub refresh_scores: bool,
}

impl AppConfig {
    /// Resolve the effective configuration. Values from the config file
    /// override CLI arguments; everything else falls back to defaults.
    pub fn resolve(cli: CliConfig, file: Option<FileConfig>) -> Self {
        let file = file.unwrap_or_default();
        Self {
            db_file: file.db_file.map(PathBuf::from).unwrap_or(cli.db_file),
            batch_size: file.batch_size.unwrap_or(cli.batch_size),
            collection_size: file.collection_size.unwrap_or(DEFAULT_COLLECTION_SIZE),
            base_url: file.base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            fetch_concurrency: file.fetch_concurrency.unwrap_or(DEFAULT_FETCH_CONCURRENCY),
            request_timeout_secs: file
                .request_timeout_secs
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
            refresh_metadata: cli.refresh_metadata,
            refresh_scores: cli.refresh_scores,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli() -> CliConfig {
        CliConfig {
            db_file: PathBuf::from("collection.db"),
            batch_size: 500,
            refresh_metadata: false,
            refresh_scores: true,
        }
    }

    #[test]
    fn resolve_without_a_file_uses_cli_values_and_defaults() {
        let config = AppConfig::resolve(cli(), None);

        assert_eq!(config.db_file, PathBuf::from("collection.db"));
        assert_eq!(config.batch_size, 500);
        assert_eq!(config.collection_size, DEFAULT_COLLECTION_SIZE);
        assert_eq!(config.fetch_concurrency, DEFAULT_FETCH_CONCURRENCY);
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert!(config.refresh_scores);
    }

    #[test]
    fn file_values_override_cli_values() {
        let file: FileConfig = toml::from_str(
            r#"
            db_file = "other.db"
            batch_size = 100
            collection_size = 1000
            fetch_concurrency = 10
            "#,
        )
        .unwrap();

        let config = AppConfig::resolve(cli(), Some(file));
        assert_eq!(config.db_file, PathBuf::from("other.db"));
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.collection_size, 1000);
        assert_eq!(config.fetch_concurrency, 10);
        assert_eq!(config.request_timeout_secs, DEFAULT_REQUEST_TIMEOUT_SECS);
    }
}
