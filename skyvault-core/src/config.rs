// Copyright 2025 Skyvault (https://github.com/skyvault)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Service configuration: TOML file plus environment overrides.
//!
//! The environment keys follow the deployment's established names, colons
//! included (`CASSANDRA:HOSTS`, `S3:BUCKET_NAME`, ...).

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Months of data kept in the hot store before archival.
pub const DEFAULT_RETENTION_MONTHS: u32 = 3;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SkyvaultConfig {
    #[serde(default)]
    pub hot_store: HotStoreConfig,
    #[serde(default)]
    pub cold_store: ColdStoreConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub topics: TopicsConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default = "default_retention_months")]
    pub retention_months: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HotStoreConfig {
    #[serde(default = "default_hosts")]
    pub hosts: Vec<String>,
    #[serde(default = "default_keyspace")]
    pub keyspace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default = "default_replication_class")]
    pub replication_class: String,
    #[serde(default = "default_replication_factor")]
    pub replication_factor: u32,
    /// Paths to client certificates, when the cluster requires TLS.
    #[serde(default)]
    pub certificate_paths: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_password: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ColdStoreConfig {
    #[serde(default = "default_bucket_name")]
    pub bucket_name: String,
    /// When disabled, the tier router serves every bucket from hot.
    #[serde(default = "default_cold_enabled")]
    pub enabled: bool,
    /// Master bloom capacity (all archived uuids).
    #[serde(default = "default_master_bloom_capacity")]
    pub master_bloom_capacity: u64,
    #[serde(default = "default_master_bloom_fpr")]
    pub master_bloom_fpr: f64,
    /// Per-tag bloom capacity.
    #[serde(default = "default_tag_bloom_capacity")]
    pub tag_bloom_capacity: u64,
    #[serde(default = "default_tag_bloom_fpr")]
    pub tag_bloom_fpr: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    #[serde(default = "default_redis_host")]
    pub redis_host: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TopicsConfig {
    #[serde(default = "default_sold_topic")]
    pub sold_auction: String,
    #[serde(default = "default_new_topic")]
    pub new_auction: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IngestConfig {
    /// Cooperative worker tasks draining the thunk queues.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Rows per page when draining the historical source.
    #[serde(default = "default_source_batch")]
    pub source_batch: usize,
    /// Bus records per consumed batch.
    #[serde(default = "default_bus_batch")]
    pub bus_batch: usize,
    /// Bounded fan-out degree inside batch processing.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    /// Queue-depth high watermark for auction thunks.
    #[serde(default = "default_auction_watermark")]
    pub auction_watermark: usize,
    /// Queue-depth high watermark for bid thunks.
    #[serde(default = "default_bid_watermark")]
    pub bid_watermark: usize,
}

fn default_retention_months() -> u32 {
    DEFAULT_RETENTION_MONTHS
}

fn default_hosts() -> Vec<String> {
    vec!["127.0.0.1".to_string()]
}

fn default_keyspace() -> String {
    "sky_auctions".to_string()
}

fn default_replication_class() -> String {
    "SimpleStrategy".to_string()
}

fn default_replication_factor() -> u32 {
    1
}

fn default_bucket_name() -> String {
    "sky-auctions-archive".to_string()
}

fn default_cold_enabled() -> bool {
    true
}

fn default_master_bloom_capacity() -> u64 {
    100_000_000
}

fn default_master_bloom_fpr() -> f64 {
    0.001
}

fn default_tag_bloom_capacity() -> u64 {
    1_000_000
}

fn default_tag_bloom_fpr() -> f64 {
    0.01
}

fn default_redis_host() -> String {
    "127.0.0.1:6379".to_string()
}

fn default_sold_topic() -> String {
    "SOLD_AUCTION".to_string()
}

fn default_new_topic() -> String {
    "NEW_AUCTION".to_string()
}

fn default_workers() -> usize {
    50
}

fn default_source_batch() -> usize {
    2_500
}

fn default_bus_batch() -> usize {
    400
}

fn default_parallelism() -> usize {
    10
}

fn default_auction_watermark() -> usize {
    500
}

fn default_bid_watermark() -> usize {
    200
}

impl Default for HotStoreConfig {
    fn default() -> Self {
        Self {
            hosts: default_hosts(),
            keyspace: default_keyspace(),
            user: None,
            password: None,
            replication_class: default_replication_class(),
            replication_factor: default_replication_factor(),
            certificate_paths: Vec::new(),
            certificate_password: None,
        }
    }
}

impl Default for ColdStoreConfig {
    fn default() -> Self {
        Self {
            bucket_name: default_bucket_name(),
            enabled: default_cold_enabled(),
            master_bloom_capacity: default_master_bloom_capacity(),
            master_bloom_fpr: default_master_bloom_fpr(),
            tag_bloom_capacity: default_tag_bloom_capacity(),
            tag_bloom_fpr: default_tag_bloom_fpr(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis_host: default_redis_host(),
        }
    }
}

impl Default for TopicsConfig {
    fn default() -> Self {
        Self {
            sold_auction: default_sold_topic(),
            new_auction: default_new_topic(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            source_batch: default_source_batch(),
            bus_batch: default_bus_batch(),
            parallelism: default_parallelism(),
            auction_watermark: default_auction_watermark(),
            bid_watermark: default_bid_watermark(),
        }
    }
}

impl Default for SkyvaultConfig {
    fn default() -> Self {
        Self {
            hot_store: HotStoreConfig::default(),
            cold_store: ColdStoreConfig::default(),
            cache: CacheConfig::default(),
            topics: TopicsConfig::default(),
            ingest: IngestConfig::default(),
            retention_months: default_retention_months(),
        }
    }
}

impl SkyvaultConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from environment variables.
    ///
    /// Recognized keys:
    /// - CASSANDRA:HOSTS (comma separated), CASSANDRA:KEYSPACE,
    ///   CASSANDRA:USER, CASSANDRA:PASSWORD, CASSANDRA:REPLICATION_CLASS,
    ///   CASSANDRA:REPLICATION_FACTOR, CASSANDRA:X509Certificate_PATHS
    ///   (comma separated), CASSANDRA:X509Certificate_PASSWORD
    /// - REDIS_HOST
    /// - S3:BUCKET_NAME
    /// - TOPICS:SOLD_AUCTION, TOPICS:NEW_AUCTION
    /// - RETENTION_MONTHS (default 3)
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(hosts) = std::env::var("CASSANDRA:HOSTS") {
            config.hot_store.hosts = hosts.split(',').map(String::from).collect();
        }
        if let Ok(keyspace) = std::env::var("CASSANDRA:KEYSPACE") {
            config.hot_store.keyspace = keyspace;
        }
        if let Ok(user) = std::env::var("CASSANDRA:USER") {
            config.hot_store.user = Some(user);
        }
        if let Ok(password) = std::env::var("CASSANDRA:PASSWORD") {
            config.hot_store.password = Some(password);
        }
        if let Ok(class) = std::env::var("CASSANDRA:REPLICATION_CLASS") {
            config.hot_store.replication_class = class;
        }
        if let Ok(factor) = std::env::var("CASSANDRA:REPLICATION_FACTOR") {
            if let Ok(val) = factor.parse() {
                config.hot_store.replication_factor = val;
            }
        }
        if let Ok(paths) = std::env::var("CASSANDRA:X509Certificate_PATHS") {
            config.hot_store.certificate_paths = paths.split(',').map(String::from).collect();
        }
        if let Ok(password) = std::env::var("CASSANDRA:X509Certificate_PASSWORD") {
            config.hot_store.certificate_password = Some(password);
        }

        if let Ok(host) = std::env::var("REDIS_HOST") {
            config.cache.redis_host = host;
        }
        if let Ok(bucket) = std::env::var("S3:BUCKET_NAME") {
            config.cold_store.bucket_name = bucket;
        }
        if let Ok(topic) = std::env::var("TOPICS:SOLD_AUCTION") {
            config.topics.sold_auction = topic;
        }
        if let Ok(topic) = std::env::var("TOPICS:NEW_AUCTION") {
            config.topics.new_auction = topic;
        }
        if let Ok(months) = std::env::var("RETENTION_MONTHS") {
            if let Ok(val) = months.parse() {
                config.retention_months = val;
            }
        }

        config
    }

    /// Load configuration with priority: environment > file > defaults.
    pub fn load<P: AsRef<Path>>(config_file: Option<P>) -> Result<Self> {
        let config = if let Some(path) = config_file {
            if path.as_ref().exists() {
                tracing::info!(path = %path.as_ref().display(), "loading configuration file");
                Self::from_file(&path)?
            } else {
                tracing::warn!(path = %path.as_ref().display(), "config file not found, using defaults");
                Self::default()
            }
        } else {
            Self::default()
        };

        // Override with environment variables
        let config = config.merge_with_env();

        config.validate()?;
        Ok(config)
    }

    /// Merge config with environment variables (env takes priority). Only
    /// overrides a field when its variable was explicitly set.
    fn merge_with_env(mut self) -> Self {
        let env_config = Self::from_env();

        if std::env::var("CASSANDRA:HOSTS").is_ok() {
            self.hot_store.hosts = env_config.hot_store.hosts;
        }
        if std::env::var("CASSANDRA:KEYSPACE").is_ok() {
            self.hot_store.keyspace = env_config.hot_store.keyspace;
        }
        if std::env::var("CASSANDRA:USER").is_ok() {
            self.hot_store.user = env_config.hot_store.user;
        }
        if std::env::var("CASSANDRA:PASSWORD").is_ok() {
            self.hot_store.password = env_config.hot_store.password;
        }
        if std::env::var("CASSANDRA:REPLICATION_CLASS").is_ok() {
            self.hot_store.replication_class = env_config.hot_store.replication_class;
        }
        if std::env::var("CASSANDRA:REPLICATION_FACTOR").is_ok() {
            self.hot_store.replication_factor = env_config.hot_store.replication_factor;
        }
        if std::env::var("CASSANDRA:X509Certificate_PATHS").is_ok() {
            self.hot_store.certificate_paths = env_config.hot_store.certificate_paths;
        }
        if std::env::var("CASSANDRA:X509Certificate_PASSWORD").is_ok() {
            self.hot_store.certificate_password = env_config.hot_store.certificate_password;
        }
        if std::env::var("REDIS_HOST").is_ok() {
            self.cache.redis_host = env_config.cache.redis_host;
        }
        if std::env::var("S3:BUCKET_NAME").is_ok() {
            self.cold_store.bucket_name = env_config.cold_store.bucket_name;
        }
        if std::env::var("TOPICS:SOLD_AUCTION").is_ok() {
            self.topics.sold_auction = env_config.topics.sold_auction;
        }
        if std::env::var("TOPICS:NEW_AUCTION").is_ok() {
            self.topics.new_auction = env_config.topics.new_auction;
        }
        if std::env::var("RETENTION_MONTHS").is_ok() {
            self.retention_months = env_config.retention_months;
        }

        self
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.hot_store.hosts.is_empty() {
            anyhow::bail!("no hot store hosts configured");
        }
        if self.retention_months == 0 {
            anyhow::bail!("retention must be at least one month");
        }
        if !(0.0..1.0).contains(&self.cold_store.master_bloom_fpr)
            || !(0.0..1.0).contains(&self.cold_store.tag_bloom_fpr)
        {
            anyhow::bail!("bloom false-positive rates must be in (0, 1)");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = SkyvaultConfig::default();
        assert_eq!(config.retention_months, 3);
        assert_eq!(config.topics.sold_auction, "SOLD_AUCTION");
        assert_eq!(config.topics.new_auction, "NEW_AUCTION");
        assert_eq!(config.ingest.source_batch, 2_500);
        assert!(config.cold_store.enabled);
        config.validate().unwrap();
    }

    #[test]
    fn env_overrides() {
        std::env::set_var("CASSANDRA:KEYSPACE", "test_keyspace");
        std::env::set_var("RETENTION_MONTHS", "6");
        std::env::set_var("S3:BUCKET_NAME", "test-bucket");

        let config = SkyvaultConfig::from_env();
        assert_eq!(config.hot_store.keyspace, "test_keyspace");
        assert_eq!(config.retention_months, 6);
        assert_eq!(config.cold_store.bucket_name, "test-bucket");

        std::env::remove_var("CASSANDRA:KEYSPACE");
        std::env::remove_var("RETENTION_MONTHS");
        std::env::remove_var("S3:BUCKET_NAME");
    }

    #[test]
    fn env_overrides_file_values_on_merge() {
        // as if loaded from a file
        let mut config = SkyvaultConfig::default();
        config.topics.sold_auction = "file_sold".to_string();
        config.hot_store.replication_factor = 5;
        config.cache.redis_host = "file-redis:6379".to_string();

        std::env::set_var("TOPICS:SOLD_AUCTION", "env_sold");
        std::env::set_var("CASSANDRA:REPLICATION_FACTOR", "3");

        let merged = config.merge_with_env();
        assert_eq!(merged.topics.sold_auction, "env_sold");
        assert_eq!(merged.hot_store.replication_factor, 3);
        // untouched variables keep the file values
        assert_eq!(merged.cache.redis_host, "file-redis:6379");

        std::env::remove_var("TOPICS:SOLD_AUCTION");
        std::env::remove_var("CASSANDRA:REPLICATION_FACTOR");
    }

    #[test]
    fn toml_round_trip() {
        let config = SkyvaultConfig::default();
        let text = toml::to_string(&config).unwrap();
        let parsed: SkyvaultConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.retention_months, config.retention_months);
        assert_eq!(parsed.hot_store.keyspace, config.hot_store.keyspace);
    }
}
