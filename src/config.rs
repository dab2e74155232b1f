//! Harvest configuration.
//!
//! The partition catalog is versioned because it drives both the search
//! surface and the identifier tie-break order; persisted catalogs record the
//! version they were reconciled under.

use once_cell::sync::Lazy;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Deserialize;
use std::path::Path;

use crate::error::HarvestError;
use crate::models::LookupMode;

/// Browser identities rotated per request.
pub static DEFAULT_USER_AGENTS: Lazy<Vec<String>> = Lazy::new(|| {
    [
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Edge/120.0.0.0",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Safari/605.1.15",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
});

/// Alias the source expands to every vendor itself.
pub const ALL_PARTITIONS_ALIAS: &str = "全部";

/// Vendors in priority order, most authoritative first.
const DEFAULT_VENDORS: [&str; 10] = [
    "錢櫃", "好樂迪", "銀櫃", "音圓", "金嗓", "弘音", "星據點", "音霸", "大東", "點將家",
];

// ============================================================================
// Partition Catalog
// ============================================================================

/// One searchable source partition.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PartitionDescriptor {
    pub id: String,
    /// Priority rank (lower is more authoritative). `None` ranks last.
    #[serde(default)]
    pub rank: Option<u32>,
}

impl PartitionDescriptor {
    pub fn ranked(id: &str, rank: u32) -> Self {
        Self {
            id: id.to_string(),
            rank: Some(rank),
        }
    }

    pub fn unranked(id: &str) -> Self {
        Self {
            id: id.to_string(),
            rank: None,
        }
    }
}

/// Ordered list of partitions. Search order is list order.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PartitionCatalog {
    pub version: u32,
    pub partitions: Vec<PartitionDescriptor>,
}

impl Default for PartitionCatalog {
    fn default() -> Self {
        let mut partitions = vec![PartitionDescriptor::unranked(ALL_PARTITIONS_ALIAS)];
        partitions.extend(
            DEFAULT_VENDORS
                .iter()
                .enumerate()
                .map(|(i, id)| PartitionDescriptor::ranked(id, i as u32 + 1)),
        );
        Self {
            version: 1,
            partitions,
        }
    }
}

impl PartitionCatalog {
    pub fn new(version: u32, partitions: Vec<PartitionDescriptor>) -> Self {
        Self {
            version,
            partitions,
        }
    }

    /// Rejects empty lists, blank ids and duplicate ids.
    pub fn validate(&self) -> Result<(), HarvestError> {
        if self.partitions.is_empty() {
            return Err(HarvestError::InvalidInput(
                "partition catalog is empty".to_string(),
            ));
        }
        let mut seen = FxHashSet::default();
        for p in &self.partitions {
            if p.id.trim().is_empty() {
                return Err(HarvestError::InvalidInput(
                    "partition catalog contains a blank id".to_string(),
                ));
            }
            if !seen.insert(p.id.as_str()) {
                return Err(HarvestError::InvalidInput(format!(
                    "partition '{}' is listed twice",
                    p.id
                )));
            }
        }
        Ok(())
    }

    /// Rank lookup table for identifier ordering.
    pub fn priority_table(&self) -> PriorityTable {
        PriorityTable {
            ranks: self
                .partitions
                .iter()
                .filter_map(|p| p.rank.map(|r| (p.id.clone(), r)))
                .collect(),
        }
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.partitions.iter().map(|p| p.id.as_str())
    }
}

/// Partition id -> rank. Partitions without a rank sort after every ranked one.
#[derive(Debug, Clone, Default)]
pub struct PriorityTable {
    ranks: FxHashMap<String, u32>,
}

impl PriorityTable {
    /// Sort rank for a partition id: ranked partitions by rank, then unknowns.
    pub fn rank_of(&self, partition: &str) -> (u8, u32) {
        match self.ranks.get(partition) {
            Some(&r) => (0, r),
            None => (1, 0),
        }
    }
}

// ============================================================================
// Fan-out / Lookup / Pool / Refresh sections
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FanoutConfig {
    /// Characters per overlapping fragment.
    pub fragment_width: usize,
    /// Fragments shorter than this (the tail) are not queried.
    pub min_fragment_len: usize,
    /// Modes re-queried with the exact name after the fragments.
    pub alternate_modes: Vec<LookupMode>,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            fragment_width: 2,
            min_fragment_len: 2,
            alternate_modes: vec![LookupMode::NewArrivals, LookupMode::Popular],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LookupConfig {
    pub base_url: String,
    pub endpoint: String,
    pub timeout_secs: u64,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_retries: u32,
    pub initial_backoff_ms: u64, // Doubled after every retry
    pub user_agents: Vec<String>,
    pub accept_language: String,
    pub referer: String,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            base_url: "https://song.corp.com.tw".to_string(),
            endpoint: "/api/song.aspx".to_string(),
            timeout_secs: 15,
            min_delay_ms: 800,
            max_delay_ms: 1500,
            max_retries: 2,
            initial_backoff_ms: 1000,
            user_agents: DEFAULT_USER_AGENTS.clone(),
            accept_language: "zh-TW,zh;q=0.9,en-US;q=0.8,en;q=0.7".to_string(),
            referer: "https://song.corp.com.tw/".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Partitions searched concurrently within one pass.
    pub workers: usize,
    pub target_pause_min_ms: u64,
    pub target_pause_max_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            target_pause_min_ms: 3000,
            target_pause_max_ms: 8000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RefreshPolicy {
    pub min_songs: usize,
    pub headline_min_songs: usize,
    pub headline_performers: Vec<String>,
    pub max_age_days: Option<i64>,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            min_songs: 30,
            headline_min_songs: 100,
            headline_performers: [
                "周杰倫", "蔡依林", "林俊傑", "張惠妹", "五月天", "孫燕姿", "梁靜茹",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            max_age_days: Some(30),
        }
    }
}

// ============================================================================
// Top-level Config
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    pub catalog: PartitionCatalog,
    pub fanout: FanoutConfig,
    pub lookup: LookupConfig,
    pub pool: PoolConfig,
    pub refresh: RefreshPolicy,
}

impl HarvestConfig {
    /// Load from a TOML file, or defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self, HarvestError> {
        let config = match path {
            None => Self::default(),
            Some(p) => {
                let text = std::fs::read_to_string(p).map_err(|e| {
                    HarvestError::Config(format!("cannot read {}: {}", p.display(), e))
                })?;
                Self::from_toml(&text)?
            }
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, HarvestError> {
        toml::from_str(text).map_err(|e| HarvestError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), HarvestError> {
        self.catalog.validate()?;
        if self.fanout.fragment_width == 0 {
            return Err(HarvestError::Config("fanout.fragment_width must be >= 1".into()));
        }
        if self.fanout.min_fragment_len == 0 {
            return Err(HarvestError::Config("fanout.min_fragment_len must be >= 1".into()));
        }
        if self.lookup.min_delay_ms > self.lookup.max_delay_ms {
            return Err(HarvestError::Config(
                "lookup.min_delay_ms exceeds lookup.max_delay_ms".into(),
            ));
        }
        if self.pool.target_pause_min_ms > self.pool.target_pause_max_ms {
            return Err(HarvestError::Config(
                "pool.target_pause_min_ms exceeds pool.target_pause_max_ms".into(),
            ));
        }
        if self.pool.workers == 0 {
            return Err(HarvestError::Config("pool.workers must be >= 1".into()));
        }
        Ok(())
    }
}
