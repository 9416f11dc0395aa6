use std::time::Duration;

use serde::Deserialize;
use doommesh_core::error::{RelayError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelayConfig {
    pub version: u32,

    #[serde(default)]
    pub relay: RelaySection,

    #[serde(default)]
    pub identity: IdentitySection,

    #[serde(default)]
    pub limits: LimitsSection,

    #[serde(default)]
    pub ttl: TtlSection,
}

impl RelayConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(RelayError::UnsupportedVersion);
        }
        self.relay.validate()?;
        self.limits.validate()?;
        self.ttl.validate()?;
        Ok(())
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            version: 1,
            relay: RelaySection::default(),
            identity: IdentitySection::default(),
            limits: LimitsSection::default(),
            ttl: TtlSection::default(),
        }
    }
}

fn range_check(name: &str, v: u64, lo: u64, hi: u64) -> Result<()> {
    if !(lo..=hi).contains(&v) {
        return Err(RelayError::BadRequest(format!(
            "{name} must be between {lo} and {hi}"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelaySection {
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Deployment channel id; part of every swarm topic.
    #[serde(default = "default_channel")]
    pub channel: String,

    /// Join the swarm of every announced match and act as a relay hop.
    #[serde(default)]
    pub indexer: bool,

    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,

    /// Per-client outbound queue depth; frames beyond it are dropped.
    #[serde(default = "default_client_queue")]
    pub client_queue: usize,
}

impl Default for RelaySection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            channel: default_channel(),
            indexer: false,
            ping_interval_ms: default_ping_interval_ms(),
            client_queue: default_client_queue(),
        }
    }
}

impl RelaySection {
    pub fn validate(&self) -> Result<()> {
        if self.channel.trim().is_empty() {
            return Err(RelayError::BadRequest("relay.channel must not be empty".into()));
        }
        range_check("relay.ping_interval_ms", self.ping_interval_ms, 1000, 120_000)?;
        range_check("relay.client_queue", self.client_queue as u64, 16, 65_536)?;
        Ok(())
    }
}

fn default_listen() -> String {
    "127.0.0.1:7788".into()
}
fn default_channel() -> String {
    "tracdoom".into()
}
fn default_ping_interval_ms() -> u64 {
    10_000
}
fn default_client_queue() -> usize {
    1024
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IdentitySection {
    /// Hex ed25519 seed. An ephemeral key is generated when absent.
    #[serde(default)]
    pub secret_hex: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LimitsSection {
    #[serde(default = "default_rate")]
    pub rate_per_sec: u32,
    #[serde(default = "default_rate")]
    pub rate_burst: u32,

    #[serde(default = "default_roster_cache_ms")]
    pub roster_cache_ms: u64,
    #[serde(default = "default_host_check_ms")]
    pub host_check_cache_ms: u64,

    #[serde(default = "default_pending_ttl_ms")]
    pub pending_ttl_ms: u64,
    #[serde(default = "default_pending_max")]
    pub pending_max: usize,

    #[serde(default = "default_bootstrap_age_ms")]
    pub bootstrap_max_age_ms: u64,
    #[serde(default = "default_bootstrap_items")]
    pub bootstrap_max_items: usize,

    #[serde(default = "default_frame_dedup_ms")]
    pub frame_dedup_ttl_ms: u64,
    #[serde(default = "default_gossip_dedup_ms")]
    pub gossip_dedup_ttl_ms: u64,
    #[serde(default = "default_dedup_cap")]
    pub dedup_cap: usize,
    #[serde(default = "default_dedup_evict")]
    pub dedup_evict: usize,

    #[serde(default = "default_join_retry_ms")]
    pub join_retry_ms: u64,
}

impl Default for LimitsSection {
    fn default() -> Self {
        Self {
            rate_per_sec: default_rate(),
            rate_burst: default_rate(),
            roster_cache_ms: default_roster_cache_ms(),
            host_check_cache_ms: default_host_check_ms(),
            pending_ttl_ms: default_pending_ttl_ms(),
            pending_max: default_pending_max(),
            bootstrap_max_age_ms: default_bootstrap_age_ms(),
            bootstrap_max_items: default_bootstrap_items(),
            frame_dedup_ttl_ms: default_frame_dedup_ms(),
            gossip_dedup_ttl_ms: default_gossip_dedup_ms(),
            dedup_cap: default_dedup_cap(),
            dedup_evict: default_dedup_evict(),
            join_retry_ms: default_join_retry_ms(),
        }
    }
}

impl LimitsSection {
    pub fn validate(&self) -> Result<()> {
        range_check("limits.rate_per_sec", self.rate_per_sec as u64, 1, 100_000)?;
        range_check("limits.rate_burst", self.rate_burst as u64, 1, 100_000)?;
        range_check("limits.roster_cache_ms", self.roster_cache_ms, 50, 60_000)?;
        range_check("limits.host_check_cache_ms", self.host_check_cache_ms, 50, 60_000)?;
        range_check("limits.pending_ttl_ms", self.pending_ttl_ms, 100, 60_000)?;
        range_check("limits.pending_max", self.pending_max as u64, 1, 1024)?;
        range_check("limits.bootstrap_max_age_ms", self.bootstrap_max_age_ms, 100, 120_000)?;
        range_check("limits.bootstrap_max_items", self.bootstrap_max_items as u64, 1, 65_536)?;
        range_check("limits.frame_dedup_ttl_ms", self.frame_dedup_ttl_ms, 10, 60_000)?;
        range_check("limits.gossip_dedup_ttl_ms", self.gossip_dedup_ttl_ms, 10, 600_000)?;
        range_check("limits.dedup_cap", self.dedup_cap as u64, 16, 1_000_000)?;
        if self.dedup_evict == 0 || self.dedup_evict > self.dedup_cap {
            return Err(RelayError::BadRequest(
                "limits.dedup_evict must be in 1..=dedup_cap".into(),
            ));
        }
        range_check("limits.join_retry_ms", self.join_retry_ms, 100, 600_000)?;
        Ok(())
    }

    pub fn roster_cache(&self) -> Duration {
        Duration::from_millis(self.roster_cache_ms)
    }
    pub fn host_check_cache(&self) -> Duration {
        Duration::from_millis(self.host_check_cache_ms)
    }
    pub fn pending_ttl(&self) -> Duration {
        Duration::from_millis(self.pending_ttl_ms)
    }
    pub fn bootstrap_max_age(&self) -> Duration {
        Duration::from_millis(self.bootstrap_max_age_ms)
    }
    pub fn frame_dedup_ttl(&self) -> Duration {
        Duration::from_millis(self.frame_dedup_ttl_ms)
    }
    pub fn gossip_dedup_ttl(&self) -> Duration {
        Duration::from_millis(self.gossip_dedup_ttl_ms)
    }
    pub fn join_retry(&self) -> Duration {
        Duration::from_millis(self.join_retry_ms)
    }
}

fn default_rate() -> u32 {
    200
}
fn default_roster_cache_ms() -> u64 {
    2000
}
fn default_host_check_ms() -> u64 {
    1000
}
fn default_pending_ttl_ms() -> u64 {
    5000
}
fn default_pending_max() -> usize {
    32
}
fn default_bootstrap_age_ms() -> u64 {
    10_000
}
fn default_bootstrap_items() -> usize {
    256
}
fn default_frame_dedup_ms() -> u64 {
    1000
}
fn default_gossip_dedup_ms() -> u64 {
    5000
}
fn default_dedup_cap() -> usize {
    2048
}
fn default_dedup_evict() -> usize {
    128
}
fn default_join_retry_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TtlSection {
    #[serde(default = "default_presence_ms")]
    pub presence_ms: u64,
    #[serde(default = "default_match_ms")]
    pub match_ms: u64,
    #[serde(default = "default_sweep_ms")]
    pub sweep_ms: u64,
}

impl Default for TtlSection {
    fn default() -> Self {
        Self {
            presence_ms: default_presence_ms(),
            match_ms: default_match_ms(),
            sweep_ms: default_sweep_ms(),
        }
    }
}

impl TtlSection {
    pub fn validate(&self) -> Result<()> {
        range_check("ttl.presence_ms", self.presence_ms, 1000, 3_600_000)?;
        range_check("ttl.match_ms", self.match_ms, 1000, 86_400_000)?;
        range_check("ttl.sweep_ms", self.sweep_ms, 50, 60_000)?;
        if self.sweep_ms >= self.presence_ms {
            return Err(RelayError::BadRequest(
                "ttl.sweep_ms must be smaller than ttl.presence_ms".into(),
            ));
        }
        Ok(())
    }

    pub fn presence(&self) -> Duration {
        Duration::from_millis(self.presence_ms)
    }
    pub fn matches(&self) -> Duration {
        Duration::from_millis(self.match_ms)
    }
    pub fn sweep(&self) -> Duration {
        Duration::from_millis(self.sweep_ms)
    }
}

fn default_presence_ms() -> u64 {
    12_000
}
fn default_match_ms() -> u64 {
    120_000
}
fn default_sweep_ms() -> u64 {
    2000
}
