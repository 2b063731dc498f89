use std::time::Duration;

use serde::{Deserialize, Serialize};

use finality_core::geometry::Location;
use finality_core::participant::{ItemId, TemplateId};

/// Data-driven configuration for the trial engine.
///
/// Built once at startup and shared immutably with the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrialConfig {
    /// Master switch; when false every initiation is rejected.
    pub enabled: bool,
    /// Ask every non-initiating member for acknowledgment before starting.
    pub confirmation_enabled: bool,
    /// Seconds a pending run waits for acknowledgments.
    pub confirmation_timeout_secs: u64,
    pub min_group_size: usize,
    pub max_group_size: usize,
    /// Largest allowed gap between the highest and lowest member level.
    pub max_level_difference: u8,
    pub total_waves: u32,
    pub max_enemies_per_wave: usize,
    /// Delay between run start and the first wave announcement.
    pub first_wave_delay_ms: u64,
    /// Delay between a wave announcement and its spawn.
    pub announce_delay_ms: u64,
    /// Delay between a wave clearing and the next wave announcement.
    pub inter_wave_delay_ms: u64,
    pub pending_sweep_interval_ms: u64,
    pub boundary_check_interval_ms: u64,
    pub vote_sweep_interval_ms: u64,
    pub forfeit_vote_timeout_secs: u64,
    /// Token held by every participant for the duration of a run.
    pub marker_item_id: ItemId,
    pub narrator_template: TemplateId,
    /// GM accounts never receive the persisted penalty.
    pub gm_penalty_exempt: bool,
    /// GM accounts are never checked against the arena boundary.
    pub gm_boundary_exempt: bool,
    pub arena: ArenaConfig,
    pub tiers: Vec<WaveTier>,
    pub rewards: RewardConfig,
    pub announcement: AnnouncementConfig,
    pub celebration_enabled: bool,
    /// Fixed seed for enemy composition; `None` seeds from the OS.
    pub rng_seed: Option<u64>,
}

/// The single arena every run takes place in.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArenaConfig {
    pub center: Location,
    pub radius: f32,
    /// Where participants are placed on entry and after a boundary warning.
    pub entrance: Location,
    /// Where participants are sent on teardown.
    pub exit: Location,
    pub spawn_points: Vec<Location>,
}

/// A band of waves sharing one enemy pool and scaling profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaveTier {
    pub first_wave: u32,
    pub last_wave: u32,
    pub health_multiplier: f32,
    #[serde(default)]
    pub buffs: Vec<u32>,
    pub templates: Vec<TemplateId>,
}

impl WaveTier {
    pub fn covers(&self, wave: u32) -> bool {
        (self.first_wave..=self.last_wave).contains(&wave)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardConfig {
    /// Currency granted to each survivor (copper).
    pub currency: u64,
    /// Title granted to each survivor; 0 disables.
    pub title: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnouncementConfig {
    pub enabled: bool,
    /// `{initiator}` and `{roster}` are substituted.
    pub template: String,
}

impl Default for TrialConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            confirmation_enabled: true,
            confirmation_timeout_secs: 60,
            min_group_size: 1,
            max_group_size: 5,
            max_level_difference: 3,
            total_waves: 5,
            max_enemies_per_wave: 6,
            first_wave_delay_ms: 10_000,
            announce_delay_ms: 5_000,
            inter_wave_delay_ms: 15_000,
            pending_sweep_interval_ms: 1_000,
            boundary_check_interval_ms: 2_000,
            vote_sweep_interval_ms: 1_000,
            forfeit_vote_timeout_secs: 30,
            marker_item_id: 910_001,
            narrator_template: 910_100,
            gm_penalty_exempt: true,
            gm_boundary_exempt: true,
            arena: ArenaConfig::default(),
            tiers: default_tiers(),
            rewards: RewardConfig::default(),
            announcement: AnnouncementConfig::default(),
            celebration_enabled: true,
            rng_seed: None,
        }
    }
}

impl Default for ArenaConfig {
    fn default() -> Self {
        // Gurubashi Arena floor.
        let map = 0;
        Self {
            center: Location::new(map, -13_204.0, 276.0, 21.9),
            radius: 60.0,
            entrance: Location::new(map, -13_200.0, 270.0, 21.9),
            exit: Location::new(map, -13_277.0, 118.0, 24.5),
            spawn_points: vec![
                Location::new(map, -13_180.0, 290.0, 21.9),
                Location::new(map, -13_228.0, 290.0, 21.9),
                Location::new(map, -13_180.0, 262.0, 21.9),
                Location::new(map, -13_228.0, 262.0, 21.9),
                Location::new(map, -13_204.0, 300.0, 21.9),
                Location::new(map, -13_204.0, 252.0, 21.9),
            ],
        }
    }
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            currency: 5_000_000,
            title: 143,
        }
    }
}

impl Default for AnnouncementConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            template: "{initiator}'s group has conquered the Trial of Finality! Survivors: {roster}"
                .to_string(),
        }
    }
}

fn default_tiers() -> Vec<WaveTier> {
    vec![
        WaveTier {
            first_wave: 1,
            last_wave: 2,
            health_multiplier: 1.0,
            buffs: Vec::new(),
            templates: vec![910_201, 910_202, 910_203],
        },
        WaveTier {
            first_wave: 3,
            last_wave: 4,
            health_multiplier: 1.5,
            buffs: vec![910_301],
            templates: vec![910_211, 910_212, 910_213],
        },
        WaveTier {
            first_wave: 5,
            last_wave: 5,
            health_multiplier: 2.25,
            buffs: vec![910_301, 910_302],
            templates: vec![910_221, 910_222],
        },
    ]
}

/// A configuration value that cannot drive a run.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    Invalid { field: &'static str, reason: String },
    Parse(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Invalid { field, reason } => write!(f, "{field}: {reason}"),
            Self::Parse(e) => write!(f, "failed to parse trial config: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

impl TrialConfig {
    /// Parse a TOML document; missing keys fall back to defaults.
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Check internal consistency. Returns the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_group_size == 0 {
            return Err(invalid("min_group_size", "must be > 0"));
        }
        if self.max_group_size < self.min_group_size {
            return Err(invalid(
                "max_group_size",
                format!("must be >= min_group_size ({})", self.min_group_size),
            ));
        }
        if self.total_waves == 0 {
            return Err(invalid("total_waves", "must be > 0"));
        }
        if self.max_enemies_per_wave == 0 {
            return Err(invalid("max_enemies_per_wave", "must be > 0"));
        }
        if self.arena.spawn_points.is_empty() {
            return Err(invalid("arena.spawn_points", "at least one spawn point required"));
        }
        if !(self.arena.radius > 0.0) {
            return Err(invalid("arena.radius", "must be > 0"));
        }
        for (name, value) in [
            ("pending_sweep_interval_ms", self.pending_sweep_interval_ms),
            ("boundary_check_interval_ms", self.boundary_check_interval_ms),
            ("vote_sweep_interval_ms", self.vote_sweep_interval_ms),
        ] {
            if value == 0 {
                return Err(invalid(name, "must be > 0"));
            }
        }
        for wave in 1..=self.total_waves {
            let Some(tier) = self.tier_for(wave) else {
                return Err(invalid("tiers", format!("no tier covers wave {wave}")));
            };
            if tier.templates.is_empty() {
                return Err(invalid(
                    "tiers",
                    format!("tier covering wave {wave} has no templates"),
                ));
            }
            if !(tier.health_multiplier > 0.0) {
                return Err(invalid(
                    "tiers",
                    format!("tier covering wave {wave} has a non-positive health multiplier"),
                ));
            }
        }
        Ok(())
    }

    /// The first tier whose wave range contains `wave`.
    pub fn tier_for(&self, wave: u32) -> Option<&WaveTier> {
        self.tiers.iter().find(|t| t.covers(wave))
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }

    pub fn forfeit_vote_timeout(&self) -> Duration {
        Duration::from_secs(self.forfeit_vote_timeout_secs)
    }

    pub fn first_wave_delay(&self) -> Duration {
        Duration::from_millis(self.first_wave_delay_ms)
    }

    pub fn announce_delay(&self) -> Duration {
        Duration::from_millis(self.announce_delay_ms)
    }

    pub fn inter_wave_delay(&self) -> Duration {
        Duration::from_millis(self.inter_wave_delay_ms)
    }
}
