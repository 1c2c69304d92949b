use recomp_mem::layout::{default_candidates, BasePreference};
use thiserror::Error;

/// Default number of kernel calls traced individually before the bridge goes quiet.
pub const DEFAULT_BRIDGE_LOG_LIMIT: u32 = 200;

#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// Kernel calls beyond this count are no longer traced one by one. Unbridged-call warnings
    /// are not subject to the limit.
    pub bridge_log_limit: u32,
    /// Value written to `eax` by calls through an ordinal without a marshalling routine.
    pub unbridged_status: u32,
    /// Host bases tried when reserving the address space.
    pub candidates: Vec<BasePreference>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            bridge_log_limit: DEFAULT_BRIDGE_LOG_LIMIT,
            unbridged_status: 0,
            candidates: default_candidates(),
        }
    }
}

impl RuntimeConfig {
    /// Reads overrides from `RECOMP_BRIDGE_LOG_LIMIT` and `RECOMP_UNBRIDGED_STATUS`.
    ///
    /// Status values accept decimal or `0x`-prefixed hex.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        if let Ok(raw) = std::env::var("RECOMP_BRIDGE_LOG_LIMIT") {
            cfg.bridge_log_limit = raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidEnv("RECOMP_BRIDGE_LOG_LIMIT"))?;
        }
        if let Ok(raw) = std::env::var("RECOMP_UNBRIDGED_STATUS") {
            cfg.unbridged_status = parse_u32(&raw)
                .ok_or(ConfigError::InvalidEnv("RECOMP_UNBRIDGED_STATUS"))?;
        }
        Ok(cfg)
    }
}

pub fn parse_u32(raw: &str) -> Option<u32> {
    let raw = raw.trim();
    match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => raw.parse().ok(),
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for env var {0}")]
    InvalidEnv(&'static str),
}
