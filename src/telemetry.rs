use tracing_subscriber::EnvFilter;

use crate::config::HarvestConfig;

/// Installs a fmt subscriber filtered by `RUST_LOG`, falling back to the
/// configured filter. Returns `false` if a global subscriber already exists.
pub fn init_tracing(config: &HarvestConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        let config = HarvestConfig::default().with_log_filter("instrument_harvester=debug");
        init_tracing(&config);
        assert!(!init_tracing(&config));
    }
}
