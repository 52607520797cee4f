use std::path::{Path, PathBuf};

use secrecy::SecretString;
use tracing::{debug, info};

use crate::{env_subst::substitute_env, error::Result, schema::GatewayConfig};

/// Load configuration with precedence (low → high): built-in defaults,
/// then a `moltchats.toml` file (if present), then environment variable
/// overrides (SPEC_FULL.md §4.10).
pub fn load() -> Result<GatewayConfig> {
    // Load a `.env` file if present, best-effort (mirrors the teacher
    // stack's dotenvy usage). Missing file is not an error.
    let _ = dotenvy::dotenv();

    let path = find_config_path();
    let mut config = match path {
        Some(ref p) => load_file(p)?,
        None => {
            debug!("no config file found, using defaults");
            GatewayConfig::default()
        },
    };

    apply_env_overrides(&mut config);
    Ok(config)
}

fn find_config_path() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("MOLTCHATS_CONFIG") {
        return Some(PathBuf::from(p));
    }
    let candidate = PathBuf::from("moltchats.toml");
    candidate.is_file().then_some(candidate)
}

fn load_file(path: &Path) -> Result<GatewayConfig> {
    let raw = std::fs::read_to_string(path).map_err(|source| crate::error::ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let substituted = substitute_env(&raw);
    let config: GatewayConfig =
        toml::from_str(&substituted).map_err(|source| crate::error::ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
    info!(path = %path.display(), "loaded config file");
    Ok(config)
}

/// Apply `MOLTCHATS_*` environment variable overrides, highest precedence.
fn apply_env_overrides(config: &mut GatewayConfig) {
    if let Ok(v) = std::env::var("MOLTCHATS_STORE_URL") {
        config.store_url = v;
    }
    if let Ok(v) = std::env::var("MOLTCHATS_BUS_URL") {
        config.bus_url = v;
    }
    if let Ok(v) = std::env::var("MOLTCHATS_TOKEN_SIGNING_SECRET") {
        config.token_signing_secret = SecretString::from(v);
    }
    if let Ok(v) = std::env::var("MOLTCHATS_PORT")
        && let Ok(port) = v.parse()
    {
        config.port = port;
    }
    if let Ok(v) = std::env::var("MOLTCHATS_IDLE_TIMEOUT_SECS")
        && let Ok(secs) = v.parse()
    {
        config.limits.idle_timeout_secs = secs;
    }
    if let Ok(v) = std::env::var("MOLTCHATS_TRUST_WORKER_INTERVAL_SECS")
        && let Ok(secs) = v.parse()
    {
        config.trust.worker_interval_secs = secs;
    }
    if let Ok(v) = std::env::var("MOLTCHATS_PRESENCE_HEARTBEAT_SECS")
        && let Ok(secs) = v.parse()
    {
        config.limits.presence_heartbeat_secs = secs;
    }
    if let Ok(v) = std::env::var("MOLTCHATS_EIGENTRUST_ALPHA")
        && let Ok(alpha) = v.parse()
    {
        config.trust.eigentrust_alpha = alpha;
    }
    if let Ok(v) = std::env::var("MOLTCHATS_SYBIL_MAX_PENALTY")
        && let Ok(penalty) = v.parse()
    {
        config.trust.sybil_max_penalty = penalty;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_no_file() {
        let config = GatewayConfig::default();
        assert_eq!(config.port, 8787);
        assert_eq!(config.limits.idle_timeout_secs, 900);
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("moltchats.toml");
        std::fs::write(&path, "port = 9999\n[limits]\nidle_timeout_secs = 30\n").unwrap();
        let config = load_file(&path).unwrap();
        assert_eq!(config.port, 9999);
        assert_eq!(config.limits.idle_timeout_secs, 30);
    }

    #[test]
    fn env_override_wins_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("moltchats.toml");
        std::fs::write(&path, "port = 9999\n").unwrap();
        let mut config = load_file(&path).unwrap();
        // SAFETY: test-only, single-threaded env mutation within this test.
        unsafe {
            std::env::set_var("MOLTCHATS_PORT", "1234");
        }
        apply_env_overrides(&mut config);
        unsafe {
            std::env::remove_var("MOLTCHATS_PORT");
        }
        assert_eq!(config.port, 1234);
    }
}
