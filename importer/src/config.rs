use std::env;
use std::time::Duration;

use color_eyre::eyre::{eyre, WrapErr};

pub const DEFAULT_APPVIEW_URL: &str = "https://public.api.bsky.app";
pub const DEFAULT_PLC_DIRECTORY_URL: &str = "https://plc.directory";
/// Service the bookmark writes are routed through
pub const DEFAULT_BOOKMARK_PROXY: &str = "did:web:api.bsky.app#bsky_appview";
pub const DEFAULT_SAVED_POSTS_URL: &str = "https://bsky.app/saved";

const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_RESOLVE_TIMEOUT_MS: u64 = 15_000;

/// Runtime configuration, read from the environment
#[derive(Debug, Clone)]
pub struct Config {
    pub appview_url: String,
    pub plc_directory_url: String,
    pub bookmark_proxy: String,
    pub saved_posts_url: String,
    pub request_timeout: Duration,
    pub resolve_timeout: Duration,
    pub dns_resolution: bool,
    pub well_known_resolution: bool,
    pub appview_resolution: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            appview_url: DEFAULT_APPVIEW_URL.to_string(),
            plc_directory_url: DEFAULT_PLC_DIRECTORY_URL.to_string(),
            bookmark_proxy: DEFAULT_BOOKMARK_PROXY.to_string(),
            saved_posts_url: DEFAULT_SAVED_POSTS_URL.to_string(),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            resolve_timeout: Duration::from_millis(DEFAULT_RESOLVE_TIMEOUT_MS),
            dns_resolution: true,
            well_known_resolution: true,
            appview_resolution: true,
        }
    }
}

impl Config {
    pub fn from_env() -> color_eyre::Result<Self> {
        let appview_url = env::var("APPVIEW_URL")
            .unwrap_or_else(|_| DEFAULT_APPVIEW_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        // Keep the URL free of a trailing slash so DIDs can be appended directly
        let plc_directory_url = env::var("PLC_DIRECTORY_URL")
            .unwrap_or_else(|_| DEFAULT_PLC_DIRECTORY_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            appview_url,
            plc_directory_url,
            bookmark_proxy: env::var("BOOKMARK_PROXY")
                .unwrap_or_else(|_| DEFAULT_BOOKMARK_PROXY.to_string()),
            saved_posts_url: env::var("SAVED_POSTS_URL")
                .unwrap_or_else(|_| DEFAULT_SAVED_POSTS_URL.to_string()),
            request_timeout: duration_from_env("REQUEST_TIMEOUT_MS", DEFAULT_REQUEST_TIMEOUT_MS)?,
            resolve_timeout: duration_from_env("RESOLVE_TIMEOUT_MS", DEFAULT_RESOLVE_TIMEOUT_MS)?,
            dns_resolution: is_feature_enabled("DNS_RESOLUTION"),
            well_known_resolution: is_feature_enabled("WELL_KNOWN_RESOLUTION"),
            appview_resolution: is_feature_enabled("APPVIEW_RESOLUTION"),
        })
    }
}

fn duration_from_env(name: &str, default_ms: u64) -> color_eyre::Result<Duration> {
    match env::var(name) {
        Ok(raw) => {
            let ms = raw
                .trim()
                .parse::<u64>()
                .wrap_err_with(|| format!("{name} must be a number of milliseconds, got {raw:?}"))?;
            if ms == 0 {
                return Err(eyre!("{name} must be greater than zero"));
            }
            Ok(Duration::from_millis(ms))
        }
        Err(_) => Ok(Duration::from_millis(default_ms)),
    }
}

/// Check if a feature is enabled based on environment variables
fn is_feature_enabled(feature: &str) -> bool {
    env::var(format!("{}_DISABLED", feature)).unwrap_or_else(|_| "false".to_string()) != "true"
}

#[cfg(test)]
mod tests {
    use super::*;

    // Env vars are process-wide, so every test uses its own variable names

    #[test]
    fn test_is_feature_enabled_when_env_var_not_set() -> color_eyre::Result<()> {
        env::remove_var("CFG_TEST_UNSET_DISABLED");

        assert!(is_feature_enabled("CFG_TEST_UNSET"));

        Ok(())
    }

    #[test]
    fn test_is_feature_disabled_when_env_var_is_true() -> color_eyre::Result<()> {
        env::set_var("CFG_TEST_TRUE_DISABLED", "true");

        assert!(!is_feature_enabled("CFG_TEST_TRUE"));

        env::remove_var("CFG_TEST_TRUE_DISABLED");

        Ok(())
    }

    #[test]
    fn test_is_feature_enabled_with_other_values() -> color_eyre::Result<()> {
        env::set_var("CFG_TEST_YES_DISABLED", "yes");

        assert!(is_feature_enabled("CFG_TEST_YES"));

        env::remove_var("CFG_TEST_YES_DISABLED");

        Ok(())
    }

    #[test]
    fn test_duration_from_env_uses_default() -> color_eyre::Result<()> {
        env::remove_var("CFG_TEST_TIMEOUT_UNSET");

        let duration = duration_from_env("CFG_TEST_TIMEOUT_UNSET", 1234)?;
        assert_eq!(duration, Duration::from_millis(1234));

        Ok(())
    }

    #[test]
    fn test_duration_from_env_rejects_garbage() {
        env::set_var("CFG_TEST_TIMEOUT_GARBAGE", "soon");

        assert!(duration_from_env("CFG_TEST_TIMEOUT_GARBAGE", 1).is_err());

        env::set_var("CFG_TEST_TIMEOUT_GARBAGE", "0");
        assert!(duration_from_env("CFG_TEST_TIMEOUT_GARBAGE", 1).is_err());

        env::remove_var("CFG_TEST_TIMEOUT_GARBAGE");
    }
}
