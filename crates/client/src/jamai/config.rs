use directories::BaseDirs;
use serde::Deserialize;
use std::{env, fs, path::Path, path::PathBuf, time::Duration};
use tracing::warn;

pub const DEFAULT_API_BASE: &str = "https://api.jamaibase.com/api";

#[derive(Clone, Debug, Default, Deserialize)]
pub struct JamaiFileConfig {
    pub api_base: Option<String>,
    pub api_key: Option<String>,
    pub project_id: Option<String>,
    pub timeout_ms: Option<u64>,
    /// `0` disables the idle timeout.
    pub stream_idle_timeout_ms: Option<u64>,
    pub proxy: Option<String>,
}

#[derive(Clone, Debug)]
pub struct JamaiConfig {
    pub api_base: String,
    pub api_key: Option<String>,
    pub project_id: Option<String>,
    /// Connect timeout. Streams are bounded by `stream_idle_timeout` instead.
    pub timeout: Duration,
    pub stream_idle_timeout: Option<Duration>,
    pub proxy: Option<String>,
}

impl Default for JamaiConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            api_key: None,
            project_id: None,
            timeout: Duration::from_millis(30_000),
            stream_idle_timeout: Some(Duration::from_millis(300_000)),
            proxy: None,
        }
    }
}

impl JamaiConfig {
    pub fn from_env_and_file() -> anyhow::Result<Self> {
        let file = Self::config_path()
            .filter(|p| p.exists())
            .and_then(|p| Self::read_file(&p));
        Self::from_sources(file, |key| env::var(key).ok())
    }

    /// Defaults, then `file`, then environment variables, in increasing precedence.
    pub fn from_sources(
        file: Option<JamaiFileConfig>,
        env: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<Self> {
        let env = |key: &str| env(key).filter(|v| !v.trim().is_empty());
        let mut cfg = JamaiConfig::default();

        if let Some(f) = file {
            if let Some(b) = f.api_base {
                cfg.api_base = b;
            }
            if f.api_key.is_some() {
                cfg.api_key = f.api_key;
            }
            if f.project_id.is_some() {
                cfg.project_id = f.project_id;
            }
            if let Some(t) = f.timeout_ms {
                cfg.timeout = Duration::from_millis(t);
            }
            if let Some(idle) = f.stream_idle_timeout_ms {
                cfg.stream_idle_timeout = (idle > 0).then(|| Duration::from_millis(idle));
            }
            if f.proxy.is_some() {
                cfg.proxy = f.proxy;
            }
        }

        if let Some(b) = env("JAMAI_API_BASE") {
            cfg.api_base = b;
        }
        if let Some(k) = env("JAMAI_API_KEY") {
            cfg.api_key = Some(k);
        }
        if let Some(p) = env("JAMAI_PROJECT_ID") {
            cfg.project_id = Some(p);
        }
        if let Some(p) = env("HTTPS_PROXY").or_else(|| env("HTTP_PROXY")) {
            cfg.proxy = Some(p);
        }

        url::Url::parse(&cfg.api_base)
            .map_err(|e| anyhow::anyhow!("invalid api base {:?}: {}", cfg.api_base, e))?;
        Ok(cfg)
    }

    fn read_file(path: &Path) -> Option<JamaiFileConfig> {
        let text = fs::read_to_string(path).ok()?;
        match toml::from_str::<JamaiFileConfig>(&text) {
            Ok(f) => Some(f),
            Err(e) => {
                warn!(target:"gentable::jamai","ignoring {}: {}", path.display(), e);
                None
            }
        }
    }

    fn config_path() -> Option<PathBuf> {
        let base = BaseDirs::new()?;
        let p = if cfg!(target_os = "windows") {
            base.home_dir().join(".gentable").join("config.toml")
        } else {
            base.config_dir().join("gentable").join("config.toml")
        };
        Some(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k: &str| map.get(k).cloned()
    }

    #[test]
    fn defaults_without_sources() {
        let cfg = JamaiConfig::from_sources(None, env_of(&[])).unwrap();
        assert_eq!(cfg.api_base, DEFAULT_API_BASE);
        assert!(cfg.api_key.is_none());
        assert_eq!(cfg.stream_idle_timeout, Some(Duration::from_secs(300)));
    }

    #[test]
    fn env_overrides_file() {
        let file: JamaiFileConfig = toml::from_str(
            r#"
            api_base = "http://file.local/api"
            api_key = "file-key"
            project_id = "proj_file"
            timeout_ms = 5000
            "#,
        )
        .unwrap();
        let cfg = JamaiConfig::from_sources(
            Some(file),
            env_of(&[("JAMAI_API_KEY", "env-key"), ("JAMAI_PROJECT_ID", "")]),
        )
        .unwrap();
        assert_eq!(cfg.api_base, "http://file.local/api");
        assert_eq!(cfg.api_key.as_deref(), Some("env-key"));
        assert_eq!(cfg.project_id.as_deref(), Some("proj_file"));
        assert_eq!(cfg.timeout, Duration::from_secs(5));
    }

    #[test]
    fn zero_idle_timeout_disables_it() {
        let file = JamaiFileConfig {
            stream_idle_timeout_ms: Some(0),
            ..Default::default()
        };
        let cfg = JamaiConfig::from_sources(Some(file), env_of(&[])).unwrap();
        assert!(cfg.stream_idle_timeout.is_none());
    }

    #[test]
    fn proxy_prefers_https() {
        let cfg = JamaiConfig::from_sources(
            None,
            env_of(&[("HTTP_PROXY", "http://p1:80"), ("HTTPS_PROXY", "http://p2:443")]),
        )
        .unwrap();
        assert_eq!(cfg.proxy.as_deref(), Some("http://p2:443"));
    }

    #[test]
    fn invalid_api_base_is_rejected() {
        let err = JamaiConfig::from_sources(None, env_of(&[("JAMAI_API_BASE", "not a url")]));
        assert!(err.is_err());
    }
}
