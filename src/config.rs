//! Application configuration.
//!
//! The configuration is loaded from a JSON file, by default
//! `$XDG_CONFIG_HOME/adjwin/config.json`.  Top-level `rules` always apply;
//! named `profiles` add rules for a particular monitor setup ("home",
//! "work", "laptop") and are picked either explicitly or by comparing their
//! `monitors` list with the outputs that are currently connected.
//!
//! # Example
//!
//! ```json
//! {
//!   "primary_monitor": 0,
//!   "retry": { "initial_backoff_ms": 200, "max_backoff_ms": 5000, "deadline_ms": 30000 },
//!   "rules": [
//!     {
//!       "match": { "class": "Terminal", "mode": "exact" },
//!       "geometry": { "x": "0%", "y": "0%", "width": "50%", "height": "50%" },
//!       "monitor": "primary",
//!       "priority": 1,
//!       "expected": true
//!     }
//!   ],
//!   "profiles": {
//!     "home": {
//!       "monitors": ["DP-1", "eDP-1"],
//!       "rules": [
//!         {
//!           "match": { "title": "Mail" },
//!           "geometry": { "x": 0, "y": 0, "width": "100%", "height": "100%" },
//!           "monitor": 1,
//!           "desktop": 2
//!         }
//!       ]
//!     }
//!   }
//! }
//! ```
//!
//! Unlike most of the file, the loader is strict: a malformed rule aborts
//! the whole load instead of being skipped.

use crate::rule::PlacementRule;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration.
///
/// Every section is optional; `{}` is a valid (if useless) config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Monitor index that the `"primary"` selector refers to.
    /// Defaults to `0`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_monitor: Option<usize>,

    /// Backoff and deadline for windows that have not mapped yet.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Rules that apply regardless of profile.
    #[serde(default)]
    pub rules: Vec<PlacementRule>,

    /// Named rule sets, keyed by profile name.
    #[serde(default)]
    pub profiles: BTreeMap<String, Profile>,
}

/// A named set of rules for one monitor arrangement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Profile {
    /// Output names that make up this arrangement.  When the connected
    /// outputs equal this set the profile is selected automatically.
    #[serde(default)]
    pub monitors: Vec<String>,
    #[serde(default)]
    pub rules: Vec<PlacementRule>,
}

/// Retry timing for expected windows.
///
/// All durations are in **milliseconds**.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    /// Delay before the first re-enumeration.
    pub initial_backoff_ms: u64,
    /// Upper bound for the doubling delay.
    pub max_backoff_ms: u64,
    /// Give up on an expected window after this long.
    pub deadline_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 200,
            max_backoff_ms: 5000,
            deadline_ms: 30_000,
        }
    }
}

impl RetryConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }
}

impl Config {
    /// Load and validate configuration from a JSON file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError(format!("failed to read {}: {}", path.display(), e)))?;
        let config = Self::from_json(&contents)
            .map_err(|e| ConfigError(format!("{}: {}", path.display(), e.0)))?;
        info!(
            "loaded config from {} ({} rule(s), {} profile(s))",
            path.display(),
            config.rules.len(),
            config.profiles.len()
        );
        Ok(config)
    }

    /// Parse and validate configuration from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError(format!("failed to parse: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check everything serde cannot: non-empty matchers, positive sizes,
    /// sane retry timings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let r = &self.retry;
        if r.initial_backoff_ms == 0 {
            return Err(ConfigError("retry.initial_backoff_ms must be positive".into()));
        }
        if r.max_backoff_ms < r.initial_backoff_ms {
            return Err(ConfigError(format!(
                "retry.max_backoff_ms ({}) is smaller than retry.initial_backoff_ms ({})",
                r.max_backoff_ms, r.initial_backoff_ms
            )));
        }

        for (i, rule) in self.rules.iter().enumerate() {
            rule.check()
                .map_err(|e| ConfigError(format!("rules[{}]: {}", i, e)))?;
        }
        for (name, profile) in &self.profiles {
            for (i, rule) in profile.rules.iter().enumerate() {
                rule.check()
                    .map_err(|e| ConfigError(format!("profiles.{}.rules[{}]: {}", name, i, e)))?;
            }
        }
        Ok(())
    }

    /// The index the `"primary"` selector resolves to.
    pub fn primary_index(&self) -> usize {
        self.primary_monitor.unwrap_or(0)
    }

    /// Build the ordered rule list for this run.
    ///
    /// With `profile` set, that profile's rules follow the top-level ones;
    /// an unknown name is an error.  Otherwise the first profile (by name)
    /// whose monitor set equals `connected` is used, if any.
    pub fn select_rules(
        &self,
        profile: Option<&str>,
        connected: &[String],
    ) -> Result<Vec<PlacementRule>, ConfigError> {
        let chosen = match profile {
            Some(name) => {
                let p = self.profiles.get(name).ok_or_else(|| {
                    let known: Vec<&str> = self.profiles.keys().map(String::as_str).collect();
                    ConfigError(format!(
                        "unknown profile {:?}; known profiles: [{}]",
                        name,
                        known.join(", ")
                    ))
                })?;
                Some((name, p))
            }
            None => self.detect_profile(connected),
        };

        let mut rules = self.rules.clone();
        match chosen {
            Some((name, p)) => {
                info!("using profile {:?} ({} rule(s))", name, p.rules.len());
                rules.extend(p.rules.iter().cloned());
            }
            None => debug!("no profile selected, using top-level rules only"),
        }
        Ok(rules)
    }

    /// The first profile whose `monitors` equal the connected output names.
    pub fn detect_profile(&self, connected: &[String]) -> Option<(&str, &Profile)> {
        let connected: BTreeSet<&str> = connected.iter().map(String::as_str).collect();
        self.profiles
            .iter()
            .filter(|(_, p)| !p.monitors.is_empty())
            .find(|(_, p)| p.monitors.iter().map(String::as_str).collect::<BTreeSet<_>>() == connected)
            .map(|(name, p)| (name.as_str(), p))
    }
}

/// Resolve the config directory (`$XDG_CONFIG_HOME/adjwin`).
pub fn config_dir() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME").unwrap_or_else(|_| {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        format!("{}/.config", home)
    });
    PathBuf::from(base).join("adjwin")
}

/// Default config file location.
pub fn default_config_path() -> PathBuf {
    config_dir().join("config.json")
}

/// Error from loading, parsing or validating a configuration file.
///
/// Always fatal: no window is touched once this has been returned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("config error: {0}")]
pub struct ConfigError(pub String);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::{Length, MatchMode, MonitorSelector};
    use std::io::Write;

    const FULL: &str = r#"{
        "primary_monitor": 1,
        "retry": { "initial_backoff_ms": 100, "max_backoff_ms": 1000, "deadline_ms": 5000 },
        "rules": [
            {
                "name": "term",
                "match": { "class": "Terminal", "mode": "exact" },
                "geometry": { "x": "0%", "y": "0%", "width": "50%", "height": "50%" },
                "monitor": "primary",
                "priority": 1,
                "expected": true
            }
        ],
        "profiles": {
            "home": {
                "monitors": ["DP-1", "eDP-1"],
                "rules": [
                    {
                        "match": { "title": "Mail" },
                        "geometry": { "x": 0, "y": 0, "width": "100%", "height": "100%" },
                        "monitor": 1,
                        "desktop": 2
                    }
                ]
            },
            "laptop": {
                "monitors": ["eDP-1"],
                "rules": []
            }
        }
    }"#;

    #[test]
    fn deserialize_full_config() {
        let cfg = Config::from_json(FULL).unwrap();
        assert_eq!(cfg.primary_index(), 1);
        assert_eq!(cfg.retry.initial_backoff_ms, 100);
        assert_eq!(cfg.retry.deadline(), Duration::from_secs(5));
        assert_eq!(cfg.rules.len(), 1);
        let rule = &cfg.rules[0];
        assert_eq!(rule.name.as_deref(), Some("term"));
        assert_eq!(rule.matcher.mode, MatchMode::Exact);
        assert_eq!(rule.geometry.width, Length::Percent(50.0));
        assert_eq!(rule.monitor, MonitorSelector::Primary);
        assert!(rule.expected);
        let home = &cfg.profiles["home"];
        assert_eq!(home.rules[0].desktop, Some(2));
        assert_eq!(home.rules[0].monitor, MonitorSelector::Index(1));
    }

    #[test]
    fn deserialize_empty_uses_defaults() {
        let cfg = Config::from_json("{}").unwrap();
        assert_eq!(cfg.retry, RetryConfig::default());
        assert_eq!(cfg.primary_index(), 0);
        assert!(cfg.rules.is_empty());
        assert!(cfg.profiles.is_empty());
    }

    #[test]
    fn deserialize_partial_retry() {
        let cfg = Config::from_json(r#"{ "retry": { "deadline_ms": 1000 } }"#).unwrap();
        assert_eq!(cfg.retry.deadline_ms, 1000);
        assert_eq!(cfg.retry.initial_backoff_ms, 200);
        assert_eq!(cfg.retry.max_backoff_ms, 5000);
    }

    #[test]
    fn unknown_top_level_keys_ignored() {
        let json = r#"{ "rules": [], "future_section": { "key": 42 } }"#;
        assert!(Config::from_json(json).is_ok());
    }

    #[test]
    fn malformed_rule_fails_the_whole_load() {
        let json = r#"{
            "rules": [
                { "match": { "class": "ok" }, "geometry": { "x": 0, "y": 0, "width": 1, "height": 1 } },
                { "match": { "class": "bad" }, "geometry": { "x": "left", "y": 0, "width": 1, "height": 1 } }
            ]
        }"#;
        let err = Config::from_json(json).unwrap_err();
        assert!(err.0.contains("invalid length"), "{}", err);
    }

    #[test]
    fn empty_matcher_is_rejected_with_location() {
        let json = r#"{
            "profiles": { "work": { "rules": [
                { "match": {}, "geometry": { "x": 0, "y": 0, "width": 1, "height": 1 } }
            ] } }
        }"#;
        let err = Config::from_json(json).unwrap_err();
        assert!(err.0.starts_with("profiles.work.rules[0]"), "{}", err);
    }

    #[test]
    fn bad_retry_timings_are_rejected() {
        assert!(Config::from_json(r#"{ "retry": { "initial_backoff_ms": 0 } }"#).is_err());
        let json = r#"{ "retry": { "initial_backoff_ms": 500, "max_backoff_ms": 100 } }"#;
        assert!(Config::from_json(json).is_err());
    }

    #[test]
    fn explicit_profile_appends_rules() {
        let cfg = Config::from_json(FULL).unwrap();
        let rules = cfg.select_rules(Some("home"), &[]).unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].name.as_deref(), Some("term"));
        assert_eq!(rules[1].matcher.title.as_deref(), Some("Mail"));
    }

    #[test]
    fn unknown_profile_lists_known_ones() {
        let cfg = Config::from_json(FULL).unwrap();
        let err = cfg.select_rules(Some("office"), &[]).unwrap_err();
        assert!(err.0.contains("home, laptop"), "{}", err);
    }

    #[test]
    fn profile_detected_from_connected_monitors() {
        let cfg = Config::from_json(FULL).unwrap();
        let connected = vec!["eDP-1".to_string(), "DP-1".to_string()];
        let (name, _) = cfg.detect_profile(&connected).unwrap();
        assert_eq!(name, "home");
        assert_eq!(cfg.select_rules(None, &connected).unwrap().len(), 2);

        let (name, _) = cfg.detect_profile(&["eDP-1".to_string()]).unwrap();
        assert_eq!(name, "laptop");

        assert!(cfg.detect_profile(&["HDMI-A-1".to_string()]).is_none());
        assert_eq!(cfg.select_rules(None, &["HDMI-A-1".to_string()]).unwrap().len(), 1);
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(FULL.as_bytes()).unwrap();
        let cfg = Config::load(file.path()).unwrap();
        assert_eq!(cfg.rules.len(), 1);
    }

    #[test]
    fn load_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(&dir.path().join("nope.json")).unwrap_err();
        assert!(err.0.contains("failed to read"), "{}", err);
    }
}
