//! Worker configuration.
//!
//! Everything the worker needs to know about a deployment lives in one
//! immutable [`WorkerConfig`] value that is shared by every component.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::SwError;

/// Deployment version, `<major>.<minor>.<build-timestamp>`.
///
/// Ordering is numeric per component, so `2.0.10` sorts after `2.0.9`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BuildVersion {
    pub major: u32,
    pub minor: u32,
    pub build: u64,
}

impl BuildVersion {
    pub const fn new(major: u32, minor: u32, build: u64) -> Self {
        Self {
            major,
            minor,
            build,
        }
    }

    /// Derive a version from a build time.
    pub fn from_timestamp(major: u32, minor: u32, built_at: SystemTime) -> Self {
        let build = built_at
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        Self::new(major, minor, build)
    }
}

impl fmt::Display for BuildVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.build)
    }
}

impl FromStr for BuildVersion {
    type Err = SwError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SwError::Config(format!("invalid version string: {s:?}"));
        let mut parts = s.trim().split('.');
        let major = parts.next().ok_or_else(invalid)?.parse().map_err(|_| invalid())?;
        let minor = parts.next().ok_or_else(invalid)?.parse().map_err(|_| invalid())?;
        let build = parts.next().ok_or_else(invalid)?.parse().map_err(|_| invalid())?;
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(Self::new(major, minor, build))
    }
}

impl TryFrom<String> for BuildVersion {
    type Error = SwError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BuildVersion> for String {
    fn from(version: BuildVersion) -> Self {
        version.to_string()
    }
}

impl Default for BuildVersion {
    fn default() -> Self {
        Self::new(2, 0, 1_736_268_000)
    }
}

/// Pattern tables used by the strategy classifier.
///
/// Each entry is a regular expression tested against the full request URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyRules {
    /// Patterns routed network-first. These win over `cache_first`.
    pub network_first: Vec<String>,
    /// Patterns routed cache-first.
    pub cache_first: Vec<String>,
}

impl Default for StrategyRules {
    fn default() -> Self {
        Self {
            network_first: to_strings(&[
                r"\.html(\?.*)?$",
                r"\.js(\?.*)?$",
                r"\.css(\?.*)?$",
                r"/$",
                r"index\.html",
                r"app\.js",
                r"manifest\.json",
            ]),
            cache_first: to_strings(&[
                r"\.png$",
                r"\.jpg$",
                r"\.jpeg$",
                r"\.gif$",
                r"\.svg$",
                r"\.ico$",
                r"\.woff2?$",
                r"\.ttf$",
                r"fonts\.googleapis\.com",
                r"fonts\.gstatic\.com",
                r"chesspieces",
            ]),
        }
    }
}

/// Worker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Deployment version.
    pub version: BuildVersion,

    /// Ownership prefix for cache generation names.
    pub cache_prefix: String,

    /// Scope the worker controls. Relative manifest entries resolve against it.
    pub scope: String,

    /// Document served to offline navigations with no cache entry of their own.
    pub root_document: String,

    /// Network-first fetch budget in milliseconds.
    pub network_timeout_ms: u64,

    /// Body of the synthesized 503 response.
    pub offline_message: String,

    /// Pre-cached on install; images and fonts.
    pub static_assets: Vec<String>,

    /// Pre-cached on install; application code that changes often.
    pub dynamic_assets: Vec<String>,

    /// Runtime routing tables.
    pub rules: StrategyRules,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        let pieces = ["wP", "wR", "wN", "wB", "wQ", "wK", "bP", "bR", "bN", "bB", "bQ", "bK"];
        let mut static_assets = vec![
            "https://fonts.googleapis.com/css2?family=Crimson+Pro:wght@400;600;700&family=Cinzel:wght@500;700&display=swap".to_string(),
        ];
        static_assets.extend(pieces.iter().map(|piece| {
            format!("https://chessboardjs.com/img/chesspieces/wikipedia/{piece}.png")
        }));

        Self {
            version: BuildVersion::default(),
            cache_prefix: "eltauler".to_string(),
            scope: "https://eltauler.app/".to_string(),
            root_document: "./index.html".to_string(),
            network_timeout_ms: 5000,
            offline_message: "Offline - Contingut no disponible".to_string(),
            static_assets,
            dynamic_assets: to_strings(&[
                "./",
                "./index.html",
                "./app.js",
                "./manifest.json",
                "./stockfish.js",
                "https://cdnjs.cloudflare.com/ajax/libs/chessboard-js/1.0.0/chessboard-1.0.0.min.css",
                "https://code.jquery.com/jquery-3.6.0.min.js",
                "https://cdnjs.cloudflare.com/ajax/libs/chess.js/0.10.3/chess.min.js",
                "https://cdnjs.cloudflare.com/ajax/libs/chessboard-js/1.0.0/chessboard-1.0.0.min.js",
                "https://cdn.jsdelivr.net/npm/chart.js",
            ]),
            rules: StrategyRules::default(),
        }
    }
}

impl WorkerConfig {
    /// Create the default configuration for a given scope.
    pub fn for_scope(scope: &Url) -> Self {
        Self {
            scope: scope.to_string(),
            ..Default::default()
        }
    }

    /// Parse a JSON document. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, SwError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| SwError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SwError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| SwError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json(&json)
    }

    /// Check invariants the rest of the worker relies on.
    pub fn validate(&self) -> Result<(), SwError> {
        if self.cache_prefix.is_empty() {
            return Err(SwError::Config("cache_prefix must not be empty".into()));
        }
        if self.cache_prefix.contains(char::is_whitespace) {
            return Err(SwError::Config(format!(
                "cache_prefix must not contain whitespace: {:?}",
                self.cache_prefix
            )));
        }
        if self.network_timeout_ms == 0 {
            return Err(SwError::Config("network_timeout_ms must be positive".into()));
        }
        self.root_document_url()?;
        Ok(())
    }

    /// Name of the generation this version owns.
    pub fn cache_name(&self) -> String {
        format!("{}-{}", self.cache_prefix, self.version)
    }

    /// Whether a generation name carries our ownership prefix.
    pub fn is_owned(&self, name: &str) -> bool {
        name.strip_prefix(self.cache_prefix.as_str())
            .is_some_and(|rest| rest.starts_with('-'))
    }

    pub fn network_timeout(&self) -> Duration {
        Duration::from_millis(self.network_timeout_ms)
    }

    /// Resolve a manifest entry against the scope.
    pub fn resolve(&self, entry: &str) -> Result<Url, SwError> {
        self.scope_url()?
            .join(entry)
            .map_err(|e| SwError::Config(format!("cannot resolve {entry:?}: {e}")))
    }

    pub fn scope_url(&self) -> Result<Url, SwError> {
        Url::parse(&self.scope)
            .map_err(|e| SwError::Config(format!("invalid scope {:?}: {e}", self.scope)))
    }

    pub fn root_document_url(&self) -> Result<Url, SwError> {
        self.resolve(&self.root_document)
    }

    /// Resolved static manifest. Unresolvable entries are skipped.
    pub fn static_urls(&self) -> Vec<Url> {
        self.resolve_all(&self.static_assets)
    }

    /// Resolved dynamic manifest. Unresolvable entries are skipped.
    pub fn dynamic_urls(&self) -> Vec<Url> {
        self.resolve_all(&self.dynamic_assets)
    }

    fn resolve_all(&self, entries: &[String]) -> Vec<Url> {
        entries
            .iter()
            .filter_map(|entry| match self.resolve(entry) {
                Ok(url) => Some(url),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping manifest entry");
                    None
                }
            })
            .collect()
    }
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
