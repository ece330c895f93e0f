//! Strategy classification for intercepted requests.

use regex::RegexSet;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::config::StrategyRules;
use crate::SwError;

/// Caching strategy for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Strategy {
    /// Serve from cache, refresh in the background.
    CacheFirst,
    /// Try the network, fall back to cache.
    NetworkFirst,
}

/// Which rule sets a URL matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RuleMatch {
    pub network_first: bool,
    pub cache_first: bool,
}

impl RuleMatch {
    /// Network-first wins ties. Unmatched URLs also go network-first.
    pub fn strategy(self) -> Strategy {
        if self.cache_first && !self.network_first {
            Strategy::CacheFirst
        } else {
            Strategy::NetworkFirst
        }
    }
}

/// Compiled pattern tables.
#[derive(Debug, Clone)]
pub struct Classifier {
    network_first: RegexSet,
    cache_first: RegexSet,
}

impl Classifier {
    /// Compile the rule tables.
    pub fn new(rules: &StrategyRules) -> Result<Self, SwError> {
        let network_first = RegexSet::new(&rules.network_first)
            .map_err(|e| SwError::Config(format!("network_first pattern: {e}")))?;
        let cache_first = RegexSet::new(&rules.cache_first)
            .map_err(|e| SwError::Config(format!("cache_first pattern: {e}")))?;

        Ok(Self {
            network_first,
            cache_first,
        })
    }

    /// Test a URL against both tables independently.
    pub fn matches(&self, url: &str) -> RuleMatch {
        RuleMatch {
            network_first: self.network_first.is_match(url),
            cache_first: self.cache_first.is_match(url),
        }
    }

    /// Pick the strategy for a URL.
    pub fn classify(&self, url: &str) -> Strategy {
        let matched = self.matches(url);
        let strategy = matched.strategy();
        trace!(
            url,
            network_first = matched.network_first,
            cache_first = matched.cache_first,
            ?strategy,
            "Classified request"
        );
        strategy
    }
}
