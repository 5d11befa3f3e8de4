//! Trace extraction strategies
//!
//! Each strategy implements [`SignalExtractor`]: the centroid baseline and the
//! dynamic-programming tracer. The registry holds one configured instance of
//! each so the server can pick a strategy per request.

pub mod naive;
pub mod viterbi;

pub use naive::NaiveExtractor;
pub use viterbi::ViterbiExtractor;

use crate::config::ExtractionConfig;
use crate::error::DigitizeError;
use crate::extractor::SignalExtractor;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

/// Selectable extraction strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionMethod {
    Naive,
    #[default]
    Viterbi,
}

impl ExtractionMethod {
    pub const ALL: [ExtractionMethod; 2] = [ExtractionMethod::Naive, ExtractionMethod::Viterbi];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Naive => "naive",
            Self::Viterbi => "viterbi",
        }
    }

    /// Build the extractor for this method
    pub fn build(&self, config: &ExtractionConfig) -> Arc<dyn SignalExtractor> {
        match self {
            Self::Naive => Arc::new(NaiveExtractor::new()),
            Self::Viterbi => Arc::new(ViterbiExtractor::new(config.viterbi.clone())),
        }
    }
}

impl FromStr for ExtractionMethod {
    type Err = DigitizeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "naive" => Ok(Self::Naive),
            "viterbi" => Ok(Self::Viterbi),
            _ => Err(DigitizeError::invalid_parameter("method", s)),
        }
    }
}

impl std::fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Information about an available extractor
#[derive(Debug, Clone, Serialize)]
pub struct ExtractorInfo {
    pub name: &'static str,
    pub description: &'static str,
}

/// Registry of configured extractors
pub struct ExtractorRegistry {
    extractors: Vec<Arc<dyn SignalExtractor>>,
    default_method: ExtractionMethod,
}

impl ExtractorRegistry {
    pub fn new(config: &ExtractionConfig) -> Self {
        let extractors = ExtractionMethod::ALL
            .iter()
            .map(|method| {
                tracing::debug!(method = %method, "Registering extractor");
                method.build(config)
            })
            .collect();

        Self {
            extractors,
            default_method: config.method,
        }
    }

    /// Get an extractor by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn SignalExtractor>> {
        self.extractors.iter().find(|e| e.name() == name).cloned()
    }

    /// Get the configured default extractor
    pub fn default(&self) -> Option<Arc<dyn SignalExtractor>> {
        self.get(self.default_method.as_str())
    }

    pub fn default_name(&self) -> &'static str {
        self.default_method.as_str()
    }

    /// List all extractor names
    pub fn list(&self) -> Vec<&'static str> {
        self.extractors.iter().map(|e| e.name()).collect()
    }

    pub fn info(&self) -> Vec<ExtractorInfo> {
        self.extractors
            .iter()
            .map(|e| ExtractorInfo {
                name: e.name(),
                description: e.description(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_parsing() {
        assert_eq!("naive".parse::<ExtractionMethod>().unwrap(), ExtractionMethod::Naive);
        assert_eq!("Viterbi".parse::<ExtractionMethod>().unwrap(), ExtractionMethod::Viterbi);
        assert!("hough".parse::<ExtractionMethod>().is_err());
        assert_eq!(ExtractionMethod::default(), ExtractionMethod::Viterbi);
    }

    #[test]
    fn test_registry_lookup() {
        let registry = ExtractorRegistry::new(&ExtractionConfig::default());

        assert_eq!(registry.list(), vec!["naive", "viterbi"]);
        assert_eq!(registry.default().unwrap().name(), "viterbi");
        assert_eq!(registry.get("naive").unwrap().name(), "naive");
        assert!(registry.get("unknown").is_none());
        assert_eq!(registry.info().len(), 2);
    }

    #[test]
    fn test_registry_default_follows_config() {
        let config = ExtractionConfig {
            method: ExtractionMethod::Naive,
            ..ExtractionConfig::default()
        };
        let registry = ExtractorRegistry::new(&config);
        assert_eq!(registry.default_name(), "naive");
    }
}
