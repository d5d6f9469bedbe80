//! Keyword routing from a free-text query to a service domain.

use sidekick_config::{DomainConfig, DomainRoute};

#[derive(Debug, Clone)]
pub struct DomainRouter {
    routes: Vec<DomainRoute>,
    default_domain: String,
}

impl Default for DomainRouter {
    fn default() -> Self {
        Self::from_config(&DomainConfig::default())
    }
}

impl DomainRouter {
    pub fn from_config(config: &DomainConfig) -> Self {
        let routes = config
            .routes
            .iter()
            .map(|r| DomainRoute {
                domain: r.domain.clone(),
                keywords: r
                    .keywords
                    .iter()
                    .map(|k| k.to_lowercase())
                    .filter(|k| !k.is_empty())
                    .collect(),
            })
            .collect();
        Self {
            routes,
            default_domain: config.default_domain.clone(),
        }
    }

    /// The first route with a keyword in the query wins.
    pub fn route(&self, query: &str) -> &str {
        let lowered = query.to_lowercase();
        self.routes
            .iter()
            .find(|r| r.keywords.iter().any(|k| lowered.contains(k.as_str())))
            .map(|r| r.domain.as_str())
            .unwrap_or(&self.default_domain)
    }
}
