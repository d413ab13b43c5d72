use eyre::{Result, WrapErr, eyre};
use regex::Regex;

use crate::utils::config::CanonicalConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Canonical {
    pub url: String,
    pub job_key: Option<String>,
}

/// Rewrites listing URLs into short detail URLs built from the job key alone,
/// skipping the tracking redirects search pages link to.
#[derive(Debug, Clone)]
pub struct Canonicalizer {
    pattern: Regex,
    template: String,
}

impl Canonicalizer {
    pub fn new(config: &CanonicalConfig) -> Result<Self> {
        let pattern = Regex::new(&config.pattern)
            .wrap_err_with(|| format!("invalid canonical pattern {:?}", config.pattern))?;

        if pattern.captures_len() < 2 {
            return Err(eyre!(
                "canonical pattern {:?} needs a capture group for the job key",
                config.pattern
            ));
        }

        Ok(Self {
            pattern,
            template: config.template.clone(),
        })
    }

    pub fn job_key(&self, url: &str) -> Option<String> {
        self.pattern
            .captures(url)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .filter(|key| !key.is_empty())
    }

    /// Never fails: a URL without a recognizable key is used as-is.
    pub fn canonicalize(&self, url: &str) -> Canonical {
        match self.job_key(url) {
            Some(key) => Canonical {
                url: self.template.replace("{id}", &key),
                job_key: Some(key),
            },
            None => Canonical {
                url: url.to_string(),
                job_key: None,
            },
        }
    }
}
