//! Provider configuration
//!
//! Values come from the provider block and fall back to the usual
//! `OVH_*` environment variables.

use crate::schema::Diagnostic;
use serde::{Deserialize, Serialize};

pub const ENV_ENDPOINT: &str = "OVH_ENDPOINT";
pub const ENV_APPLICATION_KEY: &str = "OVH_APPLICATION_KEY";
pub const ENV_APPLICATION_SECRET: &str = "OVH_APPLICATION_SECRET";
pub const ENV_CONSUMER_KEY: &str = "OVH_CONSUMER_KEY";

/// Known API endpoint aliases
const ENDPOINTS: &[(&str, &str)] = &[
    ("ovh-eu", "https://eu.api.ovh.com/1.0"),
    ("ovh-ca", "https://ca.api.ovh.com/1.0"),
    ("ovh-us", "https://api.us.ovhcloud.com/1.0"),
    ("kimsufi-eu", "https://eu.api.kimsufi.com/1.0"),
    ("kimsufi-ca", "https://ca.api.kimsufi.com/1.0"),
    ("soyoustart-eu", "https://eu.api.soyoustart.com/1.0"),
    ("soyoustart-ca", "https://ca.api.soyoustart.com/1.0"),
];

/// Provider block as sent by Terraform
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub endpoint: Option<String>,
    pub application_key: Option<String>,
    pub application_secret: Option<String>,
    pub consumer_key: Option<String>,
}

/// Fully resolved credentials used to build a client
#[derive(Debug, Clone, PartialEq)]
pub struct Credentials {
    pub base_url: String,
    pub application_key: String,
    pub application_secret: String,
    pub consumer_key: String,
}

impl ProviderConfig {
    /// Fill unset fields from the process environment.
    pub fn with_env_defaults(self) -> Self {
        self.with_defaults_from(|key| std::env::var(key).ok())
    }

    /// Fill unset fields using `lookup`; explicit values always win.
    pub fn with_defaults_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let fill = |field: &mut Option<String>, key: &str| {
            if field.as_deref().map_or(true, str::is_empty) {
                *field = lookup(key).filter(|v| !v.is_empty());
            }
        };

        fill(&mut self.endpoint, ENV_ENDPOINT);
        fill(&mut self.application_key, ENV_APPLICATION_KEY);
        fill(&mut self.application_secret, ENV_APPLICATION_SECRET);
        fill(&mut self.consumer_key, ENV_CONSUMER_KEY);
        self
    }

    /// Resolve into credentials, reporting every missing or invalid field.
    pub fn resolve(&self) -> Result<Credentials, Vec<Diagnostic>> {
        let mut diagnostics = Vec::new();

        let mut require = |value: &Option<String>, name: &str, env: &str| -> String {
            match value.as_deref().filter(|v| !v.is_empty()) {
                Some(v) => v.to_string(),
                None => {
                    diagnostics.push(
                        Diagnostic::error(&format!("{} is required", name))
                            .with_detail(&format!(
                                "Set \"{}\" in the provider block or the {} environment variable",
                                name, env
                            ))
                            .with_attribute(vec![name.to_string()]),
                    );
                    String::new()
                }
            }
        };

        let endpoint = require(&self.endpoint, "endpoint", ENV_ENDPOINT);
        let application_key = require(&self.application_key, "application_key", ENV_APPLICATION_KEY);
        let application_secret =
            require(&self.application_secret, "application_secret", ENV_APPLICATION_SECRET);
        let consumer_key = require(&self.consumer_key, "consumer_key", ENV_CONSUMER_KEY);

        let base_url = if endpoint.is_empty() {
            None
        } else {
            let resolved = resolve_endpoint(&endpoint);
            if resolved.is_none() {
                diagnostics.push(
                    Diagnostic::error(&format!("Unknown endpoint \"{}\"", endpoint))
                        .with_detail(&format!(
                            "Use one of {} or a full http(s):// URL",
                            ENDPOINTS
                                .iter()
                                .map(|(alias, _)| *alias)
                                .collect::<Vec<_>>()
                                .join(", ")
                        ))
                        .with_attribute(vec!["endpoint".to_string()]),
                );
            }
            resolved
        };

        match base_url {
            Some(base_url) if diagnostics.is_empty() => Ok(Credentials {
                base_url,
                application_key,
                application_secret,
                consumer_key,
            }),
            _ => Err(diagnostics),
        }
    }
}

/// Map an endpoint alias or URL to an API base URL.
pub fn resolve_endpoint(endpoint: &str) -> Option<String> {
    if endpoint.starts_with("https://") || endpoint.starts_with("http://") {
        return Some(endpoint.trim_end_matches('/').to_string());
    }

    ENDPOINTS
        .iter()
        .find(|(alias, _)| *alias == endpoint)
        .map(|(_, url)| url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn full_config() -> ProviderConfig {
        ProviderConfig {
            endpoint: Some("ovh-eu".to_string()),
            application_key: Some("ak".to_string()),
            application_secret: Some("as".to_string()),
            consumer_key: Some("ck".to_string()),
        }
    }

    #[test]
    fn test_resolve_endpoint_aliases() {
        assert_eq!(
            resolve_endpoint("ovh-ca").as_deref(),
            Some("https://ca.api.ovh.com/1.0")
        );
        assert_eq!(
            resolve_endpoint("http://127.0.0.1:9000/").as_deref(),
            Some("http://127.0.0.1:9000")
        );
        assert_eq!(resolve_endpoint("ovh-mars"), None);
    }

    #[test]
    fn test_resolve_full_config() {
        let creds = full_config().resolve().unwrap();
        assert_eq!(creds.base_url, "https://eu.api.ovh.com/1.0");
        assert_eq!(creds.consumer_key, "ck");
    }

    #[test]
    fn test_resolve_reports_each_missing_field() {
        let config = ProviderConfig {
            endpoint: Some("ovh-eu".to_string()),
            ..Default::default()
        };
        let diags = config.resolve().unwrap_err();

        assert_eq!(diags.len(), 3);
        assert!(diags.iter().any(|d| d.summary == "application_secret is required"));
    }

    #[test]
    fn test_resolve_unknown_endpoint() {
        let config = ProviderConfig {
            endpoint: Some("nowhere".to_string()),
            ..full_config()
        };
        let diags = config.resolve().unwrap_err();

        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].attribute, Some(vec!["endpoint".to_string()]));
    }

    #[test]
    fn test_env_defaults_do_not_override_explicit_values() {
        let env: HashMap<&str, &str> = [
            (ENV_ENDPOINT, "ovh-us"),
            (ENV_CONSUMER_KEY, "env-ck"),
            (ENV_APPLICATION_SECRET, "env-as"),
        ]
        .into_iter()
        .collect();

        let config = ProviderConfig {
            endpoint: Some("ovh-ca".to_string()),
            application_key: Some("ak".to_string()),
            application_secret: Some(String::new()),
            consumer_key: None,
        }
        .with_defaults_from(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.endpoint.as_deref(), Some("ovh-ca"));
        assert_eq!(config.application_secret.as_deref(), Some("env-as"));
        assert_eq!(config.consumer_key.as_deref(), Some("env-ck"));
    }
}
