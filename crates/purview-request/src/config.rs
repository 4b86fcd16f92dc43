//! Application-level proxy trust settings.
//!
//! The facade consults these to decide whether forwarded headers
//! (`X-Forwarded-Host`, `X-Forwarded-Proto`, and the configured
//! forwarded-for header) are honored at all.

use hyper::header::HeaderName;
use serde::{Deserialize, Serialize};
use std::path::Path;

fn default_proxy_ip_header() -> String {
    "x-forwarded-for".to_string()
}

fn default_subdomain_offset() -> usize {
    2
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProxyConfig {
    /// Trust forwarded headers. When false, `X-Forwarded-*` is ignored
    /// entirely and host/proto/ip fall back to the transport facts.
    #[serde(default)]
    pub proxy: bool,

    /// Header carrying the client IP chain (client first, each proxy
    /// appended downstream).
    #[serde(default = "default_proxy_ip_header")]
    pub proxy_ip_header: String,

    /// Keep only the last N entries of the IP chain (closest to the
    /// server). 0 means unlimited.
    #[serde(default)]
    pub max_ips_count: usize,

    /// Number of trailing hostname parts that make up the registered
    /// domain. `tobi.ferrets.example.com` with offset 2 yields subdomains
    /// `["ferrets", "tobi"]`.
    #[serde(default = "default_subdomain_offset")]
    pub subdomain_offset: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            proxy: false,
            proxy_ip_header: default_proxy_ip_header(),
            max_ips_count: 0,
            subdomain_offset: default_subdomain_offset(),
        }
    }
}

impl ProxyConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, anyhow::Error> {
        let contents = std::fs::read_to_string(path)?;
        let config: ProxyConfig = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.proxy_ip_header.parse::<HeaderName>().is_err() {
            anyhow::bail!(
                "'{}' is not a valid header name for proxy_ip_header",
                self.proxy_ip_header
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ProxyConfig::default();
        assert!(!config.proxy);
        assert_eq!(config.proxy_ip_header, "x-forwarded-for");
        assert_eq!(config.max_ips_count, 0);
        assert_eq!(config.subdomain_offset, 2);
    }

    #[test]
    fn test_yaml_partial_fields() {
        let config: ProxyConfig = serde_yaml::from_str("proxy: true\nmax_ips_count: 2\n").unwrap();
        assert!(config.proxy);
        assert_eq!(config.max_ips_count, 2);
        // Unspecified fields keep their defaults
        assert_eq!(config.proxy_ip_header, "x-forwarded-for");
        assert_eq!(config.subdomain_offset, 2);
    }

    #[test]
    fn test_validate_rejects_bad_header_name() {
        let config = ProxyConfig {
            proxy_ip_header: "not a header\n".to_string(),
            ..ProxyConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_accepts_custom_header() {
        let config = ProxyConfig {
            proxy_ip_header: "cf-connecting-ip".to_string(),
            ..ProxyConfig::default()
        };
        assert!(config.validate().is_ok());
    }
}
