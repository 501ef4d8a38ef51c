use anyhow::{Context, Result};
use std::path::PathBuf;

const UPLOAD_LIMIT_BYTES: usize = 100 * 1024 * 1024;
const MAX_UPLOAD_FILES: usize = 2;

/// HTTP-side configuration, loaded from environment variables.
///
/// The face swap tool itself is configured separately through
/// [`faceswap_core::ToolConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Bind host (default: 0.0.0.0).
    pub host: String,
    /// Bind port (default: 9001).
    pub port: u16,
    /// Scheme used in result URLs (default: http).
    pub protocol: String,
    /// Host used in result URLs. Falls back to the bind host, or `localhost`
    /// when binding every interface.
    pub public_host: Option<String>,
    /// Where multipart uploads are stored before orchestration.
    pub uploads_dir: PathBuf,
    /// Optional static site served for unmatched routes.
    pub public_dir: Option<PathBuf>,
    /// Source face used by `/api/swap-face-target`.
    pub fixed_source: Option<PathBuf>,
    pub upload_limit_bytes: usize,
    pub max_upload_files: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9001,
            protocol: "http".to_string(),
            public_host: None,
            uploads_dir: PathBuf::from("uploads"),
            public_dir: None,
            fixed_source: None,
            upload_limit_bytes: UPLOAD_LIMIT_BYTES,
            max_upload_files: MAX_UPLOAD_FILES,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let port = match lookup("PORT") {
            Some(raw) => raw
                .trim()
                .parse()
                .with_context(|| format!("invalid PORT: {raw:?}"))?,
            None => defaults.port,
        };

        Ok(Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port,
            protocol: lookup("PROTOCOL").unwrap_or(defaults.protocol),
            public_host: lookup("FACESWAP_PUBLIC_HOST"),
            uploads_dir: lookup("FACESWAP_UPLOADS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.uploads_dir),
            public_dir: lookup("FACESWAP_PUBLIC_DIR").map(PathBuf::from),
            fixed_source: lookup("FACESWAP_FIXED_SOURCE").map(PathBuf::from),
            upload_limit_bytes: defaults.upload_limit_bytes,
            max_upload_files: defaults.max_upload_files,
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Host placed in result URLs.
    pub fn result_host(&self) -> &str {
        match &self.public_host {
            Some(host) => host.as_str(),
            None if self.binds_all_interfaces() => "localhost",
            None => self.host.as_str(),
        }
    }

    /// Result URLs point at `localhost`, so only local clients can follow them.
    pub fn result_urls_are_local_only(&self) -> bool {
        self.public_host.is_none() && self.binds_all_interfaces()
    }

    fn binds_all_interfaces(&self) -> bool {
        self.host == "0.0.0.0"
    }

    /// Public URL of a file in the results directory.
    pub fn result_url(&self, file_name: &str) -> String {
        format!(
            "{}://{}:{}/results/{}",
            self.protocol,
            self.result_host(),
            self.port,
            file_name
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<ServerConfig> {
        let map: HashMap<&str, &str> = pairs.iter().copied().collect();
        ServerConfig::from_lookup(|key| map.get(key).map(|v| v.to_string()))
    }

    #[test]
    fn test_defaults() {
        let config = from_pairs(&[]).unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.bind_addr(), "0.0.0.0:9001");
    }

    #[test]
    fn test_result_url_wildcard_host_uses_localhost() {
        let config = from_pairs(&[]).unwrap();
        assert_eq!(
            config.result_url("result-1.png"),
            "http://localhost:9001/results/result-1.png"
        );
    }

    #[test]
    fn test_local_only_result_urls() {
        assert!(from_pairs(&[]).unwrap().result_urls_are_local_only());
        assert!(!from_pairs(&[("FACESWAP_PUBLIC_HOST", "10.0.0.7")])
            .unwrap()
            .result_urls_are_local_only());

        let bound = from_pairs(&[("HOST", "192.168.1.20")]).unwrap();
        assert!(!bound.result_urls_are_local_only());
        assert_eq!(bound.result_host(), "192.168.1.20");
    }

    #[test]
    fn test_result_url_public_host() {
        let config = from_pairs(&[
            ("HOST", "127.0.0.1"),
            ("PORT", "8080"),
            ("PROTOCOL", "https"),
            ("FACESWAP_PUBLIC_HOST", "swap.example.org"),
        ])
        .unwrap();
        assert_eq!(
            config.result_url("result-2.jpg"),
            "https://swap.example.org:8080/results/result-2.jpg"
        );
    }

    #[test]
    fn test_invalid_port() {
        let err = from_pairs(&[("PORT", "nine")]).unwrap_err();
        assert!(err.to_string().contains("PORT"));
    }
}
