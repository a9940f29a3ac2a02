// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Homeserver environment file.
//!
//! Line-oriented `KEY=value`. Blank lines and `#` comments are ignored, keys
//! and values are trimmed, and a value wrapped in matching quotes is
//! unquoted. No variable expansion is performed: values such as passwords
//! are forwarded byte for byte.

use std::path::Path;
use tracing::debug;

use crate::error::{Error, Result};

/// Ordered key/value pairs read from an env file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvConfig {
    entries: Vec<(String, String)>,
}

impl EnvConfig {
    /// Read and parse an env file. A missing file is [`Error::ConfigMissing`].
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Ok(Self::parse(&contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::ConfigMissing(path.to_path_buf()))
            }
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Parse env file contents.
    ///
    /// A key that appears twice keeps its first position and its last value.
    pub fn parse(contents: &str) -> Self {
        let mut entries: Vec<(String, String)> = Vec::new();

        for (lineno, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                debug!(line = lineno + 1, "Skipping env line without '='");
                continue;
            };
            let key = key.trim();
            if key.is_empty() {
                debug!(line = lineno + 1, "Skipping env line with empty key");
                continue;
            }
            let value = unquote(value.trim());

            match entries.iter_mut().find(|(k, _)| k == key) {
                Some(entry) => entry.1 = value.to_string(),
                None => entries.push((key.to_string(), value.to_string())),
            }
        }

        Self { entries }
    }

    /// Pairs whose key starts with one of `prefixes`, in file order.
    pub fn filtered(&self, prefixes: &[String]) -> Vec<(String, String)> {
        self.entries
            .iter()
            .filter(|(key, _)| prefixes.iter().any(|p| key.starts_with(p.as_str())))
            .cloned()
            .collect()
    }

    /// Value for `key`, if present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the file held no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn prefixes() -> Vec<String> {
        vec!["CONDUWUIT_".to_string()]
    }

    #[test]
    fn test_parse_skips_comments_and_blanks() {
        let env = EnvConfig::parse(
            "# homeserver\n\n   # indented comment\nCONDUWUIT_SERVER_NAME=example.org\n",
        );
        assert_eq!(env.len(), 1);
        assert_eq!(env.get("CONDUWUIT_SERVER_NAME"), Some("example.org"));
    }

    #[test]
    fn test_parse_trims_keys_and_values() {
        let env = EnvConfig::parse("  CONDUWUIT_PORT =   8008  \n");
        assert_eq!(env.get("CONDUWUIT_PORT"), Some("8008"));
    }

    #[test]
    fn test_parse_unquotes_matching_quotes_only() {
        let env = EnvConfig::parse(
            "A=\"double\"\nB='single'\nC=\"mismatched'\nD=\"\nE=a=b\n",
        );
        assert_eq!(env.get("A"), Some("double"));
        assert_eq!(env.get("B"), Some("single"));
        assert_eq!(env.get("C"), Some("\"mismatched'"));
        assert_eq!(env.get("D"), Some("\""));
        assert_eq!(env.get("E"), Some("a=b"));
    }

    #[test]
    fn test_parse_skips_malformed_lines() {
        let env = EnvConfig::parse("garbage\n=novalue\nCONDUWUIT_OK=1\n");
        assert_eq!(env.len(), 1);
    }

    #[test]
    fn test_duplicate_key_keeps_position_takes_last_value() {
        let env = EnvConfig::parse("CONDUWUIT_A=1\nCONDUWUIT_B=2\nCONDUWUIT_A=3\n");
        assert_eq!(
            env.filtered(&prefixes()),
            vec![
                ("CONDUWUIT_A".to_string(), "3".to_string()),
                ("CONDUWUIT_B".to_string(), "2".to_string()),
            ]
        );
    }

    #[test]
    fn test_filtered_drops_keys_outside_allowlist() {
        let env = EnvConfig::parse(
            "CONDUWUIT_SERVER_NAME=example.org\nPATH=/usr/bin\nconduwuit_lower=x\nSECRET=1\n",
        );
        let filtered = env.filtered(&prefixes());
        assert_eq!(
            filtered,
            vec![(
                "CONDUWUIT_SERVER_NAME".to_string(),
                "example.org".to_string()
            )]
        );
    }

    #[test]
    fn test_load_missing_file_is_config_missing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".env");
        assert!(matches!(
            EnvConfig::load(&path).unwrap_err(),
            Error::ConfigMissing(p) if p == path
        ));
    }
}
