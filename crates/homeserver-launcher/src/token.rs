// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Registration token rotation.
//!
//! The token is a short, human-relayed invitation gate for new accounts, not
//! an account secret, so a few random bytes are enough. It is persisted as
//! lowercase hex with no trailing newline: the homeserver and the companion
//! both read the file as an exact-byte secret.

use rand::RngCore;
use rand::rngs::OsRng;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::TokenConfig;
use crate::error::{Error, Result};
use crate::persist::write_atomic;

/// A registration token and where it lives.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    bytes: Vec<u8>,
    hex: String,
    path: PathBuf,
}

impl Credential {
    /// Hex form, exactly as persisted.
    pub fn as_str(&self) -> &str {
        &self.hex
    }

    /// Raw random bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// File the credential is persisted in.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("len", &self.bytes.len())
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Generates and persists the registration token.
pub struct TokenManager {
    config: TokenConfig,
}

impl TokenManager {
    /// Create a token manager.
    pub fn new(config: TokenConfig) -> Self {
        Self { config }
    }

    /// Generate a fresh token and replace the persisted one.
    ///
    /// The file is either fully replaced or left as it was.
    pub fn rotate(&self) -> Result<Credential> {
        let mut bytes = vec![0u8; self.config.byte_len];
        OsRng.fill_bytes(&mut bytes);
        let hex = hex::encode(&bytes);

        let path = &self.config.path;
        write_atomic(path, hex.as_bytes(), 0o644).map_err(|e| Error::persistence(path, e))?;

        // Read back so a silently truncated write cannot go unnoticed.
        let persisted = fs::read(path).map_err(|e| Error::persistence(path, e))?;
        if persisted != hex.as_bytes() {
            return Err(Error::persistence(
                path,
                io::Error::other("persisted token does not match generated token"),
            ));
        }

        info!(path = %path.display(), bytes = bytes.len(), "Registration token rotated");
        Ok(Credential {
            bytes,
            hex,
            path: path.clone(),
        })
    }

    /// Read the currently persisted token, if any.
    pub fn current(&self) -> Result<Option<Credential>> {
        let path = &self.config.path;
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::Io(e)),
        };

        let hex = raw.trim();
        if hex.len() != raw.len() {
            warn!(path = %path.display(), "Registration token file has surrounding whitespace");
        }
        let bytes = hex::decode(hex).map_err(|e| Error::ConfigInvalid {
            path: path.clone(),
            reason: format!("token is not hex: {}", e),
        })?;
        if bytes.is_empty() {
            return Ok(None);
        }

        Ok(Some(Credential {
            bytes,
            hex: hex.to_string(),
            path: path.clone(),
        }))
    }

    /// Return the persisted token, generating one if none exists yet.
    pub fn ensure(&self) -> Result<Credential> {
        match self.current()? {
            Some(credential) => Ok(credential),
            None => {
                info!(path = %self.config.path.display(), "No registration token found, generating one");
                self.rotate()
            }
        }
    }
}
