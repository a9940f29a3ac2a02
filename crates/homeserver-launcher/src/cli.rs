// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Command line flags.

use clap::Parser;

use crate::orchestrator::Directives;

/// Rebuild, rotate and restart the homeserver and its registration companion.
///
/// Every run recreates the homeserver container and makes sure the
/// companion is serving, whatever flags are given.
#[derive(Parser, Debug, Clone, Default, PartialEq, Eq)]
#[command(name = "homeserver-launcher", version)]
pub struct Cli {
    /// Generate a new registration token before recreating the container
    #[arg(short = 't', long)]
    pub rotate_token: bool,

    /// Inject a one-time admin password into the new container
    #[arg(short = 'e', long)]
    pub emergency_access: bool,

    /// Pull and rebuild the homeserver image first
    #[arg(short = 'r', long)]
    pub rebuild: bool,

    /// Kill and restart the companion even if it is already serving
    #[arg(short = 'f', long)]
    pub force_companion: bool,
}

impl Cli {
    /// Directives for one invocation.
    pub fn directives(&self) -> Directives {
        Directives {
            rebuild: self.rebuild,
            rotate_token: self.rotate_token,
            emergency_access: self.emergency_access,
            force_companion: self.force_companion,
        }
    }
}
