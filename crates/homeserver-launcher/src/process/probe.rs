// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Port and process liveness probes.
//!
//! [`ProcFsProbe`] answers "who is listening on this port" from the kernel's
//! socket tables under `/proc/net` and maps socket inodes back to processes
//! through `/proc/<pid>/fd`. Sockets owned by processes the launcher may not
//! inspect still count as bound, they just have no known holder.

use async_trait::async_trait;
use nix::sys::signal;
use nix::unistd::Pid;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;

/// TCP state code for LISTEN in `/proc/net/tcp`.
const TCP_LISTEN: &str = "0A";

/// Answers port and process liveness questions.
#[async_trait]
pub trait PortProbe: Send + Sync {
    /// Whether any socket is listening on `port`.
    async fn is_bound(&self, port: u16) -> bool;

    /// Processes holding a listening socket on `port`, as far as visible.
    async fn holders(&self, port: u16) -> Vec<u32>;

    /// Whether a process with this PID exists.
    fn pid_alive(&self, pid: u32) -> bool;
}

/// Linux `/proc` based probe.
#[derive(Debug, Clone)]
pub struct ProcFsProbe {
    root: PathBuf,
}

impl Default for ProcFsProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcFsProbe {
    /// Probe the live `/proc`.
    pub fn new() -> Self {
        Self::with_root("/proc")
    }

    /// Probe a `/proc`-shaped tree rooted elsewhere.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn listen_inodes(&self, port: u16) -> HashSet<u64> {
        ["net/tcp", "net/tcp6"]
            .iter()
            .filter_map(|table| std::fs::read_to_string(self.root.join(table)).ok())
            .flat_map(|contents| parse_listen_inodes(&contents, port))
            .collect()
    }

    fn pids_owning(&self, inodes: &HashSet<u64>) -> Vec<u32> {
        let Ok(entries) = std::fs::read_dir(&self.root) else {
            return Vec::new();
        };

        let mut pids: Vec<u32> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().to_str()?.parse::<u32>().ok())
            .filter(|pid| owns_any(&self.root.join(pid.to_string()).join("fd"), inodes))
            .collect();
        pids.sort_unstable();
        pids
    }
}

#[async_trait]
impl PortProbe for ProcFsProbe {
    async fn is_bound(&self, port: u16) -> bool {
        !self.listen_inodes(port).is_empty()
    }

    async fn holders(&self, port: u16) -> Vec<u32> {
        let inodes = self.listen_inodes(port);
        if inodes.is_empty() {
            return Vec::new();
        }
        let pids = self.pids_owning(&inodes);
        if pids.is_empty() {
            debug!(port, "Port is bound but no visible process holds it");
        }
        pids
    }

    fn pid_alive(&self, pid: u32) -> bool {
        process_exists_in(&self.root, pid)
    }
}

/// Whether `pid` names a live process. Zombies hold no sockets and count as dead.
pub(crate) fn process_exists(pid: u32) -> bool {
    process_exists_in(Path::new("/proc"), pid)
}

/// [`process_exists`], reading process state from a `/proc`-shaped tree at `root`.
fn process_exists_in(root: &Path, pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    match signal::kill(Pid::from_raw(raw), None) {
        Ok(()) => !is_zombie(root, pid),
        Err(nix::errno::Errno::ESRCH) => false,
        // EPERM: exists, owned by someone else.
        Err(_) => true,
    }
}

fn is_zombie(root: &Path, pid: u32) -> bool {
    let Ok(stat) = std::fs::read_to_string(root.join(pid.to_string()).join("stat")) else {
        return false;
    };
    // The command name is parenthesised and may contain spaces.
    stat.rsplit_once(')')
        .and_then(|(_, rest)| rest.split_whitespace().next())
        .is_some_and(|state| state == "Z")
}

fn owns_any(fd_dir: &Path, inodes: &HashSet<u64>) -> bool {
    let Ok(fds) = std::fs::read_dir(fd_dir) else {
        return false;
    };
    fds.filter_map(|fd| fd.ok())
        .filter_map(|fd| std::fs::read_link(fd.path()).ok())
        .filter_map(|target| socket_inode(&target.to_string_lossy()))
        .any(|inode| inodes.contains(&inode))
}

/// Inode from an fd link target of the form `socket:[12345]`.
fn socket_inode(target: &str) -> Option<u64> {
    target
        .strip_prefix("socket:[")?
        .strip_suffix(']')?
        .parse()
        .ok()
}

/// Inodes of sockets in LISTEN state on `port`, from a `/proc/net/tcp{,6}` table.
pub(crate) fn parse_listen_inodes(contents: &str, port: u16) -> Vec<u64> {
    contents
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let local = fields.get(1)?;
            let state = fields.get(3)?;
            let inode = fields.get(9)?;

            let (_, hex_port) = local.rsplit_once(':')?;
            let local_port = u16::from_str_radix(hex_port, 16).ok()?;
            if local_port != port || *state != TCP_LISTEN {
                return None;
            }
            inode.parse::<u64>().ok().filter(|inode| *inode != 0)
        })
        .collect()
}
