// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job kinds and their fixed apt-get argument templates.

use serde::{Deserialize, Serialize};

/// The closed set of operations the core can drive.
///
/// Each kind maps to a fixed apt-get subcommand template; the facade appends
/// the caller's packages and `-o` options per invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Fetch packages into the archive cache without installing.
    Download,
    /// Fetch everything a dist-upgrade would install, without committing.
    PrepareDistUpgrade,
    Install,
    Remove,
    DistUpgrade,
    /// Refresh the package indices (`apt-get update`).
    UpdateSource,
    /// Drop the downloaded archive cache.
    Clean,
    /// Repair a previously classified package-system error.
    FixError,
}

impl JobKind {
    /// The fixed argv prefix for this kind, before per-call packages and
    /// options. `FixError` covers the broken-dependencies repair; the
    /// interrupted-dpkg repair swaps the program entirely and is assembled
    /// by the facade.
    pub fn argv_prefix(&self) -> &'static [&'static str] {
        match self {
            JobKind::Download => &["install", "-d", "-y", "--allow-change-held-packages"],
            JobKind::PrepareDistUpgrade => &[
                "dist-upgrade",
                "-d",
                "-y",
                "--allow-change-held-packages",
                "--allow-downgrades",
            ],
            JobKind::Install => &[
                "install",
                "-y",
                "--allow-change-held-packages",
                "--allow-downgrades",
            ],
            JobKind::Remove => &["autoremove", "-y", "--allow-change-held-packages"],
            JobKind::DistUpgrade => &[
                "dist-upgrade",
                "-y",
                "--allow-change-held-packages",
                "--allow-downgrades",
            ],
            JobKind::UpdateSource => &["update"],
            JobKind::Clean => &["clean"],
            JobKind::FixError => &["install", "--fix-broken", "-y"],
        }
    }

    /// True for kinds that commit changes to the dpkg database and therefore
    /// must hold the dpkg lock and pass the simulate gate first.
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            JobKind::Install | JobKind::Remove | JobKind::DistUpgrade | JobKind::FixError
        )
    }
}

crate::simple_display! {
    JobKind {
        Download => "download",
        PrepareDistUpgrade => "prepare_dist_upgrade",
        Install => "install",
        Remove => "remove",
        DistUpgrade => "dist_upgrade",
        UpdateSource => "update_source",
        Clean => "clean",
        FixError => "fix_error",
    }
}

#[cfg(test)]
#[path = "kind_tests.rs"]
mod tests;
