// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[yare::parameterized(
    download     = { JobKind::Download,           false },
    prepare      = { JobKind::PrepareDistUpgrade, false },
    install      = { JobKind::Install,            true },
    remove       = { JobKind::Remove,             true },
    dist_upgrade = { JobKind::DistUpgrade,        true },
    update       = { JobKind::UpdateSource,       false },
    clean        = { JobKind::Clean,              false },
    fix_error    = { JobKind::FixError,           true },
)]
fn mutating_kinds(kind: JobKind, expected: bool) {
    assert_eq!(kind.is_mutating(), expected);
}

#[test]
fn argv_prefix_subcommands() {
    assert_eq!(JobKind::UpdateSource.argv_prefix(), &["update"]);
    assert_eq!(JobKind::Clean.argv_prefix(), &["clean"]);
    assert_eq!(JobKind::Install.argv_prefix()[0], "install");
    assert_eq!(JobKind::Remove.argv_prefix()[0], "autoremove");
    assert_eq!(JobKind::DistUpgrade.argv_prefix()[0], "dist-upgrade");
}

#[test]
fn download_kinds_never_commit() {
    // Download templates carry -d so apt-get stops after fetching.
    assert!(JobKind::Download.argv_prefix().contains(&"-d"));
    assert!(JobKind::PrepareDistUpgrade.argv_prefix().contains(&"-d"));
}

#[test]
fn wire_strings() {
    assert_eq!(JobKind::PrepareDistUpgrade.to_string(), "prepare_dist_upgrade");
    assert_eq!(
        serde_json::to_string(&JobKind::UpdateSource).unwrap(),
        "\"update_source\""
    );
    let parsed: JobKind = serde_json::from_str("\"fix_error\"").unwrap();
    assert_eq!(parsed, JobKind::FixError);
}
