// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Read-only dpkg/apt queries.
//!
//! Everything here runs simulations or database reads: the installed
//! status/version table, Debian version comparison, and the parsed output
//! of `apt-get … -s` plans used to resolve what an update would actually
//! touch.

use crate::classify::classify;
use crate::config::AptConfig;
use crate::error::Error;
use crate::source::SourceScope;
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::LazyLock;

const ADDITIONAL_INSTALL_MARK: &str = "The following additional packages will be installed:";
const UPGRADE_MARK: &str = "The following packages will be upgraded:";
const NEW_INSTALL_MARK: &str = "The following NEW packages will be installed:";

static INST_WITH_OLD_VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Inst (\S+) \[[^\]]*\] \(([^ ]+) .*\)").expect("constant regex pattern is valid")
});
static INST_PLAIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Inst (\S+) \(([^ ]+) .*\)").expect("constant regex pattern is valid")
});

/// One row of the dpkg status database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkgStatusVersion {
    /// dpkg status abbreviation, e.g. `ii` or `rc`.
    pub status: String,
    pub version: String,
}

/// A package name/version pair resolved from a simulated install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageInfo {
    pub name: String,
    pub version: String,
}

/// Load the installed status and version of every package via dpkg-query.
pub async fn installed_versions(
    cfg: &AptConfig,
) -> Result<HashMap<String, PkgStatusVersion>, Error> {
    let output = tokio::process::Command::new(&cfg.dpkg_query)
        .args(["-f", "${Package} ${db:Status-Abbrev} ${Version}\n", "-W"])
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|source| Error::Spawn {
            program: cfg.dpkg_query.display().to_string(),
            source,
        })?;
    if !output.status.success() {
        return Err(Error::Pkg(upkeepd_core::SystemError::Unknown {
            detail: String::from_utf8_lossy(&output.stderr).into_owned(),
        }));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut table = HashMap::new();
    for line in stdout.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let &[package, status, version] = fields.as_slice() else {
            continue;
        };
        table.insert(
            package.to_string(),
            PkgStatusVersion { status: status.to_string(), version: version.to_string() },
        );
    }
    Ok(table)
}

/// True when Debian version `a` is greater than or equal to `b`,
/// per `dpkg --compare-versions`.
pub async fn compare_versions_ge(cfg: &AptConfig, a: &str, b: &str) -> Result<bool, Error> {
    let status = tokio::process::Command::new(&cfg.dpkg)
        .args(["--compare-versions", "--", a, "ge", b])
        .stdin(Stdio::null())
        .status()
        .await
        .map_err(|source| Error::Spawn {
            program: cfg.dpkg.display().to_string(),
            source,
        })?;
    Ok(status.success())
}

/// Parse the indented package list apt-get prints after `title`.
///
/// Lines belong to the list while they start with a space; each whitespace
/// field is a package name, with any `:arch` suffix stripped.
pub fn parse_show_list(stdout: &str, title: &str) -> Vec<String> {
    let mut packages = Vec::new();
    let mut inside = false;
    for line in stdout.lines() {
        if line.trim() == title.trim() {
            inside = true;
            continue;
        }
        if !inside {
            continue;
        }
        if !line.starts_with(' ') {
            break;
        }
        for field in line.split_whitespace() {
            packages.push(field.split(':').next().unwrap_or(field).to_string());
        }
    }
    packages
}

fn simulate_args(cfg: &AptConfig, subcommand: &[&str]) -> Vec<String> {
    let mut args = Vec::new();
    if let Some(conf) = &cfg.apt_conf {
        args.push("-c".to_string());
        args.push(conf.display().to_string());
    }
    args.extend(subcommand.iter().map(|s| s.to_string()));
    args.push("-o".to_string());
    args.push("Debug::NoLocking=1".to_string());
    args
}

async fn run_apt(cfg: &AptConfig, args: &[String]) -> Result<std::process::Output, Error> {
    tokio::process::Command::new(&cfg.apt_get)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|source| Error::Spawn {
            program: cfg.apt_get.display().to_string(),
            source,
        })
}

/// The additional packages a simulated install of `packages` would pull in.
///
/// The exit code is ignored: the simulation may exit non-zero by design.
/// When the plan shows no additional-install section, the captured output
/// is classified instead; a classified error is returned, otherwise the
/// list is simply empty.
pub async fn list_install_packages(
    cfg: &AptConfig,
    packages: &[String],
) -> Result<Vec<String>, Error> {
    let mut args = simulate_args(cfg, &["install", "-s"]);
    args.extend(packages.iter().cloned());
    let output = run_apt(cfg, &args).await?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    if stdout.contains(ADDITIONAL_INSTALL_MARK) {
        return Ok(parse_show_list(&stdout, ADDITIONAL_INSTALL_MARK));
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    match classify(&stdout, &stderr) {
        Some(err) => Err(Error::Pkg(err)),
        None => Ok(Vec::new()),
    }
}

/// The packages a dist-upgrade against `source_path` would upgrade or
/// newly install. Arch suffixes are stripped.
pub async fn list_dist_upgrade_packages(
    cfg: &AptConfig,
    source_path: &Path,
    options: &[(String, String)],
) -> Result<Vec<String>, Error> {
    let scope = SourceScope::unmanaged(source_path);
    let mut args = simulate_args(cfg, &["dist-upgrade", "--assume-no"]);
    for (key, value) in options.iter().chain(scope.options()?.iter()) {
        args.push("-o".to_string());
        args.push(format!("{key}={value}"));
    }
    // --assume-no makes the exit code meaningless; only the output counts
    let output = run_apt(cfg, &args).await?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    if stdout.contains(UPGRADE_MARK) || stdout.contains(NEW_INSTALL_MARK) {
        let mut packages = parse_show_list(&stdout, UPGRADE_MARK);
        packages.extend(parse_show_list(&stdout, NEW_INSTALL_MARK));
        return Ok(packages);
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    match classify(&stdout, &stderr) {
        Some(err) => Err(Error::Pkg(err)),
        None => Ok(Vec::new()),
    }
}

/// Resolve the exact versions a simulated install would put on the system,
/// from the plan's `Inst` lines.
pub async fn emulate_install_versions(
    cfg: &AptConfig,
    packages: &[String],
    options: &[(String, String)],
) -> Result<HashMap<String, PackageInfo>, Error> {
    let mut args = simulate_args(cfg, &["install", "-s"]);
    for (key, value) in options {
        args.push("-o".to_string());
        args.push(format!("{key}={value}"));
    }
    args.extend(packages.iter().cloned());
    let output = run_apt(cfg, &args).await?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !output.status.success() {
        tracing::warn!(stderr = %stderr, "emulated install failed");
        return match classify(&stdout, &stderr) {
            Some(err) => Err(Error::Pkg(err)),
            None => Err(Error::Pkg(upkeepd_core::SystemError::Unknown {
                detail: format!("apt-get install -s exited with {}", output.status),
            })),
        };
    }

    let mut resolved = HashMap::new();
    if stdout.contains(UPGRADE_MARK) || stdout.contains(NEW_INSTALL_MARK) {
        for line in stdout.lines() {
            let captures = INST_WITH_OLD_VERSION
                .captures(line)
                .or_else(|| INST_PLAIN.captures(line));
            if let Some(captures) = captures {
                let name = captures[1].to_string();
                let version = captures[2].to_string();
                resolved.insert(name.clone(), PackageInfo { name, version });
            }
        }
    }
    Ok(resolved)
}

#[cfg(test)]
#[path = "query_tests.rs"]
mod tests;
