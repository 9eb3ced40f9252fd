//! Package inventory and package-manager actions.
//!
//! The system package manager is detected at runtime (a machine fleet
//! is rarely homogeneous); unknown platforms degrade to an empty
//! inventory rather than erroring.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tokio::process::Command;
use tracing::debug;

use fleet_shared::packages::PackageInfo;

const LIST_TIMEOUT: Duration = Duration::from_secs(30);
const ACTION_TIMEOUT: Duration = Duration::from_secs(120);
const UPDATE_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Manager {
    Apt,
    Dnf,
    Yum,
    Pacman,
    Brew,
    Winget,
}

/// Detects the first available package manager for this platform.
pub async fn detect_manager() -> Option<Manager> {
    #[cfg(target_os = "linux")]
    {
        for (binary, manager) in [
            ("apt-get", Manager::Apt),
            ("dnf", Manager::Dnf),
            ("yum", Manager::Yum),
            ("pacman", Manager::Pacman),
        ] {
            if command_exists(binary).await {
                return Some(manager);
            }
        }
        None
    }
    #[cfg(target_os = "macos")]
    {
        if command_exists("brew").await {
            Some(Manager::Brew)
        } else {
            None
        }
    }
    #[cfg(target_os = "windows")]
    {
        if command_exists("winget").await {
            Some(Manager::Winget)
        } else {
            None
        }
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        None
    }
}

#[cfg(unix)]
async fn command_exists(binary: &str) -> bool {
    Command::new("which")
        .arg(binary)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|status| status.success())
        .unwrap_or(false)
}

#[cfg(windows)]
async fn command_exists(binary: &str) -> bool {
    Command::new("where")
        .arg(binary)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|status| status.success())
        .unwrap_or(false)
}

/// Current inventory, parsed from the manager's list output. Machines
/// without a supported manager report an empty list.
pub async fn list_installed() -> Vec<PackageInfo> {
    let Some(manager) = detect_manager().await else {
        debug!("no supported package manager found");
        return Vec::new();
    };

    let (program, args): (&str, &[&str]) = match manager {
        Manager::Apt => ("dpkg-query", &["-W", "-f=${Package}\t${Version}\n"]),
        Manager::Dnf | Manager::Yum => ("rpm", &["-qa", "--queryformat", "%{NAME}\t%{VERSION}\n"]),
        Manager::Pacman => ("pacman", &["-Q"]),
        Manager::Brew => ("brew", &["list", "--versions"]),
        Manager::Winget => ("winget", &["list"]),
    };

    match run_capture(program, args, LIST_TIMEOUT).await {
        Ok(stdout) => parse_package_list(&stdout),
        Err(e) => {
            debug!(error = %e, "package listing failed");
            Vec::new()
        }
    }
}

pub async fn install(package_name: &str) -> Result<String> {
    let manager = detect_manager()
        .await
        .context("No supported package manager found")?;
    let command: Vec<String> = match manager {
        Manager::Apt => vec!["apt-get".into(), "install".into(), "-y".into(), package_name.into()],
        Manager::Dnf => vec!["dnf".into(), "install".into(), "-y".into(), package_name.into()],
        Manager::Yum => vec!["yum".into(), "install".into(), "-y".into(), package_name.into()],
        Manager::Pacman => vec![
            "pacman".into(),
            "-S".into(),
            "--noconfirm".into(),
            package_name.into(),
        ],
        Manager::Brew => vec!["brew".into(), "install".into(), package_name.into()],
        Manager::Winget => vec![
            "winget".into(),
            "install".into(),
            package_name.into(),
            "--accept-package-agreements".into(),
            "--accept-source-agreements".into(),
        ],
    };
    run_action(&command, ACTION_TIMEOUT).await
}

pub async fn uninstall(package_name: &str) -> Result<String> {
    let manager = detect_manager()
        .await
        .context("No supported package manager found")?;
    let command: Vec<String> = match manager {
        Manager::Apt => vec!["apt-get".into(), "remove".into(), "-y".into(), package_name.into()],
        Manager::Dnf => vec!["dnf".into(), "remove".into(), "-y".into(), package_name.into()],
        Manager::Yum => vec!["yum".into(), "remove".into(), "-y".into(), package_name.into()],
        Manager::Pacman => vec![
            "pacman".into(),
            "-R".into(),
            "--noconfirm".into(),
            package_name.into(),
        ],
        Manager::Brew => vec!["brew".into(), "uninstall".into(), package_name.into()],
        Manager::Winget => vec!["winget".into(), "uninstall".into(), package_name.into()],
    };
    run_action(&command, ACTION_TIMEOUT).await
}

pub async fn update_all() -> Result<String> {
    let manager = detect_manager()
        .await
        .context("No supported package manager found")?;
    let command: Vec<String> = match manager {
        Manager::Apt => vec!["apt-get".into(), "upgrade".into(), "-y".into()],
        Manager::Dnf => vec!["dnf".into(), "update".into(), "-y".into()],
        Manager::Yum => vec!["yum".into(), "update".into(), "-y".into()],
        Manager::Pacman => vec!["pacman".into(), "-Syu".into(), "--noconfirm".into()],
        Manager::Brew => vec!["brew".into(), "upgrade".into()],
        Manager::Winget => vec!["winget".into(), "upgrade".into(), "--all".into()],
    };
    run_action(&command, UPDATE_TIMEOUT).await
}

async fn run_action(command: &[String], timeout: Duration) -> Result<String> {
    let (program, args) = command
        .split_first()
        .context("empty package manager command")?;
    let output = tokio::time::timeout(
        timeout,
        Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output(),
    )
    .await
    .with_context(|| format!("{program} timed out"))?
    .with_context(|| format!("Failed to run {program}"))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("{program} failed: {}", stderr.trim());
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

async fn run_capture(program: &str, args: &[&str], timeout: Duration) -> Result<String> {
    let output = tokio::time::timeout(
        timeout,
        Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output(),
    )
    .await
    .with_context(|| format!("{program} timed out"))?
    .with_context(|| format!("Failed to run {program}"))?;

    if !output.status.success() {
        bail!("{program} exited with {}", output.status);
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Parses `name<ws>version` rows. Blank lines and rows without a
/// version column are tolerated; single-column rows report an unknown
/// version.
pub fn parse_package_list(output: &str) -> Vec<PackageInfo> {
    let mut packages = Vec::new();
    for line in output.lines() {
        let mut parts = line.split_whitespace();
        let Some(name) = parts.next() else { continue };
        let version = parts.next().unwrap_or("unknown");
        packages.push(PackageInfo {
            name: name.to_string(),
            version: version.to_string(),
            installed: true,
        });
    }
    packages
}
