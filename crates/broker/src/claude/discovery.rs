//! LLM-CLI binary discovery.
//!
//! Search order: isolated install dirs, `$PATH`, common system prefixes,
//! then npm prefix discovery. The result is cached for the process
//! lifetime.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::util::expand_tilde;

static CLI_PATH: OnceLock<Option<PathBuf>> = OnceLock::new();

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.is_file()
        && path
            .metadata()
            .map(|m| m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
}

fn search() -> Option<PathBuf> {
    // 1) Isolated installs.
    for candidate in ["~/.tether/bin/claude", "~/.tether/bin/nodejs/bin/claude"] {
        let path = expand_tilde(candidate);
        if is_executable(&path) {
            return Some(path);
        }
    }

    // 2) PATH.
    if let Ok(path_var) = std::env::var("PATH") {
        for dir in std::env::split_paths(&path_var) {
            let candidate = dir.join("claude");
            if is_executable(&candidate) {
                return Some(candidate);
            }
        }
    }

    // 3) Common system locations.
    for candidate in [
        "/usr/local/bin/claude",
        "/opt/homebrew/bin/claude",
        "~/.local/bin/claude",
        "~/bin/claude",
    ] {
        let path = expand_tilde(candidate);
        if is_executable(&path) {
            return Some(path);
        }
    }

    // 4) npm prefix discovery.
    if let Ok(output) = std::process::Command::new("npm")
        .args(["config", "get", "prefix"])
        .output()
    {
        if output.status.success() {
            let prefix = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if !prefix.is_empty() {
                let candidate = PathBuf::from(prefix).join("bin").join("claude");
                if is_executable(&candidate) {
                    return Some(candidate);
                }
            }
        }
    }

    None
}

/// Locate the CLI binary, caching the answer.
pub fn find_cli() -> Option<PathBuf> {
    CLI_PATH
        .get_or_init(|| {
            let found = search();
            match &found {
                Some(path) => tracing::info!(path = %path.display(), "located LLM CLI"),
                None => tracing::warn!("LLM CLI binary not found in any search location"),
            }
            found
        })
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_executable_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("claude");
        std::fs::write(&file, "#!/bin/sh\n").unwrap();
        // Created without exec bits.
        let mut perms = std::fs::metadata(&file).unwrap().permissions();
        use std::os::unix::fs::PermissionsExt;
        perms.set_mode(0o644);
        std::fs::set_permissions(&file, perms).unwrap();
        assert!(!is_executable(&file));
    }

    #[test]
    fn executable_is_accepted() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("claude");
        std::fs::write(&file, "#!/bin/sh\n").unwrap();
        let mut perms = std::fs::metadata(&file).unwrap().permissions();
        use std::os::unix::fs::PermissionsExt;
        perms.set_mode(0o755);
        std::fs::set_permissions(&file, perms).unwrap();
        assert!(is_executable(&file));
    }

    #[test]
    fn missing_file_is_rejected() {
        assert!(!is_executable(Path::new("/nonexistent/claude")));
    }
}
