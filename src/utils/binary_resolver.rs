use anyhow::Result;
use std::path::{Path, PathBuf};

/// Environment variable naming an explicit adb binary
pub const ADB_ENV: &str = "LUMI_ADB";

fn executable(name: &str) -> String {
    if cfg!(windows) {
        format!("{}.exe", name)
    } else {
        name.to_string()
    }
}

/// Locations checked before falling back to the system PATH
fn candidate_paths(name: &str) -> Vec<PathBuf> {
    let file = executable(name);
    let mut candidates = Vec::new();

    // Android SDK installs: $ANDROID_HOME/platform-tools/adb
    for var in ["ANDROID_HOME", "ANDROID_SDK_ROOT"] {
        if let Some(sdk) = std::env::var_os(var) {
            candidates.push(Path::new(&sdk).join("platform-tools").join(&file));
        }
    }

    // Private install directory: ~/.lumi/platform-tools/adb
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(".lumi").join("platform-tools").join(&file));
    }

    candidates
}

/// Find a binary in the SDK or install directories, then on the PATH
pub fn find_binary(name: &str) -> Result<PathBuf> {
    let candidates = candidate_paths(name);
    if let Some(path) = candidates.iter().find(|p| p.exists()) {
        log::debug!("Resolved {} to {}", name, path.display());
        return Ok(path.clone());
    }

    if let Ok(path) = which::which(executable(name)) {
        return Ok(path);
    }

    let checked: Vec<String> = candidates.iter().map(|p| p.display().to_string()).collect();
    Err(anyhow::anyhow!(
        "Could not find binary '{}'. Checked paths:\n{}\nand the system PATH",
        name,
        checked.join("\n")
    ))
}

/// Find the adb binary, honouring `LUMI_ADB` when set
pub fn find_adb() -> Result<PathBuf> {
    if let Some(explicit) = std::env::var_os(ADB_ENV) {
        let path = PathBuf::from(explicit);
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!("{} points to a missing file: {}", ADB_ENV, path.display());
    }
    find_binary("adb")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_binary_lists_checked_paths() {
        let err = find_binary("lumi-no-such-binary").unwrap_err().to_string();
        assert!(err.contains("lumi-no-such-binary"));
        assert!(err.contains("system PATH"));
    }

    #[test]
    fn test_install_dir_is_a_candidate() {
        let candidates = candidate_paths("adb");
        if let Some(home) = dirs::home_dir() {
            assert!(candidates.iter().any(|p| p.starts_with(home.join(".lumi"))));
        }
    }
}
