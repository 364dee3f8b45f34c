use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::runner::state::SuiteResult;

pub const FILE_NAME: &str = "results.json";

/// Write the pretty-printed suite result into `output_dir`
pub fn write_report(result: &SuiteResult, output_dir: &Path) -> Result<PathBuf> {
    let json = serde_json::to_string_pretty(result)?;
    let path = output_dir.join(FILE_NAME);
    std::fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    log::info!("JSON report saved to: {}", path.display());
    Ok(path)
}
