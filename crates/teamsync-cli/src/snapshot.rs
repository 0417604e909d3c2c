//! Reading raw payload files and sync snapshots from disk

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde_json::Value;
use teamsync_schema::RecordType;
use walkdir::WalkDir;

/// Payloads in a file holding one JSON object or an array of them
pub fn read_payloads(path: &Path) -> Result<Vec<Value>> {
    let value = read_json(path)?;
    match value {
        Value::Array(items) => Ok(items),
        Value::Object(_) => Ok(vec![value]),
        _ => bail!("{}: expected a JSON object or array", path.display()),
    }
}

/// A snapshot file: `{"Team": [...], "TeamMembership": [...]}`
///
/// Sections come back parents first, so teams are committed before the
/// records that reference them.
pub fn read_snapshot(path: &Path) -> Result<Vec<(RecordType, Vec<Value>)>> {
    let Value::Object(sections) = read_json(path)? else {
        bail!("{}: snapshot must be a JSON object keyed by record type", path.display());
    };

    let mut out = Vec::new();
    for (name, payloads) in sections {
        let record_type: RecordType = name
            .parse()
            .with_context(|| format!("{}: unknown section", path.display()))?;
        let Value::Array(items) = payloads else {
            bail!("{}: section {} must be an array", path.display(), name);
        };
        out.push((record_type, items));
    }
    out.sort_by_key(|(record_type, _)| *record_type);
    Ok(out)
}

/// All `*.json` files below `dir`, sorted by path
pub fn snapshot_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("json"))
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}

fn read_json(path: &Path) -> Result<Value> {
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("invalid JSON in {}", path.display()))
}
