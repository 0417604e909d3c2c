use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use teamsync::operator::{ConnectionManager, DataOperator, OperatorConfig};

/// Get path to a test fixture in tests/fixtures/
pub fn fixture_path(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

/// Load a JSON fixture from tests/fixtures/
pub fn load_fixture(name: &str) -> Value {
    let path = fixture_path(name);
    let content = fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("Failed to load fixture {}: {}", name, e));
    serde_json::from_str(&content)
        .unwrap_or_else(|e| panic!("Invalid JSON in fixture {}: {}", name, e))
}

/// Payloads of one section of the sync snapshot fixture
pub fn snapshot_section(section: &str) -> Vec<Value> {
    load_fixture("sync_snapshot.json")[section]
        .as_array()
        .cloned()
        .unwrap_or_default()
}

/// Operator over a fresh in-memory namespace
pub fn memory_operator(config: OperatorConfig) -> (ConnectionManager, DataOperator) {
    let config = OperatorConfig {
        backend: teamsync::operator::Backend::Memory,
        ..config
    };
    let manager = ConnectionManager::new(config.clone());
    let handle = manager
        .open("integration", &config.registry())
        .expect("open in-memory namespace");
    let op = DataOperator::new(handle, &config);
    (manager, op)
}
