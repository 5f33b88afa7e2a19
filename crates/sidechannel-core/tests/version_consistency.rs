//! Every workspace member inherits the workspace version, and the library's
//! `VERSION` constant agrees with it.

use std::path::{Path, PathBuf};

fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .ancestors()
        .nth(2)
        .unwrap()
        .to_path_buf()
}

fn read_toml(path: &Path) -> toml::Value {
    std::fs::read_to_string(path).unwrap().parse().unwrap()
}

#[test]
fn members_inherit_workspace_version() {
    let root = read_toml(&workspace_root().join("Cargo.toml"));
    let members = root["workspace"]["members"].as_array().unwrap();
    assert!(!members.is_empty());

    for member in members {
        let member = member.as_str().unwrap();
        let manifest = read_toml(&workspace_root().join(member).join("Cargo.toml"));
        let inherits = manifest["package"]["version"]
            .get("workspace")
            .and_then(toml::Value::as_bool);
        assert_eq!(inherits, Some(true), "{member} should use version.workspace = true");
    }
}

#[test]
fn version_constant_matches_workspace() {
    let root = read_toml(&workspace_root().join("Cargo.toml"));
    let ws_version = root["workspace"]["package"]["version"].as_str().unwrap();
    assert_eq!(sidechannel_core::VERSION, ws_version);
}
