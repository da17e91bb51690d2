use std::fs;
use std::path::{Path, PathBuf};

use atlas_core::{random, Error, GroupType, Result};
use serde::Serialize;

const TMP_DIR: &str = "tmp";

/// One service's working directory: a fresh `tmp/<name>-<hex6>` folder
/// populated by overlaying the template tree's three layers in priority
/// order — `global_all`, then `global_proxy`/`global_server`, then the
/// group's own directory — each overwriting files the previous layer
/// placed. Matches `original_source/slave/service.go`'s single-layer
/// `os.CopyFS`, generalised to the layered template directories
/// `original_source/master/template.go` provisions.
pub fn prepare(
    state_dir: &Path,
    template_dir: &Path,
    service_name: &str,
    group_name: &str,
    group_kind: GroupType,
    one_shot_key: &str,
    callback_addr: &str,
) -> Result<PathBuf> {
    let workspace = state_dir.join(TMP_DIR).join(format!("{service_name}-{}", random::hex(3)));
    fs::create_dir_all(&workspace)?;

    let type_layer = match group_kind {
        GroupType::Proxy => "global_proxy",
        GroupType::Server => "global_server",
    };
    for layer in ["global_all", type_layer, group_name] {
        let layer_dir = template_dir.join(layer);
        if layer_dir.is_dir() {
            copy_dir_into(&layer_dir, &workspace)?;
        }
    }

    write_callback_config(&workspace, one_shot_key, callback_addr)?;
    Ok(workspace)
}

fn copy_dir_into(src: &Path, dst: &Path) -> Result<()> {
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
            copy_dir_into(&entry.path(), &target)?;
        } else if file_type.is_file() {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct CallbackConfig<'a> {
    #[serde(rename = "slaveAddr")]
    slave_addr: &'a str,
    #[serde(rename = "slavePort")]
    slave_port: u16,
    key: &'a str,
}

/// Every template gets a `plugins/athena/config.json` telling the child
/// process where to call back and with which one-shot key, so the handshake
/// works the same way regardless of what the child actually is (proxy or
/// game server jar).
fn write_callback_config(workspace: &Path, one_shot_key: &str, callback_addr: &str) -> Result<()> {
    let (slave_addr, slave_port) = callback_addr
        .rsplit_once(':')
        .ok_or_else(|| Error::Validation(format!("callback address '{callback_addr}' is not host:port")))?;
    let slave_port: u16 = slave_port
        .parse()
        .map_err(|_| Error::Validation(format!("callback address '{callback_addr}' has a non-numeric port")))?;

    let config = CallbackConfig { slave_addr, slave_port, key: one_shot_key };
    let raw = serde_json::to_vec_pretty(&config)
        .map_err(|err| Error::Process(format!("failed to encode callback config: {err}")))?;
    let athena_dir = workspace.join("plugins").join("athena");
    fs::create_dir_all(&athena_dir)?;
    fs::write(athena_dir.join("config.json"), raw)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_layers_overwrite_earlier_files() {
        let root = tempfile::tempdir().unwrap();
        let templates = root.path().join("templates");
        fs::create_dir_all(templates.join("global_all")).unwrap();
        fs::write(templates.join("global_all").join("config.txt"), "base").unwrap();
        fs::create_dir_all(templates.join("global_proxy")).unwrap();
        fs::write(templates.join("global_proxy").join("config.txt"), "proxy").unwrap();
        fs::create_dir_all(templates.join("lobby")).unwrap();
        fs::write(templates.join("lobby").join("config.txt"), "lobby").unwrap();

        let workspace = prepare(
            root.path(),
            &templates,
            "lobby-01",
            "lobby",
            GroupType::Proxy,
            "deadbeef",
            "127.0.0.1:9000",
        )
        .unwrap();

        let content = fs::read_to_string(workspace.join("config.txt")).unwrap();
        assert_eq!(content, "lobby");
        assert!(workspace.join("plugins/athena/config.json").exists());
    }

    #[test]
    fn missing_layers_are_skipped() {
        let root = tempfile::tempdir().unwrap();
        let templates = root.path().join("templates");
        fs::create_dir_all(&templates).unwrap();

        let workspace = prepare(
            root.path(),
            &templates,
            "survival-01",
            "survival",
            GroupType::Server,
            "cafef00d",
            "127.0.0.1:9000",
        )
        .unwrap();
        assert!(workspace.is_dir());
    }
}
