//! Atomic JSON persistence: write to `<path>.tmp`, fsync, rename over
//! `<path>`. Readers either see the old file or the new one, never a
//! partial write.

use std::fs;
use std::io::Write;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::error::Result;

/// Serialize `value` as pretty JSON and atomically replace `path`.
///
/// Parent directories are created as needed.
pub fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let tmp = path.with_extension("tmp");
    let data = serde_json::to_vec_pretty(value)?;
    {
        let mut f = fs::File::create(&tmp)?;
        f.write_all(&data)?;
        f.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Load JSON state from `path`, falling back to `T::default()` when the
/// file is missing or malformed. A malformed file is logged and treated
/// as empty; the next save overwrites it.
pub fn load_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    match fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str(&content) {
            Ok(value) => value,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "malformed state file, starting empty");
                T::default()
            }
        },
        Err(_) => T::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn write_then_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let mut map = HashMap::new();
        map.insert("a".to_string(), 1u64);
        atomic_write_json(&path, &map).unwrap();

        let loaded: HashMap<String, u64> = load_json_or_default(&path);
        assert_eq!(loaded, map);
    }

    #[test]
    fn no_tmp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        atomic_write_json(&path, &vec![1, 2, 3]).unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub/dir/state.json");
        atomic_write_json(&path, &42u32).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn missing_file_loads_default() {
        let dir = tempfile::tempdir().unwrap();
        let loaded: HashMap<String, u64> = load_json_or_default(&dir.path().join("nope.json"));
        assert!(loaded.is_empty());
    }

    #[test]
    fn corrupted_file_loads_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, "not valid json{{{").unwrap();
        let loaded: HashMap<String, u64> = load_json_or_default(&path);
        assert!(loaded.is_empty());
    }
}
