use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{Read as _, Seek, SeekFrom, Write as _};
use std::path::{Path, PathBuf};

use crate::error::{EngineError, EngineResult};

/// JSON document store with OS-level advisory file locks (flock via `fs2`),
/// shared for reads and exclusive for writes, so an external admin process
/// reading the same files never observes a torn write (spec.md §4.2).
#[derive(Debug, Clone)]
pub struct JsonStore {
    root: PathBuf,
}

impl JsonStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Reads and deserializes `name`. A missing or zero-byte document
    /// returns `default` rather than an error — this is the documented
    /// first-run behaviour, not a fault.
    pub fn read<T: DeserializeOwned>(&self, name: &str, default: T) -> EngineResult<T> {
        let path = self.path(name);
        if !path.exists() {
            return Ok(default);
        }

        let mut file = File::open(&path).map_err(|e| EngineError::StoreWrite(format!("open {name}: {e}")))?;
        file.lock_shared().map_err(|e| EngineError::StoreWrite(format!("lock_shared {name}: {e}")))?;

        let mut contents = String::new();
        let read_result = file.read_to_string(&mut contents);
        let _ = FileExt::unlock(&file);
        read_result.map_err(|e| EngineError::StoreWrite(format!("read {name}: {e}")))?;

        if contents.trim().is_empty() {
            return Ok(default);
        }

        serde_json::from_str(&contents).map_err(|e| EngineError::ParseError(format!("{name}: {e}")))
    }

    /// Serializes `value` and overwrites `name` under an exclusive lock.
    /// Last writer wins at document granularity — no merge semantics.
    pub fn write<T: Serialize>(&self, name: &str, value: &T) -> EngineResult<()> {
        std::fs::create_dir_all(&self.root).map_err(|e| EngineError::StoreWrite(format!("mkdir: {e}")))?;
        let path = self.path(name);

        let mut raw = serde_json::to_value(value).map_err(|e| EngineError::StoreWrite(format!("serialize {name}: {e}")))?;
        sanitize_non_finite(&mut raw);

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| EngineError::StoreWrite(format!("open {name}: {e}")))?;
        file.lock_exclusive().map_err(|e| EngineError::StoreWrite(format!("lock_exclusive {name}: {e}")))?;

        let write_result = (|| -> std::io::Result<()> {
            let mut file = &file;
            file.set_len(0)?;
            file.seek(SeekFrom::Start(0))?;
            serde_json::to_writer_pretty(&mut file, &raw)?;
            file.flush()
        })();
        let _ = FileExt::unlock(&file);
        write_result.map_err(|e| EngineError::StoreWrite(format!("write {name}: {e}")))?;
        Ok(())
    }

    /// Reads `name` then deletes it, returning `None` if it didn't exist.
    /// Used for `manual_override.json`, which an external writer drops and
    /// the engine consumes exactly once.
    pub fn take<T: DeserializeOwned>(&self, name: &str) -> EngineResult<Option<T>> {
        let path = self.path(name);
        if !path.exists() {
            return Ok(None);
        }

        let mut file = File::open(&path).map_err(|e| EngineError::StoreWrite(format!("open {name}: {e}")))?;
        file.lock_exclusive().map_err(|e| EngineError::StoreWrite(format!("lock_exclusive {name}: {e}")))?;
        let mut contents = String::new();
        let read_result = file.read_to_string(&mut contents);
        let _ = FileExt::unlock(&file);
        read_result.map_err(|e| EngineError::StoreWrite(format!("read {name}: {e}")))?;
        drop(file);

        if contents.trim().is_empty() {
            std::fs::remove_file(&path).map_err(|e| EngineError::StoreWrite(format!("remove {name}: {e}")))?;
            return Ok(None);
        }

        let value: T = serde_json::from_str(&contents).map_err(|e| EngineError::ParseError(format!("{name}: {e}")))?;
        std::fs::remove_file(&path).map_err(|e| EngineError::StoreWrite(format!("remove {name}: {e}")))?;
        Ok(Some(value))
    }

    /// Appends one newline-delimited JSON line to `name` under an
    /// exclusive lock (used for `alerts.json`).
    pub fn append_line<T: Serialize>(&self, name: &str, value: &T) -> EngineResult<()> {
        std::fs::create_dir_all(&self.root).map_err(|e| EngineError::StoreWrite(format!("mkdir: {e}")))?;
        let path = self.path(name);

        let mut raw = serde_json::to_value(value).map_err(|e| EngineError::StoreWrite(format!("serialize {name}: {e}")))?;
        sanitize_non_finite(&mut raw);
        let line = serde_json::to_string(&raw).map_err(|e| EngineError::StoreWrite(format!("serialize {name}: {e}")))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| EngineError::StoreWrite(format!("open {name}: {e}")))?;
        file.lock_exclusive().map_err(|e| EngineError::StoreWrite(format!("lock_exclusive {name}: {e}")))?;
        let write_result = writeln!(file, "{line}");
        let _ = FileExt::unlock(&file);
        write_result.map_err(|e| EngineError::StoreWrite(format!("append {name}: {e}")))?;
        Ok(())
    }

    /// Reads `name` as newline-delimited JSON, skipping blank lines.
    pub fn read_lines<T: DeserializeOwned>(&self, name: &str) -> EngineResult<Vec<T>> {
        let path = self.path(name);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let mut file = File::open(&path).map_err(|e| EngineError::StoreWrite(format!("open {name}: {e}")))?;
        file.lock_shared().map_err(|e| EngineError::StoreWrite(format!("lock_shared {name}: {e}")))?;
        let mut contents = String::new();
        let read_result = file.read_to_string(&mut contents);
        let _ = FileExt::unlock(&file);
        read_result.map_err(|e| EngineError::StoreWrite(format!("read {name}: {e}")))?;

        contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(|e| EngineError::ParseError(format!("{name}: {e}"))))
            .collect()
    }
}

/// Replaces non-finite f64 values (NaN, +Inf, -Inf) with `null` so every
/// persisted document is strict JSON, matching spec.md §4.2's contract.
/// `Decimal` fields can never produce these, so this mainly guards any
/// f64-valued metadata that slips into a payload.
fn sanitize_non_finite(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Number(n) => {
            if let Some(f) = n.as_f64() {
                if !f.is_finite() {
                    *value = serde_json::Value::Null;
                }
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                sanitize_non_finite(item);
            }
        }
        serde_json::Value::Object(map) => {
            for (_, v) in map.iter_mut() {
                sanitize_non_finite(v);
            }
        }
        _ => {}
    }
}

pub fn default_store_root() -> PathBuf {
    Path::new("data").to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Doc {
        value: i32,
    }

    #[test]
    fn read_missing_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path());
        let result: Doc = store.read("missing.json", Doc { value: 7 }).unwrap();
        assert_eq!(result, Doc { value: 7 });
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path());
        store.write("doc.json", &Doc { value: 42 }).unwrap();
        let result: Doc = store.read("doc.json", Doc { value: 0 }).unwrap();
        assert_eq!(result, Doc { value: 42 });
    }

    #[test]
    fn zero_byte_file_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("empty.json"), b"").unwrap();
        let store = JsonStore::new(dir.path());
        let result: Doc = store.read("empty.json", Doc { value: 9 }).unwrap();
        assert_eq!(result, Doc { value: 9 });
    }

    #[test]
    fn take_reads_then_deletes() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path());
        store.write("override.json", &Doc { value: 3 }).unwrap();

        let first: Option<Doc> = store.take("override.json").unwrap();
        assert_eq!(first, Some(Doc { value: 3 }));

        let second: Option<Doc> = store.take("override.json").unwrap();
        assert_eq!(second, None);
    }

    #[test]
    fn append_line_accumulates_newline_delimited_json() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path());
        store.append_line("alerts.json", &Doc { value: 1 }).unwrap();
        store.append_line("alerts.json", &Doc { value: 2 }).unwrap();

        let lines: Vec<Doc> = store.read_lines("alerts.json").unwrap();
        assert_eq!(lines, vec![Doc { value: 1 }, Doc { value: 2 }]);
    }
}
