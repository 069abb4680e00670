//! JSON array documents persisted at a path
//!
//! A `LogDocument` is an append log stored as one JSON array. Records are
//! opaque `serde_json::Value`s: no schema is enforced here, and their key
//! order survives a rewrite.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use serde_json::Value;
use tracing::debug;

use crate::error::StoreError;
use crate::lock::LockToken;

/// Documents keep the 4-space layout the agents have always written
const INDENT: &[u8] = b"    ";

/// An append-only JSON array identified by its path
#[derive(Debug, Clone)]
pub struct LogDocument {
    path: PathBuf,
}

impl LogDocument {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the records, or an empty log when the file is absent or zero bytes.
    ///
    /// Anything else that is not a JSON array is `Malformed` and must not be
    /// treated as empty.
    pub fn load_or_empty(&self, guard: &LockToken) -> Result<Vec<Value>, StoreError> {
        self.check_guard(guard);

        let content = match fs::read(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(document = %self.path.display(), "Document absent, starting empty");
                return Ok(Vec::new());
            }
            Err(e) => return Err(StoreError::io(&self.path, e)),
        };

        if content.is_empty() {
            return Ok(Vec::new());
        }

        match serde_json::from_slice::<Value>(&content) {
            Ok(Value::Array(records)) => Ok(records),
            Ok(other) => Err(StoreError::Malformed {
                path: self.path.clone(),
                reason: format!("top-level {} is not an array", json_kind(&other)),
            }),
            Err(e) => Err(StoreError::Malformed {
                path: self.path.clone(),
                reason: e.to_string(),
            }),
        }
    }

    /// Replace the whole document with `records`.
    ///
    /// Written to a sibling temporary file first and renamed over the
    /// target, so readers see either the old or the new array.
    pub fn save(&self, guard: &LockToken, records: &[Value]) -> Result<(), StoreError> {
        self.check_guard(guard);

        let bytes = encode(records).map_err(|e| StoreError::io(&self.path, e.into()))?;
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let prefix = format!(
            ".{}.",
            self.path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default()
        );

        let mut tmp = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(".tmp")
            .tempfile_in(dir)
            .map_err(|e| StoreError::io(&self.path, e))?;
        tmp.write_all(&bytes)
            .and_then(|()| carry_permissions(&self.path, tmp.as_file()))
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|e| StoreError::io(&self.path, e))?;
        tmp.persist(&self.path)
            .map_err(|e| StoreError::io(&self.path, e.error))?;

        debug!(document = %self.path.display(), records = records.len(), "Document saved");
        Ok(())
    }

    fn check_guard(&self, guard: &LockToken) {
        debug_assert!(
            guard.covers(&self.path),
            "lock for {} used on {}",
            guard.document().display(),
            self.path.display()
        );
    }
}

/// Temporary files are created private; give the rewrite the target's mode
/// (or a shareable default) so other agents can still read it.
#[cfg(unix)]
fn carry_permissions(target: &Path, tmp: &fs::File) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mode = fs::metadata(target)
        .map(|m| m.permissions().mode())
        .unwrap_or(0o644);
    tmp.set_permissions(fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn carry_permissions(target: &Path, tmp: &fs::File) -> io::Result<()> {
    match fs::metadata(target) {
        Ok(meta) => tmp.set_permissions(meta.permissions()),
        Err(_) => Ok(()),
    }
}

fn encode(records: &[Value]) -> serde_json::Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut out, PrettyFormatter::with_indent(INDENT));
    records.serialize(&mut ser)?;
    Ok(out)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::LockManager;
    use serde_json::json;
    use std::time::Duration;

    fn locked(doc: &LogDocument) -> LockToken {
        LockManager::default()
            .acquire(doc.path(), Duration::from_millis(100))
            .unwrap()
    }

    #[test]
    fn test_absent_document_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let doc = LogDocument::new(dir.path().join("absent.json"));
        let guard = locked(&doc);

        assert!(doc.load_or_empty(&guard).unwrap().is_empty());
        assert!(!doc.path().exists());
    }

    #[test]
    fn test_zero_byte_document_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let doc = LogDocument::new(dir.path().join("empty.json"));
        fs::write(doc.path(), b"").unwrap();
        let guard = locked(&doc);

        assert!(doc.load_or_empty(&guard).unwrap().is_empty());
    }

    #[test]
    fn test_non_array_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let doc = LogDocument::new(dir.path().join("object.json"));
        fs::write(doc.path(), br#"{"oops": true}"#).unwrap();
        let guard = locked(&doc);

        let err = doc.load_or_empty(&guard).unwrap_err();
        assert!(err.is_malformed());
        assert!(err.to_string().contains("object"));
    }

    #[test]
    fn test_unparsable_and_whitespace_are_malformed() {
        let dir = tempfile::tempdir().unwrap();
        for (name, content) in [("garbage.json", "[{\"a\": 1},"), ("blank.json", "  \n")] {
            let doc = LogDocument::new(dir.path().join(name));
            fs::write(doc.path(), content).unwrap();
            let guard = locked(&doc);
            assert!(doc.load_or_empty(&guard).unwrap_err().is_malformed(), "{name}");
        }
    }

    #[test]
    fn test_save_writes_indented_array_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let doc = LogDocument::new(dir.path().join("log.json"));
        let guard = locked(&doc);

        let records = vec![json!({"hostname": "pc-01", "uptime_horas": 1.5})];
        doc.save(&guard, &records).unwrap();

        let text = fs::read_to_string(doc.path()).unwrap();
        assert!(text.starts_with("[\n    {\n        \"hostname\""));
        assert_eq!(doc.load_or_empty(&guard).unwrap(), records);

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_existing_key_order_survives_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        let doc = LogDocument::new(dir.path().join("log.json"));
        fs::write(doc.path(), r#"[{"zeta": 1, "alpha": 2}]"#).unwrap();
        let guard = locked(&doc);

        let mut records = doc.load_or_empty(&guard).unwrap();
        records.push(json!({"beta": 3}));
        doc.save(&guard, &records).unwrap();

        let text = fs::read_to_string(doc.path()).unwrap();
        assert!(text.find("zeta").unwrap() < text.find("alpha").unwrap());
    }
}
