//! Session persistence (`§4.7`, `§6.5`).
//!
//! Out of scope for the core engine proper, but its on-disk contract
//! touches the core closely enough (the contract hash) that it lives
//! here as a small standalone module rather than as a separate crate.

use crate::prelude::*;

use compact_str::CompactString;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// Written into every session file; forward-compat handling of older
/// schema versions is the caller's responsibility, not this module's.
pub const SCHEMA_VERSION: &str = "jstree-session-v1";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionFile {
  pub schema_version: CompactString,
  pub contract_hash: CompactString,
  pub data: JsonValue,
}

/// One entry in a contract: a blackboard key plus its optional schema
/// tag, hashed together with every other entry to fingerprint what a
/// session expects a resumed tree to provide.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct ContractEntry {
  pub key: CompactString,
  pub schema: Option<CompactString>,
}

/// SHA-256 over a JCS-like canonicalized, lexicographically sorted JSON
/// array of `{key, schema?}` entries (`§6.5`). Entries at their default
/// (`schema: None`) still participate via their key; canonicalization is
/// implemented directly rather than pulling in a JCS crate: sort object
/// keys recursively and serialize with no inter-token whitespace.
pub fn contract_hash(entries: &[ContractEntry]) -> String {
  let mut sorted = entries.to_vec();
  sorted.sort();

  let array: Vec<JsonValue> = sorted
    .iter()
    .map(|e| {
      let mut obj = serde_json::Map::new();
      obj.insert("key".to_string(), JsonValue::String(e.key.to_string()));
      if let Some(schema) = &e.schema {
        obj.insert("schema".to_string(), JsonValue::String(schema.to_string()));
      }
      JsonValue::Object(obj)
    })
    .collect();

  let canonical = canonicalize(&JsonValue::Array(array));
  let mut hasher = Sha256::new();
  hasher.update(canonical.as_bytes());
  hex::encode(hasher.finalize())
}

/// Recursively sorts object keys and serializes with no inter-token
/// whitespace; numbers/strings/arrays pass through `serde_json`'s own
/// (already canonical for our purposes) formatting unchanged.
fn canonicalize(value: &JsonValue) -> String {
  match value {
    JsonValue::Object(map) => {
      let mut keys: Vec<&String> = map.keys().collect();
      keys.sort();
      let parts: Vec<String> = keys
        .into_iter()
        .map(|k| format!("{}:{}", serde_json::to_string(k).unwrap(), canonicalize(&map[k])))
        .collect();
      format!("{{{}}}", parts.join(","))
    }
    JsonValue::Array(items) => {
      let parts: Vec<String> = items.iter().map(canonicalize).collect();
      format!("[{}]", parts.join(","))
    }
    other => serde_json::to_string(other).unwrap(),
  }
}

/// Holds the session's lock file open for the backend's lifetime;
/// releases the advisory exclusive lock on `Drop`. The lock file itself
/// is left on disk — only the lock is released, matching typical
/// pidfile-adjacent conventions.
pub struct SessionLock {
  _file: File,
  path: PathBuf,
}

impl SessionLock {
  pub fn acquire(session_dir: &Path, session_id: &str) -> io::Result<Self> {
    fs::create_dir_all(session_dir)?;
    let path = session_dir.join(format!("{session_id}.lock"));
    let file = OpenOptions::new()
      .create(true)
      .write(true)
      .truncate(false)
      .open(&path)?;
    file.try_lock_exclusive().map_err(|e| {
      io::Error::new(
        io::ErrorKind::WouldBlock,
        format!("session {session_id} already locked: {e}"),
      )
    })?;
    Ok(SessionLock { _file: file, path })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }
}

impl Drop for SessionLock {
  fn drop(&mut self) {
    let _ = fs2::FileExt::unlock(&self._file);
  }
}

fn session_file_path(session_dir: &Path, session_id: &str) -> PathBuf {
  session_dir.join(format!("{session_id}.json"))
}

/// Writes `session` atomically: serialize to a sibling temp file, then
/// rename over the final path so a reader never observes a partial
/// write, mirroring the config/session conventions used elsewhere in
/// the ambient stack.
pub fn write_session(session_dir: &Path, session_id: &str, session: &SessionFile) -> io::Result<()> {
  fs::create_dir_all(session_dir)?;
  let final_path = session_file_path(session_dir, session_id);
  let tmp_path = session_dir.join(format!("{session_id}.json.tmp"));

  let body = serde_json::to_vec_pretty(session)?;
  fs::write(&tmp_path, &body)?;
  fs::rename(&tmp_path, &final_path)?;
  Ok(())
}

pub fn read_session(session_dir: &Path, session_id: &str) -> io::Result<SessionFile> {
  let path = session_file_path(session_dir, session_id);
  let body = fs::read_to_string(path)?;
  serde_json::from_str(&body).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::tempdir;

  #[test]
  fn contract_hash_is_order_independent() {
    let a = vec![
      ContractEntry { key: "b".into(), schema: None },
      ContractEntry { key: "a".into(), schema: Some("str".into()) },
    ];
    let b = vec![
      ContractEntry { key: "a".into(), schema: Some("str".into()) },
      ContractEntry { key: "b".into(), schema: None },
    ];
    assert_eq!(contract_hash(&a), contract_hash(&b));
  }

  #[test]
  fn contract_hash_changes_with_schema() {
    let a = vec![ContractEntry { key: "a".into(), schema: Some("str".into()) }];
    let b = vec![ContractEntry { key: "a".into(), schema: Some("num".into()) }];
    assert_ne!(contract_hash(&a), contract_hash(&b));
  }

  #[test]
  fn write_then_read_round_trips() {
    let dir = tempdir().unwrap();
    let session = SessionFile {
      schema_version: SCHEMA_VERSION.into(),
      contract_hash: "deadbeef".into(),
      data: serde_json::json!({ "k": 1 }),
    };
    write_session(dir.path(), "sess-1", &session).unwrap();
    let read_back = read_session(dir.path(), "sess-1").unwrap();
    assert_eq!(session, read_back);
  }

  #[test]
  fn lock_rejects_second_acquisition() {
    let dir = tempdir().unwrap();
    let first = SessionLock::acquire(dir.path(), "sess-2").unwrap();
    let second = SessionLock::acquire(dir.path(), "sess-2");
    assert!(second.is_err());
    drop(first);
    assert!(SessionLock::acquire(dir.path(), "sess-2").is_ok());
  }
}
