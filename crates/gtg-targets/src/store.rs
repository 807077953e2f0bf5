// store.rs — TargetStore: crash-safe persistence for the target list.
//
// All targets live in a single JSON file:
//
//   {
//     "targets": {
//       "-1001234": { "registered_at": "...", "kind": "group", "title": "Friends" }
//     },
//     "last_updated": "..."
//   }
//
// Every mutation rewrites the whole file through a temp file + rename, so a
// crash mid-write leaves either the old file or the new one, never a torn
// mix. Mutations are serialized by one lock held across modify → write →
// commit; the in-memory view only changes once the write has succeeded.
//
// Reads are forgiving: a missing file is an empty registry, a corrupt file
// is an empty registry plus a warning, and a single bad record is skipped.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tempfile::NamedTempFile;

use crate::error::TargetError;
use crate::target::{Target, TargetKind};

/// The full registry contents at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetSnapshot {
    /// Targets keyed by id.
    pub targets: BTreeMap<String, Target>,

    /// Time of the last successful write. Never moves backwards.
    pub last_updated: Option<DateTime<Utc>>,
}

impl TargetSnapshot {
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// On-disk shape of one target. The id is the map key.
#[derive(Serialize, Deserialize)]
struct TargetRecord {
    registered_at: DateTime<Utc>,
    kind: TargetKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    title: Option<String>,
}

#[derive(Serialize)]
struct TargetFile {
    targets: BTreeMap<String, TargetRecord>,
    last_updated: Option<DateTime<Utc>>,
}

/// Persistent store for notification targets.
pub struct TargetStore {
    path: PathBuf,
    state: Mutex<TargetSnapshot>,
}

impl TargetStore {
    /// Open the store backed by `path`, loading whatever is on disk.
    ///
    /// Never fails: see [`TargetStore::load`].
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let snapshot = Self::load(&path);
        tracing::info!(
            path = %path.display(),
            targets = snapshot.len(),
            "loaded target list"
        );
        Self {
            path,
            state: Mutex::new(snapshot),
        }
    }

    /// Read a target list from disk.
    ///
    /// A missing file yields an empty snapshot. An unreadable or corrupt
    /// file also yields an empty snapshot, with a warning logged; the file
    /// itself is left alone until the next successful write replaces it.
    pub fn load(path: &Path) -> TargetSnapshot {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return TargetSnapshot::default(),
            Err(e) => {
                tracing::warn!(path = %path.display(), "unreadable target list, starting empty: {}", e);
                return TargetSnapshot::default();
            }
        };

        match serde_json::from_str::<Value>(&content) {
            Ok(value) => parse_snapshot(path, &value),
            Err(e) => {
                tracing::warn!(path = %path.display(), "corrupted target list, starting empty: {}", e);
                TargetSnapshot::default()
            }
        }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A copy of the current contents.
    pub fn snapshot(&self) -> TargetSnapshot {
        self.lock().clone()
    }

    pub fn get(&self, id: &str) -> Option<Target> {
        self.lock().targets.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().targets.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Replace the whole target list and write it durably.
    pub fn save(&self, snapshot: TargetSnapshot) -> Result<(), TargetError> {
        self.mutate(move |state| {
            *state = snapshot;
            ((), true)
        })
    }

    /// Register a target. Returns `false` (and writes nothing) if the id is
    /// already present.
    pub fn add(
        &self,
        id: &str,
        kind: TargetKind,
        title: Option<String>,
    ) -> Result<bool, TargetError> {
        self.mutate(|state| {
            if state.targets.contains_key(id) {
                return (false, false);
            }
            let target = Target::new(id, kind).with_title(title);
            state.targets.insert(id.to_string(), target);
            (true, true)
        })
    }

    /// Remove a target. Returns `false` (and writes nothing) if absent.
    pub fn remove(&self, id: &str) -> Result<bool, TargetError> {
        self.mutate(|state| {
            let removed = state.targets.remove(id).is_some();
            (removed, removed)
        })
    }

    /// Remove every listed id with a single write. Returns how many were
    /// actually removed; unknown ids are ignored.
    pub fn prune(&self, ids: &HashSet<String>) -> Result<usize, TargetError> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.mutate(|state| {
            let before = state.targets.len();
            state.targets.retain(|id, _| !ids.contains(id));
            let removed = before - state.targets.len();
            (removed, removed > 0)
        })
    }

    /// Apply `op` to a copy of the state; if it reports a change, write the
    /// copy to disk and only then make it current.
    fn mutate<T>(
        &self,
        op: impl FnOnce(&mut TargetSnapshot) -> (T, bool),
    ) -> Result<T, TargetError> {
        let mut state = self.lock();
        let mut next = state.clone();
        let (result, changed) = op(&mut next);
        if !changed {
            return Ok(result);
        }

        let now = Utc::now();
        next.last_updated = Some(match state.last_updated {
            Some(prev) if prev > now => prev,
            _ => now,
        });

        write_atomic(&self.path, &next)?;
        *state = next;
        Ok(result)
    }

    fn lock(&self) -> MutexGuard<'_, TargetSnapshot> {
        // A panic while holding the lock cannot leave a half-applied
        // mutation behind (state is only swapped after a full write).
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Write `snapshot` to `path` via a sibling temp file and an atomic rename.
fn write_atomic(path: &Path, snapshot: &TargetSnapshot) -> Result<(), TargetError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| TargetError::io(parent, e))?;
    }

    let file = TargetFile {
        targets: snapshot
            .targets
            .iter()
            .map(|(id, t)| {
                (
                    id.clone(),
                    TargetRecord {
                        registered_at: t.registered_at,
                        kind: t.kind,
                        title: t.title.clone(),
                    },
                )
            })
            .collect(),
        last_updated: snapshot.last_updated,
    };
    let json = serde_json::to_string_pretty(&file)?;

    // The temp file lives next to the target so the rename stays on one
    // filesystem. It is removed automatically if anything below fails.
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut temp = NamedTempFile::new_in(dir).map_err(|e| TargetError::io(dir, e))?;
    temp.write_all(json.as_bytes())
        .and_then(|_| temp.as_file().sync_all())
        .map_err(|e| TargetError::io(temp.path(), e))?;
    temp.persist(path).map_err(|e| TargetError::io(path, e.error))?;
    Ok(())
}

fn parse_snapshot(path: &Path, value: &Value) -> TargetSnapshot {
    let last_updated = value.get("last_updated").and_then(parse_timestamp);

    if let Some(records) = value.get("targets").and_then(Value::as_object) {
        let mut targets = BTreeMap::new();
        for (id, raw) in records {
            match serde_json::from_value::<TargetRecord>(raw.clone()) {
                Ok(record) => {
                    targets.insert(
                        id.clone(),
                        Target {
                            id: id.clone(),
                            registered_at: record.registered_at,
                            kind: record.kind,
                            title: record.title,
                        },
                    );
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), target_id = %id, "skipping corrupt target record: {}", e);
                }
            }
        }
        return TargetSnapshot {
            targets,
            last_updated,
        };
    }

    // Older files only kept a flat list of chat ids.
    if let Some(ids) = value.get("chat_ids").and_then(Value::as_array) {
        let registered_at = last_updated.unwrap_or_else(Utc::now);
        let targets = ids
            .iter()
            .filter_map(|raw| match raw {
                Value::Number(n) => Some(n.to_string()),
                Value::String(s) => Some(s.clone()),
                _ => None,
            })
            .map(|id| {
                let target = Target {
                    kind: TargetKind::infer_from_id(&id),
                    id: id.clone(),
                    registered_at,
                    title: None,
                };
                (id, target)
            })
            .collect::<BTreeMap<_, _>>();
        tracing::info!(path = %path.display(), targets = targets.len(), "migrated legacy chat id list");
        return TargetSnapshot {
            targets,
            last_updated,
        };
    }

    tracing::warn!(path = %path.display(), "unrecognized target list layout, starting empty");
    TargetSnapshot::default()
}

/// Accept RFC 3339 timestamps as well as naive ISO-8601 ones (assumed UTC).
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    let raw = value.as_str()?;
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}
