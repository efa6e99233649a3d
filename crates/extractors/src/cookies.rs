use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ExtractorError;

/// One persisted cookie. Mirrors the fields of the classic LWP jar format
/// in a JSON encoding.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CookieRecord {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    /// Unix timestamp; `None` means a session cookie.
    pub expires: Option<i64>,
    /// Discard at end of session (not persisted by browsers; we keep the
    /// flag so a jar can faithfully round-trip what the site sent).
    pub discard: bool,
}

/// On-disk cookie jar for one account-capable extractor.
///
/// Created empty on first access, loaded on startup, written back after a
/// successful login with the session cookies whitelisted by name.
#[derive(Debug)]
pub struct CookieJar {
    path: PathBuf,
    records: RwLock<Vec<CookieRecord>>,
}

impl CookieJar {
    /// Open `{accounts_dir}/{extractor}.cjar`, creating an empty jar (and
    /// the directory) if none exists yet.
    pub fn open(accounts_dir: &Path, extractor: &str) -> Result<Self, ExtractorError> {
        let path = accounts_dir.join(format!("{extractor}.cjar"));
        let records = match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<Vec<CookieRecord>>(&raw) {
                Ok(records) => records,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "unreadable cookie jar; starting empty");
                    Vec::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                fs::create_dir_all(accounts_dir)?;
                Vec::new()
            }
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), cookies = records.len(), "cookie jar opened");
        Ok(Self {
            path,
            records: RwLock::new(records),
        })
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.records
            .read()
            .iter()
            .find(|r| r.name == name)
            .map(|r| r.value.clone())
    }

    pub fn has(&self, name: &str) -> bool {
        self.records.read().iter().any(|r| r.name == name)
    }

    /// Insert or replace a cookie by name.
    pub fn set(&self, record: CookieRecord) {
        let mut records = self.records.write();
        match records.iter_mut().find(|r| r.name == record.name) {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
    }

    /// Write the jar to disk.
    pub fn save(&self) -> Result<(), ExtractorError> {
        let records = self.records.read();
        let raw = serde_json::to_string_pretty(&*records)?;
        fs::write(&self.path, raw)?;
        Ok(())
    }

    /// Drop every cookie and persist the empty jar. Used when the site
    /// rejects the stored session ("login expired").
    pub fn clear_and_save(&self) -> Result<(), ExtractorError> {
        self.records.write().clear();
        self.save()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, value: &str) -> CookieRecord {
        CookieRecord {
            name: name.into(),
            value: value.into(),
            domain: ".example.com".into(),
            path: "/".into(),
            expires: Some(4_102_444_800),
            discard: false,
        }
    }

    #[test]
    fn jar_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let jar = CookieJar::open(dir.path(), "testsite").unwrap();
        jar.set(record("session", "abc123"));
        jar.save().unwrap();

        let reloaded = CookieJar::open(dir.path(), "testsite").unwrap();
        assert_eq!(reloaded.get("session").as_deref(), Some("abc123"));
        assert!(reloaded.has("session"));
    }

    #[test]
    fn set_replaces_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let jar = CookieJar::open(dir.path(), "testsite").unwrap();
        jar.set(record("session", "old"));
        jar.set(record("session", "new"));
        assert_eq!(jar.get("session").as_deref(), Some("new"));
    }

    #[test]
    fn clear_and_save_persists_empty_jar() {
        let dir = tempfile::tempdir().unwrap();
        let jar = CookieJar::open(dir.path(), "testsite").unwrap();
        jar.set(record("session", "abc"));
        jar.save().unwrap();
        jar.clear_and_save().unwrap();

        let reloaded = CookieJar::open(dir.path(), "testsite").unwrap();
        assert!(reloaded.is_empty());
    }

    #[test]
    fn corrupt_jar_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("testsite.cjar"), "{not json").unwrap();
        let jar = CookieJar::open(dir.path(), "testsite").unwrap();
        assert!(jar.is_empty());
    }
}
