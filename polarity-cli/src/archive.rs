use std::collections::HashSet;
use std::io::Write;
use std::path::PathBuf;

use parking_lot::Mutex;
use tracing::warn;

/// Append-only archive of completed content ids (`download.log`). With
/// redownload disabled, ids found here are skipped at enqueue time.
#[derive(Debug)]
pub struct DownloadArchive {
    path: PathBuf,
    entries: Mutex<HashSet<String>>,
}

impl DownloadArchive {
    pub fn open(path: PathBuf) -> Self {
        let entries = std::fs::read_to_string(&path)
            .map(|raw| {
                raw.lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    pub fn contains(&self, ident: &str) -> bool {
        self.entries.lock().contains(ident)
    }

    pub fn append(&self, ident: &str) {
        if !self.entries.lock().insert(ident.to_string()) {
            return;
        }
        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| writeln!(file, "{ident}"));
        if let Err(e) = result {
            warn!(error = %e, "download archive append failed");
        }
    }
}
