//! Report repository.
//!
//! [`MemoryReportStore`] keeps everything in process memory;
//! [`FsReportStore`] additionally writes one JSON file per report and reloads
//! them on open. Both hold a single lock per store so every operation is
//! linearizable with respect to the others.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::types::{Report, ReportId, ReportSummary};

#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Insert a new report. Fails with [`Error::DuplicateId`] if the id exists.
    async fn create(&self, report: Report) -> Result<()>;
    /// Summaries, newest first.
    async fn list(&self) -> Result<Vec<ReportSummary>>;
    async fn get(&self, id: &ReportId) -> Result<Report>;
    /// Remove one report, returning it.
    async fn delete(&self, id: &ReportId) -> Result<Report>;
    /// Remove every report, returning how many were removed.
    async fn clear(&self) -> Result<usize>;
    async fn len(&self) -> usize;
}

/// Id-keyed reports plus an insertion counter used to order equal timestamps.
#[derive(Debug, Default)]
struct Index {
    reports: HashMap<ReportId, (u64, Report)>,
    next_seq: u64,
}

impl Index {
    fn contains(&self, id: &ReportId) -> bool {
        self.reports.contains_key(id)
    }

    fn insert(&mut self, report: Report) -> Result<()> {
        if self.contains(&report.id) {
            return Err(Error::DuplicateId(report.id));
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.reports.insert(report.id, (seq, report));
        Ok(())
    }

    fn summaries(&self) -> Vec<ReportSummary> {
        let mut entries: Vec<&(u64, Report)> = self.reports.values().collect();
        entries.sort_by(|(sa, a), (sb, b)| b.created_at.cmp(&a.created_at).then(sb.cmp(sa)));
        entries.into_iter().map(|(_, r)| ReportSummary::from(r)).collect()
    }

    fn get(&self, id: &ReportId) -> Result<Report> {
        self.reports
            .get(id)
            .map(|(_, r)| r.clone())
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    fn remove(&mut self, id: &ReportId) -> Result<Report> {
        self.reports
            .remove(id)
            .map(|(_, r)| r)
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }
}

#[derive(Debug, Default)]
pub struct MemoryReportStore {
    index: RwLock<Index>,
}

impl MemoryReportStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReportStore for MemoryReportStore {
    async fn create(&self, report: Report) -> Result<()> {
        self.index.write().await.insert(report)
    }

    async fn list(&self) -> Result<Vec<ReportSummary>> {
        Ok(self.index.read().await.summaries())
    }

    async fn get(&self, id: &ReportId) -> Result<Report> {
        self.index.read().await.get(id)
    }

    async fn delete(&self, id: &ReportId) -> Result<Report> {
        self.index.write().await.remove(id)
    }

    async fn clear(&self) -> Result<usize> {
        let mut index = self.index.write().await;
        let n = index.reports.len();
        index.reports.clear();
        Ok(n)
    }

    async fn len(&self) -> usize {
        self.index.read().await.reports.len()
    }
}

/// Directory-backed store: `<dir>/<id>.json` per report.
///
/// File writes happen while the write lock is held, so a report is visible
/// only once it is on disk.
#[derive(Debug)]
pub struct FsReportStore {
    dir: PathBuf,
    index: RwLock<Index>,
}

impl FsReportStore {
    /// Open (creating if needed) `dir` and load every report found there.
    /// Unreadable files are skipped with a warning.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;

        let mut index = Index::default();
        let mut loaded = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_report(&path).await {
                Ok(report) => loaded.push(report),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable report"),
            }
        }
        // Insertion order follows creation time so ties stay stable across restarts.
        loaded.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        for report in loaded {
            if let Err(e) = index.insert(report) {
                warn!(error = %e, "skipping duplicate report file");
            }
        }
        info!(dir = %dir.display(), reports = index.reports.len(), "report store opened");

        Ok(Self {
            dir,
            index: RwLock::new(index),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &ReportId) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }
}

async fn read_report(path: &Path) -> Result<Report> {
    let bytes = tokio::fs::read(path).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[async_trait]
impl ReportStore for FsReportStore {
    async fn create(&self, report: Report) -> Result<()> {
        let mut index = self.index.write().await;
        if index.contains(&report.id) {
            return Err(Error::DuplicateId(report.id));
        }
        let body = serde_json::to_vec_pretty(&report)?;
        let path = self.path_for(&report.id);
        tokio::fs::write(&path, body).await?;
        debug!(path = %path.display(), "report written");
        index.insert(report)
    }

    async fn list(&self) -> Result<Vec<ReportSummary>> {
        Ok(self.index.read().await.summaries())
    }

    async fn get(&self, id: &ReportId) -> Result<Report> {
        self.index.read().await.get(id)
    }

    async fn delete(&self, id: &ReportId) -> Result<Report> {
        let mut index = self.index.write().await;
        if !index.contains(id) {
            return Err(Error::NotFound(id.to_string()));
        }
        remove_file_if_present(&self.path_for(id)).await?;
        index.remove(id)
    }

    async fn clear(&self) -> Result<usize> {
        let mut index = self.index.write().await;
        let ids: Vec<ReportId> = index.reports.keys().copied().collect();
        for id in &ids {
            remove_file_if_present(&self.path_for(id)).await?;
            index.reports.remove(id);
        }
        Ok(ids.len())
    }

    async fn len(&self) -> usize {
        self.index.read().await.reports.len()
    }
}

async fn remove_file_if_present(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ScanProfile;
    use time::{Duration, OffsetDateTime};

    fn report(name: &str, created_at: OffsetDateTime) -> Report {
        let content = format!("content of {name}");
        Report {
            id: ReportId::new(),
            name: name.to_string(),
            size_bytes: content.len() as u64,
            content,
            created_at,
            host: "127.0.0.1".into(),
            port_spec: "80".into(),
            script_selection: "default".into(),
            profile: ScanProfile::Basic,
            arguments: vec!["-sT".into()],
        }
    }

    #[tokio::test]
    async fn create_get_list_newest_first() {
        let store = MemoryReportStore::new();
        let t0 = OffsetDateTime::now_utc();
        let old = report("old", t0);
        let new = report("new", t0 + Duration::seconds(5));
        store.create(old.clone()).await.unwrap();
        store.create(new.clone()).await.unwrap();

        assert_eq!(store.get(&old.id).await.unwrap(), old);
        let names: Vec<_> = store.list().await.unwrap().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["new", "old"]);
    }

    #[tokio::test]
    async fn equal_timestamps_list_latest_insert_first() {
        let store = MemoryReportStore::new();
        let t = OffsetDateTime::now_utc();
        for name in ["a", "b", "c"] {
            store.create(report(name, t)).await.unwrap();
        }
        let names: Vec<_> = store.list().await.unwrap().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["c", "b", "a"]);
    }

    #[tokio::test]
    async fn duplicate_id_rejected() {
        let store = MemoryReportStore::new();
        let r = report("x", OffsetDateTime::now_utc());
        store.create(r.clone()).await.unwrap();
        assert!(matches!(store.create(r).await, Err(Error::DuplicateId(_))));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn delete_then_not_found() {
        let store = MemoryReportStore::new();
        let r = report("x", OffsetDateTime::now_utc());
        store.create(r.clone()).await.unwrap();
        assert_eq!(store.delete(&r.id).await.unwrap().id, r.id);
        assert!(matches!(store.delete(&r.id).await, Err(Error::NotFound(_))));
        assert!(matches!(store.get(&r.id).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn clear_counts_and_empties() {
        let store = MemoryReportStore::new();
        for i in 0..4 {
            store.create(report(&i.to_string(), OffsetDateTime::now_utc())).await.unwrap();
        }
        assert_eq!(store.clear().await.unwrap(), 4);
        assert!(store.list().await.unwrap().is_empty());
        assert_eq!(store.clear().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn fs_store_persists_across_open() {
        let dir = tempfile::tempdir().unwrap();
        let r = report("disk", OffsetDateTime::now_utc());
        {
            let store = FsReportStore::open(dir.path()).await.unwrap();
            store.create(r.clone()).await.unwrap();
            assert!(dir.path().join(format!("{}.json", r.id)).exists());
        }
        let store = FsReportStore::open(dir.path()).await.unwrap();
        let loaded = store.get(&r.id).await.unwrap();
        assert_eq!(loaded.content, r.content);
        assert_eq!(loaded.created_at.unix_timestamp(), r.created_at.unix_timestamp());

        store.delete(&r.id).await.unwrap();
        assert!(!dir.path().join(format!("{}.json", r.id)).exists());
    }

    #[tokio::test]
    async fn fs_store_skips_garbage_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("junk.json"), b"not json").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();
        let store = FsReportStore::open(dir.path()).await.unwrap();
        assert_eq!(store.len().await, 0);
        store.create(report("a", OffsetDateTime::now_utc())).await.unwrap();
        store.create(report("b", OffsetDateTime::now_utc())).await.unwrap();
        assert_eq!(store.clear().await.unwrap(), 2);
        assert!(dir.path().join("notes.txt").exists());
    }
}
