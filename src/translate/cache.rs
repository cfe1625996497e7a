//! Resumable run snapshots under `<output>/cache/`

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tempfile::NamedTempFile;
use thiserror::Error;

use super::unit::{ProjectStatus, RunProject, Session, TranslationUnit, UnitStatus};

pub const CACHE_DIR: &str = "cache";
pub const ITEMS_FILE: &str = "items.json";
pub const PROJECT_FILE: &str = "project.json";

/// Default flush period of the save ticker.
pub const SAVE_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("no cached run in {0}")]
    NotFound(PathBuf),
    #[error("cache io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cache serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("failed to replace cache file: {0}")]
    Persist(#[from] tempfile::PersistError),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> CacheError + '_ {
    move |source| CacheError::Io {
        path: path.to_path_buf(),
        source,
    }
}

pub struct CacheStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
    save_requested: AtomicBool,
}

impl CacheStore {
    pub fn new<P: AsRef<Path>>(output_folder: P) -> Self {
        Self {
            dir: output_folder.as_ref().join(CACHE_DIR),
            write_lock: Mutex::new(()),
            save_requested: AtomicBool::new(false),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn exists(&self) -> bool {
        self.dir.join(ITEMS_FILE).exists() && self.dir.join(PROJECT_FILE).exists()
    }

    /// Writes both snapshot files, each replaced atomically.
    pub fn save_snapshot(
        &self,
        project: &RunProject,
        units: &[TranslationUnit],
    ) -> Result<(), CacheError> {
        let _guard = self.write_lock.lock();
        fs::create_dir_all(&self.dir).map_err(io_err(&self.dir))?;

        let items = serde_json::to_vec_pretty(units)?;
        self.replace_file(ITEMS_FILE, &items)?;
        let meta = serde_json::to_vec_pretty(project)?;
        self.replace_file(PROJECT_FILE, &meta)?;

        tracing::debug!(dir = %self.dir.display(), units = units.len(), "snapshot saved");
        Ok(())
    }

    fn replace_file(&self, name: &str, data: &[u8]) -> Result<(), CacheError> {
        let path = self.dir.join(name);
        let mut tmp = NamedTempFile::new_in(&self.dir).map_err(io_err(&self.dir))?;
        tmp.write_all(data).map_err(io_err(&path))?;
        tmp.as_file().sync_all().map_err(io_err(&path))?;
        tmp.persist(&path)?;
        Ok(())
    }

    /// Loads a previous snapshot. Units caught mid-flight come back as
    /// untranslated.
    pub fn load_snapshot(&self) -> Result<(RunProject, Vec<TranslationUnit>), CacheError> {
        if !self.exists() {
            return Err(CacheError::NotFound(self.dir.clone()));
        }

        let items_path = self.dir.join(ITEMS_FILE);
        let raw = fs::read(&items_path).map_err(io_err(&items_path))?;
        let mut units: Vec<TranslationUnit> = serde_json::from_slice(&raw)?;
        for unit in &mut units {
            if unit.status == UnitStatus::Translating {
                unit.status = UnitStatus::Untranslated;
            }
        }

        let project_path = self.dir.join(PROJECT_FILE);
        let raw = fs::read(&project_path).map_err(io_err(&project_path))?;
        let mut project: RunProject = serde_json::from_slice(&raw)?;
        if project.status == ProjectStatus::Translating {
            project.status = ProjectStatus::Untranslated;
        }

        Ok((project, units))
    }

    /// Saves and logs instead of failing.
    pub fn save_logged(&self, project: &RunProject, units: &[TranslationUnit]) {
        if let Err(e) = self.save_snapshot(project, units) {
            tracing::warn!(error = %e, "failed to save cache snapshot");
        }
    }

    /// Marks the snapshot dirty; the ticker flushes it on its next tick.
    pub fn request_save(&self) {
        self.save_requested.store(true, Ordering::SeqCst);
    }

    pub fn take_request(&self) -> bool {
        self.save_requested.swap(false, Ordering::SeqCst)
    }

    /// Flushes the session if a save was requested since the last flush.
    pub fn flush_if_requested(&self, session: &Mutex<Session>) -> bool {
        if !self.take_request() {
            return false;
        }
        let (project, units) = {
            let s = session.lock();
            (s.project.clone(), s.units.clone())
        };
        self.save_logged(&project, &units);
        true
    }
}

/// Background thread flushing requested saves at a fixed interval.
pub struct SaveTicker {
    stop: Sender<()>,
    handle: Option<JoinHandle<()>>,
    store: Arc<CacheStore>,
    session: Arc<Mutex<Session>>,
}

impl SaveTicker {
    pub fn spawn(store: Arc<CacheStore>, session: Arc<Mutex<Session>>, interval: Duration) -> Self {
        let (stop, rx) = mpsc::channel::<()>();
        let worker_store = Arc::clone(&store);
        let worker_session = Arc::clone(&session);
        let handle = thread::spawn(move || {
            loop {
                match rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        worker_store.flush_if_requested(&worker_session);
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        });
        Self {
            stop,
            handle: Some(handle),
            store,
            session,
        }
    }

    /// Stops the ticker and writes one final snapshot.
    pub fn shutdown(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        let _ = self.stop.send(());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("save ticker thread panicked");
            }
            self.store.request_save();
            self.store.flush_if_requested(&self.session);
        }
    }
}

impl Drop for SaveTicker {
    fn drop(&mut self) {
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_request_is_consumed_once() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::new(dir.path());
        assert!(!store.take_request());
        store.request_save();
        assert!(store.take_request());
        assert!(!store.take_request());
    }

    #[test]
    fn test_flush_only_when_requested() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::new(dir.path());
        let session = Mutex::new(Session::new(vec![TranslationUnit::new("a.txt", 0, "x")]));

        assert!(!store.flush_if_requested(&session));
        assert!(!store.exists());

        store.request_save();
        assert!(store.flush_if_requested(&session));
        assert!(store.exists());
    }

    #[test]
    fn test_missing_snapshot() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::new(dir.path());
        assert!(matches!(store.load_snapshot(), Err(CacheError::NotFound(_))));
    }
}
