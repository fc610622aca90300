use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use board_api::{Notice, User};
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::{
    mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    oneshot,
};

/// Port the board writes both collections through after every mutation.
pub trait Persistence: Send + Sync {
    fn load_users(&self) -> Result<Vec<User>>;
    fn load_notices(&self) -> Result<Vec<Notice>>;
    fn save_users(&self, users: &[User]) -> Result<()>;
    fn save_notices(&self, notices: &[Notice]) -> Result<()>;
}

/// JSON files under the data directory, rewritten in full on save.
#[derive(Debug, Clone)]
pub struct JsonSnapshots {
    dir: PathBuf,
}

impl JsonSnapshots {
    pub const USERS: &'static str = "users.json";
    pub const NOTICES: &'static str = "notices.json";

    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("creating data dir {}", dir.display()))?;
        Ok(Self { dir })
    }

    fn read<T: DeserializeOwned>(&self, name: &str) -> Result<Vec<T>> {
        let path = self.dir.join(name);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
        };
        match serde_json::from_slice(&bytes) {
            Ok(items) => Ok(items),
            Err(e) => {
                let aside = path.with_extension("json.corrupt");
                tracing::warn!(
                    file = %path.display(),
                    error = %e,
                    "corrupt snapshot, moving it aside and starting empty"
                );
                fs::rename(&path, &aside)
                    .with_context(|| format!("moving {} aside", path.display()))?;
                Ok(Vec::new())
            }
        }
    }

    fn write<T: Serialize>(&self, name: &str, items: &[T]) -> Result<()> {
        let path = self.dir.join(name);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(items)?;
        write_then_rename(&tmp, &path, &bytes)
    }
}

fn write_then_rename(tmp: &Path, path: &Path, bytes: &[u8]) -> Result<()> {
    fs::write(tmp, bytes).with_context(|| format!("writing {}", tmp.display()))?;
    fs::rename(tmp, path).with_context(|| format!("replacing {}", path.display()))?;
    Ok(())
}

impl Persistence for JsonSnapshots {
    fn load_users(&self) -> Result<Vec<User>> {
        self.read(Self::USERS)
    }

    fn load_notices(&self) -> Result<Vec<Notice>> {
        self.read(Self::NOTICES)
    }

    fn save_users(&self, users: &[User]) -> Result<()> {
        self.write(Self::USERS, users)
    }

    fn save_notices(&self, notices: &[Notice]) -> Result<()> {
        self.write(Self::NOTICES, notices)
    }
}

enum Job {
    Users(Vec<User>),
    Notices(Vec<Notice>),
    Flush(oneshot::Sender<()>),
}

/// Hands snapshots to a writer task so saving never touches the disk on
/// the caller's thread. Queued snapshots of the same collection collapse
/// to the newest one.
#[derive(Clone)]
pub struct BackgroundSnapshots {
    inner: Arc<dyn Persistence>,
    tx: UnboundedSender<Job>,
}

impl BackgroundSnapshots {
    /// Spawn the writer on the current runtime.
    pub fn spawn(inner: Box<dyn Persistence>) -> Self {
        let inner: Arc<dyn Persistence> = Arc::from(inner);
        let (tx, rx) = unbounded_channel();
        tokio::spawn(write_loop(inner.clone(), rx));
        Self { inner, tx }
    }

    /// Resolves once every snapshot queued before the call is written.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.tx.send(Job::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }

    fn queue(&self, job: Job) -> Result<()> {
        self.tx
            .send(job)
            .map_err(|_| anyhow::anyhow!("snapshot writer stopped"))
    }
}

async fn write_loop(inner: Arc<dyn Persistence>, mut rx: UnboundedReceiver<Job>) {
    while let Some(first) = rx.recv().await {
        let mut users = None;
        let mut notices = None;
        let mut waiters = Vec::new();
        let mut next = Some(first);
        while let Some(job) = next {
            match job {
                Job::Users(u) => users = Some(u),
                Job::Notices(n) => notices = Some(n),
                Job::Flush(done) => waiters.push(done),
            }
            next = rx.try_recv().ok();
        }
        let store = inner.clone();
        let written = tokio::task::spawn_blocking(move || {
            if let Some(users) = users {
                if let Err(e) = store.save_users(&users) {
                    tracing::error!(error = %e, "failed to save user snapshot");
                }
            }
            if let Some(notices) = notices {
                if let Err(e) = store.save_notices(&notices) {
                    tracing::error!(error = %e, "failed to save notice snapshot");
                }
            }
        })
        .await;
        if let Err(e) = written {
            tracing::error!(error = %e, "snapshot writer panicked");
        }
        for done in waiters {
            let _ = done.send(());
        }
    }
}

impl Persistence for BackgroundSnapshots {
    fn load_users(&self) -> Result<Vec<User>> {
        self.inner.load_users()
    }

    fn load_notices(&self) -> Result<Vec<Notice>> {
        self.inner.load_notices()
    }

    fn save_users(&self, users: &[User]) -> Result<()> {
        self.queue(Job::Users(users.to_vec()))
    }

    fn save_notices(&self, notices: &[Notice]) -> Result<()> {
        self.queue(Job::Notices(notices.to_vec()))
    }
}

#[derive(Debug, Default)]
struct Snapshot {
    users: Vec<User>,
    notices: Vec<Notice>,
    saves: usize,
}

/// In-memory snapshots. Clones share the same backing store.
#[derive(Debug, Default, Clone)]
pub struct MemorySnapshots {
    inner: Arc<Mutex<Snapshot>>,
}

impl MemorySnapshots {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(users: Vec<User>, notices: Vec<Notice>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Snapshot {
                users,
                notices,
                saves: 0,
            })),
        }
    }

    pub fn users(&self) -> Vec<User> {
        self.inner.lock().users.clone()
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.inner.lock().notices.clone()
    }

    /// Number of save calls seen so far.
    pub fn saves(&self) -> usize {
        self.inner.lock().saves
    }
}

impl Persistence for MemorySnapshots {
    fn load_users(&self) -> Result<Vec<User>> {
        Ok(self.users())
    }

    fn load_notices(&self) -> Result<Vec<Notice>> {
        Ok(self.notices())
    }

    fn save_users(&self, users: &[User]) -> Result<()> {
        let mut guard = self.inner.lock();
        guard.users = users.to_vec();
        guard.saves += 1;
        Ok(())
    }

    fn save_notices(&self, notices: &[Notice]) -> Result<()> {
        let mut guard = self.inner.lock();
        guard.notices = notices.to_vec();
        guard.saves += 1;
        Ok(())
    }
}
