use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Result, anyhow};

use parlor_types::models::{Channel, Message, User, UserId};

/// Full contents of the document store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub users: Vec<User>,
    pub channels: Vec<Channel>,
    /// Insertion order is read order.
    pub messages: Vec<Message>,
}

impl Snapshot {
    pub fn user(&self, id: UserId) -> Option<&User> {
        self.users.iter().find(|u| u.id == id)
    }

    pub fn user_mut(&mut self, id: UserId) -> Option<&mut User> {
        self.users.iter_mut().find(|u| u.id == id)
    }

    pub fn user_by_email(&self, email: &str) -> Option<&User> {
        self.users.iter().find(|u| u.email == email)
    }

    pub fn channel(&self, id: &str) -> Option<&Channel> {
        self.channels.iter().find(|c| c.id == id)
    }

    pub fn message(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// Next user id: one past the highest assigned, starting at 0.
    pub fn next_user_id(&self) -> UserId {
        self.users.iter().map(|u| u.id + 1).max().unwrap_or(0)
    }
}

/// Read-all / write-all persistence contract.
pub trait DocumentStore: Send + Sync {
    fn read_all(&self) -> Result<Snapshot>;
    fn write_all(&self, snapshot: &Snapshot) -> Result<()>;
}

/// Shared handle that serializes every read-modify-write against a backend.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    backend: Box<dyn DocumentStore>,
    writer: Mutex<()>,
}

impl Store {
    pub fn new(backend: impl DocumentStore + 'static) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                backend: Box::new(backend),
                writer: Mutex::new(()),
            }),
        }
    }

    /// Take the writer lock and load a fresh snapshot. Nothing else can
    /// read or write until the returned transaction is dropped.
    pub fn begin(&self) -> Result<Transaction<'_>> {
        let guard = self.lock()?;
        let snapshot = self.inner.backend.read_all()?;
        Ok(Transaction {
            _guard: guard,
            backend: self.inner.backend.as_ref(),
            snapshot,
        })
    }

    /// Fresh snapshot for read-only use.
    pub fn read(&self) -> Result<Snapshot> {
        let _guard = self.lock()?;
        self.inner.backend.read_all()
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>> {
        self.inner
            .writer
            .lock()
            .map_err(|e| anyhow!("store lock poisoned: {}", e))
    }
}

/// A locked snapshot. Mutate through `Deref`, then `commit`.
pub struct Transaction<'a> {
    _guard: MutexGuard<'a, ()>,
    backend: &'a dyn DocumentStore,
    snapshot: Snapshot,
}

impl Transaction<'_> {
    /// Flush the snapshot. The lock stays held until drop, so anything done
    /// between commit and drop is ordered with the commit.
    pub fn commit(&mut self) -> Result<()> {
        self.backend.write_all(&self.snapshot)
    }
}

impl Deref for Transaction<'_> {
    type Target = Snapshot;

    fn deref(&self) -> &Snapshot {
        &self.snapshot
    }
}

impl DerefMut for Transaction<'_> {
    fn deref_mut(&mut self) -> &mut Snapshot {
        &mut self.snapshot
    }
}
