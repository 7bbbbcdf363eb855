use std::{
    collections::HashMap,
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use parking_lot::{Mutex, RwLock};
use rusqlite::{Connection, OptionalExtension};

use crate::{
    config::StorageMode,
    error::{ClientError, Result},
};

/// Generation-checked reference to an open database.
///
/// A handle stays `Copy` and cheap; it is only turned into a [`Database`]
/// through [`DatabaseResolver::get`], which fails once the database it named
/// has been closed, even if the slot has since been reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DbHandle {
    slot: usize,
    generation: u64,
}

pub trait DatabaseResolver: Send + Sync + 'static {
    /// Open `name` under `path`, creating it if needed. The flag reports creation.
    fn resolve_or_create(&self, path: &Path, name: &str) -> Result<(DbHandle, bool)>;

    /// Handle for an already open database.
    fn lookup(&self, path: &Path, name: &str) -> Option<DbHandle>;

    fn get(&self, handle: DbHandle) -> Result<Arc<Database>>;

    /// Close a database; outstanding handles become stale.
    fn close(&self, path: &Path, name: &str) -> bool;
}

/// A database backed by one SQLite connection. Collections are tables.
pub struct Database {
    name: String,
    path: PathBuf,
    conn: Mutex<Connection>,
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.name)
            .field("path", &self.path)
            .finish()
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

impl Database {
    fn open(path: &Path, name: &str, mode: StorageMode) -> Result<(Self, bool)> {
        let (conn, created) = match mode {
            StorageMode::Memory => (Connection::open_in_memory()?, true),
            StorageMode::Disk => {
                std::fs::create_dir_all(path)?;
                let file = path.join(format!("{name}.db"));
                let created = !file.exists();
                (Connection::open(&file)?, created)
            }
        };

        Ok((
            Self {
                name: name.to_string(),
                path: path.to_path_buf(),
                conn: Mutex::new(conn),
            },
            created,
        ))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns false if the collection already existed.
    pub fn create_collection(&self, collection: &str) -> Result<bool> {
        if self.collection_exists(collection)? {
            return Ok(false);
        }
        self.conn.lock().execute_batch(&format!(
            "CREATE TABLE {} (id INTEGER PRIMARY KEY, doc BLOB)",
            quote_ident(collection)
        ))?;
        Ok(true)
    }

    /// Returns false if there was nothing to drop.
    pub fn drop_collection(&self, collection: &str) -> Result<bool> {
        if !self.collection_exists(collection)? {
            return Ok(false);
        }
        self.conn
            .lock()
            .execute_batch(&format!("DROP TABLE {}", quote_ident(collection)))?;
        Ok(true)
    }

    pub fn collection_exists(&self, collection: &str) -> Result<bool> {
        let found = self
            .conn
            .lock()
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [collection],
                |r| r.get::<_, i64>(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn collection_names(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(names)
    }
}

#[derive(Default)]
struct Slot {
    generation: u64,
    db: Option<Arc<Database>>,
}

#[derive(Default)]
struct Slots {
    slots: Vec<Slot>,
    free: Vec<usize>,
    index: HashMap<(PathBuf, String), usize>,
}

/// Default resolver: open databases keyed by (data root, name).
pub struct DatabaseHolder {
    mode: StorageMode,
    inner: RwLock<Slots>,
}

impl DatabaseHolder {
    pub fn new(mode: StorageMode) -> Self {
        Self {
            mode,
            inner: RwLock::new(Slots::default()),
        }
    }

    fn handle_for(slots: &Slots, path: &Path, name: &str) -> Option<DbHandle> {
        let key = (path.to_path_buf(), name.to_string());
        slots.index.get(&key).map(|&slot| DbHandle {
            slot,
            generation: slots.slots[slot].generation,
        })
    }
}

impl DatabaseResolver for DatabaseHolder {
    fn resolve_or_create(&self, path: &Path, name: &str) -> Result<(DbHandle, bool)> {
        if let Some(handle) = Self::handle_for(&self.inner.read(), path, name) {
            return Ok((handle, false));
        }

        let mut inner = self.inner.write();
        // raced with another opener
        if let Some(handle) = Self::handle_for(&inner, path, name) {
            return Ok((handle, false));
        }

        let (db, created) = Database::open(path, name, self.mode)?;
        let slot = match inner.free.pop() {
            Some(slot) => slot,
            None => {
                inner.slots.push(Slot::default());
                inner.slots.len() - 1
            }
        };
        inner.slots[slot].db = Some(Arc::new(db));
        inner
            .index
            .insert((path.to_path_buf(), name.to_string()), slot);

        log::debug!("opened database {name} at {}", path.display());
        Ok((
            DbHandle {
                slot,
                generation: inner.slots[slot].generation,
            },
            created,
        ))
    }

    fn lookup(&self, path: &Path, name: &str) -> Option<DbHandle> {
        Self::handle_for(&self.inner.read(), path, name)
    }

    fn get(&self, handle: DbHandle) -> Result<Arc<Database>> {
        let inner = self.inner.read();
        match inner.slots.get(handle.slot) {
            Some(Slot {
                generation,
                db: Some(db),
            }) if *generation == handle.generation => Ok(db.clone()),
            _ => Err(ClientError::StaleDatabase(format!(
                "slot {} generation {}",
                handle.slot, handle.generation
            ))),
        }
    }

    fn close(&self, path: &Path, name: &str) -> bool {
        let mut inner = self.inner.write();
        let Some(slot) = inner.index.remove(&(path.to_path_buf(), name.to_string())) else {
            return false;
        };
        let entry = &mut inner.slots[slot];
        entry.db = None;
        entry.generation += 1;
        inner.free.push(slot);
        log::debug!("closed database {name} at {}", path.display());
        true
    }
}
