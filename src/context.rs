//! Scoped binding of a thread's client to a namespace.
//!
//! A [`Context`] pushes a frame on its client's stack when built and pops it
//! when dropped, so the binding that was current before it is restored on
//! every exit path, unwinding included.

pub mod ctx_stack;

use std::{
    marker::PhantomData,
    path::{Path, PathBuf},
    rc::Rc,
    sync::Arc,
    thread,
};

use crate::{
    client::ThreadClient,
    context::ctx_stack::{Frame, FrameId},
    database::{Database, DbHandle},
    error::{ClientError, Result},
    lock::DbLock,
    namespace,
};

pub struct Context<'a> {
    client: &'a ThreadClient,
    id: FrameId,
    lock: Option<&'a DbLock>,
    _local: PhantomData<Rc<()>>,
}

impl<'a> Context<'a> {
    /// Bind to `ns` under the configured data root.
    pub fn new(client: &'a ThreadClient, ns: &str) -> Result<Self> {
        let path = client.server().config().data_root().to_path_buf();
        Self::with_path(client, ns, path, None)
    }

    /// Bind to `ns` under `path`. When `lock` is given, the database is only
    /// handed out while the calling thread holds it.
    pub fn with_path(
        client: &'a ThreadClient,
        ns: &str,
        path: impl Into<PathBuf>,
        lock: Option<&'a DbLock>,
    ) -> Result<Self> {
        namespace::parse(ns)?;
        let ctx = Self::push(client, ns.to_string(), path.into(), lock);
        ctx.finish_init()?;
        Ok(ctx)
    }

    /// Becomes the current context without binding anything yet.
    pub fn placeholder(client: &'a ThreadClient) -> Self {
        let path = client.server().config().data_root().to_path_buf();
        Self::push(client, String::new(), path, None)
    }

    /// Bind to `ns` using a handle obtained earlier, possibly before the lock
    /// was released. The database must still be open and be the same one.
    pub fn revalidate(client: &'a ThreadClient, ns: &str, db: DbHandle) -> Result<Self> {
        let parsed = namespace::parse(ns)?;
        let path = client.server().config().data_root().to_path_buf();

        if client.server().resolver().lookup(&path, parsed.db) != Some(db) {
            return Err(ClientError::StaleDatabase(ns.to_string()));
        }

        let ctx = Self::push(client, ns.to_string(), path, None);
        ctx.update(|frame| frame.db = Some(db));
        Ok(ctx)
    }

    fn push(
        client: &'a ThreadClient,
        ns: String,
        path: PathBuf,
        lock: Option<&'a DbLock>,
    ) -> Self {
        let id = client.stack().borrow_mut().push(ns, path);
        Self {
            client,
            id,
            lock,
            _local: PhantomData,
        }
    }

    /// Read this guard's frame in place. `None` means an outer guard already
    /// unwound the stack past it; callers treat that as an empty binding.
    fn with_frame<R>(&self, f: impl FnOnce(Option<&Frame>) -> R) -> R {
        f(self.client.stack().borrow().get(self.id))
    }

    fn update(&self, f: impl FnOnce(&mut Frame)) {
        if let Some(frame) = self.client.stack().borrow_mut().get_mut(self.id) {
            f(frame);
        }
    }

    /// Resolve or create the database for the bound namespace.
    fn finish_init(&self) -> Result<()> {
        let Some((ns, path)) = self.with_frame(|frame| {
            frame
                .filter(|frame| !frame.ns.is_empty())
                .map(|frame| (frame.ns.clone(), frame.path.clone()))
        }) else {
            self.update(|frame| frame.suspended = false);
            return Ok(());
        };

        let (db, created) = self
            .client
            .server()
            .resolver()
            .resolve_or_create(&path, namespace::root(&ns))?;
        if created {
            log::info!("created database {} for {ns}", namespace::root(&ns));
        }

        self.update(|frame| {
            frame.db = Some(db);
            frame.just_created = created;
            frame.suspended = false;
        });
        Ok(())
    }

    pub fn ns(&self) -> String {
        self.with_frame(|frame| frame.map(|frame| frame.ns.clone()).unwrap_or_default())
    }

    pub fn database(&self) -> Option<DbHandle> {
        self.with_frame(|frame| frame.and_then(|frame| frame.db))
    }

    /// The bound database, checked against suspension, the associated lock
    /// and handle staleness. `None` when nothing is bound.
    pub fn db(&self) -> Result<Option<Arc<Database>>> {
        let db = self.with_frame(|frame| {
            let Some(frame) = frame else {
                return Ok(None);
            };
            if frame.suspended {
                return Err(ClientError::Suspended(frame.ns.clone()));
            }
            if let Some(lock) = self.lock {
                if !lock.current_state().is_locked() {
                    return Err(ClientError::Unlocked(frame.ns.clone()));
                }
            }
            Ok(frame.db)
        })?;
        match db {
            Some(handle) => self.client.server().resolver().get(handle).map(Some),
            None => Ok(None),
        }
    }

    pub fn just_created(&self) -> bool {
        self.with_frame(|frame| frame.is_some_and(|frame| frame.just_created))
    }

    pub fn is_suspended(&self) -> bool {
        self.with_frame(|frame| frame.is_some_and(|frame| frame.suspended))
    }

    pub fn matches_namespace(&self, ns: &str, path: &Path) -> bool {
        self.with_frame(|frame| frame.is_some_and(|frame| frame.ns == ns && frame.path == path))
    }

    /// True if the bound namespace is `db` or a collection inside it.
    pub fn contains_namespace(&self, db: &str, path: &Path) -> bool {
        self.with_frame(|frame| {
            frame.is_some_and(|frame| frame.path == path && namespace::in_db(&frame.ns, db))
        })
    }

    pub fn clear(&self) {
        self.update(|frame| {
            frame.ns.clear();
            frame.db = None;
        });
    }

    /// Populate a placeholder (or rebind) to `ns`.
    pub fn bind(&self, ns: &str) -> Result<()> {
        namespace::parse(ns)?;
        self.update(|frame| {
            frame.ns = ns.to_string();
            frame.db = None;
            frame.just_created = false;
        });
        self.finish_init()
    }

    /// Call before unlocking: forget the database so nothing uses it while
    /// another thread may close it.
    pub fn suspend(&self) {
        self.update(|frame| {
            frame.db = None;
            frame.suspended = true;
        });
    }

    /// Call after relocking: resolve the database again.
    pub fn resume(&self) -> Result<()> {
        self.finish_init()
    }
}

impl Drop for Context<'_> {
    fn drop(&mut self) {
        if thread::current().id() != self.client.thread_id() {
            panic!("{}", ClientError::WrongThread);
        }
        self.client.pop_frame(self.id);
    }
}
