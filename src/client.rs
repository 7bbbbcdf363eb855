//! Per-thread connection state.

pub mod curop;
pub mod registry;

use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    fmt,
    marker::PhantomData,
    rc::Rc,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    thread::{self, ThreadId},
};

use crate::{
    ServerState,
    client::{
        curop::{AuthenticationInfo, CurOp, Top},
        registry::{ClientId, ClientInfo},
    },
    context::{
        Context,
        ctx_stack::{ContextStack, Frame, FrameId},
    },
    database::DbHandle,
    error::{ClientError, Result},
    namespace,
};

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// State of one logical client, confined to the thread that runs it.
///
/// Registered with the server's [`ClientRegistry`](registry::ClientRegistry)
/// from construction until [`shutdown`](Self::shutdown).
pub struct ThreadClient {
    info: Arc<ClientInfo>,
    server: ServerState,
    curop: CurOp,
    auth: AuthenticationInfo,
    top: Top,
    stack: RefCell<ContextStack>,
    prev_db: Cell<Option<DbHandle>>,
    temp_collections: RefCell<VecDeque<String>>,
    god: Cell<bool>,
    shutdown: Cell<bool>,
    _local: PhantomData<Rc<()>>,
}

impl fmt::Debug for ThreadClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadClient")
            .field("id", &self.info.id)
            .field("desc", &self.info.desc)
            .field("depth", &self.context_depth())
            .finish()
    }
}

impl ThreadClient {
    pub fn new(desc: &str, server: &ServerState) -> Self {
        let id = ClientId(NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed));
        let info = Arc::new(ClientInfo {
            id,
            desc: desc.to_string(),
            thread: thread::current().id(),
        });

        server.registry().register(info.clone());
        log::debug!("client {id} ({desc}) registered");

        Self {
            info,
            server: server.clone(),
            curop: CurOp::new(id),
            auth: AuthenticationInfo::default(),
            top: Top::default(),
            stack: RefCell::new(ContextStack::default()),
            prev_db: Cell::new(None),
            temp_collections: RefCell::new(VecDeque::new()),
            god: Cell::new(false),
            shutdown: Cell::new(false),
            _local: PhantomData,
        }
    }

    pub fn id(&self) -> ClientId {
        self.info.id
    }

    pub fn desc(&self) -> &str {
        &self.info.desc
    }

    pub fn info(&self) -> &Arc<ClientInfo> {
        &self.info
    }

    pub fn thread_id(&self) -> ThreadId {
        self.info.thread
    }

    pub fn server(&self) -> &ServerState {
        &self.server
    }

    pub fn curop(&self) -> &CurOp {
        &self.curop
    }

    pub fn auth(&self) -> &AuthenticationInfo {
        &self.auth
    }

    pub fn top(&self) -> &Top {
        &self.top
    }

    pub(crate) fn stack(&self) -> &RefCell<ContextStack> {
        &self.stack
    }

    /// Snapshot of the current (innermost) context.
    pub fn context(&self) -> Option<Frame> {
        self.stack.borrow().current().cloned()
    }

    pub fn context_depth(&self) -> usize {
        self.stack.borrow().depth()
    }

    pub fn database(&self) -> Option<DbHandle> {
        self.stack.borrow().current().and_then(|frame| frame.db)
    }

    /// Namespace of the current context. Callers establish one first.
    pub fn ns(&self) -> Result<String> {
        self.stack
            .borrow()
            .current()
            .map(|frame| frame.ns.clone())
            .ok_or(ClientError::NoContext)
    }

    /// Database of the most recently dropped context. May be stale.
    pub fn prev_database(&self) -> Option<DbHandle> {
        self.prev_db.get()
    }

    /// Namespace of a context still bound to a database it has not
    /// suspended, if any.
    pub fn unvalidated_context(&self) -> Option<String> {
        self.stack.borrow().unvalidated().map(|frame| frame.ns.clone())
    }

    pub(crate) fn pop_frame(&self, id: FrameId) {
        let popped = self.stack.borrow_mut().pop(id);
        if let Some((frame, discarded)) = popped {
            if discarded > 0 {
                log::error!(
                    "client {}: context {} dropped with {discarded} inner contexts still open",
                    self.info.id,
                    frame.ns
                );
            }
            self.prev_db.set(frame.db);
        }
    }

    pub fn add_temp_collection(&self, ns: &str) {
        self.temp_collections.borrow_mut().push_back(ns.to_string());
    }

    /// Temporary collections in the order they were added.
    pub fn temp_collections(&self) -> Vec<String> {
        self.temp_collections.borrow().iter().cloned().collect()
    }

    pub fn is_god(&self) -> bool {
        self.god.get()
    }

    pub(crate) fn set_god(&self, god: bool) {
        self.god.set(god);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.get()
    }

    /// Tear the client down before its thread goes away.
    ///
    /// Unregisters the client and drops its temporary collections. Returns
    /// true if anything was done. If the exclusive lock cannot be taken the
    /// temporary collections are left in place and stay listed.
    pub fn shutdown(&self) -> bool {
        self.shutdown.set(true);

        let mut did_anything = self.server.registry().unregister(self.info.id);
        if did_anything {
            log::debug!("client {} ({}) unregistered", self.info.id, self.info.desc);
        }

        let has_temps = !self.temp_collections.borrow().is_empty();
        if has_temps && self.drop_temp_collections() {
            did_anything = true;
        }

        did_anything
    }

    fn drop_temp_collections(&self) -> bool {
        let lock = self.server.lock();
        let _guard = match lock.write() {
            Ok(guard) => guard,
            Err(e) => {
                log::error!(
                    "client {}: cannot drop {} temp collections: {e}",
                    self.info.id,
                    self.temp_collections.borrow().len()
                );
                return false;
            }
        };

        let temps: Vec<String> = self.temp_collections.borrow_mut().drain(..).collect();
        for ns in &temps {
            match self.drop_temp_collection(ns) {
                Ok(true) => log::info!("dropped temp collection {ns}"),
                Ok(false) => {}
                Err(e) => log::warn!("error dropping temp collection: {ns}: {e}"),
            }
        }
        true
    }

    fn drop_temp_collection(&self, ns: &str) -> Result<bool> {
        let parsed = namespace::parse(ns)?;
        let Some(collection) = parsed.collection else {
            return Ok(false);
        };

        let path = self.server.config().data_root();
        if self.server.resolver().lookup(path, parsed.db).is_none() {
            return Ok(false);
        }

        let ctx = Context::with_path(self, ns, path, Some(self.server.lock()))?;
        match ctx.db()? {
            Some(db) => db.drop_collection(collection),
            None => Ok(false),
        }
    }
}

impl Drop for ThreadClient {
    fn drop(&mut self) {
        if !self.shutdown.get() && self.server.registry().unregister(self.info.id) {
            log::warn!(
                "client {} ({}) dropped without shutdown",
                self.info.id,
                self.info.desc
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Config, lock::LockState};

    fn server() -> ServerState {
        ServerState::new(Config::in_memory())
    }

    #[test]
    fn registered_until_shutdown() {
        let server = server();
        let client = ThreadClient::new("conn", &server);
        assert!(server.registry().contains(client.id()));
        assert_eq!(client.thread_id(), thread::current().id());
        assert_eq!(client.curop().client(), client.id());

        assert!(client.shutdown());
        assert!(client.is_shutdown());
        assert!(!server.registry().contains(client.id()));
        assert!(!client.shutdown());
    }

    #[test]
    fn drop_without_shutdown_unregisters() {
        let server = server();
        let id = {
            let client = ThreadClient::new("conn", &server);
            client.id()
        };
        assert!(!server.registry().contains(id));
    }

    #[test]
    fn ns_without_context_is_fatal() {
        let server = server();
        let client = ThreadClient::new("conn", &server);
        let err = client.ns().unwrap_err();
        assert!(matches!(err, ClientError::NoContext));
        assert!(err.is_fatal());
        assert!(client.database().is_none());
        assert!(client.context().is_none());
    }

    #[test]
    fn temp_collections_are_fifo() {
        let server = server();
        let client = ThreadClient::new("conn", &server);
        client.add_temp_collection("shop.tmp.b");
        client.add_temp_collection("shop.tmp.a");
        client.add_temp_collection("shop.tmp.b");
        assert_eq!(
            client.temp_collections(),
            vec!["shop.tmp.b", "shop.tmp.a", "shop.tmp.b"]
        );
    }

    #[test]
    fn shutdown_drops_temp_collections() {
        let server = server();
        let client = ThreadClient::new("conn", &server);
        {
            let ctx = Context::new(&client, "shop.tmp.mr1").unwrap();
            let db = ctx.db().unwrap().unwrap();
            db.create_collection("tmp.mr1").unwrap();
            db.create_collection("orders").unwrap();
        }
        client.add_temp_collection("shop.tmp.mr1");
        // never opened; skipped rather than created
        client.add_temp_collection("scratch.tmp");

        assert!(client.shutdown());
        assert!(client.temp_collections().is_empty());
        assert_eq!(server.lock().current_state(), LockState::Unlocked);
        assert!(client.context().is_none());

        let root = server.config().data_root();
        assert!(server.resolver().lookup(root, "scratch").is_none());
        let handle = server.resolver().lookup(root, "shop").unwrap();
        let db = server.resolver().get(handle).unwrap();
        assert_eq!(db.collection_names().unwrap(), vec!["orders"]);
    }

    #[test]
    fn shutdown_with_lock_held_keeps_temp_collections() {
        let server = server();
        let client = ThreadClient::new("conn", &server);
        client.add_temp_collection("shop.tmp");

        {
            let _guard = server.lock().read().unwrap();
            // still unregisters
            assert!(client.shutdown());
            assert_eq!(server.lock().current_state(), LockState::Shared(1));
            assert_eq!(client.temp_collections(), vec!["shop.tmp"]);
            assert!(!client.shutdown());
        }

        // retried once the lock is free
        assert!(client.shutdown());
        assert!(client.temp_collections().is_empty());
    }

    #[test]
    fn debug_shows_id_and_depth() {
        let server = server();
        let client = ThreadClient::new("conn", &server);
        let _ctx = Context::new(&client, "shop.orders").unwrap();
        let out = format!("{client:?}");
        assert!(out.contains(&format!("id: {:?}", client.id())));
        assert!(out.contains("desc: \"conn\""));
        assert!(out.contains("depth: 1"));
    }
}
