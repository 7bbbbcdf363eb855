pub mod client;
pub mod config;
pub mod context;
pub mod database;
pub mod error;
pub mod lock;
pub mod namespace;
pub mod privilege;
pub mod server;

use std::{cell::RefCell, rc::Rc};

pub use crate::{
    client::ThreadClient,
    context::Context,
    error::{ClientError, Result},
    lock::{DbLock, LockState},
    privilege::PrivilegeScope,
    server::ServerState,
};

thread_local! {
    /// The client of the calling thread, if `init_thread` has run.
    static CURRENT_CLIENT: RefCell<Option<Rc<ThreadClient>>> = const { RefCell::new(None) };
}

/// Create and install this thread's client against the process-wide server.
/// Call once when a worker thread starts.
pub fn init_thread(desc: &str) -> Result<Rc<ThreadClient>> {
    init_thread_with(desc, ServerState::global())
}

pub fn init_thread_with(desc: &str, server: &ServerState) -> Result<Rc<ThreadClient>> {
    CURRENT_CLIENT.with(|slot| {
        let mut slot = slot.borrow_mut();
        if let Some(existing) = slot.as_ref() {
            return Err(ClientError::AlreadyInitialized(existing.desc().to_string()));
        }
        let client = Rc::new(ThreadClient::new(desc, server));
        *slot = Some(client.clone());
        Ok(client)
    })
}

/// The calling thread's client.
pub fn current_client() -> Result<Rc<ThreadClient>> {
    CURRENT_CLIENT.with(|slot| slot.borrow().clone().ok_or(ClientError::NoClient))
}

pub fn has_client() -> bool {
    CURRENT_CLIENT.with(|slot| slot.borrow().is_some())
}

/// Shut the calling thread's client down and uninstall it.
/// Returns whatever [`ThreadClient::shutdown`] reports.
pub fn shutdown_thread() -> Result<bool> {
    let client = CURRENT_CLIENT
        .with(|slot| slot.borrow_mut().take())
        .ok_or(ClientError::NoClient)?;
    Ok(client.shutdown())
}
