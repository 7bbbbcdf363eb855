//! Per-client objects owned elsewhere; the client only hands them out.

use crate::client::registry::ClientId;

/// Descriptor of the operation a client is running.
#[derive(Debug)]
pub struct CurOp {
    client: ClientId,
}

impl CurOp {
    pub(crate) fn new(client: ClientId) -> Self {
        Self { client }
    }

    pub fn client(&self) -> ClientId {
        self.client
    }
}

#[derive(Debug, Default)]
pub struct AuthenticationInfo {
    _private: (),
}

/// Per-client usage statistics.
#[derive(Debug, Default)]
pub struct Top {
    _private: (),
}
