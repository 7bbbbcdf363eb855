use crate::client::ThreadClient;

/// Elevates the client's privileges until dropped, then restores whatever
/// was there before.
pub struct PrivilegeScope<'a> {
    client: &'a ThreadClient,
    prev: bool,
}

impl<'a> PrivilegeScope<'a> {
    pub fn new(client: &'a ThreadClient) -> Self {
        let prev = client.is_god();
        client.set_god(true);
        Self { client, prev }
    }
}

impl Drop for PrivilegeScope<'_> {
    fn drop(&mut self) {
        self.client.set_god(self.prev);
    }
}
