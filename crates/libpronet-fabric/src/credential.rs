use std::net::Ipv4Addr;

use libpronet_proto::UserId;

/// The credential store is an external collaborator (typically SQLite-backed)
/// exposed to the fabric as this lookup oracle.
pub trait CredentialStore: Send + Sync {
    fn lookup(&self, user: &UserId) -> Option<CredentialRecord>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CredentialRecord {
    pub password_hash: [u8; 32],
    pub max_instances: u32,
    pub ip_binding: Option<Ipv4Addr>,
    pub is_c2s_node: bool,
}

/// In-memory store for tests and the `test-client`/demo binaries; not
/// intended for production credential storage.
#[derive(Default)]
pub struct InMemoryCredentialStore {
    records: std::sync::Mutex<std::collections::HashMap<UserId, CredentialRecord>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user: UserId, record: CredentialRecord) {
        self.records.lock().unwrap().insert(user, record);
    }
}

impl CredentialStore for InMemoryCredentialStore {
    fn lookup(&self, user: &UserId) -> Option<CredentialRecord> {
        self.records.lock().unwrap().get(user).cloned()
    }
}
