use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
};

use libpronet_proto::{DYNAMIC_ID_MAX, DYNAMIC_ID_MIN, UserId};

use crate::link::LinkContext;

/// Global `user -> link` map. The reverse map is a strict function: every
/// user reachable through the server is registered in exactly one link
/// context, whether as a base user or a tunneled sub-user.
#[derive(Default)]
pub struct UserRegistry {
    links: Mutex<HashMap<UserId, Arc<LinkContext>>>,
}

impl UserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_base(&self, link: Arc<LinkContext>) {
        self.links.lock().unwrap().insert(link.base_user, link);
    }

    /// Installs `sub_user` as routed through `owner`'s link. Returns false
    /// if `owner` has no registered link.
    pub fn register_sub_user(&self, sub_user: UserId, owner: UserId) -> bool {
        let mut map = self.links.lock().unwrap();
        let Some(link) = map.get(&owner).cloned() else { return false };
        link.add_sub_user(sub_user);
        map.insert(sub_user, link);
        true
    }

    pub fn lookup(&self, user: UserId) -> Option<Arc<LinkContext>> {
        self.links.lock().unwrap().get(&user).cloned()
    }

    /// Removes a base user's link and every sub-user it owned.
    pub fn remove_base(&self, base_user: UserId) -> Option<Arc<LinkContext>> {
        let mut map = self.links.lock().unwrap();
        let link = map.remove(&base_user)?;
        for sub in link.sub_users() {
            map.remove(&sub);
        }
        Some(link)
    }

    /// Removes a single sub-user entry without tearing down its owning
    /// link. No-op if `sub_user` names a base user.
    pub fn remove_sub_user(&self, sub_user: UserId) -> bool {
        let mut map = self.links.lock().unwrap();
        let Some(link) = map.get(&sub_user).cloned() else { return false };
        if link.base_user == sub_user {
            return false;
        }
        link.remove_sub_user(sub_user);
        map.remove(&sub_user);
        true
    }

    pub fn entry_count(&self) -> usize {
        self.links.lock().unwrap().len()
    }

    /// Number of currently-registered instances sharing `class_id`/`user_id`
    /// across distinct `inst_id`s, used to enforce `max_instances`.
    pub fn count_instances(&self, class_id: u8, user_id: u64) -> u32 {
        self.links
            .lock()
            .unwrap()
            .keys()
            .filter(|u| u.class_id == class_id && u.user_id == user_id)
            .count() as u32
    }
}

/// Monotonic allocator for the dynamic id range `[0xF0..0xFF] << 32`,
/// guarded by an atomic counter rather than a lock.
pub struct DynamicIdAllocator {
    next: AtomicU64,
}

impl Default for DynamicIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl DynamicIdAllocator {
    pub fn new() -> Self {
        Self { next: AtomicU64::new(DYNAMIC_ID_MIN) }
    }

    pub fn allocate(&self) -> u64 {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        if id > DYNAMIC_ID_MAX {
            self.next.store(DYNAMIC_ID_MIN + 1, Ordering::Relaxed);
            DYNAMIC_ID_MIN
        } else {
            id
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use libpronet_proto::UserId;

    use super::*;
    use crate::link::{LinkContext, LinkSender};
    use libpronet_reactor::Packet;

    struct NullSender;
    impl LinkSender for NullSender {
        fn send_packet(&self, _packet: &Packet) -> bool {
            true
        }
        fn close(&self, _error_code: i32, _ssl_code: i32) {}
        fn is_closed(&self) -> bool {
            false
        }
    }

    #[test]
    fn entry_count_matches_base_plus_sub_user_sum() {
        let registry = UserRegistry::new();
        let base_a = UserId::new(2, 5, 1);
        let base_b = UserId::new(1, 10, 65535);
        let link_a = LinkContext::new(base_a, false, 1024 * 1024, Arc::new(NullSender));
        let link_b = LinkContext::new(base_b, true, 8 * 1024 * 1024, Arc::new(NullSender));
        registry.register_base(link_a);
        registry.register_base(link_b);

        registry.register_sub_user(UserId::new(2, 7, 1), base_b);
        registry.register_sub_user(UserId::new(2, 8, 1), base_b);

        assert_eq!(registry.entry_count(), 4); // 2 bases + 2 subs

        registry.remove_sub_user(UserId::new(2, 7, 1));
        assert_eq!(registry.entry_count(), 3);

        registry.remove_base(base_b);
        assert_eq!(registry.entry_count(), 1);
    }

    #[test]
    fn dynamic_allocator_stays_in_range() {
        let allocator = DynamicIdAllocator::new();
        for _ in 0..10 {
            let id = allocator.allocate();
            assert!((DYNAMIC_ID_MIN..=DYNAMIC_ID_MAX).contains(&id));
        }
    }
}
