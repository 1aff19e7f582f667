use std::net::Ipv4Addr;

use libpronet_proto::{AuthFailureReason, LoginRequest, ProNetError, UserId};

use crate::{
    credential::CredentialStore,
    registry::{DynamicIdAllocator, UserRegistry},
};

/// Outcome of a successful login: the identity to assign (which may differ
/// from the request when a dynamic id was requested) and the peer's
/// observed address, echoed back on the ack frame.
pub struct LoginOutcome {
    pub assigned_user: UserId,
    pub observed_ip: Ipv4Addr,
}

/// Authenticates a decoded login header against the credential store and
/// the current registry occupancy, assigning a dynamic id when requested.
///
/// The store's `password_hash` field stands in for the raw password: the
/// comparison is `SHA256(nonce || password_hash) == client_supplied_hash`,
/// so credentials at rest never need the plaintext password.
pub fn evaluate_login(
    req: &LoginRequest,
    peer_ip: Ipv4Addr,
    store: &dyn CredentialStore,
    registry: &UserRegistry,
    dynamic_ids: &DynamicIdAllocator,
) -> Result<LoginOutcome, ProNetError> {
    let assigned_user = if req.user.is_dynamic_request() {
        UserId::new(req.user.class_id, dynamic_ids.allocate(), req.user.inst_id)
    } else if req.user.is_static_range() {
        req.user
    } else {
        return Err(ProNetError::AuthFailed(AuthFailureReason::InvalidId));
    };

    let record = store
        .lookup(&assigned_user)
        .ok_or(ProNetError::AuthFailed(AuthFailureReason::WrongPassword))?;

    let expected = libpronet_proto::login_hash(&req.nonce, &record.password_hash);
    if expected != req.password_hash {
        return Err(ProNetError::AuthFailed(AuthFailureReason::WrongPassword));
    }

    if let Some(bound_ip) = record.ip_binding {
        if bound_ip != peer_ip {
            return Err(ProNetError::AuthFailed(AuthFailureReason::IpMismatch));
        }
    }

    let online = registry.count_instances(assigned_user.class_id, assigned_user.user_id);
    if online >= record.max_instances {
        return Err(ProNetError::AuthFailed(AuthFailureReason::TooManyInstances));
    }

    Ok(LoginOutcome { assigned_user, observed_ip: peer_ip })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::{CredentialRecord, InMemoryCredentialStore};

    fn req(user: UserId, password: &[u8], nonce: [u8; 8]) -> LoginRequest {
        LoginRequest {
            user,
            password_hash: libpronet_proto::login_hash(&nonce, password),
            nonce,
            user_data: [0; 24],
        }
    }

    #[test]
    fn accepts_correct_password_and_assigns_static_id() {
        let store = InMemoryCredentialStore::new();
        let user = UserId::new(2, 5, 1);
        store.insert(
            user,
            CredentialRecord {
                password_hash: *b"correct-horse-battery-staple!!!",
                max_instances: 3,
                ip_binding: None,
                is_c2s_node: false,
            },
        );
        let registry = UserRegistry::new();
        let dynamic_ids = DynamicIdAllocator::new();
        let nonce = [1, 2, 3, 4, 5, 6, 7, 8];
        let request = req(user, b"correct-horse-battery-staple!!!", nonce);

        let outcome =
            evaluate_login(&request, Ipv4Addr::new(10, 0, 0, 1), &store, &registry, &dynamic_ids)
                .unwrap();
        assert_eq!(outcome.assigned_user, user);
    }

    #[test]
    fn rejects_wrong_password() {
        let store = InMemoryCredentialStore::new();
        let user = UserId::new(2, 5, 1);
        store.insert(
            user,
            CredentialRecord {
                password_hash: [0u8; 32],
                max_instances: 3,
                ip_binding: None,
                is_c2s_node: false,
            },
        );
        let registry = UserRegistry::new();
        let dynamic_ids = DynamicIdAllocator::new();
        let nonce = [1, 2, 3, 4, 5, 6, 7, 8];
        let request = req(user, b"wrong", nonce);

        let err =
            evaluate_login(&request, Ipv4Addr::new(10, 0, 0, 1), &store, &registry, &dynamic_ids)
                .unwrap_err();
        assert!(matches!(err, ProNetError::AuthFailed(AuthFailureReason::WrongPassword)));
    }

    #[test]
    fn rejects_ip_binding_mismatch() {
        let store = InMemoryCredentialStore::new();
        let user = UserId::new(2, 5, 1);
        store.insert(
            user,
            CredentialRecord {
                password_hash: *b"correct-horse-battery-staple!!!",
                max_instances: 3,
                ip_binding: Some(Ipv4Addr::new(10, 0, 0, 1)),
                is_c2s_node: false,
            },
        );
        let registry = UserRegistry::new();
        let dynamic_ids = DynamicIdAllocator::new();
        let nonce = [9; 8];
        let request = req(user, b"correct-horse-battery-staple!!!", nonce);

        let err =
            evaluate_login(&request, Ipv4Addr::new(10, 0, 0, 2), &store, &registry, &dynamic_ids)
                .unwrap_err();
        assert!(matches!(err, ProNetError::AuthFailed(AuthFailureReason::IpMismatch)));
    }

    #[test]
    fn assigns_a_dynamic_id_when_requested() {
        let store = InMemoryCredentialStore::new();
        let registry = UserRegistry::new();
        let dynamic_ids = DynamicIdAllocator::new();
        let nonce = [3; 8];

        // The allocator hands out DYNAMIC_ID_MIN on the first call in a
        // fresh registry, so the credential can be pre-registered under it.
        let stand_in_password = [7u8; 32];
        let assigned = UserId::new(2, libpronet_proto::DYNAMIC_ID_MIN, 0);
        store.insert(
            assigned,
            CredentialRecord {
                password_hash: stand_in_password,
                max_instances: 1,
                ip_binding: None,
                is_c2s_node: false,
            },
        );

        let request = LoginRequest {
            user: UserId::new(2, 0, 0),
            password_hash: libpronet_proto::login_hash(&nonce, &stand_in_password),
            nonce,
            user_data: [0; 24],
        };

        let outcome =
            evaluate_login(&request, Ipv4Addr::new(10, 0, 0, 1), &store, &registry, &dynamic_ids)
                .unwrap();
        assert_eq!(outcome.assigned_user, assigned);
        assert!(outcome.assigned_user.is_dynamic_range());
    }
}
