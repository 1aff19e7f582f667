mod error;
mod handshake;
mod identity;
mod session;
mod wire;

pub use error::{AuthFailureReason, ProNetError, TimeoutKind};
pub use handshake::{generate_nonce, login_hash, validate_service_id_reply};
pub use identity::{
    C2S_SIGNAL, CLASS_SERVER, DYNAMIC_ID_MAX, DYNAMIC_ID_MIN, ROOT, STATIC_ID_MAX, STATIC_ID_MIN,
    UserId,
};
pub use session::{
    ClientHandshake, ClientHandshakeState, LoginRequest, ServerHandshake, ServerHandshakeState,
};
pub use wire::{
    AddrField, PROTOCOL_VERSION, RTP_MSG_HEADER0_LEN, RTP_SESSION_INFO_LEN, RtpMsgHeader,
    RtpMsgHeader0, RtpSessionInfo,
};
/// The §4.3 post-handshake XOR premask lives in `libpronet-utils` (it's a
/// generic byte-stream transform, not protocol-specific) and is wired into
/// `libpronet-reactor::TlsStream`; re-exported here since it's part of this
/// crate's session vocabulary.
pub use libpronet_utils::{PREMASK_WINDOW_BYTES, apply_xor_premask};
