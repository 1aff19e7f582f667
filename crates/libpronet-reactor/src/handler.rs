use mio::{Token, event::Source};

use crate::Mask;

/// Upcall surface of a registered socket.
///
/// All calls for one [`Token`] are serialized on the single worker thread
/// the handler is bound to for the lifetime of its registration — see
/// [`crate::Reactor::add_handler`].
pub trait Handler: Send {
    fn on_event(&mut self, token: Token, ready: Mask);
}

/// A [`Handler`] that also owns the `mio` registration source for its
/// socket. Unifying the two means a handler's read/write logic runs on the
/// exact object `mio` hands events back for — no separate lookup needed to
/// get from token to socket.
pub trait RegisteredHandler: Handler + Source + Send {}
impl<T: Handler + Source + Send> RegisteredHandler for T {}
