use bitflags::bitflags;

bitflags! {
    /// Interest mask passed to [`crate::Reactor::add_handler`] and reported
    /// back to [`crate::Handler::on_event`].
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct Mask: u8 {
        const ACCEPT    = 0b0000_0001;
        const CONNECT   = 0b0000_0010;
        const READ      = 0b0000_0100;
        const WRITE     = 0b0000_1000;
        const EXCEPTION = 0b0001_0000;
    }
}
