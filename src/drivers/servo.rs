use super::DriverError;
use crate::ipc::PositionMailbox;

/// Half-duplex servo bus.
#[allow(async_fn_in_trait)]
pub trait ServoBus {
    type Error: DriverError;

    /// Asks motor `id` for its present position. The reply is handed to
    /// [`PositionMailbox::deliver`], either before this returns or later.
    async fn request_position(
        &mut self,
        id: u8,
        mailbox: &PositionMailbox,
    ) -> Result<(), Self::Error>;

    /// Moves motor `id` to `position` over `span` milliseconds.
    async fn move_time(&mut self, id: u8, position: u16, span: u16) -> Result<(), Self::Error>;

    /// De-energizes motor `id`.
    async fn set_unload(&mut self, id: u8) -> Result<(), Self::Error>;
}
