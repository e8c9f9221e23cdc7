use embassy_time::Timer;
use embedded_io_async::{Read, ReadReady, Write};

use super::{Controller, Link, Result};
use crate::drivers::{InertialSensor, LoadCell, ServoBus};
use crate::protocol::{CodecError, Message};

impl<P, B, L, I> Controller<P, B, L, I>
where
    P: Read + Write + ReadReady,
    B: ServoBus,
    L: LoadCell,
    I: InertialSensor,
{
    /// Announces CONNECT until the peer agrees. Retries forever, one
    /// `handshake_retry` wait per attempt.
    pub async fn connect(&mut self) {
        info!("connecting to peer");
        let retry = self.config.timeouts.handshake_retry;
        let mut attempt = 0u32;

        while !self.is_connected() {
            attempt = attempt.wrapping_add(1);
            if let Err(e) = self.announce().await {
                warn!("CONNECT attempt {} not sent: {:?}", attempt, e);
                Timer::after(retry).await;
                continue;
            }
            match self.codec.read_u8(retry).await {
                Ok(op) => {
                    // refusals are already logged and answered
                    let _ = self.handle_message(op).await;
                }
                Err(CodecError::Timeout { .. }) => {
                    trace!("no answer to CONNECT attempt {}", attempt);
                }
                Err(e) => {
                    warn!("link error while connecting: {:?}", e);
                    Timer::after(retry).await;
                }
            }
        }
        info!("connected after {} attempt(s)", attempt);
    }

    async fn announce(&mut self) -> Result<()> {
        self.send(Message::Connect).await?;
        self.codec.flush().await?;
        Ok(())
    }

    pub(super) async fn on_connect(&mut self) -> Result<()> {
        match self.link {
            Link::Disconnected => {
                self.link = Link::Connected;
                info!("link up (peer CONNECT)");
                self.send(Message::Connect).await
            }
            // replying CONNECT again would make both sides loop
            Link::Connected => self.send(Message::AlreadyConnected).await,
        }
    }

    pub(super) fn on_already_connected(&mut self) {
        if self.link == Link::Disconnected {
            info!("link up (peer ALREADY_CONNECTED)");
        }
        self.link = Link::Connected;
    }

    /// Forgets the handshake; the peer must CONNECT again.
    pub fn disconnect(&mut self) {
        if self.link == Link::Connected {
            info!("link down");
        }
        self.link = Link::Disconnected;
    }
}
