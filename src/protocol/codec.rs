//! Byte codec for the peer link
//! ===========================================================
//!
//! Little-endian signed integers over any `embedded-io-async` stream. Every
//! field read carries its own bounded wait; a sequence of reads has no overall
//! deadline. Writes are staged and leave the port on [`Codec::flush`], which
//! runs by itself before any wait for inbound bytes.

use core::fmt;

use embassy_time::{with_deadline, Duration, Instant};
use embedded_io_async::{Error as _, ErrorKind, Read, ReadReady, Write};
use heapless::{Deque, Vec};

use crate::config::{RX_BUFFER_SIZE, TX_BUFFER_SIZE};

/* ------------------------------------------------------------------------- */
/*  Error enum                                                               */
/* ------------------------------------------------------------------------- */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CodecError {
    /// Fewer bytes than a field needs arrived before its deadline.
    Timeout { wanted: usize, available: usize },
    Io(ErrorKind),
    /// The stream reported end of file.
    Closed,
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout { wanted, available } => {
                write!(f, "timed out with {available}/{wanted} bytes")
            }
            Self::Io(kind) => write!(f, "stream error: {kind:?}"),
            Self::Closed => f.write_str("stream closed"),
        }
    }
}

/* ------------------------------------------------------------------------- */
/*  Codec                                                                    */
/* ------------------------------------------------------------------------- */
pub struct Codec<P> {
    port: P,
    rx: Deque<u8, RX_BUFFER_SIZE>,
    tx: Vec<u8, TX_BUFFER_SIZE>,
    short_field: Duration,
    long_field: Duration,
}

impl<P> Codec<P>
where
    P: Read + Write + ReadReady,
{
    pub fn new(port: P, short_field: Duration, long_field: Duration) -> Self {
        Self {
            port,
            rx: Deque::new(),
            tx: Vec::new(),
            short_field,
            long_field,
        }
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    pub fn into_inner(self) -> P {
        self.port
    }

    /// Bytes already pulled off the port but not decoded yet.
    pub fn staged(&self) -> usize {
        self.rx.len()
    }

    /* ================= inbound ============================ */

    /// Waits until `n` bytes are staged or `timeout` elapses and reports how
    /// many are staged. Running out of time is not an error here; the field
    /// readers turn a short count into [`CodecError::Timeout`].
    pub async fn wait_for_available(
        &mut self,
        n: usize,
        timeout: Duration,
    ) -> Result<usize, CodecError> {
        self.flush().await?;
        let deadline = Instant::now() + timeout;
        let mut chunk = [0u8; RX_BUFFER_SIZE];

        while self.rx.len() < n {
            let room = self.rx.capacity() - self.rx.len();
            if room == 0 {
                break;
            }
            match with_deadline(deadline, self.port.read(&mut chunk[..room])).await {
                Ok(Ok(0)) => return Err(CodecError::Closed),
                Ok(Ok(got)) => {
                    for &b in &chunk[..got] {
                        // room was checked above
                        let _ = self.rx.push_back(b);
                    }
                }
                Ok(Err(e)) => return Err(CodecError::Io(e.kind())),
                Err(_) => break,
            }
        }
        Ok(self.rx.len())
    }

    async fn take<const N: usize>(&mut self, timeout: Duration) -> Result<[u8; N], CodecError> {
        let available = self.wait_for_available(N, timeout).await?;
        if available < N {
            return Err(CodecError::Timeout {
                wanted: N,
                available,
            });
        }
        let mut out = [0u8; N];
        for (slot, b) in out.iter_mut().zip(core::iter::from_fn(|| self.rx.pop_front())) {
            *slot = b;
        }
        Ok(out)
    }

    /// One byte if one is already waiting, without blocking.
    pub async fn poll_byte(&mut self) -> Result<Option<u8>, CodecError> {
        if self.rx.is_empty() {
            self.flush().await?;
            if !self.port.read_ready().map_err(|e| CodecError::Io(e.kind()))? {
                return Ok(None);
            }
        }
        self.take::<1>(self.short_field).await.map(|[b]| Some(b))
    }

    /// One raw byte, waiting at most `timeout` for it.
    pub async fn read_u8(&mut self, timeout: Duration) -> Result<u8, CodecError> {
        self.take::<1>(timeout).await.map(|[b]| b)
    }

    pub async fn read_i8(&mut self) -> Result<i8, CodecError> {
        self.take::<1>(self.short_field).await.map(i8::from_le_bytes)
    }

    pub async fn read_i16(&mut self) -> Result<i16, CodecError> {
        self.take::<2>(self.short_field).await.map(i16::from_le_bytes)
    }

    pub async fn read_i32(&mut self) -> Result<i32, CodecError> {
        self.take::<4>(self.long_field).await.map(i32::from_le_bytes)
    }

    /// Drops `n` inbound bytes, each under the short field wait.
    pub async fn skip(&mut self, n: usize) -> Result<(), CodecError> {
        for _ in 0..n {
            self.take::<1>(self.short_field).await?;
        }
        Ok(())
    }

    /* ================= outbound =========================== */

    async fn stage(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        if self.tx.capacity() - self.tx.len() < bytes.len() {
            self.flush().await?;
        }
        if self.tx.extend_from_slice(bytes).is_err() {
            // larger than the whole buffer: write straight through
            self.port
                .write_all(bytes)
                .await
                .map_err(|e| CodecError::Io(e.kind()))?;
            return self.port.flush().await.map_err(|e| CodecError::Io(e.kind()));
        }
        Ok(())
    }

    pub async fn write_u8(&mut self, byte: u8) -> Result<(), CodecError> {
        self.stage(&[byte]).await
    }

    pub async fn write_i8(&mut self, v: i8) -> Result<(), CodecError> {
        self.stage(&v.to_le_bytes()).await
    }

    pub async fn write_i16(&mut self, v: i16) -> Result<(), CodecError> {
        self.stage(&v.to_le_bytes()).await
    }

    pub async fn write_i32(&mut self, v: i32) -> Result<(), CodecError> {
        self.stage(&v.to_le_bytes()).await
    }

    pub async fn flush(&mut self) -> Result<(), CodecError> {
        if self.tx.is_empty() {
            return Ok(());
        }
        self.port
            .write_all(&self.tx)
            .await
            .map_err(|e| CodecError::Io(e.kind()))?;
        self.tx.clear();
        self.port.flush().await.map_err(|e| CodecError::Io(e.kind()))
    }
}
