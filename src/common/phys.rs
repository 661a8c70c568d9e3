use std::fmt::Write;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::decode::PhysDecodeLevel;

pub(crate) struct PhysLayer {
    socket: TcpStream,
    level: PhysDecodeLevel,
}

impl std::fmt::Debug for PhysLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str("Tcp")
    }
}

impl PhysLayer {
    pub(crate) fn new_tcp(socket: TcpStream, level: PhysDecodeLevel) -> Self {
        Self { socket, level }
    }

    pub(crate) async fn read(&mut self, buffer: &mut [u8]) -> Result<usize, std::io::Error> {
        let length = self.socket.read(buffer).await?;

        if self.level.enabled() {
            if let Some(x) = buffer.get(0..length) {
                tracing::info!("PHYS RX - {}", PhysDisplay::new(self.level, x))
            }
        }

        Ok(length)
    }

    /// Whether the peer has shut the stream down since the last exchange.
    ///
    /// A readable socket between transactions means EOF or unsolicited data,
    /// either of which invalidates the framing, so both count as dead.
    pub(crate) fn is_peer_shutdown(&self) -> bool {
        let mut buffer = [0u8; 1];
        match self.socket.try_read(&mut buffer) {
            Ok(_) => true,
            Err(err) => err.kind() != std::io::ErrorKind::WouldBlock,
        }
    }

    pub(crate) async fn write(&mut self, data: &[u8]) -> Result<(), std::io::Error> {
        if self.level.enabled() {
            tracing::info!("PHYS TX - {}", PhysDisplay::new(self.level, data));
        }

        self.socket.write_all(data).await
    }
}

pub(crate) struct PhysDisplay<'a> {
    level: PhysDecodeLevel,
    data: &'a [u8],
}

impl<'a> PhysDisplay<'a> {
    pub(crate) fn new(level: PhysDecodeLevel, data: &'a [u8]) -> Self {
        PhysDisplay { level, data }
    }
}

impl std::fmt::Display for PhysDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{} bytes", self.data.len())?;
        if self.level.data_enabled() {
            format_bytes(f, self.data)?;
        }
        Ok(())
    }
}

const BYTES_PER_DECODE_LINE: usize = 18;

pub(crate) fn format_bytes(f: &mut std::fmt::Formatter, bytes: &[u8]) -> std::fmt::Result {
    for chunk in bytes.chunks(BYTES_PER_DECODE_LINE) {
        writeln!(f)?;
        let mut first = true;
        for byte in chunk {
            if !first {
                f.write_char(' ')?;
            }
            first = false;
            write!(f, "{byte:02X?}")?;
        }
    }
    Ok(())
}
