//! Device side of the frame protocol
//!
//! [`FrameServer`] unwraps frames arriving on a byte stream and forwards the
//! payloads to any [`Transport`]. Serving the emulator over TCP lets the
//! serial backend be exercised without hardware.

use crate::error::Result;
use crate::protocol::*;
use cartflash_core::Transport;
use std::io::{ErrorKind, Read, Write};
use std::net::TcpListener;

/// Frame server wrapping a transport
pub struct FrameServer<T: Transport> {
    transport: T,
    frames: usize,
}

impl<T: Transport> FrameServer<T> {
    /// Serve frames into `transport`
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            frames: 0,
        }
    }

    /// Wrapped transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Number of payload frames handled so far
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Give back the wrapped transport
    pub fn into_inner(self) -> T {
        self.transport
    }

    /// Handle frames from `stream` until the peer closes it
    pub fn serve<S: Read + Write>(&mut self, stream: &mut S) -> Result<()> {
        loop {
            let mut frame = [0u8];
            match stream.read_exact(&mut frame) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(()),
                Err(e) => return Err(e.into()),
            }
            match frame[0] {
                FRAME_SYNC => stream.write_all(&[ACK])?,
                FRAME_MAX_LEN => {
                    let max = self.transport.max_transfer_len().min(MAX_FRAME_PAYLOAD) as u16;
                    stream.write_all(&[ACK])?;
                    stream.write_all(&max.to_le_bytes())?;
                }
                f @ (FRAME_DUPLEX | FRAME_WRITE) => {
                    let mut len = [0u8; 2];
                    stream.read_exact(&mut len)?;
                    let mut payload = vec![0u8; u16::from_le_bytes(len) as usize];
                    stream.read_exact(&mut payload)?;
                    self.frames += 1;
                    let result = if f == FRAME_DUPLEX {
                        self.transport.write_then_read(&payload)
                    } else {
                        self.transport.write_only(&payload).map(|()| Vec::new())
                    };
                    match result {
                        Ok(reply) => {
                            stream.write_all(&[ACK])?;
                            stream.write_all(&reply)?;
                        }
                        Err(e) => {
                            log::warn!("serve: frame rejected: {}", e);
                            stream.write_all(&[NAK])?;
                        }
                    }
                }
                other => {
                    log::warn!("serve: unknown frame type 0x{:02X}", other);
                    stream.write_all(&[NAK])?;
                }
            }
            stream.flush()?;
        }
    }

    /// Accept TCP clients one at a time and serve each until it disconnects
    pub fn listen(&mut self, listener: &TcpListener) -> Result<()> {
        log::info!("Serving frames on {}", listener.local_addr()?);
        for stream in listener.incoming() {
            let mut stream = stream?;
            stream.set_nodelay(true)?;
            log::info!("Client connected from {}", stream.peer_addr()?);
            if let Err(e) = self.serve(&mut stream) {
                log::warn!("Client session ended with error: {}", e);
            } else {
                log::info!("Client disconnected");
            }
        }
        Ok(())
    }
}
