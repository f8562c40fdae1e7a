//! Length-prefixed framing for the TCP control channel.
//!
//! Server frames arrive as a `u16` big-endian length followed by that many
//! payload bytes. [`FrameReader`] drives the two-phase read incrementally,
//! so the caller can keep a read timeout on the socket and interleave
//! status work between partial reads.

use std::io::{ErrorKind, Read, Write};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::errors::SlimError;

/// Control frames larger than this are a protocol violation and fatal.
pub const MAX_FRAME: usize = 4096;

const SEND_RETRIES: u32 = 10;

/// Outcome of one [`FrameReader::poll_frame`] call.
#[derive(Debug)]
pub enum FrameEvent {
    /// A complete frame payload (opcode + body, length prefix stripped).
    Frame(Vec<u8>),
    /// Nothing more to read right now.
    Pending,
    /// The peer closed the connection.
    Closed,
}

/// Incremental reader for server control frames.
#[derive(Debug, Default)]
pub struct FrameReader {
    len_buf: [u8; 2],
    len_got: usize,
    body: Vec<u8>,
    expect: usize,
}

impl FrameReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read as much as currently available; returns the first complete
    /// frame, or `Pending` on a would-block/timeout, or `Closed` on EOF.
    pub fn poll_frame<R: Read>(&mut self, r: &mut R) -> Result<FrameEvent, SlimError> {
        loop {
            if self.expect == 0 {
                // phase A: the 2-byte length prefix
                match r.read(&mut self.len_buf[self.len_got..2]) {
                    Ok(0) => return Ok(FrameEvent::Closed),
                    Ok(n) => {
                        self.len_got += n;
                        if self.len_got == 2 {
                            self.expect = u16::from_be_bytes(self.len_buf) as usize;
                            self.len_got = 0;
                            if self.expect > MAX_FRAME {
                                return Err(SlimError::FrameTooBig(self.expect));
                            }
                            self.body.clear();
                        }
                    }
                    Err(e) => return map_read_err(e),
                }
            } else {
                // phase B: the payload
                let got = self.body.len();
                let mut chunk = vec![0u8; self.expect - got];
                match r.read(&mut chunk) {
                    Ok(0) => return Ok(FrameEvent::Closed),
                    Ok(n) => {
                        self.body.extend_from_slice(&chunk[..n]);
                        if self.body.len() == self.expect {
                            self.expect = 0;
                            return Ok(FrameEvent::Frame(std::mem::take(&mut self.body)));
                        }
                    }
                    Err(e) => return map_read_err(e),
                }
            }
        }
    }
}

fn map_read_err(e: std::io::Error) -> Result<FrameEvent, SlimError> {
    match e.kind() {
        ErrorKind::WouldBlock | ErrorKind::TimedOut => Ok(FrameEvent::Pending),
        ErrorKind::Interrupted => Ok(FrameEvent::Pending),
        _ => Err(SlimError::Io(e)),
    }
}

/// Write a full packet, retrying short and would-block writes.
///
/// A frame that cannot be sent is dropped with a warning; the control loop
/// notices a dead socket on the read side and reconnects.
pub fn send_packet<W: Write>(w: &mut W, packet: &[u8]) {
    let mut sent = 0;
    let mut tries = 0;
    while sent < packet.len() {
        match w.write(&packet[sent..]) {
            Ok(0) => {
                warn!("failed writing to socket: wrote 0 bytes");
                return;
            }
            Ok(n) => sent += n,
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                tries += 1;
                if tries >= SEND_RETRIES {
                    warn!("dropping packet after {} send retries", tries);
                    return;
                }
                debug!("retrying ({}) writing to socket", tries);
                thread::sleep(Duration::from_millis(1));
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => {
                warn!("failed writing to socket: {}", e);
                return;
            }
        }
    }
}
