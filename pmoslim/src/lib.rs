//! Support for the SlimProto control protocol spoken by Logitech Media
//! Server (LMS) and its players.
//!
//! The crate covers the protocol layer only:
//!
//! * [`outbound`] — messages a player sends to the server (`HELO`, `STAT`,
//!   `DSCO`, `RESP`, `META`, `SETD`), each with an explicit big-endian
//!   `encode()`.
//! * [`inbound`] — messages the server sends to a player, decoded into the
//!   [`ServerMessage`] enum (`strm`, `cont`, `codc`, `aude`, `audg`,
//!   `setd`, `serv`, `ledc`, `vers`).
//! * [`framing`] — the length-prefixed frame reader for the TCP control
//!   channel and the retrying packet sender.
//! * [`discovery`] — the UDP broadcast probe locating an LMS instance on
//!   the LAN.
//!
//! Playback state lives one level up, in `pmosqueeze`; nothing in this
//! crate is stateful beyond a partially read frame.

pub mod discovery;
mod errors;
pub mod framing;
pub mod inbound;
pub mod outbound;

pub use discovery::{discover, ServerInfo, DEFAULT_CLI_PORT};
pub use errors::SlimError;
pub use framing::{send_packet, FrameEvent, FrameReader, MAX_FRAME};
pub use inbound::ServerMessage;

/// UDP discovery and default TCP control port of LMS.
pub const SLIMPROTO_PORT: u16 = 3483;

/// Capability string common to every player this crate impersonates.
pub const BASE_CAP: &str =
    "Model=squeezelite,ModelName=SqueezeLite,AccuratePlayPoints=0,HasDigitalOut=1";
