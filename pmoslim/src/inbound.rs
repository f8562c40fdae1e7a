//! Messages received from the server, decoded from the payload of a
//! length-prefixed control frame.
//!
//! The first four bytes of every payload are the ASCII opcode; the rest is
//! a fixed structure, sometimes followed by variable data (the HTTP request
//! header of `strm s`, the sync-group id of `serv`). Decoding is fully
//! bounds-checked: a truncated body is an error, never a panic.

use std::net::Ipv4Addr;

use crate::errors::SlimError;

/// Fixed part of a `strm` payload, opcode included.
pub const STRM_FIXED_LEN: usize = 28;

fn need(payload: &[u8], len: usize, opcode: &'static str) -> Result<(), SlimError> {
    if payload.len() < len {
        Err(SlimError::Truncated { opcode, len: payload.len() })
    } else {
        Ok(())
    }
}

fn be32(payload: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([payload[at], payload[at + 1], payload[at + 2], payload[at + 3]])
}

fn be16(payload: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([payload[at], payload[at + 1]])
}

/// `strm` — the playback control packet, one subcommand per variant of its
/// `command` byte (`s`, `t`, `f`, `q`, `p`, `a`, `u`).
#[derive(Debug, Clone)]
pub struct StrmPacket {
    pub command: u8,
    pub autostart: u8,
    pub format: u8,
    pub pcm_sample_size: u8,
    pub pcm_sample_rate: u8,
    pub pcm_channels: u8,
    pub pcm_endianness: u8,
    pub threshold: u8,
    pub spdif_enable: u8,
    pub transition_period: u8,
    pub transition_type: u8,
    pub flags: u8,
    pub output_threshold: u8,
    pub slaves: u8,
    /// Raw bytes: doubles as replay gain, pause interval, unpause time and
    /// the timestamp to echo in `STMt`, depending on the subcommand.
    pub replay_gain: [u8; 4],
    pub server_port: u16,
    pub server_ip: Ipv4Addr,
    /// HTTP request header to open the audio stream with (`strm s` only).
    pub header: Vec<u8>,
}

impl StrmPacket {
    pub fn replay_gain_u32(&self) -> u32 {
        u32::from_be_bytes(self.replay_gain)
    }

    fn decode(payload: &[u8]) -> Result<Self, SlimError> {
        need(payload, STRM_FIXED_LEN, "strm")?;
        Ok(StrmPacket {
            command: payload[4],
            autostart: payload[5],
            format: payload[6],
            pcm_sample_size: payload[7],
            pcm_sample_rate: payload[8],
            pcm_channels: payload[9],
            pcm_endianness: payload[10],
            threshold: payload[11],
            spdif_enable: payload[12],
            transition_period: payload[13],
            transition_type: payload[14],
            flags: payload[15],
            output_threshold: payload[16],
            slaves: payload[17],
            replay_gain: [payload[18], payload[19], payload[20], payload[21]],
            server_port: be16(payload, 22),
            server_ip: Ipv4Addr::new(payload[24], payload[25], payload[26], payload[27]),
            header: payload[STRM_FIXED_LEN..].to_vec(),
        })
    }
}

/// `cont` — go-ahead after a `strm s` with autostart 2/3; carries the ICY
/// meta interval. The loop count is reserved and ignored.
#[derive(Debug, Clone, Copy)]
pub struct ContPacket {
    pub metaint: u32,
    pub loop_count: u8,
}

/// `codc` — codec parameters detected server-side, completing a `strm s`
/// that carried format `?`.
#[derive(Debug, Clone, Copy)]
pub struct CodcPacket {
    pub format: u8,
    pub pcm_sample_size: u8,
    pub pcm_sample_rate: u8,
    pub pcm_channels: u8,
    pub pcm_endianness: u8,
}

/// `aude` — audio output enable.
#[derive(Debug, Clone, Copy)]
pub struct AudePacket {
    pub enable_spdif: bool,
    pub enable_dac: bool,
}

/// `audg` — volume. Only the legacy gain pair and the adjust flag are
/// acted upon.
#[derive(Debug, Clone, Copy)]
pub struct AudgPacket {
    pub old_gain_left: u32,
    pub old_gain_right: u32,
    pub adjust: bool,
    pub preamp: u8,
    pub new_gain_left: u32,
    pub new_gain_right: u32,
}

/// `setd` — player setting query (empty payload) or change.
#[derive(Debug, Clone)]
pub struct SetdPacket {
    pub id: u8,
    pub payload: Vec<u8>,
}

/// `serv` — switch to another server, optionally carrying the 10-byte
/// sync-group id to present to it.
#[derive(Debug, Clone)]
pub struct ServPacket {
    pub server_ip: Ipv4Addr,
    pub sync_group_id: Option<String>,
}

/// A decoded server frame, matched exhaustively by the dispatcher.
#[derive(Debug, Clone)]
pub enum ServerMessage {
    Strm(StrmPacket),
    Cont(ContPacket),
    Codc(CodcPacket),
    Aude(AudePacket),
    Audg(AudgPacket),
    Setd(SetdPacket),
    Serv(ServPacket),
    Ledc,
    Vers(String),
    Unknown([u8; 4]),
}

impl ServerMessage {
    pub fn decode(payload: &[u8]) -> Result<Self, SlimError> {
        if payload.len() < 4 {
            return Err(SlimError::MissingOpcode(payload.len()));
        }
        let opcode: [u8; 4] = [payload[0], payload[1], payload[2], payload[3]];
        match &opcode {
            b"strm" => Ok(ServerMessage::Strm(StrmPacket::decode(payload)?)),
            b"cont" => {
                need(payload, 9, "cont")?;
                Ok(ServerMessage::Cont(ContPacket {
                    metaint: be32(payload, 4),
                    loop_count: payload[8],
                }))
            }
            b"codc" => {
                need(payload, 9, "codc")?;
                Ok(ServerMessage::Codc(CodcPacket {
                    format: payload[4],
                    pcm_sample_size: payload[5],
                    pcm_sample_rate: payload[6],
                    pcm_channels: payload[7],
                    pcm_endianness: payload[8],
                }))
            }
            b"aude" => {
                need(payload, 6, "aude")?;
                Ok(ServerMessage::Aude(AudePacket {
                    enable_spdif: payload[4] != 0,
                    enable_dac: payload[5] != 0,
                }))
            }
            b"audg" => {
                need(payload, 22, "audg")?;
                Ok(ServerMessage::Audg(AudgPacket {
                    old_gain_left: be32(payload, 4),
                    old_gain_right: be32(payload, 8),
                    adjust: payload[12] != 0,
                    preamp: payload[13],
                    new_gain_left: be32(payload, 14),
                    new_gain_right: be32(payload, 18),
                }))
            }
            b"setd" => {
                need(payload, 5, "setd")?;
                Ok(ServerMessage::Setd(SetdPacket {
                    id: payload[4],
                    payload: payload[5..].to_vec(),
                }))
            }
            b"serv" => {
                need(payload, 8, "serv")?;
                let sync_group_id = if payload.len() - 8 == 10 {
                    Some(String::from_utf8_lossy(&payload[8..18]).into_owned())
                } else {
                    None
                };
                Ok(ServerMessage::Serv(ServPacket {
                    server_ip: Ipv4Addr::new(payload[4], payload[5], payload[6], payload[7]),
                    sync_group_id,
                }))
            }
            b"ledc" => Ok(ServerMessage::Ledc),
            b"vers" => {
                let version = String::from_utf8_lossy(&payload[4..])
                    .trim_end_matches('\0')
                    .to_string();
                Ok(ServerMessage::Vers(version))
            }
            _ => Ok(ServerMessage::Unknown(opcode)),
        }
    }
}
