//! Per-player controller state.

use std::net::{Ipv4Addr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::PlayerConfig;
use crate::model::{PlayerStatus, SharedState};
use crate::pipeline::Collaborators;

/// One-shot wake flag, cleared on observation.
#[derive(Debug, Default)]
pub struct WakeFlag(AtomicBool);

impl WakeFlag {
    pub fn set(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Observe and clear.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

/// CLI sidechannel slot. The protocol itself lives elsewhere; the
/// controller only closes the socket once it has sat idle for too long.
#[derive(Debug, Default)]
pub struct CliSlot {
    pub sock: Mutex<Option<TcpStream>>,
    /// jiffies of the last CLI activity, stamped without the socket lock.
    pub last_activity: AtomicJiffies,
}

#[derive(Debug, Default)]
pub struct AtomicJiffies(std::sync::atomic::AtomicU32);

impl AtomicJiffies {
    pub fn store(&self, v: u32) {
        self.0.store(v, Ordering::Relaxed);
    }
    pub fn load(&self) -> u32 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Everything the controller task owns for one virtual player.
pub struct PlayerContext {
    pub config: PlayerConfig,
    pub mac: [u8; 6],

    // server binding
    pub server_ip: Ipv4Addr,
    pub server_port: u16,
    pub cli_port: u16,
    pub server_version: String,

    // capabilities
    pub fixed_cap: String,
    pub var_cap: String,
    pub new_server_cap: Option<String>,

    // migration + protocol bookkeeping
    pub new_server: Option<Ipv4Addr>,
    pub autostart: u8,
    pub last_command: u8,

    // one-shot status latches, reset on every stream start
    pub can_stmdu: bool,
    pub sent_stmu: bool,
    pub sent_stmo: bool,
    pub sent_stml: bool,
    pub sent_stmd: bool,

    pub status: PlayerStatus,
    pub shared: SharedState,
    pub collab: Collaborators,

    pub running: Arc<AtomicBool>,
    pub wake: Arc<WakeFlag>,
    pub cli: Arc<CliSlot>,

    /// Host part of the bridge URL.
    pub bridge_host: String,
    /// Watchdog: a control connection silent for this long is dead.
    pub server_timeout: Duration,
}

impl PlayerContext {
    pub fn running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Reset the per-track latches; done on every `strm s`.
    pub fn reset_latches(&mut self) {
        self.can_stmdu = false;
        self.sent_stmu = false;
        self.sent_stmo = false;
        self.sent_stml = false;
        self.sent_stmd = false;
    }
}
