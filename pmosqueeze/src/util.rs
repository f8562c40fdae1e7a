use std::net::UdpSocket;
use std::time::Instant;

use once_cell::sync::Lazy;

static EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Milliseconds since process start, wrapping like the protocol's jiffies
/// counter. Comparisons must use `wrapping_sub`.
pub fn gettime_ms() -> u32 {
    EPOCH.elapsed().as_millis() as u32
}

/// Best-effort local IPv4, used to build the bridge URL handed to the
/// hardware player.
pub fn guess_local_ip() -> String {
    // On tente de deviner l'IP locale via une socket UDP non connectée
    match UdpSocket::bind("0.0.0.0:0") {
        Ok(socket) => {
            if socket.connect("8.8.8.8:80").is_ok() {
                if let Ok(local_addr) = socket.local_addr() {
                    return local_addr.ip().to_string();
                }
            }
            "127.0.0.1".to_string()
        }
        Err(_) => "127.0.0.1".to_string(),
    }
}
