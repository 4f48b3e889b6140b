//! LAN broadcast discovery, used only to locate a bootstrap peer when
//! none is given on the command line. Its only contract with the rest
//! of the program is "returns zero or one peer address reachable on
//! the overlay port". It never touches ring membership state.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{info, trace, warn};

const DISCOVERY_MAGIC: u32 = 0x5043_4844;
const PACKET_LEN: usize = 8;

fn encode(sender_id: u32) -> [u8; PACKET_LEN] {
    let mut buf = [0u8; PACKET_LEN];
    buf[0..4].copy_from_slice(&DISCOVERY_MAGIC.to_le_bytes());
    buf[4..8].copy_from_slice(&sender_id.to_le_bytes());
    buf
}

fn decode(buf: &[u8]) -> Option<u32> {
    if buf.len() != PACKET_LEN {
        return None;
    }
    let magic = u32::from_le_bytes(buf[0..4].try_into().unwrap());
    if magic != DISCOVERY_MAGIC {
        return None;
    }
    Some(u32::from_le_bytes(buf[4..8].try_into().unwrap()))
}

/// Spawns a side thread that answers discovery probes on `port` until
/// `running` is cleared. Never touches `RingState`.
pub fn spawn_responder(port: u16, my_id: u32, running: Arc<AtomicBool>) -> JoinHandle<()> {
    thread::spawn(move || {
        let socket = match UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port)) {
            Ok(socket) => socket,
            Err(err) => {
                warn!("discovery responder failed to bind: {}", err);
                return;
            }
        };

        let _ = socket.set_read_timeout(Some(Duration::from_millis(250)));

        let mut buf = [0u8; PACKET_LEN];

        while running.load(Ordering::SeqCst) {
            let (len, from) = match socket.recv_from(&mut buf) {
                Ok(result) => result,
                Err(_) => continue,
            };

            let Some(sender_id) = decode(&buf[..len]) else {
                continue;
            };

            if sender_id == my_id {
                continue;
            }

            let reply = encode(my_id);
            let _ = socket.send_to(&reply, from);
        }
    })
}

/// Broadcasts one discovery probe and waits up to `timeout` for a
/// non-self reply. Returns the IPv4 address of the first peer that
/// answers; replies carrying our own id are loopback and ignored.
pub fn discover_bootstrap(port: u16, my_id: u32, timeout: Duration) -> Option<Ipv4Addr> {
    let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket.set_broadcast(true).ok()?;
    socket.set_read_timeout(Some(timeout)).ok()?;

    let probe = encode(my_id);
    let broadcast_addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::BROADCAST, port));
    socket.send_to(&probe, broadcast_addr).ok()?;

    let mut buf = [0u8; PACKET_LEN];

    loop {
        let (len, from) = socket.recv_from(&mut buf).ok()?;

        let Some(sender_id) = decode(&buf[..len]) else {
            continue;
        };

        if sender_id == my_id {
            trace!("discovery: ignoring our own broadcast (loopback)");
            continue;
        }

        let SocketAddr::V4(from) = from else {
            continue;
        };

        info!("discovery: found neighbor at {}", from.ip());
        return Some(*from.ip());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packet_round_trips() {
        let encoded = encode(42);
        assert_eq!(decode(&encoded), Some(42));
    }

    #[test]
    fn rejects_wrong_magic() {
        let mut buf = encode(42);
        buf[0] ^= 0xFF;
        assert_eq!(decode(&buf), None);
    }

    #[test]
    fn rejects_wrong_length() {
        assert_eq!(decode(&[0u8; 4]), None);
    }
}
