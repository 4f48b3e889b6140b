//! The RPC layer: one request/response exchange per connection, bounded
//! by a per-call timeout. Every public function here collapses every
//! failure mode, connect refused, timeout, short read, framing
//! mismatch, broken pipe, into a single `None`/`false` signal: the
//! caller treats the exchange as peer unreachable for this attempt.
//! There is no retry here; retry policy lives in the maintenance loop.

use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use log::trace;

use super::protocol::Message;
use super::{Id, NodeDescriptor, SUCCESSOR_LIST_LEN};

/// Default timeout for maintenance RPCs (stabilize, failure detection).
pub const MAINTENANCE_TIMEOUT: Duration = Duration::from_millis(200);
/// Timeout for the initial join handshake.
pub const JOIN_TIMEOUT: Duration = Duration::from_secs(1);
/// Timeout for the post-join certificate fetch.
pub const CERT_TIMEOUT: Duration = Duration::from_millis(500);

fn connect(addr: SocketAddr, timeout: Duration) -> Option<TcpStream> {
    let stream = TcpStream::connect_timeout(&addr, timeout).ok()?;
    stream.set_read_timeout(Some(timeout)).ok()?;
    stream.set_write_timeout(Some(timeout)).ok()?;
    Some(stream)
}

/// Connects, sends one request, reads exactly one response, closes.
/// Any failure along the way, including a peer that resets the
/// connection mid-write, which surfaces as a broken-pipe I/O error,
/// is folded into `None`, not propagated.
fn call(addr: SocketAddr, request: &Message, timeout: Duration) -> Option<Message> {
    let mut stream = connect(addr, timeout)?;
    request.write_to(&mut stream).ok()?;
    let response = Message::read_from(&mut stream).ok();
    if response.is_none() {
        trace!("rpc to {} failed or returned a malformed response", addr);
    }
    response
}

/// Connects and sends one request without waiting for a reply. Used
/// for `NOTIFY`, which has no response by design.
fn send_only(addr: SocketAddr, request: &Message, timeout: Duration) -> bool {
    let stream = connect(addr, timeout);
    match stream {
        Some(mut stream) => request.write_to(&mut stream).is_ok(),
        None => false,
    }
}

/// `FIND_SUCCESSOR(target)` against `addr`.
pub fn find_successor(addr: SocketAddr, target: Id, timeout: Duration) -> Option<NodeDescriptor> {
    match call(addr, &Message::FindSuccessor { target }, timeout)? {
        Message::FindSuccessorResponse(node) => Some(node),
        _ => None,
    }
}

/// `GET_PREDECESSOR` against `addr`. Outer `None` means the RPC itself
/// failed (peer unreachable); `Some(None)` means the peer answered with
/// an empty body, i.e. it has no predecessor.
pub fn get_predecessor(addr: SocketAddr, timeout: Duration) -> Option<Option<NodeDescriptor>> {
    match call(addr, &Message::GetPredecessor, timeout)? {
        Message::GetPredecessorResponse(predecessor) => Some(predecessor),
        _ => None,
    }
}

/// `GET_SUCLIST` against `addr`.
pub fn get_successor_list(
    addr: SocketAddr,
    timeout: Duration,
) -> Option<[NodeDescriptor; SUCCESSOR_LIST_LEN]> {
    match call(addr, &Message::GetSuclist, timeout)? {
        Message::GetSuclistResponse(nodes) => Some(nodes),
        _ => None,
    }
}

/// `GET_CERT` against `addr`.
pub fn get_cert(addr: SocketAddr, timeout: Duration) -> Option<Vec<u8>> {
    match call(addr, &Message::GetCert, timeout)? {
        Message::CertResponse(data) => Some(data),
        _ => None,
    }
}

/// Fire-and-forget `NOTIFY(self_node)` to `addr`.
pub fn notify(addr: SocketAddr, self_node: NodeDescriptor, timeout: Duration) -> bool {
    send_only(addr, &Message::Notify(self_node), timeout)
}

/// `SET_SUCCESSOR(x)` to `addr`, used during graceful leave.
pub fn set_successor(addr: SocketAddr, x: NodeDescriptor, timeout: Duration) -> bool {
    send_only(addr, &Message::SetSuccessor(x), timeout)
}

/// `SET_PREDECESSOR(x)` to `addr`, used during graceful leave.
pub fn set_predecessor(addr: SocketAddr, x: NodeDescriptor, timeout: Duration) -> bool {
    send_only(addr, &Message::SetPredecessor(x), timeout)
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, TcpListener};
    use std::thread;

    use super::*;
    use crate::chord::ID_BYTE_LEN;

    fn node(last: u8, port: u16) -> NodeDescriptor {
        let mut bytes = [0u8; ID_BYTE_LEN];
        bytes[ID_BYTE_LEN - 1] = last;
        NodeDescriptor::new(Id::from_bytes(bytes), Ipv4Addr::new(127, 0, 0, 1), port)
    }

    #[test]
    fn find_successor_round_trips_over_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let reply = node(42, 6000);

        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            match Message::read_from(&mut stream).unwrap() {
                Message::FindSuccessor { .. } => {
                    Message::FindSuccessorResponse(reply).write_to(&mut stream).unwrap();
                }
                other => panic!("unexpected request: {:?}", other),
            }
        });

        let result = find_successor(addr, Id::ZERO, Duration::from_millis(500));
        server.join().unwrap();

        assert_eq!(result, Some(reply));
    }

    #[test]
    fn notify_is_fire_and_forget() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let sender = node(7, 6001);

        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            match Message::read_from(&mut stream).unwrap() {
                Message::Notify(received) => received,
                other => panic!("unexpected request: {:?}", other),
            }
        });

        assert!(notify(addr, sender, Duration::from_millis(500)));
        let received = server.join().unwrap();
        assert_eq!(received, sender);
    }

    #[test]
    fn unreachable_peer_is_none_not_panic() {
        // Nothing is listening on this ephemeral port.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = find_successor(addr, Id::ZERO, Duration::from_millis(200));
        assert_eq!(result, None);
    }
}
