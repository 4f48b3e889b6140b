//! The single-threaded cooperative driver: one iteration interleaves
//! inbound dispatch, join retry, and a periodic stabilize tick. All
//! ring-state mutation happens here or inside the handlers it calls;
//! nothing else touches `RingState`, so no lock is needed around it.

use std::io;
use std::net::{SocketAddr, SocketAddrV4, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use super::protocol::Message;
use super::rpc::{self, CERT_TIMEOUT, JOIN_TIMEOUT, MAINTENANCE_TIMEOUT};
use super::{request_handler, RingState};

/// Bound on each Phase A inbound wait.
const INBOUND_WAIT: Duration = Duration::from_millis(20);
/// Minimum spacing between join attempts while alone.
const JOIN_RETRY_INTERVAL: Duration = Duration::from_secs(2);
/// Minimum spacing between stabilize ticks.
const STABILIZE_INTERVAL: Duration = Duration::from_millis(200);

/// Runs the maintenance loop until `running` is cleared, then performs
/// an optional graceful leave and returns. `listener` must already be
/// in non-blocking mode.
pub fn run(
    listener: &TcpListener,
    state: &mut RingState,
    bootstrap: Option<SocketAddrV4>,
    running: &AtomicBool,
) {
    let mut last_join_attempt = Instant::now() - JOIN_RETRY_INTERVAL;
    let mut last_stabilize = Instant::now() - STABILIZE_INTERVAL;

    while running.load(Ordering::SeqCst) {
        phase_a_inbound(listener, state);

        let now = Instant::now();

        if now.duration_since(last_join_attempt) >= JOIN_RETRY_INTERVAL {
            phase_b_join(state, bootstrap);
            last_join_attempt = now;
        }

        if now.duration_since(last_stabilize) >= STABILIZE_INTERVAL {
            phase_c_stabilize(state);
            last_stabilize = now;
        }
    }

    graceful_leave(state);
}

/// Waits up to `INBOUND_WAIT` for one incoming connection, reads a
/// single framed packet from it, dispatches it, and closes the
/// connection. A framing error or I/O failure on an accepted
/// connection is logged and the connection dropped; it never mutates
/// state and never brings down the loop.
fn phase_a_inbound(listener: &TcpListener, state: &mut RingState) {
    let Some(mut stream) = accept_with_timeout(listener, INBOUND_WAIT) else {
        return;
    };

    if let Err(err) = handle_connection(&mut stream, state) {
        warn!("inbound exchange failed: {}", err);
    }
}

fn handle_connection(stream: &mut TcpStream, state: &mut RingState) -> io::Result<()> {
    let request = Message::read_from(stream).map_err(|err| {
        io::Error::new(io::ErrorKind::InvalidData, err.to_string())
    })?;

    if let Some(response) = request_handler::dispatch(state, request) {
        response
            .write_to(stream)
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err.to_string()))?;
    }

    Ok(())
}

fn accept_with_timeout(listener: &TcpListener, timeout: Duration) -> Option<TcpStream> {
    let deadline = Instant::now() + timeout;

    loop {
        match listener.accept() {
            Ok((stream, _)) => return Some(stream),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                if Instant::now() >= deadline {
                    return None;
                }
                thread::sleep(Duration::from_millis(2));
            }
            Err(_) => return None,
        }
    }
}

/// If alone and a bootstrap address is configured, retries
/// `FIND_SUCCESSOR(self)` against it; on success, adopts the response as
/// successor and fetches its certificate.
fn phase_b_join(state: &mut RingState, bootstrap: Option<SocketAddrV4>) {
    let Some(bootstrap) = bootstrap else {
        return;
    };

    if !state.is_alone() {
        return;
    }

    let bootstrap_addr = SocketAddr::V4(bootstrap);
    let self_id = state.self_node().id;

    let Some(successor) = rpc::find_successor(bootstrap_addr, self_id, JOIN_TIMEOUT) else {
        return;
    };

    info!("join: successor found at {:?}", successor.socket_addr());
    state.set_successor(successor);

    if let Some(cert) = rpc::get_cert(successor.socket_addr(), CERT_TIMEOUT) {
        state.set_certificate(cert);
    }
}

/// One stabilize tick.
fn phase_c_stabilize(state: &mut RingState) {
    let self_id = state.self_node().id;
    let successor = state.successor();

    if successor.id == self_id {
        if let Some(predecessor) = state.predecessor() {
            if predecessor.id != self_id {
                info!(
                    "promoting predecessor {:02x} to successor",
                    predecessor.id.tiny()
                );
                state.set_successor(predecessor);
            }
        }
        return;
    }

    match rpc::get_predecessor(successor.socket_addr(), MAINTENANCE_TIMEOUT) {
        None => {
            warn!("successor {:02x} unreachable, failing over", successor.id.tiny());
            state.handle_successor_failure();
            return;
        }
        Some(Some(candidate)) => state.handle_stabilize_response(candidate),
        Some(None) => (),
    }

    let current_successor = state.successor();

    if let Some(list) = rpc::get_successor_list(current_successor.socket_addr(), MAINTENANCE_TIMEOUT) {
        state.update_successor_list(&list);
    }

    debug!(
        "stabilize tick complete, successor is {:02x}",
        current_successor.id.tiny()
    );

    rpc::notify(current_successor.socket_addr(), state.self_node(), MAINTENANCE_TIMEOUT);
}

/// Optional graceful departure: hands the ring off to the immediate
/// neighbors before the process exits, so there is no failover delay
/// for them to absorb.
fn graceful_leave(state: &RingState) {
    let self_id = state.self_node().id;
    let predecessor = state.predecessor();
    let successor = state.successor();

    if let Some(predecessor) = predecessor {
        if predecessor.id != self_id {
            rpc::set_successor(predecessor.socket_addr(), successor, MAINTENANCE_TIMEOUT);
        }
    }

    if successor.id != self_id {
        if let Some(predecessor) = predecessor {
            rpc::set_predecessor(successor.socket_addr(), predecessor, MAINTENANCE_TIMEOUT);
        }
    }

    info!("graceful leave complete");
}
