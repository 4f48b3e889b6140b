//! Entry point for a Chord overlay peer: wires the ring state, the
//! listening socket, the optional LAN discovery bootstrap, and the
//! maintenance loop together, then blocks until shutdown.

use std::net::{Ipv4Addr, SocketAddrV4, TcpListener};
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use rand::Rng;
use socket2::{Domain, Socket, Type};
use thiserror::Error;

use chord_node::chord::{maintenance, Id, NodeDescriptor, RingState};
use chord_node::cli;
use chord_node::discovery;

/// Fixed overlay listening port: not a CLI argument.
const CHORD_PORT: u16 = 5000;
/// Fixed LAN discovery port.
const DISCOVERY_PORT: u16 = 5001;
/// How long to wait for a discovery reply before concluding this peer
/// is alone on the subnet.
const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(2);
/// Placeholder certificate content manufactured by the first node of a
/// ring: an opaque attachment with no trust meaning.
const ROOT_PLACEHOLDER_CERT: &[u8] = b"TRUST-ME-I-AM-ROOT";

#[derive(Debug, Error)]
enum StartupError {
    #[error("cannot bind overlay listener on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid command-line arguments: {0}")]
    Args(#[from] cli::ArgsError),
}

fn main() {
    simple_logger::SimpleLogger::new()
        .env()
        .init()
        .expect("logger can only be installed once");

    if let Err(err) = run() {
        error!("{}", err);
        process::exit(1);
    }
}

fn run() -> Result<(), StartupError> {
    let args = cli::Args::parse()?;

    let local_ip = local_ip_address::local_ip()
        .ok()
        .and_then(|addr| match addr {
            std::net::IpAddr::V4(v4) => Some(v4),
            std::net::IpAddr::V6(_) => None,
        })
        .unwrap_or_else(|| {
            warn!("could not determine local IPv4 address, falling back to loopback");
            Ipv4Addr::LOCALHOST
        });

    let self_addr = SocketAddrV4::new(local_ip, CHORD_PORT);
    let self_id = Id::from_addr(self_addr);
    let self_node = NodeDescriptor::from_socket_addr(self_id, self_addr);

    info!(
        "starting node {:02x} ({}) at {}:{}",
        self_id.tiny(),
        self_id.to_hex(),
        local_ip,
        CHORD_PORT
    );

    let listener = bind_listener(self_addr)?;
    listener
        .set_nonblocking(true)
        .map_err(|source| StartupError::Bind {
            port: CHORD_PORT,
            source,
        })?;

    let mut state = RingState::new(self_node);

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || running.store(false, Ordering::SeqCst))
            .expect("failed to install signal handler");
    }

    let discovery_id: u32 = rand::rng().random();
    let responder_handle =
        discovery::spawn_responder(DISCOVERY_PORT, discovery_id, Arc::clone(&running));

    let bootstrap = resolve_bootstrap(args.bootstrap_ip(), discovery_id, &mut state);

    maintenance::run(&listener, &mut state, bootstrap, &running);

    running.store(false, Ordering::SeqCst);
    let _ = responder_handle.join();

    info!("shutdown complete");
    Ok(())
}

/// Binds the fixed overlay port with `SO_REUSEADDR` set before bind.
fn bind_listener(addr: SocketAddrV4) -> Result<TcpListener, StartupError> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, None).map_err(|source| {
        StartupError::Bind {
            port: addr.port(),
            source,
        }
    })?;

    socket
        .set_reuse_address(true)
        .map_err(|source| StartupError::Bind {
            port: addr.port(),
            source,
        })?;

    socket
        .bind(&addr.into())
        .map_err(|source| StartupError::Bind {
            port: addr.port(),
            source,
        })?;

    socket.listen(128).map_err(|source| StartupError::Bind {
        port: addr.port(),
        source,
    })?;

    Ok(socket.into())
}

/// With an explicit bootstrap IP, skips discovery entirely. Otherwise
/// runs LAN discovery after a small random jitter, which desynchronizes
/// simultaneous startups on the same subnet; a peer that finds nobody
/// becomes the first node and manufactures a placeholder certificate.
fn resolve_bootstrap(
    explicit: Option<Ipv4Addr>,
    discovery_id: u32,
    state: &mut RingState,
) -> Option<SocketAddrV4> {
    if let Some(ip) = explicit {
        info!("bootstrap address given on the command line: {}", ip);
        return Some(SocketAddrV4::new(ip, CHORD_PORT));
    }

    let jitter_ms = rand::rng().random_range(0..2000);
    std::thread::sleep(Duration::from_millis(jitter_ms));

    info!("searching for a neighbor via LAN broadcast discovery");
    match discovery::discover_bootstrap(DISCOVERY_PORT, discovery_id, DISCOVERY_TIMEOUT) {
        Some(ip) => Some(SocketAddrV4::new(ip, CHORD_PORT)),
        None => {
            info!("no neighbor found, becoming the first node of the ring");
            state.set_certificate(ROOT_PLACEHOLDER_CERT.to_vec());
            None
        }
    }
}
