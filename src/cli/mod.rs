//! Utilities for the Command Line Interface (CLI)
//! that represents a Chord node.

use std::env;
use std::net::Ipv4Addr;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArgsError {
    #[error("too many arguments (usage: program [bootstrap_ip])")]
    TooMany,
    #[error("'{0}' is not a valid IPv4 address")]
    InvalidAddr(String),
}

/// The program's only argument: an optional bootstrap peer address.
/// With no argument, the peer runs LAN discovery and becomes the first
/// node if nothing answers; with `bootstrap_ip`, it skips discovery and
/// joins that peer directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Args {
    bootstrap_ip: Option<Ipv4Addr>,
}

impl Args {
    /// Parses `std::env::args()`, ignoring argv[0].
    pub fn parse() -> Result<Self, ArgsError> {
        let mut args = env::args().skip(1);

        let bootstrap_ip = match args.next() {
            Some(arg) => Some(
                arg.parse::<Ipv4Addr>()
                    .map_err(|_| ArgsError::InvalidAddr(arg))?,
            ),
            None => None,
        };

        if args.next().is_some() {
            return Err(ArgsError::TooMany);
        }

        Ok(Self { bootstrap_ip })
    }

    pub fn bootstrap_ip(&self) -> Option<Ipv4Addr> {
        self.bootstrap_ip
    }
}
