//! transport.rs
//! Packet sources for the ingest loop: "next datagram or timeout, plus elapsed time".
//!
//! `elapsed_ns` is measured from the return of the previous `receive` call (construction for
//! the first call) to the return of this one, so time spent decoding and writing between two
//! receives is still covered by the gap-fill of the next timeout.

use std::{
    io,
    net::{Ipv4Addr, SocketAddrV4, UdpSocket},
    time::Instant,
};

use log::info;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use crate::config::TransportConfig;
use crate::error::TransportError;

/// One receive attempt. `bytes` is empty when nothing arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reception<'a> {
    pub received: bool,
    pub elapsed_ns: u64,
    pub bytes: &'a [u8],
}

pub trait PacketSource {
    /// Blocks for at most the source's timeout.
    fn receive(&mut self) -> Result<Reception<'_>, TransportError>;
}

/// UDP multicast receiver with a read timeout.
pub struct MulticastReceiver {
    socket: UdpSocket,
    buf: Vec<u8>,
    last_return: Instant,
}

impl MulticastReceiver {
    pub fn bind(config: &TransportConfig) -> Result<Self, TransportError> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(TransportError::Socket)?;

        socket.set_reuse_address(true).map_err(TransportError::Socket)?;
        #[cfg(unix)]
        { socket.set_reuse_port(true).ok(); }

        let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, config.port);
        socket.bind(&SockAddr::from(addr)).map_err(TransportError::Socket)?;
        socket
            .join_multicast_v4(&config.group, &config.interface)
            .map_err(TransportError::Socket)?;
        socket
            .set_read_timeout(Some(config.receive_timeout()))
            .map_err(TransportError::Socket)?;

        info!(
            "[Transport] joined {}:{} on {} (timeout {} ms)",
            config.group, config.port, config.interface, config.timeout_ms
        );

        Ok(Self {
            socket: socket.into(),
            buf: vec![0u8; config.max_packet_len],
            last_return: Instant::now(),
        })
    }
}

impl PacketSource for MulticastReceiver {
    fn receive(&mut self) -> Result<Reception<'_>, TransportError> {
        let result = self.socket.recv(&mut self.buf);

        let now = Instant::now();
        let elapsed_ns = now.duration_since(self.last_return).as_nanos() as u64;
        self.last_return = now;

        match result {
            Ok(n) => Ok(Reception {
                received: true,
                elapsed_ns,
                bytes: &self.buf[..n],
            }),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Ok(Reception {
                    received: false,
                    elapsed_ns,
                    bytes: &[],
                })
            }
            Err(e) => Err(TransportError::Receive(e)),
        }
    }
}

/// One scripted receive result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptedReception {
    pub received: bool,
    pub elapsed_ns: u64,
    pub bytes: Vec<u8>,
}

impl ScriptedReception {
    pub fn packet(elapsed_ns: u64, bytes: &[u8]) -> Self {
        Self {
            received: true,
            elapsed_ns,
            bytes: bytes.to_vec(),
        }
    }

    pub fn timeout(elapsed_ns: u64) -> Self {
        Self {
            received: false,
            elapsed_ns,
            bytes: Vec::new(),
        }
    }
}

/// Replays a fixed list of receptions, then reports zero-length timeouts forever.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSource {
    script: Vec<ScriptedReception>,
    next: usize,
}

impl ScriptedSource {
    pub fn new(script: Vec<ScriptedReception>) -> Self {
        Self { script, next: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.script.len() - self.next
    }
}

impl PacketSource for ScriptedSource {
    fn receive(&mut self) -> Result<Reception<'_>, TransportError> {
        match self.script.get(self.next) {
            Some(r) => {
                self.next += 1;
                Ok(Reception {
                    received: r.received,
                    elapsed_ns: r.elapsed_ns,
                    bytes: &r.bytes,
                })
            }
            None => Ok(Reception {
                received: false,
                elapsed_ns: 0,
                bytes: &[],
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_source_replays_in_order() {
        let mut source = ScriptedSource::new(vec![
            ScriptedReception::packet(10, &[1, 2, 3]),
            ScriptedReception::timeout(50_000_000),
        ]);
        assert_eq!(source.remaining(), 2);

        let first = source.receive().unwrap();
        assert!(first.received);
        assert_eq!(first.bytes, &[1, 2, 3]);
        assert_eq!(first.elapsed_ns, 10);

        let second = source.receive().unwrap();
        assert!(!second.received);
        assert!(second.bytes.is_empty());
        assert_eq!(second.elapsed_ns, 50_000_000);

        let exhausted = source.receive().unwrap();
        assert_eq!(
            exhausted,
            Reception {
                received: false,
                elapsed_ns: 0,
                bytes: &[]
            }
        );
        assert_eq!(source.remaining(), 0);
    }
}
