//! This module contains utilities that are useful for testing benchmark functionality. They
//!  are used for testing the protocols themselves, but they are also exported for application
//!  testing - most notably the in-memory transport, which lets a whole ring of nodes run
//!  inside a single process.

pub mod memory_transport;

use std::net::{Ipv4Addr, SocketAddrV4};

use crate::transport::peer_addr::PeerAddr;


/// convenience method for unit test code: create a [PeerAddr] based on a number, the same
///  number generating the same address and different numbers different addresses
pub fn test_peer_addr(number: u16) -> PeerAddr {
    PeerAddr {
        socket_addr: SocketAddrV4::new(Ipv4Addr::LOCALHOST, number).into(),
    }
}
