use std::fmt::{Debug, Display, Formatter};
use std::net::{SocketAddr, SocketAddrV4, SocketAddrV6};

use anyhow::anyhow;
use bytes::{Buf, BufMut};
use bytes_varint::try_get_fixed::TryGetFixedSupport;


/// A peer's network identity. Peers have no lifecycle beyond their address: ring membership,
///  hop succession and master election are all defined in terms of address equality, and the
///  address is what travels inside the token.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PeerAddr {
    pub socket_addr: SocketAddr,
}

impl Debug for PeerAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.socket_addr)
    }
}
impl Display for PeerAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.socket_addr)
    }
}

impl PeerAddr {
    pub fn ser(&self, buf: &mut impl BufMut) {
        match &self.socket_addr {
            SocketAddr::V4(data) => {
                buf.put_u8(4);
                buf.put_u32(data.ip().to_bits());
                buf.put_u16(data.port());
            }
            SocketAddr::V6(data) => {
                buf.put_u8(6);
                buf.put_u128(data.ip().to_bits());
                buf.put_u16(data.port());
            }
        }
    }

    pub fn try_deser(buf: &mut impl Buf) -> anyhow::Result<PeerAddr> {
        let addr = match buf.try_get_u8()? {
            4 => {
                let ip = buf.try_get_u32()?;
                let port = buf.try_get_u16()?;
                SocketAddr::V4(SocketAddrV4::new(ip.into(), port))
            }
            6 => {
                let ip = buf.try_get_u128()?;
                let port = buf.try_get_u16()?;
                SocketAddr::V6(SocketAddrV6::new(ip.into(), port, 0, 0))
            }
            n => {
                return Err(anyhow!("invalid socket address discriminator: {}", n));
            }
        };
        Ok(PeerAddr { socket_addr: addr })
    }
}

impl From<SocketAddr> for PeerAddr {
    fn from(socket_addr: SocketAddr) -> Self {
        PeerAddr { socket_addr }
    }
}
