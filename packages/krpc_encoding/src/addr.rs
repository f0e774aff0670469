use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

use byteorder::{BigEndian, ByteOrder};
use serde::{
    de::{self, Visitor},
    Deserialize, Deserializer, Serialize, Serializer,
};

/// A compact peer contact: 6 bytes for IPv4 (4-byte address + 2-byte
/// big-endian port), 18 bytes for IPv6 (16-byte address + 2-byte port).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Addr(SocketAddr);

impl Addr {
    pub fn new(addr: SocketAddr) -> Addr {
        Addr(addr)
    }

    pub fn socket_addr(&self) -> SocketAddr {
        self.0
    }

    pub fn encoded_len(&self) -> usize {
        match self.0 {
            SocketAddr::V4(_) => 6,
            SocketAddr::V6(_) => 18,
        }
    }

    pub fn write_compact(&self, out: &mut Vec<u8>) {
        match self.0 {
            SocketAddr::V4(v4) => {
                out.extend_from_slice(&v4.ip().octets());
                let mut port_buf = [0u8; 2];
                BigEndian::write_u16(&mut port_buf, v4.port());
                out.extend_from_slice(&port_buf);
            }
            SocketAddr::V6(v6) => {
                out.extend_from_slice(&v6.ip().octets());
                let mut port_buf = [0u8; 2];
                BigEndian::write_u16(&mut port_buf, v6.port());
                out.extend_from_slice(&port_buf);
            }
        }
    }

    pub fn read_compact(bytes: &[u8]) -> Option<Addr> {
        match bytes.len() {
            6 => {
                let ip = Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]);
                let port = BigEndian::read_u16(&bytes[4..6]);
                Some(Addr(SocketAddr::V4(SocketAddrV4::new(ip, port))))
            }
            18 => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&bytes[0..16]);
                let ip = Ipv6Addr::from(octets);
                let port = BigEndian::read_u16(&bytes[16..18]);
                Some(Addr(SocketAddr::V6(SocketAddrV6::new(ip, port, 0, 0))))
            }
            _ => None,
        }
    }
}

impl From<SocketAddr> for Addr {
    fn from(addr: SocketAddr) -> Addr {
        Addr(addr)
    }
}

impl From<Addr> for SocketAddr {
    fn from(addr: Addr) -> SocketAddr {
        addr.0
    }
}

impl fmt::Debug for Addr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl Serialize for Addr {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.write_compact(&mut buf);
        serializer.serialize_bytes(&buf)
    }
}

struct AddrVisitor;

impl<'de> Visitor<'de> for AddrVisitor {
    type Value = Addr;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "a 6-byte (IPv4) or 18-byte (IPv6) compact peer address")
    }

    fn visit_bytes<E>(self, v: &[u8]) -> Result<Addr, E>
    where
        E: de::Error,
    {
        Addr::read_compact(v).ok_or_else(|| de::Error::invalid_length(v.len(), &self))
    }

    fn visit_byte_buf<E>(self, v: Vec<u8>) -> Result<Addr, E>
    where
        E: de::Error,
    {
        self.visit_bytes(&v)
    }
}

impl<'de> Deserialize<'de> for Addr {
    fn deserialize<D>(deserializer: D) -> Result<Addr, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_bytes(AddrVisitor)
    }
}

/// True IPv4 vs IPv6 helper for compact-list (de)serialization, which needs
/// to know the per-element width up front rather than relying on a visitor.
pub(crate) fn is_v6(addr: &SocketAddr) -> bool {
    matches!(addr, SocketAddr::V6(_))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    #[test]
    fn compact_v4_round_trip() {
        let addr: SocketAddr = "203.0.113.1:6881".parse().unwrap();
        let wrapped = Addr::new(addr);
        let mut buf = Vec::new();
        wrapped.write_compact(&mut buf);
        assert_eq!(buf.len(), 6);
        let decoded = Addr::read_compact(&buf).unwrap();
        assert_eq!(decoded.socket_addr(), addr);
    }

    #[test]
    fn compact_v6_round_trip() {
        let addr: SocketAddr = "[2001:db8::1]:6881".parse().unwrap();
        let wrapped = Addr::new(addr);
        let mut buf = Vec::new();
        wrapped.write_compact(&mut buf);
        assert_eq!(buf.len(), 18);
        let decoded = Addr::read_compact(&buf).unwrap();
        assert_eq!(decoded.socket_addr(), addr);
    }
}
