//! RTR protocol data units (§4.7, RFC 6810 / RFC 8210).
//!
//! Every PDU starts with the same 8-byte header: a protocol version, a
//! PDU type, a 16-bit field whose meaning depends on the type (usually a
//! session ID or error code), and a 32-bit total length covering the
//! header itself. Decoding and encoding go through [`bytes`]'s safe
//! buffer types rather than casting a byte slice onto a
//! `#[repr(packed)]` struct, which is how this module's predecessor did
//! it.
//!
//! [`Pdu`] covers the small, fixed-shape control PDUs exchanged in both
//! directions. The two payload PDUs -- Prefix and Router Key -- carry a
//! variable-length key in the latter case and are common enough in a
//! data push that they get their own types, [`PrefixPdu`] and
//! [`RouterKeyPdu`].
//!
//! RFC 8210 (protocol version 1) adds the Router Key PDU and carries
//! refresh/retry/expire timers on End Of Data; RFC 6810 (version 0) has
//! neither. Every `encode` here takes the negotiated version and writes
//! the shape that version expects.

use std::fmt;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use crate::resources::{Afi, Prefix};
use super::serial::Serial;

pub const VERSION_0: u8 = 0;
pub const VERSION_1: u8 = 1;

const HEADER_LEN: usize = 8;

/// An upper bound on a single PDU's declared length.
///
/// Router Key PDUs carry a full SubjectPublicKeyInfo, so this needs more
/// headroom than the other, fixed-size PDUs, but a client claiming an
/// enormous length in the header still shouldn't make us allocate
/// gigabytes for it.
const MAX_PDU_LEN: u32 = 64 * 1024;

mod pdu_type {
    pub const SERIAL_NOTIFY: u8 = 0;
    pub const SERIAL_QUERY: u8 = 1;
    pub const RESET_QUERY: u8 = 2;
    pub const CACHE_RESPONSE: u8 = 3;
    pub const IPV4_PREFIX: u8 = 4;
    pub const IPV6_PREFIX: u8 = 6;
    pub const END_OF_DATA: u8 = 7;
    pub const CACHE_RESET: u8 = 8;
    pub const ROUTER_KEY: u8 = 9;
    pub const ERROR_REPORT: u8 = 10;
}


//------------ Pdu -----------------------------------------------------------

/// A control PDU: one without a variable-length payload beyond
/// `ErrorReport`'s diagnostic text.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Pdu {
    SerialNotify { session_id: u16, serial: Serial },
    SerialQuery { session_id: u16, serial: Serial },
    ResetQuery,
    CacheResponse { session_id: u16 },
    EndOfData {
        session_id: u16,
        serial: Serial,
        refresh: u32,
        retry: u32,
        expire: u32,
    },
    CacheReset,
    ErrorReport { error_code: u16, erroneous_pdu: Bytes, text: String },
}

impl Pdu {
    /// Reads one control PDU sent by a client: a Serial Query, a Reset
    /// Query, or an Error Report.
    ///
    /// Returns the version the client put in the PDU header alongside the
    /// parsed PDU, since the server negotiates its protocol version from
    /// whatever the client's first PDU declares (RFC 8210 §5).
    pub async fn read<R: AsyncReadExt + Unpin>(
        sock: &mut R,
    ) -> Result<(u8, Self), ReadError> {
        let mut header = [0u8; HEADER_LEN];
        sock.read_exact(&mut header).await.map_err(ReadError::Io)?;
        let mut header = Bytes::copy_from_slice(&header);
        let version = header.get_u8();
        let pdu_type = header.get_u8();
        let field = header.get_u16();
        let len = header.get_u32();

        if len < HEADER_LEN as u32 || len > MAX_PDU_LEN {
            return Err(ReadError::InvalidLength(len))
        }
        let mut body = vec![0u8; len as usize - HEADER_LEN];
        sock.read_exact(&mut body).await.map_err(ReadError::Io)?;
        Self::parse(pdu_type, field, Bytes::from(body)).map(|pdu| (version, pdu))
    }

    fn parse(pdu_type: u8, field: u16, mut body: Bytes) -> Result<Self, ReadError> {
        match pdu_type {
            pdu_type::SERIAL_QUERY => {
                if body.len() != 4 {
                    return Err(ReadError::Malformed)
                }
                Ok(Pdu::SerialQuery {
                    session_id: field,
                    serial: Serial::from(body.get_u32()),
                })
            }
            pdu_type::RESET_QUERY => Ok(Pdu::ResetQuery),
            pdu_type::ERROR_REPORT => {
                if body.len() < 4 {
                    return Err(ReadError::Malformed)
                }
                let pdu_len = body.get_u32() as usize;
                if body.len() < pdu_len {
                    return Err(ReadError::Malformed)
                }
                let erroneous_pdu = body.split_to(pdu_len);
                if body.len() < 4 {
                    return Err(ReadError::Malformed)
                }
                let text_len = body.get_u32() as usize;
                if body.len() != text_len {
                    return Err(ReadError::Malformed)
                }
                let text = String::from_utf8_lossy(&body).into_owned();
                Ok(Pdu::ErrorReport { error_code: field, erroneous_pdu, text })
            }
            other => Err(ReadError::UnexpectedType(other)),
        }
    }

    /// Encodes this PDU for protocol `version` onto `buf`.
    pub fn encode(&self, version: u8, buf: &mut BytesMut) {
        match *self {
            Pdu::SerialNotify { session_id, serial } => {
                header(buf, version, pdu_type::SERIAL_NOTIFY, session_id, 12);
                buf.put_u32(serial.into());
            }
            Pdu::SerialQuery { session_id, serial } => {
                header(buf, version, pdu_type::SERIAL_QUERY, session_id, 12);
                buf.put_u32(serial.into());
            }
            Pdu::ResetQuery => {
                header(buf, version, pdu_type::RESET_QUERY, 0, 8);
            }
            Pdu::CacheResponse { session_id } => {
                header(buf, version, pdu_type::CACHE_RESPONSE, session_id, 8);
            }
            Pdu::EndOfData { session_id, serial, refresh, retry, expire } => {
                if version >= VERSION_1 {
                    header(buf, version, pdu_type::END_OF_DATA, session_id, 24);
                    buf.put_u32(serial.into());
                    buf.put_u32(refresh);
                    buf.put_u32(retry);
                    buf.put_u32(expire);
                }
                else {
                    header(buf, version, pdu_type::END_OF_DATA, session_id, 12);
                    buf.put_u32(serial.into());
                }
            }
            Pdu::CacheReset => {
                header(buf, version, pdu_type::CACHE_RESET, 0, 8);
            }
            Pdu::ErrorReport { error_code, ref erroneous_pdu, ref text } => {
                let len = HEADER_LEN as u32
                    + 4 + erroneous_pdu.len() as u32
                    + 4 + text.len() as u32;
                header(buf, version, pdu_type::ERROR_REPORT, error_code, len);
                buf.put_u32(erroneous_pdu.len() as u32);
                buf.put_slice(erroneous_pdu);
                buf.put_u32(text.len() as u32);
                buf.put_slice(text.as_bytes());
            }
        }
    }

    /// Encodes and writes this PDU straight to an async sink.
    pub async fn write<W: AsyncWriteExt + Unpin>(
        &self, sock: &mut W, version: u8,
    ) -> Result<(), std::io::Error> {
        let mut buf = BytesMut::new();
        self.encode(version, &mut buf);
        sock.write_all(&buf).await
    }
}

fn header(buf: &mut BytesMut, version: u8, pdu_type: u8, field: u16, len: u32) {
    buf.put_u8(version);
    buf.put_u8(pdu_type);
    buf.put_u16(field);
    buf.put_u32(len);
}


//------------ PrefixPdu -------------------------------------------------------

/// An IPv4 or IPv6 Prefix PDU (RFC 8210 §5.6/§5.7): announces or
/// withdraws one VRP.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PrefixPdu {
    /// Bit 0 set means announce, clear means withdraw.
    pub flags: u8,
    pub prefix: Prefix,
    pub max_length: u8,
    pub asn: u32,
}

impl PrefixPdu {
    pub const ANNOUNCE: u8 = 1;
    pub const WITHDRAW: u8 = 0;

    pub fn new(flags: u8, prefix: Prefix, max_length: u8, asn: u32) -> Self {
        PrefixPdu { flags, prefix, max_length, asn }
    }

    pub async fn write<W: AsyncWriteExt + Unpin>(
        &self, sock: &mut W, version: u8,
    ) -> Result<(), std::io::Error> {
        let mut buf = BytesMut::new();
        self.encode(version, &mut buf);
        sock.write_all(&buf).await
    }

    pub fn encode(&self, version: u8, buf: &mut BytesMut) {
        match self.prefix.family {
            Afi::Ipv4 => {
                header(buf, version, pdu_type::IPV4_PREFIX, 0, 20);
                buf.put_u8(self.flags);
                buf.put_u8(self.prefix.len);
                buf.put_u8(self.max_length);
                buf.put_u8(0);
                buf.put_u32(self.prefix.addr as u32);
                buf.put_u32(self.asn);
            }
            Afi::Ipv6 => {
                header(buf, version, pdu_type::IPV6_PREFIX, 0, 32);
                buf.put_u8(self.flags);
                buf.put_u8(self.prefix.len);
                buf.put_u8(self.max_length);
                buf.put_u8(0);
                buf.put_u128(self.prefix.addr);
                buf.put_u32(self.asn);
            }
        }
    }
}


//------------ RouterKeyPdu ----------------------------------------------------

/// A Router Key PDU (RFC 8210 §5.10): announces or withdraws one BGPsec
/// router key. Only valid under protocol version 1.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RouterKeyPdu {
    pub flags: u8,
    pub ski: [u8; 20],
    pub asn: u32,
    pub spki: Bytes,
}

impl RouterKeyPdu {
    pub const ANNOUNCE: u8 = 1;
    pub const WITHDRAW: u8 = 0;

    pub fn new(flags: u8, ski: [u8; 20], asn: u32, spki: Bytes) -> Self {
        RouterKeyPdu { flags, ski, asn, spki }
    }

    pub async fn write<W: AsyncWriteExt + Unpin>(
        &self, sock: &mut W, version: u8,
    ) -> Result<(), std::io::Error> {
        let mut buf = BytesMut::new();
        self.encode(version, &mut buf);
        sock.write_all(&buf).await
    }

    pub fn encode(&self, version: u8, buf: &mut BytesMut) {
        let len = HEADER_LEN as u32 + 20 + 4 + self.spki.len() as u32;
        header(buf, version, pdu_type::ROUTER_KEY, u16::from(self.flags), len);
        buf.put_slice(&self.ski);
        buf.put_u32(self.asn);
        buf.put_slice(&self.spki);
    }
}


//------------ ReadError ----------------------------------------------------------

/// Why reading a PDU from a client failed.
#[derive(Debug)]
pub enum ReadError {
    Io(std::io::Error),
    InvalidLength(u32),
    Malformed,
    UnexpectedType(u8),
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ReadError::Io(err) => write!(f, "I/O error: {}", err),
            ReadError::InvalidLength(len) => {
                write!(f, "invalid PDU length {}", len)
            }
            ReadError::Malformed => f.write_str("malformed PDU body"),
            ReadError::UnexpectedType(t) => {
                write!(f, "unexpected PDU type {} from client", t)
            }
        }
    }
}


#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn serial_query_round_trips_through_parse() {
        let pdu = Pdu::parse(
            pdu_type::SERIAL_QUERY, 7,
            Bytes::copy_from_slice(&5u32.to_be_bytes()),
        ).unwrap();
        match pdu {
            Pdu::SerialQuery { session_id, serial } => {
                assert_eq!(session_id, 7);
                assert_eq!(serial, Serial::from(5));
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn reset_query_has_no_body() {
        match Pdu::parse(pdu_type::RESET_QUERY, 0, Bytes::new()).unwrap() {
            Pdu::ResetQuery => {}
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn error_report_round_trips_through_parse() {
        let mut body = BytesMut::new();
        let erroneous = Bytes::from_static(b"bogus");
        body.put_u32(erroneous.len() as u32);
        body.put_slice(&erroneous);
        let text = "no such session";
        body.put_u32(text.len() as u32);
        body.put_slice(text.as_bytes());
        let pdu = Pdu::parse(pdu_type::ERROR_REPORT, 2, body.freeze()).unwrap();
        match pdu {
            Pdu::ErrorReport { error_code, erroneous_pdu, text: got } => {
                assert_eq!(error_code, 2);
                assert_eq!(erroneous_pdu, erroneous);
                assert_eq!(got, text);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn unknown_type_is_rejected() {
        match Pdu::parse(200, 0, Bytes::new()) {
            Err(ReadError::UnexpectedType(200)) => {}
            other => panic!("expected UnexpectedType, got {:?}", other),
        }
    }

    #[test]
    fn prefix_pdu_encodes_expected_length() {
        let prefix = Prefix::new(Afi::Ipv4, 0xC0000200, 24);
        let pdu = PrefixPdu::new(PrefixPdu::ANNOUNCE, prefix, 24, 64496);
        let mut buf = BytesMut::new();
        pdu.encode(VERSION_1, &mut buf);
        assert_eq!(buf.len(), 20);
        assert_eq!(&buf[4..8], &20u32.to_be_bytes());
    }

    #[test]
    fn ipv6_prefix_pdu_encodes_expected_length() {
        let prefix = Prefix::new(Afi::Ipv6, 0x2001_0db8_0000_0000_0000_0000_0000_0000, 32);
        let pdu = PrefixPdu::new(PrefixPdu::ANNOUNCE, prefix, 48, 64496);
        let mut buf = BytesMut::new();
        pdu.encode(VERSION_1, &mut buf);
        assert_eq!(buf.len(), 32);
    }

    #[test]
    fn router_key_pdu_encodes_expected_length() {
        let pdu = RouterKeyPdu::new(
            RouterKeyPdu::ANNOUNCE, [1u8; 20], 64496, Bytes::from_static(b"spki-bytes"),
        );
        let mut buf = BytesMut::new();
        pdu.encode(VERSION_1, &mut buf);
        assert_eq!(buf.len(), 8 + 20 + 4 + 10);
    }

    #[test]
    fn end_of_data_omits_timers_under_version_0() {
        let pdu = Pdu::EndOfData {
            session_id: 1, serial: Serial::from(0),
            refresh: 3600, retry: 600, expire: 7200,
        };
        let mut buf = BytesMut::new();
        pdu.encode(VERSION_0, &mut buf);
        assert_eq!(buf.len(), 12);
    }

    #[test]
    fn end_of_data_carries_timers_under_version_1() {
        let pdu = Pdu::EndOfData {
            session_id: 1, serial: Serial::from(0),
            refresh: 3600, retry: 600, expire: 7200,
        };
        let mut buf = BytesMut::new();
        pdu.encode(VERSION_1, &mut buf);
        assert_eq!(buf.len(), 24);
    }
}
