//! Minimal DNS wire codec for the stub lookup client.
//!
//! Covers exactly what asking a recursive resolver for SRV and address
//! records needs: a query encoder (header, one question, an EDNS0 OPT
//! record) and a response decoder that understands name compression
//! (RFC 1035 section 4.1.4). Record types the client does not interpret are
//! skipped, not rejected.

use std::net::{Ipv4Addr, Ipv6Addr};

use thiserror::Error;

pub const TYPE_A: u16 = 1;
pub const TYPE_CNAME: u16 = 5;
pub const TYPE_AAAA: u16 = 28;
pub const TYPE_SRV: u16 = 33;
const TYPE_OPT: u16 = 41;

const CLASS_IN: u16 = 1;

const FLAG_RESPONSE: u16 = 0x8000;
const FLAG_TRUNCATED: u16 = 0x0200;
const FLAG_RECURSION_DESIRED: u16 = 0x0100;
const RCODE_MASK: u16 = 0x000F;

/// Largest response accepted, also the EDNS0 payload size we advertise.
pub(crate) const MAX_RESPONSE: usize = 4096;
const OPT_PAYLOAD: u16 = MAX_RESPONSE as u16;

const MAX_LABEL: usize = 63;
const MAX_POINTER_JUMPS: usize = 32;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("invalid packet: {0}")]
    InvalidPacket(&'static str),
    #[error("invalid name: {0}")]
    InvalidName(String),
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Encode one recursive query for `name` with the given record type.
pub fn encode_query(id: u16, name: &str, qtype: u16) -> Result<Vec<u8>, WireError> {
    let mut buf = Vec::with_capacity(64);
    buf.extend_from_slice(&id.to_be_bytes());
    buf.extend_from_slice(&FLAG_RECURSION_DESIRED.to_be_bytes());
    buf.extend_from_slice(&1u16.to_be_bytes()); // qdcount
    buf.extend_from_slice(&0u16.to_be_bytes()); // ancount
    buf.extend_from_slice(&0u16.to_be_bytes()); // nscount
    buf.extend_from_slice(&1u16.to_be_bytes()); // arcount, the OPT record
    encode_name(&mut buf, name)?;
    buf.extend_from_slice(&qtype.to_be_bytes());
    buf.extend_from_slice(&CLASS_IN.to_be_bytes());
    // EDNS0 OPT: root name, type 41, the class field carries the payload size.
    buf.push(0);
    buf.extend_from_slice(&TYPE_OPT.to_be_bytes());
    buf.extend_from_slice(&OPT_PAYLOAD.to_be_bytes());
    buf.extend_from_slice(&0u32.to_be_bytes()); // extended rcode and flags
    buf.extend_from_slice(&0u16.to_be_bytes()); // rdlength
    Ok(buf)
}

fn encode_name(buf: &mut Vec<u8>, name: &str) -> Result<(), WireError> {
    for label in name.trim_end_matches('.').split('.') {
        if label.is_empty() || label.len() > MAX_LABEL {
            return Err(WireError::InvalidName(name.to_string()));
        }
        buf.push(label.len() as u8);
        buf.extend_from_slice(label.as_bytes());
    }
    buf.push(0);
    Ok(())
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Header fields the client consumes.
#[derive(Debug, Clone, Copy)]
pub struct Header {
    pub id: u16,
    pub is_response: bool,
    pub truncated: bool,
    pub rcode: u8,
    pub qdcount: u16,
    pub ancount: u16,
}

impl Header {
    fn parse(data: &[u8]) -> Result<Self, WireError> {
        if data.len() < 12 {
            return Err(WireError::InvalidPacket("header too short"));
        }
        let flags = u16::from_be_bytes([data[2], data[3]]);
        Ok(Self {
            id: u16::from_be_bytes([data[0], data[1]]),
            is_response: flags & FLAG_RESPONSE != 0,
            truncated: flags & FLAG_TRUNCATED != 0,
            rcode: (flags & RCODE_MASK) as u8,
            qdcount: u16::from_be_bytes([data[4], data[5]]),
            ancount: u16::from_be_bytes([data[6], data[7]]),
        })
    }
}

/// One answer record.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub name: String,
    pub rtype: u16,
    pub ttl: u32,
    pub data: RData,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RData {
    A(Ipv4Addr),
    Aaaa(Ipv6Addr),
    Cname(String),
    Srv {
        priority: u16,
        weight: u16,
        port: u16,
        target: String,
    },
    /// Anything the client does not interpret.
    Skipped,
}

/// A decoded response: header plus answers. Question, authority and
/// additional sections are parsed past, not kept.
#[derive(Debug)]
pub struct Response {
    pub header: Header,
    pub answers: Vec<Record>,
}

impl Response {
    pub fn parse(data: &[u8]) -> Result<Self, WireError> {
        let header = Header::parse(data)?;
        let mut offset = 12usize;
        for _ in 0..header.qdcount {
            let (_, next) = decode_name(data, offset)?;
            offset = next + 4; // qtype + qclass
            if offset > data.len() {
                return Err(WireError::InvalidPacket("question overflow"));
            }
        }
        let mut answers = Vec::new();
        for _ in 0..header.ancount {
            let (record, next) = decode_record(data, offset)?;
            answers.push(record);
            offset = next;
        }
        Ok(Self { header, answers })
    }
}

/// Decode a possibly-compressed domain name starting at `offset`.
///
/// Returns the dotted name and the offset just past the name at the original
/// position; compression pointers do not advance that offset.
fn decode_name(data: &[u8], offset: usize) -> Result<(String, usize), WireError> {
    let mut labels: Vec<String> = Vec::new();
    let mut pos = offset;
    let mut end = 0usize;
    let mut jumped = false;
    let mut jumps = 0usize;

    loop {
        let len = *data
            .get(pos)
            .ok_or(WireError::InvalidPacket("name overflow"))? as usize;
        if len & 0xC0 == 0xC0 {
            let low = *data
                .get(pos + 1)
                .ok_or(WireError::InvalidPacket("pointer overflow"))?
                as usize;
            if !jumped {
                end = pos + 2;
                jumped = true;
            }
            jumps += 1;
            if jumps > MAX_POINTER_JUMPS {
                return Err(WireError::InvalidPacket("compression loop"));
            }
            let target = ((len & 0x3F) << 8) | low;
            if target >= data.len() {
                return Err(WireError::InvalidPacket("pointer out of bounds"));
            }
            pos = target;
            continue;
        }
        if len & 0xC0 != 0 {
            return Err(WireError::InvalidPacket("bad label length"));
        }
        pos += 1;
        if len == 0 {
            break;
        }
        let bytes = data
            .get(pos..pos + len)
            .ok_or(WireError::InvalidPacket("label overflow"))?;
        let label =
            std::str::from_utf8(bytes).map_err(|_| WireError::InvalidPacket("label not utf-8"))?;
        labels.push(label.to_string());
        pos += len;
    }

    if !jumped {
        end = pos;
    }
    Ok((labels.join("."), end))
}

fn decode_record(data: &[u8], offset: usize) -> Result<(Record, usize), WireError> {
    let (name, mut pos) = decode_name(data, offset)?;
    let fixed = data
        .get(pos..pos + 10)
        .ok_or(WireError::InvalidPacket("record header overflow"))?;
    let rtype = u16::from_be_bytes([fixed[0], fixed[1]]);
    let ttl = u32::from_be_bytes([fixed[4], fixed[5], fixed[6], fixed[7]]);
    let rdlength = u16::from_be_bytes([fixed[8], fixed[9]]) as usize;
    pos += 10;
    let rdata = data
        .get(pos..pos + rdlength)
        .ok_or(WireError::InvalidPacket("rdata overflow"))?;

    let parsed = match rtype {
        TYPE_A => {
            if rdlength != 4 {
                return Err(WireError::InvalidPacket("bad A rdata length"));
            }
            RData::A(Ipv4Addr::new(rdata[0], rdata[1], rdata[2], rdata[3]))
        }
        TYPE_AAAA => {
            if rdlength != 16 {
                return Err(WireError::InvalidPacket("bad AAAA rdata length"));
            }
            let mut octets = [0u8; 16];
            octets.copy_from_slice(rdata);
            RData::Aaaa(Ipv6Addr::from(octets))
        }
        TYPE_CNAME => {
            let (target, _) = decode_name(data, pos)?;
            RData::Cname(target)
        }
        TYPE_SRV => {
            if rdlength < 7 {
                return Err(WireError::InvalidPacket("bad SRV rdata length"));
            }
            // Targets are sometimes compressed in the wild, so decode against
            // the whole message rather than the rdata slice.
            let (target, _) = decode_name(data, pos + 6)?;
            RData::Srv {
                priority: u16::from_be_bytes([rdata[0], rdata[1]]),
                weight: u16::from_be_bytes([rdata[2], rdata[3]]),
                port: u16::from_be_bytes([rdata[4], rdata[5]]),
                target,
            }
        }
        _ => RData::Skipped,
    };

    Ok((
        Record {
            name,
            rtype,
            ttl,
            data: parsed,
        },
        pos + rdlength,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Response builder: header + raw section bytes, with computed rdlength.
    fn response_header(id: u16, flags: u16, qdcount: u16, ancount: u16) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&id.to_be_bytes());
        buf.extend_from_slice(&flags.to_be_bytes());
        buf.extend_from_slice(&qdcount.to_be_bytes());
        buf.extend_from_slice(&ancount.to_be_bytes());
        buf.extend_from_slice(&0u16.to_be_bytes());
        buf.extend_from_slice(&0u16.to_be_bytes());
        buf
    }

    fn push_name(buf: &mut Vec<u8>, name: &str) {
        encode_name(buf, name).expect("test name");
    }

    fn push_question(buf: &mut Vec<u8>, name: &str, qtype: u16) {
        push_name(buf, name);
        buf.extend_from_slice(&qtype.to_be_bytes());
        buf.extend_from_slice(&CLASS_IN.to_be_bytes());
    }

    fn push_record(buf: &mut Vec<u8>, name_bytes: &[u8], rtype: u16, ttl: u32, rdata: &[u8]) {
        buf.extend_from_slice(name_bytes);
        buf.extend_from_slice(&rtype.to_be_bytes());
        buf.extend_from_slice(&CLASS_IN.to_be_bytes());
        buf.extend_from_slice(&ttl.to_be_bytes());
        buf.extend_from_slice(&(rdata.len() as u16).to_be_bytes());
        buf.extend_from_slice(rdata);
    }

    #[test]
    fn query_layout() {
        let query = encode_query(0xBEEF, "example.com", TYPE_SRV).expect("encode");
        assert_eq!(&query[0..2], &[0xBE, 0xEF]);
        assert_eq!(&query[2..4], &[0x01, 0x00]); // RD
        assert_eq!(&query[4..6], &[0x00, 0x01]); // one question
        assert_eq!(&query[10..12], &[0x00, 0x01]); // one additional (OPT)
        assert_eq!(&query[12..25], b"\x07example\x03com\x00");
        assert_eq!(&query[25..27], &TYPE_SRV.to_be_bytes());
        assert_eq!(&query[27..29], &[0x00, 0x01]); // IN
        // OPT: root, type 41, payload size in the class slot.
        assert_eq!(query[29], 0);
        assert_eq!(&query[30..32], &[0x00, 0x29]);
        assert_eq!(&query[32..34], &4096u16.to_be_bytes());
        assert_eq!(query.len(), 40);
    }

    #[test]
    fn trailing_dot_and_bad_labels() {
        let dotted = encode_query(1, "example.com.", TYPE_A).expect("trailing dot");
        let plain = encode_query(1, "example.com", TYPE_A).expect("plain");
        assert_eq!(dotted, plain);

        assert!(encode_query(1, "", TYPE_A).is_err());
        assert!(encode_query(1, "a..b", TYPE_A).is_err());
        let long = "x".repeat(64);
        assert!(encode_query(1, &long, TYPE_A).is_err());
    }

    #[test]
    fn decode_a_record_with_compressed_name() {
        let mut buf = response_header(0x1234, 0x8180, 1, 1);
        push_question(&mut buf, "foo.bar", TYPE_A);
        // 0xC00C points back at the question name at offset 12.
        push_record(&mut buf, &[0xC0, 0x0C], TYPE_A, 300, &[192, 0, 2, 1]);

        let response = Response::parse(&buf).expect("decode");
        assert_eq!(response.header.id, 0x1234);
        assert!(response.header.is_response);
        assert_eq!(response.header.rcode, 0);
        assert_eq!(response.answers.len(), 1);
        let record = &response.answers[0];
        assert_eq!(record.name, "foo.bar");
        assert_eq!(record.ttl, 300);
        assert_eq!(record.data, RData::A(Ipv4Addr::new(192, 0, 2, 1)));
    }

    #[test]
    fn decode_srv_record() {
        let mut buf = response_header(7, 0x8180, 1, 1);
        push_question(&mut buf, "_reg._udp.example.com", TYPE_SRV);
        let mut rdata = Vec::new();
        rdata.extend_from_slice(&5u16.to_be_bytes()); // priority
        rdata.extend_from_slice(&0u16.to_be_bytes()); // weight
        rdata.extend_from_slice(&7001u16.to_be_bytes()); // port
        push_name(&mut rdata, "node1.example.com");
        push_record(&mut buf, &[0xC0, 0x0C], TYPE_SRV, 60, &rdata);

        let response = Response::parse(&buf).expect("decode");
        assert_eq!(
            response.answers[0].data,
            RData::Srv {
                priority: 5,
                weight: 0,
                port: 7001,
                target: "node1.example.com".to_string(),
            }
        );
    }

    #[test]
    fn decode_skips_unknown_record_types() {
        let mut buf = response_header(9, 0x8180, 1, 2);
        push_question(&mut buf, "foo.bar", TYPE_A);
        push_record(&mut buf, &[0xC0, 0x0C], 16 /* TXT */, 60, b"\x04text");
        push_record(&mut buf, &[0xC0, 0x0C], TYPE_A, 60, &[192, 0, 2, 9]);

        let response = Response::parse(&buf).expect("decode");
        assert_eq!(response.answers[0].data, RData::Skipped);
        assert_eq!(response.answers[1].data, RData::A(Ipv4Addr::new(192, 0, 2, 9)));
    }

    #[test]
    fn decode_cname_and_aaaa() {
        let mut buf = response_header(11, 0x8180, 1, 2);
        push_question(&mut buf, "alias.example.com", TYPE_AAAA);
        let mut cname_rdata = Vec::new();
        push_name(&mut cname_rdata, "real.example.com");
        push_record(&mut buf, &[0xC0, 0x0C], TYPE_CNAME, 60, &cname_rdata);
        let v6: Ipv6Addr = "2001:db8::7".parse().expect("v6");
        push_record(&mut buf, &[0xC0, 0x0C], TYPE_AAAA, 60, &v6.octets());

        let response = Response::parse(&buf).expect("decode");
        assert_eq!(
            response.answers[0].data,
            RData::Cname("real.example.com".to_string())
        );
        assert_eq!(response.answers[1].data, RData::Aaaa(v6));
    }

    #[test]
    fn nxdomain_and_truncation_flags() {
        let buf = response_header(3, 0x8183, 0, 0);
        let response = Response::parse(&buf).expect("decode");
        assert_eq!(response.header.rcode, 3);

        let buf = response_header(3, 0x8200, 0, 0);
        let response = Response::parse(&buf).expect("decode");
        assert!(response.header.truncated);
    }

    #[test]
    fn pointer_loop_is_rejected() {
        let mut buf = response_header(5, 0x8180, 0, 1);
        // A name that points at itself, then a plausible record body.
        buf.extend_from_slice(&[0xC0, 0x0C]);
        buf.extend_from_slice(&TYPE_A.to_be_bytes());
        buf.extend_from_slice(&CLASS_IN.to_be_bytes());
        buf.extend_from_slice(&60u32.to_be_bytes());
        buf.extend_from_slice(&4u16.to_be_bytes());
        buf.extend_from_slice(&[192, 0, 2, 1]);

        let err = Response::parse(&buf).expect_err("loop must fail");
        assert!(matches!(err, WireError::InvalidPacket("compression loop")));
    }

    #[test]
    fn truncated_packets_are_rejected() {
        assert!(Response::parse(&[0, 1, 2]).is_err());

        let mut buf = response_header(6, 0x8180, 1, 1);
        push_question(&mut buf, "foo.bar", TYPE_A);
        buf.extend_from_slice(&[0xC0, 0x0C]); // record name, then nothing
        assert!(Response::parse(&buf).is_err());
    }
}
