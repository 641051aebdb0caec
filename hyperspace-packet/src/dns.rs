//! DNS question parsing and response synthesis
//!
//! The engine answers configured names itself instead of letting queries
//! reach the overlay. Parsing covers exactly what classification needs:
//! the first question's name (label encoding with compression pointers),
//! its QTYPE, and the end offset of the question section. Synthesis
//! rewrites the query datagram rather than building a message from
//! scratch, so the transaction id and question bytes the resolver sent
//! survive untouched.

use std::net::Ipv4Addr;

use crate::{ipv4, udp};

/// DNS header length in bytes.
pub const HEADER_LEN: usize = 12;

/// Query types the engine responds to.
pub mod qtype {
    /// IPv4 host address
    pub const A: u16 = 1;
    /// IPv6 host address
    pub const AAAA: u16 = 28;
    /// HTTPS service binding
    pub const HTTPS: u16 = 65;
}

/// Record class IN.
pub const CLASS_IN: u16 = 1;

/// TTL of synthesized answer records, in seconds.
pub const RECORD_TTL: u32 = 300;

/// Maximum depth of compression-pointer chasing.
const MAX_POINTER_DEPTH: u8 = 5;

/// The first question of a DNS message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    /// Queried name with labels joined by `.` (no trailing dot).
    pub name: String,
    /// Query type, read from the last four bytes of the question section.
    pub qtype: u16,
    /// Offset one past QCLASS, relative to the DNS payload.
    pub end: usize,
}

/// Parse the first question of `payload` (a DNS message).
///
/// Returns `None` when the payload holds no complete question: shorter
/// than a header, a label or pointer running past the end, a pointer
/// chase deeper than five hops, or missing QTYPE/QCLASS bytes.
pub fn parse_question(payload: &[u8]) -> Option<Question> {
    if payload.len() < HEADER_LEN {
        return None;
    }
    let (name, name_end) = read_name(payload, HEADER_LEN, 0)?;
    if name_end + 4 > payload.len() {
        return None;
    }
    let qtype = u16::from_be_bytes([payload[name_end], payload[name_end + 1]]);
    Some(Question {
        name,
        qtype,
        end: name_end + 4,
    })
}

/// Read a possibly compressed name starting at `offset`.
///
/// Returns the name and the offset one past it at this nesting level:
/// past the terminating null label, or past the two pointer bytes when the
/// name ends in a compression pointer. Pointer targets are chased
/// recursively with a depth bound, so pointer cycles terminate.
fn read_name(payload: &[u8], mut offset: usize, depth: u8) -> Option<(String, usize)> {
    if depth > MAX_POINTER_DEPTH {
        return None;
    }

    let mut name = String::new();
    loop {
        let len = *payload.get(offset)?;
        if len & 0xC0 == 0xC0 {
            let low = *payload.get(offset + 1)?;
            let target = usize::from(u16::from_be_bytes([len & 0x3F, low]));
            let (suffix, _) = read_name(payload, target, depth + 1)?;
            if !name.is_empty() && !suffix.is_empty() {
                name.push('.');
            }
            name.push_str(&suffix);
            return Some((name, offset + 2));
        }
        if len == 0 {
            return Some((name, offset + 1));
        }

        let len = usize::from(len);
        let label = payload.get(offset + 1..offset + 1 + len)?;
        if !name.is_empty() {
            name.push('.');
        }
        name.push_str(&String::from_utf8_lossy(label));
        offset += 1 + len;
    }
}

/// Build a response to `query`, a full IPv4/UDP/DNS packet.
///
/// `answer` carries the address for a single-answer A response; `None`
/// produces an empty response (ANCOUNT = 0), used for AAAA and HTTPS
/// queries so the resolver falls back to A quickly.
///
/// The response is the query with the DNS flags set to `0x81 0x80`,
/// ANCOUNT updated, the buffer truncated at the question end (an answer
/// record appended for A responses), IPv4 addresses and UDP ports
/// swapped, and lengths and checksums fixed up.
pub fn build_response(
    query: &[u8],
    ip_header_len: usize,
    question: &Question,
    answer: Option<Ipv4Addr>,
) -> Vec<u8> {
    let dns_start = ip_header_len + udp::HEADER_LEN;
    let mut response = query[..dns_start + question.end].to_vec();

    // QR = 1, OpCode = 0, AA = 0, TC = 0, RD = 1, RA = 1, Z = 0, RCODE = 0
    response[dns_start + 2] = 0x81;
    response[dns_start + 3] = 0x80;

    let ancount: u16 = if answer.is_some() { 1 } else { 0 };
    response[dns_start + 6..dns_start + 8].copy_from_slice(&ancount.to_be_bytes());

    if let Some(addr) = answer {
        // Compressed name pointing at the question name (offset 12).
        response.extend_from_slice(&[0xC0, 0x0C]);
        response.extend_from_slice(&qtype::A.to_be_bytes());
        response.extend_from_slice(&CLASS_IN.to_be_bytes());
        response.extend_from_slice(&RECORD_TTL.to_be_bytes());
        response.extend_from_slice(&4u16.to_be_bytes());
        response.extend_from_slice(&addr.octets());
    }

    ipv4::swap_addresses(&mut response);
    udp::swap_ports(&mut response[ip_header_len..]);

    let total_len = response.len() as u16;
    ipv4::set_total_len(&mut response, total_len);
    ipv4::finalize_checksum(&mut response);

    udp::set_length(&mut response[ip_header_len..], total_len - ip_header_len as u16);
    udp::clear_checksum(&mut response[ip_header_len..]);

    response
}
