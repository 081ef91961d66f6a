//! Minimal SPNEGO (RFC 4178) DER wrapping around NTLMSSP tokens.

use super::ntlm::SIGNATURE;
use super::wire::{WireError, WireResult};

/// 1.3.6.1.5.5.2
const OID_SPNEGO: &[u8] = &[0x2b, 0x06, 0x01, 0x05, 0x05, 0x02];
/// 1.3.6.1.4.1.311.2.2.10
const OID_NTLMSSP: &[u8] = &[0x2b, 0x06, 0x01, 0x04, 0x01, 0x82, 0x37, 0x02, 0x02, 0x0a];

const TAG_OID: u8 = 0x06;
const TAG_OCTET_STRING: u8 = 0x04;
const TAG_SEQUENCE: u8 = 0x30;
const TAG_APPLICATION_0: u8 = 0x60;

fn encode_len(len: usize, out: &mut Vec<u8>) {
    if len < 0x80 {
        out.push(len as u8);
    } else {
        let bytes = len.to_be_bytes();
        let skip = bytes.iter().take_while(|b| **b == 0).count();
        out.push(0x80 | (bytes.len() - skip) as u8);
        out.extend_from_slice(&bytes[skip..]);
    }
}

fn tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(content.len() + 6);
    out.push(tag);
    encode_len(content.len(), &mut out);
    out.extend_from_slice(content);
    out
}

/// NegTokenInit offering NTLMSSP, carrying the NEGOTIATE message.
pub fn wrap_init(mech_token: &[u8]) -> Vec<u8> {
    let mech_types = tlv(0xa0, &tlv(TAG_SEQUENCE, &tlv(TAG_OID, OID_NTLMSSP)));
    let token = tlv(0xa2, &tlv(TAG_OCTET_STRING, mech_token));
    let init = tlv(0xa0, &tlv(TAG_SEQUENCE, &[mech_types, token].concat()));
    tlv(TAG_APPLICATION_0, &[tlv(TAG_OID, OID_SPNEGO), init].concat())
}

/// NegTokenResp carrying the AUTHENTICATE message.
pub fn wrap_response(token: &[u8]) -> Vec<u8> {
    let token = tlv(0xa2, &tlv(TAG_OCTET_STRING, token));
    tlv(0xa1, &tlv(TAG_SEQUENCE, &token))
}

/// Split one TLV off the front: (tag, content, rest).
fn read_tlv(buf: &[u8]) -> Option<(u8, &[u8], &[u8])> {
    let (&tag, rest) = buf.split_first()?;
    let (&first, rest) = rest.split_first()?;
    let (len, rest) = if first < 0x80 {
        (usize::from(first), rest)
    } else {
        let n = usize::from(first & 0x7f);
        if n == 0 || n > 4 || rest.len() < n {
            return None;
        }
        let len = rest[..n]
            .iter()
            .fold(0_usize, |acc, b| (acc << 8) | usize::from(*b));
        (len, &rest[n..])
    };
    if rest.len() < len {
        return None;
    }
    Some((tag, &rest[..len], &rest[len..]))
}

fn is_constructed(tag: u8) -> bool {
    tag & 0x20 != 0
}

/// Depth-first search for the first OCTET STRING holding an NTLMSSP message.
fn find_ntlm(mut buf: &[u8], depth: usize) -> Option<&[u8]> {
    if depth > 8 {
        return None;
    }
    while let Some((tag, content, rest)) = read_tlv(buf) {
        if tag == TAG_OCTET_STRING && content.starts_with(SIGNATURE) {
            return Some(content);
        }
        if is_constructed(tag)
            && let Some(found) = find_ntlm(content, depth + 1)
        {
            return Some(found);
        }
        buf = rest;
    }
    None
}

/// NTLMSSP token from a server security blob (SPNEGO-wrapped or raw).
pub fn unwrap_token(blob: &[u8]) -> WireResult<Vec<u8>> {
    if blob.starts_with(SIGNATURE) {
        return Ok(blob.to_vec());
    }
    find_ntlm(blob, 0)
        .map(<[u8]>::to_vec)
        .ok_or_else(|| WireError::Malformed("no NTLMSSP token in security blob".to_string()))
}
