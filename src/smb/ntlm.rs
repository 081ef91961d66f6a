//! NTLMv2 client messages (MS-NLMP): NEGOTIATE, CHALLENGE parsing and AUTHENTICATE.

use hmac::{Hmac, Mac};
use md4::{Digest, Md4};
use md5::Md5;

use super::wire::{WireError, WireResult, slice_at, u16_at, u32_at, utf16le};

type HmacMd5 = Hmac<Md5>;

pub const SIGNATURE: &[u8; 8] = b"NTLMSSP\0";

const MSG_NEGOTIATE: u32 = 1;
const MSG_CHALLENGE: u32 = 2;
const MSG_AUTHENTICATE: u32 = 3;

pub const NEGOTIATE_UNICODE: u32 = 0x0000_0001;
pub const REQUEST_TARGET: u32 = 0x0000_0004;
pub const NEGOTIATE_SIGN: u32 = 0x0000_0010;
pub const NEGOTIATE_NTLM: u32 = 0x0000_0200;
pub const NEGOTIATE_ALWAYS_SIGN: u32 = 0x0000_8000;
pub const NEGOTIATE_EXTENDED_SESSIONSECURITY: u32 = 0x0008_0000;
pub const NEGOTIATE_TARGET_INFO: u32 = 0x0080_0000;
pub const NEGOTIATE_128: u32 = 0x2000_0000;
pub const NEGOTIATE_56: u32 = 0x8000_0000;

pub const CLIENT_FLAGS: u32 = NEGOTIATE_UNICODE
    | REQUEST_TARGET
    | NEGOTIATE_SIGN
    | NEGOTIATE_NTLM
    | NEGOTIATE_ALWAYS_SIGN
    | NEGOTIATE_EXTENDED_SESSIONSECURITY
    | NEGOTIATE_TARGET_INFO
    | NEGOTIATE_128
    | NEGOTIATE_56;

const AV_EOL: u16 = 0;
const AV_TIMESTAMP: u16 = 7;

fn malformed(what: &str) -> WireError {
    WireError::Malformed(format!("NTLM {what}"))
}

pub(crate) fn hmac_md5(key: &[u8], parts: &[&[u8]]) -> WireResult<[u8; 16]> {
    let mut mac =
        <HmacMd5 as Mac>::new_from_slice(key).map_err(|_| malformed("HMAC key length"))?;
    for p in parts {
        mac.update(p);
    }
    let mut out = [0u8; 16];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

/// NT one-way function v1: MD4 of the UTF-16LE password.
pub fn ntowf_v1(password: &str) -> [u8; 16] {
    let mut out = [0u8; 16];
    out.copy_from_slice(&Md4::digest(utf16le(password)));
    out
}

/// NT one-way function v2, the NTLMv2 response key.
pub fn ntowf_v2(password: &str, user: &str, domain: &str) -> WireResult<[u8; 16]> {
    let identity = utf16le(&format!("{}{}", user.to_uppercase(), domain));
    hmac_md5(&ntowf_v1(password), &[&identity])
}

/// Fields of a CHALLENGE message the client needs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Challenge {
    pub flags: u32,
    pub server_challenge: [u8; 8],
    pub target_info: Vec<u8>,
}

impl Challenge {
    /// MsvAvTimestamp from the target info, when the server sent one.
    pub fn timestamp(&self) -> Option<u64> {
        let info = &self.target_info;
        let mut off = 0_usize;
        while off + 4 <= info.len() {
            let id = u16_at(info, off).ok()?;
            let len = u16_at(info, off + 2).ok()? as usize;
            if id == AV_EOL {
                return None;
            }
            let value = slice_at(info, off + 4, len).ok()?;
            if id == AV_TIMESTAMP && len == 8 {
                let mut arr = [0u8; 8];
                arr.copy_from_slice(value);
                return Some(u64::from_le_bytes(arr));
            }
            off += 4 + len;
        }
        None
    }
}

pub fn negotiate_message() -> Vec<u8> {
    let mut m = Vec::with_capacity(32);
    m.extend_from_slice(SIGNATURE);
    m.extend_from_slice(&MSG_NEGOTIATE.to_le_bytes());
    m.extend_from_slice(&CLIENT_FLAGS.to_le_bytes());
    m.extend_from_slice(&[0u8; 16]); // empty domain and workstation fields
    m
}

pub fn parse_challenge(msg: &[u8]) -> WireResult<Challenge> {
    if slice_at(msg, 0, 8)? != SIGNATURE || u32_at(msg, 8)? != MSG_CHALLENGE {
        return Err(malformed("challenge expected"));
    }
    let flags = u32_at(msg, 20)?;
    let mut server_challenge = [0u8; 8];
    server_challenge.copy_from_slice(slice_at(msg, 24, 8)?);
    let info_len = u16_at(msg, 40)? as usize;
    let info_off = u32_at(msg, 44)? as usize;
    let target_info = if info_len == 0 {
        Vec::new()
    } else {
        slice_at(msg, info_off, info_len)?.to_vec()
    };
    Ok(Challenge {
        flags,
        server_challenge,
        target_info,
    })
}

/// Account the AUTHENTICATE message is built for. Empty strings mean anonymous.
#[derive(Clone, Copy, Debug)]
pub struct Identity<'a> {
    pub user: &'a str,
    pub password: &'a str,
    pub domain: &'a str,
    pub workstation: &'a str,
}

/// AUTHENTICATE message plus the key used for SMB signing.
#[derive(Clone, Debug)]
pub struct Authenticate {
    pub message: Vec<u8>,
    pub session_key: [u8; 16],
}

/// NTLMv2 responses for `challenge`. `now` is the FILETIME used when the server sent no timestamp.
pub fn authenticate(
    identity: &Identity<'_>,
    challenge: &Challenge,
    client_challenge: [u8; 8],
    now: u64,
) -> WireResult<Authenticate> {
    let key = ntowf_v2(identity.password, identity.user, identity.domain)?;
    let server_time = challenge.timestamp();
    let time = server_time.unwrap_or(now);

    let blob = client_blob(time, &client_challenge, &challenge.target_info);
    let nt_proof = hmac_md5(&key, &[&challenge.server_challenge, &blob])?;
    let session_key = hmac_md5(&key, &[&nt_proof])?;

    let mut nt_response = nt_proof.to_vec();
    nt_response.extend_from_slice(&blob);

    // With MsvAvTimestamp present the LM response is all zeros.
    let lm_response = if server_time.is_some() {
        vec![0u8; 24]
    } else {
        lm_v2_response(&key, &challenge.server_challenge, &client_challenge)?
    };

    let flags = (challenge.flags & CLIENT_FLAGS) | NEGOTIATE_UNICODE;
    let domain = utf16le(identity.domain);
    let user = utf16le(identity.user);
    let workstation = utf16le(identity.workstation);
    let payload: [&[u8]; 6] = [
        &lm_response,
        &nt_response,
        &domain,
        &user,
        &workstation,
        &[], // EncryptedRandomSessionKey
    ];

    let header_len = 64_usize;
    let mut m = Vec::with_capacity(header_len + payload.iter().map(|p| p.len()).sum::<usize>());
    m.extend_from_slice(SIGNATURE);
    m.extend_from_slice(&MSG_AUTHENTICATE.to_le_bytes());
    let mut offset = header_len;
    for field in payload {
        m.extend_from_slice(&(field.len() as u16).to_le_bytes());
        m.extend_from_slice(&(field.len() as u16).to_le_bytes());
        m.extend_from_slice(&(offset as u32).to_le_bytes());
        offset += field.len();
    }
    m.extend_from_slice(&flags.to_le_bytes());
    for field in payload {
        m.extend_from_slice(field);
    }
    Ok(Authenticate {
        message: m,
        session_key,
    })
}

fn client_blob(time: u64, client_challenge: &[u8; 8], target_info: &[u8]) -> Vec<u8> {
    let mut b = Vec::with_capacity(32 + target_info.len());
    b.extend_from_slice(&[0x01, 0x01, 0, 0, 0, 0, 0, 0]);
    b.extend_from_slice(&time.to_le_bytes());
    b.extend_from_slice(client_challenge);
    b.extend_from_slice(&[0u8; 4]);
    b.extend_from_slice(target_info);
    b.extend_from_slice(&[0u8; 4]);
    b
}

fn lm_v2_response(
    key: &[u8; 16],
    server_challenge: &[u8; 8],
    client_challenge: &[u8; 8],
) -> WireResult<Vec<u8>> {
    let mut r = hmac_md5(key, &[server_challenge, client_challenge])?.to_vec();
    r.extend_from_slice(client_challenge);
    Ok(r)
}
