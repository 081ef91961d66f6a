//! Message signing: HMAC-SHA256 over the session key for SMB 2.x, AES-128-CMAC over a derived
//! signing key for SMB 3.0 and 3.0.2 (MS-SMB2 3.1.4.1, 3.2.5.3.1).

use aes::Aes128;
use cmac::Cmac;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;

use super::wire::{DIALECT_3_0, FLAGS_SIGNED, HEADER_LEN, WireError, WireResult};

const SIGNATURE_RANGE: std::ops::Range<usize> = 48..64;
const FLAGS_RANGE: std::ops::Range<usize> = 16..20;

/// KDF label and context for the SMB 3.0.x signing key, NUL terminators included.
const SIGNING_LABEL: &[u8] = b"SMB2AESCMAC\0";
const SIGNING_CONTEXT: &[u8] = b"SmbSign\0";

#[derive(Clone, PartialEq, Eq)]
pub enum SigningKey {
    HmacSha256([u8; 16]),
    AesCmac([u8; 16]),
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HmacSha256(_) => f.write_str("SigningKey::HmacSha256(..)"),
            Self::AesCmac(_) => f.write_str("SigningKey::AesCmac(..)"),
        }
    }
}

fn key_error() -> WireError {
    WireError::Malformed("signing key length".to_string())
}

/// SP800-108 counter-mode KDF with HMAC-SHA256, one block, L = 128.
pub fn kdf(key: &[u8], label: &[u8], context: &[u8]) -> WireResult<[u8; 16]> {
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key).map_err(|_| key_error())?;
    mac.update(&1u32.to_be_bytes());
    mac.update(label);
    mac.update(&[0]);
    mac.update(context);
    mac.update(&128u32.to_be_bytes());
    let mut out = [0u8; 16];
    out.copy_from_slice(&mac.finalize().into_bytes()[..16]);
    Ok(out)
}

pub fn aes_cmac(key: &[u8; 16], msg: &[u8]) -> WireResult<[u8; 16]> {
    let mut mac = <Cmac<Aes128> as Mac>::new_from_slice(key).map_err(|_| key_error())?;
    mac.update(msg);
    let mut out = [0u8; 16];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

impl SigningKey {
    /// Key for `dialect` given the NTLM session key.
    pub fn for_dialect(dialect: u16, session_key: &[u8; 16]) -> WireResult<Self> {
        if dialect >= DIALECT_3_0 {
            Ok(Self::AesCmac(kdf(session_key, SIGNING_LABEL, SIGNING_CONTEXT)?))
        } else {
            Ok(Self::HmacSha256(*session_key))
        }
    }

    /// 16-byte signature of `msg`, whose signature field must already be zeroed.
    fn mac(&self, msg: &[u8]) -> WireResult<[u8; 16]> {
        match self {
            Self::HmacSha256(key) => {
                let mut mac =
                    <Hmac<Sha256> as Mac>::new_from_slice(key).map_err(|_| key_error())?;
                mac.update(msg);
                let mut out = [0u8; 16];
                out.copy_from_slice(&mac.finalize().into_bytes()[..16]);
                Ok(out)
            }
            Self::AesCmac(key) => aes_cmac(key, msg),
        }
    }

    /// Set SMB2_FLAGS_SIGNED and write the signature into the header.
    pub fn sign(&self, msg: &mut [u8]) -> WireResult<()> {
        if msg.len() < HEADER_LEN {
            return Err(WireError::Malformed("message shorter than header".to_string()));
        }
        let mut flags = [0u8; 4];
        flags.copy_from_slice(&msg[FLAGS_RANGE]);
        let flags = u32::from_le_bytes(flags) | FLAGS_SIGNED;
        msg[FLAGS_RANGE].copy_from_slice(&flags.to_le_bytes());
        msg[SIGNATURE_RANGE].fill(0);
        let signature = self.mac(msg)?;
        msg[SIGNATURE_RANGE].copy_from_slice(&signature);
        Ok(())
    }

    /// True when `msg` carries a valid signature under this key.
    pub fn verify(&self, msg: &[u8]) -> bool {
        if msg.len() < HEADER_LEN {
            return false;
        }
        let mut copy = msg.to_vec();
        copy[SIGNATURE_RANGE].fill(0);
        self.mac(&copy)
            .is_ok_and(|expected| expected[..] == msg[SIGNATURE_RANGE])
    }
}
