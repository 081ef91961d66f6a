//! SMB2 message layout: Direct TCP framing, the 64-byte header, the request bodies this client
//! sends and the response fields it reads. Offsets follow MS-SMB2 section 2.2.

use chrono::{DateTime, Utc};
use std::io::{self, Read, Write};

use crate::pipeline::ShareEntry;

pub const PROTOCOL_ID: [u8; 4] = [0xFE, b'S', b'M', b'B'];
pub const HEADER_LEN: usize = 64;

/// Largest frame accepted from the server.
const MAX_FRAME_LEN: usize = 8 * 1024 * 1024;

pub const DIALECT_2_0_2: u16 = 0x0202;
pub const DIALECT_2_1: u16 = 0x0210;
pub const DIALECT_3_0: u16 = 0x0300;
pub const DIALECT_3_0_2: u16 = 0x0302;

/// Offered in NEGOTIATE, oldest first.
pub const DIALECTS: [u16; 4] = [DIALECT_2_0_2, DIALECT_2_1, DIALECT_3_0, DIALECT_3_0_2];

pub const FLAGS_SERVER_TO_REDIR: u32 = 0x0000_0001;
pub const FLAGS_ASYNC_COMMAND: u32 = 0x0000_0002;
pub const FLAGS_SIGNED: u32 = 0x0000_0008;

pub const NEGOTIATE_SIGNING_ENABLED: u16 = 0x0001;
pub const NEGOTIATE_SIGNING_REQUIRED: u16 = 0x0002;
pub const GLOBAL_CAP_LARGE_MTU: u32 = 0x0000_0004;

pub const SESSION_FLAG_IS_GUEST: u16 = 0x0001;
pub const SESSION_FLAG_IS_NULL: u16 = 0x0002;
pub const SESSION_FLAG_ENCRYPT_DATA: u16 = 0x0004;

pub const SHAREFLAG_ENCRYPT_DATA: u32 = 0x0000_8000;

const FILE_LIST_DIRECTORY: u32 = 0x0000_0001;
const FILE_READ_ATTRIBUTES: u32 = 0x0000_0080;
const SYNCHRONIZE: u32 = 0x0010_0000;
const FILE_SHARE_ALL: u32 = 0x0000_0007;
const FILE_OPEN: u32 = 0x0000_0001;
const FILE_DIRECTORY_FILE: u32 = 0x0000_0001;
const IMPERSONATION_LEVEL_IMPERSONATION: u32 = 0x0000_0002;

const FILE_DIRECTORY_INFORMATION: u8 = 0x01;
const RESTART_SCANS: u8 = 0x01;
const FILE_ATTRIBUTE_DIRECTORY: u32 = 0x0000_0010;

/// 100ns intervals between 1601-01-01 and 1970-01-01.
const FILETIME_UNIX_OFFSET_SECS: i64 = 11_644_473_600;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum Command {
    Negotiate = 0x0000,
    SessionSetup = 0x0001,
    Logoff = 0x0002,
    TreeConnect = 0x0003,
    TreeDisconnect = 0x0004,
    Create = 0x0005,
    Close = 0x0006,
    QueryDirectory = 0x000E,
}

/// NTSTATUS values this client reacts to.
pub mod status {
    pub const SUCCESS: u32 = 0x0000_0000;
    pub const PENDING: u32 = 0x0000_0103;
    pub const NO_MORE_FILES: u32 = 0x8000_0006;
    pub const MORE_PROCESSING_REQUIRED: u32 = 0xC000_0016;
    pub const NO_SUCH_FILE: u32 = 0xC000_000F;
    pub const ACCESS_DENIED: u32 = 0xC000_0022;
    pub const OBJECT_NAME_NOT_FOUND: u32 = 0xC000_0034;
    pub const OBJECT_PATH_NOT_FOUND: u32 = 0xC000_003A;
    pub const LOGON_FAILURE: u32 = 0xC000_006D;
    pub const ACCOUNT_RESTRICTION: u32 = 0xC000_006E;
    pub const PASSWORD_EXPIRED: u32 = 0xC000_0071;
    pub const ACCOUNT_DISABLED: u32 = 0xC000_0072;
    pub const NOT_A_DIRECTORY: u32 = 0xC000_0103;
    pub const BAD_NETWORK_NAME: u32 = 0xC000_00CC;
    pub const USER_SESSION_DELETED: u32 = 0xC000_0203;

    /// Readable name for log and error messages.
    pub fn name(code: u32) -> String {
        let known = match code {
            SUCCESS => "STATUS_SUCCESS",
            PENDING => "STATUS_PENDING",
            NO_MORE_FILES => "STATUS_NO_MORE_FILES",
            MORE_PROCESSING_REQUIRED => "STATUS_MORE_PROCESSING_REQUIRED",
            NO_SUCH_FILE => "STATUS_NO_SUCH_FILE",
            ACCESS_DENIED => "STATUS_ACCESS_DENIED",
            OBJECT_NAME_NOT_FOUND => "STATUS_OBJECT_NAME_NOT_FOUND",
            OBJECT_PATH_NOT_FOUND => "STATUS_OBJECT_PATH_NOT_FOUND",
            LOGON_FAILURE => "STATUS_LOGON_FAILURE",
            ACCOUNT_RESTRICTION => "STATUS_ACCOUNT_RESTRICTION",
            PASSWORD_EXPIRED => "STATUS_PASSWORD_EXPIRED",
            ACCOUNT_DISABLED => "STATUS_ACCOUNT_DISABLED",
            NOT_A_DIRECTORY => "STATUS_NOT_A_DIRECTORY",
            BAD_NETWORK_NAME => "STATUS_BAD_NETWORK_NAME",
            USER_SESSION_DELETED => "STATUS_USER_SESSION_DELETED",
            _ => return format!("NTSTATUS 0x{code:08X}"),
        };
        known.to_string()
    }
}

/// Failure below the SMB command layer; each session phase maps it to its own `ScanError`.
#[derive(Debug)]
pub enum WireError {
    Io(io::Error),
    Status(u32),
    Malformed(String),
    Unsupported(&'static str),
}

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "{e}"),
            Self::Status(code) => write!(f, "{}", status::name(*code)),
            Self::Malformed(msg) => write!(f, "malformed response: {msg}"),
            Self::Unsupported(what) => write!(f, "server requires {what}, which is not supported"),
        }
    }
}

impl From<io::Error> for WireError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

pub type WireResult<T> = std::result::Result<T, WireError>;

fn malformed(what: &str) -> WireError {
    WireError::Malformed(what.to_string())
}

// ---- little-endian field access ----

pub(crate) fn slice_at<'a>(buf: &'a [u8], off: usize, len: usize) -> WireResult<&'a [u8]> {
    off.checked_add(len)
        .and_then(|end| buf.get(off..end))
        .ok_or_else(|| malformed("truncated field"))
}

pub(crate) fn u16_at(buf: &[u8], off: usize) -> WireResult<u16> {
    let b = slice_at(buf, off, 2)?;
    Ok(u16::from_le_bytes([b[0], b[1]]))
}

pub(crate) fn u32_at(buf: &[u8], off: usize) -> WireResult<u32> {
    let b = slice_at(buf, off, 4)?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

pub(crate) fn u64_at(buf: &[u8], off: usize) -> WireResult<u64> {
    let b = slice_at(buf, off, 8)?;
    let mut arr = [0u8; 8];
    arr.copy_from_slice(b);
    Ok(u64::from_le_bytes(arr))
}

pub(crate) fn utf16le(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

pub(crate) fn from_utf16le(buf: &[u8]) -> WireResult<String> {
    if buf.len() % 2 != 0 {
        return Err(malformed("odd UTF-16 length"));
    }
    let units: Vec<u16> = buf
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    String::from_utf16(&units).map_err(|_| malformed("invalid UTF-16 name"))
}

// ---- time ----

/// FILETIME (100ns ticks since 1601) to UTC; zero and out-of-range values map to the Unix epoch.
pub fn filetime_to_utc(ticks: u64) -> DateTime<Utc> {
    if ticks == 0 {
        return DateTime::<Utc>::default();
    }
    let secs = (ticks / 10_000_000) as i64 - FILETIME_UNIX_OFFSET_SECS;
    let nanos = ((ticks % 10_000_000) * 100) as u32;
    DateTime::<Utc>::from_timestamp(secs, nanos).unwrap_or_default()
}

/// UTC to FILETIME ticks (used for the NTLMv2 client timestamp).
pub fn utc_to_filetime(t: DateTime<Utc>) -> u64 {
    let secs = t.timestamp() + FILETIME_UNIX_OFFSET_SECS;
    (secs.max(0) as u64) * 10_000_000 + u64::from(t.timestamp_subsec_nanos() / 100)
}

// ---- header ----

/// SMB2 header fields used by this client (sync form on send; async id read back on interim replies).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Header {
    pub credit_charge: u16,
    pub status: u32,
    pub command: u16,
    pub credits: u16,
    pub flags: u32,
    pub next_command: u32,
    pub message_id: u64,
    pub tree_id: u32,
    pub session_id: u64,
    pub signature: [u8; 16],
}

impl Header {
    pub fn request(command: Command, message_id: u64, tree_id: u32, session_id: u64) -> Self {
        Self {
            command: command as u16,
            credits: 64,
            message_id,
            tree_id,
            session_id,
            ..Default::default()
        }
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&PROTOCOL_ID);
        out.extend_from_slice(&(HEADER_LEN as u16).to_le_bytes());
        out.extend_from_slice(&self.credit_charge.to_le_bytes());
        out.extend_from_slice(&self.status.to_le_bytes());
        out.extend_from_slice(&self.command.to_le_bytes());
        out.extend_from_slice(&self.credits.to_le_bytes());
        out.extend_from_slice(&self.flags.to_le_bytes());
        out.extend_from_slice(&self.next_command.to_le_bytes());
        out.extend_from_slice(&self.message_id.to_le_bytes());
        out.extend_from_slice(&0x0000_FEFFu32.to_le_bytes()); // ProcessId
        out.extend_from_slice(&self.tree_id.to_le_bytes());
        out.extend_from_slice(&self.session_id.to_le_bytes());
        out.extend_from_slice(&self.signature);
    }

    pub fn decode(msg: &[u8]) -> WireResult<Self> {
        if slice_at(msg, 0, 4)? != PROTOCOL_ID {
            return Err(malformed("not an SMB2 message"));
        }
        if u16_at(msg, 4)? as usize != HEADER_LEN {
            return Err(malformed("bad header size"));
        }
        let flags = u32_at(msg, 16)?;
        let tree_id = if flags & FLAGS_ASYNC_COMMAND != 0 {
            0
        } else {
            u32_at(msg, 36)?
        };
        let mut signature = [0u8; 16];
        signature.copy_from_slice(slice_at(msg, 48, 16)?);
        Ok(Self {
            credit_charge: u16_at(msg, 6)?,
            status: u32_at(msg, 8)?,
            command: u16_at(msg, 12)?,
            credits: u16_at(msg, 14)?,
            flags,
            next_command: u32_at(msg, 20)?,
            message_id: u64_at(msg, 24)?,
            tree_id,
            session_id: u64_at(msg, 40)?,
            signature,
        })
    }
}

/// Header + body as one message.
pub fn build_message(header: &Header, body: &[u8]) -> Vec<u8> {
    let mut msg = Vec::with_capacity(HEADER_LEN + body.len());
    header.encode(&mut msg);
    msg.extend_from_slice(body);
    msg
}

// ---- Direct TCP framing ----

pub fn write_frame<W: Write>(w: &mut W, msg: &[u8]) -> io::Result<()> {
    let len = msg.len();
    if len > 0x00FF_FFFF {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "SMB message too large"));
    }
    let prefix = [0u8, (len >> 16) as u8, (len >> 8) as u8, len as u8];
    w.write_all(&prefix)?;
    w.write_all(msg)?;
    w.flush()
}

pub fn read_frame<R: Read>(r: &mut R) -> WireResult<Vec<u8>> {
    let mut prefix = [0u8; 4];
    r.read_exact(&mut prefix)?;
    if prefix[0] != 0 {
        return Err(malformed("unexpected session message type"));
    }
    let len = (usize::from(prefix[1]) << 16) | (usize::from(prefix[2]) << 8) | usize::from(prefix[3]);
    if len < HEADER_LEN || len > MAX_FRAME_LEN {
        return Err(malformed("frame length out of range"));
    }
    let mut msg = vec![0u8; len];
    r.read_exact(&mut msg)?;
    Ok(msg)
}

// ---- request bodies ----

pub fn negotiate_request(client_guid: [u8; 16]) -> Vec<u8> {
    let mut b = Vec::with_capacity(36 + DIALECTS.len() * 2);
    b.extend_from_slice(&36u16.to_le_bytes());
    b.extend_from_slice(&(DIALECTS.len() as u16).to_le_bytes());
    b.extend_from_slice(&NEGOTIATE_SIGNING_ENABLED.to_le_bytes());
    b.extend_from_slice(&0u16.to_le_bytes());
    b.extend_from_slice(&0u32.to_le_bytes()); // Capabilities
    b.extend_from_slice(&client_guid);
    b.extend_from_slice(&0u64.to_le_bytes()); // ClientStartTime
    for d in DIALECTS {
        b.extend_from_slice(&d.to_le_bytes());
    }
    b
}

pub fn session_setup_request(security_blob: &[u8]) -> Vec<u8> {
    let mut b = Vec::with_capacity(24 + security_blob.len());
    b.extend_from_slice(&25u16.to_le_bytes());
    b.push(0); // Flags
    b.push(NEGOTIATE_SIGNING_ENABLED as u8);
    b.extend_from_slice(&0u32.to_le_bytes()); // Capabilities
    b.extend_from_slice(&0u32.to_le_bytes()); // Channel
    b.extend_from_slice(&((HEADER_LEN + 24) as u16).to_le_bytes());
    b.extend_from_slice(&(security_blob.len() as u16).to_le_bytes());
    b.extend_from_slice(&0u64.to_le_bytes()); // PreviousSessionId
    b.extend_from_slice(security_blob);
    b
}

/// LOGOFF and TREE_DISCONNECT share this 4-byte body.
pub fn empty_request() -> Vec<u8> {
    vec![4, 0, 0, 0]
}

pub fn tree_connect_request(unc: &str) -> Vec<u8> {
    let path = utf16le(unc);
    let mut b = Vec::with_capacity(8 + path.len());
    b.extend_from_slice(&9u16.to_le_bytes());
    b.extend_from_slice(&0u16.to_le_bytes());
    b.extend_from_slice(&((HEADER_LEN + 8) as u16).to_le_bytes());
    b.extend_from_slice(&(path.len() as u16).to_le_bytes());
    b.extend_from_slice(&path);
    b
}

/// CREATE opening an existing directory for listing. `name` is `\`-separated, "" for the share root.
pub fn create_dir_request(name: &str) -> Vec<u8> {
    let name = utf16le(name);
    let mut b = Vec::with_capacity(56 + name.len().max(1));
    b.extend_from_slice(&57u16.to_le_bytes());
    b.push(0); // SecurityFlags
    b.push(0); // RequestedOplockLevel: none
    b.extend_from_slice(&IMPERSONATION_LEVEL_IMPERSONATION.to_le_bytes());
    b.extend_from_slice(&0u64.to_le_bytes()); // SmbCreateFlags
    b.extend_from_slice(&0u64.to_le_bytes()); // Reserved
    b.extend_from_slice(&(FILE_LIST_DIRECTORY | FILE_READ_ATTRIBUTES | SYNCHRONIZE).to_le_bytes());
    b.extend_from_slice(&0u32.to_le_bytes()); // FileAttributes
    b.extend_from_slice(&FILE_SHARE_ALL.to_le_bytes());
    b.extend_from_slice(&FILE_OPEN.to_le_bytes());
    b.extend_from_slice(&FILE_DIRECTORY_FILE.to_le_bytes());
    b.extend_from_slice(&((HEADER_LEN + 56) as u16).to_le_bytes());
    b.extend_from_slice(&(name.len() as u16).to_le_bytes());
    b.extend_from_slice(&0u32.to_le_bytes()); // CreateContextsOffset
    b.extend_from_slice(&0u32.to_le_bytes()); // CreateContextsLength
    if name.is_empty() {
        b.push(0); // Buffer must hold at least one byte
    } else {
        b.extend_from_slice(&name);
    }
    b
}

pub fn query_directory_request(file_id: &[u8; 16], restart: bool, output_len: u32) -> Vec<u8> {
    let pattern = utf16le("*");
    let mut b = Vec::with_capacity(32 + pattern.len());
    b.extend_from_slice(&33u16.to_le_bytes());
    b.push(FILE_DIRECTORY_INFORMATION);
    b.push(if restart { RESTART_SCANS } else { 0 });
    b.extend_from_slice(&0u32.to_le_bytes()); // FileIndex
    b.extend_from_slice(file_id);
    b.extend_from_slice(&((HEADER_LEN + 32) as u16).to_le_bytes());
    b.extend_from_slice(&(pattern.len() as u16).to_le_bytes());
    b.extend_from_slice(&output_len.to_le_bytes());
    b.extend_from_slice(&pattern);
    b
}

pub fn close_request(file_id: &[u8; 16]) -> Vec<u8> {
    let mut b = Vec::with_capacity(24);
    b.extend_from_slice(&24u16.to_le_bytes());
    b.extend_from_slice(&0u16.to_le_bytes()); // Flags
    b.extend_from_slice(&0u32.to_le_bytes());
    b.extend_from_slice(file_id);
    b
}

// ---- responses (offsets in `msg` include the 64-byte header) ----

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NegotiateResponse {
    pub security_mode: u16,
    pub dialect: u16,
    pub capabilities: u32,
    pub max_transact_size: u32,
    pub security_blob: Vec<u8>,
}

impl NegotiateResponse {
    pub fn signing_required(&self) -> bool {
        self.security_mode & NEGOTIATE_SIGNING_REQUIRED != 0
    }

    /// Credit charges apply (SMB 2.1+ with LARGE_MTU).
    pub fn multi_credit(&self) -> bool {
        self.dialect != DIALECT_2_0_2 && self.capabilities & GLOBAL_CAP_LARGE_MTU != 0
    }
}

/// Security buffer referenced by an offset/length pair at `field` in the body.
fn security_buffer(msg: &[u8], field: usize) -> WireResult<Vec<u8>> {
    let off = u16_at(msg, HEADER_LEN + field)? as usize;
    let len = u16_at(msg, HEADER_LEN + field + 2)? as usize;
    if len == 0 {
        return Ok(Vec::new());
    }
    Ok(slice_at(msg, off, len)?.to_vec())
}

pub fn parse_negotiate(msg: &[u8]) -> WireResult<NegotiateResponse> {
    let b = HEADER_LEN;
    if u16_at(msg, b)? != 65 {
        return Err(malformed("negotiate response size"));
    }
    Ok(NegotiateResponse {
        security_mode: u16_at(msg, b + 2)?,
        dialect: u16_at(msg, b + 4)?,
        capabilities: u32_at(msg, b + 24)?,
        max_transact_size: u32_at(msg, b + 28)?,
        security_blob: security_buffer(msg, 56)?,
    })
}

/// (SessionFlags, security blob) of a SESSION_SETUP response.
pub fn parse_session_setup(msg: &[u8]) -> WireResult<(u16, Vec<u8>)> {
    if u16_at(msg, HEADER_LEN)? != 9 {
        return Err(malformed("session setup response size"));
    }
    let flags = u16_at(msg, HEADER_LEN + 2)?;
    Ok((flags, security_buffer(msg, 4)?))
}

/// ShareFlags of a TREE_CONNECT response.
pub fn parse_tree_connect(msg: &[u8]) -> WireResult<u32> {
    if u16_at(msg, HEADER_LEN)? != 16 {
        return Err(malformed("tree connect response size"));
    }
    u32_at(msg, HEADER_LEN + 4)
}

pub fn parse_create(msg: &[u8]) -> WireResult<[u8; 16]> {
    if u16_at(msg, HEADER_LEN)? != 89 {
        return Err(malformed("create response size"));
    }
    let mut id = [0u8; 16];
    id.copy_from_slice(slice_at(msg, HEADER_LEN + 64, 16)?);
    Ok(id)
}

/// Output buffer of a QUERY_DIRECTORY response.
pub fn parse_query_directory(msg: &[u8]) -> WireResult<&[u8]> {
    if u16_at(msg, HEADER_LEN)? != 9 {
        return Err(malformed("query directory response size"));
    }
    let off = u16_at(msg, HEADER_LEN + 2)? as usize;
    let len = u32_at(msg, HEADER_LEN + 4)? as usize;
    if len == 0 {
        return Ok(&[]);
    }
    slice_at(msg, off, len)
}

/// Decode a chain of FILE_DIRECTORY_INFORMATION records.
pub fn parse_directory_entries(buf: &[u8]) -> WireResult<Vec<ShareEntry>> {
    let mut entries = Vec::new();
    let mut off = 0_usize;
    while off < buf.len() {
        let next = u32_at(buf, off)? as usize;
        let last_write = u64_at(buf, off + 24)?;
        let end_of_file = u64_at(buf, off + 40)?;
        let attributes = u32_at(buf, off + 56)?;
        let name_len = u32_at(buf, off + 60)? as usize;
        let name = from_utf16le(slice_at(buf, off + 64, name_len)?)?;
        entries.push(ShareEntry {
            name,
            is_dir: attributes & FILE_ATTRIBUTE_DIRECTORY != 0,
            size: end_of_file,
            mod_time: filetime_to_utc(last_write),
        });
        if next == 0 {
            break;
        }
        off = off.checked_add(next).ok_or_else(|| malformed("entry offset"))?;
    }
    Ok(entries)
}
