//! Scripted SMB2 server on a loopback `TcpListener` thread. It answers one client, records every
//! request in arrival order and hands them back once the client hangs up.

use std::collections::HashMap;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread::{self, JoinHandle};

use super::ntlm::tests::challenge_message;
use super::spnego;
use super::wire::tests::dir_record;
use super::wire::{
    self, Command, DIALECT_2_1, FLAGS_SERVER_TO_REDIR, HEADER_LEN, Header,
    NEGOTIATE_SIGNING_ENABLED, NEGOTIATE_SIGNING_REQUIRED, SESSION_FLAG_IS_GUEST, status,
};
use crate::pipeline::SmbTarget;

pub(crate) const SESSION_ID: u64 = 0x0000_4000_0000_0011;
pub(crate) const TREE_ID: u32 = 7;
pub(crate) const SHARE: &str = "docs";

/// 2023-11-14T22:13:20Z as FILETIME.
pub(crate) const MTIME: u64 = (1_700_000_000 + 11_644_473_600) * 10_000_000;

/// One QUERY_DIRECTORY answer: (name, is_dir, size).
pub(crate) type Page = Vec<(&'static str, bool, u64)>;

#[derive(Clone, Debug)]
pub(crate) struct Script {
    pub negotiate_status: u32,
    pub dialect: u16,
    pub signing_required: bool,
    pub logon_status: u32,
    pub guest: bool,
    pub session_flags: u16,
    pub tree_status: u32,
    pub share_flags: u32,
    /// `\`-separated directory ("" is the share root) to its listing pages.
    pub dirs: HashMap<String, Vec<Page>>,
    /// QUERY_DIRECTORY on this directory fails with this status.
    pub query_failure: Option<(String, u32)>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            negotiate_status: status::SUCCESS,
            dialect: DIALECT_2_1,
            signing_required: false,
            logon_status: status::SUCCESS,
            guest: false,
            session_flags: 0,
            tree_status: status::SUCCESS,
            share_flags: 0,
            dirs: HashMap::new(),
            query_failure: None,
        }
    }
}

impl Script {
    pub fn dir(mut self, name: &str, pages: Vec<Page>) -> Self {
        self.dirs.insert(name.to_string(), pages);
        self
    }
}

/// A request as the server received it.
pub(crate) struct Received {
    pub header: Header,
    pub raw: Vec<u8>,
}

impl Received {
    pub fn is(&self, command: Command) -> bool {
        self.header.command == command as u16
    }

    /// Body field at `off` (offsets relative to the end of the header).
    pub fn u16_at(&self, off: usize) -> u16 {
        wire::u16_at(&self.raw, HEADER_LEN + off).unwrap()
    }
}

pub(crate) struct FakeServer {
    pub addr: SocketAddr,
    handle: JoinHandle<Vec<Received>>,
}

impl FakeServer {
    pub fn start(script: Script) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            serve(stream, &script)
        });
        Self { addr, handle }
    }

    pub fn target(&self, remote_path: &str) -> SmbTarget {
        SmbTarget {
            server: "127.0.0.1".into(),
            port: self.addr.port(),
            share: SHARE.into(),
            remote_path: remote_path.into(),
        }
    }

    /// Wait for the client to disconnect and return what it sent.
    pub fn finish(self) -> Vec<Received> {
        self.handle.join().unwrap()
    }
}

/// Command codes of `received`, in order.
pub(crate) fn commands(received: &[Received]) -> Vec<u16> {
    received.iter().map(|r| r.header.command).collect()
}

struct Open {
    dir: String,
    next_page: usize,
}

struct State<'a> {
    script: &'a Script,
    setup_rounds: usize,
    opens: HashMap<u64, Open>,
    next_file_id: u64,
}

fn serve(mut stream: TcpStream, script: &Script) -> Vec<Received> {
    let mut state = State {
        script,
        setup_rounds: 0,
        opens: HashMap::new(),
        next_file_id: 1,
    };
    let mut received = Vec::new();
    while let Ok(raw) = wire::read_frame(&mut stream) {
        let header = Header::decode(&raw).unwrap();
        let reply = state.answer(&header, &raw);
        received.push(Received { header, raw });
        if wire::write_frame(&mut stream, &reply).is_err() {
            break;
        }
    }
    received
}

/// Error responses carry the 9-byte ERROR body.
fn error_body() -> Vec<u8> {
    vec![9, 0, 0, 0, 0, 0, 0, 0, 0]
}

impl State<'_> {
    fn answer(&mut self, req: &Header, raw: &[u8]) -> Vec<u8> {
        let mut session_id = req.session_id;
        let mut tree_id = req.tree_id;
        let (status, body) = match req.command {
            c if c == Command::Negotiate as u16 => self.negotiate(),
            c if c == Command::SessionSetup as u16 => {
                session_id = SESSION_ID;
                self.session_setup()
            }
            c if c == Command::TreeConnect as u16 => {
                tree_id = TREE_ID;
                self.tree_connect()
            }
            c if c == Command::Create as u16 => self.create(raw),
            c if c == Command::QueryDirectory as u16 => self.query_directory(raw),
            c if c == Command::Close as u16 => self.close(raw),
            c if c == Command::TreeDisconnect as u16 || c == Command::Logoff as u16 => {
                (status::SUCCESS, vec![4, 0, 0, 0])
            }
            _ => (0xC000_00BB, error_body()),
        };
        let header = Header {
            credit_charge: req.credit_charge,
            status,
            command: req.command,
            credits: 1,
            flags: FLAGS_SERVER_TO_REDIR,
            message_id: req.message_id,
            tree_id,
            session_id,
            ..Default::default()
        };
        wire::build_message(&header, &body)
    }

    fn negotiate(&self) -> (u32, Vec<u8>) {
        if self.script.negotiate_status != status::SUCCESS {
            return (self.script.negotiate_status, error_body());
        }
        let mut mode = NEGOTIATE_SIGNING_ENABLED;
        if self.script.signing_required {
            mode |= NEGOTIATE_SIGNING_REQUIRED;
        }
        let mut body = vec![0u8; 64];
        body[0..2].copy_from_slice(&65u16.to_le_bytes());
        body[2..4].copy_from_slice(&mode.to_le_bytes());
        body[4..6].copy_from_slice(&self.script.dialect.to_le_bytes());
        body[28..32].copy_from_slice(&65_536u32.to_le_bytes());
        body[56..58].copy_from_slice(&((HEADER_LEN + 64) as u16).to_le_bytes());
        (status::SUCCESS, body)
    }

    fn session_setup(&mut self) -> (u32, Vec<u8>) {
        self.setup_rounds += 1;
        if self.setup_rounds == 1 {
            // Target info with MsvAvEOL only: the client falls back to its own clock.
            let blob = spnego::wrap_response(&challenge_message(&[0, 0, 0, 0]));
            return (status::MORE_PROCESSING_REQUIRED, session_setup_body(0, &blob));
        }
        if self.script.logon_status != status::SUCCESS {
            return (self.script.logon_status, error_body());
        }
        let mut flags = self.script.session_flags;
        if self.script.guest {
            flags |= SESSION_FLAG_IS_GUEST;
        }
        (status::SUCCESS, session_setup_body(flags, &[]))
    }

    fn tree_connect(&self) -> (u32, Vec<u8>) {
        if self.script.tree_status != status::SUCCESS {
            return (self.script.tree_status, error_body());
        }
        let mut body = vec![0u8; 16];
        body[0..2].copy_from_slice(&16u16.to_le_bytes());
        body[2] = 1; // disk
        body[4..8].copy_from_slice(&self.script.share_flags.to_le_bytes());
        (status::SUCCESS, body)
    }

    fn create(&mut self, raw: &[u8]) -> (u32, Vec<u8>) {
        let off = wire::u16_at(raw, HEADER_LEN + 44).unwrap() as usize;
        let len = wire::u16_at(raw, HEADER_LEN + 46).unwrap() as usize;
        let name = wire::from_utf16le(wire::slice_at(raw, off, len).unwrap()).unwrap();
        if !self.script.dirs.contains_key(&name) {
            return (status::OBJECT_NAME_NOT_FOUND, error_body());
        }
        let id = self.next_file_id;
        self.next_file_id += 1;
        self.opens.insert(
            id,
            Open {
                dir: name,
                next_page: 0,
            },
        );
        let mut body = vec![0u8; 88];
        body[0..2].copy_from_slice(&89u16.to_le_bytes());
        body[64..72].copy_from_slice(&id.to_le_bytes());
        (status::SUCCESS, body)
    }

    fn query_directory(&mut self, raw: &[u8]) -> (u32, Vec<u8>) {
        let id = wire::u64_at(raw, HEADER_LEN + 8).unwrap();
        let open = self.opens.get_mut(&id).expect("query on unknown handle");
        if let Some((dir, code)) = &self.script.query_failure
            && *dir == open.dir
        {
            return (*code, error_body());
        }
        let pages = &self.script.dirs[&open.dir];
        let Some(page) = pages.get(open.next_page) else {
            return (status::NO_MORE_FILES, error_body());
        };
        open.next_page += 1;

        let mut buf = Vec::new();
        for (i, (name, is_dir, size)) in page.iter().enumerate() {
            let attrs = if *is_dir { 0x10 } else { 0x20 };
            buf.extend(dir_record(name, attrs, *size, MTIME, i + 1 == page.len()));
        }
        let mut body = vec![0u8; 8];
        body[0..2].copy_from_slice(&9u16.to_le_bytes());
        body[2..4].copy_from_slice(&((HEADER_LEN + 8) as u16).to_le_bytes());
        body[4..8].copy_from_slice(&(buf.len() as u32).to_le_bytes());
        body.extend_from_slice(&buf);
        (status::SUCCESS, body)
    }

    fn close(&mut self, raw: &[u8]) -> (u32, Vec<u8>) {
        let id = wire::u64_at(raw, HEADER_LEN + 8).unwrap();
        self.opens.remove(&id);
        let mut body = vec![0u8; 60];
        body[0..2].copy_from_slice(&60u16.to_le_bytes());
        (status::SUCCESS, body)
    }
}

fn session_setup_body(flags: u16, blob: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(8 + blob.len());
    body.extend_from_slice(&9u16.to_le_bytes());
    body.extend_from_slice(&flags.to_le_bytes());
    body.extend_from_slice(&((HEADER_LEN + 8) as u16).to_le_bytes());
    body.extend_from_slice(&(blob.len() as u16).to_le_bytes());
    body.extend_from_slice(blob);
    body
}
