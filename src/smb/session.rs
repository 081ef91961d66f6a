//! One authenticated SMB2 session with one mounted share.

use chrono::Utc;
use log::debug;
use std::fmt;
use std::io;
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

use super::signing::SigningKey;
use super::wire::{self, Command, Header, NegotiateResponse, WireError, WireResult, status};
use super::{ntlm, spnego};
use crate::Connection;
use crate::error::{ScanError, ScanResult};
use crate::pipeline::{ShareEntry, ShareReader, SmbTarget};
use crate::utils::config::SMB_QUERY_BUFFER;

/// NTLM account for a share. Missing username or password are sent as empty strings.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SmbCredentials {
    pub username: String,
    pub password: String,
    pub domain: String,
}

impl fmt::Debug for SmbCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmbCredentials")
            .field("username", &self.username)
            .field("domain", &self.domain)
            .finish_non_exhaustive()
    }
}

impl SmbCredentials {
    /// `username` may be `DOMAIN\user`; a `domain=NAME` entry in `options` overrides that domain.
    pub fn new(username: Option<&str>, password: Option<&str>, options: Option<&str>) -> Self {
        let raw = username.unwrap_or_default().trim();
        let (domain, user) = match raw.split_once('\\') {
            Some((domain, user)) => (domain.to_string(), user.to_string()),
            None => (String::new(), raw.to_string()),
        };
        Self {
            username: user,
            password: password.unwrap_or_default().to_string(),
            domain: options.and_then(option_domain).unwrap_or(domain),
        }
    }

    pub fn from_connection(conn: &Connection) -> Self {
        Self::new(
            conn.username.as_deref(),
            conn.password.as_deref(),
            conn.options.as_deref(),
        )
    }
}

/// `domain=...` from comma or semicolon separated `key=value` options.
fn option_domain(options: &str) -> Option<String> {
    options
        .split([',', ';'])
        .filter_map(|kv| kv.split_once('='))
        .find(|(k, _)| k.trim().eq_ignore_ascii_case("domain"))
        .map(|(_, v)| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Connected, authenticated and mounted share.
///
/// Dropping the session undoes whatever was reached, in order: tree disconnect, logoff, TCP close.
pub struct SmbSession {
    stream: TcpStream,
    /// `//server/share`, used in error and log messages.
    root: String,
    message_id: u64,
    session_id: u64,
    tree_id: u32,
    mounted: bool,
    logged_on: bool,
    signing_key: Option<SigningKey>,
    multi_credit: bool,
    max_transact: u32,
}

impl fmt::Debug for SmbSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmbSession")
            .field("root", &self.root)
            .field("session_id", &self.session_id)
            .field("tree_id", &self.tree_id)
            .finish_non_exhaustive()
    }
}

impl SmbSession {
    /// Dial `target`, authenticate with `creds` and mount the share.
    pub fn open(target: &SmbTarget, creds: &SmbCredentials, timeout: Duration) -> ScanResult<Self> {
        let addr = target.addr();
        let stream = dial(&addr, timeout)?;
        let mut session = Self {
            stream,
            root: target.display_root(),
            message_id: 0,
            session_id: 0,
            tree_id: 0,
            mounted: false,
            logged_on: false,
            signing_key: None,
            multi_credit: false,
            max_transact: SMB_QUERY_BUFFER,
        };

        let negotiated = session.negotiate().map_err(|e| match e {
            WireError::Io(source) => ScanError::Connection {
                addr: addr.clone(),
                source,
            },
            other => ScanError::Negotiate {
                addr: addr.clone(),
                details: other.to_string(),
            },
        })?;
        debug!(
            "negotiated SMB dialect 0x{:04x} with {addr}",
            negotiated.dialect
        );

        session
            .login(creds, &negotiated)
            .map_err(|e| ScanError::Auth {
                user: display_user(creds),
                details: e.to_string(),
            })?;

        session
            .mount(&target.server, &target.share)
            .map_err(|e| ScanError::Mount {
                share: session.root.clone(),
                details: e.to_string(),
            })?;
        debug!("mounted {}", session.root);
        Ok(session)
    }

    /// Send one request and wait for its final response.
    fn call(&mut self, command: Command, body: &[u8]) -> WireResult<(Header, Vec<u8>)> {
        let mut header = Header::request(command, self.message_id, self.tree_id, self.session_id);
        header.credit_charge = u16::from(self.multi_credit);
        self.message_id += u64::from(header.credit_charge.max(1));

        let mut msg = wire::build_message(&header, body);
        if let Some(key) = &self.signing_key
            && !matches!(command, Command::Negotiate | Command::SessionSetup)
        {
            key.sign(&mut msg)?;
        }
        wire::write_frame(&mut self.stream, &msg)?;

        loop {
            let reply = wire::read_frame(&mut self.stream)?;
            let reply_header = Header::decode(&reply)?;
            if reply_header.message_id != header.message_id {
                debug!(
                    "ignoring unsolicited SMB message (command {})",
                    reply_header.command
                );
                continue;
            }
            if reply_header.status == status::PENDING
                && reply_header.flags & wire::FLAGS_ASYNC_COMMAND != 0
            {
                continue;
            }
            return Ok((reply_header, reply));
        }
    }

    fn call_ok(&mut self, command: Command, body: &[u8]) -> WireResult<(Header, Vec<u8>)> {
        let (header, reply) = self.call(command, body)?;
        if header.status != status::SUCCESS {
            return Err(WireError::Status(header.status));
        }
        Ok((header, reply))
    }

    fn negotiate(&mut self) -> WireResult<NegotiateResponse> {
        let (_, reply) = self.call_ok(
            Command::Negotiate,
            &wire::negotiate_request(rand::random()),
        )?;
        let negotiated = wire::parse_negotiate(&reply)?;
        if !wire::DIALECTS.contains(&negotiated.dialect) {
            return Err(WireError::Malformed(format!(
                "server picked dialect 0x{:04x}, which was not offered",
                negotiated.dialect
            )));
        }
        self.multi_credit = negotiated.multi_credit();
        if negotiated.max_transact_size > 0 {
            self.max_transact = negotiated.max_transact_size;
        }
        Ok(negotiated)
    }

    /// Two-leg NTLMSSP exchange inside SPNEGO.
    fn login(&mut self, creds: &SmbCredentials, negotiated: &NegotiateResponse) -> WireResult<()> {
        let init = spnego::wrap_init(&ntlm::negotiate_message());
        let (header, reply) = self.call(
            Command::SessionSetup,
            &wire::session_setup_request(&init),
        )?;
        if header.status != status::MORE_PROCESSING_REQUIRED {
            return Err(WireError::Status(header.status));
        }
        self.session_id = header.session_id;

        let (_, blob) = wire::parse_session_setup(&reply)?;
        let challenge = ntlm::parse_challenge(&spnego::unwrap_token(&blob)?)?;
        let identity = ntlm::Identity {
            user: &creds.username,
            password: &creds.password,
            domain: &creds.domain,
            workstation: "",
        };
        let auth = ntlm::authenticate(
            &identity,
            &challenge,
            rand::random(),
            wire::utc_to_filetime(Utc::now()),
        )?;

        let (_, reply) = self.call_ok(
            Command::SessionSetup,
            &wire::session_setup_request(&spnego::wrap_response(&auth.message)),
        )?;
        self.logged_on = true;

        let (session_flags, _) = wire::parse_session_setup(&reply)?;
        if session_flags & wire::SESSION_FLAG_ENCRYPT_DATA != 0 {
            return Err(WireError::Unsupported("session encryption"));
        }
        let anonymous =
            session_flags & (wire::SESSION_FLAG_IS_GUEST | wire::SESSION_FLAG_IS_NULL) != 0;
        if negotiated.signing_required() && !anonymous {
            self.signing_key = Some(SigningKey::for_dialect(
                negotiated.dialect,
                &auth.session_key,
            )?);
        }
        Ok(())
    }

    fn mount(&mut self, server: &str, share: &str) -> WireResult<()> {
        let unc = format!(r"\\{server}\{share}");
        let (header, reply) =
            self.call_ok(Command::TreeConnect, &wire::tree_connect_request(&unc))?;
        self.tree_id = header.tree_id;
        self.mounted = true;
        if wire::parse_tree_connect(&reply)? & wire::SHAREFLAG_ENCRYPT_DATA != 0 {
            return Err(WireError::Unsupported("share encryption"));
        }
        Ok(())
    }

    /// Open `path` (share-relative, `/`-separated), page through its listing, close the handle.
    fn list(&mut self, path: &str) -> WireResult<Vec<ShareEntry>> {
        let name = path.trim_matches('/').replace('/', "\\");
        let (_, reply) = self.call_ok(Command::Create, &wire::create_dir_request(&name))?;
        let file_id = wire::parse_create(&reply)?;

        let listed = self.query_all(&file_id);
        let closed = self.call_ok(Command::Close, &wire::close_request(&file_id));
        let entries = listed?;
        closed?;
        Ok(entries)
    }

    fn query_all(&mut self, file_id: &[u8; 16]) -> WireResult<Vec<ShareEntry>> {
        let output_len = self.max_transact.min(SMB_QUERY_BUFFER);
        let mut entries = Vec::new();
        let mut restart = true;
        loop {
            let body = wire::query_directory_request(file_id, restart, output_len);
            restart = false;
            let (header, reply) = self.call(Command::QueryDirectory, &body)?;
            match header.status {
                status::SUCCESS => {
                    let buf = wire::parse_query_directory(&reply)?;
                    entries.extend(wire::parse_directory_entries(buf)?);
                }
                status::NO_MORE_FILES => return Ok(entries),
                other => return Err(WireError::Status(other)),
            }
        }
    }

    fn display_path(&self, path: &str) -> String {
        let rel = path.trim_matches('/');
        if rel.is_empty() {
            self.root.clone()
        } else {
            format!("{}/{rel}", self.root)
        }
    }
}

impl ShareReader for SmbSession {
    fn read_dir(&mut self, path: &str) -> ScanResult<Vec<ShareEntry>> {
        self.list(path).map_err(|e| ScanError::Traversal {
            path: self.display_path(path),
            details: e.to_string(),
        })
    }
}

impl Drop for SmbSession {
    fn drop(&mut self) {
        if self.mounted {
            self.mounted = false;
            if let Err(e) = self.call_ok(Command::TreeDisconnect, &wire::empty_request()) {
                debug!("tree disconnect from {} failed: {e}", self.root);
            }
        }
        if self.logged_on {
            self.logged_on = false;
            if let Err(e) = self.call_ok(Command::Logoff, &wire::empty_request()) {
                debug!("logoff from {} failed: {e}", self.root);
            }
        }
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            debug!("closing connection to {} failed: {e}", self.root);
        }
    }
}

fn display_user(creds: &SmbCredentials) -> String {
    if creds.domain.is_empty() {
        creds.username.clone()
    } else {
        format!(r"{}\{}", creds.domain, creds.username)
    }
}

/// TCP connect to the first reachable resolved address, with read and write timeouts set.
fn dial(addr: &str, timeout: Duration) -> ScanResult<TcpStream> {
    let connection_error = |source| ScanError::Connection {
        addr: addr.to_string(),
        source,
    };
    let timeout = timeout.max(Duration::from_secs(1));
    let mut last_err = io::Error::new(io::ErrorKind::NotFound, "address resolved to nothing");
    for socket_addr in addr.to_socket_addrs().map_err(connection_error)? {
        match TcpStream::connect_timeout(&socket_addr, timeout) {
            Ok(stream) => {
                stream
                    .set_read_timeout(Some(timeout))
                    .and_then(|()| stream.set_write_timeout(Some(timeout)))
                    .and_then(|()| stream.set_nodelay(true))
                    .map_err(connection_error)?;
                return Ok(stream);
            }
            Err(e) => last_err = e,
        }
    }
    Err(connection_error(last_err))
}
