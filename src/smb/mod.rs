//! Blocking SMB2/SMB3 client: just enough of the protocol to authenticate with NTLMv2, mount a
//! share and list directories.

pub mod ntlm;
mod session;
pub mod signing;
pub mod spnego;
#[cfg(test)]
mod test_server;
pub mod wire;

pub use session::{SmbCredentials, SmbSession};
