//! Decide from a connection's path strings whether to walk the local filesystem or an SMB share.

use std::fmt;
use std::path::PathBuf;

use crate::error::{ScanError, ScanResult};
use crate::utils::config::SMB_PORT;

/// Where a connection's files live.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScanTarget {
    Local(PathBuf),
    Smb(SmbTarget),
}

/// Parsed `//server[:port]/share[/dir...]` location.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SmbTarget {
    pub server: String,
    pub port: u16,
    pub share: String,
    /// Directory under the share root, `/`-separated, no leading or trailing slash ("" = root).
    pub remote_path: String,
}

impl SmbTarget {
    /// `host:port` for the TCP dial.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.server, self.port)
    }

    /// `//server/share` prefix for stored file paths.
    pub fn display_root(&self) -> String {
        format!("//{}/{}", self.server, self.share)
    }
}

impl fmt::Display for SmbTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_root())?;
        if !self.remote_path.is_empty() {
            write!(f, "/{}", self.remote_path)?;
        }
        Ok(())
    }
}

/// True if `path` names an SMB location.
#[inline]
pub fn is_smb_path(path: &str) -> bool {
    path.starts_with("//")
}

/// Classify a connection's `base_path`/`remote_path`.
///
/// `//server/share[/dir]` in `base_path` selects SMB with `remote_path` appended below it; a
/// `//...` `remote_path` under a non-SMB base is the legacy combined form. Anything else is a
/// local root (`base_path` joined with `remote_path`). Purely string-based: no filesystem access.
pub fn classify(base_path: &str, remote_path: &str) -> ScanResult<ScanTarget> {
    if is_smb_path(base_path) {
        return parse_smb(base_path, remote_path).map(ScanTarget::Smb);
    }
    if is_smb_path(remote_path) {
        return parse_smb(remote_path, "").map(ScanTarget::Smb);
    }
    let mut root = PathBuf::from(base_path);
    let sub = remote_path.trim_start_matches('/');
    if !sub.is_empty() {
        root.push(sub);
    }
    Ok(ScanTarget::Local(root))
}

fn parse_smb(spec: &str, extra: &str) -> ScanResult<SmbTarget> {
    let invalid = |reason| ScanError::InvalidPathSpec {
        spec: spec.to_string(),
        reason,
    };
    let mut segments = spec.trim_start_matches('/').split('/');
    let host = segments.next().unwrap_or_default();
    let share = segments.next().ok_or_else(|| invalid("missing share name"))?;
    if host.is_empty() {
        return Err(invalid("missing server name"));
    }
    if share.is_empty() {
        return Err(invalid("missing share name"));
    }
    let (server, port) = split_port(host).ok_or_else(|| invalid("bad port"))?;

    let remote_path = segments
        .chain(extra.split('/'))
        .filter(|s| !s.is_empty() && *s != ".")
        .collect::<Vec<_>>()
        .join("/");

    Ok(SmbTarget {
        server: server.to_string(),
        port,
        share: share.to_string(),
        remote_path,
    })
}

/// `host` or `host:port`. Bracketless IPv6 literals contain several colons and keep the default port.
fn split_port(host: &str) -> Option<(&str, u16)> {
    match host.rsplit_once(':') {
        Some((name, port)) if !name.contains(':') => {
            let port = port.parse::<u16>().ok().filter(|p| *p != 0)?;
            (!name.is_empty()).then_some((name, port))
        }
        _ => Some((host, SMB_PORT)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn smb(server: &str, share: &str, remote: &str) -> ScanTarget {
        ScanTarget::Smb(SmbTarget {
            server: server.into(),
            port: SMB_PORT,
            share: share.into(),
            remote_path: remote.into(),
        })
    }

    #[test]
    fn smb_base_with_subpath() {
        assert_eq!(
            classify("//nas/docs", "reports/2024").unwrap(),
            smb("nas", "docs", "reports/2024")
        );
        assert_eq!(
            classify("//nas/docs", "/reports/").unwrap(),
            smb("nas", "docs", "reports")
        );
    }

    #[test]
    fn smb_base_carrying_directories() {
        assert_eq!(
            classify("//nas/docs/archive", "old").unwrap(),
            smb("nas", "docs", "archive/old")
        );
    }

    #[test]
    fn smb_share_root() {
        assert_eq!(classify("//nas/docs", "").unwrap(), smb("nas", "docs", ""));
        assert_eq!(classify("//nas/docs/", ".").unwrap(), smb("nas", "docs", ""));
    }

    #[test]
    fn smb_explicit_port() {
        let ScanTarget::Smb(t) = classify("//nas:1445/docs", "").unwrap() else {
            panic!("expected smb");
        };
        assert_eq!(t.server, "nas");
        assert_eq!(t.port, 1445);
        assert_eq!(t.addr(), "nas:1445");
    }

    #[test]
    fn legacy_combined_remote_path() {
        assert_eq!(
            classify("", "//nas/docs/dir").unwrap(),
            smb("nas", "docs", "dir")
        );
    }

    #[test]
    fn smb_without_share_is_invalid() {
        for spec in ["//nas", "//nas/", "///docs", "//"] {
            let err = classify(spec, "").unwrap_err();
            assert!(
                matches!(err, ScanError::InvalidPathSpec { .. }),
                "{spec}: {err}"
            );
        }
    }

    #[test]
    fn smb_bad_port_is_invalid() {
        assert!(matches!(
            classify("//nas:http/docs", ""),
            Err(ScanError::InvalidPathSpec { .. })
        ));
    }

    #[test]
    fn local_join() {
        assert_eq!(
            classify("/srv/pdf", "inbox").unwrap(),
            ScanTarget::Local(PathBuf::from("/srv/pdf/inbox"))
        );
        assert_eq!(
            classify("/srv/pdf", "/inbox").unwrap(),
            ScanTarget::Local(PathBuf::from("/srv/pdf/inbox"))
        );
        assert_eq!(
            classify("/srv/pdf", "").unwrap(),
            ScanTarget::Local(PathBuf::from("/srv/pdf"))
        );
    }

    #[test]
    fn smb_routing_ignores_local_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        // Even when a local directory with the literal name exists, `//` stays SMB.
        let literal = format!("/{}", dir.path().display());
        assert!(literal.starts_with("//"));
        assert!(matches!(
            classify(&literal, "").unwrap(),
            ScanTarget::Smb(_)
        ));
    }

    #[test]
    fn display_includes_remote_path() {
        let ScanTarget::Smb(t) = classify("//nas/docs", "a/b").unwrap() else {
            panic!("expected smb");
        };
        assert_eq!(t.to_string(), "//nas/docs/a/b");
        assert_eq!(t.display_root(), "//nas/docs");
    }
}
