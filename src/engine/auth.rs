//! Capability check run before any connection-scoped operation on behalf of a user.

use crate::Connection;
use crate::error::{ScanError, ScanResult};

pub trait Authorizer: Send + Sync {
    /// `Ok(())` when `user_id` may act on `connection`; otherwise `ScanError::Authorization`.
    fn authorize(&self, user_id: i64, connection: &Connection) -> ScanResult<()>;
}

/// Denies everything. The default until real authentication exists.
#[derive(Clone, Copy, Debug, Default)]
pub struct RejectAll;

impl Authorizer for RejectAll {
    fn authorize(&self, _user_id: i64, connection: &Connection) -> ScanResult<()> {
        Err(ScanError::Authorization {
            connection_id: connection.id,
        })
    }
}

/// Allows a user to act on the connections they own.
#[derive(Clone, Copy, Debug, Default)]
pub struct OwnerOnly;

impl Authorizer for OwnerOnly {
    fn authorize(&self, user_id: i64, connection: &Connection) -> ScanResult<()> {
        if connection.user_id == user_id {
            Ok(())
        } else {
            Err(ScanError::Authorization {
                connection_id: connection.id,
            })
        }
    }
}
