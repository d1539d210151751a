use crate::domain::error::{CentralError, Result};

/// Platform permission prompt, consulted before scanning and connecting
pub trait Permissions: Send + Sync {
    fn is_granted(&self) -> bool;

    /// Ask the user. Returns whether permission ended up granted.
    fn request(&self) -> bool;
}

/// For platforms that need no runtime permission
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysGranted;

impl Permissions for AlwaysGranted {
    fn is_granted(&self) -> bool {
        true
    }

    fn request(&self) -> bool {
        true
    }
}

pub(crate) fn ensure_granted(permissions: &dyn Permissions) -> Result<()> {
    if permissions.is_granted() || permissions.request() {
        Ok(())
    } else {
        Err(CentralError::PermissionDenied)
    }
}
