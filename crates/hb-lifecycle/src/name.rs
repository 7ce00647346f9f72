use crate::error::{LifecycleError, Result};

pub const MIN_LEN: usize = 3;
pub const MAX_LEN: usize = 50;

/// Host names end up in VM names, file paths and remote shell commands.
pub fn validate_host_name(name: &str) -> Result<()> {
    let valid = (MIN_LEN..=MAX_LEN).contains(&name.len())
        && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-');
    if valid {
        Ok(())
    } else {
        Err(LifecycleError::InvalidHostName(name.to_string()))
    }
}
