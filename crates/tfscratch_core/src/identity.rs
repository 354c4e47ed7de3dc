//! Scratch workspace name generation.

use uuid::Uuid;

use tfscratch_engine::WorkspaceName;

use crate::error::{ConfigError, ConfigResult};

/// Hex characters of the random suffix (48 bits).
pub const SUFFIX_LEN: usize = 12;

/// Produces `<prefix>-<random>` workspace names.
///
/// The suffix comes from a v4 UUID, i.e. from the operating system's
/// entropy source. If that source fails, `uuid` panics and the run aborts
/// before any workspace is touched.
#[derive(Debug, Clone)]
pub struct ScratchIdentity {
    prefix: WorkspaceName,
}

impl ScratchIdentity {
    pub fn new(prefix: impl Into<String>) -> ConfigResult<Self> {
        let prefix = WorkspaceName::new(prefix)
            .map_err(|e| ConfigError::Invalid(format!("scratch_prefix: {}", e)))?;
        Ok(Self { prefix })
    }

    pub fn prefix(&self) -> &str {
        self.prefix.as_str()
    }

    /// Generate a name that differs from every name in `avoid`.
    pub fn generate(&self, avoid: &[&WorkspaceName]) -> WorkspaceName {
        loop {
            let name = self.candidate();
            if !avoid.iter().any(|taken| **taken == name) {
                return name;
            }
        }
    }

    fn candidate(&self) -> WorkspaceName {
        let token = Uuid::new_v4();
        self.prefix.with_hex_suffix(&token.as_bytes()[..SUFFIX_LEN / 2])
    }
}
