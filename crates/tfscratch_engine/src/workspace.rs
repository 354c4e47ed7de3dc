//! Workspace identifiers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// A validated workspace name.
///
/// Terraform accepts a name when URL path-segment escaping leaves it
/// unchanged: ASCII alphanumerics plus `-`, `_`, `.`, `~`, `$`, `&`, `+`,
/// `:`, `=` and `@`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WorkspaceName(String);

impl WorkspaceName {
    /// The engine's built-in workspace.
    pub const DEFAULT: &'static str = "default";

    pub fn new(name: impl Into<String>) -> EngineResult<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(EngineError::InvalidWorkspaceName {
                name,
                reason: "name is empty".to_string(),
            });
        }
        if let Some(bad) = name
            .chars()
            .find(|c| !is_path_segment_safe(*c))
        {
            return Err(EngineError::InvalidWorkspaceName {
                reason: format!("character {:?} is not allowed", bad),
                name,
            });
        }
        Ok(Self(name))
    }

    /// `<self>-<hex of suffix>`, in lowercase hex.
    ///
    /// Cannot fail: hex digits and `-` are always allowed.
    pub fn with_hex_suffix(&self, suffix: &[u8]) -> Self {
        let mut name = String::with_capacity(self.0.len() + 1 + suffix.len() * 2);
        name.push_str(&self.0);
        name.push('-');
        for byte in suffix {
            name.push_str(&format!("{:02x}", byte));
        }
        Self(name)
    }

    /// The `default` workspace.
    pub fn default_workspace() -> Self {
        Self(Self::DEFAULT.to_string())
    }

    pub fn is_default(&self) -> bool {
        self.0 == Self::DEFAULT
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_path_segment_safe(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || matches!(c, '-' | '_' | '.' | '~' | '$' | '&' | '+' | ':' | '=' | '@')
}

impl fmt::Display for WorkspaceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for WorkspaceName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for WorkspaceName {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for WorkspaceName {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl FromStr for WorkspaceName {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for WorkspaceName {
    type Error = EngineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<WorkspaceName> for String {
    fn from(name: WorkspaceName) -> Self {
        name.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_typical_names() {
        for name in [
            "default",
            "tfscratch-0a1b2c3d4e5f",
            "staging_eu.1",
            "team@prod",
            "feature+x",
            "env~1",
            "a:b=c$d&e",
        ] {
            assert_eq!(WorkspaceName::new(name).unwrap().as_str(), name);
        }
    }

    #[test]
    fn test_rejects_empty_and_unsafe_names() {
        assert!(WorkspaceName::new("").is_err());
        assert!(WorkspaceName::new("feature/x").is_err());
        assert!(WorkspaceName::new("has space").is_err());
        assert!(WorkspaceName::new("* default").is_err());
        for bad in ["a;b", "a,b", "a?b", "a#b", "a%b", "a!b", "café"] {
            assert!(WorkspaceName::new(bad).is_err(), "{} was accepted", bad);
        }
    }

    #[test]
    fn test_default_workspace() {
        let name = WorkspaceName::default_workspace();
        assert!(name.is_default());
        assert_eq!(name, "default");
    }

    #[test]
    fn test_hex_suffix() {
        let prefix = WorkspaceName::new("tfscratch").unwrap();
        let name = prefix.with_hex_suffix(&[0x0a, 0xbc, 0xff]);
        assert_eq!(name, "tfscratch-0abcff");
        assert_eq!(WorkspaceName::new(name.as_str()).unwrap(), name);
    }
}
