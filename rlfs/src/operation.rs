use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::Error;

/// The rate-limitable operation kinds.
///
/// Byte-bearing operations (`Read`, `Write`) are charged their byte count;
/// everything else is charged 1 per call. Only byte-bearing operations
/// support a burst configuration.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum OperationClass {
    /// Metadata queries: open, existence checks, size/time/type lookups.
    Stat,
    /// Reading bytes from a file.
    Read,
    /// Writing bytes, truncating, creating directories, moving files.
    Write,
    /// Enumerating directory contents.
    List,
    /// Removing files and directories.
    Delete,
}

impl OperationClass {
    pub const ALL: [OperationClass; 5] = [
        OperationClass::Stat,
        OperationClass::Read,
        OperationClass::Write,
        OperationClass::List,
        OperationClass::Delete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationClass::Stat => "stat",
            OperationClass::Read => "read",
            OperationClass::Write => "write",
            OperationClass::List => "list",
            OperationClass::Delete => "delete",
        }
    }

    /// Burst only makes sense for operations whose cost is a byte count.
    pub fn supports_burst(&self) -> bool {
        matches!(self, OperationClass::Read | OperationClass::Write)
    }
}

impl fmt::Display for OperationClass {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationClass {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s.to_ascii_lowercase().as_str() {
            "stat" => Ok(OperationClass::Stat),
            "read" => Ok(OperationClass::Read),
            "write" => Ok(OperationClass::Write),
            "list" => Ok(OperationClass::List),
            "delete" => Ok(OperationClass::Delete),
            _ => Err(Error::invalid_config(format!(
                "invalid operation '{}': valid operations are stat, read, write, list, delete",
                s
            ))),
        }
    }
}
