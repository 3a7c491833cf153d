use crate::{FsError, FsResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Length of every inode identifier.
pub const INODE_ID_LEN: usize = 36;

const ROOT_ID: &str = "000000000000000000000000000000000000";

/// Stable identifier of a namespace node. Opaque 36-character uppercase
/// token; the root of the tree has the well-known all-zero ID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InodeId(String);

impl InodeId {
    /// The well-known root identifier.
    pub fn root() -> Self {
        InodeId(ROOT_ID.to_string())
    }

    /// Allocate a fresh identifier.
    pub fn generate() -> Self {
        InodeId(Uuid::new_v4().to_string().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == ROOT_ID
    }
}

impl FromStr for InodeId {
    type Err = FsError;

    fn from_str(s: &str) -> FsResult<Self> {
        if s.len() != INODE_ID_LEN {
            return Err(FsError::InvalidName(format!(
                "bad inode id '{}': expected {} characters",
                s, INODE_ID_LEN
            )));
        }
        Ok(InodeId(s.to_string()))
    }
}

impl fmt::Display for InodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
