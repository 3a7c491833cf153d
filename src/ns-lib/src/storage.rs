use crate::{FsError, FsResult};
use serde::{Deserialize, Serialize};

/// How quickly a replica of the file content can be served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessLatency {
    Nearline,
    Online,
}

impl AccessLatency {
    pub fn to_int(self) -> i32 {
        match self {
            AccessLatency::Nearline => 0,
            AccessLatency::Online => 1,
        }
    }

    pub fn from_int(v: i32) -> FsResult<Self> {
        match v {
            0 => Ok(AccessLatency::Nearline),
            1 => Ok(AccessLatency::Online),
            other => Err(FsError::Db(format!("bad access latency code {}", other))),
        }
    }
}

/// How long the storage system must retain the file content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetentionPolicy {
    Custodial,
    Output,
    Replica,
}

impl RetentionPolicy {
    pub fn to_int(self) -> i32 {
        match self {
            RetentionPolicy::Custodial => 0,
            RetentionPolicy::Output => 1,
            RetentionPolicy::Replica => 2,
        }
    }

    pub fn from_int(v: i32) -> FsResult<Self> {
        match v {
            0 => Ok(RetentionPolicy::Custodial),
            1 => Ok(RetentionPolicy::Output),
            2 => Ok(RetentionPolicy::Replica),
            other => Err(FsError::Db(format!("bad retention policy code {}", other))),
        }
    }
}

/// Descriptor of one replica of an inode's content on a pool node. The
/// engine tracks descriptors only; the payload lives elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageLocation {
    pub location_type: i32,
    pub location: String,
    pub priority: i32,
    pub ctime: i64,
    pub atime: i64,
    pub online: bool,
}

/// Write-once HSM placement record of an inode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InodeStorageInformation {
    pub hsm_name: String,
    pub storage_group: String,
    pub storage_sub_group: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_and_policy_codecs() {
        assert_eq!(AccessLatency::from_int(1).unwrap(), AccessLatency::Online);
        assert!(AccessLatency::from_int(7).is_err());
        assert_eq!(RetentionPolicy::from_int(2).unwrap(), RetentionPolicy::Replica);
        assert_eq!(
            RetentionPolicy::from_int(RetentionPolicy::Custodial.to_int()).unwrap(),
            RetentionPolicy::Custodial
        );
    }
}
