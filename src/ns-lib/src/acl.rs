use crate::{FsError, FsResult};
use serde::{Deserialize, Serialize};

/// NFSv4-style access-control entry type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AceType {
    AccessAllowed,
    AccessDenied,
}

impl AceType {
    pub fn to_int(self) -> i32 {
        match self {
            AceType::AccessAllowed => 0,
            AceType::AccessDenied => 1,
        }
    }

    pub fn from_int(v: i32) -> Self {
        if v == 0 {
            AceType::AccessAllowed
        } else {
            AceType::AccessDenied
        }
    }
}

/// Resource type an ACL is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RsType {
    Dir,
    File,
}

impl RsType {
    pub fn to_int(self) -> i32 {
        match self {
            RsType::Dir => 0,
            RsType::File => 1,
        }
    }

    pub fn from_int(v: i32) -> FsResult<Self> {
        match v {
            0 => Ok(RsType::Dir),
            1 => Ok(RsType::File),
            other => Err(FsError::Db(format!("bad rs_type code {}", other))),
        }
    }
}

/// Subject of an access-control entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Who {
    Owner,
    OwnerGroup,
    Everyone,
    Anonymous,
    Authenticated,
    User,
    Group,
}

impl Who {
    pub fn to_int(self) -> i32 {
        match self {
            Who::Owner => 0,
            Who::OwnerGroup => 1,
            Who::Everyone => 2,
            Who::Anonymous => 3,
            Who::Authenticated => 4,
            Who::User => 5,
            Who::Group => 6,
        }
    }

    pub fn from_int(v: i32) -> FsResult<Self> {
        match v {
            0 => Ok(Who::Owner),
            1 => Ok(Who::OwnerGroup),
            2 => Ok(Who::Everyone),
            3 => Ok(Who::Anonymous),
            4 => Ok(Who::Authenticated),
            5 => Ok(Who::User),
            6 => Ok(Who::Group),
            other => Err(FsError::Db(format!("bad who code {}", other))),
        }
    }
}

/// One access-control entry. Ordering within an ACL is significant and is
/// preserved by the store via the per-entry ordinal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ace {
    pub ace_type: AceType,
    pub flags: i32,
    pub access_mask: i32,
    pub who: Who,
    pub who_id: i32,
}
