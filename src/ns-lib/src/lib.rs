mod acl;
mod checksum;
mod inode_id;
mod stat;
mod storage;

pub use acl::*;
pub use checksum::*;
pub use inode_id::*;
pub use stat::*;
pub use storage::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FsError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("not a directory: {0}")]
    NotDir(String),
    #[error("not a file: {0}")]
    NotFile(String),
    #[error("directory not empty: {0}")]
    DirNotEmpty(String),
    #[error("invalid name: {0}")]
    InvalidName(String),
    #[error("duplicate entry: {0}")]
    DuplicateEntry(String),
    #[error("foreign key violation: {0}")]
    ForeignKeyViolation(String),
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
    #[error("too many links: {0}")]
    TooManyLinks(String),
    #[error("I/O error reading blob: {0}")]
    BlobIo(String),
    #[error("db error: {0}")]
    Db(String),
}

impl FsError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, FsError::NotFound(_))
    }
}

pub type FsResult<T> = std::result::Result<T, FsError>;
