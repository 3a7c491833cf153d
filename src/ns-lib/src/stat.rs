use crate::{AccessLatency, RetentionPolicy};
use serde::{Deserialize, Serialize};

/// POSIX file type bits, as stored in the high bits of `imode`.
pub const S_IFREG: u32 = 0o100000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFLNK: u32 = 0o120000;

/// Permission mask (low 12 bits).
pub const S_PERMS: u32 = 0o7777;
/// File type mask.
pub const F_TYPE: u32 = 0o170000;

/// File type bits of a full mode value.
pub fn mode_type(mode: u32) -> u32 {
    mode & F_TYPE
}

/// Attribute-presence bits for [`Stat`]. The driver's attribute UPDATE only
/// touches columns whose bit is set.
pub const ATTR_SIZE: u32 = 1 << 0;
pub const ATTR_MODE: u32 = 1 << 1;
pub const ATTR_UID: u32 = 1 << 2;
pub const ATTR_GID: u32 = 1 << 3;
pub const ATTR_ATIME: u32 = 1 << 4;
pub const ATTR_CTIME: u32 = 1 << 5;
pub const ATTR_MTIME: u32 = 1 << 6;
pub const ATTR_CRTIME: u32 = 1 << 7;
pub const ATTR_ACCESS_LATENCY: u32 = 1 << 8;
pub const ATTR_RETENTION_POLICY: u32 = 1 << 9;

/// Stat record of an inode or of one of its levels. Timestamps are epoch
/// milliseconds. Every setter marks the attribute as defined; a sparse
/// record built by a caller therefore carries exactly the attributes to
/// change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stat {
    size: u64,
    nlink: u32,
    mode: u32,
    uid: u32,
    gid: u32,
    atime: i64,
    ctime: i64,
    mtime: i64,
    crtime: i64,
    generation: u64,
    access_latency: Option<AccessLatency>,
    retention_policy: Option<RetentionPolicy>,
    defined: u32,
}

impl Stat {
    pub fn new() -> Self {
        Stat::default()
    }

    pub fn is_defined(&self, attr: u32) -> bool {
        self.defined & attr != 0
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn set_size(&mut self, size: u64) {
        self.size = size;
        self.defined |= ATTR_SIZE;
    }

    /// Full mode value: type bits | permission bits.
    pub fn mode(&self) -> u32 {
        self.mode
    }

    pub fn set_mode(&mut self, mode: u32) {
        self.mode = mode;
        self.defined |= ATTR_MODE;
    }

    pub fn uid(&self) -> u32 {
        self.uid
    }

    pub fn set_uid(&mut self, uid: u32) {
        self.uid = uid;
        self.defined |= ATTR_UID;
    }

    pub fn gid(&self) -> u32 {
        self.gid
    }

    pub fn set_gid(&mut self, gid: u32) {
        self.gid = gid;
        self.defined |= ATTR_GID;
    }

    pub fn atime(&self) -> i64 {
        self.atime
    }

    pub fn set_atime(&mut self, atime: i64) {
        self.atime = atime;
        self.defined |= ATTR_ATIME;
    }

    pub fn ctime(&self) -> i64 {
        self.ctime
    }

    pub fn set_ctime(&mut self, ctime: i64) {
        self.ctime = ctime;
        self.defined |= ATTR_CTIME;
    }

    pub fn mtime(&self) -> i64 {
        self.mtime
    }

    pub fn set_mtime(&mut self, mtime: i64) {
        self.mtime = mtime;
        self.defined |= ATTR_MTIME;
    }

    pub fn crtime(&self) -> i64 {
        self.crtime
    }

    pub fn set_crtime(&mut self, crtime: i64) {
        self.crtime = crtime;
        self.defined |= ATTR_CRTIME;
    }

    pub fn nlink(&self) -> u32 {
        self.nlink
    }

    pub fn set_nlink(&mut self, nlink: u32) {
        self.nlink = nlink;
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn set_generation(&mut self, generation: u64) {
        self.generation = generation;
    }

    pub fn access_latency(&self) -> Option<AccessLatency> {
        self.access_latency
    }

    pub fn set_access_latency(&mut self, al: AccessLatency) {
        self.access_latency = Some(al);
        self.defined |= ATTR_ACCESS_LATENCY;
    }

    pub fn retention_policy(&self) -> Option<RetentionPolicy> {
        self.retention_policy
    }

    pub fn set_retention_policy(&mut self, rp: RetentionPolicy) {
        self.retention_policy = Some(rp);
        self.defined |= ATTR_RETENTION_POLICY;
    }

    pub fn type_of(&self) -> u32 {
        mode_type(self.mode)
    }

    pub fn is_directory(&self) -> bool {
        self.type_of() == S_IFDIR
    }

    pub fn is_regular(&self) -> bool {
        self.type_of() == S_IFREG
    }

    pub fn is_symlink(&self) -> bool {
        self.type_of() == S_IFLNK
    }
}

/// Namespace-wide totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsStat {
    pub available_space: u64,
    pub total_files: u64,
    pub used_space: u64,
    pub used_files: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setters_mark_defined() {
        let mut stat = Stat::new();
        assert!(!stat.is_defined(ATTR_SIZE));
        stat.set_size(42);
        assert!(stat.is_defined(ATTR_SIZE));
        assert!(!stat.is_defined(ATTR_MODE));
        assert_eq!(stat.size(), 42);
    }

    #[test]
    fn test_type_predicates() {
        let mut stat = Stat::new();
        stat.set_mode(S_IFDIR | 0o755);
        assert!(stat.is_directory());
        assert!(!stat.is_regular());
        stat.set_mode(S_IFLNK | 0o777);
        assert!(stat.is_symlink());
    }
}
