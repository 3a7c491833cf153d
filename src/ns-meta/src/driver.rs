use log::info;
use ns_lib::{
    Ace, AceType, AccessLatency, Checksum, ChecksumKind, FsError, FsResult, FsStat, InodeId,
    InodeStorageInformation, RetentionPolicy, RsType, Stat, StorageLocation, Who, ATTR_ATIME,
    ATTR_CRTIME, ATTR_CTIME, ATTR_MTIME, ATTR_SIZE, ATTR_UID, ATTR_GID, ATTR_MODE, S_IFDIR,
    S_IFREG, S_PERMS,
};
use rusqlite::{params, Connection, OptionalExtension, ToSql};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::dir_stream::DirectoryStream;

const IOMODE_ENABLE: i32 = 1;
const IOMODE_DISABLE: i32 = 0;

/// Synthetic totals reported by `fs_stat`; the namespace itself has no
/// capacity limit.
pub const AVAILABLE_SPACE: u64 = i64::MAX as u64;
pub const TOTAL_FILES: u64 = i64::MAX as u64;

/// Default priority assigned to a newly added replica location.
const DEFAULT_LOCATION_PRIORITY: i32 = 10;
const LOCATION_STATE_ONLINE: i32 = 1;

pub(crate) fn unix_time_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Maps a database error onto the engine error taxonomy. Constraint codes
/// carry the distinction the callers rely on: foreign-key failures become
/// the dedicated typed error, unique/primary-key failures mean the entry
/// already exists.
pub(crate) fn map_db_err(e: rusqlite::Error) -> FsError {
    match &e {
        rusqlite::Error::SqliteFailure(err, _) => match err.extended_code {
            rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY => {
                FsError::ForeignKeyViolation(e.to_string())
            }
            rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
            | rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE => FsError::DuplicateEntry(e.to_string()),
            _ => FsError::Db(e.to_string()),
        },
        rusqlite::Error::FromSqlConversionFailure(..) => FsError::BlobIo(e.to_string()),
        _ => FsError::Db(e.to_string()),
    }
}

pub(crate) fn inode_from_db(s: String) -> FsResult<InodeId> {
    s.parse()
        .map_err(|_| FsError::InvariantViolation(format!("malformed inode id '{}' in database", s)))
}

fn level_table(level: u8) -> FsResult<&'static str> {
    Ok(match level {
        1 => "t_level_1",
        2 => "t_level_2",
        3 => "t_level_3",
        4 => "t_level_4",
        5 => "t_level_5",
        6 => "t_level_6",
        7 => "t_level_7",
        other => {
            return Err(FsError::InvalidName(format!("bad level {}", other)));
        }
    })
}

fn new_tag_id() -> String {
    Uuid::new_v4().to_string().to_uppercase()
}

/// Raw column values of an inode stat row, read before any enum decoding.
pub(crate) struct InodeStatRow {
    size: i64,
    nlink: i64,
    itype: i64,
    imode: i64,
    uid: i64,
    gid: i64,
    atime: i64,
    ctime: i64,
    mtime: i64,
    crtime: i64,
    generation: i64,
    access_latency: Option<i64>,
    retention_policy: Option<i64>,
}

/// Reads the 13 stat columns of `t_inodes` starting at column `base`.
/// Column order must match `INODE_STAT_COLUMNS`.
pub(crate) fn read_inode_stat_row_at(
    row: &rusqlite::Row<'_>,
    base: usize,
) -> rusqlite::Result<InodeStatRow> {
    Ok(InodeStatRow {
        size: row.get(base)?,
        nlink: row.get(base + 1)?,
        itype: row.get(base + 2)?,
        imode: row.get(base + 3)?,
        uid: row.get(base + 4)?,
        gid: row.get(base + 5)?,
        atime: row.get(base + 6)?,
        ctime: row.get(base + 7)?,
        mtime: row.get(base + 8)?,
        crtime: row.get(base + 9)?,
        generation: row.get(base + 10)?,
        access_latency: row.get(base + 11)?,
        retention_policy: row.get(base + 12)?,
    })
}

pub(crate) const INODE_STAT_COLUMNS: &str =
    "isize,inlink,itype,imode,iuid,igid,iatime,ictime,imtime,icrtime,igeneration,iaccess_latency,iretention_policy";

pub(crate) fn finish_inode_stat(raw: InodeStatRow) -> FsResult<Stat> {
    let mut stat = Stat::new();
    stat.set_size(raw.size as u64);
    stat.set_nlink(raw.nlink as u32);
    stat.set_mode(raw.imode as u32 | raw.itype as u32);
    stat.set_uid(raw.uid as u32);
    stat.set_gid(raw.gid as u32);
    stat.set_atime(raw.atime);
    stat.set_ctime(raw.ctime);
    stat.set_mtime(raw.mtime);
    stat.set_crtime(raw.crtime);
    stat.set_generation(raw.generation as u64);
    if let Some(code) = raw.access_latency {
        stat.set_access_latency(AccessLatency::from_int(code as i32)?);
    }
    if let Some(code) = raw.retention_policy {
        stat.set_retention_policy(RetentionPolicy::from_int(code as i32)?);
    }
    Ok(stat)
}

/// Two process-wide options of the engine: the SQL dialect used to pick a
/// driver, and the default I/O flag stamped on newly created inodes.
#[derive(Debug, Clone, Default)]
pub struct DriverConfig {
    pub dialect: Option<String>,
    pub inode_io_enabled: bool,
}

impl DriverConfig {
    pub fn from_env() -> Self {
        let dialect = std::env::var("NS_DIALECT").ok().filter(|v| !v.is_empty());
        let inode_io_enabled = std::env::var("NS_INODE_IO")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        DriverConfig {
            dialect,
            inode_io_enabled,
        }
    }
}

/// Resolves a driver by dialect name. Unknown names fall back to the
/// default driver.
pub fn driver_for_dialect(config: &DriverConfig) -> Box<dyn FsSqlDriver> {
    match config.dialect.as_deref() {
        Some(name) if name.eq_ignore_ascii_case("sqlite") => {
            Box::new(SqliteFsSqlDriver::new(config))
        }
        Some(other) => {
            info!("no driver for dialect '{}', using default", other);
            Box::new(DefaultFsSqlDriver::new(config))
        }
        None => Box::new(DefaultFsSqlDriver::new(config)),
    }
}

/// The sole mutator of the namespace database. Every method is one ordered
/// sequence of statements on the caller's connection; the caller owns the
/// transaction boundary. Default method bodies are the portable statements;
/// a dialect driver overrides individual methods and inherits the rest.
pub trait FsSqlDriver: Send + Sync {
    /// I/O flag stamped on newly created inodes.
    fn io_mode(&self) -> i32;

    fn fs_stat(&self, conn: &Connection) -> FsResult<FsStat> {
        let (files, space) = conn
            .query_row(
                "SELECT COUNT(ipnfsid), COALESCE(SUM(isize), 0) FROM t_inodes WHERE itype = ?1",
                params![S_IFREG],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
            )
            .map_err(map_db_err)?;
        Ok(FsStat {
            available_space: AVAILABLE_SPACE,
            total_files: TOTAL_FILES,
            used_space: space as u64,
            used_files: files as u64,
        })
    }

    /// Creates a new inode with a fresh ID and an entry in `parent`.
    /// The parent's link count and modification time are updated.
    fn create_file(
        &self,
        conn: &Connection,
        parent: &InodeId,
        name: &str,
        uid: u32,
        gid: u32,
        mode: u32,
        itype: u32,
    ) -> FsResult<InodeId> {
        self.create_file_with_id(conn, parent, &InodeId::generate(), name, uid, gid, mode, itype)
    }

    /// Creates a new entry in `parent` for a caller-supplied inode ID.
    fn create_file_with_id(
        &self,
        conn: &Connection,
        parent: &InodeId,
        inode: &InodeId,
        name: &str,
        uid: u32,
        gid: u32,
        mode: u32,
        itype: u32,
    ) -> FsResult<InodeId> {
        let nlink = if itype == S_IFDIR { 2 } else { 1 };
        self.create_inode(conn, inode, itype, uid, gid, mode, nlink)?;
        self.create_entry_in_parent(conn, parent, name, inode)?;
        self.inc_nlink(conn, parent, 1)?;
        if itype == S_IFDIR {
            self.create_entry_in_parent(conn, inode, ".", inode)?;
            self.create_entry_in_parent(conn, inode, "..", parent)?;
        }
        Ok(inode.clone())
    }

    /// Names in a directory, self-entries excluded. The inode is not tested
    /// to be a directory.
    fn list_dir(&self, conn: &Connection, dir: &InodeId) -> FsResult<Vec<String>> {
        let mut stmt = conn
            .prepare(
                "SELECT iname FROM t_dirs
                 WHERE iparent = ?1 AND iname NOT IN ('.', '..') ORDER BY iname",
            )
            .map_err(map_db_err)?;
        let names = stmt
            .query_map(params![dir.as_str()], |row| row.get::<_, String>(0))
            .map_err(map_db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(map_db_err)?;
        Ok(names)
    }

    /// Lazy `(name, inode, stat)` stream over a directory. Forward-only and
    /// not restartable; release with `close`.
    fn new_directory_stream<'c>(&self, conn: &'c Connection, dir: &InodeId) -> DirectoryStream<'c> {
        DirectoryStream::new(conn, dir.clone())
    }

    fn remove(&self, conn: &Connection, parent: &InodeId, name: &str) -> FsResult<()> {
        if name == "." || name == ".." {
            return Err(FsError::InvalidName(format!("bad name: '{}'", name)));
        }

        let inode = self
            .inode_of(conn, parent, name)?
            .ok_or_else(|| FsError::NotFound(format!("{} has no entry '{}'", parent, name)))?;
        let stat = self.stat(conn, &inode, 0)?.ok_or_else(|| {
            FsError::InvariantViolation(format!("entry '{}' points to missing inode {}", name, inode))
        })?;

        if stat.is_directory() {
            self.remove_dir(conn, parent, &inode, name, &stat)
        } else {
            self.remove_file(conn, parent, &inode, name)
        }
    }

    fn remove_dir(
        &self,
        conn: &Connection,
        parent: &InodeId,
        inode: &InodeId,
        name: &str,
        stat: &Stat,
    ) -> FsResult<()> {
        if stat.nlink() > 2 {
            return Err(FsError::DirNotEmpty(format!("directory '{}' is not empty", name)));
        }

        let n = conn
            .execute(
                "DELETE FROM t_dirs WHERE iparent = ?1 AND iname IN ('.', '..')",
                params![inode.as_str()],
            )
            .map_err(map_db_err)?;
        if n != 2 {
            return Err(FsError::InvariantViolation(format!(
                "expected 2 self entries in {}, removed {}",
                inode, n
            )));
        }

        self.dec_nlink(conn, inode, 2)?;
        self.remove_tags(conn, inode)?;
        if !self.remove_entry_in_parent(conn, parent, name, inode)? {
            return Err(FsError::NotFound(format!("{} has no entry '{}'", parent, name)));
        }
        if !self.remove_inode_if_unlinked(conn, inode)? {
            return Err(FsError::InvariantViolation(format!(
                "{} has non-zero link count",
                inode
            )));
        }

        // The parent link count is updated last: during bulk deletes in the
        // same directory the parent row is the contention point, so it is
        // held locked for the shortest possible time.
        self.dec_nlink(conn, parent, 1)
    }

    fn remove_file(
        &self,
        conn: &Connection,
        parent: &InodeId,
        inode: &InodeId,
        name: &str,
    ) -> FsResult<()> {
        if self.remove_entry_in_parent(conn, parent, name, inode)? {
            self.dec_nlink(conn, inode, 1)?;
            self.remove_inode_if_unlinked(conn, inode)?;
            // parent last, see remove_dir
            self.dec_nlink(conn, parent, 1)?;
        }
        Ok(())
    }

    /// Unlinks an inode from every directory it appears in and removes it.
    fn remove_inode(&self, conn: &Connection, inode: &InodeId) -> FsResult<()> {
        let stat = self
            .stat(conn, inode, 0)?
            .ok_or_else(|| FsError::NotFound(format!("no such inode {}", inode)))?;

        if stat.is_directory() {
            let n = conn
                .execute(
                    "DELETE FROM t_dirs WHERE iparent = ?1 AND iname IN ('.', '..')",
                    params![inode.as_str()],
                )
                .map_err(map_db_err)?;
            if n != 2 {
                return Err(FsError::InvariantViolation(format!(
                    "expected 2 self entries in {}, removed {}",
                    inode, n
                )));
            }
            self.remove_tags(conn, inode)?;
        }

        // Zeroing the link count first blocks concurrent transactions from
        // adding further links while the hard links are dismantled.
        conn.execute(
            "UPDATE t_inodes SET inlink = 0 WHERE ipnfsid = ?1",
            params![inode.as_str()],
        )
        .map_err(map_db_err)?;

        let mut stmt = conn
            .prepare("SELECT iparent FROM t_dirs WHERE ipnfsid = ?1 AND iname NOT IN ('.', '..')")
            .map_err(map_db_err)?;
        let parents = stmt
            .query_map(params![inode.as_str()], |row| row.get::<_, String>(0))
            .map_err(map_db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(map_db_err)?;
        drop(stmt);

        for parent in &parents {
            self.dec_nlink(conn, &inode_from_db(parent.clone())?, 1)?;
        }
        let n = conn
            .execute(
                "DELETE FROM t_dirs WHERE ipnfsid = ?1 AND iname NOT IN ('.', '..')",
                params![inode.as_str()],
            )
            .map_err(map_db_err)?;
        if n != parents.len() {
            return Err(FsError::InvariantViolation(format!(
                "expected {} links to {}, removed {}",
                parents.len(),
                inode,
                n
            )));
        }

        self.remove_inode_if_unlinked(conn, inode)?;
        Ok(())
    }

    /// Stat of an inode, or of one of its auxiliary levels. Missing rows
    /// yield `None`.
    fn stat(&self, conn: &Connection, inode: &InodeId, level: u8) -> FsResult<Option<Stat>> {
        if level == 0 {
            let raw = conn
                .query_row(
                    &format!(
                        "SELECT {} FROM t_inodes WHERE ipnfsid = ?1",
                        INODE_STAT_COLUMNS
                    ),
                    params![inode.as_str()],
                    |row| read_inode_stat_row_at(row, 0),
                )
                .optional()
                .map_err(map_db_err)?;
            match raw {
                None => Ok(None),
                Some(raw) => finish_inode_stat(raw).map(Some),
            }
        } else {
            let table = level_table(level)?;
            let raw = conn
                .query_row(
                    &format!(
                        "SELECT isize,inlink,imode,iuid,igid,iatime,ictime,imtime FROM {} WHERE ipnfsid = ?1",
                        table
                    ),
                    params![inode.as_str()],
                    |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, i64>(1)?,
                            row.get::<_, i64>(2)?,
                            row.get::<_, i64>(3)?,
                            row.get::<_, i64>(4)?,
                            row.get::<_, i64>(5)?,
                            row.get::<_, i64>(6)?,
                            row.get::<_, i64>(7)?,
                        ))
                    },
                )
                .optional()
                .map_err(map_db_err)?;
            Ok(raw.map(|(size, nlink, mode, uid, gid, atime, ctime, mtime)| {
                let mut stat = Stat::new();
                stat.set_size(size as u64);
                stat.set_nlink(nlink as u32);
                // level streams are always regular files
                stat.set_mode(mode as u32 | S_IFREG);
                stat.set_uid(uid as u32);
                stat.set_gid(gid as u32);
                stat.set_atime(atime);
                stat.set_ctime(ctime);
                stat.set_mtime(mtime);
                stat.set_crtime(mtime);
                stat.set_generation(0);
                stat
            }))
        }
    }

    /// Creates a directory in `parent`. The parent's link count and
    /// modification time are updated, and the new directory gets its
    /// `.`/`..` entries.
    fn mkdir(
        &self,
        conn: &Connection,
        parent: &InodeId,
        name: &str,
        uid: u32,
        gid: u32,
        mode: u32,
    ) -> FsResult<InodeId> {
        let parent_stat = self
            .stat(conn, parent, 0)?
            .ok_or_else(|| FsError::NotFound(format!("no such inode {}", parent)))?;
        if !parent_stat.is_directory() {
            return Err(FsError::NotDir(parent.to_string()));
        }
        self.create_file(conn, parent, name, uid, gid, mode, S_IFDIR)
    }

    /// `mkdir` plus tag inheritance from the parent and the initial ACL.
    fn mkdir_with_tags_and_acl(
        &self,
        conn: &Connection,
        parent: &InodeId,
        name: &str,
        uid: u32,
        gid: u32,
        mode: u32,
        acl: &[Ace],
    ) -> FsResult<InodeId> {
        let inode = self.mkdir(conn, parent, name, uid, gid, mode)?;
        self.copy_tags(conn, parent, &inode)?;
        self.set_acl(conn, &inode, acl)?;
        Ok(inode)
    }

    /// Moves `src_name` from `src_dir` to `dst_name` in `dst_dir` by
    /// rewriting the directory entry in place. Link counts and times of the
    /// two parents are not touched.
    fn move_entry(
        &self,
        conn: &Connection,
        src_dir: &InodeId,
        src_name: &str,
        dst_dir: &InodeId,
        dst_name: &str,
    ) -> FsResult<()> {
        if src_name == "." || src_name == ".." || dst_name == "." || dst_name == ".." {
            return Err(FsError::InvalidName("'.' and '..' cannot be moved".to_string()));
        }

        let inode = self
            .inode_of(conn, src_dir, src_name)?
            .ok_or_else(|| FsError::NotFound(format!("{} has no entry '{}'", src_dir, src_name)))?;

        conn.execute(
            "UPDATE t_dirs SET iparent = ?3, iname = ?4 WHERE iparent = ?1 AND iname = ?2",
            params![src_dir.as_str(), src_name, dst_dir.as_str(), dst_name],
        )
        .map_err(map_db_err)?;

        // if moving a directory, point '..' at the new parent
        let stat = self.stat(conn, &inode, 0)?.ok_or_else(|| {
            FsError::InvariantViolation(format!("entry '{}' points to missing inode {}", dst_name, inode))
        })?;
        if stat.is_directory() {
            conn.execute(
                "UPDATE t_dirs SET ipnfsid = ?2 WHERE iparent = ?1 AND iname = '..'",
                params![inode.as_str(), dst_dir.as_str()],
            )
            .map_err(map_db_err)?;
        }
        Ok(())
    }

    /// Child inode of `name` in `parent`, or `None`.
    fn inode_of(
        &self,
        conn: &Connection,
        parent: &InodeId,
        name: &str,
    ) -> FsResult<Option<InodeId>> {
        let id = conn
            .query_row(
                "SELECT ipnfsid FROM t_dirs WHERE iparent = ?1 AND iname = ?2",
                params![parent.as_str(), name],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(map_db_err)?;
        id.map(inode_from_db).transpose()
    }

    /// Path of an inode relative to `start_from`. With hard links one of the
    /// possible paths is returned; a detached inode yields an empty string.
    fn inode2path(
        &self,
        conn: &Connection,
        inode: &InodeId,
        start_from: &InodeId,
    ) -> FsResult<String> {
        if inode == start_from {
            return Ok("/".to_string());
        }

        let mut elements = Vec::new();
        let mut current = inode.clone();
        while &current != start_from {
            let row = conn
                .query_row(
                    "SELECT iparent, iname FROM t_dirs
                     WHERE ipnfsid = ?1 AND iname NOT IN ('.', '..')",
                    params![current.as_str()],
                    |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
                )
                .optional()
                .map_err(map_db_err)?;
            let (parent, name) = match row {
                Some(v) => v,
                None => return Ok(String::new()),
            };
            elements.push(name);
            current = inode_from_db(parent)?;
        }

        elements.reverse();
        Ok(format!("/{}", elements.join("/")))
    }

    /// Inserts a `t_inodes` row with initial values. New files have size 0,
    /// new directories the synthetic size 512.
    fn create_inode(
        &self,
        conn: &Connection,
        inode: &InodeId,
        itype: u32,
        uid: u32,
        gid: u32,
        mode: u32,
        nlink: u32,
    ) -> FsResult<()> {
        let now = unix_time_millis();
        let size: i64 = if itype == S_IFDIR { 512 } else { 0 };
        conn.execute(
            "INSERT INTO t_inodes (ipnfsid, itype, imode, inlink, iuid, igid, isize, iio,
                ictime, iatime, imtime, icrtime, igeneration)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9, ?9, ?9, 0)",
            params![
                inode.as_str(),
                itype,
                mode & S_PERMS,
                nlink,
                uid,
                gid,
                size,
                self.io_mode(),
                now
            ],
        )
        .map_err(map_db_err)?;
        Ok(())
    }

    /// Inserts an auxiliary level row for the inode.
    fn create_level(
        &self,
        conn: &Connection,
        inode: &InodeId,
        uid: u32,
        gid: u32,
        mode: u32,
        level: u8,
    ) -> FsResult<()> {
        let table = level_table(level)?;
        let now = unix_time_millis();
        conn.execute(
            &format!(
                "INSERT INTO {} (ipnfsid, imode, inlink, iuid, igid, isize, iatime, ictime, imtime, ifiledata)
                 VALUES (?1, ?2, 1, ?3, ?4, 0, ?5, ?5, ?5, NULL)",
                table
            ),
            params![inode.as_str(), mode, uid, gid, now],
        )
        .map_err(map_db_err)?;
        Ok(())
    }

    fn remove_inode_if_unlinked(&self, conn: &Connection, inode: &InodeId) -> FsResult<bool> {
        let n = conn
            .execute(
                "DELETE FROM t_inodes WHERE ipnfsid = ?1 AND inlink = 0",
                params![inode.as_str()],
            )
            .map_err(map_db_err)?;
        Ok(n > 0)
    }

    fn remove_inode_level(&self, conn: &Connection, inode: &InodeId, level: u8) -> FsResult<bool> {
        let table = level_table(level)?;
        let n = conn
            .execute(
                &format!("DELETE FROM {} WHERE ipnfsid = ?1", table),
                params![inode.as_str()],
            )
            .map_err(map_db_err)?;
        Ok(n > 0)
    }

    /// Increases the link count by `delta`, bumping mtime, ctime and the
    /// generation counter.
    fn inc_nlink(&self, conn: &Connection, inode: &InodeId, delta: i64) -> FsResult<()> {
        let now = unix_time_millis();
        conn.execute(
            "UPDATE t_inodes
             SET inlink = inlink + ?2, imtime = ?3, ictime = ?3, igeneration = igeneration + 1
             WHERE ipnfsid = ?1",
            params![inode.as_str(), delta, now],
        )
        .map_err(map_db_err)?;
        Ok(())
    }

    /// Decreases the link count by `delta`, bumping mtime, ctime and the
    /// generation counter.
    fn dec_nlink(&self, conn: &Connection, inode: &InodeId, delta: i64) -> FsResult<()> {
        let now = unix_time_millis();
        conn.execute(
            "UPDATE t_inodes
             SET inlink = inlink - ?2, imtime = ?3, ictime = ?3, igeneration = igeneration + 1
             WHERE ipnfsid = ?1",
            params![inode.as_str(), delta, now],
        )
        .map_err(map_db_err)?;
        Ok(())
    }

    /// Creates an entry for the inode in `parent`. The parent's link count
    /// is not touched.
    fn create_entry_in_parent(
        &self,
        conn: &Connection,
        parent: &InodeId,
        name: &str,
        inode: &InodeId,
    ) -> FsResult<()> {
        conn.execute(
            "INSERT INTO t_dirs (iparent, iname, ipnfsid) VALUES (?1, ?2, ?3)",
            params![parent.as_str(), name, inode.as_str()],
        )
        .map_err(map_db_err)?;
        Ok(())
    }

    fn remove_entry_in_parent(
        &self,
        conn: &Connection,
        parent: &InodeId,
        name: &str,
        inode: &InodeId,
    ) -> FsResult<bool> {
        let n = conn
            .execute(
                "DELETE FROM t_dirs WHERE iparent = ?1 AND iname = ?2 AND ipnfsid = ?3",
                params![parent.as_str(), name, inode.as_str()],
            )
            .map_err(map_db_err)?;
        Ok(n > 0)
    }

    /// One of the parents of the inode (any, with hard links).
    fn get_parent_of(&self, conn: &Connection, inode: &InodeId) -> FsResult<Option<InodeId>> {
        let id = conn
            .query_row(
                "SELECT iparent FROM t_dirs WHERE ipnfsid = ?1 AND iname NOT IN ('.', '..')",
                params![inode.as_str()],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(map_db_err)?;
        id.map(inode_from_db).transpose()
    }

    /// Parent of a directory, read from its own `..` entry.
    fn get_parent_of_directory(
        &self,
        conn: &Connection,
        inode: &InodeId,
    ) -> FsResult<Option<InodeId>> {
        let id = conn
            .query_row(
                "SELECT ipnfsid FROM t_dirs WHERE iparent = ?1 AND iname = '..'",
                params![inode.as_str()],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(map_db_err)?;
        id.map(inode_from_db).transpose()
    }

    /// Name of the inode within `parent`, or `None`.
    fn get_name_of(
        &self,
        conn: &Connection,
        parent: &InodeId,
        inode: &InodeId,
    ) -> FsResult<Option<String>> {
        conn.query_row(
            "SELECT iname FROM t_dirs WHERE iparent = ?1 AND ipnfsid = ?2",
            params![parent.as_str(), inode.as_str()],
            |row| row.get(0),
        )
        .optional()
        .map_err(map_db_err)
    }

    fn set_file_name(
        &self,
        conn: &Connection,
        dir: &InodeId,
        old_name: &str,
        new_name: &str,
    ) -> FsResult<()> {
        conn.execute(
            "UPDATE t_dirs SET iname = ?3 WHERE iparent = ?1 AND iname = ?2",
            params![dir.as_str(), old_name, new_name],
        )
        .map_err(map_db_err)?;
        Ok(())
    }

    /// Applies the attributes marked defined on `stat`. ctime defaults to
    /// the current time; a size change forces an mtime update; size updates
    /// only apply to regular files. Level 0 also bumps the generation
    /// counter.
    fn set_inode_attributes(
        &self,
        conn: &Connection,
        inode: &InodeId,
        level: u8,
        stat: &Stat,
    ) -> FsResult<bool> {
        let now = unix_time_millis();
        let ctime = if stat.is_defined(ATTR_CTIME) {
            stat.ctime()
        } else {
            now
        };
        let mtime = if stat.is_defined(ATTR_MTIME) {
            Some(stat.mtime())
        } else if stat.is_defined(ATTR_SIZE) {
            // setting the size always must trigger an mtime update
            Some(ctime)
        } else {
            None
        };

        let mut sql = String::with_capacity(128);
        if level == 0 {
            sql.push_str("UPDATE t_inodes SET ictime = ?, igeneration = igeneration + 1");
        } else {
            sql.push_str(&format!("UPDATE {} SET ictime = ?", level_table(level)?));
        }

        let uid = stat.uid() as i64;
        let gid = stat.gid() as i64;
        let size = stat.size() as i64;
        let mode = (stat.mode() & S_PERMS) as i64;
        let atime = stat.atime();
        let crtime = stat.crtime();
        let al = stat.access_latency().map(|v| v.to_int());
        let rp = stat.retention_policy().map(|v| v.to_int());
        let id = inode.as_str();
        let regular = S_IFREG as i64;

        // NOTICE: bind order must match the clause order below.
        let mut binds: Vec<&dyn ToSql> = vec![&ctime];
        if stat.is_defined(ATTR_UID) {
            sql.push_str(", iuid = ?");
            binds.push(&uid);
        }
        if stat.is_defined(ATTR_GID) {
            sql.push_str(", igid = ?");
            binds.push(&gid);
        }
        if stat.is_defined(ATTR_SIZE) {
            sql.push_str(", isize = ?");
            binds.push(&size);
        }
        if stat.is_defined(ATTR_MODE) {
            sql.push_str(", imode = ?");
            binds.push(&mode);
        }
        if let Some(ref v) = mtime {
            sql.push_str(", imtime = ?");
            binds.push(v);
        }
        if stat.is_defined(ATTR_ATIME) {
            sql.push_str(", iatime = ?");
            binds.push(&atime);
        }
        if level == 0 {
            if stat.is_defined(ATTR_CRTIME) {
                sql.push_str(", icrtime = ?");
                binds.push(&crtime);
            }
            if let Some(ref v) = al {
                sql.push_str(", iaccess_latency = ?");
                binds.push(v);
            }
            if let Some(ref v) = rp {
                sql.push_str(", iretention_policy = ?");
                binds.push(v);
            }
        }

        if level == 0 && stat.is_defined(ATTR_SIZE) {
            // directory sizes are synthetic and immutable
            sql.push_str(" WHERE ipnfsid = ? AND itype = ?");
            binds.push(&id);
            binds.push(&regular);
        } else {
            sql.push_str(" WHERE ipnfsid = ?");
            binds.push(&id);
        }

        let n = conn.execute(&sql, &binds[..]).map_err(map_db_err)?;
        Ok(n > 0)
    }

    /// Checks the I/O flag of the inode; regular reads and writes are only
    /// allowed when enabled.
    fn is_io_enabled(&self, conn: &Connection, inode: &InodeId) -> FsResult<bool> {
        let io = conn
            .query_row(
                "SELECT iio FROM t_inodes WHERE ipnfsid = ?1",
                params![inode.as_str()],
                |row| row.get::<_, i64>(0),
            )
            .optional()
            .map_err(map_db_err)?;
        Ok(io == Some(IOMODE_ENABLE as i64))
    }

    fn set_inode_io(&self, conn: &Connection, inode: &InodeId, enable: bool) -> FsResult<()> {
        conn.execute(
            "UPDATE t_inodes SET iio = ?2 WHERE ipnfsid = ?1",
            params![
                inode.as_str(),
                if enable { IOMODE_ENABLE } else { IOMODE_DISABLE }
            ],
        )
        .map_err(map_db_err)?;
        Ok(())
    }

    /// Replaces the inline blob of the inode (or of the given level) and
    /// keeps `isize` in sync. Missing levels are created on first write.
    fn write(&self, conn: &Connection, inode: &InodeId, level: u8, data: &[u8]) -> FsResult<usize> {
        if level == 0 {
            let exists: i64 = conn
                .query_row(
                    "SELECT COUNT(ipnfsid) FROM t_inodes_data WHERE ipnfsid = ?1",
                    params![inode.as_str()],
                    |row| row.get(0),
                )
                .map_err(map_db_err)?;
            if exists > 0 {
                conn.execute(
                    "UPDATE t_inodes_data SET ifiledata = ?2 WHERE ipnfsid = ?1",
                    params![inode.as_str(), data],
                )
                .map_err(map_db_err)?;
            } else {
                conn.execute(
                    "INSERT INTO t_inodes_data (ipnfsid, ifiledata) VALUES (?1, ?2)",
                    params![inode.as_str(), data],
                )
                .map_err(map_db_err)?;
            }
            conn.execute(
                "UPDATE t_inodes SET isize = ?2 WHERE ipnfsid = ?1",
                params![inode.as_str(), data.len() as i64],
            )
            .map_err(map_db_err)?;
        } else {
            if self.stat(conn, inode, level)?.is_none() {
                self.create_level(conn, inode, 0, 0, 0o644, level)?;
            }
            conn.execute(
                &format!(
                    "UPDATE {} SET ifiledata = ?2, isize = ?3 WHERE ipnfsid = ?1",
                    level_table(level)?
                ),
                params![inode.as_str(), data, data.len() as i64],
            )
            .map_err(map_db_err)?;
        }
        Ok(data.len())
    }

    /// Reads from the inline blob, skipping `begin_index` bytes, filling at
    /// most `buf.len()`. Returns the number of bytes read.
    fn read(
        &self,
        conn: &Connection,
        inode: &InodeId,
        level: u8,
        begin_index: u64,
        buf: &mut [u8],
    ) -> FsResult<usize> {
        let sql = if level == 0 {
            "SELECT ifiledata FROM t_inodes_data WHERE ipnfsid = ?1".to_string()
        } else {
            format!(
                "SELECT ifiledata FROM {} WHERE ipnfsid = ?1",
                level_table(level)?
            )
        };
        let blob: Option<Option<Vec<u8>>> = conn
            .query_row(&sql, params![inode.as_str()], |row| row.get(0))
            .optional()
            .map_err(map_db_err)?;
        let data = match blob {
            Some(Some(data)) => data,
            _ => return Ok(0),
        };
        let skip = (begin_index.min(data.len() as u64)) as usize;
        let n = (data.len() - skip).min(buf.len());
        buf[..n].copy_from_slice(&data[skip..skip + n]);
        Ok(n)
    }

    /// ONLINE replica locations of the inode, highest priority first.
    fn get_inode_locations(
        &self,
        conn: &Connection,
        inode: &InodeId,
    ) -> FsResult<Vec<StorageLocation>> {
        let mut stmt = conn
            .prepare(
                "SELECT itype, ilocation, ipriority, ictime, iatime FROM t_locationinfo
                 WHERE ipnfsid = ?1 AND istate = 1 ORDER BY ipriority DESC",
            )
            .map_err(map_db_err)?;
        let locations = stmt
            .query_map(params![inode.as_str()], |row| {
                Ok(StorageLocation {
                    location_type: row.get(0)?,
                    location: row.get(1)?,
                    priority: row.get(2)?,
                    ctime: row.get(3)?,
                    atime: row.get(4)?,
                    online: true,
                })
            })
            .map_err(map_db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(map_db_err)?;
        Ok(locations)
    }

    /// ONLINE replica locations of one location type, highest priority first.
    fn get_inode_locations_by_type(
        &self,
        conn: &Connection,
        inode: &InodeId,
        location_type: i32,
    ) -> FsResult<Vec<StorageLocation>> {
        let mut stmt = conn
            .prepare(
                "SELECT ilocation, ipriority, ictime, iatime FROM t_locationinfo
                 WHERE ipnfsid = ?1 AND itype = ?2 AND istate = 1 ORDER BY ipriority DESC",
            )
            .map_err(map_db_err)?;
        let locations = stmt
            .query_map(params![inode.as_str(), location_type], |row| {
                Ok(StorageLocation {
                    location_type,
                    location: row.get(0)?,
                    priority: row.get(1)?,
                    ctime: row.get(2)?,
                    atime: row.get(3)?,
                    online: true,
                })
            })
            .map_err(map_db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(map_db_err)?;
        Ok(locations)
    }

    fn add_inode_location(
        &self,
        conn: &Connection,
        inode: &InodeId,
        location_type: i32,
        location: &str,
    ) -> FsResult<()> {
        let now = unix_time_millis();
        conn.execute(
            "INSERT INTO t_locationinfo (ipnfsid, itype, ilocation, ipriority, ictime, iatime, istate)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5, ?6)",
            params![
                inode.as_str(),
                location_type,
                location,
                DEFAULT_LOCATION_PRIORITY,
                now,
                LOCATION_STATE_ONLINE
            ],
        )
        .map_err(map_db_err)?;
        Ok(())
    }

    fn clear_inode_location(
        &self,
        conn: &Connection,
        inode: &InodeId,
        location_type: i32,
        location: &str,
    ) -> FsResult<()> {
        conn.execute(
            "DELETE FROM t_locationinfo WHERE ipnfsid = ?1 AND itype = ?2 AND ilocation = ?3",
            params![inode.as_str(), location_type, location],
        )
        .map_err(map_db_err)?;
        Ok(())
    }

    fn clear_inode_locations(&self, conn: &Connection, inode: &InodeId) -> FsResult<()> {
        conn.execute(
            "DELETE FROM t_locationinfo WHERE ipnfsid = ?1",
            params![inode.as_str()],
        )
        .map_err(map_db_err)?;
        Ok(())
    }

    /// Names of the tags attached to a directory.
    fn tags(&self, conn: &Connection, dir: &InodeId) -> FsResult<Vec<String>> {
        let mut stmt = conn
            .prepare("SELECT itagname FROM t_tags WHERE ipnfsid = ?1")
            .map_err(map_db_err)?;
        let names = stmt
            .query_map(params![dir.as_str()], |row| row.get::<_, String>(0))
            .map_err(map_db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(map_db_err)?;
        Ok(names)
    }

    fn get_all_tags(&self, conn: &Connection, dir: &InodeId) -> FsResult<HashMap<String, Vec<u8>>> {
        let mut stmt = conn
            .prepare(
                "SELECT t.itagname, i.ivalue FROM t_tags t
                 JOIN t_tags_inodes i ON t.itagid = i.itagid WHERE t.ipnfsid = ?1",
            )
            .map_err(map_db_err)?;
        let rows = stmt
            .query_map(params![dir.as_str()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Option<Vec<u8>>>(1)?))
            })
            .map_err(map_db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(map_db_err)?;

        let mut tags = HashMap::new();
        for (name, value) in rows {
            // a NULL value means the tag was never written
            if let Some(value) = value {
                tags.insert(name, value);
            }
        }
        Ok(tags)
    }

    /// Creates a new tag on the directory; the directory becomes the tag
    /// origin.
    fn create_tag(
        &self,
        conn: &Connection,
        dir: &InodeId,
        name: &str,
        uid: u32,
        gid: u32,
        mode: u32,
    ) -> FsResult<()> {
        let tag_id = self.create_tag_inode(conn, uid, gid, mode)?;
        self.assign_tag_to_dir(conn, &tag_id, name, dir, false, true)
    }

    fn get_tag_id(&self, conn: &Connection, dir: &InodeId, name: &str) -> FsResult<Option<String>> {
        conn.query_row(
            "SELECT itagid FROM t_tags WHERE ipnfsid = ?1 AND itagname = ?2",
            params![dir.as_str(), name],
            |row| row.get(0),
        )
        .optional()
        .map_err(map_db_err)
    }

    /// Allocates a fresh tag value record and returns its id.
    fn create_tag_inode(
        &self,
        conn: &Connection,
        uid: u32,
        gid: u32,
        mode: u32,
    ) -> FsResult<String> {
        let id = new_tag_id();
        let now = unix_time_millis();
        conn.execute(
            "INSERT INTO t_tags_inodes (itagid, imode, inlink, iuid, igid, isize, iatime, ictime, imtime, ivalue)
             VALUES (?1, ?2, 1, ?3, ?4, 0, ?5, ?5, ?5, NULL)",
            params![id, mode | S_IFREG, uid, gid, now],
        )
        .map_err(map_db_err)?;
        Ok(id)
    }

    /// Creates or re-points the tag link of a directory.
    fn assign_tag_to_dir(
        &self,
        conn: &Connection,
        tag_id: &str,
        name: &str,
        dir: &InodeId,
        is_update: bool,
        is_origin: bool,
    ) -> FsResult<()> {
        if is_update {
            conn.execute(
                "UPDATE t_tags SET itagid = ?1, isorign = ?2 WHERE ipnfsid = ?3 AND itagname = ?4",
                params![tag_id, is_origin as i32, dir.as_str(), name],
            )
            .map_err(map_db_err)?;
        } else {
            conn.execute(
                "INSERT INTO t_tags (ipnfsid, itagname, itagid, isorign) VALUES (?1, ?2, ?3, ?4)",
                params![dir.as_str(), name, tag_id, is_origin as i32],
            )
            .map_err(map_db_err)?;
        }
        Ok(())
    }

    /// Writes a tag value. A directory that inherited the tag gets its own
    /// value record first (copy-on-write), seeded from the old record's
    /// ownership and mode, and becomes the origin.
    fn set_tag(
        &self,
        conn: &Connection,
        dir: &InodeId,
        name: &str,
        data: &[u8],
    ) -> FsResult<usize> {
        let tag_id = if !self.is_tag_owner(conn, dir, name)? {
            let tag_stat = self.stat_tag(conn, dir, name)?;
            let id = self.create_tag_inode(
                conn,
                tag_stat.uid(),
                tag_stat.gid(),
                tag_stat.mode(),
            )?;
            self.assign_tag_to_dir(conn, &id, name, dir, true, true)?;
            id
        } else {
            self.get_tag_id(conn, dir, name)?
                .ok_or_else(|| FsError::NotFound(format!("tag '{}' does not exist", name)))?
        };

        let now = unix_time_millis();
        conn.execute(
            "UPDATE t_tags_inodes SET ivalue = ?2, isize = ?3, imtime = ?4 WHERE itagid = ?1",
            params![tag_id, data, data.len() as i64, now],
        )
        .map_err(map_db_err)?;
        Ok(data.len())
    }

    /// Reads a tag value; a tag that was created but never written reads as
    /// empty.
    fn get_tag(&self, conn: &Connection, dir: &InodeId, name: &str) -> FsResult<Vec<u8>> {
        let value: Option<Option<Vec<u8>>> = conn
            .query_row(
                "SELECT i.ivalue FROM t_tags t
                 JOIN t_tags_inodes i ON t.itagid = i.itagid
                 WHERE t.ipnfsid = ?1 AND t.itagname = ?2",
                params![dir.as_str(), name],
                |row| row.get(0),
            )
            .optional()
            .map_err(map_db_err)?;
        match value {
            None => Err(FsError::NotFound(format!("tag '{}' does not exist", name))),
            Some(value) => Ok(value.unwrap_or_default()),
        }
    }

    fn stat_tag(&self, conn: &Connection, dir: &InodeId, name: &str) -> FsResult<Stat> {
        let tag_id = self
            .get_tag_id(conn, dir, name)?
            .ok_or_else(|| FsError::NotFound(format!("tag '{}' does not exist", name)))?;
        let row = conn
            .query_row(
                "SELECT isize, inlink, imode, iuid, igid, iatime, ictime, imtime
                 FROM t_tags_inodes WHERE itagid = ?1",
                params![tag_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, i64>(5)?,
                        row.get::<_, i64>(6)?,
                        row.get::<_, i64>(7)?,
                    ))
                },
            )
            .optional()
            .map_err(map_db_err)?;
        let (size, nlink, mode, uid, gid, atime, ctime, mtime) =
            row.ok_or_else(|| FsError::NotFound(format!("tag '{}' does not exist", name)))?;
        let mut stat = Stat::new();
        stat.set_size(size as u64);
        stat.set_nlink(nlink as u32);
        stat.set_mode(mode as u32);
        stat.set_uid(uid as u32);
        stat.set_gid(gid as u32);
        stat.set_atime(atime);
        stat.set_ctime(ctime);
        stat.set_mtime(mtime);
        stat.set_crtime(mtime);
        Ok(stat)
    }

    /// True when the directory is the origin of the tag.
    fn is_tag_owner(&self, conn: &Connection, dir: &InodeId, name: &str) -> FsResult<bool> {
        let origin: Option<i64> = conn
            .query_row(
                "SELECT isorign FROM t_tags WHERE ipnfsid = ?1 AND itagname = ?2",
                params![dir.as_str(), name],
                |row| row.get(0),
            )
            .optional()
            .map_err(map_db_err)?;
        Ok(origin == Some(1))
    }

    /// Seeds a directory with tags, each with its own value record, the
    /// directory being the origin of all of them.
    fn create_tags(
        &self,
        conn: &Connection,
        dir: &InodeId,
        uid: u32,
        gid: u32,
        mode: u32,
        tags: &HashMap<String, Vec<u8>>,
    ) -> FsResult<()> {
        let now = unix_time_millis();
        for (name, value) in tags {
            let id = new_tag_id();
            conn.execute(
                "INSERT INTO t_tags_inodes (itagid, imode, inlink, iuid, igid, isize, iatime, ictime, imtime, ivalue)
                 VALUES (?1, ?2, 1, ?3, ?4, ?5, ?6, ?6, ?6, ?7)",
                params![id, mode | S_IFREG, uid, gid, value.len() as i64, now, value],
            )
            .map_err(map_db_err)?;
            conn.execute(
                "INSERT INTO t_tags (ipnfsid, itagname, itagid, isorign) VALUES (?1, ?2, ?3, 1)",
                params![dir.as_str(), name, id],
            )
            .map_err(map_db_err)?;
        }
        Ok(())
    }

    /// Copies all tag links from `origin` to `destination`. The copies are
    /// marked inherited and share the value records.
    fn copy_tags(&self, conn: &Connection, origin: &InodeId, destination: &InodeId) -> FsResult<()> {
        conn.execute(
            "INSERT INTO t_tags (ipnfsid, itagname, itagid, isorign)
             SELECT ?2, itagname, itagid, 0 FROM t_tags WHERE ipnfsid = ?1",
            params![origin.as_str(), destination.as_str()],
        )
        .map_err(map_db_err)?;
        Ok(())
    }

    /// Drops one tag link. The value record is left alone; the sweep in
    /// `remove_tags` reclaims unreferenced records.
    fn remove_tag(&self, conn: &Connection, dir: &InodeId, name: &str) -> FsResult<()> {
        conn.execute(
            "DELETE FROM t_tags WHERE ipnfsid = ?1 AND itagname = ?2",
            params![dir.as_str(), name],
        )
        .map_err(map_db_err)?;
        Ok(())
    }

    /// Drops all tag links of a directory, then reclaims value records with
    /// no remaining link. A racing unlink elsewhere may leave an orphaned
    /// value record; a referenced record is never deleted.
    fn remove_tags(&self, conn: &Connection, dir: &InodeId) -> FsResult<()> {
        let mut stmt = conn
            .prepare("SELECT itagid FROM t_tags WHERE ipnfsid = ?1")
            .map_err(map_db_err)?;
        let ids = stmt
            .query_map(params![dir.as_str()], |row| row.get::<_, String>(0))
            .map_err(map_db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(map_db_err)?;
        drop(stmt);

        if ids.is_empty() {
            return Ok(());
        }

        conn.execute(
            "DELETE FROM t_tags WHERE ipnfsid = ?1",
            params![dir.as_str()],
        )
        .map_err(map_db_err)?;

        for id in &ids {
            conn.execute(
                "DELETE FROM t_tags_inodes
                 WHERE itagid = ?1
                   AND NOT EXISTS (SELECT 1 FROM t_tags t WHERE t.itagid = ?1)",
                params![id],
            )
            .map_err(map_db_err)?;
        }
        Ok(())
    }

    fn set_tag_owner(&self, conn: &Connection, dir: &InodeId, name: &str, owner: u32) -> FsResult<()> {
        let tag_id = self
            .get_tag_id(conn, dir, name)?
            .ok_or_else(|| FsError::NotFound(format!("tag '{}' does not exist", name)))?;
        let now = unix_time_millis();
        conn.execute(
            "UPDATE t_tags_inodes SET iuid = ?2, ictime = ?3 WHERE itagid = ?1",
            params![tag_id, owner, now],
        )
        .map_err(map_db_err)?;
        Ok(())
    }

    fn set_tag_owner_group(
        &self,
        conn: &Connection,
        dir: &InodeId,
        name: &str,
        group: u32,
    ) -> FsResult<()> {
        let tag_id = self
            .get_tag_id(conn, dir, name)?
            .ok_or_else(|| FsError::NotFound(format!("tag '{}' does not exist", name)))?;
        let now = unix_time_millis();
        conn.execute(
            "UPDATE t_tags_inodes SET igid = ?2, ictime = ?3 WHERE itagid = ?1",
            params![tag_id, group, now],
        )
        .map_err(map_db_err)?;
        Ok(())
    }

    fn set_tag_mode(&self, conn: &Connection, dir: &InodeId, name: &str, mode: u32) -> FsResult<()> {
        let tag_id = self
            .get_tag_id(conn, dir, name)?
            .ok_or_else(|| FsError::NotFound(format!("tag '{}' does not exist", name)))?;
        let now = unix_time_millis();
        conn.execute(
            "UPDATE t_tags_inodes SET imode = ?2, ictime = ?3 WHERE itagid = ?1",
            params![tag_id, mode & S_PERMS, now],
        )
        .map_err(map_db_err)?;
        Ok(())
    }

    /// Stores the HSM placement of an inode. Write-once: a second store for
    /// the same inode is a duplicate.
    fn set_storage_info(
        &self,
        conn: &Connection,
        inode: &InodeId,
        info: &InodeStorageInformation,
    ) -> FsResult<()> {
        conn.execute(
            "INSERT INTO t_storageinfo (ipnfsid, ihsmName, istorageGroup, istorageSubGroup)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                inode.as_str(),
                info.hsm_name,
                info.storage_group,
                info.storage_sub_group
            ],
        )
        .map_err(map_db_err)?;
        Ok(())
    }

    fn get_storage_info(
        &self,
        conn: &Connection,
        inode: &InodeId,
    ) -> FsResult<InodeStorageInformation> {
        conn.query_row(
            "SELECT ihsmName, istorageGroup, istorageSubGroup FROM t_storageinfo WHERE ipnfsid = ?1",
            params![inode.as_str()],
            |row| {
                Ok(InodeStorageInformation {
                    hsm_name: row.get(0)?,
                    storage_group: row.get(1)?,
                    storage_sub_group: row.get(2)?,
                })
            },
        )
        .optional()
        .map_err(map_db_err)?
        .ok_or_else(|| FsError::NotFound(format!("no storage info for {}", inode)))
    }

    fn remove_storage_info(&self, conn: &Connection, inode: &InodeId) -> FsResult<()> {
        conn.execute(
            "DELETE FROM t_storageinfo WHERE ipnfsid = ?1",
            params![inode.as_str()],
        )
        .map_err(map_db_err)?;
        Ok(())
    }

    fn get_access_latency(
        &self,
        conn: &Connection,
        inode: &InodeId,
    ) -> FsResult<Option<AccessLatency>> {
        let code: Option<i64> = conn
            .query_row(
                "SELECT iaccessLatency FROM t_access_latency WHERE ipnfsid = ?1",
                params![inode.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(map_db_err)?;
        code.map(|c| AccessLatency::from_int(c as i32)).transpose()
    }

    fn set_access_latency(
        &self,
        conn: &Connection,
        inode: &InodeId,
        latency: AccessLatency,
    ) -> FsResult<()> {
        let n = conn
            .execute(
                "UPDATE t_access_latency SET iaccessLatency = ?2 WHERE ipnfsid = ?1",
                params![inode.as_str(), latency.to_int()],
            )
            .map_err(map_db_err)?;
        if n == 0 {
            conn.execute(
                "INSERT INTO t_access_latency (ipnfsid, iaccessLatency) VALUES (?1, ?2)",
                params![inode.as_str(), latency.to_int()],
            )
            .map_err(map_db_err)?;
        }
        Ok(())
    }

    fn get_retention_policy(
        &self,
        conn: &Connection,
        inode: &InodeId,
    ) -> FsResult<Option<RetentionPolicy>> {
        let code: Option<i64> = conn
            .query_row(
                "SELECT iretentionPolicy FROM t_retention_policy WHERE ipnfsid = ?1",
                params![inode.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(map_db_err)?;
        code.map(|c| RetentionPolicy::from_int(c as i32)).transpose()
    }

    fn set_retention_policy(
        &self,
        conn: &Connection,
        inode: &InodeId,
        policy: RetentionPolicy,
    ) -> FsResult<()> {
        let n = conn
            .execute(
                "UPDATE t_retention_policy SET iretentionPolicy = ?2 WHERE ipnfsid = ?1",
                params![inode.as_str(), policy.to_int()],
            )
            .map_err(map_db_err)?;
        if n == 0 {
            conn.execute(
                "INSERT INTO t_retention_policy (ipnfsid, iretentionPolicy) VALUES (?1, ?2)",
                params![inode.as_str(), policy.to_int()],
            )
            .map_err(map_db_err)?;
        }
        Ok(())
    }

    /// Adds a checksum of one algorithm to the inode.
    fn set_inode_checksum(
        &self,
        conn: &Connection,
        inode: &InodeId,
        kind: ChecksumKind,
        value: &str,
    ) -> FsResult<()> {
        conn.execute(
            "INSERT INTO t_inodes_checksum (ipnfsid, itype, isum) VALUES (?1, ?2, ?3)",
            params![inode.as_str(), kind.to_int(), value],
        )
        .map_err(map_db_err)?;
        Ok(())
    }

    fn get_inode_checksums(&self, conn: &Connection, inode: &InodeId) -> FsResult<Vec<Checksum>> {
        let mut stmt = conn
            .prepare("SELECT itype, isum FROM t_inodes_checksum WHERE ipnfsid = ?1")
            .map_err(map_db_err)?;
        let checksums = stmt
            .query_map(params![inode.as_str()], |row| {
                Ok(Checksum {
                    kind: ChecksumKind::from_int(row.get::<_, i64>(0)? as i32),
                    value: row.get(1)?,
                })
            })
            .map_err(map_db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(map_db_err)?;
        Ok(checksums)
    }

    /// Removes the checksum of one algorithm, or all of them.
    fn remove_inode_checksum(
        &self,
        conn: &Connection,
        inode: &InodeId,
        kind: Option<ChecksumKind>,
    ) -> FsResult<()> {
        match kind {
            Some(kind) => conn
                .execute(
                    "DELETE FROM t_inodes_checksum WHERE ipnfsid = ?1 AND itype = ?2",
                    params![inode.as_str(), kind.to_int()],
                )
                .map_err(map_db_err)?,
            None => conn
                .execute(
                    "DELETE FROM t_inodes_checksum WHERE ipnfsid = ?1",
                    params![inode.as_str()],
                )
                .map_err(map_db_err)?,
        };
        Ok(())
    }

    /// The inode's ACL in stored order; empty when none is assigned.
    fn get_acl(&self, conn: &Connection, inode: &InodeId) -> FsResult<Vec<Ace>> {
        let mut stmt = conn
            .prepare(
                "SELECT type, flags, access_msk, who, who_id FROM t_acl
                 WHERE rs_id = ?1 ORDER BY ace_order",
            )
            .map_err(map_db_err)?;
        let rows = stmt
            .query_map(params![inode.as_str()], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })
            .map_err(map_db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(map_db_err)?;

        let mut acl = Vec::with_capacity(rows.len());
        for (ace_type, flags, mask, who, who_id) in rows {
            acl.push(Ace {
                ace_type: AceType::from_int(ace_type as i32),
                flags: flags as i32,
                access_mask: mask as i32,
                who: Who::from_int(who as i32)?,
                who_id: who_id as i32,
            });
        }
        Ok(acl)
    }

    /// Replaces the inode's ACL, preserving entry order. Returns whether the
    /// stored ACL may have changed.
    fn set_acl(&self, conn: &Connection, inode: &InodeId, acl: &[Ace]) -> FsResult<bool> {
        let mut modified = conn
            .execute("DELETE FROM t_acl WHERE rs_id = ?1", params![inode.as_str()])
            .map_err(map_db_err)?
            > 0;

        if !acl.is_empty() {
            let stat = self.stat(conn, inode, 0)?.ok_or_else(|| {
                FsError::NotFound(format!("no such inode {}", inode))
            })?;
            let rs_type = if stat.is_directory() {
                RsType::Dir
            } else {
                RsType::File
            };
            let mut stmt = conn
                .prepare(
                    "INSERT INTO t_acl (rs_id, rs_type, type, flags, access_msk, who, who_id, ace_order)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                )
                .map_err(map_db_err)?;
            for (order, ace) in acl.iter().enumerate() {
                stmt.execute(params![
                    inode.as_str(),
                    rs_type.to_int(),
                    ace.ace_type.to_int(),
                    ace.flags,
                    ace.access_mask,
                    ace.who.to_int(),
                    ace.who_id,
                    order as i64
                ])
                .map_err(map_db_err)?;
            }
            modified = true;
        }
        Ok(modified)
    }
}

/// The portable driver; every statement comes from the trait defaults.
pub struct DefaultFsSqlDriver {
    io_mode: i32,
}

impl DefaultFsSqlDriver {
    pub fn new(config: &DriverConfig) -> Self {
        DefaultFsSqlDriver {
            io_mode: if config.inode_io_enabled {
                IOMODE_ENABLE
            } else {
                IOMODE_DISABLE
            },
        }
    }
}

impl FsSqlDriver for DefaultFsSqlDriver {
    fn io_mode(&self) -> i32 {
        self.io_mode
    }
}

/// SQLite-dialect driver: replaces the update-then-insert upserts with
/// native ON CONFLICT statements.
pub struct SqliteFsSqlDriver {
    io_mode: i32,
}

impl SqliteFsSqlDriver {
    pub fn new(config: &DriverConfig) -> Self {
        SqliteFsSqlDriver {
            io_mode: if config.inode_io_enabled {
                IOMODE_ENABLE
            } else {
                IOMODE_DISABLE
            },
        }
    }
}

impl FsSqlDriver for SqliteFsSqlDriver {
    fn io_mode(&self) -> i32 {
        self.io_mode
    }

    fn set_access_latency(
        &self,
        conn: &Connection,
        inode: &InodeId,
        latency: AccessLatency,
    ) -> FsResult<()> {
        conn.execute(
            "INSERT INTO t_access_latency (ipnfsid, iaccessLatency) VALUES (?1, ?2)
             ON CONFLICT(ipnfsid) DO UPDATE SET iaccessLatency = excluded.iaccessLatency",
            params![inode.as_str(), latency.to_int()],
        )
        .map_err(map_db_err)?;
        Ok(())
    }

    fn set_retention_policy(
        &self,
        conn: &Connection,
        inode: &InodeId,
        policy: RetentionPolicy,
    ) -> FsResult<()> {
        conn.execute(
            "INSERT INTO t_retention_policy (ipnfsid, iretentionPolicy) VALUES (?1, ?2)
             ON CONFLICT(ipnfsid) DO UPDATE SET iretentionPolicy = excluded.iretentionPolicy",
            params![inode.as_str(), policy.to_int()],
        )
        .map_err(map_db_err)?;
        Ok(())
    }
}
