use log::info;
use ns_lib::{FsResult, InodeId, S_IFDIR};
use rusqlite::{params, Connection, OptionalExtension};

use crate::driver::{map_db_err, unix_time_millis};

/// Connection-level settings. Applied to every connection before use.
pub fn init_connection(conn: &Connection) -> FsResult<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA busy_timeout = 5000;
         PRAGMA foreign_keys = ON;",
    )
    .map_err(map_db_err)?;
    Ok(())
}

/// Creates the namespace tables. Satellite tables cascade on inode removal
/// so a garbage-collected inode leaves no rows behind; `t_dirs` and `t_tags`
/// are maintained explicitly by the driver and only carry plain foreign
/// keys, which is what lets the database raise referential violations on
/// misuse.
pub fn create_schema(conn: &Connection) -> FsResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS t_inodes (
            ipnfsid TEXT PRIMARY KEY,
            itype INTEGER NOT NULL,
            imode INTEGER NOT NULL,
            inlink INTEGER NOT NULL,
            iuid INTEGER NOT NULL,
            igid INTEGER NOT NULL,
            isize INTEGER NOT NULL,
            iio INTEGER NOT NULL,
            ictime INTEGER NOT NULL,
            iatime INTEGER NOT NULL,
            imtime INTEGER NOT NULL,
            icrtime INTEGER NOT NULL,
            igeneration INTEGER NOT NULL,
            iaccess_latency INTEGER,
            iretention_policy INTEGER
        ) WITHOUT ROWID;

        CREATE TABLE IF NOT EXISTS t_dirs (
            iparent TEXT NOT NULL,
            iname TEXT NOT NULL,
            ipnfsid TEXT NOT NULL REFERENCES t_inodes(ipnfsid),
            PRIMARY KEY (iparent, iname)
        ) WITHOUT ROWID;

        CREATE INDEX IF NOT EXISTS idx_dirs_child ON t_dirs(ipnfsid);

        CREATE TABLE IF NOT EXISTS t_inodes_data (
            ipnfsid TEXT PRIMARY KEY REFERENCES t_inodes(ipnfsid) ON DELETE CASCADE,
            ifiledata BLOB
        );

        CREATE TABLE IF NOT EXISTS t_tags_inodes (
            itagid TEXT PRIMARY KEY,
            imode INTEGER NOT NULL,
            inlink INTEGER NOT NULL,
            iuid INTEGER NOT NULL,
            igid INTEGER NOT NULL,
            isize INTEGER NOT NULL,
            iatime INTEGER NOT NULL,
            ictime INTEGER NOT NULL,
            imtime INTEGER NOT NULL,
            ivalue BLOB
        ) WITHOUT ROWID;

        CREATE TABLE IF NOT EXISTS t_tags (
            ipnfsid TEXT NOT NULL REFERENCES t_inodes(ipnfsid),
            itagname TEXT NOT NULL,
            itagid TEXT NOT NULL REFERENCES t_tags_inodes(itagid),
            isorign INTEGER NOT NULL,
            PRIMARY KEY (ipnfsid, itagname)
        ) WITHOUT ROWID;

        CREATE INDEX IF NOT EXISTS idx_tags_tagid ON t_tags(itagid);

        CREATE TABLE IF NOT EXISTS t_locationinfo (
            ipnfsid TEXT NOT NULL REFERENCES t_inodes(ipnfsid) ON DELETE CASCADE,
            itype INTEGER NOT NULL,
            ilocation TEXT NOT NULL,
            ipriority INTEGER NOT NULL,
            ictime INTEGER NOT NULL,
            iatime INTEGER NOT NULL,
            istate INTEGER NOT NULL,
            PRIMARY KEY (ipnfsid, itype, ilocation)
        ) WITHOUT ROWID;

        CREATE TABLE IF NOT EXISTS t_storageinfo (
            ipnfsid TEXT PRIMARY KEY REFERENCES t_inodes(ipnfsid) ON DELETE CASCADE,
            ihsmName TEXT NOT NULL,
            istorageGroup TEXT NOT NULL,
            istorageSubGroup TEXT NOT NULL
        ) WITHOUT ROWID;

        CREATE TABLE IF NOT EXISTS t_access_latency (
            ipnfsid TEXT PRIMARY KEY REFERENCES t_inodes(ipnfsid) ON DELETE CASCADE,
            iaccessLatency INTEGER NOT NULL
        ) WITHOUT ROWID;

        CREATE TABLE IF NOT EXISTS t_retention_policy (
            ipnfsid TEXT PRIMARY KEY REFERENCES t_inodes(ipnfsid) ON DELETE CASCADE,
            iretentionPolicy INTEGER NOT NULL
        ) WITHOUT ROWID;

        CREATE TABLE IF NOT EXISTS t_inodes_checksum (
            ipnfsid TEXT NOT NULL REFERENCES t_inodes(ipnfsid) ON DELETE CASCADE,
            itype INTEGER NOT NULL,
            isum TEXT NOT NULL,
            PRIMARY KEY (ipnfsid, itype)
        ) WITHOUT ROWID;

        CREATE TABLE IF NOT EXISTS t_acl (
            rs_id TEXT NOT NULL REFERENCES t_inodes(ipnfsid) ON DELETE CASCADE,
            rs_type INTEGER NOT NULL,
            type INTEGER NOT NULL,
            flags INTEGER NOT NULL,
            access_msk INTEGER NOT NULL,
            who INTEGER NOT NULL,
            who_id INTEGER NOT NULL,
            ace_order INTEGER NOT NULL,
            PRIMARY KEY (rs_id, ace_order)
        ) WITHOUT ROWID;",
    )
    .map_err(map_db_err)?;

    // one auxiliary stream table per level
    for level in 1..=7 {
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS t_level_{} (
                ipnfsid TEXT PRIMARY KEY REFERENCES t_inodes(ipnfsid) ON DELETE CASCADE,
                imode INTEGER NOT NULL,
                inlink INTEGER NOT NULL,
                iuid INTEGER NOT NULL,
                igid INTEGER NOT NULL,
                isize INTEGER NOT NULL,
                iatime INTEGER NOT NULL,
                ictime INTEGER NOT NULL,
                imtime INTEGER NOT NULL,
                ifiledata BLOB
            ) WITHOUT ROWID;",
            level
        ))
        .map_err(map_db_err)?;
    }

    Ok(())
}

/// Inserts the root directory and its `.`/`..` self-entries if absent.
fn ensure_root(conn: &Connection) -> FsResult<InodeId> {
    let root = InodeId::root();
    let existing = conn
        .query_row(
            "SELECT ipnfsid FROM t_inodes WHERE ipnfsid = ?1",
            params![root.as_str()],
            |row| row.get::<_, String>(0),
        )
        .optional()
        .map_err(map_db_err)?;
    if existing.is_some() {
        return Ok(root);
    }

    let now = unix_time_millis();
    conn.execute(
        "INSERT INTO t_inodes (ipnfsid, itype, imode, inlink, iuid, igid, isize, iio,
            ictime, iatime, imtime, icrtime, igeneration)
         VALUES (?1, ?2, ?3, 2, 0, 0, 512, 0, ?4, ?4, ?4, ?4, 0)",
        params![root.as_str(), S_IFDIR, 0o755, now],
    )
    .map_err(map_db_err)?;
    conn.execute(
        "INSERT INTO t_dirs (iparent, iname, ipnfsid) VALUES (?1, '.', ?1)",
        params![root.as_str()],
    )
    .map_err(map_db_err)?;
    conn.execute(
        "INSERT INTO t_dirs (iparent, iname, ipnfsid) VALUES (?1, '..', ?1)",
        params![root.as_str()],
    )
    .map_err(map_db_err)?;

    info!("namespace bootstrapped, root = {}", root);
    Ok(root)
}

/// Prepares a connection for namespace use: pragmas, tables, root inode.
/// Idempotent.
pub fn init_db(conn: &Connection) -> FsResult<InodeId> {
    init_connection(conn)?;
    create_schema(conn)?;
    ensure_root(conn)
}
