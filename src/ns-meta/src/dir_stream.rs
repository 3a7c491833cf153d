use ns_lib::{FsResult, InodeId, Stat};
use rusqlite::{params, Connection};
use std::collections::VecDeque;

use crate::driver::{
    finish_inode_stat, inode_from_db, map_db_err, read_inode_stat_row_at, INODE_STAT_COLUMNS,
};

const PAGE_SIZE: usize = 256;

/// One listed directory entry with its attached stat.
#[derive(Debug, Clone)]
pub struct DirectoryEntry {
    pub name: String,
    pub inode: InodeId,
    pub stat: Stat,
}

/// Lazy, forward-only listing of a directory in name order. Entries come
/// from one `t_dirs`/`t_inodes` join, fetched in keyset pages so arbitrarily
/// large directories never materialize at once. Self-entries are excluded.
/// Not restartable; `close` releases the stream early.
pub struct DirectoryStream<'c> {
    conn: &'c Connection,
    dir: InodeId,
    last_name: String,
    buffered: VecDeque<DirectoryEntry>,
    exhausted: bool,
    closed: bool,
}

impl<'c> DirectoryStream<'c> {
    pub(crate) fn new(conn: &'c Connection, dir: InodeId) -> Self {
        DirectoryStream {
            conn,
            dir,
            last_name: String::new(),
            buffered: VecDeque::new(),
            exhausted: false,
            closed: false,
        }
    }

    /// Next entry, or `None` once the directory is exhausted or the stream
    /// was closed.
    pub fn next_entry(&mut self) -> FsResult<Option<DirectoryEntry>> {
        if self.closed {
            return Ok(None);
        }
        if self.buffered.is_empty() && !self.exhausted {
            self.fill()?;
        }
        match self.buffered.pop_front() {
            Some(entry) => Ok(Some(entry)),
            None => {
                self.close();
                Ok(None)
            }
        }
    }

    fn fill(&mut self) -> FsResult<()> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT d.iname, d.ipnfsid, {} FROM t_dirs d
                 JOIN t_inodes i ON d.ipnfsid = i.ipnfsid
                 WHERE d.iparent = ?1 AND d.iname > ?2 AND d.iname NOT IN ('.', '..')
                 ORDER BY d.iname LIMIT ?3",
                INODE_STAT_COLUMNS
                    .split(',')
                    .map(|c| format!("i.{}", c))
                    .collect::<Vec<_>>()
                    .join(",")
            ))
            .map_err(map_db_err)?;

        let rows = stmt
            .query_map(
                params![self.dir.as_str(), self.last_name, PAGE_SIZE as i64],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        read_inode_stat_row_at(row, 2)?,
                    ))
                },
            )
            .map_err(map_db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(map_db_err)?;

        let fetched = rows.len();
        for (name, id, raw) in rows {
            let entry = DirectoryEntry {
                name: name.clone(),
                inode: inode_from_db(id)?,
                stat: finish_inode_stat(raw)?,
            };
            self.last_name = name;
            self.buffered.push_back(entry);
        }
        if fetched < PAGE_SIZE {
            self.exhausted = true;
        }
        Ok(())
    }

    /// Releases the stream. Further calls to `next_entry` return `None`.
    pub fn close(&mut self) {
        self.closed = true;
        self.buffered.clear();
    }
}
