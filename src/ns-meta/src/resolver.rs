use ns_lib::{FsError, FsResult, InodeId};
use rusqlite::Connection;

use crate::driver::FsSqlDriver;

/// Budget of symlink traversals shared across one whole path walk.
pub const MAX_SYMLINK_HOPS: u32 = 40;

/// Resolves a `/`-separated path starting at `root` to an inode. Symlinks
/// are followed: an absolute target restarts at the well-known root, a
/// relative target continues from the current parent. `None` when any
/// component is missing.
pub fn path_to_inode(
    driver: &dyn FsSqlDriver,
    conn: &Connection,
    root: &InodeId,
    path: &str,
) -> FsResult<Option<InodeId>> {
    let mut hops = MAX_SYMLINK_HOPS;
    walk(driver, conn, root, path, &mut hops)
}

/// Like [`path_to_inode`], but returns the whole inode sequence of the walk,
/// including intermediate directories and every symlink's root anchor. Empty
/// when any component is missing.
pub fn path_to_inodes(
    driver: &dyn FsSqlDriver,
    conn: &Connection,
    root: &InodeId,
    path: &str,
) -> FsResult<Vec<InodeId>> {
    let mut hops = MAX_SYMLINK_HOPS;
    walk_all(driver, conn, root, path, &mut hops)
}

fn read_link_target(
    driver: &dyn FsSqlDriver,
    conn: &Connection,
    inode: &InodeId,
    size: u64,
) -> FsResult<String> {
    let mut buf = vec![0u8; size as usize];
    let n = driver.read(conn, inode, 0, 0, &mut buf)?;
    buf.truncate(n);
    String::from_utf8(buf)
        .map_err(|_| FsError::BlobIo(format!("symlink {} target is not valid UTF-8", inode)))
}

fn take_hop(hops: &mut u32, inode: &InodeId) -> FsResult<()> {
    if *hops == 0 {
        return Err(FsError::TooManyLinks(format!(
            "symlink budget exhausted at {}",
            inode
        )));
    }
    *hops -= 1;
    Ok(())
}

fn walk(
    driver: &dyn FsSqlDriver,
    conn: &Connection,
    start: &InodeId,
    path: &str,
    hops: &mut u32,
) -> FsResult<Option<InodeId>> {
    let mut parent = start.clone();
    let mut inode = start.clone();

    // empty components skip repeated separators
    for component in path.split('/').filter(|c| !c.is_empty()) {
        inode = match driver.inode_of(conn, &parent, component)? {
            Some(found) => found,
            None => return Ok(None),
        };

        let stat = driver.stat(conn, &inode, 0)?.ok_or_else(|| {
            FsError::InvariantViolation(format!(
                "entry '{}' points to missing inode {}",
                component, inode
            ))
        })?;

        if stat.is_symlink() {
            take_hop(hops, &inode)?;
            let target = read_link_target(driver, conn, &inode, stat.size())?;
            if target.starts_with('/') {
                parent = InodeId::root();
            }
            inode = match walk(driver, conn, &parent, &target, hops)? {
                Some(resolved) => resolved,
                None => return Ok(None),
            };
        }
        parent = inode.clone();
    }

    Ok(Some(inode))
}

fn walk_all(
    driver: &dyn FsSqlDriver,
    conn: &Connection,
    start: &InodeId,
    path: &str,
    hops: &mut u32,
) -> FsResult<Vec<InodeId>> {
    let mut inodes = vec![start.clone()];
    let mut parent = start.clone();

    for component in path.split('/').filter(|c| !c.is_empty()) {
        let mut inode = match driver.inode_of(conn, &parent, component)? {
            Some(found) => found,
            None => return Ok(Vec::new()),
        };
        inodes.push(inode.clone());

        let stat = driver.stat(conn, &inode, 0)?.ok_or_else(|| {
            FsError::InvariantViolation(format!(
                "entry '{}' points to missing inode {}",
                component, inode
            ))
        })?;

        if stat.is_symlink() {
            take_hop(hops, &inode)?;
            let target = read_link_target(driver, conn, &inode, stat.size())?;
            if target.starts_with('/') {
                parent = InodeId::root();
                inodes.push(parent.clone());
            }
            let link_inodes = walk_all(driver, conn, &parent, &target, hops)?;
            if link_inodes.is_empty() {
                return Ok(Vec::new());
            }
            // the walk's start inode is already in the sequence
            inodes.extend_from_slice(&link_inodes[1..]);
            inode = link_inodes[link_inodes.len() - 1].clone();
        }
        parent = inode;
    }

    Ok(inodes)
}
