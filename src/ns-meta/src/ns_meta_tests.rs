#[cfg(test)]
mod tests {
    use crate::{
        driver_for_dialect, init_db, path_to_inode, path_to_inodes, DefaultFsSqlDriver,
        DriverConfig, FsSqlDriver, SqliteFsSqlDriver,
    };
    use ns_lib::{
        Ace, AceType, AccessLatency, ChecksumKind, FsError, InodeId, InodeStorageInformation,
        RetentionPolicy, Stat, Who, S_IFDIR, S_IFLNK, S_IFREG,
    };
    use rusqlite::{params, Connection};
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn open_test_db() -> (Connection, InodeId, TempDir) {
        let tmp_dir = TempDir::new().unwrap();
        let db_path = tmp_dir.path().join("ns.db");
        let conn = Connection::open(db_path).unwrap();
        let root = init_db(&conn).unwrap();
        (conn, root, tmp_dir)
    }

    fn test_driver() -> DefaultFsSqlDriver {
        DefaultFsSqlDriver::new(&DriverConfig::default())
    }

    fn count_rows(conn: &Connection, table: &str) -> i64 {
        conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
            row.get(0)
        })
        .unwrap()
    }

    fn rows_mentioning(conn: &Connection, inode: &InodeId) -> i64 {
        let mut total = 0;
        for (table, column) in [
            ("t_inodes", "ipnfsid"),
            ("t_dirs", "ipnfsid"),
            ("t_dirs", "iparent"),
            ("t_inodes_data", "ipnfsid"),
            ("t_level_1", "ipnfsid"),
            ("t_tags", "ipnfsid"),
            ("t_locationinfo", "ipnfsid"),
            ("t_storageinfo", "ipnfsid"),
            ("t_access_latency", "ipnfsid"),
            ("t_retention_policy", "ipnfsid"),
            ("t_inodes_checksum", "ipnfsid"),
            ("t_acl", "rs_id"),
        ] {
            total += conn
                .query_row(
                    &format!("SELECT COUNT(*) FROM {} WHERE {} = ?1", table, column),
                    params![inode.as_str()],
                    |row| row.get::<_, i64>(0),
                )
                .unwrap();
        }
        total
    }

    fn make_symlink(
        driver: &dyn FsSqlDriver,
        conn: &Connection,
        parent: &InodeId,
        name: &str,
        target: &str,
    ) -> InodeId {
        let inode = driver
            .create_file(conn, parent, name, 0, 0, 0o777, S_IFLNK)
            .unwrap();
        driver.write(conn, &inode, 0, target.as_bytes()).unwrap();
        inode
    }

    fn sample_acl() -> Vec<Ace> {
        vec![
            Ace {
                ace_type: AceType::AccessAllowed,
                flags: 0,
                access_mask: 0o7,
                who: Who::Owner,
                who_id: 0,
            },
            Ace {
                ace_type: AceType::AccessDenied,
                flags: 1,
                access_mask: 0o2,
                who: Who::Group,
                who_id: 1000,
            },
            Ace {
                ace_type: AceType::AccessAllowed,
                flags: 0,
                access_mask: 0o4,
                who: Who::Everyone,
                who_id: 0,
            },
        ]
    }

    // ==================== Bootstrap Tests ====================

    #[test]
    fn test_init_db_idempotent() {
        let (conn, root, _tmp) = open_test_db();
        let again = init_db(&conn).unwrap();
        assert_eq!(root, again);

        let driver = test_driver();
        let stat = driver.stat(&conn, &root, 0).unwrap().unwrap();
        assert!(stat.is_directory());
        assert_eq!(stat.nlink(), 2);
        assert_eq!(stat.size(), 512);
        assert_eq!(count_rows(&conn, "t_dirs"), 2);
    }

    // ==================== Create / Stat Tests ====================

    #[test]
    fn test_create_file_and_stat() {
        let (conn, root, _tmp) = open_test_db();
        let driver = test_driver();

        let inode = driver
            .create_file(&conn, &root, "data", 1000, 1000, 0o644, S_IFREG)
            .unwrap();

        let stat = driver.stat(&conn, &inode, 0).unwrap().unwrap();
        assert!(stat.is_regular());
        assert_eq!(stat.nlink(), 1);
        assert_eq!(stat.uid(), 1000);
        assert_eq!(stat.gid(), 1000);
        assert_eq!(stat.mode() & 0o7777, 0o644);
        assert_eq!(stat.size(), 0);
        assert_eq!(stat.generation(), 0);

        let root_stat = driver.stat(&conn, &root, 0).unwrap().unwrap();
        assert_eq!(root_stat.nlink(), 3);
        assert_eq!(root_stat.generation(), 1);

        assert_eq!(
            driver.inode_of(&conn, &root, "data").unwrap().unwrap(),
            inode
        );
    }

    #[test]
    fn test_create_duplicate_name_fails() {
        let (conn, root, _tmp) = open_test_db();
        let driver = test_driver();

        driver
            .create_file(&conn, &root, "a", 0, 0, 0o644, S_IFREG)
            .unwrap();
        let err = driver
            .create_file(&conn, &root, "a", 0, 0, 0o644, S_IFREG)
            .unwrap_err();
        assert!(matches!(err, FsError::DuplicateEntry(_)));
    }

    #[test]
    fn test_stat_missing_inode_is_none() {
        let (conn, _root, _tmp) = open_test_db();
        let driver = test_driver();
        assert!(driver
            .stat(&conn, &InodeId::generate(), 0)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_mkdir_creates_self_entries() {
        let (conn, root, _tmp) = open_test_db();
        let driver = test_driver();

        let dir = driver.mkdir(&conn, &root, "sub", 0, 0, 0o755).unwrap();

        let stat = driver.stat(&conn, &dir, 0).unwrap().unwrap();
        assert!(stat.is_directory());
        assert_eq!(stat.nlink(), 2);
        assert_eq!(stat.size(), 512);

        assert_eq!(driver.inode_of(&conn, &dir, ".").unwrap().unwrap(), dir);
        assert_eq!(driver.inode_of(&conn, &dir, "..").unwrap().unwrap(), root);
        assert_eq!(
            driver.get_parent_of_directory(&conn, &dir).unwrap().unwrap(),
            root
        );
    }

    #[test]
    fn test_mkdir_under_file_fails() {
        let (conn, root, _tmp) = open_test_db();
        let driver = test_driver();

        let file = driver
            .create_file(&conn, &root, "f", 0, 0, 0o644, S_IFREG)
            .unwrap();
        let err = driver.mkdir(&conn, &file, "sub", 0, 0, 0o755).unwrap_err();
        assert!(matches!(err, FsError::NotDir(_)));
    }

    // ==================== Remove Tests ====================

    #[test]
    fn test_mkdir_remove_round_trip() {
        let (conn, root, _tmp) = open_test_db();
        let driver = test_driver();

        let inodes_before = count_rows(&conn, "t_inodes");
        let dirs_before = count_rows(&conn, "t_dirs");
        let nlink_before = driver.stat(&conn, &root, 0).unwrap().unwrap().nlink();

        let dir = driver.mkdir(&conn, &root, "a", 0, 0, 0o755).unwrap();
        driver.remove(&conn, &root, "a").unwrap();

        assert_eq!(count_rows(&conn, "t_inodes"), inodes_before);
        assert_eq!(count_rows(&conn, "t_dirs"), dirs_before);
        assert_eq!(rows_mentioning(&conn, &dir), 0);
        assert_eq!(
            driver.stat(&conn, &root, 0).unwrap().unwrap().nlink(),
            nlink_before
        );
    }

    #[test]
    fn test_remove_not_empty() {
        let (conn, root, _tmp) = open_test_db();
        let driver = test_driver();

        let a = driver.mkdir(&conn, &root, "a", 0, 0, 0o755).unwrap();
        driver.mkdir(&conn, &a, "b", 0, 0, 0o755).unwrap();

        let err = driver.remove(&conn, &root, "a").unwrap_err();
        assert!(matches!(err, FsError::DirNotEmpty(_)));

        // namespace unchanged
        let stat = driver.stat(&conn, &a, 0).unwrap().unwrap();
        assert_eq!(stat.nlink(), 3);
        assert!(driver.inode_of(&conn, &a, "b").unwrap().is_some());
    }

    #[test]
    fn test_remove_rejects_reserved_names() {
        let (conn, root, _tmp) = open_test_db();
        let driver = test_driver();

        for name in [".", ".."] {
            let err = driver.remove(&conn, &root, name).unwrap_err();
            assert!(matches!(err, FsError::InvalidName(_)));
        }
    }

    #[test]
    fn test_remove_missing_entry() {
        let (conn, root, _tmp) = open_test_db();
        let driver = test_driver();
        let err = driver.remove(&conn, &root, "nope").unwrap_err();
        assert!(matches!(err, FsError::NotFound(_)));
    }

    #[test]
    fn test_hard_link_count_lifecycle() {
        let (conn, root, _tmp) = open_test_db();
        let driver = test_driver();

        let inode = driver
            .create_file(&conn, &root, "a", 1000, 1000, 0o644, S_IFREG)
            .unwrap();
        driver.create_entry_in_parent(&conn, &root, "b", &inode).unwrap();
        driver.inc_nlink(&conn, &inode, 1).unwrap();

        assert_eq!(driver.stat(&conn, &inode, 0).unwrap().unwrap().nlink(), 2);

        driver.remove(&conn, &root, "a").unwrap();
        assert_eq!(driver.stat(&conn, &inode, 0).unwrap().unwrap().nlink(), 1);

        driver.remove(&conn, &root, "b").unwrap();
        assert!(driver.stat(&conn, &inode, 0).unwrap().is_none());
    }

    #[test]
    fn test_remove_inode_drops_all_links() {
        let (conn, root, _tmp) = open_test_db();
        let driver = test_driver();

        let d1 = driver.mkdir(&conn, &root, "d1", 0, 0, 0o755).unwrap();
        let d2 = driver.mkdir(&conn, &root, "d2", 0, 0, 0o755).unwrap();
        let inode = driver
            .create_file(&conn, &d1, "f", 0, 0, 0o644, S_IFREG)
            .unwrap();
        driver.create_entry_in_parent(&conn, &d2, "g", &inode).unwrap();
        driver.inc_nlink(&conn, &inode, 1).unwrap();

        let d1_nlink = driver.stat(&conn, &d1, 0).unwrap().unwrap().nlink();
        let d2_nlink = driver.stat(&conn, &d2, 0).unwrap().unwrap().nlink();

        driver.remove_inode(&conn, &inode).unwrap();

        assert!(driver.stat(&conn, &inode, 0).unwrap().is_none());
        assert!(driver.inode_of(&conn, &d1, "f").unwrap().is_none());
        assert!(driver.inode_of(&conn, &d2, "g").unwrap().is_none());
        assert_eq!(
            driver.stat(&conn, &d1, 0).unwrap().unwrap().nlink(),
            d1_nlink - 1
        );
        assert_eq!(
            driver.stat(&conn, &d2, 0).unwrap().unwrap().nlink(),
            d2_nlink - 1
        );
    }

    #[test]
    fn test_removed_file_leaves_no_rows_behind() {
        let (conn, root, _tmp) = open_test_db();
        let driver = test_driver();

        let inode = driver
            .create_file(&conn, &root, "f", 0, 0, 0o644, S_IFREG)
            .unwrap();
        driver.write(&conn, &inode, 0, b"payload").unwrap();
        driver.write(&conn, &inode, 1, b"level one").unwrap();
        driver
            .add_inode_location(&conn, &inode, 1, "osm://pool-1/f")
            .unwrap();
        driver
            .set_inode_checksum(&conn, &inode, ChecksumKind::Adler32, "00ff00ff")
            .unwrap();
        driver
            .set_access_latency(&conn, &inode, AccessLatency::Online)
            .unwrap();
        driver
            .set_retention_policy(&conn, &inode, RetentionPolicy::Replica)
            .unwrap();
        driver.set_acl(&conn, &inode, &sample_acl()).unwrap();
        driver
            .set_storage_info(
                &conn,
                &inode,
                &InodeStorageInformation {
                    hsm_name: "osm".to_string(),
                    storage_group: "exp".to_string(),
                    storage_sub_group: "raw".to_string(),
                },
            )
            .unwrap();

        driver.remove(&conn, &root, "f").unwrap();
        assert_eq!(rows_mentioning(&conn, &inode), 0);
    }

    // ==================== Move Tests ====================

    #[test]
    fn test_move_file() {
        let (conn, root, _tmp) = open_test_db();
        let driver = test_driver();

        let d1 = driver.mkdir(&conn, &root, "d1", 0, 0, 0o755).unwrap();
        let d2 = driver.mkdir(&conn, &root, "d2", 0, 0, 0o755).unwrap();
        let inode = driver
            .create_file(&conn, &d1, "f", 0, 0, 0o644, S_IFREG)
            .unwrap();

        driver.move_entry(&conn, &d1, "f", &d2, "g").unwrap();

        assert!(driver.inode_of(&conn, &d1, "f").unwrap().is_none());
        assert_eq!(driver.inode_of(&conn, &d2, "g").unwrap().unwrap(), inode);
    }

    #[test]
    fn test_move_directory_repoints_dotdot() {
        let (conn, root, _tmp) = open_test_db();
        let driver = test_driver();

        let d1 = driver.mkdir(&conn, &root, "d1", 0, 0, 0o755).unwrap();
        let d2 = driver.mkdir(&conn, &root, "d2", 0, 0, 0o755).unwrap();
        let sub = driver.mkdir(&conn, &d1, "sub", 0, 0, 0o755).unwrap();

        let d1_nlink = driver.stat(&conn, &d1, 0).unwrap().unwrap().nlink();
        let d2_nlink = driver.stat(&conn, &d2, 0).unwrap().unwrap().nlink();

        driver.move_entry(&conn, &d1, "sub", &d2, "sub").unwrap();

        assert_eq!(
            driver.get_parent_of_directory(&conn, &sub).unwrap().unwrap(),
            d2
        );
        // the parents' link counts are intentionally left alone
        assert_eq!(driver.stat(&conn, &d1, 0).unwrap().unwrap().nlink(), d1_nlink);
        assert_eq!(driver.stat(&conn, &d2, 0).unwrap().unwrap().nlink(), d2_nlink);
    }

    #[test]
    fn test_move_onto_existing_name_fails() {
        let (conn, root, _tmp) = open_test_db();
        let driver = test_driver();

        driver
            .create_file(&conn, &root, "a", 0, 0, 0o644, S_IFREG)
            .unwrap();
        driver
            .create_file(&conn, &root, "b", 0, 0, 0o644, S_IFREG)
            .unwrap();

        let err = driver.move_entry(&conn, &root, "a", &root, "b").unwrap_err();
        assert!(matches!(err, FsError::DuplicateEntry(_)));
    }

    #[test]
    fn test_move_rejects_reserved_names() {
        let (conn, root, _tmp) = open_test_db();
        let driver = test_driver();
        let d1 = driver.mkdir(&conn, &root, "d1", 0, 0, 0o755).unwrap();

        let err = driver.move_entry(&conn, &root, ".", &d1, "x").unwrap_err();
        assert!(matches!(err, FsError::InvalidName(_)));
        let err = driver.move_entry(&conn, &root, "d1", &d1, "..").unwrap_err();
        assert!(matches!(err, FsError::InvalidName(_)));
    }

    // ==================== Attribute Tests ====================

    #[test]
    fn test_setattr_partial_update() {
        let (conn, root, _tmp) = open_test_db();
        let driver = test_driver();

        let inode = driver
            .create_file(&conn, &root, "f", 1, 1, 0o644, S_IFREG)
            .unwrap();

        let mut change = Stat::new();
        change.set_uid(4242);
        assert!(driver.set_inode_attributes(&conn, &inode, 0, &change).unwrap());

        let stat = driver.stat(&conn, &inode, 0).unwrap().unwrap();
        assert_eq!(stat.uid(), 4242);
        assert_eq!(stat.gid(), 1);
        assert_eq!(stat.mode() & 0o7777, 0o644);
        assert_eq!(stat.generation(), 1);
    }

    #[test]
    fn test_setattr_size_implies_mtime() {
        let (conn, root, _tmp) = open_test_db();
        let driver = test_driver();

        let inode = driver
            .create_file(&conn, &root, "f", 0, 0, 0o644, S_IFREG)
            .unwrap();

        let mut change = Stat::new();
        change.set_size(1024);
        change.set_ctime(777_000);
        assert!(driver.set_inode_attributes(&conn, &inode, 0, &change).unwrap());

        let stat = driver.stat(&conn, &inode, 0).unwrap().unwrap();
        assert_eq!(stat.size(), 1024);
        assert_eq!(stat.ctime(), 777_000);
        assert_eq!(stat.mtime(), 777_000);
    }

    #[test]
    fn test_setattr_size_on_directory_is_rejected() {
        let (conn, root, _tmp) = open_test_db();
        let driver = test_driver();

        let dir = driver.mkdir(&conn, &root, "d", 0, 0, 0o755).unwrap();

        let mut change = Stat::new();
        change.set_size(9999);
        assert!(!driver.set_inode_attributes(&conn, &dir, 0, &change).unwrap());
        assert_eq!(driver.stat(&conn, &dir, 0).unwrap().unwrap().size(), 512);
    }

    #[test]
    fn test_setattr_mode_keeps_type_bits() {
        let (conn, root, _tmp) = open_test_db();
        let driver = test_driver();

        let inode = driver
            .create_file(&conn, &root, "f", 0, 0, 0o644, S_IFREG)
            .unwrap();

        let mut change = Stat::new();
        change.set_mode(S_IFDIR | 0o600);
        driver.set_inode_attributes(&conn, &inode, 0, &change).unwrap();

        let stat = driver.stat(&conn, &inode, 0).unwrap().unwrap();
        assert!(stat.is_regular());
        assert_eq!(stat.mode() & 0o7777, 0o600);
    }

    #[test]
    fn test_io_flag() {
        let (conn, root, _tmp) = open_test_db();
        let driver = test_driver();

        let inode = driver
            .create_file(&conn, &root, "f", 0, 0, 0o644, S_IFREG)
            .unwrap();
        assert!(!driver.is_io_enabled(&conn, &inode).unwrap());
        driver.set_inode_io(&conn, &inode, true).unwrap();
        assert!(driver.is_io_enabled(&conn, &inode).unwrap());
    }

    #[test]
    fn test_io_mode_from_config() {
        let (conn, root, _tmp) = open_test_db();
        let driver = DefaultFsSqlDriver::new(&DriverConfig {
            dialect: None,
            inode_io_enabled: true,
        });

        let inode = driver
            .create_file(&conn, &root, "f", 0, 0, 0o644, S_IFREG)
            .unwrap();
        assert!(driver.is_io_enabled(&conn, &inode).unwrap());
    }

    // ==================== Inline Data Tests ====================

    #[test]
    fn test_write_read_syncs_size() {
        let (conn, root, _tmp) = open_test_db();
        let driver = test_driver();

        let inode = driver
            .create_file(&conn, &root, "f", 0, 0, 0o644, S_IFREG)
            .unwrap();
        assert_eq!(driver.write(&conn, &inode, 0, b"hello world").unwrap(), 11);
        assert_eq!(driver.stat(&conn, &inode, 0).unwrap().unwrap().size(), 11);

        let mut buf = [0u8; 32];
        let n = driver.read(&conn, &inode, 0, 0, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello world");

        let n = driver.read(&conn, &inode, 0, 6, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"world");

        // a rewrite replaces the whole blob
        driver.write(&conn, &inode, 0, b"ok").unwrap();
        assert_eq!(driver.stat(&conn, &inode, 0).unwrap().unwrap().size(), 2);
        let n = driver.read(&conn, &inode, 0, 0, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"ok");
    }

    #[test]
    fn test_read_missing_blob_is_empty() {
        let (conn, root, _tmp) = open_test_db();
        let driver = test_driver();

        let inode = driver
            .create_file(&conn, &root, "f", 0, 0, 0o644, S_IFREG)
            .unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(driver.read(&conn, &inode, 0, 0, &mut buf).unwrap(), 0);
    }

    #[test]
    fn test_level_streams_are_independent() {
        let (conn, root, _tmp) = open_test_db();
        let driver = test_driver();

        let inode = driver
            .create_file(&conn, &root, "f", 0, 0, 0o644, S_IFREG)
            .unwrap();
        driver.write(&conn, &inode, 0, b"main").unwrap();
        driver.write(&conn, &inode, 2, b"control data").unwrap();

        // the main stat is untouched by level writes
        assert_eq!(driver.stat(&conn, &inode, 0).unwrap().unwrap().size(), 4);

        let level_stat = driver.stat(&conn, &inode, 2).unwrap().unwrap();
        assert_eq!(level_stat.size(), 12);
        assert!(level_stat.is_regular());

        let mut buf = [0u8; 32];
        let n = driver.read(&conn, &inode, 2, 0, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"control data");

        assert!(driver.remove_inode_level(&conn, &inode, 2).unwrap());
        assert!(driver.stat(&conn, &inode, 2).unwrap().is_none());
    }

    #[test]
    fn test_level_out_of_range() {
        let (conn, root, _tmp) = open_test_db();
        let driver = test_driver();
        let inode = driver
            .create_file(&conn, &root, "f", 0, 0, 0o644, S_IFREG)
            .unwrap();
        assert!(driver.stat(&conn, &inode, 8).is_err());
    }

    // ==================== Listing Tests ====================

    #[test]
    fn test_list_dir_excludes_self_entries() {
        let (conn, root, _tmp) = open_test_db();
        let driver = test_driver();

        let dir = driver.mkdir(&conn, &root, "d", 0, 0, 0o755).unwrap();
        driver
            .create_file(&conn, &dir, "b", 0, 0, 0o644, S_IFREG)
            .unwrap();
        driver
            .create_file(&conn, &dir, "a", 0, 0, 0o644, S_IFREG)
            .unwrap();

        assert_eq!(driver.list_dir(&conn, &dir).unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_directory_stream_pages_through() {
        let (conn, root, _tmp) = open_test_db();
        let driver = test_driver();

        let dir = driver.mkdir(&conn, &root, "big", 0, 0, 0o755).unwrap();
        for i in 0..300 {
            driver
                .create_file(&conn, &dir, &format!("f{:04}", i), 0, 0, 0o644, S_IFREG)
                .unwrap();
        }

        let mut stream = driver.new_directory_stream(&conn, &dir);
        let mut names = Vec::new();
        while let Some(entry) = stream.next_entry().unwrap() {
            assert!(entry.stat.is_regular());
            names.push(entry.name);
        }
        assert_eq!(names.len(), 300);
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);

        // exhausted and closed
        assert!(stream.next_entry().unwrap().is_none());
    }

    #[test]
    fn test_directory_stream_close_is_final() {
        let (conn, root, _tmp) = open_test_db();
        let driver = test_driver();

        let dir = driver.mkdir(&conn, &root, "d", 0, 0, 0o755).unwrap();
        for name in ["x", "y", "z"] {
            driver
                .create_file(&conn, &dir, name, 0, 0, 0o644, S_IFREG)
                .unwrap();
        }

        let mut stream = driver.new_directory_stream(&conn, &dir);
        assert!(stream.next_entry().unwrap().is_some());
        stream.close();
        assert!(stream.next_entry().unwrap().is_none());
    }

    // ==================== Path Resolution Tests ====================

    #[test]
    fn test_path_to_inode_plain_walk() {
        let (conn, root, _tmp) = open_test_db();
        let driver = test_driver();

        let a = driver.mkdir(&conn, &root, "a", 0, 0, 0o755).unwrap();
        let b = driver.mkdir(&conn, &a, "b", 0, 0, 0o755).unwrap();
        let c = driver
            .create_file(&conn, &b, "c", 0, 0, 0o644, S_IFREG)
            .unwrap();

        assert_eq!(
            path_to_inode(&driver, &conn, &root, "/a/b/c").unwrap().unwrap(),
            c
        );
        // repeated separators are skipped
        assert_eq!(
            path_to_inode(&driver, &conn, &root, "//a///b/c").unwrap().unwrap(),
            c
        );
        assert_eq!(
            path_to_inode(&driver, &conn, &root, "").unwrap().unwrap(),
            root
        );
        assert!(path_to_inode(&driver, &conn, &root, "/a/nope")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_path_to_inode_through_symlink() {
        let (conn, root, _tmp) = open_test_db();
        let driver = test_driver();

        let a = driver.mkdir(&conn, &root, "a", 0, 0, 0o755).unwrap();
        let b = driver.mkdir(&conn, &a, "b", 0, 0, 0o755).unwrap();
        let c = driver
            .create_file(&conn, &b, "c", 0, 0, 0o644, S_IFREG)
            .unwrap();
        make_symlink(&driver, &conn, &root, "l", "/a/b");

        assert_eq!(
            path_to_inode(&driver, &conn, &root, "/l/c").unwrap().unwrap(),
            c
        );
    }

    #[test]
    fn test_path_to_inode_relative_symlink() {
        let (conn, root, _tmp) = open_test_db();
        let driver = test_driver();

        let a = driver.mkdir(&conn, &root, "a", 0, 0, 0o755).unwrap();
        let b = driver.mkdir(&conn, &a, "b", 0, 0, 0o755).unwrap();
        let c = driver
            .create_file(&conn, &b, "c", 0, 0, 0o644, S_IFREG)
            .unwrap();
        make_symlink(&driver, &conn, &a, "rel", "b");

        assert_eq!(
            path_to_inode(&driver, &conn, &root, "/a/rel/c")
                .unwrap()
                .unwrap(),
            c
        );
    }

    #[test]
    fn test_path_to_inodes_includes_anchors() {
        let (conn, root, _tmp) = open_test_db();
        let driver = test_driver();

        let a = driver.mkdir(&conn, &root, "a", 0, 0, 0o755).unwrap();
        let b = driver.mkdir(&conn, &a, "b", 0, 0, 0o755).unwrap();
        let c = driver
            .create_file(&conn, &b, "c", 0, 0, 0o644, S_IFREG)
            .unwrap();
        let l = make_symlink(&driver, &conn, &root, "l", "/a/b");

        let inodes = path_to_inodes(&driver, &conn, &root, "/l/c").unwrap();
        assert_eq!(inodes, vec![root.clone(), l, root, a, b, c]);

        assert!(path_to_inodes(&driver, &conn, &InodeId::root(), "/l/nope")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_symlink_loop_hits_hop_limit() {
        let (conn, root, _tmp) = open_test_db();
        let driver = test_driver();

        make_symlink(&driver, &conn, &root, "loop", "/loop");

        let err = path_to_inode(&driver, &conn, &root, "/loop/x").unwrap_err();
        assert!(matches!(err, FsError::TooManyLinks(_)));
    }

    #[test]
    fn test_inode2path_and_name_lookups() {
        let (conn, root, _tmp) = open_test_db();
        let driver = test_driver();

        let x = driver.mkdir(&conn, &root, "x", 0, 0, 0o755).unwrap();
        let y = driver.mkdir(&conn, &x, "y", 0, 0, 0o755).unwrap();
        let z = driver
            .create_file(&conn, &y, "z", 0, 0, 0o644, S_IFREG)
            .unwrap();

        assert_eq!(driver.inode2path(&conn, &z, &root).unwrap(), "/x/y/z");
        assert_eq!(driver.inode2path(&conn, &root, &root).unwrap(), "/");
        assert_eq!(
            driver.get_name_of(&conn, &y, &z).unwrap().unwrap(),
            "z"
        );
        assert_eq!(driver.get_parent_of(&conn, &z).unwrap().unwrap(), y);
        assert_eq!(
            driver.inode2path(&conn, &InodeId::generate(), &root).unwrap(),
            ""
        );
    }

    #[test]
    fn test_set_file_name() {
        let (conn, root, _tmp) = open_test_db();
        let driver = test_driver();

        let inode = driver
            .create_file(&conn, &root, "old", 0, 0, 0o644, S_IFREG)
            .unwrap();
        driver.set_file_name(&conn, &root, "old", "new").unwrap();

        assert!(driver.inode_of(&conn, &root, "old").unwrap().is_none());
        assert_eq!(driver.inode_of(&conn, &root, "new").unwrap().unwrap(), inode);
    }

    // ==================== Tag Tests ====================

    #[test]
    fn test_tag_inheritance_and_copy_on_write() {
        let (conn, root, _tmp) = open_test_db();
        let driver = test_driver();

        let d1 = driver.mkdir(&conn, &root, "d1", 0, 0, 0o755).unwrap();
        driver.create_tag(&conn, &d1, "X", 0, 0, 0o644).unwrap();
        driver.set_tag(&conn, &d1, "X", b"v1").unwrap();

        let d2 = driver
            .mkdir_with_tags_and_acl(&conn, &d1, "d2", 0, 0, 0o755, &[])
            .unwrap();

        assert_eq!(driver.get_tag(&conn, &d2, "X").unwrap(), b"v1");
        assert!(!driver.is_tag_owner(&conn, &d2, "X").unwrap());
        // inherited links share the value record
        assert_eq!(
            driver.get_tag_id(&conn, &d1, "X").unwrap(),
            driver.get_tag_id(&conn, &d2, "X").unwrap()
        );

        driver.set_tag(&conn, &d2, "X", b"v2").unwrap();

        assert_eq!(driver.get_tag(&conn, &d1, "X").unwrap(), b"v1");
        assert_eq!(driver.get_tag(&conn, &d2, "X").unwrap(), b"v2");
        assert!(driver.is_tag_owner(&conn, &d2, "X").unwrap());
        assert_ne!(
            driver.get_tag_id(&conn, &d1, "X").unwrap(),
            driver.get_tag_id(&conn, &d2, "X").unwrap()
        );
    }

    #[test]
    fn test_set_tag_on_origin_updates_in_place() {
        let (conn, root, _tmp) = open_test_db();
        let driver = test_driver();

        let d1 = driver.mkdir(&conn, &root, "d1", 0, 0, 0o755).unwrap();
        driver.create_tag(&conn, &d1, "X", 0, 0, 0o644).unwrap();
        let id_before = driver.get_tag_id(&conn, &d1, "X").unwrap();

        driver.set_tag(&conn, &d1, "X", b"v1").unwrap();
        driver.set_tag(&conn, &d1, "X", b"v2").unwrap();

        assert_eq!(driver.get_tag(&conn, &d1, "X").unwrap(), b"v2");
        assert_eq!(driver.get_tag_id(&conn, &d1, "X").unwrap(), id_before);
    }

    #[test]
    fn test_remove_tags_sweeps_unreferenced_values() {
        let (conn, root, _tmp) = open_test_db();
        let driver = test_driver();

        let d1 = driver.mkdir(&conn, &root, "d1", 0, 0, 0o755).unwrap();
        driver.create_tag(&conn, &d1, "X", 0, 0, 0o644).unwrap();
        driver.set_tag(&conn, &d1, "X", b"v1").unwrap();
        let d2 = driver
            .mkdir_with_tags_and_acl(&conn, &d1, "d2", 0, 0, 0o755, &[])
            .unwrap();

        driver.remove_tags(&conn, &d2).unwrap();
        // the value record is still referenced by d1
        assert_eq!(count_rows(&conn, "t_tags_inodes"), 1);
        assert_eq!(driver.get_tag(&conn, &d1, "X").unwrap(), b"v1");

        driver.remove_tags(&conn, &d1).unwrap();
        assert_eq!(count_rows(&conn, "t_tags_inodes"), 0);
        assert_eq!(count_rows(&conn, "t_tags"), 0);
    }

    #[test]
    fn test_tag_listing() {
        let (conn, root, _tmp) = open_test_db();
        let driver = test_driver();

        let dir = driver.mkdir(&conn, &root, "d", 0, 0, 0o755).unwrap();
        driver.create_tag(&conn, &dir, "written", 0, 0, 0o644).unwrap();
        driver.create_tag(&conn, &dir, "empty", 0, 0, 0o644).unwrap();
        driver.set_tag(&conn, &dir, "written", b"value").unwrap();

        let mut names = driver.tags(&conn, &dir).unwrap();
        names.sort();
        assert_eq!(names, vec!["empty", "written"]);

        // never-written tags have no value yet
        let all = driver.get_all_tags(&conn, &dir).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all["written"], b"value");
        assert_eq!(driver.get_tag(&conn, &dir, "empty").unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_tag_stat_and_ownership_changes() {
        let (conn, root, _tmp) = open_test_db();
        let driver = test_driver();

        let dir = driver.mkdir(&conn, &root, "d", 0, 0, 0o755).unwrap();
        driver.create_tag(&conn, &dir, "X", 7, 8, 0o640).unwrap();
        driver.set_tag(&conn, &dir, "X", b"abc").unwrap();

        let stat = driver.stat_tag(&conn, &dir, "X").unwrap();
        assert_eq!(stat.uid(), 7);
        assert_eq!(stat.gid(), 8);
        assert_eq!(stat.size(), 3);
        assert!(stat.is_regular());

        driver.set_tag_owner(&conn, &dir, "X", 100).unwrap();
        driver.set_tag_owner_group(&conn, &dir, "X", 200).unwrap();
        driver.set_tag_mode(&conn, &dir, "X", S_IFREG | 0o600).unwrap();

        let stat = driver.stat_tag(&conn, &dir, "X").unwrap();
        assert_eq!(stat.uid(), 100);
        assert_eq!(stat.gid(), 200);
        assert_eq!(stat.mode() & 0o7777, 0o600);

        let err = driver.stat_tag(&conn, &dir, "missing").unwrap_err();
        assert!(matches!(err, FsError::NotFound(_)));
    }

    #[test]
    fn test_create_tags_bulk_seed() {
        let (conn, root, _tmp) = open_test_db();
        let driver = test_driver();

        let dir = driver.mkdir(&conn, &root, "d", 0, 0, 0o755).unwrap();
        let mut tags = HashMap::new();
        tags.insert("a".to_string(), b"1".to_vec());
        tags.insert("b".to_string(), b"22".to_vec());
        driver.create_tags(&conn, &dir, 0, 0, 0o644, &tags).unwrap();

        assert_eq!(driver.get_all_tags(&conn, &dir).unwrap().len(), 2);
        assert!(driver.is_tag_owner(&conn, &dir, "a").unwrap());
        assert_eq!(driver.get_tag(&conn, &dir, "b").unwrap(), b"22");
    }

    // ==================== Location Tests ====================

    #[test]
    fn test_locations_priority_and_state() {
        let (conn, root, _tmp) = open_test_db();
        let driver = test_driver();

        let inode = driver
            .create_file(&conn, &root, "f", 0, 0, 0o644, S_IFREG)
            .unwrap();
        driver
            .add_inode_location(&conn, &inode, 1, "osm://pool-a/f")
            .unwrap();
        driver
            .add_inode_location(&conn, &inode, 1, "osm://pool-b/f")
            .unwrap();
        conn.execute(
            "UPDATE t_locationinfo SET ipriority = 20 WHERE ilocation = 'osm://pool-b/f'",
            [],
        )
        .unwrap();

        let locations = driver.get_inode_locations(&conn, &inode).unwrap();
        assert_eq!(locations.len(), 2);
        assert_eq!(locations[0].location, "osm://pool-b/f");
        assert_eq!(locations[0].priority, 20);
        assert!(locations.iter().all(|l| l.online));

        // offline rows are invisible
        conn.execute(
            "UPDATE t_locationinfo SET istate = 0 WHERE ilocation = 'osm://pool-b/f'",
            [],
        )
        .unwrap();
        let locations = driver.get_inode_locations(&conn, &inode).unwrap();
        assert_eq!(locations.len(), 1);
        assert_eq!(locations[0].location, "osm://pool-a/f");

        driver
            .clear_inode_location(&conn, &inode, 1, "osm://pool-a/f")
            .unwrap();
        assert!(driver.get_inode_locations(&conn, &inode).unwrap().is_empty());
    }

    #[test]
    fn test_locations_by_type() {
        let (conn, root, _tmp) = open_test_db();
        let driver = test_driver();

        let inode = driver
            .create_file(&conn, &root, "f", 0, 0, 0o644, S_IFREG)
            .unwrap();
        driver
            .add_inode_location(&conn, &inode, 0, "hsm://tape/f")
            .unwrap();
        driver
            .add_inode_location(&conn, &inode, 1, "osm://disk/f")
            .unwrap();

        let tape = driver.get_inode_locations_by_type(&conn, &inode, 0).unwrap();
        assert_eq!(tape.len(), 1);
        assert_eq!(tape[0].location, "hsm://tape/f");

        driver.clear_inode_locations(&conn, &inode).unwrap();
        assert!(driver.get_inode_locations(&conn, &inode).unwrap().is_empty());
    }

    // ==================== Storage Info Tests ====================

    #[test]
    fn test_storage_info_is_write_once() {
        let (conn, root, _tmp) = open_test_db();
        let driver = test_driver();

        let inode = driver
            .create_file(&conn, &root, "f", 0, 0, 0o644, S_IFREG)
            .unwrap();
        let info = InodeStorageInformation {
            hsm_name: "osm".to_string(),
            storage_group: "exp".to_string(),
            storage_sub_group: "raw".to_string(),
        };
        driver.set_storage_info(&conn, &inode, &info).unwrap();
        assert_eq!(driver.get_storage_info(&conn, &inode).unwrap(), info);

        let err = driver.set_storage_info(&conn, &inode, &info).unwrap_err();
        assert!(matches!(err, FsError::DuplicateEntry(_)));

        driver.remove_storage_info(&conn, &inode).unwrap();
        let err = driver.get_storage_info(&conn, &inode).unwrap_err();
        assert!(matches!(err, FsError::NotFound(_)));
    }

    #[test]
    fn test_access_latency_and_retention_policy_upsert() {
        let (conn, root, _tmp) = open_test_db();
        let driver = test_driver();

        let inode = driver
            .create_file(&conn, &root, "f", 0, 0, 0o644, S_IFREG)
            .unwrap();
        assert!(driver.get_access_latency(&conn, &inode).unwrap().is_none());
        assert!(driver.get_retention_policy(&conn, &inode).unwrap().is_none());

        driver
            .set_access_latency(&conn, &inode, AccessLatency::Nearline)
            .unwrap();
        driver
            .set_access_latency(&conn, &inode, AccessLatency::Online)
            .unwrap();
        assert_eq!(
            driver.get_access_latency(&conn, &inode).unwrap().unwrap(),
            AccessLatency::Online
        );

        driver
            .set_retention_policy(&conn, &inode, RetentionPolicy::Custodial)
            .unwrap();
        driver
            .set_retention_policy(&conn, &inode, RetentionPolicy::Replica)
            .unwrap();
        assert_eq!(
            driver.get_retention_policy(&conn, &inode).unwrap().unwrap(),
            RetentionPolicy::Replica
        );
    }

    #[test]
    fn test_sqlite_dialect_upserts() {
        let (conn, root, _tmp) = open_test_db();
        let driver = SqliteFsSqlDriver::new(&DriverConfig::default());

        let inode = driver
            .create_file(&conn, &root, "f", 0, 0, 0o644, S_IFREG)
            .unwrap();
        driver
            .set_access_latency(&conn, &inode, AccessLatency::Nearline)
            .unwrap();
        driver
            .set_access_latency(&conn, &inode, AccessLatency::Online)
            .unwrap();
        assert_eq!(
            driver.get_access_latency(&conn, &inode).unwrap().unwrap(),
            AccessLatency::Online
        );
        driver
            .set_retention_policy(&conn, &inode, RetentionPolicy::Output)
            .unwrap();
        assert_eq!(
            driver.get_retention_policy(&conn, &inode).unwrap().unwrap(),
            RetentionPolicy::Output
        );
    }

    // ==================== Checksum Tests ====================

    #[test]
    fn test_checksums_per_algorithm() {
        let (conn, root, _tmp) = open_test_db();
        let driver = test_driver();

        let inode = driver
            .create_file(&conn, &root, "f", 0, 0, 0o644, S_IFREG)
            .unwrap();
        driver
            .set_inode_checksum(&conn, &inode, ChecksumKind::Adler32, "00ff00ff")
            .unwrap();
        driver
            .set_inode_checksum(&conn, &inode, ChecksumKind::Md5, "d41d8cd98f00b204e9800998ecf8427e")
            .unwrap();

        let sums = driver.get_inode_checksums(&conn, &inode).unwrap();
        assert_eq!(sums.len(), 2);

        driver
            .remove_inode_checksum(&conn, &inode, Some(ChecksumKind::Adler32))
            .unwrap();
        let sums = driver.get_inode_checksums(&conn, &inode).unwrap();
        assert_eq!(sums.len(), 1);
        assert_eq!(sums[0].kind, ChecksumKind::Md5);

        driver.remove_inode_checksum(&conn, &inode, None).unwrap();
        assert!(driver.get_inode_checksums(&conn, &inode).unwrap().is_empty());
    }

    // ==================== ACL Tests ====================

    #[test]
    fn test_acl_ordered_round_trip() {
        let (conn, root, _tmp) = open_test_db();
        let driver = test_driver();

        let inode = driver
            .create_file(&conn, &root, "f", 0, 0, 0o644, S_IFREG)
            .unwrap();
        let acl = sample_acl();

        assert!(driver.set_acl(&conn, &inode, &acl).unwrap());
        assert_eq!(driver.get_acl(&conn, &inode).unwrap(), acl);

        // replacement preserves the new order
        let mut reversed = acl.clone();
        reversed.reverse();
        assert!(driver.set_acl(&conn, &inode, &reversed).unwrap());
        assert_eq!(driver.get_acl(&conn, &inode).unwrap(), reversed);

        // clearing reports a change once, then nothing to do
        assert!(driver.set_acl(&conn, &inode, &[]).unwrap());
        assert!(driver.get_acl(&conn, &inode).unwrap().is_empty());
        assert!(!driver.set_acl(&conn, &inode, &[]).unwrap());
    }

    // ==================== Failure Semantics Tests ====================

    #[test]
    fn test_foreign_key_violation_is_typed() {
        let (conn, root, _tmp) = open_test_db();
        let driver = test_driver();

        let err = driver
            .create_entry_in_parent(&conn, &root, "ghost", &InodeId::generate())
            .unwrap_err();
        assert!(matches!(err, FsError::ForeignKeyViolation(_)));
    }

    #[test]
    fn test_transaction_rollback_discards_operation() {
        let (mut conn, root, _tmp) = open_test_db();
        let driver = test_driver();

        let tx = conn.transaction().unwrap();
        driver
            .create_file(&tx, &root, "ephemeral", 0, 0, 0o644, S_IFREG)
            .unwrap();
        tx.rollback().unwrap();

        assert!(driver.inode_of(&conn, &root, "ephemeral").unwrap().is_none());
        assert_eq!(driver.stat(&conn, &root, 0).unwrap().unwrap().nlink(), 2);
    }

    #[test]
    fn test_fs_stat_totals() {
        let (conn, root, _tmp) = open_test_db();
        let driver = test_driver();

        let f1 = driver
            .create_file(&conn, &root, "f1", 0, 0, 0o644, S_IFREG)
            .unwrap();
        driver
            .create_file(&conn, &root, "f2", 0, 0, 0o644, S_IFREG)
            .unwrap();
        driver.mkdir(&conn, &root, "d", 0, 0, 0o755).unwrap();
        driver.write(&conn, &f1, 0, b"1234567890").unwrap();

        let fs_stat = driver.fs_stat(&conn).unwrap();
        assert_eq!(fs_stat.used_files, 2);
        assert_eq!(fs_stat.used_space, 10);
    }

    // ==================== Driver Selection Tests ====================

    #[test]
    fn test_driver_for_dialect_fallback() {
        let (conn, root, _tmp) = open_test_db();

        let sqlite = driver_for_dialect(&DriverConfig {
            dialect: Some("sqlite".to_string()),
            inode_io_enabled: false,
        });
        let unknown = driver_for_dialect(&DriverConfig {
            dialect: Some("oracle".to_string()),
            inode_io_enabled: false,
        });
        let none = driver_for_dialect(&DriverConfig::default());

        // all resolved drivers speak the same operations
        for (i, driver) in [&sqlite, &unknown, &none].iter().enumerate() {
            let name = format!("probe{}", i);
            let inode = driver
                .create_file(&conn, &root, &name, 0, 0, 0o644, S_IFREG)
                .unwrap();
            assert!(driver.stat(&conn, &inode, 0).unwrap().is_some());
        }
    }
}
