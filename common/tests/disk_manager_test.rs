use common::api::{StoreError, BLOCK_SIZE};
use common::config::StoreOptions;
use common::disk_manager::DiskManager;
use std::fs::OpenOptions;
use test_case::test_case;

#[test]
fn test_disk_manager_allocate() {
    let dir = tempfile::tempdir().unwrap();
    let mut disk_manager = DiskManager::open(dir.path().join("allocate.db")).unwrap();
    assert_eq!(disk_manager.allocate_block().unwrap(), 0);
    assert_eq!(disk_manager.allocate_block().unwrap(), 1);
    assert_eq!(disk_manager.allocate_block().unwrap(), 2);
    disk_manager.sync().unwrap();

    let len = std::fs::metadata(dir.path().join("allocate.db")).unwrap().len();
    assert_eq!(len, 3 * BLOCK_SIZE as u64);
}

#[test]
fn test_disk_manager_read_write() {
    let dir = tempfile::tempdir().unwrap();
    let mut disk_manager = DiskManager::open(dir.path().join("read_write.db")).unwrap();
    let block_id = disk_manager.allocate_block().unwrap();

    let mut data = [0u8; BLOCK_SIZE];
    for (i, byte) in data.iter_mut().enumerate() {
        *byte = i as u8;
    }

    disk_manager.write_block(block_id, &data).unwrap();
    disk_manager.sync().unwrap();

    let mut read_data = [0xFFu8; BLOCK_SIZE];
    disk_manager.read_block(block_id, &mut read_data).unwrap();

    assert_eq!(data, read_data);
}

#[test]
fn test_fresh_block_reads_as_zeroes() {
    let dir = tempfile::tempdir().unwrap();
    let mut disk_manager = DiskManager::open(dir.path().join("zeroes.db")).unwrap();
    let block_id = disk_manager.allocate_block().unwrap();

    let mut read_data = [0xAAu8; BLOCK_SIZE];
    disk_manager.read_block(block_id, &mut read_data).unwrap();
    assert!(read_data.iter().all(|&b| b == 0));
}

#[test_case(0 ; "empty file")]
#[test_case(1 ; "one block")]
#[test_case(5 ; "five blocks")]
fn test_reopen_recovers_block_count(existing: u32) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reopen.db");
    {
        let mut disk_manager = DiskManager::open(&path).unwrap();
        for _ in 0..existing {
            disk_manager.allocate_block().unwrap();
        }
    }

    let mut disk_manager = DiskManager::open(&path).unwrap();
    assert_eq!(disk_manager.block_count(), existing);
    assert_eq!(disk_manager.allocate_block().unwrap(), existing);
    assert_eq!(disk_manager.path(), Some(path.as_path()));
}

#[test]
fn test_reopen_keeps_contents() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("contents.db");
    {
        let mut disk_manager = DiskManager::open(&path).unwrap();
        disk_manager.allocate_block().unwrap();
        let id = disk_manager.allocate_block().unwrap();
        disk_manager.write_block(id, &[b'Q'; BLOCK_SIZE]).unwrap();
        disk_manager.sync().unwrap();
    }

    let disk_manager = DiskManager::open(&path).unwrap();
    let mut data = [0u8; BLOCK_SIZE];
    disk_manager.read_block(1, &mut data).unwrap();
    assert_eq!(data, [b'Q'; BLOCK_SIZE]);
}

#[test_case(0, 0 ; "read on empty store")]
#[test_case(2, 2 ; "read at block count")]
#[test_case(2, 100 ; "read far past end")]
fn test_read_unallocated_block_is_out_of_range(allocated: u32, block_id: u32) {
    let dir = tempfile::tempdir().unwrap();
    let mut disk_manager = DiskManager::open(dir.path().join("read_range.db")).unwrap();
    for _ in 0..allocated {
        disk_manager.allocate_block().unwrap();
    }

    let mut buf = [0u8; BLOCK_SIZE];
    match disk_manager.read_block(block_id, &mut buf) {
        Err(StoreError::OutOfRange { block_id: id, block_count }) => {
            assert_eq!(id, block_id);
            assert_eq!(block_count, allocated);
        }
        other => panic!("expected OutOfRange, got {:?}", other),
    }
}

#[test]
fn test_write_unallocated_block_is_out_of_range() {
    let dir = tempfile::tempdir().unwrap();
    let mut disk_manager = DiskManager::open(dir.path().join("write_range.db")).unwrap();
    disk_manager.allocate_block().unwrap();

    let res = disk_manager.write_block(1, &[1u8; BLOCK_SIZE]);
    assert!(matches!(res, Err(StoreError::OutOfRange { block_id: 1, block_count: 1 })));

    // The rejected write must not have grown the file.
    let len = std::fs::metadata(dir.path().join("write_range.db")).unwrap().len();
    assert_eq!(len, BLOCK_SIZE as u64);
}

#[test]
fn test_file_truncated_under_store_reports_eof() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("truncated.db");
    let mut disk_manager = DiskManager::open(&path).unwrap();
    disk_manager.allocate_block().unwrap();
    disk_manager.allocate_block().unwrap();

    let file = OpenOptions::new().write(true).open(&path).unwrap();
    file.set_len(BLOCK_SIZE as u64 + 10).unwrap();

    let mut buf = [0u8; BLOCK_SIZE];
    let res = disk_manager.read_block(1, &mut buf);
    assert!(matches!(res, Err(StoreError::UnexpectedEof { block_id: 1, .. })), "{:?}", res);
}

#[test]
fn test_open_without_create_reports_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.db");
    let res = DiskManager::open_with(&StoreOptions::new(&path).create(false));
    match res {
        Err(StoreError::Open { path: reported, .. }) => assert_eq!(reported, path),
        other => panic!("expected Open error, got {:?}", other),
    }
}

#[test]
fn test_open_without_access_hint() {
    let dir = tempfile::tempdir().unwrap();
    let options = StoreOptions::new(dir.path().join("no_hint.db")).access_hint(false);
    let mut disk_manager = DiskManager::open_with(&options).unwrap();
    assert_eq!(disk_manager.allocate_block().unwrap(), 0);
}
