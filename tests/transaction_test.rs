use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;
use vellum_db::catalog::{Column, DataType, TupleDesc, TupleDescRef};
use vellum_db::config::DbConfig;
use vellum_db::execution::{collect_tuples, SeqScan};
use vellum_db::storage::page::{HeapPageId, PageId};
use vellum_db::storage::tuple::Tuple;
use vellum_db::transaction::{LockMode, TransactionId};
use vellum_db::{Database, VellumError};

fn two_int_desc() -> TupleDescRef {
    let _ = env_logger::builder().is_test(true).try_init();
    Arc::new(TupleDesc::new(vec![
        Column::new("a", DataType::Int),
        Column::new("b", DataType::Int),
    ]))
}

#[test]
fn aborted_insert_is_invisible() {
    let dir = TempDir::new().unwrap();
    let db = Database::new();
    let desc = two_int_desc();
    let table_id = db
        .open_heap_table("t", dir.path().join("t.dat"), desc.clone())
        .unwrap();

    let t1 = TransactionId::new();
    let mut tuple = Tuple::new(desc.clone(), vec![7.into(), 7.into()]);
    db.buffer_pool().insert_tuple(t1, table_id, &mut tuple).unwrap();
    assert_eq!(db.buffer_pool().pages_dirtied_by(t1).len(), 1);

    db.buffer_pool().transaction_complete(t1, false).unwrap();
    assert!(db.buffer_pool().pages_dirtied_by(t1).is_empty());

    // A new transaction re-reads the committed (empty) on-disk image.
    let t2 = TransactionId::new();
    let mut scan = SeqScan::new(&db, t2, table_id).unwrap();
    assert_eq!(collect_tuples(&mut scan).unwrap().len(), 0);
    db.buffer_pool().transaction_complete(t2, true).unwrap();
}

#[test]
fn commit_flushes_and_abort_restores_disk_bytes() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("t.dat");
    let desc = two_int_desc();
    let db = Database::new();
    let table_id = db.open_heap_table("t", &path, desc.clone()).unwrap();

    // Committed baseline of one tuple.
    let t1 = TransactionId::new();
    let mut base = Tuple::new(desc.clone(), vec![1.into(), 1.into()]);
    db.buffer_pool().insert_tuple(t1, table_id, &mut base).unwrap();
    db.buffer_pool().transaction_complete(t1, true).unwrap();
    let committed_bytes = std::fs::read(&path).unwrap();

    // An aborted transaction leaves the file untouched.
    let t2 = TransactionId::new();
    let mut extra = Tuple::new(desc.clone(), vec![2.into(), 2.into()]);
    db.buffer_pool().insert_tuple(t2, table_id, &mut extra).unwrap();
    db.buffer_pool().transaction_complete(t2, false).unwrap();
    assert_eq!(std::fs::read(&path).unwrap(), committed_bytes);

    let t3 = TransactionId::new();
    let mut scan = SeqScan::new(&db, t3, table_id).unwrap();
    let tuples = collect_tuples(&mut scan).unwrap();
    assert_eq!(tuples.len(), 1);
    assert_eq!(tuples[0], base);
    db.buffer_pool().transaction_complete(t3, true).unwrap();
}

#[test]
fn conflicting_exclusive_locks_deadlock_and_one_aborts() {
    let dir = TempDir::new().unwrap();
    let config = DbConfig {
        buffer_pool_pages: 10,
        ..DbConfig::default()
    };
    let db = Arc::new(Database::with_config(config));
    let desc = two_int_desc();
    let table_id = db
        .open_heap_table("t", dir.path().join("t.dat"), desc.clone())
        .unwrap();

    // Materialize two pages worth of tuples and commit.
    let setup = TransactionId::new();
    for i in 0..600 {
        let mut tuple = Tuple::new(desc.clone(), vec![i.into(), i.into()]);
        db.buffer_pool()
            .insert_tuple(setup, table_id, &mut tuple)
            .unwrap();
    }
    db.buffer_pool().transaction_complete(setup, true).unwrap();

    let p0 = PageId::Heap(HeapPageId::new(table_id, 0));
    let p1 = PageId::Heap(HeapPageId::new(table_id, 1));

    let t1 = TransactionId::new();
    let t2 = TransactionId::new();
    db.buffer_pool().get_page(t1, p0, LockMode::Exclusive).unwrap();
    db.buffer_pool().get_page(t2, p1, LockMode::Exclusive).unwrap();

    let db1 = db.clone();
    let h1 = thread::spawn(move || {
        let result = db1.buffer_pool().get_page(t1, p1, LockMode::Exclusive);
        let aborted = matches!(result, Err(VellumError::TransactionAborted(_)));
        db1.buffer_pool()
            .transaction_complete(t1, !aborted)
            .unwrap();
        aborted
    });
    let db2 = db.clone();
    let h2 = thread::spawn(move || {
        let result = db2.buffer_pool().get_page(t2, p0, LockMode::Exclusive);
        let aborted = matches!(result, Err(VellumError::TransactionAborted(_)));
        db2.buffer_pool()
            .transaction_complete(t2, !aborted)
            .unwrap();
        aborted
    });

    let aborted1 = h1.join().unwrap();
    let aborted2 = h2.join().unwrap();
    assert!(
        aborted1 ^ aborted2,
        "exactly one transaction should abort (t1={}, t2={})",
        aborted1,
        aborted2
    );
}

#[test]
fn pool_capacity_is_respected_under_pressure() {
    let dir = TempDir::new().unwrap();
    let config = DbConfig {
        buffer_pool_pages: 10,
        page_size: 512,
        ..DbConfig::default()
    };
    let db = Database::with_config(config);
    let desc = two_int_desc();
    let table_id = db
        .open_heap_table("t", dir.path().join("t.dat"), desc.clone())
        .unwrap();

    // 20 pages worth of committed data (63 two-int tuples per 512-byte
    // page), one transaction per page so NO-STEAL never wedges the pool.
    for page in 0..20 {
        let setup = TransactionId::new();
        for i in 0..63 {
            let mut tuple = Tuple::new(desc.clone(), vec![(page * 63 + i).into(), 0.into()]);
            db.buffer_pool()
                .insert_tuple(setup, table_id, &mut tuple)
                .unwrap();
        }
        db.buffer_pool().transaction_complete(setup, true).unwrap();
    }
    let file = db.catalog().get_file(table_id).unwrap();
    assert_eq!(file.num_pages(), 20);

    // Touch more distinct pages than the pool holds.
    let reader = TransactionId::new();
    for page_no in 0..20 {
        let pid = PageId::Heap(HeapPageId::new(table_id, page_no));
        db.buffer_pool()
            .get_page(reader, pid, LockMode::Shared)
            .unwrap();
    }
    assert!(db.buffer_pool().young_len() + db.buffer_pool().old_len() <= 10);
    db.buffer_pool().transaction_complete(reader, true).unwrap();

    // Everything is still there.
    let check = TransactionId::new();
    let mut scan = SeqScan::new(&db, check, table_id).unwrap();
    assert_eq!(collect_tuples(&mut scan).unwrap().len(), 20 * 63);
    db.buffer_pool().transaction_complete(check, true).unwrap();
}

#[test]
fn old_pages_promote_only_after_the_block_time() {
    let dir = TempDir::new().unwrap();
    let config = DbConfig {
        buffer_pool_pages: 10,
        old_block_time: Duration::from_millis(500),
        ..DbConfig::default()
    };
    let db = Database::with_config(config);
    let desc = two_int_desc();
    let table_id = db
        .open_heap_table("t", dir.path().join("t.dat"), desc.clone())
        .unwrap();

    let setup = TransactionId::new();
    let mut tuple = Tuple::new(desc.clone(), vec![1.into(), 1.into()]);
    db.buffer_pool()
        .insert_tuple(setup, table_id, &mut tuple)
        .unwrap();
    db.buffer_pool().transaction_complete(setup, true).unwrap();

    // Start from a cold cache so the first access is a fresh admission.
    let pid = PageId::Heap(HeapPageId::new(table_id, 0));
    db.buffer_pool().remove_page(pid);

    let reader = TransactionId::new();
    db.buffer_pool()
        .get_page(reader, pid, LockMode::Shared)
        .unwrap();
    assert!(db.buffer_pool().is_old(pid));

    // Re-access within the old-block time: stays on the old list.
    db.buffer_pool()
        .get_page(reader, pid, LockMode::Shared)
        .unwrap();
    assert!(db.buffer_pool().is_old(pid));

    // Re-access after the block time: promoted to the young list.
    thread::sleep(Duration::from_millis(700));
    db.buffer_pool()
        .get_page(reader, pid, LockMode::Shared)
        .unwrap();
    assert!(db.buffer_pool().is_young(pid));
    db.buffer_pool().transaction_complete(reader, true).unwrap();
}
