use std::sync::Arc;
use tempfile::TempDir;
use vellum_db::catalog::{Column, DataType, TupleDesc, TupleDescRef};
use vellum_db::execution::{collect_tuples, SeqScan};
use vellum_db::storage::tuple::{Field, Tuple};
use vellum_db::transaction::TransactionId;
use vellum_db::Database;

fn two_int_desc() -> TupleDescRef {
    Arc::new(TupleDesc::new(vec![
        Column::new("a", DataType::Int),
        Column::new("b", DataType::Int),
    ]))
}

fn int_pair(desc: &TupleDescRef, a: i32, b: i32) -> Tuple {
    Tuple::new(desc.clone(), vec![a.into(), b.into()])
}

#[test]
fn empty_file_scans_empty() {
    let dir = TempDir::new().unwrap();
    let db = Database::new();
    let table_id = db
        .open_heap_table("t", dir.path().join("t.dat"), two_int_desc())
        .unwrap();

    let tid = TransactionId::new();
    let mut scan = SeqScan::new(&db, tid, table_id).unwrap();
    assert_eq!(collect_tuples(&mut scan).unwrap().len(), 0);
    db.buffer_pool().transaction_complete(tid, true).unwrap();
}

#[test]
fn fill_one_page_and_overflow_to_the_next() {
    let dir = TempDir::new().unwrap();
    let db = Database::new();
    let desc = two_int_desc();
    let table_id = db
        .open_heap_table("t", dir.path().join("t.dat"), desc.clone())
        .unwrap();

    let tid = TransactionId::new();
    // 504 two-int tuples fill one 4096-byte page exactly.
    for i in 0..504 {
        let mut tuple = int_pair(&desc, i, i * 10);
        db.buffer_pool()
            .insert_tuple(tid, table_id, &mut tuple)
            .unwrap();
        assert_eq!(tuple.record_id.unwrap().page_id.page_no(), 0);
    }
    let mut overflow = int_pair(&desc, 504, 5040);
    db.buffer_pool()
        .insert_tuple(tid, table_id, &mut overflow)
        .unwrap();
    assert_eq!(overflow.record_id.unwrap().page_id.page_no(), 1);

    let file = db.catalog().get_file(table_id).unwrap();
    assert_eq!(file.num_pages(), 2);

    let mut scan = SeqScan::new(&db, tid, table_id).unwrap();
    let tuples = collect_tuples(&mut scan).unwrap();
    assert_eq!(tuples.len(), 505);
    // Slot order within the first page.
    assert_eq!(tuples[0].fields[0], Field::Int(0));
    assert_eq!(tuples[503].fields[0], Field::Int(503));
    db.buffer_pool().transaction_complete(tid, true).unwrap();
}

#[test]
fn six_hundred_inserts_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("t.dat");
    let desc = two_int_desc();

    {
        let db = Database::new();
        let table_id = db.open_heap_table("t", &path, desc.clone()).unwrap();
        let tid = TransactionId::new();
        for i in 0..600 {
            let mut tuple = int_pair(&desc, i, i);
            db.buffer_pool()
                .insert_tuple(tid, table_id, &mut tuple)
                .unwrap();
        }
        let file = db.catalog().get_file(table_id).unwrap();
        assert_eq!(file.num_pages(), 2);

        let mut scan = SeqScan::new(&db, tid, table_id).unwrap();
        assert_eq!(collect_tuples(&mut scan).unwrap().len(), 600);

        db.buffer_pool().transaction_complete(tid, true).unwrap();
    }

    // A brand new pool over the same file sees the committed tuples.
    let db = Database::new();
    let table_id = db.open_heap_table("t", &path, desc.clone()).unwrap();
    let tid = TransactionId::new();
    let mut scan = SeqScan::new(&db, tid, table_id).unwrap();
    let tuples = collect_tuples(&mut scan).unwrap();
    assert_eq!(tuples.len(), 600);

    let sum: i64 = tuples
        .iter()
        .map(|t| match t.fields[0] {
            Field::Int(v) => v as i64,
            _ => 0,
        })
        .sum();
    assert_eq!(sum, (0..600i64).sum::<i64>());
    db.buffer_pool().transaction_complete(tid, true).unwrap();
}

#[test]
fn delete_then_insert_reuses_the_slot() {
    let dir = TempDir::new().unwrap();
    let db = Database::new();
    let desc = two_int_desc();
    let table_id = db
        .open_heap_table("t", dir.path().join("t.dat"), desc.clone())
        .unwrap();

    let tid = TransactionId::new();
    for i in 0..10 {
        let mut tuple = int_pair(&desc, i, i);
        db.buffer_pool()
            .insert_tuple(tid, table_id, &mut tuple)
            .unwrap();
    }

    let mut scan = SeqScan::new(&db, tid, table_id).unwrap();
    let tuples = collect_tuples(&mut scan).unwrap();
    let victim = tuples[3].clone();
    db.buffer_pool().delete_tuple(tid, &victim).unwrap();

    let mut scan = SeqScan::new(&db, tid, table_id).unwrap();
    let remaining = collect_tuples(&mut scan).unwrap();
    assert_eq!(remaining.len(), 9);
    assert!(!remaining.contains(&victim));

    // The freed slot is the lowest-index hole, so the next insert lands in it.
    let mut replacement = int_pair(&desc, 99, 99);
    db.buffer_pool()
        .insert_tuple(tid, table_id, &mut replacement)
        .unwrap();
    assert_eq!(replacement.record_id.unwrap().slot, 3);
    db.buffer_pool().transaction_complete(tid, true).unwrap();
}
