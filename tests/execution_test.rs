use std::collections::HashMap;
use std::sync::Arc;
use tempfile::TempDir;
use vellum_db::catalog::{Column, DataType, TupleDesc, TupleDescRef};
use vellum_db::execution::{
    collect_tuples, Aggregate, AggregateOp, Delete, Filter, Insert, Join, JoinPredicate, Op,
    Predicate, SeqScan, TupleIterator,
};
use vellum_db::optimizer::{JoinNode, JoinOptimizer, TableStats};
use vellum_db::storage::page::TableId;
use vellum_db::storage::tuple::{Field, Tuple};
use vellum_db::transaction::TransactionId;
use vellum_db::Database;

fn users_desc() -> TupleDescRef {
    Arc::new(TupleDesc::new(vec![
        Column::new("id", DataType::Int),
        Column::new("name", DataType::Varchar(16)),
        Column::new("age", DataType::Int),
    ]))
}

fn orders_desc() -> TupleDescRef {
    Arc::new(TupleDesc::new(vec![
        Column::new("user_id", DataType::Int),
        Column::new("amount", DataType::Int),
    ]))
}

fn setup_users(db: &Database, dir: &TempDir) -> TableId {
    let desc = users_desc();
    let table_id = db
        .open_heap_table("users", dir.path().join("users.dat"), desc.clone())
        .unwrap();
    let tid = TransactionId::new();
    for (id, name, age) in [
        (1, "alice", 30),
        (2, "bob", 25),
        (3, "carol", 35),
        (4, "dave", 25),
    ] {
        let mut tuple = Tuple::new(desc.clone(), vec![id.into(), name.into(), age.into()]);
        db.buffer_pool().insert_tuple(tid, table_id, &mut tuple).unwrap();
    }
    db.buffer_pool().transaction_complete(tid, true).unwrap();
    table_id
}

fn setup_orders(db: &Database, dir: &TempDir) -> TableId {
    let desc = orders_desc();
    let table_id = db
        .open_heap_table("orders", dir.path().join("orders.dat"), desc.clone())
        .unwrap();
    let tid = TransactionId::new();
    for (user_id, amount) in [(1, 100), (1, 40), (2, 70), (3, 10), (3, 20), (3, 30)] {
        let mut tuple = Tuple::new(desc.clone(), vec![user_id.into(), amount.into()]);
        db.buffer_pool().insert_tuple(tid, table_id, &mut tuple).unwrap();
    }
    db.buffer_pool().transaction_complete(tid, true).unwrap();
    table_id
}

#[test]
fn filter_selects_matching_tuples() {
    let dir = TempDir::new().unwrap();
    let db = Database::new();
    let users = setup_users(&db, &dir);

    let tid = TransactionId::new();
    let scan = SeqScan::new(&db, tid, users).unwrap();
    let mut filter = Filter::new(
        Predicate::new(2, Op::Equals, Field::Int(25)),
        Box::new(scan),
    );
    let matching = collect_tuples(&mut filter).unwrap();
    assert_eq!(matching.len(), 2);
    for tuple in &matching {
        assert_eq!(*tuple.field(2).unwrap(), Field::Int(25));
    }
    db.buffer_pool().transaction_complete(tid, true).unwrap();
}

#[test]
fn nested_loop_join_matches_pairs() {
    let dir = TempDir::new().unwrap();
    let db = Database::new();
    let users = setup_users(&db, &dir);
    let orders = setup_orders(&db, &dir);

    let tid = TransactionId::new();
    let left = SeqScan::new(&db, tid, users).unwrap();
    let right = SeqScan::new(&db, tid, orders).unwrap();
    let mut join = Join::new(
        JoinPredicate::new(0, Op::Equals, 0),
        Box::new(left),
        Box::new(right),
    );

    let joined = collect_tuples(&mut join).unwrap();
    // alice x2, bob x1, carol x3, dave x0.
    assert_eq!(joined.len(), 6);
    assert_eq!(join.tuple_desc().num_fields(), 5);
    for tuple in &joined {
        assert_eq!(tuple.field(0).unwrap(), tuple.field(3).unwrap());
    }
    db.buffer_pool().transaction_complete(tid, true).unwrap();
}

#[test]
fn aggregate_with_grouping_over_a_scan() {
    let dir = TempDir::new().unwrap();
    let db = Database::new();
    let orders = setup_orders(&db, &dir);

    let tid = TransactionId::new();
    let scan = SeqScan::new(&db, tid, orders).unwrap();
    let mut aggregate =
        Aggregate::new(Box::new(scan), Some(0), 1, AggregateOp::Sum).unwrap();
    let totals = collect_tuples(&mut aggregate).unwrap();
    assert_eq!(
        totals
            .iter()
            .map(|t| (t.fields[0].clone(), t.fields[1].clone()))
            .collect::<Vec<_>>(),
        vec![
            (Field::Int(1), Field::Int(140)),
            (Field::Int(2), Field::Int(70)),
            (Field::Int(3), Field::Int(60)),
        ]
    );

    // Ungrouped count.
    let scan = SeqScan::new(&db, tid, orders).unwrap();
    let mut count = Aggregate::new(Box::new(scan), None, 1, AggregateOp::Count).unwrap();
    let counts = collect_tuples(&mut count).unwrap();
    assert_eq!(counts.len(), 1);
    assert_eq!(counts[0].fields[0], Field::Int(6));
    db.buffer_pool().transaction_complete(tid, true).unwrap();
}

#[test]
fn insert_and_delete_operators_report_counts() {
    let dir = TempDir::new().unwrap();
    let db = Database::new();
    let users = setup_users(&db, &dir);

    // Copy the young users into a second table through operators.
    let copy_desc = users_desc();
    let copy = db
        .open_heap_table("copy", dir.path().join("copy.dat"), copy_desc)
        .unwrap();

    let tid = TransactionId::new();
    let scan = SeqScan::new(&db, tid, users).unwrap();
    let young = Filter::new(
        Predicate::new(2, Op::LessThan, Field::Int(30)),
        Box::new(scan),
    );
    let mut insert = Insert::new(tid, copy, db.buffer_pool().clone(), Box::new(young));
    let report = collect_tuples(&mut insert).unwrap();
    assert_eq!(report.len(), 1);
    assert_eq!(report[0].fields[0], Field::Int(2));

    // And delete them again.
    let scan = SeqScan::new(&db, tid, copy).unwrap();
    let mut delete = Delete::new(tid, db.buffer_pool().clone(), Box::new(scan));
    let report = collect_tuples(&mut delete).unwrap();
    assert_eq!(report[0].fields[0], Field::Int(2));

    let mut scan = SeqScan::new(&db, tid, copy).unwrap();
    assert_eq!(collect_tuples(&mut scan).unwrap().len(), 0);
    db.buffer_pool().transaction_complete(tid, true).unwrap();
}

#[test]
fn table_stats_estimate_scan_cost_and_selectivity() {
    let dir = TempDir::new().unwrap();
    let db = Database::new();
    let desc = orders_desc();
    let table_id = db
        .open_heap_table("orders", dir.path().join("orders.dat"), desc.clone())
        .unwrap();

    let tid = TransactionId::new();
    for i in 0..1000 {
        let mut tuple = Tuple::new(desc.clone(), vec![i.into(), (i % 100).into()]);
        db.buffer_pool().insert_tuple(tid, table_id, &mut tuple).unwrap();
    }
    db.buffer_pool().transaction_complete(tid, true).unwrap();

    let stats = TableStats::build(db.catalog(), db.buffer_pool(), table_id, 1000).unwrap();
    assert_eq!(stats.total_tuples(), 1000);
    // Two 504-slot pages hold 1000 two-int tuples.
    assert_eq!(stats.estimate_scan_cost(), 2.0 * 1000.0);
    assert_eq!(stats.estimate_table_cardinality(0.5), 500);

    let half = stats.estimate_selectivity(0, Op::GreaterThan, &Field::Int(499));
    assert!((half - 0.5).abs() < 0.05, "got {}", half);
    let none = stats.estimate_selectivity(0, Op::GreaterThan, &Field::Int(2000));
    assert!(none < 0.01, "got {}", none);
}

#[test]
fn join_ordering_puts_the_selective_table_first() {
    let dir = TempDir::new().unwrap();
    let db = Database::new();
    let desc = orders_desc();

    // A small table and a big table joined on their first fields.
    let small = db
        .open_heap_table("small", dir.path().join("small.dat"), desc.clone())
        .unwrap();
    let big = db
        .open_heap_table("big", dir.path().join("big.dat"), desc.clone())
        .unwrap();
    let third = db
        .open_heap_table("third", dir.path().join("third.dat"), desc.clone())
        .unwrap();

    let tid = TransactionId::new();
    for i in 0..20 {
        let mut tuple = Tuple::new(desc.clone(), vec![i.into(), 0.into()]);
        db.buffer_pool().insert_tuple(tid, small, &mut tuple).unwrap();
    }
    for i in 0..1000 {
        let mut tuple = Tuple::new(desc.clone(), vec![i.into(), 0.into()]);
        db.buffer_pool().insert_tuple(tid, big, &mut tuple).unwrap();
    }
    for i in 0..200 {
        let mut tuple = Tuple::new(desc.clone(), vec![i.into(), 0.into()]);
        db.buffer_pool().insert_tuple(tid, third, &mut tuple).unwrap();
    }
    db.buffer_pool().transaction_complete(tid, true).unwrap();

    let mut stats = HashMap::new();
    for table in [small, big, third] {
        stats.insert(
            table,
            TableStats::build(db.catalog(), db.buffer_pool(), table, 1000).unwrap(),
        );
    }
    let selectivities: HashMap<TableId, f64> =
        [(small, 1.0), (big, 1.0), (third, 1.0)].into_iter().collect();

    let joins = vec![
        JoinNode::new(big, 0, Op::Equals, third, 0),
        JoinNode::new(small, 0, Op::Equals, big, 0),
    ];
    let ordered = JoinOptimizer::order_joins(&stats, &selectivities, &joins).unwrap();
    assert_eq!(ordered.len(), 2);
    // The cheap small-big join should come first, leaving the expensive scan
    // of `big` out of the inner loops.
    assert_eq!(ordered[0], joins[1]);
}
