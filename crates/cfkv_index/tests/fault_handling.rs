//! Store faults injected under the index layer.
//!
//! Test flow:
//! 1) Create an indexed table and load rows.
//! 2) Fail selected store calls (index writes, scan steps, cursor close,
//!    point reads, backfill scans) and run row operations through them.
//!
//! Failure model covered:
//! - Index writes failing after the base write succeeded.
//! - Scan cursors leaked when reading fails part way.
//! - A cleanup failure hiding the error that caused it.
//! - Backfill failing between registration and publication.
//!
//! Verification:
//! - Base writes stand and index failures surface as warnings that a
//!   rebuild repairs.
//! - No store cursor stays open after any scan, successful or not.

mod common;

use anyhow::Result;
use cfkv_index::{
    create_index, list_indexes, plan_scan, put_batch, put_row, rebuild_index, scan, ErrorCode,
    IndexError, IndexSpec, IndexState, ScanQuery,
};
use cfkv_store::{Put, StoreOp, TableName, ValueType};
use tokio_util::sync::CancellationToken;

use common::{
    assert_index_consistent, create_name_index, create_people_table, keys, name_equals,
    person_put, scan_all, setup, FAMILY, NAME_INDEX,
};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failed_index_write_surfaces_warning_and_rebuild_repairs() -> Result<()> {
    let (store, ctx) = setup();
    let table = TableName::new("people");
    create_people_table(&ctx, &table).await?;
    let spec = create_name_index(&ctx, &table).await?;
    let index_table = ctx.index_table_name(&table, NAME_INDEX);

    store.faults().fail_next(StoreOp::Put, Some(&index_table), 1);
    let outcome = put_row(
        &ctx,
        &table,
        person_put("2017122607", "zhou ba", "M", "30", "wuhan"),
    )
    .await?;
    assert!(!outcome.is_consistent());
    assert_eq!(outcome.index_warnings.len(), 1);
    let warning = &outcome.index_warnings[0];
    assert_eq!(warning.code(), ErrorCode::IndexInconsistency);
    assert_eq!(warning.index, NAME_INDEX);
    assert_eq!(warning.row_key, b"2017122607".to_vec());
    assert_eq!(ctx.metrics().snapshot().index_inconsistencies, 1);

    // The base write stands; the index misses the row until rebuilt.
    assert_eq!(store.row_count(&table)?, 7);
    let rows = scan_all(&ctx, &table, ScanQuery::new().with_predicate(name_equals("zhou ba"))).await?;
    assert!(rows.is_empty());

    let report = rebuild_index(&ctx, &table, NAME_INDEX).await?;
    assert_eq!(report.added, 1);
    assert_eq!(report.removed, 0);
    assert_eq!(report.entries, 7);
    assert_index_consistent(&ctx, &table, &spec).await?;
    let rows = scan_all(&ctx, &table, ScanQuery::new().with_predicate(name_equals("zhou ba"))).await?;
    assert_eq!(keys(&rows), vec!["2017122607"]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failed_index_delete_keeps_new_entry() -> Result<()> {
    let (store, ctx) = setup();
    let table = TableName::new("people");
    create_people_table(&ctx, &table).await?;
    let spec = create_name_index(&ctx, &table).await?;
    let index_table = ctx.index_table_name(&table, NAME_INDEX);

    store
        .faults()
        .fail_next(StoreOp::Delete, Some(&index_table), 1);
    let outcome = put_row(
        &ctx,
        &table,
        Put::new("2017122601").with_column(FAMILY, "name", "li si"),
    )
    .await?;
    assert_eq!(outcome.index_warnings.len(), 1);

    // The stale entry still points at the row, but the row no longer
    // matches, so scans stay correct.
    let rows = scan_all(&ctx, &table, ScanQuery::new().with_predicate(name_equals("zhang san"))).await?;
    assert_eq!(keys(&rows), vec!["2017122604"]);
    let rows = scan_all(&ctx, &table, ScanQuery::new().with_predicate(name_equals("li si"))).await?;
    assert_eq!(keys(&rows), vec!["2017122601", "2017122602"]);

    let report = rebuild_index(&ctx, &table, NAME_INDEX).await?;
    assert_eq!((report.added, report.removed), (0, 1));
    assert_index_consistent(&ctx, &table, &spec).await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn scan_failures_release_cursors() -> Result<()> {
    let (store, ctx) = setup();
    let table = TableName::new("people");
    create_people_table(&ctx, &table).await?;
    create_name_index(&ctx, &table).await?;
    let index_table = ctx.index_table_name(&table, NAME_INDEX);

    // Direct scan failing part way.
    store.faults().fail_next(StoreOp::ScanNext, Some(&table), 1);
    let err = scan_all(&ctx, &table, ScanQuery::new())
        .await
        .expect_err("scan step fails")
        .downcast::<IndexError>()?;
    assert_eq!(err.code(), ErrorCode::TransientStore);
    assert!(err.is_retryable());
    assert_eq!(store.open_cursors(), 0);

    // Indexed scan failing on a base-row fetch.
    store.faults().fail_next(StoreOp::Get, Some(&table), 1);
    let err = scan_all(
        &ctx,
        &table,
        ScanQuery::new().with_predicate(name_equals("zhang san")),
    )
    .await
    .expect_err("fetch fails")
    .downcast::<IndexError>()?;
    assert_eq!(err.code(), ErrorCode::TransientStore);
    assert_eq!(store.open_cursors(), 0);

    // Indexed scan failing on the index cursor itself.
    store
        .faults()
        .fail_next(StoreOp::ScanNext, Some(&index_table), 1);
    assert!(scan_all(
        &ctx,
        &table,
        ScanQuery::new().with_predicate(name_equals("zhang san")),
    )
    .await
    .is_err());
    assert_eq!(store.open_cursors(), 0);

    // The failures were transient; the same scan now succeeds.
    let rows = scan_all(
        &ctx,
        &table,
        ScanQuery::new().with_predicate(name_equals("zhang san")),
    )
    .await?;
    assert_eq!(keys(&rows), vec!["2017122601", "2017122604"]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn read_error_wins_over_close_error() -> Result<()> {
    let (store, ctx) = setup();
    let table = TableName::new("people");
    create_people_table(&ctx, &table).await?;

    store.faults().fail_next(StoreOp::ScanNext, Some(&table), 1);
    store
        .faults()
        .fail_next(StoreOp::CursorClose, Some(&table), 1);
    let err = scan_all(&ctx, &table, ScanQuery::new())
        .await
        .expect_err("scan fails")
        .downcast::<IndexError>()?;
    assert!(err.to_string().contains("ScanNext"), "unexpected error: {err}");
    assert_eq!(store.open_cursors(), 0);

    // A close failure alone is still reported.
    store
        .faults()
        .fail_next(StoreOp::CursorClose, Some(&table), 1);
    let err = scan_all(&ctx, &table, ScanQuery::new())
        .await
        .expect_err("close fails")
        .downcast::<IndexError>()?;
    assert!(err.to_string().contains("CursorClose"), "unexpected error: {err}");
    assert_eq!(store.open_cursors(), 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn early_stop_closes_scanner() -> Result<()> {
    let (store, ctx) = setup();
    let table = TableName::new("people");
    create_people_table(&ctx, &table).await?;

    let rows = scan(&ctx, &table, ScanQuery::new())
        .await?
        .collect_limit(2)
        .await?;
    assert_eq!(keys(&rows), vec!["2017122601", "2017122602"]);
    assert_eq!(store.open_cursors(), 0);

    // Dropping an unfinished scanner releases its cursor too.
    let mut scanner = scan(&ctx, &table, ScanQuery::new()).await?;
    assert!(scanner.next_row().await?.is_some());
    assert_eq!(store.open_cursors(), 1);
    drop(scanner);
    assert_eq!(store.open_cursors(), 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failed_backfill_leaves_write_only_index() -> Result<()> {
    let (store, ctx) = setup();
    let table = TableName::new("people");
    create_people_table(&ctx, &table).await?;

    store.faults().fail_next(StoreOp::Scan, Some(&table), 1);
    let spec = IndexSpec::new(table.clone(), NAME_INDEX, FAMILY, "name", ValueType::String);
    let err = create_index(&ctx, &table, spec)
        .await
        .expect_err("backfill fails");
    assert_eq!(err.code(), ErrorCode::TransientStore);

    let specs = list_indexes(&ctx, &table).await?;
    assert_eq!(specs.len(), 1);
    assert_eq!(specs[0].state, IndexState::WriteOnly);
    let query = ScanQuery::new().with_predicate(name_equals("zhang san"));
    assert!(!plan_scan(&ctx, &table, &query).await?.is_indexed());

    // Writes already maintain the unpublished index.
    put_row(
        &ctx,
        &table,
        person_put("2017122607", "zhang san", "M", "50", "nanjing"),
    )
    .await?;

    let report = rebuild_index(&ctx, &table, NAME_INDEX).await?;
    assert_eq!(report.entries, 7);
    assert_eq!(report.added, 6);
    let specs = list_indexes(&ctx, &table).await?;
    assert_eq!(specs[0].state, IndexState::Public);
    assert_index_consistent(&ctx, &table, &specs[0]).await?;

    assert!(plan_scan(&ctx, &table, &query).await?.is_indexed());
    let rows = scan_all(&ctx, &table, query).await?;
    assert_eq!(keys(&rows), vec!["2017122601", "2017122604", "2017122607"]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn batch_stops_when_cancelled() -> Result<()> {
    let (_store, ctx) = setup();
    let table = TableName::new("people");
    create_people_table(&ctx, &table).await?;
    let spec = create_name_index(&ctx, &table).await?;

    let puts = |prefix: &str| -> Vec<Put> {
        (0..5)
            .map(|i| Put::new(format!("{prefix}-{i}")).with_column(FAMILY, "name", "batch"))
            .collect()
    };

    let cancel = CancellationToken::new();
    cancel.cancel();
    let outcome = put_batch(&ctx, &table, puts("cancelled"), &cancel).await?;
    assert_eq!(outcome.applied, 0);
    assert!(outcome.cancelled);

    let outcome = put_batch(&ctx, &table, puts("applied"), &CancellationToken::new()).await?;
    assert_eq!(outcome.applied, 5);
    assert!(!outcome.cancelled);
    assert!(outcome.index_warnings.is_empty());

    assert_index_consistent(&ctx, &table, &spec).await?;
    let rows = scan_all(&ctx, &table, ScanQuery::new().with_predicate(name_equals("batch"))).await?;
    assert_eq!(rows.len(), 5);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn batch_failure_keeps_applied_prefix() -> Result<()> {
    let (store, ctx) = setup();
    let table = TableName::new("people");
    create_people_table(&ctx, &table).await?;
    let spec = create_name_index(&ctx, &table).await?;

    // The third put names a family the table lacks, so the store rejects it
    // before writing any of its cells.
    let puts: Vec<Put> = (0..4)
        .map(|i| {
            let put = Put::new(format!("b-{i}")).with_column(FAMILY, "name", "batch");
            if i == 2 {
                put.with_column("missing", "note", "x")
            } else {
                put
            }
        })
        .collect();
    let err = put_batch(&ctx, &table, puts, &CancellationToken::new())
        .await
        .expect_err("third put fails");
    assert_eq!(err.code(), ErrorCode::InvalidRequest);

    assert_eq!(store.row_count(&table)?, 8);
    assert_index_consistent(&ctx, &table, &spec).await?;
    let rows = scan_all(&ctx, &table, ScanQuery::new().with_predicate(name_equals("batch"))).await?;
    assert_eq!(keys(&rows), vec!["b-0", "b-1"]);
    Ok(())
}
