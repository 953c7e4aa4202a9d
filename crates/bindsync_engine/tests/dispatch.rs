//! Direct and delayed dispatch, and the worker driving delayed jobs.

use bindsync_engine::{
    AdapterError, BatchExporter, BatchImporter, BindingFilter, CallKind, Clock, Delayed, Direct,
    Job, JobOptions, JobState, RecordFilter, SyncStatus,
};
use bindsync_testkit::prelude::*;
use std::time::Duration;

fn seed(fx: &Fixture) {
    let saleable = fx.seed_category("Saleable");
    let rental = fx.seed_category("Rental");
    fx.seed_product("Chair", Some(saleable));
    fx.seed_product("Table", Some(rental));
    fx.seed_product("Lamp", None);
}

fn bound_rows(fx: &Fixture) -> Vec<(String, u64, Option<u64>)> {
    let mut rows: Vec<_> = fx
        .store
        .list(&BindingFilter::new())
        .unwrap()
        .into_iter()
        .map(|b| {
            (
                b.model.as_str().to_string(),
                b.local_id.0,
                b.external_id.map(|e| e.get()),
            )
        })
        .collect();
    rows.sort();
    rows
}

#[test]
fn direct_and_delayed_exports_end_in_the_same_state() {
    let direct = Fixture::new();
    seed(&direct);
    for model in [category_model(), product_model()] {
        let summary = BatchExporter::new(&direct.conn, &model)
            .unwrap()
            .run(&Direct, &RecordFilter::all(), None)
            .unwrap();
        assert!(summary.failures.is_empty());
    }

    let delayed = Fixture::new();
    seed(&delayed);
    for model in [category_model(), product_model()] {
        let summary = BatchExporter::new(&delayed.conn, &model)
            .unwrap()
            .run(&Delayed, &RecordFilter::all(), None)
            .unwrap();
        assert!(summary.ran.is_empty());
        assert!(!summary.queued.is_empty());
    }
    // placeholders exist before any job ran
    assert_eq!(bound_rows(&delayed).len(), 5);
    assert!(bound_rows(&delayed).iter().all(|(_, _, ext)| ext.is_none()));

    let reports = delayed.worker().drain().unwrap();
    assert_eq!(reports.len(), 5);
    assert!(reports.iter().all(|r| r.state == JobState::Done));

    assert_eq!(bound_rows(&direct), bound_rows(&delayed));
    assert!(bound_rows(&direct).iter().all(|(_, _, ext)| ext.is_some()));
}

#[test]
fn direct_and_delayed_imports_end_in_the_same_state() {
    let build = || {
        let fx = Fixture::new();
        let now = Some(fx.clock.now());
        let categ = fx.remote_category("All", now);
        fx.remote_product("Chair", Some(categ), now);
        fx.remote_product("Table", None, now);
        fx
    };

    let direct = build();
    let summary = BatchImporter::new(&direct.conn, &product_model())
        .unwrap()
        .run(&Direct, &RecordFilter::all(), false)
        .unwrap();
    assert_eq!(summary.ran.len(), 2);

    let delayed = build();
    let summary = BatchImporter::new(&delayed.conn, &product_model())
        .unwrap()
        .run(&Delayed, &RecordFilter::all(), false)
        .unwrap();
    assert_eq!(summary.queued.len(), 2);
    assert!(bound_rows(&delayed).is_empty());

    delayed.worker().drain().unwrap();
    assert_eq!(bound_rows(&direct), bound_rows(&delayed));
    assert_eq!(bound_rows(&direct).len(), 3);
}

#[test]
fn category_jobs_run_before_product_jobs() {
    let fx = Fixture::new();
    seed(&fx);
    for model in [product_model(), category_model()] {
        BatchExporter::new(&fx.conn, &model)
            .unwrap()
            .run(&Delayed, &RecordFilter::all(), None)
            .unwrap();
    }

    let first = fx.worker().run_once().unwrap().unwrap();
    let record = fx.queue.get(first.id).unwrap();
    assert_eq!(record.job.model(), &category_model());
}

#[test]
fn batch_job_fans_out_through_the_queue() {
    let fx = Fixture::new();
    seed(&fx);
    fx.conn
        .dispatcher()
        .enqueue(
            Job::ExportBatch {
                model: product_model(),
                filter: RecordFilter::all(),
                fields: None,
            },
            JobOptions::new(),
        )
        .unwrap();

    let reports = fx.worker().drain().unwrap();
    // the batch job plus one export per product
    assert_eq!(reports.len(), 4);
    assert!(reports.iter().all(|r| r.state == JobState::Done));
    assert_eq!(reports[0].message, "0 run, 3 queued, 0 failed");
    assert_eq!(fx.products.len(), 3);
    assert_eq!(fx.categories.len(), 2);
}

#[test]
fn transient_failure_is_retried_by_the_worker() {
    let fx = Fixture::new();
    let product = fx.seed_product("Chair", None);
    let binding = fx.placeholder(&product_model(), product);
    fx.products
        .fail_next(CallKind::Create, AdapterError::transport_retryable("timeout"));

    let job = fx
        .conn
        .delay_export_record(&product_model(), binding.id, None)
        .unwrap();
    assert_eq!(
        fx.queue.sync_status(&product_model(), &binding),
        SyncStatus::Waiting
    );

    let reports = fx.worker().drain().unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].state, JobState::Pending);
    // not due yet
    assert!(fx.worker().run_once().unwrap().is_none());

    fx.advance(Duration::from_secs(10));
    let reports = fx.worker().drain().unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].state, JobState::Done);
    assert_eq!(fx.queue.get(job).unwrap().attempts, 2);
    assert_eq!(
        fx.queue.sync_status(&product_model(), &binding),
        SyncStatus::Done
    );
}

#[test]
fn rejected_export_marks_the_binding_in_error() {
    let fx = Fixture::new();
    let product = fx.seed_product("Chair", None);
    let binding = fx.placeholder(&product_model(), product);
    fx.products
        .fail_next(CallKind::Create, AdapterError::Rejected("bad code".into()));

    fx.conn
        .delay_export_record(&product_model(), binding.id, None)
        .unwrap();
    let reports = fx.worker().drain().unwrap();
    assert_eq!(reports[0].state, JobState::Failed);
    assert_eq!(
        fx.queue.sync_status(&product_model(), &binding),
        SyncStatus::Error
    );

    // a later successful export clears the error
    fx.conn
        .delay_export_record(&product_model(), binding.id, None)
        .unwrap();
    fx.worker().drain().unwrap();
    assert_eq!(
        fx.queue.sync_status(&product_model(), &binding),
        SyncStatus::Done
    );
}

#[test]
fn resync_of_locally_owned_record_schedules_export() {
    let fx = Fixture::new();
    let product = fx.seed_product("Chair", None);
    let binding = fx.placeholder(&product_model(), product);

    let id = fx.conn.resync(&product_model(), &binding).unwrap();
    let record = fx.queue.get(id).unwrap();
    assert_eq!(
        record.job,
        Job::ExportRecord {
            model: product_model(),
            binding_id: binding.id,
            fields: None
        }
    );

    fx.worker().drain().unwrap();
    assert!(fx
        .binding_of(&product_model(), product)
        .unwrap()
        .external_id
        .is_some());
}
