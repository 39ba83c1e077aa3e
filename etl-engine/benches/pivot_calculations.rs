//! FILENAME: etl-engine/benches/pivot_calculations.rs
//! Benchmarks for pivot and the reconciliation chain over many files.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::collections::BTreeMap;

use etl_engine::{pivot, reconcile, AppState};
use etl_model::{
    update_field, DerivedKind, EngineConfig, EtlFieldChanges, FieldEdit, FieldOverrides,
    FileField, FileRecord, Interval, IntervalUnit, Level, Purpose, Reducer, TimeEdit,
};

fn month_field(idx: usize, file_no: usize) -> FileField {
    let levels = (0..12)
        .map(|m| Level::new(format!("{}-{:02}", 2020 + file_no % 4, m + 1), 100))
        .collect();
    let field = FileField::new(idx, "date", Purpose::MeasurementTime)
        .with_levels(levels)
        .with_format("%Y-%m");
    update_field(
        &field,
        FieldEdit::Time(TimeEdit::Interval(Interval::new(IntervalUnit::Month, 1))),
    )
    .map(|o| o.field)
    .unwrap_or(field)
}

fn make_files(n: usize) -> Vec<FileRecord> {
    (0..n)
        .map(|i| {
            let mut fields = vec![
                FileField::new(0, "NPI", Purpose::Subject),
                FileField::new(1, "specialty", Purpose::Quality),
                FileField::new(2, "nrx", Purpose::MeasurementValue),
                month_field(3, i),
                FileField::new(4, format!("comp_{}", i % 5), Purpose::MeasurementComponent),
            ];
            if i % 3 == 0 {
                fields.push(FileField::new(5, "trx", Purpose::MeasurementValue));
            }
            FileRecord::new(format!("file_{:04}.csv", i), 1_000, fields)
        })
        .collect()
}

fn make_changes(config: &EngineConfig, files: &[FileRecord]) -> EtlFieldChanges {
    let mut changes = EtlFieldChanges::default();
    changes.record(
        "nrx",
        FieldOverrides {
            codomain_reducer: Some(Reducer::Avg),
            source_sequence: Some(files.iter().rev().map(|f| f.filename.clone()).collect()),
            ..FieldOverrides::default()
        },
    );
    let state = AppState {
        file_records: files.to_vec().into(),
        config: config.clone(),
        ..AppState::default()
    };
    state
        .recompute()
        .and_then(|s| {
            s.add_derived_field(
                "region",
                DerivedKind::ImpliedComponent { codomain: "nrx".into() },
                BTreeMap::new(),
            )
        })
        .map(|s| {
            let mut recorded = s.etl_field_changes;
            recorded.props.extend(changes.props.clone());
            recorded
        })
        .unwrap_or(changes)
}

fn bench_pivot(c: &mut Criterion) {
    let config = EngineConfig::default();
    let mut group = c.benchmark_group("pivot");

    for n in [10, 100, 500] {
        let files = make_files(n);
        group.bench_with_input(BenchmarkId::new("files", n), &files, |b, files| {
            b.iter(|| pivot(std::hint::black_box(files), &config))
        });
    }

    group.finish();
}

fn bench_reconcile(c: &mut Criterion) {
    let config = EngineConfig::default();
    let mut group = c.benchmark_group("reconcile");

    for n in [10, 100, 500] {
        let files = make_files(n);
        let Ok(computed) = pivot(&files, &config) else {
            continue;
        };
        let changes = make_changes(&config, &files);
        group.bench_with_input(
            BenchmarkId::new("full_chain", n),
            &(computed, changes),
            |b, (computed, changes)| {
                b.iter(|| reconcile(computed.clone(), changes.clone(), &config))
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_pivot, bench_reconcile);
criterion_main!(benches);
