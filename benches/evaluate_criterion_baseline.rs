
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use evaluate_common::{build_scenario, wide_matrix_specs_baseline};
use std::hint::black_box;
use treetop_slice::{Decision, is_authorized};

fn score(decision: Decision) -> usize {
    if decision.allowed {
        decision.determining_policies.len()
    } else {
        0
    }
}

fn benchmark_evaluate_baseline(c: &mut Criterion) {
    let mut group = c.benchmark_group("evaluate_baseline");
    group.sample_size(40);

    let scenarios: Vec<_> = wide_matrix_specs_baseline()
        .into_iter()
        .map(build_scenario)
        .collect();

    for scenario in &scenarios {
        group.bench_with_input(BenchmarkId::from_parameter(scenario.name), scenario, |b, s| {
            b.iter(|| {
                let decision = s.engine.evaluate(black_box(&s.request));
                black_box(score(decision));
            });
        });
    }

    group.finish();
}

fn benchmark_is_authorized(c: &mut Criterion) {
    let mut group = c.benchmark_group("is_authorized");
    group.sample_size(40);

    let scenarios: Vec<_> = wide_matrix_specs_baseline()
        .into_iter()
        .map(build_scenario)
        .collect();

    for scenario in &scenarios {
        group.bench_with_input(BenchmarkId::from_parameter(scenario.name), scenario, |b, s| {
            b.iter(|| black_box(score(is_authorized(&s.slice, black_box(&s.request)))));
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_evaluate_baseline, benchmark_is_authorized);
criterion_main!(benches);
