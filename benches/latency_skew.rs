use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use ordered_pipeline::{run_with_order, BasicNode, Message, StreamContext};
use std::sync::Arc;
use std::time::Duration;

const MESSAGES: u64 = 200;

/// CPU-bound transform whose cost varies per item, so workers finish out of order
fn skewed_work(_: &StreamContext, v: u64) -> Vec<Message<u64>> {
    let rounds = 2_000 + (v * 7919) % 20_000;
    let mut acc = v;
    for i in 0..rounds {
        acc = acc.wrapping_mul(6364136223846793005).wrapping_add(i);
    }
    vec![Message::Data(acc)]
}

fn run_skewed(workers: usize) {
    let ctx = StreamContext::new("skew");
    let node: Arc<BasicNode<u64, u64>> = Arc::new(BasicNode::new("skew", MESSAGES as usize));
    let output = node.subscribe();

    let running = run_with_order(&ctx, Arc::clone(&node), workers, skewed_work)
        .expect("Start failed");
    for v in 0..MESSAGES {
        node.push(Message::Data(v)).expect("Push failed");
    }
    for _ in 0..MESSAGES {
        output
            .recv_timeout(Duration::from_secs(10))
            .expect("Output timed out");
    }
    running.shutdown().expect("Shutdown failed");
}

fn benchmark_skewed_transform(c: &mut Criterion) {
    let mut group = c.benchmark_group("skewed_transform_200_msgs");
    group.sample_size(20);
    for workers in [1, 2, 4, 8] {
        group.bench_with_input(BenchmarkId::from_parameter(workers), &workers, |b, &workers| {
            b.iter(|| run_skewed(workers));
        });
    }
    group.finish();
}

criterion_group!(benches, benchmark_skewed_transform);
criterion_main!(benches);
