//! Kernel Benchmarks
//!
//! Benchmarks for the CPU kernels and the KV compression path:
//! - Matrix multiplication (single and batched)
//! - Softmax and RMSNorm over hidden-state rows
//! - Int8 / Int4 quantization and dequantization
//! - Full IR graph execution through the scheduler

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use inductionvm::kernels::{matmul, rms_normalize, softmax};
use inductionvm::quantize::quantize;
use inductionvm::{Graph, KvCacheConfig, QuantizationMode, Scheduler, Tensor, TensorEnv};
use rand::Rng;

// Helper function to generate random tensor data
fn random_tensor(shape: &[usize]) -> Tensor {
    let mut rng = rand::thread_rng();
    let n: usize = shape.iter().product();
    let data = (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect();
    Tensor::from_f32(shape.to_vec(), data).unwrap()
}

fn bench_matmul(c: &mut Criterion) {
    let mut group = c.benchmark_group("matmul");
    group.sample_size(30);

    for size in [64, 128, 256] {
        let a = random_tensor(&[size, size]);
        let b = random_tensor(&[size, size]);
        group.throughput(Throughput::Elements((2 * size * size * size) as u64));
        group.bench_with_input(BenchmarkId::new("square", size), &(a, b), |bench, (a, b)| {
            bench.iter(|| matmul(black_box(a), black_box(b)).unwrap())
        });
    }

    for seq_len in [1, 16, 64] {
        let x = random_tensor(&[4, seq_len, 256]);
        let w = random_tensor(&[256, 256]);
        group.throughput(Throughput::Elements((2 * 4 * seq_len * 256 * 256) as u64));
        group.bench_with_input(
            BenchmarkId::new("batched_projection", seq_len),
            &(x, w),
            |bench, (x, w)| bench.iter(|| matmul(black_box(x), black_box(w)).unwrap()),
        );
    }

    group.finish();
}

fn bench_softmax(c: &mut Criterion) {
    let mut group = c.benchmark_group("softmax");
    group.sample_size(100);

    for dim in [128, 1024, 32000] {
        let x = random_tensor(&[8, dim]);
        group.throughput(Throughput::Elements((8 * dim) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(dim), &x, |b, x| {
            b.iter(|| softmax(black_box(x), -1).unwrap())
        });
    }

    group.finish();
}

fn bench_rms_norm(c: &mut Criterion) {
    let mut group = c.benchmark_group("rms_norm");
    group.sample_size(100);

    for dim in [768, 2048, 4096] {
        let x = random_tensor(&[16, dim]);
        let w = random_tensor(&[dim]);
        group.throughput(Throughput::Elements((16 * dim) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(dim), &(x, w), |b, (x, w)| {
            b.iter(|| rms_normalize(black_box(x), black_box(w), 1e-6).unwrap())
        });
    }

    group.finish();
}

fn bench_quantization(c: &mut Criterion) {
    let mut group = c.benchmark_group("kv_quantize");
    group.sample_size(50);

    for mode in [QuantizationMode::Int8, QuantizationMode::Int4] {
        for positions in [128, 1024] {
            let x = random_tensor(&[1, positions, 512]);
            group.throughput(Throughput::Elements((positions * 512) as u64));

            group.bench_with_input(
                BenchmarkId::new(format!("{}_compress", mode), positions),
                &x,
                |b, x| b.iter(|| quantize(black_box(x), mode).unwrap()),
            );

            let q = quantize(&x, mode).unwrap();
            group.bench_with_input(
                BenchmarkId::new(format!("{}_decompress", mode), positions),
                &q,
                |b, q| b.iter(|| black_box(q).dequantize().unwrap()),
            );
        }
    }

    group.finish();
}

fn bench_graph_execution(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph_execute");
    group.sample_size(30);

    let hidden = 256;
    let mut graph = Graph::new();
    graph.rmsnorm("x", "norm_w", "h", 1e-6).unwrap();
    graph.matmul("h", "wq", "q").unwrap();
    graph.matmul("h", "wk", "k").unwrap();
    graph.rope("q", "k", "q_rot", "k_rot", 0).unwrap();
    graph.mul("q_rot", "k_rot", "scores").unwrap();
    graph.softmax("scores", "probs", -1).unwrap();

    for seq_len in [1, 16, 64] {
        let inputs: TensorEnv = [
            ("x", random_tensor(&[1, seq_len, hidden])),
            ("norm_w", random_tensor(&[hidden])),
            ("wq", random_tensor(&[hidden, hidden])),
            ("wk", random_tensor(&[hidden, hidden])),
        ]
        .into_iter()
        .collect();
        let mut scheduler = Scheduler::new(KvCacheConfig {
            num_layers: 1,
            max_seq_len: 128,
            hidden_dim: hidden,
        })
        .unwrap();

        group.throughput(Throughput::Elements((seq_len * hidden) as u64));
        group.bench_function(BenchmarkId::new("attention_block", seq_len), |b| {
            b.iter(|| {
                scheduler
                    .execute(black_box(&graph), inputs.clone())
                    .unwrap()
            })
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_matmul,
    bench_softmax,
    bench_rms_norm,
    bench_quantization,
    bench_graph_execution,
);

criterion_main!(benches);
