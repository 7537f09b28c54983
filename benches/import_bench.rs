//! Benchmark for model import
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use prost::Message;

use onnx_importer::prelude::*;
use onnx_importer::proto::extensions::{make_node, make_opset, make_tensor_value_info};
use onnx_importer::proto::tensor_proto::DataType;

/// A chain of `depth` Relu/Sigmoid pairs over a [1, 64] input
fn activation_chain(depth: usize) -> Vec<u8> {
    let mut nodes = Vec::with_capacity(depth * 2);
    let mut previous = "x".to_string();
    for i in 0..depth {
        let relu = format!("r{}", i);
        let sigmoid = format!("s{}", i);
        nodes.push(make_node("Relu", &[&previous], &[&relu], &format!("relu_{}", i)));
        nodes.push(make_node("Sigmoid", &[&relu], &[&sigmoid], &format!("sigmoid_{}", i)));
        previous = sigmoid;
    }

    ModelProto {
        ir_version: 8,
        opset_import: vec![make_opset(13)],
        graph: Some(GraphProto {
            name: "chain".to_string(),
            node: nodes,
            input: vec![make_tensor_value_info("x", DataType::Float as i32, &[1, 64])],
            output: vec![make_tensor_value_info(&previous, DataType::Float as i32, &[1, 64])],
            ..Default::default()
        }),
        ..Default::default()
    }
    .encode_to_vec()
}

fn import_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("import");
    for depth in [16, 256] {
        let bytes = activation_chain(depth);

        group.bench_with_input(BenchmarkId::new("parse", depth), &bytes, |b, bytes| {
            b.iter(|| {
                let mut network = Network::new();
                let mut importer = ModelImporter::new(&mut network);
                black_box(importer.parse(bytes, None))
            })
        });

        group.bench_with_input(BenchmarkId::new("supports_model", depth), &bytes, |b, bytes| {
            b.iter(|| {
                let mut network = Network::new();
                let mut importer = ModelImporter::new(&mut network);
                let mut partitions = SubGraphCollection::new();
                black_box(importer.supports_model(bytes, &mut partitions, None))
            })
        });
    }
    group.finish();
}

criterion_group!(benches, import_benchmark);
criterion_main!(benches);
