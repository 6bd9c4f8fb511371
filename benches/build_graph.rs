use iai_callgrind::{black_box, main};

use std::sync::Arc;

use lazytensor::common::{DimSize, Dtype};
use lazytensor::context::{LazyConfig, LazyContext};
use lazytensor::device::Device;
use lazytensor::program::lower;
use lazytensor::shape::Shape;
use lazytensor::tensor::{EagerTensor, LazyTensor};
use lazytensor::tensor_ops::{cross, make_matrix_with_diagonal, select};

#[export_name = "lazytensor_bench_build_graph::leaf"]
fn leaf(ctx: &Arc<LazyContext>, dims: Vec<DimSize>) -> LazyTensor {
    let eager = EagerTensor::zeros(Shape::new(Dtype::Float32, dims), Device::cpu()).unwrap();
    LazyTensor::from_eager(ctx, &eager)
}

#[inline(never)]
fn build_cross() {
    let ctx = LazyContext::new(LazyConfig::default());
    let a = leaf(&ctx, vec![16, 3]);
    let b = leaf(&ctx, vec![16, 3]);
    for _ in 0..100 {
        black_box(cross(&a, &b, None).unwrap());
    }
}

#[inline(never)]
fn build_diagonal() {
    let ctx = LazyContext::new(LazyConfig::default());
    let v = leaf(&ctx, vec![32]);
    for d in -50..50 {
        black_box(make_matrix_with_diagonal(&v, d).unwrap());
    }
}

#[inline(never)]
fn build_and_lower_selects() {
    let ctx = LazyContext::new(LazyConfig::default());
    let t = leaf(&ctx, vec![8, 64, 8]);
    let selects = (0..64)
        .map(|i| select(&t, 1, i).unwrap())
        .collect::<Vec<_>>();
    black_box(lower(&selects).unwrap());
}

main!(
    callgrind_args = "toggle-collect=lazytensor_bench_build_graph::leaf",
        "--simulate-wb=no", "--simulate-hwpref=yes",
        "--I1=32768,8,64", "--D1=32768,8,64", "--LL=8388608,16,64";
    functions = build_cross, build_diagonal, build_and_lower_selects
);
