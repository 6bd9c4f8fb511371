use anyhow::Result;
use clap::Parser;
use log::{info, warn};

use std::sync::Arc;

use lazytensor::common::{DimSize, Dtype};
use lazytensor::context::{LazyConfig, LazyContext};
use lazytensor::device::Device;
use lazytensor::pprint::pprint;
use lazytensor::program::lower;
use lazytensor::shape::Shape;
use lazytensor::tensor::{EagerTensor, LazyTensor};
use lazytensor::tensor_ops::{cross, make_matrix_with_diagonal, select};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Build graphs in dynamic shape mode
    #[arg(long)]
    dynamic: bool,

    /// Device for input tensors (e.g. `cpu`, `cuda:1`)
    #[arg(long)]
    device: Option<Device>,

    /// Element type of input tensors
    #[arg(long, default_value_t = Dtype::Float32)]
    dtype: Dtype,

    #[command(subcommand)]
    op: Composite,
}

#[derive(clap::Subcommand)]
enum Composite {
    #[command(about = "Build a cross product of two tensors of the given shape")]
    Cross {
        #[arg(required = true)]
        shape: Vec<DimSize>,
        #[arg(long, allow_negative_numbers = true)]
        dim: Option<i64>,
    },
    #[command(about = "Embed a vector of the given size on a diagonal")]
    Diag {
        size: DimSize,
        #[arg(long, short, default_value = "0", allow_negative_numbers = true)]
        diagonal: i64,
    },
    #[command(about = "Select one index along an axis")]
    Select {
        #[arg(required = true)]
        shape: Vec<DimSize>,
        #[arg(long, allow_negative_numbers = true)]
        dim: i64,
        #[arg(long, allow_negative_numbers = true)]
        index: i64,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut config = LazyConfig::from_env();
    config.dynamic_shapes |= args.dynamic;
    if let Some(device) = args.device {
        config.default_device = device;
    }
    let ctx = LazyContext::new(config);

    let input = |dims: Vec<DimSize>| -> Result<LazyTensor> {
        let eager = EagerTensor::zeros(Shape::new(args.dtype, dims), ctx.default_device())?;
        Ok(LazyTensor::from_eager(&ctx, &eager))
    };
    let built = match &args.op {
        Composite::Cross { shape, dim } => {
            let lhs = input(shape.clone())?;
            let rhs = input(shape.clone())?;
            cross(&lhs, &rhs, *dim)
        }
        Composite::Diag { size, diagonal } => {
            make_matrix_with_diagonal(&input(vec![*size])?, *diagonal)
        }
        Composite::Select { shape, dim, index } => select(&input(shape.clone())?, *dim, *index),
    };
    let output = match built {
        Ok(output) => output,
        Err(e) if e.is_shape_unknown() => {
            warn!("Cannot build the graph without concrete shapes: {e}");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    info!("Built {} nodes", ctx.nodes_created());
    pprint(&[Arc::clone(output.node())]);
    println!();
    let program = lower(&[output])?;
    println!("{}", program.program_shape());
    Ok(())
}
