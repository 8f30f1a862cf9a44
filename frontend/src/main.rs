#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use std::{fs, path};

use layoutprop::attrs::{keys, Attributes};
use layoutprop::common::{DimSize, Dtype};
use layoutprop::graph::{OpKind, Subgraph, SubgraphBuilder};
use layoutprop::oracle::Engine;
use layoutprop::passes::{infer_type_with, layout_propagation_with, PassConfig};
use layoutprop::pprint::{pprint, SubgraphPrintStyle};
use layoutprop::target::{ArmTarget, CpuEngine, Target, TargetId, X86Avx512Target, X86Target};
use layoutprop::tensor::{LayoutType, LogicalTensor, TensorId};

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Target architecture
    #[arg(long, value_enum, default_value_t = TargetId::X86)]
    target: TargetId,

    /// Sweeps allowed before giving up
    #[arg(long, default_value_t = PassConfig::default().max_sweeps)]
    max_sweeps: usize,

    /// Check graph links and log the subgraph after every sweep
    #[arg(long, default_value_t = false)]
    diagnostics: bool,

    /// Subgraph print style
    #[arg(long, value_enum, default_value_t = SubgraphPrintStyle::Full)]
    style: SubgraphPrintStyle,

    /// Write the resolved boundary tensors to this file with bincode
    #[arg(long)]
    emit_boundary: Option<path::PathBuf>,

    #[command(subcommand)]
    subcmd: Demo,
}

#[derive(clap::Subcommand)]
enum Demo {
    #[command(about = "A convolution fed by a row-major input")]
    Conv {
        #[arg(long, default_value = "16")]
        channels: DimSize,
        #[arg(long, default_value = "16")]
        filters: DimSize,
        size: DimSize,
    },
    #[command(about = "An NHWC-to-NCHW permute feeding a convolution")]
    PermuteConv {
        #[arg(long, default_value = "16")]
        channels: DimSize,
        size: DimSize,
    },
    #[command(about = "An activation with an untyped output, cast to bf16")]
    Cast {
        #[arg(long, default_value = "8")]
        channels: DimSize,
        size: DimSize,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    match &args.target {
        TargetId::X86 => main_per_target::<X86Target>(&args),
        TargetId::X86Avx512 => main_per_target::<X86Avx512Target>(&args),
        TargetId::Arm => main_per_target::<ArmTarget>(&args),
    }
}

fn main_per_target<Tgt: Target>(args: &Args) -> Result<()> {
    let builder = demo_builder(&args.subcmd)?;
    let mut sg = builder.build(CpuEngine::<Tgt>::new())?;
    let config = PassConfig {
        max_sweeps: args.max_sweeps,
        diagnostics: args.diagnostics,
    };
    run_passes(&mut sg, &config)?;
    pprint(&sg, args.style);

    if let Some(path) = &args.emit_boundary {
        let boundary = (sg.inputs().to_vec(), sg.outputs().to_vec());
        let bytes = bincode::serialize(&boundary)?;
        fs::write(path, bytes).with_context(|| format!("writing {}", path.display()))?;
        info!("Wrote boundary tensors to {}", path.display());
    }
    Ok(())
}

fn run_passes<E: Engine>(sg: &mut Subgraph<E>, config: &PassConfig) -> Result<()> {
    let type_sweeps = infer_type_with(sg, config)?;
    info!("Type inference converged after {type_sweeps} sweeps");
    let stats = layout_propagation_with(sg, config)?;
    info!(
        "Layout propagation on {} converged after {} sweeps: {} reorders inserted, {} \
         descriptors created, {} outputs trimmed",
        sg.engine.name(),
        stats.sweeps,
        stats.reorders_inserted,
        stats.descriptors_created,
        stats.outputs_trimmed
    );
    Ok(())
}

fn demo_builder(demo: &Demo) -> Result<SubgraphBuilder> {
    let mut b = SubgraphBuilder::new();
    let f32_any = |id, shape: &[DimSize]| LogicalTensor::any(TensorId(id), Dtype::Float32, shape);
    match *demo {
        Demo::Conv {
            channels,
            filters,
            size,
        } => {
            let out = out_size(size)?;
            let src = [one(), channels, size, size];
            b.add_op(
                OpKind::Convolution,
                Attributes::new(),
                vec![
                    LogicalTensor::row_major(TensorId(0), Dtype::Float32, &src),
                    f32_any(1, &[filters, channels, dim(3)?, dim(3)?]),
                ],
                vec![f32_any(2, &[one(), filters, out, out])],
            );
        }
        Demo::PermuteConv { channels, size } => {
            b.add_op(
                OpKind::Permute,
                Attributes::new().with(keys::ORDER, vec![0i64, 3, 1, 2]),
                vec![f32_any(0, &[one(), size, size, channels])],
                vec![f32_any(1, &[one(), channels, size, size])],
            );
            b.add_op(
                OpKind::Convolution,
                Attributes::new(),
                vec![
                    f32_any(1, &[one(), channels, size, size]),
                    f32_any(2, &[channels, channels, one(), one()]),
                ],
                vec![f32_any(3, &[one(), channels, size, size])],
            );
        }
        Demo::Cast { channels, size } => {
            let shape = [one(), channels, size, size];
            let dims = shape.iter().copied().map(Some).collect();
            b.add_op(
                OpKind::Eltwise,
                Attributes::new().with(keys::ALG_KIND, "relu"),
                vec![LogicalTensor::row_major(TensorId(0), Dtype::Float32, &shape)],
                vec![LogicalTensor::new(TensorId(1), None, Some(dims), LayoutType::Any)],
            );
            b.add_op(
                OpKind::TypeCast,
                Attributes::new(),
                vec![LogicalTensor::undefined(TensorId(1))],
                vec![LogicalTensor::row_major(TensorId(2), Dtype::Bfloat16, &shape)],
            );
        }
    }
    Ok(b)
}

fn one() -> DimSize {
    DimSize::MIN
}

fn dim(d: u32) -> Result<DimSize> {
    DimSize::new(d).context("dimension must be non-zero")
}

/// Spatial extent after an unpadded 3x3 window.
fn out_size(size: DimSize) -> Result<DimSize> {
    size.get()
        .checked_sub(2)
        .and_then(DimSize::new)
        .context("spatial size must be at least 3")
}
