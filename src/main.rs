use ncsp_conv::{
    conv::{conv_desc::ConvolutionDesc, ncsp_convolution::NcspConvolutionDesc},
    engine::{cpu_engine::CpuEngine, engine::Engine, error::ConvError},
    primitive::{
        attributes::PrimitiveAttr,
        exec_ctx::{ArgKind, ExecArgs, ExecContext},
        primitive::PrimitiveDesc,
    },
    tensor::{layout::Layout, tensor_desc::TensorDesc, tensor_init::TensorInit},
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true);
    Registry::default().with(filter).with(fmt_layer).init();
}

fn run(engine: &CpuEngine, kernel: usize) -> Result<(), ConvError> {
    let pad = kernel / 2;
    let conv = ConvolutionDesc::new(
        TensorDesc::new_f32(vec![2, 8, 4, 4], Layout::ChannelFirst),
        TensorDesc::any(vec![16, 8, kernel, kernel]),
        None,
        TensorDesc::new_f32(vec![2, 16, 4, 4], Layout::ChannelFirst),
        vec![1, 1],
        vec![pad, pad],
        vec![pad, pad],
    )?;
    let attr = PrimitiveAttr::new();

    let pd = engine.convolution_desc(&conv, &attr)?;
    info!(implementation = %pd.name(), config = %conv.config_string(), "planned");
    print!("{}", pd.scratch_registry());

    let weights_desc = pd.weights_desc().cloned().unwrap_or_else(|| conv.weights_desc().clone());
    let src = TensorInit::UniformRandom {
        min: -1.0,
        max: 1.0,
        seed: 7,
    }
    .init(pd.src_desc())?;
    let weights = TensorInit::Normal {
        mean: 0.0,
        std_dev: 0.5,
        seed: 11,
    }
    .init(&weights_desc)?;
    let mut dst = vec![0.0; pd.dst_desc().num_elements()];

    let primitive = pd.create_primitive(engine)?;
    let mut scratchpad = engine.scratchpad(pd.scratch_registry())?;
    let mut ctx = ExecContext::new(
        ExecArgs::new()
            .with_input(ArgKind::Src, &src)
            .with_input(ArgKind::Weights, &weights)
            .with_output(ArgKind::Dst, &mut dst),
        scratchpad.grantor(),
    );
    primitive.execute(&mut ctx)?;
    drop(ctx);

    let checksum: f32 = dst.iter().sum();
    info!(
        scratch_bytes = scratchpad.size_in_bytes(),
        checksum,
        "executed {}",
        primitive.name()
    );

    // Same request without the engine's enumeration, to show which path the adapter takes
    let adapter = NcspConvolutionDesc::new(&conv, &attr, engine)?;
    info!(strategy = %adapter.strategy(), name = %adapter.name(), "channel-first adapter");

    Ok(())
}

fn main() -> Result<(), ConvError> {
    init_tracing();

    let engine = CpuEngine::new()?;
    info!(engine = %engine.name(), "starting");

    // Pointwise kernel runs as one matmul, 3x3 goes through channel-last
    run(&engine, 1)?;
    run(&engine, 3)?;

    info!(peak_scratch_bytes = engine.scratch_peak()?, "done");

    Ok(())
}
