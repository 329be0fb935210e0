use std::sync::{Arc, Mutex};

use ncsp_conv::{
    compute::{scratch_registry::ScratchRegistry, scratchpad::Scratchpad},
    conv::{
        conv_desc::{AlgKind, ConvolutionDesc, PropKind},
        ncsp_convolution::NcspConvolutionDesc,
        strategy::Strategy,
    },
    cpu::reference_convolution::ReferenceConvolutionDesc,
    engine::{
        config::EngineConfig,
        cpu_engine::CpuEngine,
        engine::{enumerate_convolution_impls, ConvolutionImpl, Engine},
        error::{ConvError, Result, Status},
    },
    primitive::{
        attributes::{EltwiseKind, PrimitiveAttr},
        exec_ctx::{ArgKind, ExecArgs, ExecContext},
        primitive::{Primitive, PrimitiveDesc},
    },
    tensor::{layout::Layout, tensor_desc::TensorDesc, tensor_init::TensorInit},
};
use rayon::prelude::*;

fn nc(dims: Vec<usize>) -> TensorDesc {
    TensorDesc::new_f32(dims, Layout::ChannelFirst)
}

fn fill(desc: &TensorDesc, seed: u64) -> Vec<f32> {
    TensorInit::UniformRandom {
        min: -1.0,
        max: 1.0,
        seed,
    }
    .init(desc)
    .unwrap()
}

#[allow(clippy::too_many_arguments)]
fn conv_nd(
    src: Vec<usize>,
    weights: Vec<usize>,
    dst: Vec<usize>,
    with_bias: bool,
    strides: Vec<usize>,
    dilations: Vec<usize>,
    pad: Vec<usize>,
) -> ConvolutionDesc {
    let oc = dst[1];
    ConvolutionDesc::new_with(
        PropKind::ForwardInference,
        AlgKind::Direct,
        nc(src),
        nc(weights),
        with_bias.then(|| nc(vec![oc])),
        nc(dst),
        strides,
        dilations,
        pad.clone(),
        pad,
    )
    .unwrap()
}

// n=2, c=8, 4x4 -> 16 channels, padding keeps the spatial extent
fn scenario(kernel: usize) -> ConvolutionDesc {
    let pad = kernel / 2;
    conv_nd(
        vec![2, 8, 4, 4],
        vec![16, 8, kernel, kernel],
        vec![2, 16, 4, 4],
        false,
        vec![1, 1],
        vec![1, 1],
        vec![pad, pad],
    )
}

struct Buffers {
    src: Vec<f32>,
    weights: Vec<f32>,
    bias: Option<Vec<f32>>,
    dst: Vec<f32>,
}

impl Buffers {
    fn new(conv: &ConvolutionDesc, seed: u64) -> Self {
        Self {
            src: fill(conv.src_desc(), seed),
            weights: fill(conv.weights_desc(), seed + 1),
            bias: conv.bias_desc().map(|desc| fill(desc, seed + 2)),
            dst: fill(conv.dst_desc(), seed + 3),
        }
    }
}

fn execute(
    engine: &dyn Engine,
    pd: &dyn PrimitiveDesc,
    src: &[f32],
    weights: &[f32],
    bias: Option<&[f32]>,
    dst: &mut [f32],
) -> Result<()> {
    let primitive = pd.create_primitive(engine)?;
    run_primitive(engine, pd.scratch_registry(), primitive.as_ref(), src, weights, bias, dst)
}

fn run_primitive(
    engine: &dyn Engine,
    registry: &ScratchRegistry,
    primitive: &dyn Primitive,
    src: &[f32],
    weights: &[f32],
    bias: Option<&[f32]>,
    dst: &mut [f32],
) -> Result<()> {
    let mut scratchpad = engine.scratchpad(registry)?;
    let mut args = ExecArgs::new()
        .with_input(ArgKind::Src, src)
        .with_input(ArgKind::Weights, weights)
        .with_output(ArgKind::Dst, dst);
    if let Some(bias) = bias {
        args = args.with_input(ArgKind::Bias, bias);
    }
    primitive.execute(&mut ExecContext::new(args, scratchpad.grantor()))?;
    Ok(())
}

fn reference(
    engine: &CpuEngine,
    conv: &ConvolutionDesc,
    attr: &PrimitiveAttr,
    buffers: &Buffers,
) -> Vec<f32> {
    let pd = ReferenceConvolutionDesc::new(conv, attr).unwrap();
    let mut dst = buffers.dst.clone();
    execute(
        engine,
        &pd,
        &buffers.src,
        &buffers.weights,
        buffers.bias.as_deref(),
        &mut dst,
    )
    .unwrap();
    dst
}

// Runs the adapter and the reference on the same buffers, returns the adapter's strategy
fn assert_matches_reference(conv: &ConvolutionDesc, attr: &PrimitiveAttr, seed: u64) -> Strategy {
    let engine = CpuEngine::new().unwrap();
    let buffers = Buffers::new(conv, seed);
    let expected = reference(&engine, conv, attr, &buffers);

    let pd = NcspConvolutionDesc::new(conv, attr, &engine).unwrap();
    let mut dst = buffers.dst.clone();
    execute(
        &engine,
        &pd,
        &buffers.src,
        &buffers.weights,
        buffers.bias.as_deref(),
        &mut dst,
    )
    .unwrap();

    assert_eq!(dst, expected, "{}", conv.config_string());
    pd.strategy()
}

#[test]
fn pointwise_scenario_is_one_matmul() {
    let engine = CpuEngine::new().unwrap();
    let conv = scenario(1);
    let attr = PrimitiveAttr::new();
    let buffers = Buffers::new(&conv, 1);

    let pd = NcspConvolutionDesc::new(&conv, &attr, &engine).unwrap();
    assert_eq!(pd.strategy(), Strategy::Matmul);
    assert_eq!(pd.dst_desc().dims(), &[2, 16, 4, 4]);

    let mut dst = vec![0.0; 2 * 16 * 16];
    execute(&engine, &pd, &buffers.src, &buffers.weights, None, &mut dst).unwrap();

    // weights[16, 8] × src[b][8, 16]
    let mut manual = vec![0.0f32; 2 * 16 * 16];
    for b in 0..2 {
        for o in 0..16 {
            for p in 0..16 {
                let mut acc = 0.0f32;
                for i in 0..8 {
                    acc += buffers.weights[o * 8 + i] * buffers.src[b * 128 + i * 16 + p];
                }
                manual[b * 256 + o * 16 + p] = acc;
            }
        }
    }
    assert_eq!(dst, manual);

    let mut zeroed = Buffers::new(&conv, 1);
    zeroed.dst.fill(0.0);
    assert_eq!(dst, reference(&engine, &conv, &attr, &zeroed));
}

#[test]
fn spatial_kernel_scenario_goes_through_channel_last() {
    let engine = CpuEngine::new().unwrap();
    let conv = scenario(3);
    let pd = NcspConvolutionDesc::new(&conv, &PrimitiveAttr::new(), &engine).unwrap();

    assert_eq!(pd.strategy(), Strategy::Reorder);
    let entries = pd.scratch_registry().entries();
    let top_level: Vec<_> = entries
        .iter()
        .filter(|entry| entry.key.owners().is_empty())
        .map(|entry| (entry.key.name(), entry.nelems))
        .collect();
    assert_eq!(
        top_level,
        vec![("conv_ncsp_src", 2 * 4 * 4 * 8), ("conv_ncsp_dst", 2 * 4 * 4 * 16)]
    );

    assert_eq!(assert_matches_reference(&conv, &PrimitiveAttr::new(), 2), Strategy::Reorder);
}

#[test]
fn every_disqualifier_still_matches_reference() {
    let attr = PrimitiveAttr::new();
    let cases = [
        // padded pointwise
        conv_nd(vec![2, 8, 4, 4], vec![16, 8, 1, 1], vec![2, 16, 6, 6], false, vec![1, 1], vec![1, 1], vec![1, 1]),
        // strided pointwise
        conv_nd(vec![2, 8, 4, 4], vec![16, 8, 1, 1], vec![2, 16, 2, 2], false, vec![2, 2], vec![1, 1], vec![0, 0]),
        // pointwise with bias
        conv_nd(vec![2, 8, 4, 4], vec![16, 8, 1, 1], vec![2, 16, 4, 4], true, vec![1, 1], vec![1, 1], vec![0, 0]),
        // dilated, strided 3x3
        conv_nd(vec![1, 3, 9, 7], vec![5, 3, 3, 3], vec![1, 5, 4, 3], true, vec![2, 2], vec![2, 2], vec![1, 1]),
    ];

    for (seed, conv) in cases.iter().enumerate() {
        assert_eq!(assert_matches_reference(conv, &attr, seed as u64 * 10), Strategy::Reorder);
    }

    let relu = PrimitiveAttr::new().with_eltwise(EltwiseKind::ReLU);
    assert_eq!(assert_matches_reference(&scenario(1), &relu, 50), Strategy::Reorder);
}

#[test]
fn grouped_convolutions_take_both_paths() {
    let attr = PrimitiveAttr::new();

    let pointwise = conv_nd(
        vec![2, 8, 4, 4],
        vec![2, 8, 4, 1, 1],
        vec![2, 16, 4, 4],
        false,
        vec![1, 1],
        vec![1, 1],
        vec![0, 0],
    );
    assert_eq!(assert_matches_reference(&pointwise, &attr, 3), Strategy::Matmul);

    let spatial = conv_nd(
        vec![2, 8, 4, 4],
        vec![4, 4, 2, 3, 3],
        vec![2, 16, 4, 4],
        true,
        vec![1, 1],
        vec![1, 1],
        vec![1, 1],
    );
    assert_eq!(assert_matches_reference(&spatial, &attr, 4), Strategy::Reorder);
}

#[test]
fn one_and_three_spatial_dims() {
    let attr = PrimitiveAttr::new();

    let conv_1d = conv_nd(vec![2, 3, 9], vec![4, 3, 3], vec![2, 4, 4], true, vec![2], vec![2], vec![1]);
    assert_eq!(assert_matches_reference(&conv_1d, &attr, 5), Strategy::Reorder);

    let pointwise_1d = conv_nd(vec![2, 3, 9], vec![4, 3, 1], vec![2, 4, 9], false, vec![1], vec![1], vec![0]);
    assert_eq!(assert_matches_reference(&pointwise_1d, &attr, 6), Strategy::Matmul);

    let conv_3d = conv_nd(
        vec![1, 4, 3, 4, 5],
        vec![6, 4, 3, 3, 3],
        vec![1, 6, 3, 4, 5],
        false,
        vec![1, 1, 1],
        vec![1, 1, 1],
        vec![1, 1, 1],
    );
    assert_eq!(assert_matches_reference(&conv_3d, &attr, 7), Strategy::Reorder);

    let pointwise_3d = conv_nd(
        vec![1, 4, 3, 4, 5],
        vec![6, 4, 1, 1, 1],
        vec![1, 6, 3, 4, 5],
        false,
        vec![1, 1, 1],
        vec![1, 1, 1],
        vec![0, 0, 0],
    );
    assert_eq!(assert_matches_reference(&pointwise_3d, &attr, 8), Strategy::Matmul);
}

#[test]
fn sum_and_eltwise_post_ops_read_the_previous_destination() {
    let conv = conv_nd(
        vec![2, 8, 4, 4],
        vec![16, 8, 3, 3],
        vec![2, 16, 4, 4],
        true,
        vec![1, 1],
        vec![1, 1],
        vec![1, 1],
    );
    let attr = PrimitiveAttr::new()
        .with_sum(0.5)
        .with_eltwise(EltwiseKind::LeakyReLU(0.1));
    assert_eq!(assert_matches_reference(&conv, &attr, 9), Strategy::Reorder);
}

#[test]
fn planning_twice_gives_identical_scratch() {
    let engine = CpuEngine::new().unwrap();
    for kernel in [1, 3] {
        let conv = scenario(kernel);
        let attr = PrimitiveAttr::new().with_sum(1.0);
        let first = NcspConvolutionDesc::new(&conv, &attr, &engine).unwrap();
        let second = NcspConvolutionDesc::new(&conv, &attr, &engine).unwrap();

        assert_eq!(first.scratch_registry(), second.scratch_registry());
        assert_eq!(first.scratch_registry().layout(), second.scratch_registry().layout());
    }
}

#[derive(Clone, Debug)]
struct Executed {
    name: String,
    dst_before: Option<Vec<f32>>,
}

/// Wraps the cpu engine and logs every nested primitive execution, with a snapshot of
/// its destination taken just before it runs.
struct RecordingEngine {
    inner: CpuEngine,
    log: Arc<Mutex<Vec<Executed>>>,
}

impl RecordingEngine {
    fn new() -> Self {
        Self {
            inner: CpuEngine::new().unwrap(),
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn wrap(&self, pd: Result<Box<dyn PrimitiveDesc>>) -> Result<Box<dyn PrimitiveDesc>> {
        Ok(Box::new(RecordingDesc {
            inner: pd?,
            log: self.log.clone(),
        }))
    }

    fn executed(&self) -> Vec<Executed> {
        self.log.lock().unwrap().clone()
    }
}

impl Engine for RecordingEngine {
    fn name(&self) -> String {
        format!("recording({})", self.inner.name())
    }

    fn config(&self) -> &EngineConfig {
        self.inner.config()
    }

    fn thread_pool(&self) -> Arc<rayon::ThreadPool> {
        self.inner.thread_pool()
    }

    fn convolution_impls(&self) -> &[ConvolutionImpl] {
        self.inner.convolution_impls()
    }

    fn convolution_desc(
        &self,
        desc: &ConvolutionDesc,
        attr: &PrimitiveAttr,
    ) -> Result<Box<dyn PrimitiveDesc>> {
        self.wrap(enumerate_convolution_impls(self, desc, attr))
    }

    fn matmul_desc(
        &self,
        src: &TensorDesc,
        weights: &TensorDesc,
        bias: Option<&TensorDesc>,
        dst: &TensorDesc,
        attr: &PrimitiveAttr,
    ) -> Result<Box<dyn PrimitiveDesc>> {
        self.wrap(self.inner.matmul_desc(src, weights, bias, dst, attr))
    }

    fn reorder_desc(&self, src: &TensorDesc, dst: &TensorDesc) -> Result<Box<dyn PrimitiveDesc>> {
        self.wrap(self.inner.reorder_desc(src, dst))
    }

    fn scratchpad(&self, registry: &ScratchRegistry) -> Result<Scratchpad> {
        self.inner.scratchpad(registry)
    }
}

struct RecordingDesc {
    inner: Box<dyn PrimitiveDesc>,
    log: Arc<Mutex<Vec<Executed>>>,
}

impl PrimitiveDesc for RecordingDesc {
    fn name(&self) -> String {
        self.inner.name()
    }

    fn src_desc(&self) -> &TensorDesc {
        self.inner.src_desc()
    }

    fn weights_desc(&self) -> Option<&TensorDesc> {
        self.inner.weights_desc()
    }

    fn bias_desc(&self) -> Option<&TensorDesc> {
        self.inner.bias_desc()
    }

    fn dst_desc(&self) -> &TensorDesc {
        self.inner.dst_desc()
    }

    fn scratch_registry(&self) -> &ScratchRegistry {
        self.inner.scratch_registry()
    }

    fn create_primitive(&self, engine: &dyn Engine) -> Result<Arc<dyn Primitive>> {
        Ok(Arc::new(RecordingPrimitive {
            inner: self.inner.create_primitive(engine)?,
            log: self.log.clone(),
        }))
    }
}

struct RecordingPrimitive {
    inner: Arc<dyn Primitive>,
    log: Arc<Mutex<Vec<Executed>>>,
}

impl Primitive for RecordingPrimitive {
    fn name(&self) -> String {
        self.inner.name()
    }

    fn execute(&self, ctx: &mut ExecContext<'_>) -> Result<()> {
        let dst_before = ctx.peek_output(ArgKind::Dst).map(|dst| dst.to_vec());
        self.log.lock().unwrap().push(Executed {
            name: self.inner.name(),
            dst_before,
        });
        self.inner.execute(ctx)
    }
}

fn nchw_to_nhwc(data: &[f32], n: usize, c: usize, hw: usize) -> Vec<f32> {
    let mut out = vec![0.0; data.len()];
    for b in 0..n {
        for ch in 0..c {
            for p in 0..hw {
                out[(b * hw + p) * c + ch] = data[(b * c + ch) * hw + p];
            }
        }
    }
    out
}

#[test]
fn conversion_path_runs_nested_primitives_in_order() {
    let engine = RecordingEngine::new();
    let conv = scenario(3);
    let attr = PrimitiveAttr::new().with_sum(1.0);
    let buffers = Buffers::new(&conv, 11);

    let pd = engine.convolution_desc(&conv, &attr).unwrap();
    assert_eq!(pd.name(), "ncsp_convolution:reorder");

    let mut dst = buffers.dst.clone();
    execute(&engine, pd.as_ref(), &buffers.src, &buffers.weights, None, &mut dst).unwrap();

    let executed = engine.executed();
    let names: Vec<&str> = executed.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "ncsp_convolution:reorder",
            "reorder:f32:nchw:2×8×4×4->f32:nhwc:2×8×4×4",
            "reorder:f32:nchw:2×16×4×4->f32:nhwc:2×16×4×4",
            "ref:convolution:nhwc",
            "reorder:f32:nhwc:2×16×4×4->f32:nchw:2×16×4×4",
        ]
    );

    // The convolution sees the previous destination already in channel-last order
    let expected_nspc = nchw_to_nhwc(&buffers.dst, 2, 16, 16);
    assert_eq!(executed[3].dst_before.as_deref(), Some(&expected_nspc[..]));

    // The user destination is untouched until the final reorder
    assert_eq!(executed[4].dst_before.as_deref(), Some(&buffers.dst[..]));

    let expected = reference(&engine.inner, &conv, &attr, &buffers);
    assert_eq!(dst, expected);
}

#[test]
fn matmul_path_runs_one_nested_matmul() {
    let engine = RecordingEngine::new();
    let conv = scenario(1);
    let buffers = Buffers::new(&conv, 12);

    let pd = engine.convolution_desc(&conv, &PrimitiveAttr::new()).unwrap();
    let mut dst = vec![0.0; conv.dst_desc().num_elements()];
    execute(&engine, pd.as_ref(), &buffers.src, &buffers.weights, None, &mut dst).unwrap();

    let names: Vec<String> = engine.executed().into_iter().map(|e| e.name).collect();
    assert_eq!(names, vec!["ncsp_convolution:matmul", "ref:matmul"]);
}

#[test]
fn concurrent_executions_share_one_primitive() {
    let engine = CpuEngine::new().unwrap();
    let conv = scenario(3);
    let attr = PrimitiveAttr::new();
    let pd = NcspConvolutionDesc::new(&conv, &attr, &engine).unwrap();
    let primitive = pd.create_primitive(&engine).unwrap();

    let results: Vec<bool> = (0..8u64)
        .into_par_iter()
        .map(|seed| {
            let buffers = Buffers::new(&conv, 100 + seed * 4);
            let mut dst = buffers.dst.clone();
            run_primitive(
                &engine,
                pd.scratch_registry(),
                primitive.as_ref(),
                &buffers.src,
                &buffers.weights,
                None,
                &mut dst,
            )
            .unwrap();
            dst == reference(&engine, &conv, &attr, &buffers)
        })
        .collect();

    assert!(results.iter().all(|&same| same));
    assert_eq!(engine.scratch_in_use().unwrap(), 0);
}

#[test]
fn scratch_over_budget_is_out_of_memory() {
    let engine = CpuEngine::new_with(EngineConfig {
        scratch_limit_bytes: Some(1024),
        ..EngineConfig::default()
    })
    .unwrap();
    let conv = scenario(3);
    let pd = NcspConvolutionDesc::new(&conv, &PrimitiveAttr::new(), &engine).unwrap();
    let buffers = Buffers::new(&conv, 13);

    let mut dst = buffers.dst.clone();
    let result = execute(&engine, &pd, &buffers.src, &buffers.weights, None, &mut dst);

    assert!(matches!(result, Err(ConvError::OutOfMemory(_))));
    assert_eq!(Status::from(&result), Status::OutOfMemory);
    assert_eq!(engine.scratch_in_use().unwrap(), 0);
    assert_eq!(dst, buffers.dst);
}

#[test]
fn channel_last_request_is_served_by_the_reference() {
    let engine = CpuEngine::new().unwrap();
    let ncsp = scenario(3);
    let conv = ncsp
        .with_activation_descs(
            ncsp.src_desc().with_layout(Layout::ChannelLast),
            ncsp.dst_desc().with_layout(Layout::ChannelLast),
        )
        .unwrap();

    let direct = NcspConvolutionDesc::new(&conv, &PrimitiveAttr::new(), &engine);
    assert!(matches!(direct, Err(ConvError::Unimplemented(_))));

    let pd = engine.convolution_desc(&conv, &PrimitiveAttr::new()).unwrap();
    assert_eq!(pd.name(), "ref:convolution:nhwc");
}

#[test]
fn backward_request_is_unimplemented_everywhere() {
    let engine = CpuEngine::new().unwrap();
    let forward = scenario(1);
    let conv = ConvolutionDesc::new_with(
        PropKind::BackwardData,
        AlgKind::Direct,
        forward.src_desc().clone(),
        forward.weights_desc().clone(),
        None,
        forward.dst_desc().clone(),
        vec![1, 1],
        vec![1, 1],
        vec![0, 0],
        vec![0, 0],
    )
    .unwrap();

    let err = NcspConvolutionDesc::new(&conv, &PrimitiveAttr::new(), &engine)
        .err()
        .unwrap();
    assert_eq!(err.status(), Status::Unimplemented);

    let enumerated = engine.convolution_desc(&conv, &PrimitiveAttr::new());
    assert!(matches!(enumerated, Err(ConvError::Unimplemented(_))));
}

#[test]
fn two_sum_post_ops_are_invalid() {
    let engine = CpuEngine::new().unwrap();
    let attr = PrimitiveAttr::new().with_sum(1.0).with_sum(2.0);
    let result = engine.convolution_desc(&scenario(3), &attr);
    assert!(matches!(result, Err(ConvError::InvalidArguments(_))));
}

#[test]
fn bad_buffers_leave_destination_untouched() {
    let engine = CpuEngine::new().unwrap();
    for kernel in [1, 3] {
        let conv = scenario(kernel);
        let pd = NcspConvolutionDesc::new(&conv, &PrimitiveAttr::new(), &engine).unwrap();
        let buffers = Buffers::new(&conv, 14);

        let mut dst = buffers.dst.clone();
        let short_weights = &buffers.weights[1..];
        let result = execute(&engine, &pd, &buffers.src, short_weights, None, &mut dst);
        assert!(matches!(result, Err(ConvError::InvalidArguments(_))));
        assert_eq!(dst, buffers.dst);
    }
}

static ADAPTER_ONLY: [ConvolutionImpl; 1] = [NcspConvolutionDesc::create];
static ADAPTER_THEN_REFERENCE: [ConvolutionImpl; 2] =
    [NcspConvolutionDesc::create, ReferenceConvolutionDesc::create];

// Engine with a fixed implementation list whose reorders can be made to run out of memory
struct PlanningEngine {
    inner: CpuEngine,
    impls: &'static [ConvolutionImpl],
    fail_reorders: bool,
    reorder_requests: Mutex<usize>,
}

impl PlanningEngine {
    fn new(impls: &'static [ConvolutionImpl], fail_reorders: bool) -> Self {
        Self {
            inner: CpuEngine::new().unwrap(),
            impls,
            fail_reorders,
            reorder_requests: Mutex::new(0),
        }
    }

    fn reorder_requests(&self) -> usize {
        *self.reorder_requests.lock().unwrap()
    }
}

impl Engine for PlanningEngine {
    fn name(&self) -> String {
        format!("planning({})", self.inner.name())
    }

    fn config(&self) -> &EngineConfig {
        self.inner.config()
    }

    fn thread_pool(&self) -> Arc<rayon::ThreadPool> {
        self.inner.thread_pool()
    }

    fn convolution_impls(&self) -> &[ConvolutionImpl] {
        self.impls
    }

    fn convolution_desc(
        &self,
        desc: &ConvolutionDesc,
        attr: &PrimitiveAttr,
    ) -> Result<Box<dyn PrimitiveDesc>> {
        enumerate_convolution_impls(self, desc, attr)
    }

    fn matmul_desc(
        &self,
        src: &TensorDesc,
        weights: &TensorDesc,
        bias: Option<&TensorDesc>,
        dst: &TensorDesc,
        attr: &PrimitiveAttr,
    ) -> Result<Box<dyn PrimitiveDesc>> {
        self.inner.matmul_desc(src, weights, bias, dst, attr)
    }

    fn reorder_desc(&self, src: &TensorDesc, dst: &TensorDesc) -> Result<Box<dyn PrimitiveDesc>> {
        *self.reorder_requests.lock().unwrap() += 1;
        if self.fail_reorders {
            return Err(ConvError::OutOfMemory(format!(
                "No room for reorder {} -> {}",
                src, dst
            )));
        }
        self.inner.reorder_desc(src, dst)
    }

    fn scratchpad(&self, registry: &ScratchRegistry) -> Result<Scratchpad> {
        self.inner.scratchpad(registry)
    }
}

#[test]
fn no_channel_last_implementation_is_unimplemented() {
    let engine = PlanningEngine::new(&ADAPTER_ONLY, false);
    let attr = PrimitiveAttr::new();

    // The adapter declines its own channel-last inner convolution
    let spatial = scenario(3);
    let direct = NcspConvolutionDesc::new(&spatial, &attr, &engine);
    assert!(matches!(direct, Err(ConvError::Unimplemented(_))));
    let enumerated = engine.convolution_desc(&spatial, &attr);
    assert!(matches!(enumerated, Err(ConvError::Unimplemented(_))));
    assert_eq!(engine.reorder_requests(), 0);

    // The matmul path needs no inner convolution
    let pd = engine.convolution_desc(&scenario(1), &attr).unwrap();
    assert_eq!(pd.name(), "ncsp_convolution:matmul");
}

#[test]
fn nested_out_of_memory_stops_enumeration() {
    let conv = scenario(3);
    let attr = PrimitiveAttr::new().with_sum(1.0);

    let healthy = PlanningEngine::new(&ADAPTER_THEN_REFERENCE, false);
    let pd = healthy.convolution_desc(&conv, &attr).unwrap();
    assert_eq!(pd.name(), "ncsp_convolution:reorder");
    assert!(ReferenceConvolutionDesc::new(&conv, &attr).is_ok());

    let engine = PlanningEngine::new(&ADAPTER_THEN_REFERENCE, true);
    match NcspConvolutionDesc::new(&conv, &attr, &engine) {
        Err(err) => assert_eq!(err.status(), Status::OutOfMemory),
        Ok(_) => panic!("plan built without its reorders"),
    }
    assert_eq!(engine.reorder_requests(), 1);

    // The reference would accept, but the first error is final
    match engine.convolution_desc(&conv, &attr) {
        Err(ConvError::OutOfMemory(msg)) => assert!(msg.contains("nchw"), "{}", msg),
        Err(err) => panic!("unexpected error {}", err),
        Ok(pd) => panic!("fell through to {}", pd.name()),
    }
    assert_eq!(engine.reorder_requests(), 2);
}
