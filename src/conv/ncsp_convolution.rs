use std::sync::Arc;

use tracing::{debug, trace};

use crate::{
    compute::{scratch_registry::ScratchRegistry, scratchpad::ScratchGrantor},
    engine::{
        engine::Engine,
        error::{ConvError, Result},
    },
    primitive::{
        attributes::PrimitiveAttr,
        exec_ctx::{ArgKind, ExecArgs, ExecContext},
        primitive::{Primitive, PrimitiveDesc},
    },
    tensor::{layout::Layout, tensor_desc::TensorDesc},
};

use super::{
    conv_desc::{AlgKind, ConvolutionDesc},
    plan::ExecutionPlan,
    scratch_plan::{
        plan_scratch, KEY_CONV_NCSP_DST, KEY_CONV_NCSP_SRC, OWNER_DST_POST_REORDER,
        OWNER_DST_PRE_REORDER, OWNER_MATMUL, OWNER_NSPC_CONV, OWNER_SRC_REORDER,
    },
    strategy::{select_strategy, Strategy},
};

/// Convolution over channel-first activations, served either by one matmul on reshaped
/// views of the user buffers or by a channel-last convolution between two reorders.
///
/// The plan is fixed at construction. Nested primitive descriptors are created through
/// the engine passed in, so every nested choice is the engine's.
pub struct NcspConvolutionDesc {
    conv: ConvolutionDesc,
    plan: ExecutionPlan,
    registry: ScratchRegistry,
}

impl NcspConvolutionDesc {
    pub fn new(desc: &ConvolutionDesc, attr: &PrimitiveAttr, engine: &dyn Engine) -> Result<Self> {
        let src = desc.src_desc().resolve_layout(Layout::ChannelFirst);
        let dst = desc.dst_desc().resolve_layout(Layout::ChannelFirst);
        let mut conv = desc.with_activation_descs(src, dst)?;
        if conv.alg_kind() == AlgKind::Auto {
            conv = conv.with_alg_kind(AlgKind::Direct);
        }

        let strategy = select_strategy(&conv, attr)?;
        let plan = ExecutionPlan::build(strategy, &conv, attr, engine)?;

        let (weights, bias) = plan.resolved_parameter_descs(&conv)?;
        let conv = conv.with_parameter_descs(weights, bias)?;
        let registry = plan_scratch(&plan)?;

        debug!(
            %strategy,
            config = %conv.config_string(),
            post_ops = ?attr.config_string(),
            scratch_bytes = registry.size_in_bytes(),
            "planned channel-first convolution"
        );

        Ok(Self {
            conv,
            plan,
            registry,
        })
    }

    /// Implementation list entry point.
    pub fn create(
        desc: &ConvolutionDesc,
        attr: &PrimitiveAttr,
        engine: &dyn Engine,
    ) -> Result<Box<dyn PrimitiveDesc>> {
        Ok(Box::new(Self::new(desc, attr, engine)?))
    }

    pub fn plan(&self) -> &ExecutionPlan {
        &self.plan
    }

    pub fn strategy(&self) -> Strategy {
        self.plan.strategy()
    }
}

impl PrimitiveDesc for NcspConvolutionDesc {
    fn name(&self) -> String {
        format!("ncsp_convolution:{}", self.strategy())
    }

    fn src_desc(&self) -> &TensorDesc {
        self.conv.src_desc()
    }

    fn weights_desc(&self) -> Option<&TensorDesc> {
        Some(self.conv.weights_desc())
    }

    fn bias_desc(&self) -> Option<&TensorDesc> {
        self.conv.bias_desc()
    }

    fn dst_desc(&self) -> &TensorDesc {
        self.conv.dst_desc()
    }

    fn scratch_registry(&self) -> &ScratchRegistry {
        &self.registry
    }

    fn create_primitive(&self, engine: &dyn Engine) -> Result<Arc<dyn Primitive>> {
        let nested = match &self.plan {
            ExecutionPlan::Matmul(plan) => {
                NestedPrimitives::Matmul(plan.matmul.create_primitive(engine)?)
            }
            ExecutionPlan::Reorder(plan) => NestedPrimitives::Reorder(ReorderStages {
                src_reorder: plan.src_reorder.create_primitive(engine)?,
                dst_pre_reorder: plan
                    .dst_pre_reorder
                    .as_ref()
                    .map(|pd| pd.create_primitive(engine))
                    .transpose()?,
                conv: plan.conv.create_primitive(engine)?,
                dst_post_reorder: plan.dst_post_reorder.create_primitive(engine)?,
                src_nspc_len: plan.src_nspc.num_elements(),
                dst_nspc_len: plan.dst_nspc.num_elements(),
            }),
        };

        Ok(Arc::new(NcspConvolution {
            name: self.name(),
            conv: self.conv.clone(),
            nested,
        }))
    }
}

struct ReorderStages {
    src_reorder: Arc<dyn Primitive>,
    dst_pre_reorder: Option<Arc<dyn Primitive>>,
    conv: Arc<dyn Primitive>,
    dst_post_reorder: Arc<dyn Primitive>,
    src_nspc_len: usize,
    dst_nspc_len: usize,
}

enum NestedPrimitives {
    Matmul(Arc<dyn Primitive>),
    Reorder(ReorderStages),
}

pub struct NcspConvolution {
    name: String,
    conv: ConvolutionDesc,
    nested: NestedPrimitives,
}

impl NcspConvolution {
    fn check_len(kind: ArgKind, desc: &TensorDesc, len: usize) -> Result<()> {
        if len != desc.num_elements() {
            return Err(ConvError::InvalidArguments(format!(
                "{:?} buffer has {} elements, {} needs {}",
                kind,
                len,
                desc,
                desc.num_elements()
            )));
        }
        Ok(())
    }

    fn check_args(&self, ctx: &ExecContext<'_>) -> Result<()> {
        Self::check_len(ArgKind::Src, self.conv.src_desc(), ctx.input(ArgKind::Src)?.len())?;
        Self::check_len(
            ArgKind::Weights,
            self.conv.weights_desc(),
            ctx.input(ArgKind::Weights)?.len(),
        )?;
        if let Some(bias) = self.conv.bias_desc() {
            Self::check_len(ArgKind::Bias, bias, ctx.input(ArgKind::Bias)?.len())?;
        }

        let dst = ctx.peek_output(ArgKind::Dst).ok_or_else(|| {
            ConvError::InvalidArguments("Dst is not bound as an output".to_string())
        })?;
        Self::check_len(ArgKind::Dst, self.conv.dst_desc(), dst.len())
    }

    fn bias<'a>(&self, ctx: &ExecContext<'a>) -> Result<Option<&'a [f32]>> {
        if self.conv.with_bias() {
            Ok(Some(ctx.input(ArgKind::Bias)?))
        } else {
            Ok(None)
        }
    }

    fn execute_matmul<'a>(&self, matmul: &dyn Primitive, ctx: &mut ExecContext<'a>) -> Result<()> {
        let src = ctx.input(ArgKind::Src)?;
        let weights = ctx.input(ArgKind::Weights)?;
        let bias = self.bias(ctx)?;
        let scratch = ctx.scratch().nested(OWNER_MATMUL);
        let dst = ctx.take_output(ArgKind::Dst)?;

        // Swapped roles, no data moves
        let mut args = ExecArgs::new()
            .with_input(ArgKind::Src, weights)
            .with_input(ArgKind::Weights, src)
            .with_output(ArgKind::Dst, dst);
        if let Some(bias) = bias {
            args = args.with_input(ArgKind::Bias, bias);
        }

        trace!(primitive = %matmul.name(), "ncsp convolution: matmul");
        matmul.execute(&mut ExecContext::new(args, scratch))
    }

    fn execute_reorder<'a>(&self, stages: &ReorderStages, ctx: &mut ExecContext<'a>) -> Result<()> {
        let src = ctx.input(ArgKind::Src)?;
        let weights = ctx.input(ArgKind::Weights)?;
        let bias = self.bias(ctx)?;

        let scratch = ctx.scratch();
        let src_nspc = take_region(scratch, KEY_CONV_NCSP_SRC, stages.src_nspc_len)?;
        let dst_nspc = take_region(scratch, KEY_CONV_NCSP_DST, stages.dst_nspc_len)?;
        let src_reorder_scratch = scratch.nested(OWNER_SRC_REORDER);
        let conv_scratch = scratch.nested(OWNER_NSPC_CONV);
        let dst_post_reorder_scratch = scratch.nested(OWNER_DST_POST_REORDER);

        trace!(primitive = %stages.src_reorder.name(), "ncsp convolution: src reorder");
        stages.src_reorder.execute(&mut ExecContext::new(
            ExecArgs::new()
                .with_input(ArgKind::Src, src)
                .with_output(ArgKind::Dst, &mut *src_nspc),
            src_reorder_scratch,
        ))?;

        // The sum post-op reads the previous destination, so it has to be in the
        // channel-last buffer before the convolution runs
        if let Some(dst_pre_reorder) = &stages.dst_pre_reorder {
            let dst_pre_reorder_scratch = ctx.scratch().nested(OWNER_DST_PRE_REORDER);
            let dst = ctx.peek_output(ArgKind::Dst).ok_or_else(|| {
                ConvError::InvalidArguments("Dst is not bound as an output".to_string())
            })?;
            trace!(primitive = %dst_pre_reorder.name(), "ncsp convolution: dst pre reorder");
            dst_pre_reorder.execute(&mut ExecContext::new(
                ExecArgs::new()
                    .with_input(ArgKind::Src, dst)
                    .with_output(ArgKind::Dst, &mut *dst_nspc),
                dst_pre_reorder_scratch,
            ))?;
        }

        let mut conv_args = ExecArgs::new()
            .with_input(ArgKind::Src, &*src_nspc)
            .with_input(ArgKind::Weights, weights)
            .with_output(ArgKind::Dst, &mut *dst_nspc);
        if let Some(bias) = bias {
            conv_args = conv_args.with_input(ArgKind::Bias, bias);
        }
        trace!(primitive = %stages.conv.name(), "ncsp convolution: channel-last convolution");
        stages
            .conv
            .execute(&mut ExecContext::new(conv_args, conv_scratch))?;

        let dst = ctx.take_output(ArgKind::Dst)?;
        trace!(primitive = %stages.dst_post_reorder.name(), "ncsp convolution: dst post reorder");
        stages.dst_post_reorder.execute(&mut ExecContext::new(
            ExecArgs::new()
                .with_input(ArgKind::Src, &*dst_nspc)
                .with_output(ArgKind::Dst, dst),
            dst_post_reorder_scratch,
        ))?;

        Ok(())
    }
}

fn take_region<'a>(
    scratch: &mut ScratchGrantor<'a>,
    name: &'static str,
    len: usize,
) -> Result<&'a mut [f32]> {
    let region = scratch.take(name)?;
    let available = region.len();
    region.get_mut(..len).ok_or_else(|| {
        ConvError::RuntimeError(format!(
            "Scratch buffer {} holds {} elements, {} needed",
            name, available, len
        ))
    })
}

impl Primitive for NcspConvolution {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn execute(&self, ctx: &mut ExecContext<'_>) -> Result<()> {
        self.check_args(ctx)?;

        match &self.nested {
            NestedPrimitives::Matmul(matmul) => self.execute_matmul(matmul.as_ref(), ctx),
            NestedPrimitives::Reorder(stages) => self.execute_reorder(stages, ctx),
        }
    }
}
