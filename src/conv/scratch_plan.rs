use crate::{compute::scratch_registry::ScratchRegistry, engine::error::Result};

use super::plan::ExecutionPlan;

// Channel-last copies of the activations on the reorder path
pub const KEY_CONV_NCSP_SRC: &str = "conv_ncsp_src";
pub const KEY_CONV_NCSP_DST: &str = "conv_ncsp_dst";

// Owners of the nested registries
pub const OWNER_MATMUL: &str = "matmul";
pub const OWNER_NSPC_CONV: &str = "nspc_conv";
pub const OWNER_SRC_REORDER: &str = "src_reorder";
pub const OWNER_DST_PRE_REORDER: &str = "dst_pre_reorder";
pub const OWNER_DST_POST_REORDER: &str = "dst_post_reorder";

/// Everything one execution of `plan` needs, in a fixed booking order.
pub fn plan_scratch(plan: &ExecutionPlan) -> Result<ScratchRegistry> {
    let mut registry = ScratchRegistry::new();

    match plan {
        ExecutionPlan::Matmul(plan) => {
            registry.book_nested(OWNER_MATMUL, plan.matmul.scratch_registry())?;
        }
        ExecutionPlan::Reorder(plan) => {
            registry.book(
                KEY_CONV_NCSP_SRC,
                plan.src_nspc.num_elements(),
                plan.src_nspc.data_type(),
            )?;
            registry.book(
                KEY_CONV_NCSP_DST,
                plan.dst_nspc.num_elements(),
                plan.dst_nspc.data_type(),
            )?;

            registry.book_nested(OWNER_NSPC_CONV, plan.conv.scratch_registry())?;
            registry.book_nested(OWNER_SRC_REORDER, plan.src_reorder.scratch_registry())?;
            if let Some(pre) = &plan.dst_pre_reorder {
                registry.book_nested(OWNER_DST_PRE_REORDER, pre.scratch_registry())?;
            }
            registry.book_nested(OWNER_DST_POST_REORDER, plan.dst_post_reorder.scratch_registry())?;
        }
    }

    Ok(registry)
}
