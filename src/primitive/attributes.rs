use std::fmt;

use crate::engine::error::{ConvError, Result};

#[derive(Clone, Debug, PartialEq)]
pub enum EltwiseKind {
    ReLU,
    LeakyReLU(f32),
}

impl EltwiseKind {
    pub fn name(&self) -> &'static str {
        match self {
            EltwiseKind::ReLU => "ReLU",
            EltwiseKind::LeakyReLU(_) => "LeakyReLU",
        }
    }

    pub fn apply(&self, x: f32) -> f32 {
        match self {
            EltwiseKind::ReLU => x.max(0.0),
            EltwiseKind::LeakyReLU(alpha) => {
                if x > 0.0 {
                    x
                } else {
                    alpha * x
                }
            }
        }
    }
}

impl fmt::Display for EltwiseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EltwiseKind::LeakyReLU(alpha) => write!(f, "{}(α={})", self.name(), alpha),
            _ => write!(f, "{}", self.name()),
        }
    }
}

/// An operation fused onto the destination after the main computation.
#[derive(Clone, Debug, PartialEq)]
pub enum PostOp {
    // dst = result + scale * previous dst contents
    Sum { scale: f32 },
    Eltwise(EltwiseKind),
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PrimitiveAttr {
    post_ops: Vec<PostOp>,
}

impl PrimitiveAttr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_post_op(mut self, post_op: PostOp) -> Self {
        self.post_ops.push(post_op);
        self
    }

    pub fn with_sum(self, scale: f32) -> Self {
        self.with_post_op(PostOp::Sum { scale })
    }

    pub fn with_eltwise(self, kind: EltwiseKind) -> Self {
        self.with_post_op(PostOp::Eltwise(kind))
    }

    pub fn post_ops(&self) -> &[PostOp] {
        &self.post_ops
    }

    pub fn has_default_values(&self) -> bool {
        self.post_ops.is_empty()
    }

    /// Whether a post-op reads what the destination held before execution.
    pub fn reads_destination(&self) -> bool {
        self.post_ops
            .iter()
            .any(|post_op| matches!(post_op, PostOp::Sum { .. }))
    }

    pub fn validate(&self) -> Result<()> {
        let sums = self
            .post_ops
            .iter()
            .filter(|post_op| matches!(post_op, PostOp::Sum { .. }))
            .count();
        if sums > 1 {
            return Err(ConvError::InvalidArguments(format!(
                "At most one sum post-op is supported, got {}",
                sums
            )));
        }
        Ok(())
    }

    /// Applies the post-op chain to one output value. `prev_dst` is what the destination
    /// held before this execution started.
    pub fn apply(&self, value: f32, prev_dst: f32) -> f32 {
        self.post_ops
            .iter()
            .fold(value, |acc, post_op| match post_op {
                PostOp::Sum { scale } => acc + scale * prev_dst,
                PostOp::Eltwise(kind) => kind.apply(acc),
            })
    }

    pub fn config_string(&self) -> Option<String> {
        if self.post_ops.is_empty() {
            return None;
        }
        Some(
            self.post_ops
                .iter()
                .map(|post_op| match post_op {
                    PostOp::Sum { scale } => format!("sum(scale={})", scale),
                    PostOp::Eltwise(kind) => kind.to_string(),
                })
                .collect::<Vec<_>>()
                .join("+"),
        )
    }
}
