use std::collections::HashMap;

use crate::{
    compute::scratchpad::ScratchGrantor,
    engine::error::{ConvError, Result},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArgKind {
    Src,
    Weights,
    Bias,
    Dst,
}

pub enum MemoryArg<'a> {
    Input(&'a [f32]),
    Output(&'a mut [f32]),
}

/// Live buffers bound to a primitive's argument slots for one execution.
#[derive(Default)]
pub struct ExecArgs<'a> {
    args: HashMap<ArgKind, MemoryArg<'a>>,
}

impl<'a> ExecArgs<'a> {
    pub fn new() -> Self {
        Self {
            args: HashMap::new(),
        }
    }

    pub fn with_input(mut self, kind: ArgKind, data: &'a [f32]) -> Self {
        self.args.insert(kind, MemoryArg::Input(data));
        self
    }

    pub fn with_output(mut self, kind: ArgKind, data: &'a mut [f32]) -> Self {
        self.args.insert(kind, MemoryArg::Output(data));
        self
    }
}

pub struct ExecContext<'a> {
    args: ExecArgs<'a>,
    scratch: ScratchGrantor<'a>,
}

impl<'a> ExecContext<'a> {
    pub fn new(args: ExecArgs<'a>, scratch: ScratchGrantor<'a>) -> Self {
        Self { args, scratch }
    }

    pub fn without_scratch(args: ExecArgs<'a>) -> Self {
        Self::new(args, ScratchGrantor::empty())
    }

    pub fn input(&self, kind: ArgKind) -> Result<&'a [f32]> {
        match self.args.args.get(&kind) {
            Some(MemoryArg::Input(data)) => Ok(*data),
            Some(MemoryArg::Output(_)) => Err(ConvError::InvalidArguments(format!(
                "Argument {:?} is bound as an output",
                kind
            ))),
            None => Err(ConvError::InvalidArguments(format!(
                "Argument {:?} is not bound",
                kind
            ))),
        }
    }

    /// Moves the output buffer out of the context; an output is written by exactly one
    /// primitive per execution.
    pub fn take_output(&mut self, kind: ArgKind) -> Result<&'a mut [f32]> {
        match self.args.args.remove(&kind) {
            Some(MemoryArg::Output(data)) => Ok(data),
            Some(input @ MemoryArg::Input(_)) => {
                self.args.args.insert(kind, input);
                Err(ConvError::InvalidArguments(format!(
                    "Argument {:?} is bound as an input",
                    kind
                )))
            }
            None => Err(ConvError::InvalidArguments(format!(
                "Argument {:?} is not bound",
                kind
            ))),
        }
    }

    /// Read-only view of an output that has not been taken yet.
    pub fn peek_output(&self, kind: ArgKind) -> Option<&[f32]> {
        match self.args.args.get(&kind) {
            Some(MemoryArg::Output(data)) => Some(&data[..]),
            _ => None,
        }
    }

    pub fn scratch(&mut self) -> &mut ScratchGrantor<'a> {
        &mut self.scratch
    }
}
