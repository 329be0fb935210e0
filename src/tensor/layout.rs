/// Physical arrangement of a tensor's elements in memory.
///
/// Logical dims are always ordered `(batch, channel, spatial...)` for activations and
/// `([groups], out, in, spatial...)` for weights; the layout only decides which logical
/// axis varies fastest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Layout {
    // Not chosen yet, the implementation picks one at plan time
    Any,
    // Dense row-major in logical order (ncw / nchw / ncdhw, and every plain matrix)
    ChannelFirst,
    // Channel is the innermost axis (nwc / nhwc / ndhwc)
    ChannelLast,
}

impl Layout {
    /// Logical axes ordered from outermost to innermost in memory.
    pub fn physical_order(&self, ndims: usize) -> Vec<usize> {
        match self {
            Layout::Any | Layout::ChannelFirst => (0..ndims).collect(),
            Layout::ChannelLast => {
                if ndims < 3 {
                    return (0..ndims).collect();
                }
                let mut order = Vec::with_capacity(ndims);
                order.push(0);
                order.extend(2..ndims);
                order.push(1);
                order
            }
        }
    }

    /// Format tag name for an activation tensor of the given rank, used in logs.
    pub fn tag_name(&self, ndims: usize) -> &'static str {
        match (self, ndims) {
            (Layout::Any, _) => "any",
            (Layout::ChannelFirst, 3) => "ncw",
            (Layout::ChannelFirst, 4) => "nchw",
            (Layout::ChannelFirst, 5) => "ncdhw",
            (Layout::ChannelFirst, _) => "plain",
            (Layout::ChannelLast, 3) => "nwc",
            (Layout::ChannelLast, 4) => "nhwc",
            (Layout::ChannelLast, 5) => "ndhwc",
            (Layout::ChannelLast, _) => "channel_last",
        }
    }
}
