#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DataType {
    F32,
}

impl DataType {
    // Size of one element in bytes
    pub fn size(&self) -> usize {
        match self {
            DataType::F32 => std::mem::size_of::<f32>(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DataType::F32 => "f32",
        }
    }
}
