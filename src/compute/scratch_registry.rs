use std::{fmt, ops::Range};

use tracing::trace;

use crate::{
    engine::error::{ConvError, Result},
    tensor::data_type::DataType,
};

// Every region starts on a 64 byte boundary
pub const SCRATCH_ALIGNMENT_BYTES: usize = 64;

const ALIGNMENT_ELEMS: usize = SCRATCH_ALIGNMENT_BYTES / std::mem::size_of::<f32>();

/// Names a scratch buffer by the chain of nested primitives that own it plus the
/// buffer's own name, so two sub-plans can book the same name without colliding.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScratchKey {
    owners: Vec<&'static str>,
    name: &'static str,
}

impl ScratchKey {
    pub fn new(name: &'static str) -> Self {
        Self {
            owners: Vec::new(),
            name,
        }
    }

    pub fn owners(&self) -> &[&'static str] {
        &self.owners
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    fn nested_under(&self, owner: &'static str) -> Self {
        let mut owners = Vec::with_capacity(self.owners.len() + 1);
        owners.push(owner);
        owners.extend_from_slice(&self.owners);
        Self {
            owners,
            name: self.name,
        }
    }

    pub(crate) fn strip_owner(&self, owner: &'static str) -> Option<Self> {
        match self.owners.split_first() {
            Some((first, rest)) if *first == owner => Some(Self {
                owners: rest.to_vec(),
                name: self.name,
            }),
            _ => None,
        }
    }
}

impl fmt::Display for ScratchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for owner in &self.owners {
            write!(f, "{}/", owner)?;
        }
        write!(f, "{}", self.name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScratchEntry {
    pub key: ScratchKey,
    pub nelems: usize,
    pub data_type: DataType,
}

impl ScratchEntry {
    pub fn size_in_bytes(&self) -> usize {
        self.nelems * self.data_type.size()
    }

    // Backing storage is f32 words, round up to whole words
    fn len_in_words(&self) -> usize {
        self.size_in_bytes().div_ceil(std::mem::size_of::<f32>())
    }
}

/// Temporary buffers a primitive needs at execution time, in booking order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScratchRegistry {
    entries: Vec<ScratchEntry>,
}

impl ScratchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn book(&mut self, name: &'static str, nelems: usize, data_type: DataType) -> Result<()> {
        self.insert(ScratchEntry {
            key: ScratchKey::new(name),
            nelems,
            data_type,
        })
    }

    /// Merges a nested primitive's whole registry under `owner`.
    pub fn book_nested(&mut self, owner: &'static str, nested: &ScratchRegistry) -> Result<()> {
        for entry in &nested.entries {
            self.insert(ScratchEntry {
                key: entry.key.nested_under(owner),
                nelems: entry.nelems,
                data_type: entry.data_type,
            })?;
        }
        Ok(())
    }

    fn insert(&mut self, entry: ScratchEntry) -> Result<()> {
        if self.get(&entry.key).is_some() {
            return Err(ConvError::RuntimeError(format!(
                "Scratch buffer {} booked twice",
                entry.key
            )));
        }
        trace!(key = %entry.key, nelems = entry.nelems, "booked scratch buffer");
        self.entries.push(entry);
        Ok(())
    }

    pub fn get(&self, key: &ScratchKey) -> Option<&ScratchEntry> {
        self.entries.iter().find(|entry| &entry.key == key)
    }

    pub fn entries(&self) -> &[ScratchEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Disjoint, aligned word ranges for every entry, in booking order.
    pub fn layout(&self) -> Vec<(ScratchKey, Range<usize>)> {
        let mut offset: usize = 0;
        self.entries
            .iter()
            .map(|entry| {
                let start = offset.div_ceil(ALIGNMENT_ELEMS) * ALIGNMENT_ELEMS;
                let end = start + entry.len_in_words();
                offset = end;
                (entry.key.clone(), start..end)
            })
            .collect()
    }

    /// Words of backing storage a scratchpad for this registry needs.
    pub fn len_in_words(&self) -> usize {
        self.layout().last().map_or(0, |(_, range)| range.end)
    }

    pub fn size_in_bytes(&self) -> usize {
        self.len_in_words() * std::mem::size_of::<f32>()
    }
}

impl fmt::Display for ScratchRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:-<80}", "")?;
        writeln!(f, "{:<48} {:<15} {:<15}", "Scratch buffer", "Elements", "Bytes")?;
        writeln!(f, "{:-<80}", "")?;
        for entry in &self.entries {
            writeln!(
                f,
                "{:<48} {:<15} {:<15}",
                entry.key.to_string(),
                entry.nelems,
                entry.size_in_bytes()
            )?;
        }
        writeln!(f, "{:-<80}", "")?;
        write!(f, "Total (aligned): {} bytes", self.size_in_bytes())
    }
}
