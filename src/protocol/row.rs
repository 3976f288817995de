use std::ops::Range;

use bytes::Bytes;

/// Raw storage for a decoded result row: the undecoded packet payload plus
/// one byte range per column (`None` for SQL NULL).
///
/// The number of value slots always equals the column count of the result
/// set the row belongs to.
#[derive(Debug, Default)]
pub struct Row {
    pub(crate) storage: Bytes,
    pub(crate) values: Vec<Option<Range<usize>>>,
}

impl Row {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&[u8]> {
        self.values[index]
            .as_ref()
            .map(|range| &self.storage[range.start..range.end])
    }
}
