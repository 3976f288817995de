use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Error;
use crate::protocol::{ColumnDefinition, Row};
use crate::value::{MySqlTypeInfo, MySqlValue, MySqlValueFormat};

/// A single column of a result set.
#[derive(Debug, Clone)]
pub struct MySqlColumn {
    pub(crate) ordinal: usize,
    pub(crate) name: Option<String>,
    pub(crate) type_info: MySqlTypeInfo,
}

impl MySqlColumn {
    pub(crate) fn from_definition(ordinal: usize, def: &ColumnDefinition) -> Self {
        Self {
            ordinal,
            name: def.label().map(str::to_owned),
            type_info: MySqlTypeInfo::from_column(def),
        }
    }

    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn type_info(&self) -> &MySqlTypeInfo {
        &self.type_info
    }
}

/// A single row from a result set.
///
/// Values stay undecoded until accessed through [`try_get`][Self::try_get]
/// or one of the typed convenience accessors.
pub struct MySqlRow {
    pub(crate) row: Row,
    pub(crate) format: MySqlValueFormat,
    pub(crate) columns: Arc<Vec<MySqlColumn>>,
    pub(crate) column_names: Arc<HashMap<String, usize>>,
}

impl MySqlRow {
    /// The number of columns in the row.
    pub fn len(&self) -> usize {
        self.row.len()
    }

    pub fn is_empty(&self) -> bool {
        self.row.is_empty()
    }

    pub fn columns(&self) -> &[MySqlColumn] {
        &self.columns
    }

    /// Resolve a column index from either a 0-based ordinal or a name.
    pub fn ordinal_of(&self, index: impl RowIndex) -> Result<usize, Error> {
        index.ordinal(self)
    }

    /// The raw, undecoded value of the column.
    pub fn try_get(&self, index: impl RowIndex) -> Result<MySqlValue<'_>, Error> {
        let ordinal = index.ordinal(self)?;
        let column = &self.columns[ordinal];

        Ok(MySqlValue {
            value: self.row.get(ordinal),
            type_info: &column.type_info,
            format: self.format,
        })
    }

    pub fn get_i64(&self, index: impl RowIndex) -> Result<i64, Error> {
        self.decode(index, |value| value.to_i64())
    }

    pub fn get_u64(&self, index: impl RowIndex) -> Result<u64, Error> {
        self.decode(index, |value| value.to_u64())
    }

    pub fn get_f64(&self, index: impl RowIndex) -> Result<f64, Error> {
        self.decode(index, |value| value.to_f64())
    }

    pub fn get_str(&self, index: impl RowIndex) -> Result<String, Error> {
        self.decode(index, |value| value.as_str().map(str::to_owned))
    }

    pub fn get_bytes(&self, index: impl RowIndex) -> Result<Vec<u8>, Error> {
        self.decode(index, |value| value.as_bytes().map(<[u8]>::to_vec))
    }

    fn decode<T>(
        &self,
        index: impl RowIndex,
        decode: impl FnOnce(&MySqlValue<'_>) -> Result<T, crate::error::BoxDynError>,
    ) -> Result<T, Error> {
        let ordinal = index.ordinal(self)?;
        let value = self.try_get(ordinal)?;

        decode(&value).map_err(|source| Error::ColumnDecode {
            index: ordinal.to_string(),
            source,
        })
    }
}

impl std::fmt::Debug for MySqlRow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MySqlRow")
            .field("columns", &self.columns.len())
            .finish_non_exhaustive()
    }
}

/// A 0-based column ordinal or a column name.
pub trait RowIndex {
    fn ordinal(&self, row: &MySqlRow) -> Result<usize, Error>;
}

impl RowIndex for usize {
    fn ordinal(&self, row: &MySqlRow) -> Result<usize, Error> {
        if *self >= row.len() {
            return Err(Error::ColumnIndexOutOfBounds {
                index: *self,
                len: row.len(),
            });
        }

        Ok(*self)
    }
}

impl RowIndex for &'_ str {
    fn ordinal(&self, row: &MySqlRow) -> Result<usize, Error> {
        row.column_names
            .get(*self)
            .copied()
            .ok_or_else(|| Error::ColumnNotFound((*self).into()))
    }
}
