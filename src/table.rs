use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, AsArray, new_null_array};
use arrow::compute::kernels::cast::{CastOptions, cast, cast_with_options};
use arrow::compute::concat_batches;
use arrow::datatypes::{DataType, Field, Float64Type, Schema, SchemaRef};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use arrow::util::display::array_value_to_string;
use serde::{Deserialize, Serialize};

use crate::error::HarvestError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Float64,
    Float32,
    Int64,
    Int32,
    Int16,
    Int8,
    Text,
}

impl ColumnType {
    pub fn data_type(self) -> DataType {
        match self {
            ColumnType::Float64 => DataType::Float64,
            ColumnType::Float32 => DataType::Float32,
            ColumnType::Int64 => DataType::Int64,
            ColumnType::Int32 => DataType::Int32,
            ColumnType::Int16 => DataType::Int16,
            ColumnType::Int8 => DataType::Int8,
            ColumnType::Text => DataType::Utf8,
        }
    }

    fn is_integer(self) -> bool {
        matches!(
            self,
            ColumnType::Int64 | ColumnType::Int32 | ColumnType::Int16 | ColumnType::Int8
        )
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::Float64 => "float64",
            ColumnType::Float32 => "float32",
            ColumnType::Int64 => "int64",
            ColumnType::Int32 => "int32",
            ColumnType::Int16 => "int16",
            ColumnType::Int8 => "int8",
            ColumnType::Text => "text",
        };
        write!(f, "{name}")
    }
}

/// Declared storage type per column name. Columns missing from a result are
/// simply not touched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColumnTypeSchema(BTreeMap<String, ColumnType>);

impl ColumnTypeSchema {
    pub fn new(types: BTreeMap<String, ColumnType>) -> Self {
        Self(types)
    }

    pub fn get(&self, column: &str) -> Option<ColumnType> {
        self.0.get(column).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for ColumnTypeSchema {
    fn default() -> Self {
        let mut types = BTreeMap::new();
        for name in ["RA", "DEC"] {
            types.insert(name.to_string(), ColumnType::Float64);
        }
        for name in [
            "X",
            "Y",
            "PETRO_RADIUS",
            "KRON_RADIUS",
            "r_PStotal",
            "e_r_PStotal",
            "g_PStotal",
            "e_g_PStotal",
            "i_PStotal",
            "e_i_PStotal",
            "u_PStotal",
            "e_u_PStotal",
            "z_PStotal",
            "e_z_PStotal",
            "PROB_STAR",
            "PROB_QSO",
            "PROB_GAL",
        ] {
            types.insert(name.to_string(), ColumnType::Float32);
        }
        types.insert("CLASS".to_string(), ColumnType::Int16);
        for name in [
            "SEX_FLAGS_DET",
            "SEX_FLAGS_r",
            "SEX_FLAGS_i",
            "SEX_FLAGS_J0660",
        ] {
            types.insert(name.to_string(), ColumnType::Int8);
        }
        Self(types)
    }
}

/// Narrows a double to float32. Finite values beyond the float32 range are an
/// error; NaN and infinities carry over unchanged.
pub fn checked_f32(value: f64) -> Result<f32, String> {
    if value.is_finite() && value.abs() > f64::from(f32::MAX) {
        return Err(format!("{value} is out of range for float32"));
    }
    Ok(value as f32)
}

fn strict_cast() -> CastOptions<'static> {
    CastOptions {
        safe: false,
        ..Default::default()
    }
}

/// Converts `array` to `target`, failing on the first value the target type
/// cannot hold instead of truncating, saturating or wrapping it.
pub fn cast_column(array: &ArrayRef, target: ColumnType) -> Result<ArrayRef, String> {
    let to = target.data_type();
    if array.data_type() == &to {
        return Ok(Arc::clone(array));
    }
    // The cast kernel saturates doubles into float32 and truncates fractions
    // into integers, so those two cases are checked up front.
    if array.data_type().is_floating() && (target == ColumnType::Float32 || target.is_integer()) {
        let wide = cast(array, &DataType::Float64).map_err(|err| err.to_string())?;
        for value in wide.as_primitive::<Float64Type>().iter().flatten() {
            if target == ColumnType::Float32 {
                checked_f32(value)?;
            } else if !value.is_finite() || value.fract() != 0.0 {
                return Err(format!("{value} is not an integer"));
            }
        }
    }
    cast_with_options(array, &to, &strict_cast()).map_err(|err| err.to_string())
}

/// Named, typed columns of equal length, held as one Arrow record batch.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    batch: RecordBatch,
}

impl Default for Table {
    fn default() -> Self {
        Self {
            batch: RecordBatch::new_empty(Arc::new(Schema::empty())),
        }
    }
}

impl Table {
    pub fn new<N: Into<String>>(columns: Vec<(N, ArrayRef)>) -> Result<Self, HarvestError> {
        let (names, arrays): (Vec<String>, Vec<ArrayRef>) = columns
            .into_iter()
            .map(|(name, array)| (name.into(), array))
            .unzip();
        if arrays.is_empty() {
            return Ok(Self::default());
        }
        let expected = arrays[0].len();
        if let Some(index) = arrays.iter().position(|array| array.len() != expected) {
            return Err(HarvestError::SchemaConflict {
                column: names[index].clone(),
                message: format!("has {} rows, expected {expected}", arrays[index].len()),
            });
        }
        let fields: Vec<Field> = names
            .iter()
            .zip(&arrays)
            .map(|(name, array)| Field::new(name, array.data_type().clone(), true))
            .collect();
        let schema = Arc::new(Schema::new(fields));
        let batch = RecordBatch::try_new(schema, arrays).map_err(|err| {
            HarvestError::SchemaConflict {
                column: String::new(),
                message: err.to_string(),
            }
        })?;
        Ok(Self { batch })
    }

    pub fn from_batch(batch: RecordBatch) -> Self {
        Self { batch }
    }

    pub fn batch(&self) -> &RecordBatch {
        &self.batch
    }

    pub fn schema(&self) -> SchemaRef {
        self.batch.schema()
    }

    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    pub fn is_empty(&self) -> bool {
        self.num_rows() == 0
    }

    pub fn column(&self, name: &str) -> Option<&ArrayRef> {
        self.batch.column_by_name(name)
    }

    pub fn column_type(&self, name: &str) -> Option<&DataType> {
        self.column(name).map(|array| array.data_type())
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.batch
            .schema_ref()
            .fields()
            .iter()
            .map(|field| field.name().as_str())
            .collect()
    }

    /// Row `index` rendered cell by cell in column order.
    pub fn row(&self, index: usize) -> Vec<Option<String>> {
        self.batch
            .columns()
            .iter()
            .map(|array| {
                if index >= array.len() || array.is_null(index) {
                    None
                } else {
                    array_value_to_string(array, index).ok()
                }
            })
            .collect()
    }

    /// Casts every column the schema declares; other columns pass through.
    pub fn apply_schema(&self, schema: &ColumnTypeSchema) -> Result<Table, HarvestError> {
        let columns = self
            .batch
            .schema_ref()
            .fields()
            .iter()
            .zip(self.batch.columns())
            .map(|(field, array)| {
                let array = match schema.get(field.name()) {
                    Some(target) => {
                        cast_column(array, target).map_err(|message| HarvestError::Coercion {
                            column: field.name().clone(),
                            message,
                        })?
                    }
                    None => Arc::clone(array),
                };
                Ok((field.name().clone(), array))
            })
            .collect::<Result<Vec<_>, HarvestError>>()?;
        Self::new(columns)
    }

    /// Stacks tables row-wise. The result carries the union of all columns in
    /// order of first appearance; rows from a table lacking a column get nulls.
    pub fn concat(tables: &[Table]) -> Result<Table, HarvestError> {
        let mut fields: Vec<Field> = Vec::new();
        for table in tables {
            for field in table.batch.schema_ref().fields() {
                match fields.iter().find(|known| known.name() == field.name()) {
                    Some(known) if known.data_type() != field.data_type() => {
                        return Err(HarvestError::SchemaConflict {
                            column: field.name().clone(),
                            message: format!(
                                "{} cannot be appended to {}",
                                field.data_type(),
                                known.data_type()
                            ),
                        });
                    }
                    Some(_) => {}
                    None => fields.push(Field::new(field.name(), field.data_type().clone(), true)),
                }
            }
        }
        if fields.is_empty() {
            return Ok(Self::default());
        }

        let schema = Arc::new(Schema::new(fields));
        let batch = tables
            .iter()
            .map(|table| {
                let rows = table.num_rows();
                let columns = schema
                    .fields()
                    .iter()
                    .map(|field| match table.column(field.name()) {
                        Some(array) => Arc::clone(array),
                        None => new_null_array(field.data_type(), rows),
                    })
                    .collect();
                RecordBatch::try_new(Arc::clone(&schema), columns)
            })
            .collect::<Result<Vec<_>, ArrowError>>()
            .and_then(|batches| concat_batches(&schema, &batches))
            .map_err(|err| HarvestError::SchemaConflict {
                column: String::new(),
                message: err.to_string(),
            })?;
        Ok(Self { batch })
    }
}
