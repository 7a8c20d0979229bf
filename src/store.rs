use std::collections::HashMap;
use std::fs::{self, File};
use std::sync::Arc;

use arrow::compute::concat_batches;
use arrow::datatypes::Schema;
use arrow::record_batch::RecordBatch;
use camino::{Utf8Path, Utf8PathBuf};
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::file::properties::WriterProperties;
use tempfile::Builder;

use crate::domain::FieldName;
use crate::error::HarvestError;
use crate::table::Table;

/// Per-field artifacts under a run-scoped output directory, one
/// `<field>.parquet` file each.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: Utf8PathBuf,
}

impl ArtifactStore {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn ensure_root(&self) -> Result<(), HarvestError> {
        fs::create_dir_all(self.root.as_std_path())
            .map_err(|err| HarvestError::Filesystem(err.to_string()))
    }

    pub fn unit_path(&self, field: &FieldName) -> Utf8PathBuf {
        self.root.join(format!("{field}.parquet"))
    }

    pub fn write(&self, field: &FieldName, table: &Table) -> Result<Utf8PathBuf, HarvestError> {
        let path = self.unit_path(field);
        write_parquet_atomic(&path, table.batch(), HashMap::new())?;
        Ok(path)
    }

    pub fn read(&self, field: &FieldName) -> Result<Table, HarvestError> {
        Self::read_path(&self.unit_path(field))
    }

    pub fn read_path(path: &Utf8Path) -> Result<Table, HarvestError> {
        read_parquet(path).map(|(table, _)| table)
    }
}

fn writer_properties() -> WriterProperties {
    WriterProperties::builder()
        .set_created_by(format!("splus-harvest {}", env!("CARGO_PKG_VERSION")))
        .build()
}

/// Encodes `batch` as parquet next to `path` and renames it into place, so a
/// reader never sees a half-written artifact. `metadata` lands in the file's
/// key/value section through the embedded Arrow schema.
pub fn write_parquet_atomic(
    path: &Utf8Path,
    batch: &RecordBatch,
    metadata: HashMap<String, String>,
) -> Result<(), HarvestError> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or(Utf8Path::new("."));
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| HarvestError::Filesystem(err.to_string()))?;

    let schema = Arc::new(Schema::new(batch.schema().fields().clone()).with_metadata(metadata));
    let batch = RecordBatch::try_new(Arc::clone(&schema), batch.columns().to_vec())
        .map_err(|err| HarvestError::Filesystem(format!("encode {path}: {err}")))?;

    let mut temp = Builder::new()
        .prefix(".splus-harvest")
        .suffix(".parquet")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
    let mut writer = ArrowWriter::try_new(temp.as_file_mut(), schema, Some(writer_properties()))
        .map_err(|err| HarvestError::Filesystem(format!("parquet writer init failed: {err}")))?;
    writer
        .write(&batch)
        .map_err(|err| HarvestError::Filesystem(format!("parquet write failed: {err}")))?;
    writer
        .close()
        .map_err(|err| HarvestError::Filesystem(format!("parquet close failed: {err}")))?;
    temp.persist(path.as_std_path())
        .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
    Ok(())
}

/// Reads a parquet artifact back into one table plus its schema metadata.
pub fn read_parquet(path: &Utf8Path) -> Result<(Table, HashMap<String, String>), HarvestError> {
    let file = File::open(path.as_std_path())
        .map_err(|err| HarvestError::Filesystem(format!("read {path}: {err}")))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .map_err(|err| HarvestError::Filesystem(format!("decode {path}: {err}")))?;
    let schema = Arc::clone(builder.schema());
    let metadata = schema.metadata().clone();
    let reader = builder
        .build()
        .map_err(|err| HarvestError::Filesystem(format!("decode {path}: {err}")))?;

    let mut batches = Vec::new();
    for batch in reader {
        let batch =
            batch.map_err(|err| HarvestError::Filesystem(format!("decode {path}: {err}")))?;
        batches.push(batch);
    }
    let plain = Arc::new(Schema::new(schema.fields().clone()));
    let batch = concat_batches(&schema, &batches)
        .and_then(|batch| RecordBatch::try_new(plain, batch.columns().to_vec()))
        .map_err(|err| HarvestError::Filesystem(format!("decode {path}: {err}")))?;
    Ok((Table::from_batch(batch), metadata))
}
