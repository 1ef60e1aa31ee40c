//! Parquet / Arrow event I/O.
//!
//! # Schema: `tte_events_v1`
//!
//! | Column    | Arrow Type | Description                 |
//! |-----------|------------|-----------------------------|
//! | `time`    | `Float64`  | Arrival time (s)            |
//! | `channel` | `Int64`    | Detector channel index      |
//!
//! Key-value metadata:
//!
//! | Key                   | Value                                               |
//! |-----------------------|-----------------------------------------------------|
//! | `tte.schema_version`  | `"tte_events_v1"`                                   |
//! | `tte.detector`        | JSON object: channels, span, dead time, ebounds     |

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{Array, AsArray, Float64Array, Int64Array};
use arrow::datatypes::{DataType, Field, Float64Type, Int64Type, Schema};
use arrow::record_batch::RecordBatch;
use serde::{Deserialize, Serialize};

use crate::channels::EnergyBounds;
use crate::event_store::{DeadTime, EventStore};
use tte_core::{Error, Result, TimeInterval};

/// Schema version string embedded in Parquet key-value metadata.
pub const EVENTS_SCHEMA_V1: &str = "tte_events_v1";

/// Parquet metadata key for the schema version.
pub const META_KEY_SCHEMA_VERSION: &str = "tte.schema_version";

/// Parquet metadata key for the detector description (JSON).
pub const META_KEY_DETECTOR: &str = "tte.detector";

/// Arrival-time column.
pub const TIME_COLUMN: &str = "time";

/// Channel column.
pub const CHANNEL_COLUMN: &str = "channel";

/// Detector description stored alongside the event columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorMeta {
    /// Number of channels.
    pub n_channels: usize,
    /// Observation `[start, stop]`.
    pub span: [f64; 2],
    /// Dead-time model.
    #[serde(default)]
    pub dead_time: Option<DeadTime>,
    /// Channel energy edges (`n_channels + 1` values), if known.
    #[serde(default)]
    pub energy_edges: Option<Vec<f64>>,
}

impl DetectorMeta {
    fn from_store(store: &EventStore) -> Self {
        let energy_edges = store.energy_bounds().map(|eb| {
            let mut edges = eb.emin().to_vec();
            if let Some(&last) = eb.emax().last() {
                edges.push(last);
            }
            edges
        });
        Self {
            n_channels: store.n_channels(),
            span: [store.span().start(), store.span().stop()],
            dead_time: Some(store.dead_time()),
            energy_edges,
        }
    }
}

/// Build an Arrow [`RecordBatch`] from an [`EventStore`].
pub fn event_store_to_record_batch(store: &EventStore) -> Result<RecordBatch> {
    let meta_json = serde_json::to_string(&DetectorMeta::from_store(store))
        .map_err(|e| Error::Validation(format!("failed to serialize detector metadata: {e}")))?;

    let fields = vec![
        Field::new(TIME_COLUMN, DataType::Float64, false),
        Field::new(CHANNEL_COLUMN, DataType::Int64, false),
    ];
    let metadata = HashMap::from([
        (META_KEY_SCHEMA_VERSION.to_string(), EVENTS_SCHEMA_V1.to_string()),
        (META_KEY_DETECTOR.to_string(), meta_json),
    ]);
    let schema = Arc::new(Schema::new(fields).with_metadata(metadata));

    let channels: Vec<i64> = store.channels().iter().map(|&c| c as i64).collect();
    let arrays: Vec<Arc<dyn Array>> = vec![
        Arc::new(Float64Array::from(store.times().to_vec())),
        Arc::new(Int64Array::from(channels)),
    ];

    RecordBatch::try_new(schema, arrays)
        .map_err(|e| Error::Validation(format!("failed to build RecordBatch: {e}")))
}

/// Rebuild an [`EventStore`] from a record batch written by [`event_store_to_record_batch`].
pub fn event_store_from_record_batch(batch: &RecordBatch) -> Result<EventStore> {
    let schema = batch.schema();
    let meta = schema.metadata();
    if let Some(version) = meta.get(META_KEY_SCHEMA_VERSION)
        && version != EVENTS_SCHEMA_V1
    {
        return Err(Error::Data(format!("unsupported event schema '{version}'")));
    }
    let detector: DetectorMeta = match meta.get(META_KEY_DETECTOR) {
        Some(json) => serde_json::from_str(json)
            .map_err(|e| Error::Data(format!("invalid {META_KEY_DETECTOR} metadata: {e}")))?,
        None => return Err(Error::Data(format!("missing {META_KEY_DETECTOR} metadata"))),
    };

    let times = batch
        .column_by_name(TIME_COLUMN)
        .ok_or_else(|| Error::Data(format!("missing column '{TIME_COLUMN}'")))?;
    if times.data_type() != &DataType::Float64 || times.null_count() > 0 {
        return Err(Error::Data(format!("column '{TIME_COLUMN}' must be non-null Float64")));
    }
    let times = times.as_primitive::<Float64Type>().values().to_vec();

    let channels = batch
        .column_by_name(CHANNEL_COLUMN)
        .ok_or_else(|| Error::Data(format!("missing column '{CHANNEL_COLUMN}'")))?;
    if channels.data_type() != &DataType::Int64 || channels.null_count() > 0 {
        return Err(Error::Data(format!("column '{CHANNEL_COLUMN}' must be non-null Int64")));
    }
    let channels = channels
        .as_primitive::<Int64Type>()
        .values()
        .iter()
        .map(|&c| {
            usize::try_from(c).map_err(|_| Error::Data(format!("negative channel index {c}")))
        })
        .collect::<Result<Vec<usize>>>()?;

    let span = TimeInterval::new(detector.span[0], detector.span[1])
        .map_err(|e| Error::Data(format!("invalid observation span: {e}")))?;
    let mut store = EventStore::from_columns(times, channels, detector.n_channels, Some(span))?;
    if let Some(dt) = detector.dead_time {
        store = store.with_dead_time(dt);
    }
    if let Some(edges) = detector.energy_edges {
        store = store.with_energy_bounds(EnergyBounds::from_edges(&edges)?)?;
    }
    Ok(store)
}

/// Write an [`EventStore`] to a Parquet file.
pub fn write_event_parquet(store: &EventStore, path: &Path) -> Result<()> {
    let batch = event_store_to_record_batch(store)?;
    let file = std::fs::File::create(path)
        .map_err(|e| Error::Validation(format!("failed to create {}: {e}", path.display())))?;
    write_batch(file, &batch)
}

/// Read a Parquet event file into an [`EventStore`].
pub fn read_event_parquet(path: &Path) -> Result<EventStore> {
    let file = std::fs::File::open(path)
        .map_err(|e| Error::Data(format!("failed to open {}: {e}", path.display())))?;
    let batch = read_batches(file)?;
    event_store_from_record_batch(&batch)
}

/// Write one record batch with the crate's default compression.
pub(crate) fn write_batch<W: std::io::Write + Send>(sink: W, batch: &RecordBatch) -> Result<()> {
    let props = parquet::file::properties::WriterProperties::builder()
        .set_compression(parquet::basic::Compression::SNAPPY)
        .build();
    let mut writer = parquet::arrow::ArrowWriter::try_new(sink, batch.schema(), Some(props))
        .map_err(|e| Error::Validation(format!("failed to create Parquet writer: {e}")))?;
    writer.write(batch).map_err(|e| Error::Validation(format!("failed to write Parquet: {e}")))?;
    writer
        .close()
        .map_err(|e| Error::Validation(format!("failed to close Parquet writer: {e}")))?;
    Ok(())
}

/// Read every batch of a Parquet file and merge them under the footer schema.
///
/// The footer schema carries the key-value metadata; the per-batch schema may not.
pub(crate) fn read_batches(file: std::fs::File) -> Result<RecordBatch> {
    let builder = parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder::try_new(file)
        .map_err(|e| Error::Data(format!("failed to read Parquet: {e}")))?;
    let full_schema = builder.schema().clone();
    let reader = builder
        .build()
        .map_err(|e| Error::Data(format!("failed to build Parquet reader: {e}")))?;
    let batches = reader
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Data(format!("failed to read Parquet batches: {e}")))?;
    arrow::compute::concat_batches(&full_schema, &batches)
        .map_err(|e| Error::Data(format!("failed to concat Parquet batches: {e}")))
}
