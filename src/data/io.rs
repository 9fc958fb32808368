//! Event I/O implementations and shared column helpers.
//!
//! Events are stored one per row. Per-event scalars live in plain columns and the track and hit
//! tables live in list columns whose entries must have matching lengths within each row.

use std::{fs::File, sync::Arc};

use arrow::{
    array::{Array, ArrayRef, Float32Array, Float64Array, Int32Array, Int64Array, ListArray},
    datatypes::{DataType, Field, Float64Type, Int32Type, Schema},
    record_batch::RecordBatch,
};
use nalgebra::Vector3;
use parquet::arrow::{
    arrow_reader::{ParquetRecordBatchReader, ParquetRecordBatchReaderBuilder},
    ArrowWriter,
};
use tracing::debug;

use super::{Event, RawHit, Track};
use crate::{expand_path, FlowError, FlowResult};

/// Rows decoded per record batch unless told otherwise.
pub const DEFAULT_BATCH_SIZE: usize = 1024;

const RUN_ID: &str = "run_id";
const EVENT_ID: &str = "event_id";
const VX: &str = "vx";
const VY: &str = "vy";
const VZ: &str = "vz";
const VZ_VPD: &str = "vz_vpd";
const TRIGGER_IDS: &str = "trigger_ids";
const TRACK_PX: &str = "track_px";
const TRACK_PY: &str = "track_py";
const TRACK_PZ: &str = "track_pz";
const TRACK_CHARGE: &str = "track_charge";
const TRACK_N_HITS_FIT: &str = "track_n_hits_fit";
const TRACK_N_HITS_MAX: &str = "track_n_hits_max";
const TRACK_DCA: &str = "track_dca";
const HIT_TILE_ID: &str = "hit_tile_id";
const HIT_NMIP: &str = "hit_nmip";

/// Sequential reader over the events in a Parquet file.
///
/// Record batches are decoded lazily in file order. The first error (unreadable batch, missing
/// column, inconsistent list lengths) is yielded once and ends the iteration.
pub struct EventReader {
    batches: ParquetRecordBatchReader,
    pending: std::vec::IntoIter<Event>,
    n_events: usize,
    failed: bool,
}

impl EventReader {
    /// Open a file with the default batch size.
    pub fn open(file_path: &str) -> FlowResult<Self> {
        Self::open_with_batch_size(file_path, DEFAULT_BATCH_SIZE)
    }

    /// Open a file, decoding `batch_size` rows at a time.
    pub fn open_with_batch_size(file_path: &str, batch_size: usize) -> FlowResult<Self> {
        let path = expand_path(file_path)?;
        let file = File::open(path)?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
        let n_events = builder.metadata().file_metadata().num_rows() as usize;
        let batches = builder.with_batch_size(batch_size.max(1)).build()?;
        Ok(Self {
            batches,
            pending: Vec::new().into_iter(),
            n_events,
            failed: false,
        })
    }

    /// Total number of events in the file.
    pub fn n_events(&self) -> usize {
        self.n_events
    }
}

impl Iterator for EventReader {
    type Item = FlowResult<Event>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.failed {
                return None;
            }
            if let Some(event) = self.pending.next() {
                return Some(Ok(event));
            }
            let decoded = match self.batches.next()? {
                Ok(batch) => events_from_batch(&batch),
                Err(err) => Err(err.into()),
            };
            match decoded {
                Ok(events) => {
                    debug!(rows = events.len(), "decoded record batch");
                    self.pending = events.into_iter();
                }
                Err(err) => {
                    self.failed = true;
                    return Some(Err(err));
                }
            }
        }
    }
}

/// Write events to a Parquet file in batches of `batch_size` rows.
pub fn write_parquet(events: &[Event], file_path: &str, batch_size: usize) -> FlowResult<()> {
    let path = expand_path(file_path)?;
    let schema = Arc::new(event_schema());
    let file = File::create(path)?;
    let mut writer = ArrowWriter::try_new(file, schema.clone(), None)?;
    for chunk in events.chunks(batch_size.max(1)) {
        let batch = events_to_batch(chunk, schema.clone())?;
        writer.write(&batch)?;
    }
    writer.close()?;
    Ok(())
}

/// Decode every row of a record batch into an [`Event`].
pub fn events_from_batch(batch: &RecordBatch) -> FlowResult<Vec<Event>> {
    let run_id = int_column(batch, RUN_ID)?;
    let event_id = int_column(batch, EVENT_ID)?;
    let vx = float_column(batch, VX)?;
    let vy = float_column(batch, VY)?;
    let vz = float_column(batch, VZ)?;
    let vz_vpd = batch
        .column_by_name(VZ_VPD)
        .map(|column| as_float_column(VZ_VPD, column.as_ref()))
        .transpose()?;
    let trigger_ids = list_column(batch, TRIGGER_IDS)?;
    let track_px = list_column(batch, TRACK_PX)?;
    let track_py = list_column(batch, TRACK_PY)?;
    let track_pz = list_column(batch, TRACK_PZ)?;
    let track_charge = list_column(batch, TRACK_CHARGE)?;
    let track_n_hits_fit = list_column(batch, TRACK_N_HITS_FIT)?;
    let track_n_hits_max = list_column(batch, TRACK_N_HITS_MAX)?;
    let track_dca = list_column(batch, TRACK_DCA)?;
    let hit_tile_id = list_column(batch, HIT_TILE_ID)?;
    let hit_nmip = list_column(batch, HIT_NMIP)?;

    (0..batch.num_rows())
        .map(|row| {
            let px = list_floats(track_px, TRACK_PX, row)?;
            let n_tracks = px.len();
            let py = sized(list_floats(track_py, TRACK_PY, row)?, TRACK_PY, n_tracks)?;
            let pz = sized(list_floats(track_pz, TRACK_PZ, row)?, TRACK_PZ, n_tracks)?;
            let charge = sized(
                list_ints(track_charge, TRACK_CHARGE, row)?,
                TRACK_CHARGE,
                n_tracks,
            )?;
            let n_hits_fit = sized(
                list_ints(track_n_hits_fit, TRACK_N_HITS_FIT, row)?,
                TRACK_N_HITS_FIT,
                n_tracks,
            )?;
            let n_hits_max = sized(
                list_ints(track_n_hits_max, TRACK_N_HITS_MAX, row)?,
                TRACK_N_HITS_MAX,
                n_tracks,
            )?;
            let dca = sized(list_floats(track_dca, TRACK_DCA, row)?, TRACK_DCA, n_tracks)?;
            let tracks = (0..n_tracks)
                .map(|i| Track {
                    p: Vector3::new(px[i], py[i], pz[i]),
                    charge: charge[i],
                    // fit-point counts may carry the charge as their sign
                    n_hits_fit: n_hits_fit[i].unsigned_abs(),
                    n_hits_max: n_hits_max[i].unsigned_abs(),
                    dca: dca[i],
                })
                .collect();

            let tile_ids = list_ints(hit_tile_id, HIT_TILE_ID, row)?;
            let nmip = sized(
                list_floats(hit_nmip, HIT_NMIP, row)?,
                HIT_NMIP,
                tile_ids.len(),
            )?;
            let hits = tile_ids
                .iter()
                .zip(&nmip)
                .map(|(tile_id, nmip)| RawHit::new(*tile_id, *nmip))
                .collect();

            Ok(Event {
                run_id: run_id.value(row),
                event_id: event_id.value(row),
                vertex: Vector3::new(vx.value(row), vy.value(row), vz.value(row)),
                vz_vpd: vz_vpd.and_then(|column| column.optional_value(row)),
                trigger_ids: list_ints(trigger_ids, TRIGGER_IDS, row)?,
                tracks,
                hits,
            })
        })
        .collect()
}

fn sized<T>(values: Vec<T>, name: &str, expected: usize) -> FlowResult<Vec<T>> {
    if values.len() != expected {
        return Err(FlowError::LengthMismatch {
            context: format!("List column \"{name}\""),
            expected,
            actual: values.len(),
        });
    }
    Ok(values)
}

#[derive(Clone, Copy)]
enum FloatColumn<'a> {
    F32(&'a Float32Array),
    F64(&'a Float64Array),
}

impl FloatColumn<'_> {
    fn value(&self, row: usize) -> f64 {
        match self {
            Self::F32(array) => array.value(row) as f64,
            Self::F64(array) => array.value(row),
        }
    }

    fn optional_value(&self, row: usize) -> Option<f64> {
        let is_null = match self {
            Self::F32(array) => array.is_null(row),
            Self::F64(array) => array.is_null(row),
        };
        if is_null {
            None
        } else {
            Some(self.value(row))
        }
    }
}

#[derive(Clone, Copy)]
enum IntColumn<'a> {
    I32(&'a Int32Array),
    I64(&'a Int64Array),
}

impl IntColumn<'_> {
    fn value(&self, row: usize) -> i64 {
        match self {
            Self::I32(array) => array.value(row) as i64,
            Self::I64(array) => array.value(row),
        }
    }
}

fn invalid_type(name: &str, array: &dyn Array) -> FlowError {
    FlowError::InvalidColumnType {
        name: name.to_string(),
        datatype: array.data_type().to_string(),
    }
}

fn required_column<'a>(batch: &'a RecordBatch, name: &str) -> FlowResult<&'a ArrayRef> {
    batch
        .column_by_name(name)
        .ok_or_else(|| FlowError::MissingColumn {
            name: name.to_string(),
        })
}

fn as_float_column<'a>(name: &str, array: &'a dyn Array) -> FlowResult<FloatColumn<'a>> {
    match array.data_type() {
        DataType::Float32 => array
            .as_any()
            .downcast_ref::<Float32Array>()
            .map(FloatColumn::F32)
            .ok_or_else(|| invalid_type(name, array)),
        DataType::Float64 => array
            .as_any()
            .downcast_ref::<Float64Array>()
            .map(FloatColumn::F64)
            .ok_or_else(|| invalid_type(name, array)),
        _ => Err(invalid_type(name, array)),
    }
}

fn as_int_column<'a>(name: &str, array: &'a dyn Array) -> FlowResult<IntColumn<'a>> {
    match array.data_type() {
        DataType::Int32 => array
            .as_any()
            .downcast_ref::<Int32Array>()
            .map(IntColumn::I32)
            .ok_or_else(|| invalid_type(name, array)),
        DataType::Int64 => array
            .as_any()
            .downcast_ref::<Int64Array>()
            .map(IntColumn::I64)
            .ok_or_else(|| invalid_type(name, array)),
        _ => Err(invalid_type(name, array)),
    }
}

fn float_column<'a>(batch: &'a RecordBatch, name: &str) -> FlowResult<FloatColumn<'a>> {
    as_float_column(name, required_column(batch, name)?.as_ref())
}

fn int_column<'a>(batch: &'a RecordBatch, name: &str) -> FlowResult<IntColumn<'a>> {
    as_int_column(name, required_column(batch, name)?.as_ref())
}

fn list_column<'a>(batch: &'a RecordBatch, name: &str) -> FlowResult<&'a ListArray> {
    let column = required_column(batch, name)?;
    column
        .as_any()
        .downcast_ref::<ListArray>()
        .ok_or_else(|| invalid_type(name, column.as_ref()))
}

fn list_floats(list: &ListArray, name: &str, row: usize) -> FlowResult<Vec<f64>> {
    if list.is_null(row) {
        return Ok(Vec::new());
    }
    let values = list.value(row);
    let column = as_float_column(name, values.as_ref())?;
    Ok((0..values.len()).map(|i| column.value(i)).collect())
}

fn list_ints(list: &ListArray, name: &str, row: usize) -> FlowResult<Vec<i32>> {
    if list.is_null(row) {
        return Ok(Vec::new());
    }
    let values = list.value(row);
    let column = as_int_column(name, values.as_ref())?;
    (0..values.len())
        .map(|i| {
            let value = column.value(i);
            i32::try_from(value).map_err(|_| FlowError::ValueOutOfRange {
                name: name.to_string(),
                value,
            })
        })
        .collect()
}

fn list_of(data_type: DataType) -> DataType {
    DataType::List(Arc::new(Field::new("item", data_type, true)))
}

fn event_schema() -> Schema {
    Schema::new(vec![
        Field::new(RUN_ID, DataType::Int64, false),
        Field::new(EVENT_ID, DataType::Int64, false),
        Field::new(VX, DataType::Float64, false),
        Field::new(VY, DataType::Float64, false),
        Field::new(VZ, DataType::Float64, false),
        Field::new(VZ_VPD, DataType::Float64, true),
        Field::new(TRIGGER_IDS, list_of(DataType::Int32), false),
        Field::new(TRACK_PX, list_of(DataType::Float64), false),
        Field::new(TRACK_PY, list_of(DataType::Float64), false),
        Field::new(TRACK_PZ, list_of(DataType::Float64), false),
        Field::new(TRACK_CHARGE, list_of(DataType::Int32), false),
        Field::new(TRACK_N_HITS_FIT, list_of(DataType::Int32), false),
        Field::new(TRACK_N_HITS_MAX, list_of(DataType::Int32), false),
        Field::new(TRACK_DCA, list_of(DataType::Float64), false),
        Field::new(HIT_TILE_ID, list_of(DataType::Int32), false),
        Field::new(HIT_NMIP, list_of(DataType::Float64), false),
    ])
}

fn float_lists<F>(events: &[Event], values: F) -> ArrayRef
where
    F: Fn(&Event) -> Vec<f64>,
{
    Arc::new(ListArray::from_iter_primitive::<Float64Type, _, _>(
        events
            .iter()
            .map(|event| Some(values(event).into_iter().map(Some).collect::<Vec<_>>())),
    ))
}

fn int_lists<F>(events: &[Event], values: F) -> ArrayRef
where
    F: Fn(&Event) -> Vec<i32>,
{
    Arc::new(ListArray::from_iter_primitive::<Int32Type, _, _>(
        events
            .iter()
            .map(|event| Some(values(event).into_iter().map(Some).collect::<Vec<_>>())),
    ))
}

fn events_to_batch(events: &[Event], schema: Arc<Schema>) -> FlowResult<RecordBatch> {
    let columns: Vec<ArrayRef> = vec![
        Arc::new(Int64Array::from(
            events.iter().map(|e| e.run_id).collect::<Vec<_>>(),
        )),
        Arc::new(Int64Array::from(
            events.iter().map(|e| e.event_id).collect::<Vec<_>>(),
        )),
        Arc::new(Float64Array::from(
            events.iter().map(|e| e.vertex.x).collect::<Vec<_>>(),
        )),
        Arc::new(Float64Array::from(
            events.iter().map(|e| e.vertex.y).collect::<Vec<_>>(),
        )),
        Arc::new(Float64Array::from(
            events.iter().map(|e| e.vertex.z).collect::<Vec<_>>(),
        )),
        Arc::new(Float64Array::from(
            events.iter().map(|e| e.vz_vpd).collect::<Vec<_>>(),
        )),
        int_lists(events, |e| e.trigger_ids.clone()),
        float_lists(events, |e| e.tracks.iter().map(|t| t.p.x).collect()),
        float_lists(events, |e| e.tracks.iter().map(|t| t.p.y).collect()),
        float_lists(events, |e| e.tracks.iter().map(|t| t.p.z).collect()),
        int_lists(events, |e| e.tracks.iter().map(|t| t.charge).collect()),
        int_lists(events, |e| {
            e.tracks.iter().map(|t| t.n_hits_fit as i32).collect()
        }),
        int_lists(events, |e| {
            e.tracks.iter().map(|t| t.n_hits_max as i32).collect()
        }),
        float_lists(events, |e| e.tracks.iter().map(|t| t.dca).collect()),
        int_lists(events, |e| e.hits.iter().map(|h| h.tile_id).collect()),
        float_lists(events, |e| e.hits.iter().map(|h| h.nmip).collect()),
    ];
    Ok(RecordBatch::try_new(schema, columns)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{data::test_event, tests::temp_path};
    use arrow::datatypes::Int64Type;

    fn sample_events() -> Vec<Event> {
        let mut second = test_event();
        second.event_id = 2;
        second.vz_vpd = Some(199.1);
        second.tracks.clear();
        second.hits.truncate(2);
        let mut third = test_event();
        third.event_id = 3;
        third.trigger_ids = vec![1, 2, 3];
        vec![test_event(), second, third]
    }

    #[test]
    fn test_write_then_read_events() {
        let events = sample_events();
        let path = temp_path("events.parquet");
        let path_str = path.to_str().unwrap();
        write_parquet(&events, path_str, 2).unwrap();
        let reader = EventReader::open_with_batch_size(path_str, 2).unwrap();
        assert_eq!(reader.n_events(), 3);
        let loaded = reader.collect::<FlowResult<Vec<_>>>().unwrap();
        assert_eq!(loaded, events);
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_empty_file_has_no_events() {
        let path = temp_path("empty.parquet");
        let path_str = path.to_str().unwrap();
        write_parquet(&[], path_str, 10).unwrap();
        let mut reader = EventReader::open(path_str).unwrap();
        assert_eq!(reader.n_events(), 0);
        assert!(reader.next().is_none());
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_missing_column_is_fatal() {
        let batch = RecordBatch::try_from_iter(vec![(
            RUN_ID,
            Arc::new(Int64Array::from(vec![1_i64, 2])) as ArrayRef,
        )])
        .unwrap();
        let path = temp_path("partial.parquet");
        let file = File::create(&path).unwrap();
        let mut writer = ArrowWriter::try_new(file, batch.schema(), None).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();

        let mut reader = EventReader::open(path.to_str().unwrap()).unwrap();
        assert!(matches!(
            reader.next(),
            Some(Err(FlowError::MissingColumn { name })) if name == EVENT_ID
        ));
        assert!(reader.next().is_none());
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_mismatched_track_lists_are_rejected() {
        let events = sample_events();
        let schema = Arc::new(event_schema());
        let batch = events_to_batch(&events, schema.clone()).unwrap();
        let mut columns = batch.columns().to_vec();
        let py_index = schema.index_of(TRACK_PY).unwrap();
        columns[py_index] = float_lists(&events, |_| vec![0.0]);
        let broken = RecordBatch::try_new(schema, columns).unwrap();
        assert!(matches!(
            events_from_batch(&broken),
            Err(FlowError::LengthMismatch { expected: 4, actual: 1, .. })
        ));
    }

    #[test]
    fn test_wrong_column_type_is_rejected() {
        let events = sample_events();
        let schema = Arc::new(event_schema());
        let batch = events_to_batch(&events, schema.clone()).unwrap();
        let mut columns = batch.columns().to_vec();
        let mut fields = schema.fields().iter().cloned().collect::<Vec<_>>();
        let vx_index = schema.index_of(VX).unwrap();
        columns[vx_index] = Arc::new(Int32Array::from(vec![0, 0, 0]));
        fields[vx_index] = Arc::new(Field::new(VX, DataType::Int32, false));
        let broken = RecordBatch::try_new(Arc::new(Schema::new(fields)), columns).unwrap();
        assert!(matches!(
            events_from_batch(&broken),
            Err(FlowError::InvalidColumnType { name, .. }) if name == VX
        ));
    }

    #[test]
    fn test_wide_tile_ids_are_not_truncated() {
        let events = sample_events();
        let schema = Arc::new(event_schema());
        let batch = events_to_batch(&events, schema.clone()).unwrap();
        let mut columns = batch.columns().to_vec();
        let mut fields = schema.fields().iter().cloned().collect::<Vec<_>>();
        let tile_index = schema.index_of(HIT_TILE_ID).unwrap();
        // 2^32 + 101 would wrap to the valid tile 101 if narrowed with `as`
        let wide = 4_294_967_397_i64;
        columns[tile_index] = Arc::new(ListArray::from_iter_primitive::<Int64Type, _, _>(
            events.iter().map(|event| {
                Some(
                    event
                        .hits
                        .iter()
                        .map(|hit| Some(if hit.tile_id == -101 { wide } else { hit.tile_id as i64 }))
                        .collect::<Vec<_>>(),
                )
            }),
        ));
        fields[tile_index] = Arc::new(Field::new(HIT_TILE_ID, list_of(DataType::Int64), false));
        let broken = RecordBatch::try_new(Arc::new(Schema::new(fields)), columns).unwrap();
        assert!(matches!(
            events_from_batch(&broken),
            Err(FlowError::ValueOutOfRange { name, value }) if name == HIT_TILE_ID && value == wide
        ));
    }

    #[test]
    fn test_int64_lists_within_range_are_accepted() {
        let events = sample_events();
        let schema = Arc::new(event_schema());
        let batch = events_to_batch(&events, schema.clone()).unwrap();
        let mut columns = batch.columns().to_vec();
        let mut fields = schema.fields().iter().cloned().collect::<Vec<_>>();
        let trigger_index = schema.index_of(TRIGGER_IDS).unwrap();
        columns[trigger_index] = Arc::new(ListArray::from_iter_primitive::<Int64Type, _, _>(
            events.iter().map(|event| {
                Some(
                    event
                        .trigger_ids
                        .iter()
                        .map(|id| Some(*id as i64))
                        .collect::<Vec<_>>(),
                )
            }),
        ));
        fields[trigger_index] = Arc::new(Field::new(TRIGGER_IDS, list_of(DataType::Int64), false));
        let widened = RecordBatch::try_new(Arc::new(Schema::new(fields)), columns).unwrap();
        assert_eq!(events_from_batch(&widened).unwrap(), events);
    }
}
