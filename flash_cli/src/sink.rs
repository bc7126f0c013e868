//! File sinks for experiment records.
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use eyre::WrapErr;
use flash_core::{ExperimentRecord, RecordSink};
use serde::Serialize;

use crate::cli::RecordFormat;

/// One record as written to disk. Invalid readings are empty (CSV) or null (JSONL).
#[derive(Debug, Serialize)]
struct Row {
    experiment: u64,
    tick: u64,
    t_s: f64,
    voltage_v: Option<f64>,
    current_a: Option<f64>,
    temperature_c: Option<f64>,
    commanded_v: f64,
    state: &'static str,
}

impl From<&ExperimentRecord> for Row {
    fn from(r: &ExperimentRecord) -> Self {
        Self {
            experiment: r.experiment,
            tick: r.tick,
            t_s: r.timestamp.as_secs_f64(),
            voltage_v: r.voltage,
            current_a: r.current,
            temperature_c: r.temperature,
            commanded_v: r.commanded_voltage,
            state: r.state.as_str(),
        }
    }
}

pub struct CsvSink<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> CsvSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(out),
        }
    }
}

impl<W: Write> RecordSink for CsvSink<W> {
    fn write(&mut self, record: &ExperimentRecord) -> eyre::Result<()> {
        self.writer
            .serialize(Row::from(record))
            .wrap_err("failed to write CSV record")
    }

    fn flush(&mut self) -> eyre::Result<()> {
        self.writer.flush().wrap_err("failed to flush CSV records")
    }
}

/// One JSON object per line.
pub struct JsonlSink<W: Write> {
    out: BufWriter<W>,
}

impl<W: Write> JsonlSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: BufWriter::new(out),
        }
    }
}

impl<W: Write> RecordSink for JsonlSink<W> {
    fn write(&mut self, record: &ExperimentRecord) -> eyre::Result<()> {
        serde_json::to_writer(&mut self.out, &Row::from(record))?;
        self.out.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&mut self) -> eyre::Result<()> {
        self.out.flush().wrap_err("failed to flush JSONL records")
    }
}

/// Create (truncating) the record file at `path`.
pub fn open_sink(path: &Path, format: RecordFormat) -> eyre::Result<Box<dyn RecordSink + Send>> {
    let file = File::create(path)
        .wrap_err_with(|| format!("failed to create record file {}", path.display()))?;
    Ok(match format {
        RecordFormat::Csv => Box::new(CsvSink::new(file)),
        RecordFormat::Jsonl => Box::new(JsonlSink::new(file)),
    })
}
