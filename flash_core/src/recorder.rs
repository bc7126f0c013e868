//! Non-blocking hand-off of experiment records to a persistence sink.
//!
//! Each experiment gets its own bounded stream. The control side only ever
//! `try_send`s; when the stream is full the oldest record is evicted and
//! counted. A `RecordStream` yields the experiment's records in order and
//! ends once the experiment has ended and the buffer is drained.
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crossbeam_channel as xch;

use crate::types::ExperimentRecord;

/// Consumer of the record stream (file writer, database, plot feed).
pub trait RecordSink {
    fn write(&mut self, record: &ExperimentRecord) -> eyre::Result<()>;

    fn flush(&mut self) -> eyre::Result<()> {
        Ok(())
    }
}

struct ActiveStream {
    experiment: u64,
    tx: xch::Sender<ExperimentRecord>,
    // Producer-side receiver used to evict the oldest entry when full.
    evict: xch::Receiver<ExperimentRecord>,
    dropped: Arc<AtomicU64>,
}

/// Producer half, owned by the control task.
pub struct DataRecorder {
    capacity: usize,
    streams: xch::Sender<RecordStream>,
    active: Option<ActiveStream>,
}

impl std::fmt::Debug for DataRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataRecorder")
            .field("capacity", &self.capacity)
            .field("experiment", &self.active.as_ref().map(|a| a.experiment))
            .field("dropped", &self.dropped())
            .finish()
    }
}

impl DataRecorder {
    pub fn new(capacity: usize) -> (Self, RecorderHandle) {
        let (streams_tx, streams_rx) = xch::unbounded();
        (
            Self {
                capacity: capacity.max(1),
                streams: streams_tx,
                active: None,
            },
            RecorderHandle { streams: streams_rx },
        )
    }

    /// Open the stream for a new experiment, closing any previous one.
    pub fn begin(&mut self, experiment: u64) {
        self.finish();
        let (tx, rx) = xch::bounded(self.capacity);
        let dropped = Arc::new(AtomicU64::new(0));
        let stream = RecordStream {
            experiment,
            rx: rx.clone(),
            dropped: dropped.clone(),
        };
        if self.streams.send(stream).is_err() {
            tracing::debug!(experiment, "no record consumer attached");
        }
        self.active = Some(ActiveStream {
            experiment,
            tx,
            evict: rx,
            dropped,
        });
    }

    /// Append without blocking; evicts the oldest record when full.
    pub fn push(&self, record: ExperimentRecord) {
        let Some(active) = &self.active else {
            return;
        };
        let mut record = record;
        loop {
            match active.tx.try_send(record) {
                Ok(()) => return,
                Err(xch::TrySendError::Full(r)) => {
                    if active.evict.try_recv().is_ok() {
                        active.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                    record = r;
                }
                Err(xch::TrySendError::Disconnected(_)) => return,
            }
        }
    }

    /// End the current experiment's stream; readers see the end after draining.
    pub fn finish(&mut self) {
        if let Some(active) = self.active.take() {
            tracing::debug!(
                experiment = active.experiment,
                dropped = active.dropped.load(Ordering::Relaxed),
                "record stream closed"
            );
        }
    }

    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    /// Records evicted from the current stream.
    pub fn dropped(&self) -> u64 {
        self.active
            .as_ref()
            .map_or(0, |a| a.dropped.load(Ordering::Relaxed))
    }
}

/// Consumer half: hands out one `RecordStream` per experiment.
#[derive(Debug, Clone)]
pub struct RecorderHandle {
    streams: xch::Receiver<RecordStream>,
}

impl RecorderHandle {
    /// Block until the next experiment starts; `None` once the recorder is gone.
    pub fn next_stream(&self) -> Option<RecordStream> {
        self.streams.recv().ok()
    }

    pub fn next_stream_timeout(&self, timeout: Duration) -> Option<RecordStream> {
        self.streams.recv_timeout(timeout).ok()
    }

    /// Every experiment's stream, in order, until the recorder is dropped.
    pub fn streams(&self) -> impl Iterator<Item = RecordStream> + '_ {
        self.streams.iter()
    }

    /// Copy every record of every experiment into `sink`. Returns the number
    /// of records written and the number evicted before they could be read.
    pub fn drain_into(&self, sink: &mut dyn RecordSink) -> eyre::Result<(u64, u64)> {
        let mut written = 0;
        let mut dropped = 0;
        for stream in self.streams() {
            let (w, d) = stream.drain_into(sink)?;
            written += w;
            dropped += d;
        }
        Ok((written, dropped))
    }
}

/// Ordered, finite records of one experiment.
#[derive(Debug, Clone)]
pub struct RecordStream {
    experiment: u64,
    rx: xch::Receiver<ExperimentRecord>,
    dropped: Arc<AtomicU64>,
}

impl RecordStream {
    pub fn experiment(&self) -> u64 {
        self.experiment
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Next record if one is buffered right now.
    pub fn try_next(&self) -> Option<ExperimentRecord> {
        self.rx.try_recv().ok()
    }

    pub fn drain_into(self, sink: &mut dyn RecordSink) -> eyre::Result<(u64, u64)> {
        let mut written = 0;
        for record in self.rx.iter() {
            sink.write(&record)?;
            written += 1;
        }
        sink.flush()?;
        Ok((written, self.dropped()))
    }
}

impl Iterator for RecordStream {
    type Item = ExperimentRecord;

    /// Blocks until a record arrives or the experiment's stream is closed.
    fn next(&mut self) -> Option<ExperimentRecord> {
        self.rx.recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProcessState;

    fn rec(experiment: u64, tick: u64) -> ExperimentRecord {
        ExperimentRecord {
            experiment,
            tick,
            timestamp: Duration::from_millis(tick * 50),
            voltage: Some(1.0),
            current: None,
            temperature: Some(25.0),
            commanded_voltage: 1.0,
            state: ProcessState::Ramping,
        }
    }

    #[test]
    fn push_without_experiment_is_ignored() {
        let (recorder, handle) = DataRecorder::new(4);
        recorder.push(rec(0, 0));
        drop(recorder);
        assert!(handle.next_stream().is_none());
    }

    #[test]
    fn full_buffer_evicts_oldest_and_counts() {
        let (mut r, handle) = DataRecorder::new(3);
        r.begin(1);
        for t in 0..5 {
            r.push(rec(1, t));
        }
        assert_eq!(r.dropped(), 2);
        r.finish();
        let stream = handle.next_stream().expect("stream");
        assert_eq!(stream.dropped(), 2);
        let ticks: Vec<u64> = stream.map(|x| x.tick).collect();
        assert_eq!(ticks, vec![2, 3, 4]);
    }
}
