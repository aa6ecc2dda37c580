//! Per-event measurement log
//!
//! Every sensor read the controller makes becomes one [`LogRecord`]: what kind
//! of read it was, which channel it concerned, the measured state, its
//! distance to the target, the step size in force, the four accepted codes
//! and how long the read took. Trial reads carry the accepted codes too; the
//! trial code is `code ± step` on the record's channel.
//!
//! Sinks implement [`MeasurementLog`]. Sink failures are reported back to the
//! controller, which logs and otherwise ignores them.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use hardware::Measurement;
use serde::{Deserialize, Serialize};

use crate::config::Target;
use crate::error::LogError;

/// CSV column names, in order.
pub const CSV_HEADER: [&str; 16] = [
    "event",
    "channel",
    "time",
    "target_dop",
    "target_psi",
    "target_chi",
    "curr_dop",
    "curr_psi",
    "curr_chi",
    "distance",
    "step_codes",
    "c1",
    "c2",
    "c3",
    "c4",
    "read_latency_us",
];

/// Kind of read a record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// First read after writing the initial codes
    Init,
    /// Start-of-round reference read
    Baseline,
    /// Read with one channel at `code + step`
    #[serde(rename = "probe_plus")]
    TrialPlus,
    /// Read with one channel at `code - step`
    #[serde(rename = "probe_minus")]
    TrialMinus,
    /// Refresh read after committing `code + step`
    AcceptPlus,
    /// Refresh read after committing `code - step`
    AcceptMinus,
    /// Authoritative end-of-round read
    RoundEval,
    /// Read taken once the round budget is exhausted
    FinalRead,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Init => "init",
            EventKind::Baseline => "baseline",
            EventKind::TrialPlus => "probe_plus",
            EventKind::TrialMinus => "probe_minus",
            EventKind::AcceptPlus => "accept_plus",
            EventKind::AcceptMinus => "accept_minus",
            EventKind::RoundEval => "round_eval",
            EventKind::FinalRead => "final_read",
        }
    }

    pub fn is_trial(self) -> bool {
        matches!(self, EventKind::TrialPlus | EventKind::TrialMinus)
    }

    pub fn is_accept(self) -> bool {
        matches!(self, EventKind::AcceptPlus | EventKind::AcceptMinus)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One logged sensor read
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub event: EventKind,
    /// Channel number 1-4, or 0 for events concerning all channels
    pub channel: u8,
    pub timestamp: DateTime<Local>,
    pub target: Target,
    pub measured: Measurement,
    /// Angular distance to the target (degrees)
    pub distance_deg: f64,
    /// Step size in force, 0 before the first round
    pub step_size: u16,
    /// Accepted codes at the time of the read
    pub codes: [u16; 4],
    /// Wall time of the sensor read (microseconds)
    pub read_latency_us: f64,
}

impl LogRecord {
    /// Format as CSV fields matching [`CSV_HEADER`].
    pub fn csv_fields(&self) -> [String; 16] {
        [
            self.event.to_string(),
            self.channel.to_string(),
            self.timestamp
                .format("%Y-%m-%dT%H:%M:%S%.6f")
                .to_string(),
            format!("{:.6}", self.target.dop.unwrap_or(f64::NAN)),
            format!("{:.3}", self.target.azimuth_deg),
            format!("{:.3}", self.target.ellipticity_deg),
            format!("{:.6}", self.measured.dop),
            format!("{:.3}", self.measured.azimuth_deg),
            format!("{:.3}", self.measured.ellipticity_deg),
            format!("{:.6}", self.distance_deg),
            self.step_size.to_string(),
            self.codes[0].to_string(),
            self.codes[1].to_string(),
            self.codes[2].to_string(),
            self.codes[3].to_string(),
            format!("{:.1}", self.read_latency_us),
        ]
    }
}

/// Append-only sink for measurement records.
pub trait MeasurementLog {
    /// Append one record. Order of calls is preserved.
    fn append(&mut self, record: &LogRecord) -> Result<(), LogError>;

    /// Discard everything logged so far.
    fn reset(&mut self) -> Result<(), LogError>;
}

impl<L: MeasurementLog + ?Sized> MeasurementLog for &mut L {
    fn append(&mut self, record: &LogRecord) -> Result<(), LogError> {
        (**self).append(record)
    }

    fn reset(&mut self) -> Result<(), LogError> {
        (**self).reset()
    }
}

impl<L: MeasurementLog + ?Sized> MeasurementLog for Box<L> {
    fn append(&mut self, record: &LogRecord) -> Result<(), LogError> {
        (**self).append(record)
    }

    fn reset(&mut self) -> Result<(), LogError> {
        (**self).reset()
    }
}

/// Log that discards every record
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLog;

impl MeasurementLog for NullLog {
    fn append(&mut self, _record: &LogRecord) -> Result<(), LogError> {
        Ok(())
    }

    fn reset(&mut self) -> Result<(), LogError> {
        Ok(())
    }
}

/// In-memory log
#[derive(Debug, Default, Clone)]
pub struct MemoryLog {
    records: Vec<LogRecord>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[LogRecord] {
        &self.records
    }

    /// Number of records of the given kind.
    pub fn count(&self, event: EventKind) -> usize {
        self.records.iter().filter(|r| r.event == event).count()
    }

    /// Event kinds in logged order.
    pub fn events(&self) -> Vec<EventKind> {
        self.records.iter().map(|r| r.event).collect()
    }
}

impl MeasurementLog for MemoryLog {
    fn append(&mut self, record: &LogRecord) -> Result<(), LogError> {
        self.records.push(record.clone());
        Ok(())
    }

    fn reset(&mut self) -> Result<(), LogError> {
        self.records.clear();
        Ok(())
    }
}

/// CSV file log, flushed after every record
pub struct CsvMeasurementLog {
    path: PathBuf,
    writer: csv::Writer<File>,
}

impl CsvMeasurementLog {
    /// Open a log for appending, writing the header if the file is new or empty.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, LogError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let is_empty = file.metadata()?.len() == 0;

        let mut log = Self {
            path,
            writer: csv::Writer::from_writer(file),
        };
        if is_empty {
            log.write_header()?;
        }
        Ok(log)
    }

    fn write_header(&mut self) -> Result<(), LogError> {
        self.writer.write_record(CSV_HEADER)?;
        self.writer.flush()?;
        Ok(())
    }
}

impl MeasurementLog for CsvMeasurementLog {
    fn append(&mut self, record: &LogRecord) -> Result<(), LogError> {
        self.writer.write_record(record.csv_fields())?;
        self.writer.flush()?;
        Ok(())
    }

    fn reset(&mut self) -> Result<(), LogError> {
        self.writer.flush()?;
        let file = File::create(&self.path)?;
        self.writer = csv::Writer::from_writer(file);
        self.write_header()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(event: EventKind, channel: u8) -> LogRecord {
        LogRecord {
            event,
            channel,
            timestamp: Local::now(),
            target: Target::new(10.0, -5.0),
            measured: Measurement::new(0.987654321, 12.34567, -4.5),
            distance_deg: 2.5,
            step_size: 64,
            codes: [2048, 2112, 1984, 2048],
            read_latency_us: 1234.56,
        }
    }

    #[test]
    fn test_event_names() {
        assert_eq!(EventKind::TrialPlus.to_string(), "probe_plus");
        assert_eq!(EventKind::AcceptMinus.as_str(), "accept_minus");
        assert!(EventKind::TrialMinus.is_trial());
        assert!(!EventKind::Baseline.is_trial());
        assert!(EventKind::AcceptPlus.is_accept());
        assert_eq!(
            serde_json::to_string(&EventKind::RoundEval).unwrap(),
            "\"round_eval\""
        );
        assert_eq!(
            serde_json::to_string(&EventKind::TrialMinus).unwrap(),
            "\"probe_minus\""
        );
    }

    #[test]
    fn test_csv_fields_formatting() {
        let fields = record(EventKind::TrialMinus, 3).csv_fields();
        assert_eq!(fields[0], "probe_minus");
        assert_eq!(fields[1], "3");
        assert_eq!(fields[3], "NaN");
        assert_eq!(fields[4], "10.000");
        assert_eq!(fields[5], "-5.000");
        assert_eq!(fields[6], "0.987654");
        assert_eq!(fields[7], "12.346");
        assert_eq!(fields[9], "2.500000");
        assert_eq!(fields[10], "64");
        assert_eq!(&fields[11..15], &["2048", "2112", "1984", "2048"]);
        assert_eq!(fields[15], "1234.6");
    }

    #[test]
    fn test_memory_log_counts() {
        let mut log = MemoryLog::new();
        log.append(&record(EventKind::Baseline, 0)).unwrap();
        log.append(&record(EventKind::TrialPlus, 1)).unwrap();
        log.append(&record(EventKind::TrialMinus, 1)).unwrap();
        assert_eq!(log.count(EventKind::TrialPlus), 1);
        assert_eq!(
            log.events(),
            vec![
                EventKind::Baseline,
                EventKind::TrialPlus,
                EventKind::TrialMinus
            ]
        );

        log.reset().unwrap();
        assert!(log.records().is_empty());
    }

    #[test]
    fn test_csv_log_appends_and_resets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.csv");

        {
            let mut log = CsvMeasurementLog::create(&path).unwrap();
            log.append(&record(EventKind::Baseline, 0)).unwrap();
            log.append(&record(EventKind::TrialPlus, 1)).unwrap();
        }

        // Reopening appends without repeating the header
        let mut log = CsvMeasurementLog::create(&path).unwrap();
        log.append(&record(EventKind::RoundEval, 0)).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(headers.iter().collect::<Vec<_>>(), CSV_HEADER.to_vec());
        let events: Vec<String> = reader
            .records()
            .map(|r| r.unwrap()[0].to_string())
            .collect();
        assert_eq!(events, vec!["baseline", "probe_plus", "round_eval"]);

        log.reset().unwrap();
        log.append(&record(EventKind::Init, 0)).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(&rows[0][0], "init");
        assert_eq!(rows[0].len(), CSV_HEADER.len());
    }
}
