//! Analytics recording and export for llmbot.
//!
//! Every user action becomes an [`EventRecord`] written to two sinks: an
//! append-only CSV log and a PostgreSQL table. A background [`ExportJob`]
//! periodically turns the CSV log into an XLSX workbook and uploads it to
//! Yandex Disk, driven by the [`Scheduler`].

pub mod append_log;
pub mod error;
pub mod export;
pub mod record;
pub mod recorder;
pub mod relational;
pub mod scheduler;
pub mod sink;
pub mod spreadsheet;
pub mod storage;

pub use append_log::{AppendLogSink, LogTable};
pub use error::{ExportError, SinkError};
pub use export::{ExportJob, ExportOutcome};
pub use record::{Action, EventRecord, Interaction};
pub use recorder::AnalyticsRecorder;
pub use relational::RelationalSink;
pub use scheduler::{ScheduledJob, Scheduler};
pub use sink::EventSink;
pub use storage::{RemoteStorage, YandexDiskClient};
