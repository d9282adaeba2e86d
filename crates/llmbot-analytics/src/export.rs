//! Periodic export of the analytics log to remote storage.
//!
//! Every run converts the whole log (not just rows added since the last run)
//! into an XLSX workbook and replaces the previous upload at a fixed path.

use async_trait::async_trait;
use llmbot_core::config::ExportConfig;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::append_log::AppendLogSink;
use crate::error::ExportError;
use crate::scheduler::ScheduledJob;
use crate::spreadsheet;
use crate::storage::RemoteStorage;

/// Result of a run that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutcome {
    /// No log file yet, or no remote storage configured.
    Skipped,
    Uploaded { rows: usize, destination: String },
}

pub struct ExportJob {
    log: Arc<AppendLogSink>,
    storage: Option<Arc<dyn RemoteStorage>>,
    folder: String,
    destination: String,
    temp_dir: PathBuf,
}

impl ExportJob {
    /// `storage` is `None` when no credentials are configured; every run is then a no-op.
    pub fn new(
        log: Arc<AppendLogSink>,
        storage: Option<Arc<dyn RemoteStorage>>,
        config: &ExportConfig,
    ) -> Self {
        Self {
            log,
            storage,
            folder: format!("/{}", config.folder.trim_matches('/')),
            destination: config.destination(),
            temp_dir: std::env::temp_dir(),
        }
    }

    /// Directory the temporary artifact is written to.
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = dir.into();
        self
    }

    /// Run once, logging instead of returning errors. `None` means the run failed.
    pub async fn run(&self) -> Option<ExportOutcome> {
        match self.try_run().await {
            Ok(ExportOutcome::Skipped) => {
                debug!("Export skipped: no analytics log or no storage token");
                Some(ExportOutcome::Skipped)
            }
            Ok(ExportOutcome::Uploaded { rows, destination }) => {
                info!(rows, destination = %destination, "Analytics exported");
                Some(ExportOutcome::Uploaded { rows, destination })
            }
            Err(e) => {
                error!(error = %e, "Analytics export failed");
                None
            }
        }
    }

    /// Run once, returning the first failure.
    ///
    /// The temporary artifact is removed on every path out of this function.
    pub async fn try_run(&self) -> Result<ExportOutcome, ExportError> {
        let Some(storage) = &self.storage else {
            return Ok(ExportOutcome::Skipped);
        };
        if !self.log.exists() {
            return Ok(ExportOutcome::Skipped);
        }

        let log = self.log.clone();
        let temp_dir = self.temp_dir.clone();
        let (table, artifact) = tokio::task::spawn_blocking(move || {
            let table = log.read_all()?;
            let artifact = tempfile::Builder::new()
                .prefix("analytics-")
                .suffix(".xlsx")
                .tempfile_in(&temp_dir)?;
            spreadsheet::write_workbook(&table, artifact.path())?;
            Ok::<_, ExportError>((table, artifact))
        })
        .await??;
        if table.is_empty() {
            debug!("Analytics log has a header but no rows");
        }
        debug!(rows = table.len(), path = %artifact.path().display(), "Workbook written");

        if !storage.check_token().await? {
            return Err(ExportError::InvalidToken);
        }
        if !storage.exists(&self.folder).await? {
            storage.mkdir(&self.folder).await?;
        }
        storage
            .upload(artifact.path(), &self.destination, true)
            .await?;

        artifact.close()?;
        Ok(ExportOutcome::Uploaded {
            rows: table.len(),
            destination: self.destination.clone(),
        })
    }
}

#[async_trait]
impl ScheduledJob for ExportJob {
    fn name(&self) -> &str {
        "analytics-export"
    }

    async fn execute(&self) {
        self.run().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{EventRecord, Interaction};
    use crate::sink::EventSink;
    use calamine::{Data, Range, Reader, Xlsx};
    use chrono::Utc;
    use llmbot_core::UserId;
    use std::collections::HashSet;
    use std::path::Path;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeDisk {
        invalid_token: bool,
        fail_check: bool,
        fail_mkdir: bool,
        fail_upload: bool,
        folders: Mutex<HashSet<String>>,
        mkdirs: Mutex<Vec<String>>,
        uploads: Mutex<Vec<(PathBuf, String, Vec<u8>)>>,
    }

    impl FakeDisk {
        fn uploads(&self) -> Vec<(PathBuf, String, Vec<u8>)> {
            self.uploads.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RemoteStorage for FakeDisk {
        async fn check_token(&self) -> Result<bool, ExportError> {
            if self.fail_check {
                return Err(ExportError::Storage {
                    operation: "token check",
                    message: "503 Service Unavailable".into(),
                });
            }
            Ok(!self.invalid_token)
        }

        async fn exists(&self, path: &str) -> Result<bool, ExportError> {
            Ok(self.folders.lock().unwrap().contains(path))
        }

        async fn mkdir(&self, path: &str) -> Result<(), ExportError> {
            if self.fail_mkdir {
                return Err(ExportError::Storage {
                    operation: "mkdir",
                    message: "507 Insufficient Storage".into(),
                });
            }
            self.folders.lock().unwrap().insert(path.to_string());
            self.mkdirs.lock().unwrap().push(path.to_string());
            Ok(())
        }

        async fn upload(
            &self,
            local_path: &Path,
            remote_path: &str,
            _overwrite: bool,
        ) -> Result<(), ExportError> {
            if self.fail_upload {
                return Err(ExportError::Storage {
                    operation: "upload",
                    message: "connection reset".into(),
                });
            }
            let bytes = std::fs::read(local_path)?;
            self.uploads.lock().unwrap().push((
                local_path.to_path_buf(),
                remote_path.to_string(),
                bytes,
            ));
            Ok(())
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        tmp: PathBuf,
        log: Arc<AppendLogSink>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let tmp = dir.path().join("tmp");
            std::fs::create_dir(&tmp).unwrap();
            let log = Arc::new(AppendLogSink::new(dir.path().join("actions.csv")));
            Self { _dir: dir, tmp, log }
        }

        async fn seed(&self, rows: i64) {
            for user in 0..rows {
                let record = EventRecord::new(UserId(user), Utc::now(), "m", Interaction::Help);
                self.log.write(&record).await.unwrap();
            }
        }

        fn job(&self, disk: Option<Arc<FakeDisk>>) -> ExportJob {
            let storage = disk.map(|d| d as Arc<dyn RemoteStorage>);
            ExportJob::new(self.log.clone(), storage, &ExportConfig::default())
                .with_temp_dir(&self.tmp)
        }

        fn temp_files(&self) -> usize {
            std::fs::read_dir(&self.tmp).unwrap().count()
        }
    }

    fn sheet(bytes: &[u8]) -> Range<Data> {
        let mut workbook = Xlsx::new(std::io::Cursor::new(bytes.to_vec())).unwrap();
        workbook.worksheet_range(spreadsheet::SHEET_NAME).unwrap()
    }

    #[tokio::test]
    async fn test_exports_all_rows_and_removes_artifact() {
        let fx = Fixture::new();
        fx.seed(5).await;
        let disk = Arc::new(FakeDisk::default());

        let outcome = fx.job(Some(disk.clone())).try_run().await.unwrap();

        assert_eq!(
            outcome,
            ExportOutcome::Uploaded {
                rows: 5,
                destination: "/telegram_bot_analytics/analytics.xlsx".into()
            }
        );
        let uploads = disk.uploads();
        assert_eq!(uploads.len(), 1);
        let (local, remote, bytes) = &uploads[0];
        assert_eq!(remote, "/telegram_bot_analytics/analytics.xlsx");
        assert!(!local.exists());
        assert_eq!(fx.temp_files(), 0);

        let range = sheet(bytes);
        assert_eq!(range.height(), 6);
        assert_eq!(range.get_value((0, 0)), Some(&Data::String("user_id".into())));
        assert_eq!(disk.mkdirs.lock().unwrap().as_slice(), ["/telegram_bot_analytics"]);
    }

    #[tokio::test]
    async fn test_unchanged_log_exports_identical_content() {
        let fx = Fixture::new();
        fx.seed(3).await;
        let disk = Arc::new(FakeDisk::default());
        let job = fx.job(Some(disk.clone()));

        job.try_run().await.unwrap();
        job.try_run().await.unwrap();

        let uploads = disk.uploads();
        assert_eq!(uploads.len(), 2);
        let (first, second) = (sheet(&uploads[0].2), sheet(&uploads[1].2));
        assert_eq!(first.height(), second.height());
        assert_eq!(
            first.rows().collect::<Vec<_>>(),
            second.rows().collect::<Vec<_>>()
        );
        // Folder created on the first run only.
        assert_eq!(disk.mkdirs.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_log_is_a_noop() {
        let fx = Fixture::new();
        let disk = Arc::new(FakeDisk::default());

        let outcome = fx.job(Some(disk.clone())).run().await;

        assert_eq!(outcome, Some(ExportOutcome::Skipped));
        assert!(disk.uploads().is_empty());
    }

    #[tokio::test]
    async fn test_missing_storage_is_a_noop() {
        let fx = Fixture::new();
        fx.seed(2).await;

        let outcome = fx.job(None).run().await;

        assert_eq!(outcome, Some(ExportOutcome::Skipped));
        assert_eq!(fx.temp_files(), 0);
    }

    #[tokio::test]
    async fn test_invalid_token_aborts_and_cleans_up() {
        let fx = Fixture::new();
        fx.seed(2).await;
        let disk = Arc::new(FakeDisk {
            invalid_token: true,
            ..FakeDisk::default()
        });

        let err = fx.job(Some(disk.clone())).try_run().await.unwrap_err();

        assert!(matches!(err, ExportError::InvalidToken));
        assert!(disk.uploads().is_empty());
        assert_eq!(fx.temp_files(), 0);
    }

    #[tokio::test]
    async fn test_upload_failure_is_contained_and_cleans_up() {
        let fx = Fixture::new();
        fx.seed(2).await;
        let disk = Arc::new(FakeDisk {
            fail_upload: true,
            ..FakeDisk::default()
        });

        let outcome = fx.job(Some(disk)).run().await;

        assert_eq!(outcome, None);
        assert_eq!(fx.temp_files(), 0);
    }

    #[tokio::test]
    async fn test_existing_folder_is_not_recreated() {
        let fx = Fixture::new();
        fx.seed(1).await;
        let disk = Arc::new(FakeDisk::default());
        disk.folders
            .lock()
            .unwrap()
            .insert("/telegram_bot_analytics".into());

        fx.job(Some(disk.clone())).try_run().await.unwrap();

        assert!(disk.mkdirs.lock().unwrap().is_empty());
        assert_eq!(disk.uploads().len(), 1);
    }

    #[tokio::test]
    async fn test_token_check_error_is_contained_and_cleans_up() {
        let fx = Fixture::new();
        fx.seed(2).await;
        let disk = Arc::new(FakeDisk {
            fail_check: true,
            ..FakeDisk::default()
        });

        let outcome = fx.job(Some(disk.clone())).run().await;

        assert_eq!(outcome, None);
        assert!(disk.uploads().is_empty());
        assert_eq!(fx.temp_files(), 0);
    }

    #[tokio::test]
    async fn test_folder_creation_failure_is_contained_and_cleans_up() {
        let fx = Fixture::new();
        fx.seed(2).await;
        let disk = Arc::new(FakeDisk {
            fail_mkdir: true,
            ..FakeDisk::default()
        });

        let outcome = fx.job(Some(disk.clone())).run().await;

        assert_eq!(outcome, None);
        assert!(disk.uploads().is_empty());
        assert_eq!(fx.temp_files(), 0);
    }

    #[tokio::test]
    async fn test_unreadable_log_is_contained() {
        let fx = Fixture::new();
        std::fs::write(fx.log.path(), b"user_id,action\n\xff\xfe,help\n").unwrap();
        let disk = Arc::new(FakeDisk::default());

        let err = fx.job(Some(disk.clone())).try_run().await.unwrap_err();
        assert!(matches!(err, ExportError::Sink(_)));

        let outcome = fx.job(Some(disk.clone())).run().await;
        assert_eq!(outcome, None);
        assert!(disk.uploads().is_empty());
        assert_eq!(fx.temp_files(), 0);
    }
}
