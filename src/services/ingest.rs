//! Background ingestion of inbox images into profiles.
//!
//! Files named `<person>_<index>.<ext>` are grouped by person and handed to
//! [`ProfileStore::create_or_update`]. Consumed files are deleted; files of a
//! failed group are moved to `<errors_dir>/<person>/` for manual triage.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::error::FaceError;
use crate::services::store::{validate_name, ProfileStore};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "webp"];

/// Settings for the ingestion loop.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub inbox_dir: PathBuf,
    pub errors_dir: PathBuf,
    pub interval: Duration,
    pub max_concurrency: usize,
    pub group_timeout: Duration,
}

/// A group that could not become a profile.
#[derive(Debug, Clone)]
pub struct FailedGroup {
    pub name: String,
    pub reason: String,
    /// Where the group's files were moved.
    pub moved_to: PathBuf,
}

/// What one pass over the inbox did.
#[derive(Debug, Clone, Default)]
pub struct IngestSummary {
    pub ingested: Vec<String>,
    pub failed: Vec<FailedGroup>,
}

impl IngestSummary {
    pub fn is_empty(&self) -> bool {
        self.ingested.is_empty() && self.failed.is_empty()
    }
}

/// Split `<person>_<index>.<ext>` into the person's name.
///
/// Returns `None` for anything ingestion should ignore.
pub fn parse_inbox_name(file_name: &str) -> Option<&str> {
    if file_name.starts_with('.') {
        return None;
    }
    let (stem, ext) = file_name.rsplit_once('.')?;
    if !IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()) {
        return None;
    }
    let (person, index) = stem.rsplit_once('_')?;
    if index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    validate_name(person).ok()?;
    Some(person)
}

/// Periodically turns inbox images into stored profiles.
pub struct IngestionPipeline {
    store: Arc<ProfileStore>,
    config: IngestConfig,
}

impl IngestionPipeline {
    pub fn new(store: Arc<ProfileStore>, config: IngestConfig) -> Self {
        Self { store, config }
    }

    /// Tick every `interval` until `shutdown` turns true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Monitoring {} every {:?}",
            self.config.inbox_dir.display(),
            self.config.interval
        );
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let summary = self.run_once().await;
                    if !summary.is_empty() {
                        info!(
                            "Ingestion pass: {} profiles stored, {} groups failed",
                            summary.ingested.len(),
                            summary.failed.len()
                        );
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Ingestion loop stopped");
    }

    /// One scan of the inbox. Never fails; problems are logged and reported.
    pub async fn run_once(&self) -> IngestSummary {
        let groups = match self.scan().await {
            Ok(groups) => groups,
            Err(e) => {
                error!("Could not scan inbox {}: {}", self.config.inbox_dir.display(), e);
                return IngestSummary::default();
            }
        };
        if groups.is_empty() {
            return IngestSummary::default();
        }

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let mut tasks = JoinSet::new();
        for (name, files) in groups {
            let store = self.store.clone();
            let semaphore = semaphore.clone();
            let timeout = self.config.group_timeout;
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                info!("Processing profile for {} ({} images)", name, files.len());
                let result =
                    match tokio::time::timeout(timeout, store.create_or_update(&name, &files)).await {
                        Ok(result) => result.map(|_| ()),
                        Err(_) => Err(FaceError::Timeout(timeout)),
                    };
                (name, files, result)
            });
        }

        let mut summary = IngestSummary::default();
        while let Some(joined) = tasks.join_next().await {
            let (name, files, result) = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("Ingestion task aborted: {}", e);
                    continue;
                }
            };
            match result {
                Ok(()) => {
                    for file in &files {
                        match tokio::fs::remove_file(file).await {
                            Ok(()) => debug!("Deleted processed image: {}", file.display()),
                            Err(e) => warn!("Error deleting image {}: {}", file.display(), e),
                        }
                    }
                    summary.ingested.push(name);
                }
                Err(e) => {
                    warn!("Error creating profile for {}: {}", name, e);
                    let moved_to = self.move_to_errors(&name, &files).await;
                    summary.failed.push(FailedGroup {
                        name,
                        reason: e.to_string(),
                        moved_to,
                    });
                }
            }
        }
        summary.ingested.sort();
        summary.failed.sort_by(|a, b| a.name.cmp(&b.name));
        summary
    }

    /// Group matching inbox files by person, each group sorted by file name.
    async fn scan(&self) -> std::io::Result<BTreeMap<String, Vec<PathBuf>>> {
        let mut groups: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
        let mut entries = tokio::fs::read_dir(&self.config.inbox_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let path = entry.path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            match parse_inbox_name(file_name) {
                Some(person) => groups.entry(person.to_string()).or_default().push(path.clone()),
                None => debug!("Ignoring inbox file {}", path.display()),
            }
        }
        for files in groups.values_mut() {
            files.sort();
        }
        Ok(groups)
    }

    async fn move_to_errors(&self, name: &str, files: &[PathBuf]) -> PathBuf {
        let error_dir = self.config.errors_dir.join(name);
        if let Err(e) = tokio::fs::create_dir_all(&error_dir).await {
            error!("Could not create error directory {}: {}", error_dir.display(), e);
            return error_dir;
        }
        for file in files {
            let Some(file_name) = file.file_name() else {
                continue;
            };
            let dest = match free_destination(&error_dir, Path::new(file_name)).await {
                Ok(dest) => dest,
                Err(e) => {
                    error!("Error checking error area for {}: {}", file.display(), e);
                    continue;
                }
            };
            match move_file(file, &dest).await {
                Ok(()) => info!("Moved failed image {} to {}", file.display(), dest.display()),
                Err(e) => error!("Error moving failed image {}: {}", file.display(), e),
            }
        }
        error_dir
    }
}

/// First path in `dir` for `file_name` that no earlier failure occupies.
///
/// `Bob_0.jpeg` becomes `Bob_0.1.jpeg`, `Bob_0.2.jpeg`, and so on.
async fn free_destination(dir: &Path, file_name: &Path) -> std::io::Result<PathBuf> {
    let candidate = dir.join(file_name);
    if !tokio::fs::try_exists(&candidate).await? {
        return Ok(candidate);
    }
    let stem = file_name
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = file_name.extension().map(|e| e.to_string_lossy().into_owned());
    for n in 1u32.. {
        let name = match &ext {
            Some(ext) => format!("{}.{}.{}", stem, n, ext),
            None => format!("{}.{}", stem, n),
        };
        let candidate = dir.join(name);
        if !tokio::fs::try_exists(&candidate).await? {
            return Ok(candidate);
        }
    }
    Err(std::io::Error::new(
        std::io::ErrorKind::AlreadyExists,
        format!("no free name for {} in {}", file_name.display(), dir.display()),
    ))
}

/// Rename, falling back to copy and remove across filesystems.
async fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    tokio::fs::copy(from, to).await?;
    tokio::fs::remove_file(from).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::store::StoreConfig;
    use crate::services::FaceExtractor;
    use crate::testing::{write_face, write_no_face, StubProvider};
    use tempfile::TempDir;

    struct Fixture {
        _root: TempDir,
        inbox: PathBuf,
        errors: PathBuf,
        store: Arc<ProfileStore>,
    }

    async fn fixture(provider: StubProvider, group_timeout: Duration) -> (Fixture, IngestionPipeline) {
        let root = TempDir::new().unwrap();
        let inbox = root.path().join("inbox");
        let errors = inbox.join("errors");
        std::fs::create_dir_all(&inbox).unwrap();
        let extractor = Arc::new(FaceExtractor::new(Arc::new(provider), 0));
        let store = Arc::new(ProfileStore::new(
            StoreConfig {
                profiles_dir: root.path().join("profiles"),
                images_dir: root.path().join("profile_images"),
            },
            extractor,
        ));
        store.load().await.unwrap();
        let pipeline = IngestionPipeline::new(
            store.clone(),
            IngestConfig {
                inbox_dir: inbox.clone(),
                errors_dir: errors.clone(),
                interval: Duration::from_millis(20),
                max_concurrency: 2,
                group_timeout,
            },
        );
        let fx = Fixture {
            _root: root,
            inbox,
            errors,
            store,
        };
        (fx, pipeline)
    }

    #[test]
    fn test_parse_inbox_name() {
        assert_eq!(parse_inbox_name("Alice_0.jpeg"), Some("Alice"));
        assert_eq!(parse_inbox_name("Mary_Ann_12.JPG"), Some("Mary_Ann"));
        assert_eq!(parse_inbox_name("Bob_1.png"), Some("Bob"));
        assert_eq!(parse_inbox_name("Alice.jpeg"), None);
        assert_eq!(parse_inbox_name("Alice_x.jpeg"), None);
        assert_eq!(parse_inbox_name("Alice_.jpeg"), None);
        assert_eq!(parse_inbox_name("_3.jpeg"), None);
        assert_eq!(parse_inbox_name("Alice_0.txt"), None);
        assert_eq!(parse_inbox_name(".Alice_0.jpeg"), None);
        assert_eq!(parse_inbox_name("Alice_0"), None);
    }

    #[tokio::test]
    async fn test_pass_ingests_good_groups_and_quarantines_bad_ones() {
        let (fx, pipeline) = fixture(StubProvider::new("stub-model"), Duration::from_secs(5)).await;
        write_face(&fx.inbox, "Alice_0.jpeg", &[1.0, 0.0]);
        write_face(&fx.inbox, "Alice_1.jpeg", &[0.9, 0.1]);
        write_no_face(&fx.inbox, "Bob_0.jpeg");
        std::fs::write(fx.inbox.join("notes.txt"), "ignore me").unwrap();

        let summary = pipeline.run_once().await;

        assert_eq!(summary.ingested, vec!["Alice".to_string()]);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].name, "Bob");
        assert_eq!(summary.failed[0].moved_to, fx.errors.join("Bob"));

        assert_eq!(fx.store.get("Alice").unwrap().embeddings.len(), 2);
        assert!(fx.store.get("Bob").is_err());
        assert!(!fx.inbox.join("Alice_0.jpeg").exists());
        assert!(!fx.inbox.join("Alice_1.jpeg").exists());
        assert!(!fx.inbox.join("Bob_0.jpeg").exists());
        assert!(fx.errors.join("Bob").join("Bob_0.jpeg").exists());
        assert!(fx.inbox.join("notes.txt").exists());
    }

    #[tokio::test]
    async fn test_repeated_failures_keep_every_file() {
        let (fx, pipeline) = fixture(StubProvider::new("stub-model"), Duration::from_secs(5)).await;
        write_no_face(&fx.inbox, "Bob_0.jpeg");
        assert_eq!(pipeline.run_once().await.failed.len(), 1);

        std::fs::write(fx.inbox.join("Bob_0.jpeg"), "second upload").unwrap();
        assert_eq!(pipeline.run_once().await.failed.len(), 1);

        let bob = fx.errors.join("Bob");
        assert_eq!(std::fs::read_to_string(bob.join("Bob_0.jpeg")).unwrap(), "noface");
        assert_eq!(
            std::fs::read_to_string(bob.join("Bob_0.1.jpeg")).unwrap(),
            "second upload"
        );
        assert!(!fx.inbox.join("Bob_0.jpeg").exists());
    }

    #[tokio::test]
    async fn test_empty_inbox_is_a_no_op() {
        let (_fx, pipeline) = fixture(StubProvider::new("stub-model"), Duration::from_secs(5)).await;
        assert!(pipeline.run_once().await.is_empty());
    }

    #[tokio::test]
    async fn test_timed_out_group_goes_to_errors() {
        let provider = StubProvider::new("stub-model").with_delay(Duration::from_millis(500));
        let (fx, pipeline) = fixture(provider, Duration::from_millis(50)).await;
        write_face(&fx.inbox, "Slow_0.jpeg", &[0.5, 0.5]);

        let summary = pipeline.run_once().await;

        assert!(summary.ingested.is_empty());
        assert!(summary.failed[0].reason.contains("timed out"));
        assert!(fx.errors.join("Slow").join("Slow_0.jpeg").exists());
        assert!(fx.store.get("Slow").is_err());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (fx, pipeline) = fixture(StubProvider::new("stub-model"), Duration::from_secs(5)).await;
        write_face(&fx.inbox, "Cara_0.png", &[0.2, 0.3]);
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(pipeline.run(rx));
        for _ in 0..100 {
            if fx.store.get("Cara").is_ok() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("loop should stop")
            .unwrap();
        assert!(fx.store.get("Cara").is_ok());
    }
}
