//! Durable profile store.
//!
//! Every profile is one JSON record under `profiles/<name>.json`; the
//! reference images backing its embeddings are copied into a per-update
//! generation directory `profile_images/<name>/<generation>/`.
//!
//! Writes to one name are serialized by a per-name async mutex. Readers never
//! take that mutex: they clone `Arc<Profile>` handles out of the index, which
//! is only swapped after the record has been durably replaced.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::io::AsyncWriteExt;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{FaceError, Result};
use crate::services::FaceExtractor;

const RECORD_VERSION: u32 = 1;
const RECORD_EXTENSION: &str = "json";
const TRASH_PREFIX: &str = ".trash-";
const MAX_NAME_LEN: usize = 128;

/// Where the store keeps its records and reference images.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub profiles_dir: PathBuf,
    pub images_dir: PathBuf,
}

/// A named set of reference face embeddings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    pub model_id: String,
    pub embeddings: Vec<Vec<f32>>,
    pub image_refs: Vec<PathBuf>,
}

impl Profile {
    /// Dimensionality shared by every embedding of this profile.
    pub fn dimension(&self) -> usize {
        self.embeddings.first().map_or(0, Vec::len)
    }

    fn check_invariants(&self) -> std::result::Result<(), String> {
        if self.embeddings.is_empty() {
            return Err("profile has no embeddings".into());
        }
        if self.embeddings.len() != self.image_refs.len() {
            return Err(format!(
                "{} embeddings but {} image references",
                self.embeddings.len(),
                self.image_refs.len()
            ));
        }
        let dim = self.dimension();
        if dim == 0 || self.embeddings.iter().any(|e| e.len() != dim) {
            return Err("embeddings do not share one dimensionality".into());
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct RecordRef<'a> {
    version: u32,
    #[serde(flatten)]
    profile: &'a Profile,
}

#[derive(Deserialize)]
struct Record {
    version: u32,
    #[serde(flatten)]
    profile: Profile,
}

/// An input image that did not make it into the profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedImage {
    pub path: PathBuf,
    pub reason: String,
}

/// Outcome of a successful `create_or_update`.
#[derive(Debug, Clone)]
pub struct ProfileUpdate {
    pub profile: Arc<Profile>,
    pub rejected: Vec<RejectedImage>,
    /// True when an existing profile with this name was replaced.
    pub replaced: bool,
}

/// Reject names that cannot safely become a file name.
pub fn validate_name(name: &str) -> Result<()> {
    let bad = name.is_empty()
        || name.len() > MAX_NAME_LEN
        || name.starts_with('.')
        || name.chars().any(|c| c == '/' || c == '\\' || c == '\0' || c.is_control());
    if bad {
        return Err(FaceError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Durable keyed collection of face profiles.
pub struct ProfileStore {
    config: StoreConfig,
    extractor: Arc<FaceExtractor>,
    index: RwLock<BTreeMap<String, Arc<Profile>>>,
    key_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    closed: AtomicBool,
}

/// Holds the write lock of one name; prunes the lock table on release.
struct KeyGuard<'a> {
    store: &'a ProfileStore,
    name: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self
            .store
            .key_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(&self.name)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.name);
        }
    }
}

impl ProfileStore {
    /// Create an empty store; call [`ProfileStore::load`] to recover state.
    pub fn new(config: StoreConfig, extractor: Arc<FaceExtractor>) -> Self {
        Self {
            config,
            extractor,
            index: RwLock::new(BTreeMap::new()),
            key_locks: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn model_id(&self) -> &str {
        self.extractor.model_id()
    }

    /// Rebuild the in-memory index from disk.
    ///
    /// Unreadable or inconsistent records are logged and skipped. Leftovers of
    /// interrupted writes and deletes are swept. Returns the number of
    /// profiles recovered.
    pub async fn load(&self) -> Result<usize> {
        for dir in [&self.config.profiles_dir, &self.config.images_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| FaceError::storage(dir, e))?;
        }

        let mut loaded = BTreeMap::new();
        let mut entries = tokio::fs::read_dir(&self.config.profiles_dir)
            .await
            .map_err(|e| FaceError::storage(&self.config.profiles_dir, e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| FaceError::storage(&self.config.profiles_dir, e))?
        {
            let path = entry.path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if file_name.ends_with(".tmp") {
                debug!("Removing interrupted write {}", path.display());
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    warn!("Could not remove stale temp record {}: {}", path.display(), e);
                }
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            match read_record(&path).await {
                Ok(profile) => {
                    loaded.insert(profile.name.clone(), Arc::new(profile));
                }
                Err(e) => warn!("Skipping profile record {}: {}", path.display(), e),
            }
        }

        self.sweep_images(&loaded).await;

        let count = loaded.len();
        *self.index.write().unwrap_or_else(PoisonError::into_inner) = loaded;
        info!("Loaded {} face profiles", count);
        Ok(count)
    }

    /// Build a profile from `image_paths` and persist it under `name`,
    /// replacing any existing profile of that name.
    ///
    /// Images the extractor cannot use are dropped and reported in
    /// [`ProfileUpdate::rejected`]. If no image yields an embedding the call
    /// fails with `NoFaceDetected` and the previous profile stays untouched.
    pub async fn create_or_update(&self, name: &str, image_paths: &[PathBuf]) -> Result<ProfileUpdate> {
        validate_name(name)?;
        let _guard = self.lock_key(name).await;
        self.ensure_open()?;

        let generation = PendingGeneration::new(
            self.config
                .images_dir
                .join(name)
                .join(Uuid::new_v4().simple().to_string()),
        );

        let (profile, rejected) = self
            .build_profile(name, image_paths, generation.path())
            .await?;
        let tmp = self.write_temp_record(&profile).await?;

        // Commit: no await from here on.
        let record_path = self.record_path(name);
        if let Err(e) = std::fs::rename(&tmp, &record_path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(FaceError::storage(&record_path, e));
        }
        let generation_dir = generation.keep();
        let profile = Arc::new(profile);
        let previous = self
            .index
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), profile.clone());

        if let Some(previous) = &previous {
            info!("Profile for {} already existed, replaced it", name);
            for dir in generation_dirs(previous) {
                if dir != generation_dir {
                    remove_dir_now(&dir);
                }
            }
        }

        info!(
            "Stored profile for {} with {} face embeddings ({} images rejected)",
            name,
            profile.embeddings.len(),
            rejected.len()
        );

        Ok(ProfileUpdate {
            profile,
            rejected,
            replaced: previous.is_some(),
        })
    }

    /// Look up one profile.
    pub fn get(&self, name: &str) -> Result<Arc<Profile>> {
        self.index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| FaceError::NotFound(name.to_string()))
    }

    /// All profiles, ordered by name.
    pub fn list(&self) -> Vec<Arc<Profile>> {
        self.snapshot()
    }

    /// A consistent view of the store at this instant, ordered by name.
    pub fn snapshot(&self) -> Vec<Arc<Profile>> {
        self.index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.index.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delete a profile together with its reference images.
    ///
    /// Returns `Ok(false)` when the name is unknown. If the record or the
    /// images cannot be removed the profile stays fully in place and the
    /// storage error is returned.
    pub async fn delete(&self, name: &str) -> Result<bool> {
        validate_name(name)?;
        let _guard = self.lock_key(name).await;
        self.ensure_open()?;

        if !self
            .index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
        {
            debug!("Profile for {} does not exist", name);
            return Ok(false);
        }

        let images = self.config.images_dir.join(name);
        let trash = self.config.images_dir.join(format!(
            "{}{}-{}",
            TRASH_PREFIX,
            name,
            Uuid::new_v4().simple()
        ));
        let moved = match std::fs::rename(&images, &trash) {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => return Err(FaceError::storage(&images, e)),
        };

        let record_path = self.record_path(name);
        match std::fs::remove_file(&record_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                if moved {
                    if let Err(restore) = std::fs::rename(&trash, &images) {
                        error!(
                            "Could not restore images of {} from {}: {}",
                            name,
                            trash.display(),
                            restore
                        );
                    }
                }
                return Err(FaceError::storage(&record_path, e));
            }
        }

        self.index
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);

        if moved {
            if let Err(e) = tokio::fs::remove_dir_all(&trash).await {
                warn!("Profile {} deleted but {} remains: {}", name, trash.display(), e);
            }
        }

        info!("Deleted profile and images for {}", name);
        Ok(true)
    }

    /// Wait for in-flight writes, then refuse further ones.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let in_flight: Vec<_> = self
            .key_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for lock in in_flight {
            let _ = lock.lock().await;
        }
        info!("Profile store closed with {} profiles", self.len());
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(FaceError::StoreClosed);
        }
        Ok(())
    }

    async fn lock_key(&self, name: &str) -> KeyGuard<'_> {
        let lock = self
            .key_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(name.to_string())
            .or_default()
            .clone();
        KeyGuard {
            store: self,
            name: name.to_string(),
            guard: Some(lock.lock_owned().await),
        }
    }

    fn record_path(&self, name: &str) -> PathBuf {
        self.config
            .profiles_dir
            .join(format!("{}.{}", name, RECORD_EXTENSION))
    }

    async fn build_profile(
        &self,
        name: &str,
        image_paths: &[PathBuf],
        generation_dir: &Path,
    ) -> Result<(Profile, Vec<RejectedImage>)> {
        let mut embeddings: Vec<Vec<f32>> = Vec::new();
        let mut accepted: Vec<&PathBuf> = Vec::new();
        let mut rejected = Vec::new();

        for path in image_paths {
            match self.extractor.extract(path).await {
                Ok(embedding) => {
                    if let Some(first) = embeddings.first() {
                        if first.len() != embedding.len() {
                            rejected.push(RejectedImage {
                                path: path.clone(),
                                reason: format!(
                                    "dimension mismatch: expected {}, got {}",
                                    first.len(),
                                    embedding.len()
                                ),
                            });
                            continue;
                        }
                    }
                    embeddings.push(embedding);
                    accepted.push(path);
                }
                Err(e) => {
                    warn!("Could not process image {}: {}", path.display(), e);
                    rejected.push(RejectedImage {
                        path: path.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        if embeddings.is_empty() {
            return Err(FaceError::NoFaceDetected(format!(
                "none of the {} images for {} yielded a face",
                image_paths.len(),
                name
            )));
        }

        tokio::fs::create_dir_all(generation_dir)
            .await
            .map_err(|e| FaceError::storage(generation_dir, e))?;
        let mut image_refs = Vec::with_capacity(accepted.len());
        for (idx, source) in accepted.into_iter().enumerate() {
            let file_name = match source.extension().and_then(|e| e.to_str()) {
                Some(ext) => format!("{}_{}.{}", name, idx, ext),
                None => format!("{}_{}", name, idx),
            };
            let dest = generation_dir.join(file_name);
            tokio::fs::copy(source, &dest)
                .await
                .map_err(|e| FaceError::storage(&dest, e))?;
            image_refs.push(dest);
        }

        let profile = Profile {
            name: name.to_string(),
            model_id: self.extractor.model_id().to_string(),
            embeddings,
            image_refs,
        };
        Ok((profile, rejected))
    }

    /// Write the record next to its final location and fsync it.
    async fn write_temp_record(&self, profile: &Profile) -> Result<PathBuf> {
        let tmp = self.config.profiles_dir.join(format!(
            ".{}.{}.tmp",
            profile.name,
            Uuid::new_v4().simple()
        ));
        let data = serde_json::to_vec(&RecordRef {
            version: RECORD_VERSION,
            profile,
        })
        .map_err(|e| FaceError::storage(&tmp, e))?;

        let written = async {
            let mut file = tokio::fs::File::create(&tmp).await?;
            file.write_all(&data).await?;
            file.sync_all().await
        }
        .await;
        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(FaceError::storage(&tmp, e));
        }
        Ok(tmp)
    }

    /// Drop trash left by interrupted deletes, generation directories no
    /// record references and image directories of names that have no record.
    /// Images behind a record that failed to load are left for manual recovery.
    async fn sweep_images(&self, loaded: &BTreeMap<String, Arc<Profile>>) {
        let Ok(entries) = std::fs::read_dir(&self.config.images_dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let dir_name = entry.file_name().to_string_lossy().into_owned();
            if dir_name.starts_with(TRASH_PREFIX) {
                remove_dir_quietly(&path).await;
                continue;
            }
            let Some(profile) = loaded.get(&dir_name) else {
                if self.record_path(&dir_name).exists() {
                    debug!("Leaving images of unreadable record {}", path.display());
                } else {
                    remove_dir_quietly(&path).await;
                }
                continue;
            };
            let referenced: HashSet<PathBuf> = generation_dirs(profile).into_iter().collect();
            let Ok(generations) = std::fs::read_dir(&path) else {
                continue;
            };
            for generation in generations.flatten() {
                let generation = generation.path();
                if generation.is_dir() && !referenced.contains(&generation) {
                    remove_dir_quietly(&generation).await;
                }
            }
        }
    }
}

async fn read_record(path: &Path) -> Result<Profile> {
    let data = tokio::fs::read(path)
        .await
        .map_err(|e| FaceError::storage(path, e))?;
    let record: Record = serde_json::from_slice(&data).map_err(|e| FaceError::storage(path, e))?;
    if record.version != RECORD_VERSION {
        return Err(FaceError::storage(
            path,
            format!(
                "record version mismatch: expected {}, got {}",
                RECORD_VERSION, record.version
            ),
        ));
    }
    let profile = record.profile;
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
    if stem != profile.name {
        return Err(FaceError::storage(
            path,
            format!("record names {:?} but is stored as {:?}", profile.name, stem),
        ));
    }
    validate_name(&profile.name)?;
    profile
        .check_invariants()
        .map_err(|reason| FaceError::storage(path, reason))?;
    Ok(profile)
}

fn generation_dirs(profile: &Profile) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = profile
        .image_refs
        .iter()
        .filter_map(|p| p.parent().map(Path::to_path_buf))
        .collect();
    dirs.sort();
    dirs.dedup();
    dirs
}

/// A generation directory that is removed on drop unless kept.
struct PendingGeneration {
    dir: PathBuf,
    kept: bool,
}

impl PendingGeneration {
    fn new(dir: PathBuf) -> Self {
        Self { dir, kept: false }
    }

    fn path(&self) -> &Path {
        &self.dir
    }

    fn keep(mut self) -> PathBuf {
        self.kept = true;
        std::mem::take(&mut self.dir)
    }
}

impl Drop for PendingGeneration {
    fn drop(&mut self) {
        if !self.kept {
            remove_dir_now(&self.dir);
        }
    }
}

fn remove_dir_now(dir: &Path) {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => debug!("Removed {}", dir.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove {}: {}", dir.display(), e),
    }
}

async fn remove_dir_quietly(dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => debug!("Removed {}", dir.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove {}: {}", dir.display(), e),
    }
}
