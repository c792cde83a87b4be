//! Per-collection shared state.
//!
//! A collection's folder, cover and description are created once, by the first
//! track that passes filtering and quality resolution, and shared by every
//! worker downloading its tracks.
//! Cover and description are first written under a UUID name so concurrent
//! tracks never race on a shared filename, then renamed to their final name by
//! the track whose index equals the collection's track count.

use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
};

use futures::StreamExt as _;
use thiserror::Error;
use tokio::{
    io::AsyncWriteExt as _,
    sync::{OnceCell, RwLock, RwLockReadGuard},
};
use trackfetch_downloader_models::{
    CollectionBundle, DownloadItem, ItemCategory, ItemKey, TagMap, tag,
};

use crate::{
    Cancellable,
    atomic::append_extension,
    catalog::ApiError,
    context::DownloadContext,
    stats::ParentCollection,
    template::sanitize_filename,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Cover,
    Description,
}

impl AssetKind {
    /// Final file stem used when the collection has its own folder.
    #[must_use]
    pub const fn generic_stem(self) -> &'static str {
        match self {
            Self::Cover => "cover",
            Self::Description => "description",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetState {
    pub path: PathBuf,
    pub finalized: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizeOutcome {
    /// The track is not the collection's trigger track
    NotTriggered,
    Renamed(PathBuf),
    /// The destination is already the finalized asset
    AlreadyFinalized,
    /// The destination holds another file and overwrite is disabled
    Skipped,
}

#[derive(Debug, Error)]
pub enum FinalizeAssetError {
    #[error(transparent)]
    IO(#[from] std::io::Error),
}

impl Cancellable for FinalizeAssetError {
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// A cover or description file shared by all tracks of a collection.
///
/// Taggers hold the read side while embedding the cover; finalization takes
/// the write side.
#[derive(Debug)]
pub struct SharedAsset {
    kind: AssetKind,
    extension: String,
    state: RwLock<AssetState>,
}

impl SharedAsset {
    #[must_use]
    pub fn new(kind: AssetKind, path: PathBuf, finalized: bool) -> Self {
        let extension = path
            .extension()
            .and_then(|x| x.to_str())
            .unwrap_or(match kind {
                AssetKind::Cover => "jpg",
                AssetKind::Description => "txt",
            })
            .to_string();

        Self {
            kind,
            extension,
            state: RwLock::new(AssetState { path, finalized }),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> AssetKind {
        self.kind
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, AssetState> {
        self.state.read().await
    }

    pub async fn path(&self) -> PathBuf {
        self.state.read().await.path.clone()
    }

    /// Renames the temporary asset to `destination`, at most once.
    ///
    /// # Errors
    ///
    /// * If the rename fails
    pub async fn finalize(
        &self,
        destination: &Path,
        overwrite: bool,
    ) -> Result<FinalizeOutcome, FinalizeAssetError> {
        let mut state = self.state.write().await;

        if state.finalized {
            return Ok(FinalizeOutcome::AlreadyFinalized);
        }

        if destination.exists() {
            if is_same_file(&state.path, destination) {
                state.finalized = true;
                return Ok(FinalizeOutcome::AlreadyFinalized);
            }

            if !overwrite {
                log::info!(
                    "Not finalizing {:?}: {} already exists",
                    self.kind,
                    destination.display()
                );
                remove_asset_file(&state.path);
                state.path = destination.to_path_buf();
                state.finalized = true;
                return Ok(FinalizeOutcome::Skipped);
            }
        }

        tokio::fs::rename(&state.path, destination).await?;

        log::debug!(
            "Finalized {:?} {} -> {}",
            self.kind,
            state.path.display(),
            destination.display()
        );

        state.path = destination.to_path_buf();
        state.finalized = true;

        Ok(FinalizeOutcome::Renamed(destination.to_path_buf()))
    }

    /// Removes the temporary file if it was never finalized.
    pub async fn discard_unfinalized(&self) {
        let mut state = self.state.write().await;

        if !state.finalized {
            remove_asset_file(&state.path);
            state.finalized = true;
        }
    }
}

fn is_same_file(a: &Path, b: &Path) -> bool {
    match (std::fs::canonicalize(a), std::fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn remove_asset_file(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("Failed to remove {}: {e:?}", path.display()),
    }
}

/// A collection's cover and description, created by the first track that
/// passes filtering and quality resolution.
#[derive(Debug, Default)]
pub struct CollectionAssets {
    pub cover: Option<SharedAsset>,
    pub description: Option<SharedAsset>,
}

/// Shared state of one album, playlist, audiobook, podcast, or single track.
#[derive(Debug)]
pub struct AudioCollection {
    pub item: DownloadItem,
    pub title: String,
    pub tags: TagMap,
    pub folder: PathBuf,
    pub track_ids: Vec<u64>,
    pub total_tracks: usize,
    /// A single track written straight into the output directory
    pub single_without_folder: bool,
    pub(crate) cover_url: Option<String>,
    pub(crate) description: Option<String>,
    pub(crate) assets: OnceCell<CollectionAssets>,
}

impl AudioCollection {
    #[must_use]
    pub fn parent(&self) -> ParentCollection {
        ParentCollection {
            key: self.item.key(),
            title: self.title.clone(),
            url: self.item.url.clone(),
        }
    }

    #[must_use]
    pub fn is_playlist(&self) -> bool {
        self.item.category == ItemCategory::Playlist
    }

    #[must_use]
    pub const fn is_trigger(&self, track_index: usize) -> bool {
        track_index == self.total_tracks
    }

    /// `None` until a track has prepared the collection.
    #[must_use]
    pub fn assets(&self) -> Option<&CollectionAssets> {
        self.assets.get()
    }

    #[must_use]
    pub fn cover(&self) -> Option<&SharedAsset> {
        self.assets().and_then(|x| x.cover.as_ref())
    }

    #[must_use]
    pub fn description(&self) -> Option<&SharedAsset> {
        self.assets().and_then(|x| x.description.as_ref())
    }

    fn asset_destination(&self, kind: AssetKind, extension: &str, track_stem: &str) -> PathBuf {
        if self.single_without_folder {
            append_extension(&self.folder.join(track_stem), extension)
        } else {
            self.folder.join(format!("{}.{extension}", kind.generic_stem()))
        }
    }

    /// Creates the folder, cover and description on the first call.
    ///
    /// Later calls return the same assets. Nothing is written in dry-run mode.
    /// A cover or description that cannot be saved is logged and left out.
    ///
    /// # Errors
    ///
    /// * If the destination folder cannot be created
    pub async fn prepare(
        &self,
        ctx: &DownloadContext,
        track_stem: &str,
    ) -> Result<&CollectionAssets, RegisterCollectionError> {
        self.assets
            .get_or_try_init(|| self.create_assets(ctx, track_stem))
            .await
    }

    async fn create_assets(
        &self,
        ctx: &DownloadContext,
        track_stem: &str,
    ) -> Result<CollectionAssets, RegisterCollectionError> {
        let settings = &ctx.settings;

        if settings.dry_run {
            return Ok(CollectionAssets::default());
        }

        log::debug!("Preparing {} in {}", self.item.key(), self.folder.display());

        tokio::fs::create_dir_all(&self.folder).await?;

        let mut assets = CollectionAssets::default();

        if let Some(url) = self.cover_url.as_deref() {
            let extension = cover_extension(url);
            let existing = self.asset_destination(AssetKind::Cover, extension, track_stem);

            if let Some((asset, downloaded)) =
                build_cover(ctx, &self.folder, url, &existing).await
            {
                if downloaded {
                    ctx.stats.record_cover();
                }
                assets.cover = Some(asset);
            }
        }

        if settings.save_description
            && let Some(text) = self.description.as_deref()
        {
            let existing = self.asset_destination(AssetKind::Description, "txt", track_stem);
            assets.description = build_description(ctx, &self.folder, text, &existing).await;
        }

        Ok(assets)
    }

    async fn finalize_asset(
        &self,
        asset: Option<&SharedAsset>,
        track_index: usize,
        track_stem: &str,
        overwrite: bool,
    ) -> Result<FinalizeOutcome, FinalizeAssetError> {
        let Some(asset) = asset else {
            return Ok(FinalizeOutcome::NotTriggered);
        };

        if !self.is_trigger(track_index) {
            return Ok(FinalizeOutcome::NotTriggered);
        }

        let destination = self.asset_destination(asset.kind, &asset.extension, track_stem);

        asset.finalize(&destination, overwrite).await
    }

    /// # Errors
    ///
    /// * If the rename fails
    pub async fn finalize_cover(
        &self,
        track_index: usize,
        track_stem: &str,
        overwrite: bool,
    ) -> Result<FinalizeOutcome, FinalizeAssetError> {
        self.finalize_asset(self.cover(), track_index, track_stem, overwrite)
            .await
    }

    /// # Errors
    ///
    /// * If the rename fails
    pub async fn finalize_description(
        &self,
        track_index: usize,
        track_stem: &str,
        overwrite: bool,
    ) -> Result<FinalizeOutcome, FinalizeAssetError> {
        self.finalize_asset(self.description(), track_index, track_stem, overwrite)
            .await
    }

    /// Settles assets whose trigger track never completed.
    ///
    /// When at least one track was published into the collection's own folder
    /// the assets still get their generic names. Otherwise there is no track
    /// to name them after and the temporary files are removed.
    pub async fn settle_assets(&self, published: bool, overwrite: bool) -> Vec<FinalizeAssetError> {
        let mut errors = vec![];

        for asset in [self.cover(), self.description()].into_iter().flatten() {
            if published && !self.single_without_folder {
                let destination = self.asset_destination(asset.kind, &asset.extension, "");
                if let Err(e) = asset.finalize(&destination, overwrite).await {
                    errors.push(e);
                }
            } else {
                asset.discard_unfinalized().await;
            }
        }

        errors
    }
}

#[derive(Debug, Error)]
pub enum RegisterCollectionError {
    #[error(transparent)]
    IO(#[from] std::io::Error),
    #[error(transparent)]
    Api(#[from] ApiError),
}

impl Cancellable for RegisterCollectionError {
    fn is_cancelled(&self) -> bool {
        match self {
            Self::Api(e) => e.is_cancelled(),
            Self::IO(_) => false,
        }
    }
}

#[derive(Debug, Default)]
pub struct CollectionRegistry {
    collections: tokio::sync::Mutex<HashMap<ItemKey, Arc<AudioCollection>>>,
    claimed: Mutex<HashSet<ItemKey>>,
}

impl CollectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks an item as being downloaded in this run.
    ///
    /// Returns `false` if it was already claimed.
    pub fn claim(&self, key: ItemKey) -> bool {
        self.claimed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key)
    }

    pub async fn get(&self, key: ItemKey) -> Option<Arc<AudioCollection>> {
        self.collections.lock().await.get(&key).cloned()
    }

    /// Looks up a collection, building it under the registry lock if absent.
    ///
    /// The returned flag is `true` when `build` ran.
    ///
    /// # Errors
    ///
    /// * If `build` fails
    pub async fn get_or_register<F, Fut>(
        &self,
        key: ItemKey,
        build: F,
    ) -> Result<(Arc<AudioCollection>, bool), RegisterCollectionError>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<AudioCollection, RegisterCollectionError>> + Send,
    {
        let mut collections = self.collections.lock().await;

        if let Some(collection) = collections.get(&key) {
            return Ok((collection.clone(), false));
        }

        log::debug!("Registering collection {key}");

        let collection = Arc::new(build().await?);
        collections.insert(key, collection.clone());
        drop(collections);

        Ok((collection, true))
    }
}

fn cover_extension(url: &str) -> &str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let extension = path
        .rsplit_once('/')
        .map_or(path, |(_, name)| name)
        .rsplit_once('.')
        .map(|(_, ext)| ext);

    match extension {
        Some(ext) if (1..=4).contains(&ext.len()) && ext.chars().all(char::is_alphanumeric) => ext,
        _ => "jpg",
    }
}

async fn save_cover(
    ctx: &DownloadContext,
    url: &str,
    path: &Path,
) -> Result<(), RegisterCollectionError> {
    let response = ctx
        .cancel
        .run_until_cancelled(ctx.api.fetch_bytes(url))
        .await
        .ok_or(ApiError::Cancelled)??;

    let mut file = tokio::fs::File::create(path).await?;
    let mut stream = response.stream;

    while let Some(bytes) = stream.next().await {
        file.write_all(&bytes?).await?;
    }

    file.flush().await?;

    Ok(())
}

/// Downloads the cover to a temporary name, or reuses `existing`.
///
/// The flag is `true` when a new cover was downloaded.
async fn build_cover(
    ctx: &DownloadContext,
    folder: &Path,
    url: &str,
    existing: &Path,
) -> Option<(SharedAsset, bool)> {
    if !ctx.settings.overwrite && existing.is_file() {
        log::debug!("Reusing existing cover {}", existing.display());
        return Some((
            SharedAsset::new(AssetKind::Cover, existing.to_path_buf(), true),
            false,
        ));
    }

    let temp = folder.join(format!("{}.{}", uuid::Uuid::new_v4(), cover_extension(url)));

    match save_cover(ctx, url, &temp).await {
        Ok(()) => Some((SharedAsset::new(AssetKind::Cover, temp, false), true)),
        Err(e) => {
            remove_asset_file(&temp);
            if !e.is_cancelled() {
                log::warn!("Failed to download cover {url}: {e:?}");
            }
            None
        }
    }
}

async fn build_description(
    ctx: &DownloadContext,
    folder: &Path,
    description: &str,
    existing: &Path,
) -> Option<SharedAsset> {
    if !ctx.settings.overwrite && existing.is_file() {
        return Some(SharedAsset::new(
            AssetKind::Description,
            existing.to_path_buf(),
            true,
        ));
    }

    let temp = folder.join(format!("{}.txt", uuid::Uuid::new_v4()));

    match tokio::fs::write(&temp, description).await {
        Ok(()) => Some(SharedAsset::new(AssetKind::Description, temp, false)),
        Err(e) => {
            log::warn!("Failed to save description to {}: {e:?}", temp.display());
            None
        }
    }
}

/// Describes where a collection's files go.
///
/// Nothing is written until a track calls [`AudioCollection::prepare`].
#[must_use]
pub fn build_collection(ctx: &DownloadContext, bundle: &CollectionBundle) -> AudioCollection {
    let settings = &ctx.settings;
    let item = bundle.item.clone();

    let mut tags = bundle.info.tags.clone();
    tags.entry(tag::TITLE.to_string())
        .or_insert_with(|| bundle.info.title.clone());

    let single_without_folder =
        item.category == ItemCategory::Track && !settings.create_folder_for_singles;

    let folder = if single_without_folder {
        settings.output_dir.clone()
    } else {
        settings
            .output_dir
            .join(sanitize_filename(&ctx.templates.collection_folder(&tags)))
    };

    AudioCollection {
        item,
        title: bundle.info.title.clone(),
        tags,
        folder,
        total_tracks: bundle.track_ids.len(),
        track_ids: bundle.track_ids.clone(),
        single_without_folder,
        cover_url: bundle.info.cover_url.clone().filter(|x| !x.is_empty()),
        description: bundle
            .info
            .description
            .clone()
            .filter(|x| !x.trim().is_empty()),
        assets: OnceCell::new(),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn collection(folder: &Path, total_tracks: usize, single: bool) -> AudioCollection {
        AudioCollection {
            item: DownloadItem::new(ItemCategory::Album, 1, "https://example.com/album/1"),
            title: "Record".into(),
            tags: TagMap::new(),
            folder: folder.to_path_buf(),
            track_ids: (1..=total_tracks as u64).collect(),
            total_tracks,
            single_without_folder: single,
            cover_url: None,
            description: None,
            assets: OnceCell::new(),
        }
    }

    fn with_assets(
        mut collection: AudioCollection,
        cover: Option<SharedAsset>,
        description: Option<SharedAsset>,
    ) -> AudioCollection {
        collection.assets = OnceCell::new_with(Some(CollectionAssets { cover, description }));
        collection
    }

    fn temp_asset(folder: &Path, kind: AssetKind, extension: &str) -> SharedAsset {
        let path = folder.join(format!("{}.{extension}", uuid::Uuid::new_v4()));
        std::fs::write(&path, b"asset").unwrap();
        SharedAsset::new(kind, path, false)
    }

    #[test_log::test(tokio::test)]
    async fn only_the_trigger_track_finalizes() {
        let dir = tempfile::tempdir().unwrap();
        let album = with_assets(
            collection(dir.path(), 3, false),
            Some(temp_asset(dir.path(), AssetKind::Cover, "jpg")),
            None,
        );

        assert_eq!(
            album.finalize_cover(1, "01 - A", false).await.unwrap(),
            FinalizeOutcome::NotTriggered
        );
        assert_eq!(
            album.finalize_cover(3, "03 - C", false).await.unwrap(),
            FinalizeOutcome::Renamed(dir.path().join("cover.jpg"))
        );
        assert_eq!(
            album.finalize_cover(3, "03 - C", false).await.unwrap(),
            FinalizeOutcome::AlreadyFinalized
        );
        assert!(dir.path().join("cover.jpg").is_file());
    }

    #[test_log::test(tokio::test)]
    async fn single_without_folder_uses_track_basename() {
        let dir = tempfile::tempdir().unwrap();
        let single = with_assets(
            collection(dir.path(), 1, true),
            Some(temp_asset(dir.path(), AssetKind::Cover, "jpg")),
            Some(temp_asset(dir.path(), AssetKind::Description, "txt")),
        );

        single
            .finalize_cover(1, "Artist - Mr. Blue", false)
            .await
            .unwrap();
        single
            .finalize_description(1, "Artist - Mr. Blue", false)
            .await
            .unwrap();

        assert!(dir.path().join("Artist - Mr. Blue.jpg").is_file());
        assert!(dir.path().join("Artist - Mr. Blue.txt").is_file());
        assert!(!dir.path().join("cover.jpg").exists());
        assert!(!dir.path().join("description.txt").exists());
    }

    #[test_log::test(tokio::test)]
    async fn existing_destination_without_overwrite_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("cover.jpg"), b"old").unwrap();
        let asset = temp_asset(dir.path(), AssetKind::Cover, "jpg");
        let temp = asset.read().await.path.clone();
        let album = with_assets(collection(dir.path(), 1, false), Some(asset), None);

        assert_eq!(
            album.finalize_cover(1, "01 - A", false).await.unwrap(),
            FinalizeOutcome::Skipped
        );
        assert_eq!(std::fs::read(dir.path().join("cover.jpg")).unwrap(), b"old");
        assert!(!temp.exists());
    }

    #[test_log::test(tokio::test)]
    async fn reused_asset_is_already_finalized() {
        let dir = tempfile::tempdir().unwrap();
        let cover = dir.path().join("cover.jpg");
        std::fs::write(&cover, b"old").unwrap();
        let asset = SharedAsset::new(AssetKind::Cover, cover.clone(), false);

        assert_eq!(
            asset.finalize(&cover, false).await.unwrap(),
            FinalizeOutcome::AlreadyFinalized
        );
        assert!(cover.is_file());
    }

    #[test_log::test(tokio::test)]
    async fn unprepared_collection_has_nothing_to_finalize() {
        let dir = tempfile::tempdir().unwrap();
        let album = collection(dir.path(), 1, false);

        assert!(album.assets().is_none());
        assert_eq!(
            album.finalize_cover(1, "01 - A", false).await.unwrap(),
            FinalizeOutcome::NotTriggered
        );
        assert!(album.settle_assets(true, false).await.is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn assets_of_a_published_album_are_settled_under_generic_names() {
        let dir = tempfile::tempdir().unwrap();
        let cover = temp_asset(dir.path(), AssetKind::Cover, "png");
        let temp = cover.path().await;
        let album = with_assets(
            collection(dir.path(), 3, false),
            Some(cover),
            Some(temp_asset(dir.path(), AssetKind::Description, "txt")),
        );

        assert!(album.settle_assets(true, false).await.is_empty());

        assert!(!temp.exists());
        assert!(dir.path().join("cover.png").is_file());
        assert!(dir.path().join("description.txt").is_file());
        assert_eq!(
            album.finalize_cover(3, "03 - C", false).await.unwrap(),
            FinalizeOutcome::AlreadyFinalized
        );
    }

    #[test_log::test(tokio::test)]
    async fn assets_without_a_published_track_are_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let album_cover = temp_asset(dir.path(), AssetKind::Cover, "jpg");
        let single_cover = temp_asset(dir.path(), AssetKind::Cover, "jpg");
        let temps = [album_cover.path().await, single_cover.path().await];
        let album = with_assets(collection(dir.path(), 2, false), Some(album_cover), None);
        let single = with_assets(collection(dir.path(), 1, true), Some(single_cover), None);

        assert!(album.settle_assets(false, false).await.is_empty());
        assert!(single.settle_assets(true, false).await.is_empty());

        assert!(temps.iter().all(|x| !x.exists()));
        assert!(!dir.path().join("cover.jpg").exists());
    }

    #[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
    async fn concurrent_registration_builds_once() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(CollectionRegistry::new());
        let builds = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let key = ItemKey {
            category: ItemCategory::Album,
            id: 1,
        };

        let handles = (0..8)
            .map(|_| {
                let registry = registry.clone();
                let builds = builds.clone();
                let folder = dir.path().to_path_buf();
                tokio::spawn(async move {
                    registry
                        .get_or_register(key, || async move {
                            builds.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                            Ok(collection(&folder, 2, false))
                        })
                        .await
                        .unwrap()
                        .1
                })
            })
            .collect::<Vec<_>>();

        let mut created = 0;
        for handle in handles {
            if handle.await.unwrap() {
                created += 1;
            }
        }

        assert_eq!(builds.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(created, 1);
        assert!(registry.get(key).await.is_some());
    }

    #[test_log::test]
    fn items_can_only_be_claimed_once() {
        let registry = CollectionRegistry::new();
        let key = ItemKey {
            category: ItemCategory::Playlist,
            id: 9,
        };

        assert!(registry.claim(key));
        assert!(!registry.claim(key));
    }

    #[test_log::test]
    fn cover_extension_from_url() {
        assert_eq!(cover_extension("https://cdn/img/abc.png?size=600"), "png");
        assert_eq!(cover_extension("https://cdn/img/abc"), "jpg");
        assert_eq!(cover_extension("https://cdn.example.com/img/"), "jpg");
    }
}
