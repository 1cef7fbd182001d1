use crate::core::io::Storage;
use crate::core::state::ProjectState;
use anyhow::{Context, Result};
use log::{error, info, warn};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::{AbortHandle, JoinHandle};

/// Where a manual save ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Cache,
    File(String),
    Failed(String),
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Keeps the project snapshot in a local cache file and, once the user picks
/// one, in a project file of their choosing.
pub struct ProjectStore {
    storage: Arc<dyn Storage>,
    cache_path: String,
    file_target: Arc<Mutex<Option<String>>>,
    pending_write: Mutex<Option<JoinHandle<()>>>,
    queued_writes: Mutex<Vec<AbortHandle>>,
}

impl ProjectStore {
    pub fn new(storage: Arc<dyn Storage>, cache_path: impl Into<String>) -> Self {
        Self {
            storage,
            cache_path: cache_path.into(),
            file_target: Arc::new(Mutex::new(None)),
            pending_write: Mutex::new(None),
            queued_writes: Mutex::new(Vec::new()),
        }
    }

    pub fn file_target(&self) -> Option<String> {
        lock(&self.file_target).clone()
    }

    /// Restores the cached project. A corrupt cache is reported and treated as empty.
    pub async fn load(&self) -> Result<Option<ProjectState>> {
        if !self.storage.exists(&self.cache_path).await? {
            return Ok(None);
        }
        let bytes = self.storage.read(&self.cache_path).await?;
        match serde_json::from_slice::<ProjectState>(&bytes) {
            Ok(mut state) => {
                state.normalize();
                Ok(Some(state))
            }
            Err(e) => {
                error!("Failed to parse cached project {}: {}", self.cache_path, e);
                Ok(None)
            }
        }
    }

    /// Reads a project file and mirrors it into the cache.
    pub async fn import_from_file(&self, path: &str) -> Result<ProjectState> {
        let bytes = self
            .storage
            .read(path)
            .await
            .with_context(|| format!("Failed to read project file {}", path))?;
        let mut state: ProjectState = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse project file {}", path))?;
        state.normalize();

        if let Err(e) = self.storage.write(&self.cache_path, &bytes).await {
            error!("Failed to mirror {} into cache: {:#}", path, e);
        }
        info!("Imported project from {}", path);
        Ok(state)
    }

    /// Starts mirroring saves into `path` and writes the current snapshot there.
    pub async fn enable_file_storage(&self, path: &str, state: &ProjectState) -> SaveOutcome {
        *lock(&self.file_target) = Some(path.to_string());
        self.save(state).await
    }

    pub async fn save(&self, state: &ProjectState) -> SaveOutcome {
        let payload = match serde_json::to_string_pretty(state) {
            Ok(p) => p,
            Err(e) => return SaveOutcome::Failed(e.to_string()),
        };

        let cache_error = self
            .storage
            .write(&self.cache_path, payload.as_bytes())
            .await
            .err();
        if let Some(e) = &cache_error {
            error!("Failed to write cache {}: {:#}", self.cache_path, e);
        }

        let Some(target) = self.file_target() else {
            return match cache_error {
                Some(e) => SaveOutcome::Failed(format!("{:#}", e)),
                None => SaveOutcome::Cache,
            };
        };

        self.flush().await;
        match self.storage.write(&target, payload.as_bytes()).await {
            Ok(()) => {
                info!("Project saved to {}", target);
                SaveOutcome::File(target)
            }
            Err(e) => {
                error!("Failed to save project to {}: {:#}", target, e);
                *lock(&self.file_target) = None;
                SaveOutcome::Failed(format!("{:#}", e))
            }
        }
    }

    /// Writes the cache now and queues the project-file write behind any
    /// earlier one. Returns `false` only when the cache write fails.
    pub async fn autosave(&self, state: &ProjectState) -> bool {
        let payload = match serde_json::to_vec(state) {
            Ok(p) => p,
            Err(e) => {
                error!("Autosave failed to serialize project: {}", e);
                return false;
            }
        };
        if let Err(e) = self.storage.write(&self.cache_path, &payload).await {
            error!("Autosave failed to write cache {}: {:#}", self.cache_path, e);
            return false;
        }

        let Some(target) = self.file_target() else {
            return true;
        };
        let pretty = match serde_json::to_string_pretty(state) {
            Ok(p) => p,
            Err(e) => {
                error!("Autosave failed to serialize project: {}", e);
                return true;
            }
        };

        let storage = self.storage.clone();
        let target_slot = self.file_target.clone();
        let mut pending = lock(&self.pending_write);
        let previous = pending.take();
        let handle = tokio::spawn(async move {
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            // The target may have been cleared or replaced while queued.
            if lock(&target_slot).as_deref() != Some(target.as_str()) {
                return;
            }
            if let Err(e) = storage.write(&target, pretty.as_bytes()).await {
                warn!("Autosave to {} failed, falling back to cache only: {:#}", target, e);
                let mut slot = lock(&target_slot);
                if slot.as_deref() == Some(target.as_str()) {
                    *slot = None;
                }
            }
        });

        let mut queued = lock(&self.queued_writes);
        queued.retain(|h| !h.is_finished());
        queued.push(handle.abort_handle());
        *pending = Some(handle);
        true
    }

    /// Waits for the queued project-file write, if any.
    pub async fn flush(&self) {
        let pending = lock(&self.pending_write).take();
        if let Some(handle) = pending {
            let _ = handle.await;
        }
    }

    pub async fn export_json(&self, state: &ProjectState, path: &str) -> Result<()> {
        let content = serde_json::to_string_pretty(state)?;
        self.storage
            .write(path, content.as_bytes())
            .await
            .with_context(|| format!("Failed to export project to {}", path))?;
        info!("Exported project JSON to {}", path);
        Ok(())
    }

    pub async fn export_text(&self, state: &ProjectState, path: &str) -> Result<()> {
        let content = render_manuscript(state);
        self.storage
            .write(path, content.as_bytes())
            .await
            .with_context(|| format!("Failed to export manuscript to {}", path))?;
        info!("Exported manuscript to {}", path);
        Ok(())
    }

    /// Forgets the cached project, the project file target and every queued write.
    pub async fn clear(&self) -> Result<()> {
        *lock(&self.file_target) = None;
        for handle in lock(&self.queued_writes).drain(..) {
            handle.abort();
        }
        if let Some(handle) = lock(&self.pending_write).take() {
            handle.abort();
        }
        self.storage.delete(&self.cache_path).await?;
        Ok(())
    }
}

fn or_placeholder<'a>(value: &'a str, placeholder: &'a str) -> &'a str {
    if value.trim().is_empty() {
        placeholder
    } else {
        value
    }
}

/// Plain-text rendering of the whole project.
pub fn render_manuscript(state: &ProjectState) -> String {
    let info = &state.novel_info;
    let mut out = format!("{}\n{}\n\n", state.display_name(), "=".repeat(50));

    out.push_str("【小说信息】\n");
    out.push_str(&format!("标题：{}\n", or_placeholder(&info.title, "未命名")));
    out.push_str(&format!("描述：{}\n", or_placeholder(&info.description, "暂无")));
    if !info.reference.trim().is_empty() {
        out.push_str(&format!("参考内容：{}\n", info.reference));
    }
    if !info.style.trim().is_empty() {
        out.push_str(&format!("文风：{}\n", info.style));
    }
    if info.chapter_count > 0 {
        out.push_str(&format!("章节数：{}\n\n", info.chapter_count));
    } else {
        out.push_str("章节数：未设定\n\n");
    }

    if !state.outline.is_empty() {
        out.push_str(&format!("【整体大纲】\n{}\n\n", state.outline));
    }
    if !state.detailed_outline.is_empty() {
        out.push_str(&format!("【详细细纲】\n{}\n\n", state.detailed_outline));
    }

    for (index, chapter) in state.chapters.iter().enumerate() {
        out.push_str(&format!("第{}章 {}\n", index + 1, or_placeholder(&chapter.title, "未命名")));
        out.push_str(&format!("摘要：{}\n\n", or_placeholder(&chapter.summary, "暂无")));
        out.push_str(&format!("{}\n\n", or_placeholder(&chapter.content, "（尚未创作正文）")));
        let metadata = &chapter.metadata;
        out.push_str(&format!("角色：{}\n", or_placeholder(&metadata.characters, "未记录")));
        out.push_str(&format!("剧情：{}\n", or_placeholder(&metadata.plot, "未记录")));
        out.push_str(&format!("伏笔：{}\n\n", or_placeholder(&metadata.foreshadowing, "未记录")));
        out.push_str(&format!("{}\n\n", "-".repeat(40)));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::NativeStorage;
    use crate::core::state::{Chapter, ChapterStatus, Stage};
    use crate::services::metadata::recompute_aggregated_metadata;
    use async_trait::async_trait;
    use std::fs;
    use std::path::Path;
    use std::time::Duration;

    /// Native storage that takes a while to write one particular file.
    struct SlowFileStorage {
        inner: NativeStorage,
        slow_path: String,
    }

    #[async_trait]
    impl Storage for SlowFileStorage {
        async fn read(&self, path: &str) -> Result<Vec<u8>> {
            self.inner.read(path).await
        }

        async fn write(&self, path: &str, content: &[u8]) -> Result<()> {
            if path == self.slow_path {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            self.inner.write(path, content).await
        }

        async fn delete(&self, path: &str) -> Result<()> {
            self.inner.delete(path).await
        }

        async fn exists(&self, path: &str) -> Result<bool> {
            self.inner.exists(path).await
        }
    }

    fn path_str(path: &Path) -> String {
        path.to_string_lossy().to_string()
    }

    fn sample_state() -> ProjectState {
        let mut state = ProjectState::default();
        state.novel_info.title = "星海".to_string();
        state.project_name = "星海".to_string();
        state.current_step = Stage::ChapterCreation;
        state.outline = "大纲".to_string();
        state.mark_step_completed(Stage::NovelInfo);
        let mut chapter = Chapter::new("觉醒", "李明醒来");
        chapter.content = "正文".to_string();
        chapter.metadata.characters = "李明：主角".to_string();
        chapter.status = ChapterStatus::Completed;
        state.chapters.push(chapter);
        state.chapters.push(Chapter::new("抉择", ""));
        state.aggregated_metadata = recompute_aggregated_metadata(&state.chapters);
        state.saved_at = Some(chrono::Utc::now());
        state
    }

    #[tokio::test]
    async fn test_json_round_trip() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let cache = path_str(&temp_dir.path().join("cache.json"));
        let store = ProjectStore::new(Arc::new(NativeStorage::new()), cache);
        let state = sample_state();

        let export_path = path_str(&temp_dir.path().join("export").join("星海.json"));
        store.export_json(&state, &export_path).await?;
        let restored = store.import_from_file(&export_path).await?;

        assert_eq!(restored, state);
        assert_eq!(
            recompute_aggregated_metadata(&restored.chapters),
            state.aggregated_metadata
        );
        // Import mirrors into the cache.
        assert_eq!(store.load().await?, Some(state));
        Ok(())
    }

    #[tokio::test]
    async fn test_load_missing_and_corrupt_cache() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let cache = temp_dir.path().join("cache.json");
        let store = ProjectStore::new(Arc::new(NativeStorage::new()), path_str(&cache));

        assert!(store.load().await?.is_none());

        fs::write(&cache, "{ not json")?;
        assert!(store.load().await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_autosave_writes_cache_and_file() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let cache = temp_dir.path().join("cache.json");
        let project_file = temp_dir.path().join("novel.json");
        let store = ProjectStore::new(Arc::new(NativeStorage::new()), path_str(&cache));

        let mut state = sample_state();
        assert!(store.autosave(&state).await);
        assert!(cache.exists());
        assert!(!project_file.exists());

        let outcome = store.enable_file_storage(&path_str(&project_file), &state).await;
        assert_eq!(outcome, SaveOutcome::File(path_str(&project_file)));

        for step in ["一", "二", "三"] {
            state.outline = format!("大纲{}", step);
            assert!(store.autosave(&state).await);
        }
        store.flush().await;

        let written: ProjectState = serde_json::from_str(&fs::read_to_string(&project_file)?)?;
        assert_eq!(written.outline, "大纲三");
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_file_write_degrades_to_cache() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let cache = temp_dir.path().join("cache.json");
        let store = ProjectStore::new(Arc::new(NativeStorage::new()), path_str(&cache));
        let state = sample_state();

        // A directory cannot be written as a file.
        let outcome = store.enable_file_storage(&path_str(temp_dir.path()), &state).await;
        assert!(matches!(outcome, SaveOutcome::Failed(_)));
        assert!(store.file_target().is_none());
        assert!(cache.exists());

        assert_eq!(store.save(&state).await, SaveOutcome::Cache);
        Ok(())
    }

    #[tokio::test]
    async fn test_clear_forgets_everything() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let cache = temp_dir.path().join("cache.json");
        let store = ProjectStore::new(Arc::new(NativeStorage::new()), path_str(&cache));
        let state = sample_state();

        store
            .enable_file_storage(&path_str(&temp_dir.path().join("novel.json")), &state)
            .await;
        store.clear().await?;

        assert!(!cache.exists());
        assert!(store.file_target().is_none());
        assert!(store.load().await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_clear_drops_queued_file_writes() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let cache = temp_dir.path().join("cache.json");
        let project_file = path_str(&temp_dir.path().join("novel.json"));
        let storage = SlowFileStorage {
            inner: NativeStorage::new(),
            slow_path: project_file.clone(),
        };
        let store = ProjectStore::new(Arc::new(storage), path_str(&cache));

        let mut state = sample_state();
        state.outline = "已启用".to_string();
        store.enable_file_storage(&project_file, &state).await;

        for outline in ["甲", "乙", "丙"] {
            state.outline = outline.to_string();
            assert!(store.autosave(&state).await);
        }
        store.clear().await?;
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(store.file_target().is_none());
        let written: ProjectState = serde_json::from_str(&fs::read_to_string(&project_file)?)?;
        assert_eq!(written.outline, "已启用");
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_cache_write_is_reported() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        // A directory cannot be written as a file.
        let store = ProjectStore::new(Arc::new(NativeStorage::new()), path_str(temp_dir.path()));

        let outcome = store.save(&sample_state()).await;
        assert!(matches!(outcome, SaveOutcome::Failed(_)));
        Ok(())
    }

    #[test]
    fn test_render_manuscript() {
        let text = render_manuscript(&sample_state());
        assert!(text.starts_with("星海\n====="));
        assert!(text.contains("章节数：未设定"));
        assert!(text.contains("【整体大纲】\n大纲"));
        assert!(text.contains("第1章 觉醒\n摘要：李明醒来\n\n正文"));
        assert!(text.contains("第2章 抉择\n摘要：暂无\n\n（尚未创作正文）"));
        assert!(text.contains("角色：李明：主角"));
        assert!(!text.contains("【详细细纲】"));
    }
}
