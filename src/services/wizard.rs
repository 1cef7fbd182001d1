use crate::core::state::{
    Chapter, ChapterMetadata, ChapterStatus, NovelInfo, ProjectState, Stage, SubStage,
    MAX_CHAPTER_COUNT,
};
use crate::services::chapters::{self, FallbackReason};
use crate::services::llm::{LlmClient, LlmError, Prompt};
use crate::services::metadata::{parse_chapter_metadata, recompute_aggregated_metadata};
use crate::services::persistence::{ProjectStore, SaveOutcome};
use crate::services::prompts;
use anyhow::Result;
use chrono::Utc;
use log::{error, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum WizardError {
    #[error("a generation request is already in flight")]
    Busy,
    #[error("{0}")]
    Precondition(String),
    #[error(transparent)]
    Generation(#[from] LlmError),
}

fn precondition(message: &str) -> WizardError {
    WizardError::Precondition(message.to_string())
}

/// Result of turning the detailed outline into chapters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionReport {
    pub chapter_count: usize,
    /// Set when the model output could not be used and a text heuristic took over.
    pub fallback: Option<FallbackReason>,
}

/// Field-wise edits a user makes to a chapter; `None` leaves a field alone.
#[derive(Debug, Clone, Default)]
pub struct ChapterEdit {
    pub title: Option<String>,
    pub summary: Option<String>,
    pub content: Option<String>,
    pub metadata: Option<ChapterMetadata>,
}

/// Holds the busy flag for as long as one generation request is in flight.
struct BusyGuard(Arc<AtomicBool>);

impl BusyGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Result<Self, WizardError> {
        if flag.swap(true, Ordering::AcqRel) {
            return Err(WizardError::Busy);
        }
        Ok(Self(flag.clone()))
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Drives a project through the wizard stages. Every mutation of the project
/// state goes through this type; a failed generation changes nothing.
pub struct NovelWizard {
    llm: Box<dyn LlmClient>,
    store: Option<Arc<ProjectStore>>,
    state: ProjectState,
    busy: Arc<AtomicBool>,
}

impl NovelWizard {
    pub fn new(llm: Box<dyn LlmClient>) -> Self {
        Self {
            llm,
            store: None,
            state: ProjectState::default(),
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_store(mut self, store: Arc<ProjectStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Swaps the model client after the connection settings changed.
    pub fn set_llm(&mut self, llm: Box<dyn LlmClient>) {
        self.llm = llm;
    }

    pub fn state(&self) -> &ProjectState {
        &self.state
    }

    pub fn current_chapter(&self) -> Option<&Chapter> {
        self.state.current_chapter()
    }

    pub fn stage_label(&self) -> &'static str {
        self.state.current_step.label()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Shared handle to the busy flag, for front-ends that render progress.
    pub fn busy_flag(&self) -> Arc<AtomicBool> {
        self.busy.clone()
    }

    pub fn completed_chapter_count(&self) -> usize {
        self.state.completed_chapter_count()
    }

    pub fn all_chapters_completed(&self) -> bool {
        self.state.all_chapters_completed()
    }

    async fn generate(&self, prompt: &Prompt) -> Result<String, WizardError> {
        let _guard = BusyGuard::acquire(&self.busy)?;
        Ok(self.llm.chat(prompt).await?)
    }

    fn refresh_aggregated_metadata(&mut self) {
        self.state.aggregated_metadata = recompute_aggregated_metadata(&self.state.chapters);
    }

    async fn autosave(&mut self) {
        if self.state.current_step == Stage::Config {
            return;
        }
        let Some(store) = self.store.clone() else {
            return;
        };
        self.state.project_name = self.state.display_name().to_string();
        self.state.saved_at = Some(Utc::now());
        if !store.autosave(&self.state).await {
            error!("Autosave failed; changes are only held in memory");
        }
    }

    /// Installs a loaded snapshot. A snapshot saved on the config screen
    /// does not move the wizard back there.
    fn adopt(&mut self, mut loaded: ProjectState) {
        if loaded.current_step == Stage::Config {
            loaded.current_step = self.state.current_step;
        }
        loaded.normalize();
        self.state = loaded;
        self.refresh_aggregated_metadata();
    }

    // --- Persistence ---

    /// Restores the cached project, if there is one.
    pub async fn load_saved(&mut self) -> Result<bool> {
        let Some(store) = self.store.clone() else {
            return Ok(false);
        };
        match store.load().await? {
            Some(loaded) => {
                info!("Restored project '{}'", loaded.display_name());
                self.adopt(loaded);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn import_project(&mut self, path: &str) -> Result<()> {
        let store = self.require_store()?;
        let loaded = store.import_from_file(path).await?;
        self.adopt(loaded);
        Ok(())
    }

    pub async fn save(&mut self) -> Result<SaveOutcome> {
        let store = self.require_store()?;
        self.state.project_name = self.state.display_name().to_string();
        self.state.saved_at = Some(Utc::now());
        Ok(store.save(&self.state).await)
    }

    pub async fn enable_file_storage(&mut self, path: &str) -> Result<SaveOutcome> {
        let store = self.require_store()?;
        self.state.project_name = self.state.display_name().to_string();
        self.state.saved_at = Some(Utc::now());
        Ok(store.enable_file_storage(path, &self.state).await)
    }

    pub async fn export_json(&self, path: &str) -> Result<()> {
        self.require_store()?.export_json(&self.state, path).await
    }

    pub async fn export_text(&self, path: &str) -> Result<()> {
        self.require_store()?.export_text(&self.state, path).await
    }

    fn require_store(&self) -> Result<Arc<ProjectStore>> {
        self.store
            .clone()
            .ok_or_else(|| anyhow::anyhow!("No project store configured"))
    }

    /// Drops the whole project and starts over at the premise step.
    pub async fn reset_project(&mut self) {
        if let Some(store) = &self.store {
            if let Err(e) = store.clear().await {
                error!("Failed to clear saved project: {:#}", e);
            }
        }
        self.state = ProjectState {
            current_step: Stage::NovelInfo,
            ..Default::default()
        };
        info!("Project reset");
    }

    // --- User edits ---

    pub fn confirm_config(&mut self) -> Result<(), WizardError> {
        if !self.llm.is_ready() {
            return Err(precondition("AI connection settings are incomplete"));
        }
        if self.state.current_step == Stage::Config {
            self.state.current_step = Stage::NovelInfo;
        }
        Ok(())
    }

    pub async fn update_novel_info(&mut self, mut info: NovelInfo) {
        info.chapter_count = info.chapter_count.min(MAX_CHAPTER_COUNT);
        self.state.novel_info = info;
        self.state.project_name = self.state.display_name().to_string();
        self.autosave().await;
    }

    pub async fn set_outline(&mut self, outline: String) {
        self.state.outline = outline;
        self.autosave().await;
    }

    pub async fn set_detailed_outline(&mut self, detailed_outline: String) {
        self.state.detailed_outline = detailed_outline;
        self.autosave().await;
    }

    pub async fn set_metadata_notes(&mut self, notes: String) {
        self.state.metadata_notes = notes;
        self.autosave().await;
    }

    pub async fn update_chapter(
        &mut self,
        index: usize,
        edit: ChapterEdit,
    ) -> Result<(), WizardError> {
        let chapter = self
            .state
            .chapters
            .get_mut(index)
            .ok_or_else(|| precondition("No chapter at that position"))?;

        if let Some(title) = edit.title {
            chapter.title = title;
        }
        if let Some(summary) = edit.summary {
            chapter.summary = summary;
        }
        if let Some(content) = edit.content {
            chapter.content = content;
        }
        let metadata_changed = edit.metadata.is_some();
        if let Some(metadata) = edit.metadata {
            chapter.metadata = metadata;
        }

        if metadata_changed {
            self.refresh_aggregated_metadata();
        }
        self.autosave().await;
        Ok(())
    }

    /// Appends an empty chapter and makes it current. Returns its index.
    pub async fn add_chapter(&mut self) -> usize {
        let title = format!("第{}章", self.state.chapters.len() + 1);
        self.state.chapters.push(Chapter::new(title, ""));
        self.state.current_chapter_index = self.state.chapters.len() - 1;
        self.state.chapter_sub_step = SubStage::Summary;
        self.autosave().await;
        self.state.current_chapter_index
    }

    pub fn select_chapter(&mut self, index: usize) -> Result<(), WizardError> {
        let chapter = self
            .state
            .chapters
            .get(index)
            .ok_or_else(|| precondition("No chapter at that position"))?;

        self.state.chapter_sub_step = if chapter.status == ChapterStatus::Completed {
            SubStage::Summary
        } else if !chapter.content.is_empty() {
            SubStage::Metadata
        } else {
            SubStage::Summary
        };
        self.state.current_chapter_index = index;
        Ok(())
    }

    // --- Generation steps ---

    pub async fn generate_outline(&mut self) -> Result<(), WizardError> {
        if self.state.novel_info.description.trim().is_empty() {
            return Err(precondition("Describe the novel first"));
        }
        let prompt = prompts::outline_prompt(&self.state);
        let outline = self.generate(&prompt).await?;

        self.state.outline = outline;
        self.state.current_step = Stage::Outline;
        self.state.mark_step_completed(Stage::NovelInfo);
        info!("Outline generated ({} chars)", self.state.outline.chars().count());
        self.autosave().await;
        Ok(())
    }

    pub async fn regenerate_outline(&mut self) -> Result<(), WizardError> {
        self.generate_outline().await
    }

    pub async fn generate_detailed_outline(&mut self) -> Result<(), WizardError> {
        if self.state.outline.trim().is_empty() {
            return Err(precondition("Generate an outline first"));
        }
        let prompt = prompts::detailed_outline_prompt(&self.state);
        let detailed_outline = self.generate(&prompt).await?;

        self.state.detailed_outline = detailed_outline;
        self.state.current_step = Stage::DetailedOutline;
        self.state.mark_step_completed(Stage::Outline);
        info!("Detailed outline generated");
        self.autosave().await;
        Ok(())
    }

    pub async fn regenerate_detailed_outline(&mut self) -> Result<(), WizardError> {
        self.generate_detailed_outline().await
    }

    /// Asks the model for the chapter list and replaces all chapters with it.
    pub async fn extract_chapters(&mut self) -> Result<ExtractionReport, WizardError> {
        if self.state.detailed_outline.trim().is_empty() {
            return Err(precondition("Generate a detailed outline first"));
        }
        let prompt = prompts::chapter_summaries_prompt(&self.state);
        let response = self.generate(&prompt).await?;

        let extraction = chapters::extract_chapters(
            &response,
            &self.state.detailed_outline,
            self.state.novel_info.chapter_count,
        );
        let report = ExtractionReport {
            chapter_count: extraction.drafts().len(),
            fallback: extraction.warning().cloned(),
        };

        self.state.chapters = extraction.into_chapters();
        self.state.current_chapter_index = 0;
        self.state.chapter_sub_step = SubStage::Summary;
        self.state.current_step = Stage::ChapterCreation;
        self.state.mark_step_completed(Stage::DetailedOutline);
        self.refresh_aggregated_metadata();
        info!("Extracted {} chapters", report.chapter_count);
        self.autosave().await;
        Ok(report)
    }

    pub async fn generate_chapter_content(&mut self) -> Result<(), WizardError> {
        let index = self.state.current_chapter_index;
        let prompt = prompts::chapter_content_prompt(&self.state, index)
            .ok_or_else(|| precondition("There is no chapter to write"))?;
        let content = self.generate(&prompt).await?;

        let chapter = self
            .state
            .chapters
            .get_mut(index)
            .ok_or_else(|| precondition("There is no chapter to write"))?;
        chapter.content = content;
        chapter.status.advance_to(ChapterStatus::Drafting);
        self.state.chapter_sub_step = SubStage::Content;
        info!("Drafted chapter {}", index + 1);
        self.autosave().await;
        Ok(())
    }

    pub async fn regenerate_chapter_content(&mut self) -> Result<(), WizardError> {
        self.generate_chapter_content().await
    }

    pub async fn generate_chapter_metadata(&mut self) -> Result<(), WizardError> {
        let index = self.state.current_chapter_index;
        let has_content = self
            .state
            .current_chapter()
            .is_some_and(|c| !c.content.trim().is_empty());
        if !has_content {
            return Err(precondition("Write the chapter content first"));
        }
        let prompt = prompts::chapter_metadata_prompt(&self.state, index)
            .ok_or_else(|| precondition("Write the chapter content first"))?;
        let analysis = self.generate(&prompt).await?;

        let parsed = parse_chapter_metadata(&analysis);
        let chapter = self
            .state
            .chapters
            .get_mut(index)
            .ok_or_else(|| precondition("Write the chapter content first"))?;
        chapter.metadata = ChapterMetadata {
            structured: chapter.metadata.structured.take(),
            ..parsed
        };
        self.state.chapter_sub_step = SubStage::Metadata;
        self.refresh_aggregated_metadata();
        info!("Extracted metadata for chapter {}", index + 1);
        self.autosave().await;
        Ok(())
    }

    /// Marks the current chapter completed and moves on to the next one.
    pub async fn confirm_chapter(&mut self) -> Result<(), WizardError> {
        let index = self.state.current_chapter_index;
        let chapter = self
            .state
            .current_chapter_mut()
            .ok_or_else(|| precondition("There is no chapter to confirm"))?;
        chapter.status.advance_to(ChapterStatus::Completed);

        if index + 1 < self.state.chapters.len() {
            self.state.current_chapter_index = index + 1;
            self.state.chapter_sub_step = SubStage::Summary;
        } else {
            self.refresh_aggregated_metadata();
            info!("Last chapter confirmed");
        }
        self.autosave().await;
        Ok(())
    }
}
