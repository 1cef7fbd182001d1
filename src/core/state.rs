use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

pub const UNTITLED_PROJECT: &str = "未命名项目";
pub const UNTITLED_CHAPTER: &str = "未命名";

/// Upper bound on the declared target chapter count.
pub const MAX_CHAPTER_COUNT: u32 = 500;

/// Wizard stages in the order they are walked through.
#[derive(Serialize, Deserialize, Default, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    #[default]
    Config,
    NovelInfo,
    Outline,
    DetailedOutline,
    ChapterCreation,
}

impl Stage {
    /// Stages shown in the progress bar; `Config` is a setup screen, not a step.
    pub const STEPS: [Stage; 4] = [
        Stage::NovelInfo,
        Stage::Outline,
        Stage::DetailedOutline,
        Stage::ChapterCreation,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Self::Config => "配置",
            Self::NovelInfo => "基本信息",
            Self::Outline => "大纲",
            Self::DetailedOutline => "细纲",
            Self::ChapterCreation => "章节创作",
        }
    }
}

/// Per-chapter phase inside `Stage::ChapterCreation`.
#[derive(Serialize, Deserialize, Default, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SubStage {
    #[default]
    Summary,
    Content,
    Metadata,
}

#[derive(Serialize, Deserialize, Default, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ChapterStatus {
    #[default]
    Planning,
    Drafting,
    Completed,
}

impl ChapterStatus {
    /// Moves forward to `next`; a status never moves backwards.
    pub fn advance_to(&mut self, next: ChapterStatus) {
        if next > *self {
            *self = next;
        }
    }
}

/// Opaque chapter key. Older project files stored a numeric timestamp, so
/// numbers are accepted on load and kept as their decimal text.
#[derive(Serialize, Clone, Debug, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct ChapterId(String);

impl ChapterId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ChapterId {
    fn default() -> Self {
        Self::generate()
    }
}

impl<'de> Deserialize<'de> for ChapterId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Text(String),
            Number(serde_json::Number),
        }

        Ok(match RawId::deserialize(deserializer)? {
            RawId::Text(text) => Self(text),
            RawId::Number(number) => Self(number.to_string()),
        })
    }
}

#[derive(Serialize, Deserialize, Default, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct NovelInfo {
    pub title: String,
    pub description: String,
    pub reference: String,
    pub style: String,
    pub chapter_count: u32,
}

#[derive(Serialize, Deserialize, Default, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ChapterMetadata {
    pub characters: String,
    pub plot: String,
    pub foreshadowing: String,
    pub structured: Option<serde_json::Value>,
}

impl ChapterMetadata {
    pub fn is_empty(&self) -> bool {
        self.characters.is_empty() && self.plot.is_empty() && self.foreshadowing.is_empty()
    }
}

#[derive(Serialize, Deserialize, Default, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Chapter {
    pub id: ChapterId,
    pub title: String,
    pub summary: String,
    pub content: String,
    pub metadata: ChapterMetadata,
    pub status: ChapterStatus,
}

impl Chapter {
    pub fn new(title: impl Into<String>, summary: impl Into<String>) -> Self {
        let title = title.into();
        Self {
            id: ChapterId::generate(),
            title: if title.trim().is_empty() {
                UNTITLED_CHAPTER.to_string()
            } else {
                title
            },
            summary: summary.into(),
            ..Default::default()
        }
    }

    /// Text used when this chapter is recalled as context for a later one.
    pub fn recap(&self) -> &str {
        if self.metadata.plot.is_empty() {
            &self.summary
        } else {
            &self.metadata.plot
        }
    }
}

#[derive(Serialize, Deserialize, Default, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct CharacterSummary {
    pub name: String,
    pub role: String,
    pub status: String,
}

/// Project-wide rollup of all chapters' metadata. Derived data: rebuilt by
/// `services::metadata::recompute_aggregated_metadata`.
#[derive(Serialize, Deserialize, Default, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct AggregatedMetadata {
    pub protagonist: Option<CharacterSummary>,
    pub characters: Vec<CharacterSummary>,
    pub foreshadowing: Vec<String>,
}

#[derive(Serialize, Deserialize, Default, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ProjectState {
    pub project_name: String,
    pub current_step: Stage,
    pub novel_info: NovelInfo,
    pub outline: String,
    pub detailed_outline: String,
    pub chapters: Vec<Chapter>,
    pub completed_steps: Vec<Stage>,
    pub current_chapter_index: usize,
    pub chapter_sub_step: SubStage,
    pub aggregated_metadata: AggregatedMetadata,
    pub metadata_notes: String,
    pub saved_at: Option<DateTime<Utc>>,
}

impl ProjectState {
    pub fn is_step_completed(&self, stage: Stage) -> bool {
        self.completed_steps.contains(&stage)
    }

    pub fn mark_step_completed(&mut self, stage: Stage) {
        if !self.is_step_completed(stage) {
            self.completed_steps.push(stage);
        }
    }

    pub fn current_chapter(&self) -> Option<&Chapter> {
        self.chapters.get(self.current_chapter_index)
    }

    pub fn current_chapter_mut(&mut self) -> Option<&mut Chapter> {
        self.chapters.get_mut(self.current_chapter_index)
    }

    pub fn completed_chapter_count(&self) -> usize {
        self.chapters
            .iter()
            .filter(|c| c.status == ChapterStatus::Completed)
            .count()
    }

    pub fn all_chapters_completed(&self) -> bool {
        !self.chapters.is_empty()
            && self
                .chapters
                .iter()
                .all(|c| c.status == ChapterStatus::Completed)
    }

    pub fn display_name(&self) -> &str {
        if self.novel_info.title.trim().is_empty() {
            UNTITLED_PROJECT
        } else {
            &self.novel_info.title
        }
    }

    /// Pulls a freshly loaded snapshot back inside the index and chapter-count bounds.
    pub fn normalize(&mut self) {
        self.novel_info.chapter_count = self.novel_info.chapter_count.min(MAX_CHAPTER_COUNT);
        if self.chapters.is_empty() {
            self.current_chapter_index = 0;
        } else if self.current_chapter_index >= self.chapters.len() {
            self.current_chapter_index = self.chapters.len() - 1;
        }
    }
}
