//! Interactive console front-end. Everything here is prompt glue around
//! `NovelWizard`; no project logic lives in this module.

use crate::core::config::{Config, LlmConfig};
use crate::core::state::{
    ChapterStatus, NovelInfo, ProjectState, Stage, SubStage, MAX_CHAPTER_COUNT,
};
use crate::services::llm::create_llm;
use crate::services::persistence::SaveOutcome;
use crate::services::wizard::{ChapterEdit, NovelWizard};
use anyhow::Result;
use chrono::Local;
use indicatif::{ProgressBar, ProgressStyle};
use inquire::validator::Validation;
use inquire::{
    Confirm, CustomType, Editor, InquireError, Password, PasswordDisplayMode, Select, Text,
};
use std::fmt;
use std::future::Future;
use std::path::Path;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const MENU_PAGE_SIZE: usize = 15;

fn or_default<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.trim().is_empty() {
        fallback
    } else {
        value
    }
}

/// Asks for the model connection settings and writes them to `config.yml`.
pub fn configure_llm(config: &mut Config) -> Result<()> {
    let base_url = Text::new("API base URL:")
        .with_default(or_default(&config.llm.base_url, DEFAULT_BASE_URL))
        .prompt()?;
    let model = Text::new("Model name:")
        .with_default(or_default(&config.llm.model, DEFAULT_MODEL))
        .prompt()?;
    let api_key = Password::new("API key (leave empty to keep the current one):")
        .without_confirmation()
        .with_display_mode(PasswordDisplayMode::Masked)
        .prompt()?;

    let api_key = if api_key.trim().is_empty() {
        config.llm.api_key.clone()
    } else {
        api_key.trim().to_string()
    };
    config.llm = LlmConfig {
        base_url: base_url.trim().to_string(),
        model: model.trim().to_string(),
        api_key,
    };
    config.validate()?;
    config.save()?;
    println!("Configuration saved.");
    Ok(())
}

/// Runs `task` behind a spinner that is cleared once it settles.
async fn with_spinner<F, T>(message: &str, task: F) -> T
where
    F: Future<Output = T>,
{
    let pb = ProgressBar::new_spinner();
    let template = "{spinner:.green} [{elapsed_precise}] {msg}";
    if let Ok(style) = ProgressStyle::default_spinner().template(template) {
        pb.set_style(style);
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(120));
    let result = task.await;
    pb.finish_and_clear();
    result
}

fn status_label(status: ChapterStatus) -> &'static str {
    match status {
        ChapterStatus::Planning => "规划中",
        ChapterStatus::Drafting => "创作中",
        ChapterStatus::Completed => "已完成",
    }
}

fn sub_stage_label(sub_stage: SubStage) -> &'static str {
    match sub_stage {
        SubStage::Summary => "章节摘要",
        SubStage::Content => "章节内容",
        SubStage::Metadata => "元数据",
    }
}

/// Replaces characters that are not allowed in file names.
fn file_stem(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            _ => c,
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    ConfigureLlm,
    ConfirmConfig,
    EditNovelInfo,
    GenerateOutline,
    ViewOutline,
    EditOutline,
    RegenerateOutline,
    GenerateDetailedOutline,
    ViewDetailedOutline,
    EditDetailedOutline,
    RegenerateDetailedOutline,
    ExtractChapters,
    ViewChapter,
    SelectChapter,
    AddChapter,
    EditChapter,
    GenerateContent,
    RegenerateContent,
    GenerateMetadata,
    ConfirmChapter,
    ViewAggregated,
    EditMetadataNotes,
    Save,
    EnableFileStorage,
    ExportJson,
    ExportText,
    Import,
    Reset,
    Quit,
}

impl Action {
    fn label(self) -> &'static str {
        match self {
            Self::ConfigureLlm => "配置 AI 连接",
            Self::ConfirmConfig => "保存配置并开始",
            Self::EditNovelInfo => "编辑小说信息",
            Self::GenerateOutline => "生成大纲",
            Self::ViewOutline => "查看大纲",
            Self::EditOutline => "编辑大纲",
            Self::RegenerateOutline => "重新生成大纲",
            Self::GenerateDetailedOutline => "生成细纲",
            Self::ViewDetailedOutline => "查看细纲",
            Self::EditDetailedOutline => "编辑细纲",
            Self::RegenerateDetailedOutline => "重新生成细纲",
            Self::ExtractChapters => "提取章节并开始创作",
            Self::ViewChapter => "查看当前章节",
            Self::SelectChapter => "切换章节",
            Self::AddChapter => "添加章节",
            Self::EditChapter => "编辑当前章节",
            Self::GenerateContent => "生成章节内容",
            Self::RegenerateContent => "重新生成章节内容",
            Self::GenerateMetadata => "提取章节元数据",
            Self::ConfirmChapter => "确认本章",
            Self::ViewAggregated => "查看全局元数据",
            Self::EditMetadataNotes => "编辑元数据备注",
            Self::Save => "保存项目",
            Self::EnableFileStorage => "保存到项目文件",
            Self::ExportJson => "导出 JSON",
            Self::ExportText => "导出文本",
            Self::Import => "导入项目",
            Self::Reset => "重新开始",
            Self::Quit => "退出",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Actions offered for the current stage, most likely next step first.
fn actions_for(state: &ProjectState) -> Vec<Action> {
    use Action::*;

    let mut actions = match state.current_step {
        Stage::Config => return vec![ConfirmConfig, ConfigureLlm, Import, Quit],
        Stage::NovelInfo => vec![EditNovelInfo, GenerateOutline],
        Stage::Outline => vec![
            GenerateDetailedOutline,
            ViewOutline,
            EditOutline,
            RegenerateOutline,
            EditNovelInfo,
        ],
        Stage::DetailedOutline => vec![
            ExtractChapters,
            ViewDetailedOutline,
            EditDetailedOutline,
            RegenerateDetailedOutline,
            ViewOutline,
        ],
        Stage::ChapterCreation => {
            let mut chapter_actions = Vec::new();
            if let Some(chapter) = state.current_chapter() {
                if chapter.content.trim().is_empty() {
                    chapter_actions.push(GenerateContent);
                } else {
                    if chapter.status != ChapterStatus::Completed {
                        if chapter.metadata.is_empty() {
                            chapter_actions.push(GenerateMetadata);
                        }
                        chapter_actions.push(ConfirmChapter);
                    }
                    chapter_actions.push(RegenerateContent);
                    if !chapter.metadata.is_empty() {
                        chapter_actions.push(GenerateMetadata);
                    }
                }
                chapter_actions.extend([ViewChapter, EditChapter]);
            }
            chapter_actions.extend([
                SelectChapter,
                AddChapter,
                ViewAggregated,
                EditMetadataNotes,
                ViewDetailedOutline,
            ]);
            chapter_actions
        }
    };

    actions.extend([
        Save,
        EnableFileStorage,
        ExportJson,
        ExportText,
        Import,
        ConfigureLlm,
        Reset,
        Quit,
    ]);
    actions
}

fn print_section(title: &str, body: &str) {
    println!("\n── {} ──", title);
    if body.trim().is_empty() {
        println!("(空)");
    } else {
        println!("{}", body.trim_end());
    }
}

/// Opens the external editor with `current`; returns `None` when the user backs out.
fn edit_text(message: &str, current: &str) -> Result<Option<String>> {
    Ok(Editor::new(message)
        .with_predefined_text(current)
        .with_file_extension(".md")
        .prompt_skippable()?)
}

pub struct ConsoleApp {
    config: Config,
    wizard: NovelWizard,
}

impl ConsoleApp {
    pub fn new(config: Config, wizard: NovelWizard) -> Self {
        Self { config, wizard }
    }

    pub async fn run(&mut self) -> Result<()> {
        loop {
            self.print_status();
            let actions = actions_for(self.wizard.state());
            let Some(action) = Select::new("选择操作：", actions)
                .with_page_size(MENU_PAGE_SIZE)
                .prompt_skippable()?
            else {
                break;
            };
            if action == Action::Quit {
                break;
            }

            if let Err(e) = self.dispatch(action).await {
                match e.downcast_ref::<InquireError>() {
                    Some(InquireError::OperationCanceled) => {}
                    Some(InquireError::OperationInterrupted) => return Err(e),
                    _ => println!("✗ {:#}", e),
                }
            }
        }
        Ok(())
    }

    fn print_status(&self) {
        let state = self.wizard.state();
        let steps: Vec<String> = Stage::STEPS
            .iter()
            .map(|stage| {
                let mark = if *stage == state.current_step {
                    "▶"
                } else if state.is_step_completed(*stage) {
                    "✓"
                } else {
                    "·"
                };
                format!("{} {}", mark, stage.label())
            })
            .collect();

        println!();
        println!(
            "《{}》 [{}]  {}",
            state.display_name(),
            self.wizard.stage_label(),
            steps.join("  ")
        );

        if state.current_step == Stage::ChapterCreation {
            if let Some(chapter) = state.current_chapter() {
                println!(
                    "第{}/{}章 {} · {} · {}  (已完成 {}/{})",
                    state.current_chapter_index + 1,
                    state.chapters.len(),
                    chapter.title,
                    status_label(chapter.status),
                    sub_stage_label(state.chapter_sub_step),
                    self.wizard.completed_chapter_count(),
                    state.chapters.len()
                );
            }
            if self.wizard.all_chapters_completed() {
                println!("所有章节均已完成，可以导出全文。");
            }
        }
        if let Some(saved_at) = state.saved_at {
            println!("上次保存：{}", saved_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"));
        }
    }

    async fn dispatch(&mut self, action: Action) -> Result<()> {
        match action {
            Action::ConfigureLlm => {
                configure_llm(&mut self.config)?;
                self.wizard.set_llm(create_llm(&self.config));
            }
            Action::ConfirmConfig => {
                if !self.config.is_ready() {
                    configure_llm(&mut self.config)?;
                    self.wizard.set_llm(create_llm(&self.config));
                }
                self.wizard.confirm_config()?;
            }
            Action::EditNovelInfo => self.edit_novel_info().await?,
            Action::GenerateOutline | Action::RegenerateOutline => {
                with_spinner("正在生成大纲…", self.wizard.generate_outline()).await?;
                print_section("大纲", &self.wizard.state().outline);
            }
            Action::ViewOutline => print_section("大纲", &self.wizard.state().outline),
            Action::EditOutline => {
                if let Some(text) = edit_text("编辑大纲：", &self.wizard.state().outline)? {
                    self.wizard.set_outline(text).await;
                }
            }
            Action::GenerateDetailedOutline | Action::RegenerateDetailedOutline => {
                with_spinner("正在生成细纲…", self.wizard.generate_detailed_outline()).await?;
                print_section("细纲", &self.wizard.state().detailed_outline);
            }
            Action::ViewDetailedOutline => {
                print_section("细纲", &self.wizard.state().detailed_outline)
            }
            Action::EditDetailedOutline => {
                if let Some(text) = edit_text("编辑细纲：", &self.wizard.state().detailed_outline)? {
                    self.wizard.set_detailed_outline(text).await;
                }
            }
            Action::ExtractChapters => {
                let report = with_spinner("正在提取章节…", self.wizard.extract_chapters()).await?;
                if let Some(fallback) = &report.fallback {
                    println!("⚠ {}", fallback);
                }
                println!("共 {} 章。", report.chapter_count);
            }
            Action::ViewChapter => self.view_chapter(),
            Action::SelectChapter => self.select_chapter()?,
            Action::AddChapter => {
                let index = self.wizard.add_chapter().await;
                println!("已添加第{}章。", index + 1);
            }
            Action::EditChapter => self.edit_chapter().await?,
            Action::GenerateContent | Action::RegenerateContent => {
                with_spinner("正在创作章节内容…", self.wizard.generate_chapter_content()).await?;
                self.view_chapter();
            }
            Action::GenerateMetadata => {
                with_spinner("正在提取元数据…", self.wizard.generate_chapter_metadata()).await?;
                if let Some(chapter) = self.wizard.current_chapter() {
                    print_section("角色信息", &chapter.metadata.characters);
                    print_section("情节发展", &chapter.metadata.plot);
                    print_section("伏笔与线索", &chapter.metadata.foreshadowing);
                }
            }
            Action::ConfirmChapter => {
                self.wizard.confirm_chapter().await?;
                if self.wizard.all_chapters_completed() {
                    println!("全部章节创作完成！");
                }
            }
            Action::ViewAggregated => self.view_aggregated(),
            Action::EditMetadataNotes => {
                if let Some(text) = edit_text("编辑元数据备注：", &self.wizard.state().metadata_notes)? {
                    self.wizard.set_metadata_notes(text).await;
                }
            }
            Action::Save => match self.wizard.save().await? {
                SaveOutcome::Cache => println!("已保存到本地缓存。"),
                SaveOutcome::File(path) => println!("已保存到 {}", path),
                SaveOutcome::Failed(reason) => println!("✗ 保存失败，已切换为仅缓存：{}", reason),
            },
            Action::EnableFileStorage => {
                let default_path = Path::new(&self.config.storage.export_folder)
                    .join(format!("{}.json", file_stem(self.wizard.state().display_name())));
                let path = Text::new("项目文件路径：")
                    .with_default(&default_path.to_string_lossy())
                    .prompt()?;
                match self.wizard.enable_file_storage(path.trim()).await? {
                    SaveOutcome::File(path) => println!("之后的修改会自动保存到 {}", path),
                    SaveOutcome::Cache => println!("已保存到本地缓存。"),
                    SaveOutcome::Failed(reason) => println!("✗ 无法写入项目文件：{}", reason),
                }
            }
            Action::ExportJson => {
                let path = self.export_path("json", true);
                self.wizard.export_json(&path).await?;
                println!("已导出到 {}", path);
            }
            Action::ExportText => {
                let path = self.export_path("txt", false);
                self.wizard.export_text(&path).await?;
                println!("已导出到 {}", path);
            }
            Action::Import => {
                let path = Text::new("要导入的项目文件：").prompt()?;
                self.wizard.import_project(path.trim()).await?;
                println!("已导入《{}》。", self.wizard.state().display_name());
            }
            Action::Reset => {
                let confirmed = Confirm::new("确定要清空当前项目并重新开始吗？")
                    .with_default(false)
                    .prompt()?;
                if confirmed {
                    self.wizard.reset_project().await;
                }
            }
            Action::Quit => {}
        }
        Ok(())
    }

    fn export_path(&self, extension: &str, timestamped: bool) -> String {
        let stem = file_stem(self.wizard.state().display_name());
        let file_name = if timestamped {
            format!("{}-{}.{}", stem, Local::now().format("%Y%m%d-%H%M%S"), extension)
        } else {
            format!("{}.{}", stem, extension)
        };
        Path::new(&self.config.storage.export_folder)
            .join(file_name)
            .to_string_lossy()
            .to_string()
    }

    async fn edit_novel_info(&mut self) -> Result<()> {
        let current = self.wizard.state().novel_info.clone();

        let title = Text::new("小说标题：").with_initial_value(&current.title).prompt()?;
        let description = edit_text("小说描述（核心创意、背景、主角）：", &current.description)?
            .unwrap_or(current.description);
        let reference = edit_text("参考内容（可选）：", &current.reference)?.unwrap_or(current.reference);
        let style = Text::new("文风要求（可选）：").with_initial_value(&current.style).prompt()?;
        let chapter_count = CustomType::<u32>::new("目标章节数（0 表示不限）：")
            .with_default(current.chapter_count)
            .with_validator(|count: &u32| {
                Ok(if *count <= MAX_CHAPTER_COUNT {
                    Validation::Valid
                } else {
                    Validation::Invalid(format!("最多 {} 章", MAX_CHAPTER_COUNT).into())
                })
            })
            .with_error_message("请输入非负整数")
            .prompt()?;

        self.wizard
            .update_novel_info(NovelInfo {
                title: title.trim().to_string(),
                description,
                reference,
                style: style.trim().to_string(),
                chapter_count,
            })
            .await;
        Ok(())
    }

    fn view_chapter(&self) {
        let state = self.wizard.state();
        let Some(chapter) = state.current_chapter() else {
            println!("还没有章节。");
            return;
        };
        print_section(
            &format!("第{}章 {}", state.current_chapter_index + 1, chapter.title),
            &chapter.summary,
        );
        print_section("正文", &chapter.content);
        if !chapter.metadata.is_empty() {
            print_section("角色信息", &chapter.metadata.characters);
            print_section("情节发展", &chapter.metadata.plot);
            print_section("伏笔与线索", &chapter.metadata.foreshadowing);
        }
    }

    fn select_chapter(&mut self) -> Result<()> {
        let state = self.wizard.state();
        if state.chapters.is_empty() {
            println!("还没有章节。");
            return Ok(());
        }
        let options: Vec<String> = state
            .chapters
            .iter()
            .enumerate()
            .map(|(i, c)| format!("第{}章 {} [{}]", i + 1, c.title, status_label(c.status)))
            .collect();
        let choice = Select::new("选择章节：", options)
            .with_starting_cursor(state.current_chapter_index)
            .with_page_size(MENU_PAGE_SIZE)
            .raw_prompt_skippable()?;
        if let Some(choice) = choice {
            self.wizard.select_chapter(choice.index)?;
        }
        Ok(())
    }

    async fn edit_chapter(&mut self) -> Result<()> {
        let index = self.wizard.state().current_chapter_index;
        let Some(chapter) = self.wizard.current_chapter().cloned() else {
            return Ok(());
        };

        let title = Text::new("章节标题：").with_initial_value(&chapter.title).prompt()?;
        let summary = edit_text("章节摘要：", &chapter.summary)?;
        let content = if chapter.content.is_empty() {
            None
        } else {
            edit_text("章节正文：", &chapter.content)?
        };

        self.wizard
            .update_chapter(
                index,
                ChapterEdit {
                    title: Some(title.trim().to_string()),
                    summary,
                    content,
                    metadata: None,
                },
            )
            .await?;
        Ok(())
    }

    fn view_aggregated(&self) {
        let state = self.wizard.state();
        let aggregated = &state.aggregated_metadata;

        println!("\n── 全局元数据 ──");
        match &aggregated.protagonist {
            Some(p) => println!("主角：{}（{}）", p.name, p.role),
            None => println!("主角：未知"),
        }
        for character in &aggregated.characters {
            println!("· {}：{}", character.name, character.role);
        }
        if !aggregated.foreshadowing.is_empty() {
            println!("伏笔：");
            for clue in &aggregated.foreshadowing {
                println!("· {}", clue);
            }
        }
        if !state.metadata_notes.trim().is_empty() {
            print_section("备注", &state.metadata_notes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::Chapter;

    #[test]
    fn test_config_stage_offers_setup_only() {
        let state = ProjectState::default();
        let actions = actions_for(&state);
        assert_eq!(actions[0], Action::ConfirmConfig);
        assert!(!actions.contains(&Action::GenerateOutline));
        assert!(!actions.contains(&Action::Save));
    }

    #[test]
    fn test_chapter_actions_follow_progress() {
        let mut state = ProjectState {
            current_step: Stage::ChapterCreation,
            ..Default::default()
        };
        state.chapters.push(Chapter::new("觉醒", "摘要"));
        assert_eq!(actions_for(&state)[0], Action::GenerateContent);

        state.chapters[0].content = "正文".to_string();
        let actions = actions_for(&state);
        assert_eq!(actions[0], Action::GenerateMetadata);
        assert!(actions.contains(&Action::ConfirmChapter));

        state.chapters[0].status = ChapterStatus::Completed;
        let actions = actions_for(&state);
        assert_eq!(actions[0], Action::RegenerateContent);
        assert!(!actions.contains(&Action::ConfirmChapter));
    }

    #[test]
    fn test_file_stem_replaces_separators() {
        assert_eq!(file_stem("星海/第一部: 觉醒"), "星海_第一部_ 觉醒");
    }
}
