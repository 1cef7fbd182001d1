//! Prompt builders for every generation stage.
//!
//! Each builder is a pure function of the project state. The temperature is
//! fixed per stage so a regeneration always samples the same way.

use crate::core::state::{NovelInfo, ProjectState};
use crate::services::llm::Prompt;

pub const OUTLINE_TEMPERATURE: f32 = 0.8;
pub const DETAILED_OUTLINE_TEMPERATURE: f32 = 0.7;
pub const CHAPTER_SUMMARIES_TEMPERATURE: f32 = 0.3;
pub const CHAPTER_CONTENT_TEMPERATURE: f32 = 0.85;
pub const CHAPTER_METADATA_TEMPERATURE: f32 = 0.3;

/// How many preceding chapters are recalled when drafting a chapter.
const RECAP_WINDOW: usize = 2;

const OUTLINE_SYSTEM: &str = "你是一位经验丰富的小说策划师和编剧，擅长构建引人入胜的故事架构。
你的任务是根据用户提供的小说创意，创作一份详细而有吸引力的小说大纲。

大纲应该包括：
1. 故事背景设定
2. 主要角色介绍（主角、配角）
3. 核心冲突和矛盾
4. 主要情节线（起承转合）
5. 预期结局方向

请确保大纲：
- 逻辑清晰，结构完整
- 有足够的戏剧冲突
- 角色设定丰富立体
- 情节发展合理有趣";

const DETAILED_OUTLINE_SYSTEM: &str = "你是一位小说创作大师，擅长将概括性的大纲扩展为详细的细纲。
细纲应该包括：
1. 将整体故事分解为具体的章节结构
2. 每个主要情节点的详细展开
3. 角色成长和转变的具体时间点
4. 重要场景的详细描述
5. 伏笔的埋设和回收计划

请确保细纲：
- 章节划分合理（根据用户要求或默认15-30章）
- 每章节有明确的情节目标
- 节奏把握得当
- 伏笔设置巧妙
- 每章以“第X章：标题”开头";

const CHAPTER_SUMMARIES_SYSTEM: &str = "你是一位小说创作专家。根据细纲，提取出章节结构。
请以JSON格式返回章节列表，每个章节包含：
- title: 章节标题
- summary: 章节摘要（包括主要情节、角色、场景）

格式示例：
[
  {
    \"title\": \"第一章标题\",
    \"summary\": \"章节摘要内容...\"
  }
]";

const CHAPTER_CONTENT_SYSTEM: &str = "你是一位优秀的小说作家，擅长创作引人入胜的故事内容。

创作要求：
1. 文笔流畅，描写生动
2. 对话自然，符合角色性格
3. 情节推进合理
4. 注重细节描写和氛围营造
5. 保持前后文的连贯性
6. 章节长度适中（2000-5000字）";

const CHAPTER_METADATA_SYSTEM: &str = "你是一位小说分析专家，擅长提取和分析小说中的关键信息。
请分析章节内容，提取以下信息：
1. 角色信息：本章出现的重要角色及其特征、能力、状态的变化
2. 情节发展：本章的主要情节和剧情推进
3. 伏笔与线索：本章埋下的伏笔或重要线索

请以结构化的方式返回，清晰明了。
每个部分以“角色信息：”“情节发展：”“伏笔与线索：”单独起行，角色按“姓名：描述”逐行列出。";

fn style_line(info: &NovelInfo) -> Option<String> {
    let style = info.style.trim();
    (!style.is_empty()).then(|| format!("文风要求：{}", style))
}

pub fn outline_prompt(state: &ProjectState) -> Prompt {
    let info = &state.novel_info;
    let mut user = format!("请为以下小说创意生成一份完整的大纲：\n\n{}", info.description);

    if !info.reference.trim().is_empty() {
        user.push_str(&format!("\n\n参考内容：\n{}", info.reference));
    }
    if let Some(style) = style_line(info) {
        user.push_str(&format!("\n\n{}", style));
    }

    Prompt {
        system: OUTLINE_SYSTEM.to_string(),
        user,
        temperature: OUTLINE_TEMPERATURE,
        response_format: None,
    }
}

pub fn detailed_outline_prompt(state: &ProjectState) -> Prompt {
    let info = &state.novel_info;
    let mut user = format!(
        "基于以下大纲，生成详细的细纲：\n\n原始创意：\n{}\n\n大纲：\n{}\n",
        info.description, state.outline
    );

    if info.chapter_count > 0 {
        user.push_str(&format!("\n目标章节数：{}章", info.chapter_count));
    }
    if let Some(style) = style_line(info) {
        user.push_str(&format!("\n{}", style));
    }

    Prompt {
        system: DETAILED_OUTLINE_SYSTEM.to_string(),
        user: user.trim_end().to_string(),
        temperature: DETAILED_OUTLINE_TEMPERATURE,
        response_format: None,
    }
}

pub fn chapter_summaries_prompt(state: &ProjectState) -> Prompt {
    Prompt {
        system: CHAPTER_SUMMARIES_SYSTEM.to_string(),
        user: format!("从以下细纲中提取章节信息：\n\n{}", state.detailed_outline),
        temperature: CHAPTER_SUMMARIES_TEMPERATURE,
        response_format: None,
    }
}

/// Returns `None` when there is no chapter at `index`.
pub fn chapter_content_prompt(state: &ProjectState, index: usize) -> Option<Prompt> {
    let chapter = state.chapters.get(index)?;
    let info = &state.novel_info;

    let previous = &state.chapters[..index];
    let recent = &previous[previous.len().saturating_sub(RECAP_WINDOW)..];
    let mut context = String::new();
    if !recent.is_empty() {
        context.push_str("前文回顾：\n");
        for (offset, prev) in recent.iter().enumerate() {
            let number = index - recent.len() + offset + 1;
            context.push_str(&format!("第{}章 {}：{}\n", number, prev.title, prev.recap()));
        }
    }

    let mut system = CHAPTER_CONTENT_SYSTEM.to_string();
    if let Some(style) = style_line(info) {
        system.push_str(&format!("\n\n{}", style));
    }

    let mut user = format!(
        "请根据以下信息创作章节内容：\n\n小说背景：\n{}\n\n大纲：\n{}\n\n",
        info.description, state.outline
    );
    if !context.is_empty() {
        user.push_str(&context);
        user.push('\n');
    }
    user.push_str(&format!(
        "当前章节摘要：\n第{}章 {}\n{}\n\n请直接开始创作，不要添加章节标题。",
        index + 1,
        chapter.title,
        chapter.summary
    ));

    Some(Prompt {
        system,
        user,
        temperature: CHAPTER_CONTENT_TEMPERATURE,
        response_format: None,
    })
}

/// Returns `None` when there is no chapter at `index`.
pub fn chapter_metadata_prompt(state: &ProjectState, index: usize) -> Option<Prompt> {
    let chapter = state.chapters.get(index)?;

    Some(Prompt {
        system: CHAPTER_METADATA_SYSTEM.to_string(),
        user: format!(
            "请分析以下章节内容：\n\n第{}章 {}\n\n{}",
            index + 1,
            chapter.title,
            chapter.content
        ),
        temperature: CHAPTER_METADATA_TEMPERATURE,
        response_format: None,
    })
}
