//! Per-chapter metadata extraction and the project-wide rollup.
//!
//! Section detection is label based: a segment mentioning `伏笔` anywhere is
//! treated as foreshadowing even when the word only shows up in prose.

use crate::core::state::{AggregatedMetadata, Chapter, ChapterMetadata, CharacterSummary};
use once_cell::sync::Lazy;
use regex::Regex;

const CHARACTERS_LABEL: &str = "角色信息";
const PLOT_LABEL: &str = "情节发展";
const FORESHADOWING_LABEL: &str = "伏笔与线索";
const FORESHADOWING_KEYWORD: &str = "伏笔";

pub const MAX_AGGREGATED_ITEMS: usize = 10;
pub const MAX_ROLE_CHARS: usize = 50;

// Prefixes for segments that open on a label line; the colon is optional.
static CHARACTERS_HEADING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^.*?角色信息[*】 \t]*[：:]?").expect("valid regex"));
static PLOT_HEADING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^.*?情节发展[*】 \t]*[：:]?").expect("valid regex"));
static FORESHADOWING_HEADING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^.*?伏笔[^：:\n]*[：:]?").expect("valid regex"));

// Prefixes for labels found inside prose; these only count with a colon.
static CHARACTERS_INLINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^.*?角色信息[^：:\n]*[：:]").expect("valid regex"));
static PLOT_INLINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^.*?情节发展[^：:\n]*[：:]").expect("valid regex"));
static FORESHADOWING_INLINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^.*?伏笔[^：:\n]*[：:]").expect("valid regex"));

static CHARACTER_LINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([^：:]+)[：:]\s*(.+)").expect("valid regex"));
static BULLET_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[•\-*]\s*").expect("valid regex"));

fn strip_decoration(line: &str) -> &str {
    line.trim_start_matches(|c: char| {
        c.is_whitespace()
            || c.is_ascii_digit()
            || matches!(c, '#' | '*' | '-' | '>' | '.' | '、' | '【' | '一' | '二' | '三')
    })
}

fn starts_section(line: &str) -> bool {
    let bare = strip_decoration(line);
    [CHARACTERS_LABEL, PLOT_LABEL, FORESHADOWING_LABEL]
        .iter()
        .any(|label| bare.starts_with(label))
}

/// Splits the text before every line that opens a labelled section.
fn split_sections(text: &str) -> Vec<String> {
    let mut sections = Vec::new();
    let mut current = String::new();

    for line in text.lines() {
        if starts_section(line) && !current.is_empty() {
            sections.push(std::mem::take(&mut current));
        } else if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);
    }
    if !current.is_empty() {
        sections.push(current);
    }
    sections
}

/// Removes the label from a section, or `None` when a label mentioned in
/// prose is not followed by a colon.
fn strip_label(section: &str, prefix: &Regex) -> Option<String> {
    prefix
        .find(section)
        .map(|m| section[m.end()..].trim().to_string())
}

/// Splits a metadata analysis into character, plot and foreshadowing fields.
/// Text without any recognizable section is kept whole under `characters`.
pub fn parse_chapter_metadata(text: &str) -> ChapterMetadata {
    let mut metadata = ChapterMetadata::default();

    for section in split_sections(text) {
        let anchored = section.lines().next().is_some_and(starts_section);
        let (field, heading, inline) = if section.contains(CHARACTERS_LABEL) {
            (&mut metadata.characters, &CHARACTERS_HEADING_RE, &CHARACTERS_INLINE_RE)
        } else if section.contains(PLOT_LABEL) {
            (&mut metadata.plot, &PLOT_HEADING_RE, &PLOT_INLINE_RE)
        } else if section.contains(FORESHADOWING_KEYWORD) {
            (
                &mut metadata.foreshadowing,
                &FORESHADOWING_HEADING_RE,
                &FORESHADOWING_INLINE_RE,
            )
        } else {
            continue;
        };

        let prefix = if anchored { heading } else { inline };
        if let Some(body) = strip_label(&section, prefix) {
            *field = body;
        }
    }

    if metadata.is_empty() {
        metadata.characters = text.to_string();
    }
    metadata
}

/// Rebuilds the project rollup from every chapter's metadata. Pure: the same
/// chapters always produce the same result.
pub fn recompute_aggregated_metadata(chapters: &[Chapter]) -> AggregatedMetadata {
    let mut characters: Vec<CharacterSummary> = Vec::new();
    let mut foreshadowing: Vec<String> = Vec::new();

    for chapter in chapters {
        for line in chapter.metadata.characters.lines() {
            let line = BULLET_RE.replace(line.trim(), "");
            let Some(caps) = CHARACTER_LINE_RE.captures(&line) else {
                continue;
            };
            let name = caps[1].trim();
            if name.is_empty() || characters.iter().any(|c| c.name == name) {
                continue;
            }
            characters.push(CharacterSummary {
                name: name.to_string(),
                role: caps[2].trim().chars().take(MAX_ROLE_CHARS).collect(),
                status: String::new(),
            });
        }

        for line in chapter.metadata.foreshadowing.lines() {
            let cleaned = BULLET_RE.replace(line.trim(), "");
            if !cleaned.is_empty() && !foreshadowing.iter().any(|f| *f == cleaned) {
                foreshadowing.push(cleaned.into_owned());
            }
        }
    }

    characters.truncate(MAX_AGGREGATED_ITEMS);
    foreshadowing.truncate(MAX_AGGREGATED_ITEMS);

    AggregatedMetadata {
        protagonist: characters.first().cloned(),
        characters,
        foreshadowing,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chapter_with(characters: &str, foreshadowing: &str) -> Chapter {
        let mut chapter = Chapter::new("章", "");
        chapter.metadata.characters = characters.to_string();
        chapter.metadata.foreshadowing = foreshadowing.to_string();
        chapter
    }

    #[test]
    fn test_parse_labelled_sections() {
        let text = "角色信息：\n李明：主角，觉醒了火焰异能\n王芳：青梅竹马\n情节发展：李明在废墟中醒来。\n伏笔与线索：\n- 神秘的吊坠\n- 父亲的日记";

        let metadata = parse_chapter_metadata(text);
        assert_eq!(metadata.characters, "李明：主角，觉醒了火焰异能\n王芳：青梅竹马");
        assert_eq!(metadata.plot, "李明在废墟中醒来。");
        assert_eq!(metadata.foreshadowing, "- 神秘的吊坠\n- 父亲的日记");
        assert!(metadata.structured.is_none());
    }

    #[test]
    fn test_parse_decorated_headings() {
        let text = "以下是本章分析。\n## 1. **角色信息**\n李明：主角\n## 2. **情节发展**：\n出发\n## 3. **伏笔与线索**\n吊坠发光";

        let metadata = parse_chapter_metadata(text);
        assert_eq!(metadata.characters, "李明：主角");
        assert_eq!(metadata.plot, "出发");
        assert_eq!(metadata.foreshadowing, "吊坠发光");
    }

    #[test]
    fn test_unlabelled_text_is_kept_in_characters() {
        let text = "本章主要讲述了李明离开故乡的经过。\n他带走了父亲的日记。";

        let metadata = parse_chapter_metadata(text);
        assert_eq!(metadata.characters, text);
        assert!(metadata.plot.is_empty());
        assert!(metadata.foreshadowing.is_empty());
    }

    #[test]
    fn test_keyword_in_prose_is_not_a_section() {
        let text = "本章没有伏笔。\n李明离开了故乡。";

        let metadata = parse_chapter_metadata(text);
        assert_eq!(metadata.characters, text);
        assert!(metadata.plot.is_empty());
        assert!(metadata.foreshadowing.is_empty());
    }

    #[test]
    fn test_inline_label_with_colon_is_classified() {
        let metadata = parse_chapter_metadata("本章埋下的伏笔：父亲的日记");
        assert_eq!(metadata.foreshadowing, "父亲的日记");
        assert!(metadata.characters.is_empty());
    }

    #[test]
    fn test_duplicate_character_keeps_first_description() {
        let chapters = vec![
            chapter_with("李明：主角", ""),
            chapter_with("李明：主角\n李明：后来成为反派", ""),
        ];

        let aggregated = recompute_aggregated_metadata(&chapters);
        assert_eq!(aggregated.characters.len(), 1);
        assert_eq!(aggregated.characters[0].name, "李明");
        assert_eq!(aggregated.characters[0].role, "主角");
        assert_eq!(aggregated.protagonist.as_ref().unwrap().name, "李明");
    }

    #[test]
    fn test_aggregation_is_idempotent() {
        let chapters = vec![
            chapter_with("李明：主角\n王芳: 医生", "• 吊坠\n* 日记"),
            chapter_with("赵强：反派", "- 吊坠\n地图"),
        ];

        let first = recompute_aggregated_metadata(&chapters);
        let second = recompute_aggregated_metadata(&chapters);
        assert_eq!(first, second);
        assert_eq!(first.foreshadowing, vec!["吊坠", "日记", "地图"]);
        let names: Vec<&str> = first.characters.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["李明", "王芳", "赵强"]);
    }

    #[test]
    fn test_role_truncated_and_lists_capped() {
        let long_role = "很".repeat(80);
        let mut lines: Vec<String> = (0..12).map(|i| format!("角色{}：配角", i)).collect();
        lines.insert(0, format!("李明：{}", long_role));
        let clues: Vec<String> = (0..15).map(|i| format!("线索{}", i)).collect();

        let chapters = vec![chapter_with(&lines.join("\n"), &clues.join("\n"))];
        let aggregated = recompute_aggregated_metadata(&chapters);

        assert_eq!(aggregated.characters[0].role.chars().count(), MAX_ROLE_CHARS);
        assert_eq!(aggregated.characters.len(), MAX_AGGREGATED_ITEMS);
        assert_eq!(aggregated.foreshadowing.len(), MAX_AGGREGATED_ITEMS);
        assert_eq!(aggregated.foreshadowing[9], "线索9");
    }

    #[test]
    fn test_lines_without_separator_are_ignored() {
        let chapters = vec![chapter_with("本章没有新角色", "")];
        let aggregated = recompute_aggregated_metadata(&chapters);
        assert!(aggregated.characters.is_empty());
        assert!(aggregated.protagonist.is_none());
        assert!(aggregated.foreshadowing.is_empty());
    }
}
