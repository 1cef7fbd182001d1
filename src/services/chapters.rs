use crate::core::state::{Chapter, MAX_CHAPTER_COUNT};
use log::{info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::fmt;

static CHAPTER_HEADING_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"第[一二三四五六七八九十\d]+章[：:](.*)").expect("valid chapter heading regex")
});

/// Lower bound on the number of placeholder chapters synthesized when
/// nothing at all could be extracted.
pub const MIN_PLACEHOLDER_CHAPTERS: usize = 10;

/// Title and summary of one chapter before it becomes a `Chapter` record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterDraft {
    pub title: String,
    pub summary: String,
}

#[derive(Deserialize)]
struct RawDraft {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    summary: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawChapterList {
    List(Vec<RawDraft>),
    Wrapped { chapters: Vec<RawDraft> },
}

/// Why the structured parse was abandoned and which fallback produced the chapters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackReason {
    OutlineHeadings { parse_error: String },
    Placeholders { parse_error: String, count: usize },
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutlineHeadings { parse_error } => write!(
                f,
                "model output was not a chapter list ({}); chapters were read from the detailed outline headings",
                parse_error
            ),
            Self::Placeholders { parse_error, count } => write!(
                f,
                "model output was not a chapter list ({}) and the detailed outline has no chapter headings; created {} placeholder chapters",
                parse_error, count
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChapterExtraction {
    /// The model answered with a usable chapter list.
    Structured(Vec<ChapterDraft>),
    /// Best-effort recovery from the outline text.
    HeuristicFallback {
        chapters: Vec<ChapterDraft>,
        warning: FallbackReason,
    },
}

impl ChapterExtraction {
    pub fn drafts(&self) -> &[ChapterDraft] {
        match self {
            Self::Structured(chapters) => chapters,
            Self::HeuristicFallback { chapters, .. } => chapters,
        }
    }

    pub fn warning(&self) -> Option<&FallbackReason> {
        match self {
            Self::Structured(_) => None,
            Self::HeuristicFallback { warning, .. } => Some(warning),
        }
    }

    /// Turns the drafts into fresh planning-stage chapters.
    pub fn into_chapters(self) -> Vec<Chapter> {
        let drafts = match self {
            Self::Structured(chapters) => chapters,
            Self::HeuristicFallback { chapters, .. } => chapters,
        };
        drafts
            .into_iter()
            .map(|d| Chapter::new(d.title, d.summary))
            .collect()
    }
}

/// Extracts the chapter list from a chapter-summary response. Never returns
/// an empty list.
pub fn extract_chapters(
    response: &str,
    detailed_outline: &str,
    chapter_count: u32,
) -> ChapterExtraction {
    let parse_error = match parse_structured(response) {
        Ok(chapters) => {
            info!("Parsed {} chapters from model output", chapters.len());
            return ChapterExtraction::Structured(chapters);
        }
        Err(e) => e,
    };

    let chapters = scan_outline_headings(detailed_outline);
    let extraction = if chapters.is_empty() {
        let chapters = placeholder_chapters(chapter_count);
        let count = chapters.len();
        ChapterExtraction::HeuristicFallback {
            chapters,
            warning: FallbackReason::Placeholders { parse_error, count },
        }
    } else {
        ChapterExtraction::HeuristicFallback {
            chapters,
            warning: FallbackReason::OutlineHeadings { parse_error },
        }
    };

    if let Some(warning) = extraction.warning() {
        warn!("{}", warning);
    }
    extraction
}

fn parse_structured(response: &str) -> Result<Vec<ChapterDraft>, String> {
    let clean_json = strip_code_blocks(response);
    let raw: RawChapterList = serde_json::from_str(&clean_json).map_err(|e| e.to_string())?;
    let raw = match raw {
        RawChapterList::List(list) => list,
        RawChapterList::Wrapped { chapters } => chapters,
    };
    if raw.is_empty() {
        return Err("empty chapter list".to_string());
    }

    Ok(raw
        .into_iter()
        .map(|r| ChapterDraft {
            title: r.title.unwrap_or_default().trim().to_string(),
            summary: r.summary.unwrap_or_default().trim().to_string(),
        })
        .collect())
}

/// Splits an outline at `第N章：标题` lines; the lines in between become the summary.
fn scan_outline_headings(outline: &str) -> Vec<ChapterDraft> {
    let mut chapters = Vec::new();
    let mut current: Option<ChapterDraft> = None;

    for line in outline.lines() {
        if let Some(caps) = CHAPTER_HEADING_RE.captures(line) {
            if let Some(done) = current.take() {
                chapters.push(done);
            }
            let title = caps[1].trim().trim_end_matches(&['*', '#'][..]).trim();
            current = Some(ChapterDraft {
                title: title.to_string(),
                summary: String::new(),
            });
        } else if let Some(chapter) = current.as_mut() {
            let text = line.trim();
            if text.is_empty() {
                continue;
            }
            if !chapter.summary.is_empty() {
                chapter.summary.push('\n');
            }
            chapter.summary.push_str(text);
        }
    }

    chapters.extend(current);
    chapters
}

fn placeholder_chapters(chapter_count: u32) -> Vec<ChapterDraft> {
    let count = (chapter_count.min(MAX_CHAPTER_COUNT) as usize).max(MIN_PLACEHOLDER_CHAPTERS);
    (1..=count)
        .map(|n| ChapterDraft {
            title: format!("第{}章", n),
            summary: String::new(),
        })
        .collect()
}

pub fn strip_code_blocks(s: &str) -> String {
    let s = s.trim();
    if s.starts_with("```json") {
        s.trim_start_matches("```json").trim_end_matches("```").trim().to_string()
    } else if s.starts_with("```") {
        s.trim_start_matches("```").trim_end_matches("```").trim().to_string()
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::{ChapterStatus, UNTITLED_CHAPTER};

    fn titles(extraction: &ChapterExtraction) -> Vec<&str> {
        extraction.drafts().iter().map(|d| d.title.as_str()).collect()
    }

    #[test]
    fn test_strip_code_blocks() {
        assert_eq!(strip_code_blocks("json"), "json");
        assert_eq!(strip_code_blocks("```json\n[]\n```"), "[]");
        assert_eq!(strip_code_blocks("```\n[]\n```"), "[]");
        assert_eq!(strip_code_blocks("  ```json  \n  []  \n  ```  "), "[]");
    }

    #[test]
    fn test_structured_response() {
        let response = r#"[
            {"title": "觉醒", "summary": "李明在废墟中醒来"},
            {"title": "抉择", "summary": "他必须离开故乡"}
        ]"#;

        let extraction = extract_chapters(response, "", 0);
        assert!(matches!(extraction, ChapterExtraction::Structured(_)));
        assert!(extraction.warning().is_none());
        assert_eq!(titles(&extraction), vec!["觉醒", "抉择"]);
        assert_eq!(extraction.drafts()[1].summary, "他必须离开故乡");
    }

    #[test]
    fn test_structured_response_in_code_fence_and_wrapper() {
        let fenced = "```json\n[{\"title\": \"觉醒\"}]\n```";
        let extraction = extract_chapters(fenced, "", 0);
        assert!(matches!(extraction, ChapterExtraction::Structured(_)));
        assert_eq!(extraction.drafts()[0].summary, "");

        let wrapped = r#"{"chapters": [{"title": "觉醒", "summary": null}]}"#;
        let extraction = extract_chapters(wrapped, "", 0);
        assert!(matches!(extraction, ChapterExtraction::Structured(_)));
        assert_eq!(titles(&extraction), vec!["觉醒"]);
    }

    #[test]
    fn test_fallback_reads_outline_headings() {
        let outline = "全书共两章\n第一章：觉醒\n李明醒来。\n\n  发现异能。\n第二章：抉择\n离开故乡";

        let extraction = extract_chapters("抱歉，我无法输出JSON", outline, 0);
        assert!(matches!(
            extraction.warning(),
            Some(FallbackReason::OutlineHeadings { .. })
        ));
        assert_eq!(titles(&extraction), vec!["觉醒", "抉择"]);
        assert_eq!(extraction.drafts()[0].summary, "李明醒来。\n发现异能。");
        assert_eq!(extraction.drafts()[1].summary, "离开故乡");
    }

    #[test]
    fn test_fallback_accepts_digits_and_ascii_colon() {
        let outline = "## 第12章:决战**\n最终对决";
        let extraction = extract_chapters("not json", outline, 0);
        assert_eq!(titles(&extraction), vec!["决战"]);
    }

    #[test]
    fn test_empty_list_uses_fallback() {
        let extraction = extract_chapters("[]", "第一章：觉醒", 0);
        assert_eq!(titles(&extraction), vec!["觉醒"]);
        assert!(extraction.warning().is_some());
    }

    #[test]
    fn test_placeholders_when_nothing_matches() {
        let extraction = extract_chapters("not json", "没有任何章节标题的细纲", 0);
        match extraction.warning() {
            Some(FallbackReason::Placeholders { count, .. }) => assert_eq!(*count, 10),
            other => panic!("unexpected warning: {:?}", other),
        }
        let expected: Vec<String> = (1..=10).map(|n| format!("第{}章", n)).collect();
        assert_eq!(titles(&extraction), expected);
        assert!(extraction.drafts().iter().all(|d| d.summary.is_empty()));
    }

    #[test]
    fn test_placeholders_honor_larger_target() {
        let extraction = extract_chapters("", "", 24);
        assert_eq!(extraction.drafts().len(), 24);
        assert_eq!(extract_chapters("", "", 3).drafts().len(), 10);
        assert_eq!(
            extract_chapters("", "", u32::MAX).drafts().len(),
            MAX_CHAPTER_COUNT as usize
        );
    }

    #[test]
    fn test_into_chapters_creates_planning_records() {
        let response = r#"[{"title": "", "summary": "无题"}, {"title": "抉择", "summary": ""}]"#;
        let chapters = extract_chapters(response, "", 0).into_chapters();

        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters[0].title, UNTITLED_CHAPTER);
        assert_ne!(chapters[0].id, chapters[1].id);
        for chapter in &chapters {
            assert_eq!(chapter.status, ChapterStatus::Planning);
            assert!(chapter.content.is_empty());
            assert!(chapter.metadata.is_empty());
        }
    }
}
