//! SRT → ASS conversion for subtitle burning.
//!
//! Two styles are emitted: `Major` (target language, larger) and
//! `Minor` (origin language, smaller). Every event is bottom-centred
//! (`\an2`); for bilingual entries the Major/Minor ordering follows the
//! configured translation position.

use crate::pipeline::param::{BilingualPosition, SubtitleResultType};
use crate::subtitle::SrtBlock;

pub const ASS_HEADER_HORIZONTAL: &str = "\
[Script Info]
ScriptType: v4.00+
PlayResX: 1920
PlayResY: 1080
WrapStyle: 0
ScaledBorderAndShadow: yes

[V4+ Styles]
Format: Name, Fontname, Fontsize, PrimaryColour, SecondaryColour, OutlineColour, BackColour, Bold, Italic, Underline, StrikeOut, ScaleX, ScaleY, Spacing, Angle, BorderStyle, Outline, Shadow, Alignment, MarginL, MarginR, MarginV, Encoding
Style: Major,Microsoft YaHei,70,&H00FFFFFF,&H000000FF,&H00000000,&H80000000,-1,0,0,0,100,100,0,0,1,2,1,2,10,10,30,1
Style: Minor,Microsoft YaHei,40,&H00D0D0D0,&H000000FF,&H00000000,&H80000000,0,0,0,0,100,100,0,0,1,2,1,2,10,10,30,1

[Events]
Format: Layer, Start, End, Style, Name, MarginL, MarginR, MarginV, Effect, Text
";

pub const ASS_HEADER_VERTICAL: &str = "\
[Script Info]
ScriptType: v4.00+
PlayResX: 720
PlayResY: 1280
WrapStyle: 0
ScaledBorderAndShadow: yes

[V4+ Styles]
Format: Name, Fontname, Fontsize, PrimaryColour, SecondaryColour, OutlineColour, BackColour, Bold, Italic, Underline, StrikeOut, ScaleX, ScaleY, Spacing, Angle, BorderStyle, Outline, Shadow, Alignment, MarginL, MarginR, MarginV, Encoding
Style: Major,Microsoft YaHei,48,&H00FFFFFF,&H000000FF,&H00000000,&H80000000,-1,0,0,0,100,100,0,0,1,2,1,2,10,10,160,1
Style: Minor,Microsoft YaHei,30,&H00D0D0D0,&H000000FF,&H00000000,&H80000000,0,0,0,0,100,100,0,0,1,2,1,2,10,10,160,1

[Events]
Format: Layer, Start, End, Style, Name, MarginL, MarginR, MarginV, Effect, Text
";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Horizontal,
    Vertical,
}

/// ASS event timestamps use centisecond precision: `H:MM:SS.cc`.
fn format_ass_time(ms: u64) -> String {
    let h = ms / 3_600_000;
    let m = (ms % 3_600_000) / 60_000;
    let s = (ms % 60_000) / 1000;
    let cs = (ms % 1000) / 10;
    format!("{h:02}:{m:02}:{s:02}.{cs:02}")
}

/// Strip leading and trailing punctuation from a subtitle line.
pub fn clean_punctuation(text: &str) -> String {
    const PUNCTUATION: &[char] = &[
        ',', '.', '!', '?', ';', ':', '，', '。', '！', '？', '；', '：', '…', '、',
    ];
    text.trim_matches(|c: char| c.is_whitespace() || PUNCTUATION.contains(&c))
        .to_owned()
}

fn is_cjk_language(language: &str) -> bool {
    let tag = language.to_ascii_lowercase();
    tag.starts_with("zh") || tag.starts_with("ja") || tag.starts_with("ko") || tag.starts_with("th")
}

fn contains_alphabetic(text: &str) -> bool {
    text.chars().any(|c| c.is_ascii_alphabetic())
}

/// Split an over-long major line in two at roughly a 2/5 : 3/5 ratio.
/// CJK languages split by character, everything else by word.
pub fn split_major_line(text: &str, language: &str, max_units_one_line: usize) -> Vec<String> {
    let (segments, sep): (Vec<String>, &str) = if is_cjk_language(language) {
        (text.chars().map(|c| c.to_string()).collect(), "")
    } else {
        (text.split(' ').map(str::to_owned).collect(), " ")
    };

    if segments.len() <= max_units_one_line {
        return vec![text.to_owned()];
    }

    let split_at = ((segments.len() as f64 * 2.0 / 5.0).floor() as usize).max(1);
    let line1 = clean_punctuation(&segments[..split_at].join(sep));
    let line2 = clean_punctuation(&segments[split_at..].join(sep));
    vec![line1, line2]
}

/// Fixed-width chunking used for single-language CJK lines in the
/// vertical rendering.
pub fn split_cjk_text(text: &str, max_chars: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(max_chars.max(1))
        .map(|chunk| chunk.iter().collect())
        .collect()
}

/// Convert parsed SRT blocks into a complete ASS document.
pub fn srt_to_ass(
    blocks: &[SrtBlock],
    orientation: Orientation,
    result_type: SubtitleResultType,
    origin_language: &str,
    max_word_one_line: usize,
) -> String {
    let mut out = String::from(match orientation {
        Orientation::Horizontal => ASS_HEADER_HORIZONTAL,
        Orientation::Vertical => ASS_HEADER_VERTICAL,
    });

    let translation_on_top = matches!(
        result_type,
        SubtitleResultType::Bilingual(BilingualPosition::Top)
    );

    for block in blocks {
        let start = format_ass_time(block.start_ms);
        let end = format_ass_time(block.end_ms);

        if block.lines.len() >= 2 {
            // Bilingual entry: target text is Major, origin text Minor.
            let (major, minor) = if translation_on_top {
                (block.lines[0].as_str(), block.lines[1].as_str())
            } else {
                (block.lines[1].as_str(), block.lines[0].as_str())
            };
            let major_text = match orientation {
                Orientation::Horizontal => {
                    split_major_line(major, origin_language, max_word_one_line).join("\\N")
                }
                Orientation::Vertical => major.to_owned(),
            };
            out.push_str(&format!(
                "Dialogue: 0,{start},{end},Major,,0,0,0,,{{\\an2}}{{\\rMajor}}{}\\N{{\\rMinor}}{}\n",
                major_text,
                clean_punctuation(minor),
            ));
            continue;
        }

        let Some(content) = block.lines.first() else {
            continue;
        };

        if orientation == Orientation::Vertical && !contains_alphabetic(content) {
            // CJK single-language line: chunk it and slice the time
            // range evenly across the chunks.
            let chunks = split_cjk_text(content, 10);
            let total = block.end_ms.saturating_sub(block.start_ms);
            let n = chunks.len() as u64;
            for (i, chunk) in chunks.iter().enumerate() {
                let i = i as u64;
                let chunk_start = block.start_ms + i * total / n;
                let chunk_end = (block.start_ms + (i + 1) * total / n).min(block.end_ms);
                out.push_str(&format!(
                    "Dialogue: 0,{},{},Major,,0,0,0,,{{\\an2}}{{\\rMajor}}{}\n",
                    format_ass_time(chunk_start),
                    format_ass_time(chunk_end),
                    clean_punctuation(chunk),
                ));
            }
        } else {
            out.push_str(&format!(
                "Dialogue: 0,{start},{end},Minor,,0,0,0,,{{\\an2}}{{\\rMinor}}{}\n",
                clean_punctuation(content),
            ));
        }
    }

    out
}

/// Escape a filesystem path for use inside ffmpeg's `ass='…'` filter
/// argument: forward slashes only, apostrophes backslash-escaped, and a
/// drive-colon escape on Windows-style paths.
pub fn escape_filter_path(path: &str) -> String {
    path.replace('\\', "/")
        .replace(':', "\\:")
        .replace('\'', "\\'")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(start_ms: u64, end_ms: u64, lines: &[&str]) -> SrtBlock {
        SrtBlock {
            index: 1,
            start_ms,
            end_ms,
            lines: lines.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn bilingual_ordering_follows_position() {
        let blocks = vec![block(0, 1000, &["你好世界", "Hello world."])];

        let top = srt_to_ass(
            &blocks,
            Orientation::Horizontal,
            SubtitleResultType::Bilingual(BilingualPosition::Top),
            "en",
            12,
        );
        assert!(top.contains("{\\rMajor}你好世界\\N{\\rMinor}Hello world"));

        let bottom = srt_to_ass(
            &blocks,
            Orientation::Horizontal,
            SubtitleResultType::Bilingual(BilingualPosition::Bottom),
            "en",
            12,
        );
        assert!(bottom.contains("{\\rMajor}Hello world\\N{\\rMinor}你好世界"));
    }

    #[test]
    fn events_are_bottom_centered() {
        let ass = srt_to_ass(
            &[block(0, 1000, &["Only line"])],
            Orientation::Horizontal,
            SubtitleResultType::TargetOnly,
            "en",
            12,
        );
        assert!(ass.contains("{\\an2}"));
        assert!(ass.starts_with("[Script Info]"));
    }

    #[test]
    fn vertical_cjk_line_is_time_sliced() {
        let ass = srt_to_ass(
            &[block(0, 2000, &["这是一个非常长的中文字幕需要被拆分显示"])],
            Orientation::Vertical,
            SubtitleResultType::TargetOnly,
            "zh-CN",
            12,
        );
        let events = ass.matches("Dialogue:").count();
        assert_eq!(events, 2, "20 chars at width 10 should produce 2 events");
        assert!(ass.contains("00:00:01.00"));
    }

    #[test]
    fn major_line_splits_two_fifths() {
        let lines = split_major_line("one two three four five six seven eight nine ten", "en", 5);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "one two three four");

        let single = split_major_line("short line", "en", 12);
        assert_eq!(single, vec!["short line"]);

        let cjk = split_major_line("这是一段需要拆分的很长的中文", "zh-CN", 5);
        assert_eq!(cjk.len(), 2);
    }

    #[test]
    fn filter_path_escaping() {
        assert_eq!(
            escape_filter_path("C:\\Users\\kay's\\subs.ass"),
            "C\\:/Users/kay\\'s/subs.ass"
        );
        assert_eq!(escape_filter_path("/tmp/a.ass"), "/tmp/a.ass");
    }

    #[test]
    fn ass_time_uses_centiseconds() {
        assert_eq!(format_ass_time(3_661_234), "01:01:01.23");
    }
}
