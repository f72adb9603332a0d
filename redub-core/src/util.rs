//! Small shared helpers: task-id generation, filename sanitising and
//! LLM output cleanup.

use rand::Rng;

/// Random alphanumeric suffix used in generated task ids.
pub fn rand_suffix(len: usize) -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}

/// Keep only characters that are safe inside a directory name that is
/// later spliced into ffmpeg arguments.
pub fn sanitize_path_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        .collect()
}

/// Derive a task id from a source URL: the last path segment, cleaned
/// and truncated, plus a random suffix.
pub fn task_id_from_url(url: &str) -> String {
    let tail = url.rsplit('/').next().unwrap_or(url).replace(' ', "");
    let head: String = tail.chars().take(16).collect();
    let cleaned = sanitize_path_name(&head);
    let base = if cleaned.is_empty() { "task".to_owned() } else { cleaned };
    format!("{}_{}", base, rand_suffix(4))
}

/// Pull the JSON body out of an LLM reply. Markdown fences are
/// tolerated; otherwise the outermost `{…}` / `[…]` span wins.
pub fn extract_json(text: &str) -> &str {
    if let Some(open) = text.find("```") {
        let after = &text[open + 3..];
        let after = after.strip_prefix("json").unwrap_or(after);
        if let Some(close) = after.find("```") {
            return after[..close].trim();
        }
    }

    let start = match (text.find('{'), text.find('[')) {
        (Some(o), Some(a)) => Some(o.min(a)),
        (o, a) => o.or(a),
    };
    let end = match (text.rfind('}'), text.rfind(']')) {
        (Some(o), Some(a)) => Some(o.max(a)),
        (o, a) => o.or(a),
    };
    match (start, end) {
        (Some(s), Some(e)) if e > s => &text[s..=e],
        _ => text,
    }
}

/// Parse `["before|after", …]` replacement pairs into a map; malformed
/// entries are skipped.
pub fn parse_replace_pairs(pairs: &[String]) -> std::collections::HashMap<String, String> {
    let mut map = std::collections::HashMap::new();
    for pair in pairs {
        match pair.split_once('|') {
            Some((before, after)) if !before.is_empty() => {
                map.insert(before.to_owned(), after.to_owned());
            }
            _ => {
                tracing::info!(replace = %pair, "ignoring malformed replace pair");
            }
        }
    }
    map
}

/// Apply every replacement pair as a literal substitution.
pub fn apply_replacements(
    text: &str,
    replacements: &std::collections::HashMap<String, String>,
) -> String {
    let mut out = text.to_owned();
    for (before, after) in replacements {
        out = out.replace(before, after);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_id_keeps_url_tail() {
        // 16 chars of the URL tail survive, minus the unsafe ones.
        let id = task_id_from_url("https://www.youtube.com/watch?v=dQw4w9WgXcQ");
        assert!(id.starts_with("watchvdQw4w9Wg_"), "unexpected id: {id}");
        assert_eq!(id.len(), "watchvdQw4w9Wg".len() + 5);
        assert!(!id.contains('='));
        assert!(!id.contains('?'));
    }

    #[test]
    fn extract_json_unwraps_fences() {
        let fenced = "Sure, here you go:\n```json\n[{\"id\":1}]\n```\nDone.";
        assert_eq!(extract_json(fenced), "[{\"id\":1}]");

        let bare = "noise [1, 2, 3] trailing";
        assert_eq!(extract_json(bare), "[1, 2, 3]");

        assert_eq!(extract_json("no json at all"), "no json at all");
    }

    #[test]
    fn replace_pairs_skip_malformed() {
        let map = parse_replace_pairs(&[
            "GPT|G-P-T".to_owned(),
            "broken".to_owned(),
            "|empty".to_owned(),
        ]);
        assert_eq!(map.len(), 1);
        assert_eq!(
            apply_replacements("GPT is fine, GPT is good", &map),
            "G-P-T is fine, G-P-T is good"
        );
    }
}
