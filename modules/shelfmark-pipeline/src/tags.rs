//! Tag normalization, language detection, and the tag-source seam.

use async_trait::async_trait;

const MAX_TAG_LEN: usize = 24;

/// Canonical tag form: lowercase, underscore-separated, alphanumeric or
/// Hangul only. Returns `None` when nothing usable remains or the result
/// falls outside the accepted length range (Korean tags may be a single
/// character; everything else needs at least two).
pub fn normalize_tag(raw: &str) -> Option<String> {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if ch.is_whitespace() {
            out.push('_');
        } else if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
        } else if ch == '_' || is_hangul(ch) || ch.is_numeric() {
            out.push(ch);
        }
        // All other punctuation and symbols are dropped.
    }

    // Collapse runs of underscores and trim them from both ends.
    let mut collapsed = String::with_capacity(out.len());
    let mut prev_underscore = true;
    for ch in out.chars() {
        if ch == '_' {
            if !prev_underscore {
                collapsed.push('_');
            }
            prev_underscore = true;
        } else {
            collapsed.push(ch);
            prev_underscore = false;
        }
    }
    while collapsed.ends_with('_') {
        collapsed.pop();
    }

    let min_len = if collapsed.chars().any(is_hangul) { 1 } else { 2 };
    let char_count = collapsed.chars().count();
    if char_count < min_len || char_count > MAX_TAG_LEN {
        return None;
    }
    Some(collapsed)
}

fn is_hangul(ch: char) -> bool {
    matches!(ch, '\u{AC00}'..='\u{D7A3}' | '\u{1100}'..='\u{11FF}' | '\u{3130}'..='\u{318F}')
}

/// Coarse language detection: anything with a meaningful share of Hangul
/// characters is Korean, everything else defaults to English.
pub fn detect_language(text: &str) -> &'static str {
    let total = text.chars().filter(|c| !c.is_whitespace()).count();
    if total == 0 {
        return "en";
    }
    let hangul = text.chars().filter(|c| is_hangul(*c)).count();
    if hangul as f64 / total as f64 > 0.2 {
        "ko"
    } else {
        "en"
    }
}

/// Supplier of fresh tags for bookmarks that have none stored. The backfill
/// job consults this only when re-normalizing the stored tags yields
/// nothing.
#[async_trait]
pub trait TagSource: Send + Sync {
    async fn tags_for(&self, title: &str, summary: &str, lang: &str)
        -> anyhow::Result<Vec<String>>;
}

/// Tag source that never produces tags. Used when no generator is wired in;
/// affected bookmarks get the sentinel link instead.
pub struct NoopTagSource;

#[async_trait]
impl TagSource for NoopTagSource {
    async fn tags_for(&self, _: &str, _: &str, _: &str) -> anyhow::Result<Vec<String>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitespace_becomes_single_underscore() {
        assert_eq!(normalize_tag("machine  learning"), Some("machine_learning".into()));
    }

    #[test]
    fn punctuation_is_stripped_and_case_folded() {
        assert_eq!(normalize_tag("Rust-Lang!"), Some("rustlang".into()));
    }

    #[test]
    fn leading_and_trailing_underscores_are_trimmed() {
        assert_eq!(normalize_tag("__web dev__"), Some("web_dev".into()));
    }

    #[test]
    fn too_short_or_too_long_is_rejected() {
        assert_eq!(normalize_tag("a"), None);
        assert_eq!(normalize_tag(&"x".repeat(25)), None);
        assert_eq!(normalize_tag("!!"), None);
    }

    #[test]
    fn single_hangul_character_is_allowed() {
        assert_eq!(normalize_tag("책"), Some("책".into()));
    }

    #[test]
    fn hangul_heavy_text_detects_korean() {
        assert_eq!(detect_language("오늘의 북마크 모음"), "ko");
        assert_eq!(detect_language("rust async runtime"), "en");
        assert_eq!(detect_language(""), "en");
    }
}
