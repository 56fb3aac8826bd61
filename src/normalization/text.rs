//! Free-text shaping for fields the platform indexes or displays.
//!
//! Everything destined for a name/meta/search-description field goes through
//! here: tags stripped, entities decoded, whitespace collapsed, length capped
//! at the platform's documented maxima.

use regex::Regex;
use std::sync::OnceLock;

pub const MAX_NAME_LEN: usize = 255;
pub const MAX_SLUG_LEN: usize = 100;
pub const MAX_META_LEN: usize = 500;

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]*>").unwrap_or_else(|_| unreachable!()))
}

/// Remove HTML tags and decode the handful of entities the platform emits.
pub fn strip_html(input: &str) -> String {
    let without_tags = tag_re().replace_all(input, " ");
    without_tags
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
}

/// Collapse all runs of whitespace into single spaces and trim.
pub fn collapse_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Char-safe truncation (never splits a multi-byte character).
pub fn clip(input: &str, max_chars: usize) -> String {
    if input.chars().count() <= max_chars {
        return input.to_string();
    }
    input.chars().take(max_chars).collect()
}

/// The full treatment for meta/search-description fields.
pub fn clean_meta(input: &str) -> String {
    clip(&collapse_whitespace(&strip_html(input)), MAX_META_LEN)
}

/// Name treatment: no HTML, collapsed, capped at the name limit.
pub fn clean_name(input: &str) -> String {
    clip(&collapse_whitespace(&strip_html(input)), MAX_NAME_LEN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_tags_and_decodes_entities() {
        let input = "<p>Best &amp; brightest</p><br/> shoes &nbsp; ever";
        assert_eq!(
            collapse_whitespace(&strip_html(input)),
            "Best & brightest shoes ever"
        );
    }

    #[test]
    fn clip_is_char_safe() {
        assert_eq!(clip("héllo", 3), "hél");
        assert_eq!(clip("ab", 10), "ab");
    }

    #[test]
    fn clean_meta_trims_to_platform_max() {
        let long = "x".repeat(2 * MAX_META_LEN);
        assert_eq!(clean_meta(&long).chars().count(), MAX_META_LEN);
    }

    #[test]
    fn nested_markup_collapses_to_single_spaces() {
        let input = "<div><span>a</span>\n\n<b>b</b>\t c</div>";
        assert_eq!(collapse_whitespace(&strip_html(input)), "a b c");
    }
}
