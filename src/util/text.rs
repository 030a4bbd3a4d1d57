use std::borrow::Cow;

/// Truncates a string to at most `max_chars` Unicode scalar values.
///
/// Cuts on a char boundary, never inside a multi-byte sequence, and adds no
/// ellipsis: stored article fields are capped, not decorated.
///
/// Returns `Cow::Borrowed` when the input already fits.
///
/// # Examples
///
/// ```
/// use newsdesk::util::truncate_chars;
///
/// assert_eq!(truncate_chars("Short", 10), "Short");
/// assert_eq!(truncate_chars("Hello World", 5), "Hello");
/// assert_eq!(truncate_chars("你好世界", 2), "你好");
/// ```
pub fn truncate_chars(s: &str, max_chars: usize) -> Cow<'_, str> {
    match s.char_indices().nth(max_chars) {
        None => Cow::Borrowed(s),
        Some((byte_idx, _)) => Cow::Owned(s[..byte_idx].to_owned()),
    }
}

fn is_stripped_control(c: char) -> bool {
    c.is_control() && c != '\t' && c != '\n' && c != '\r'
}

/// Strip control characters (including ESC and DEL) from remote text.
///
/// Feed titles and scraped text end up in log lines, LLM prompts and export
/// files; none of those should carry terminal escapes or NULs.
///
/// Preserves: tab, newline, carriage return.
///
/// Returns `Cow::Borrowed` when the input contains nothing to strip (common case).
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    if !s.chars().any(is_stripped_control) {
        return Cow::Borrowed(s);
    }
    Cow::Owned(s.chars().filter(|&c| !is_stripped_control(c)).collect())
}

/// Collapse runs of whitespace (including newlines) into single spaces and trim.
///
/// Used for text pulled out of HTML, where the DOM's text nodes carry the
/// page's indentation.
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
