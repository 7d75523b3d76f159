/// Reduces an HTML payload to its visible text.
///
/// Agent drops arrive as arbitrary markup; only the text survives into the
/// inbox. Contents of `script` and `style` elements are discarded wholesale,
/// all other tags are removed, runs of whitespace collapse to a single space.
pub fn strip_html(input: &str) -> String {
    let mut text = String::with_capacity(input.len());
    let mut chars = input.char_indices().peekable();

    while let Some((idx, c)) = chars.next() {
        if c != '<' {
            text.push(c);
            continue;
        }

        let rest = input.get(idx..).unwrap_or_default();
        let tag_name = leading_tag_name(rest);

        // Skip over the tag itself.
        let mut closed = false;
        for (_, tag_char) in chars.by_ref() {
            if tag_char == '>' {
                closed = true;
                break;
            }
        }
        if !closed {
            break;
        }

        // For script/style, also swallow everything up to the closing tag.
        if matches!(tag_name.as_deref(), Some("script") | Some("style")) {
            let closing = format!("</{}", tag_name.unwrap_or_default());
            while let Some(&(_, next)) = chars.peek() {
                if next == '<' {
                    let ahead: String = chars
                        .clone()
                        .map(|(_, ch)| ch)
                        .take(closing.len())
                        .collect();
                    if ahead.eq_ignore_ascii_case(&closing) {
                        for (_, skipped) in chars.by_ref() {
                            if skipped == '>' {
                                break;
                            }
                        }
                        break;
                    }
                }
                chars.next();
            }
        }
    }

    collapse_whitespace(&decode_entities(&text))
}

fn leading_tag_name(tag: &str) -> Option<String> {
    let inner = tag.strip_prefix('<')?;
    let inner = inner.strip_prefix('/').unwrap_or(inner);
    let name: String = inner
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .collect();
    if name.is_empty() {
        None
    } else {
        Some(name.to_ascii_lowercase())
    }
}

fn decode_entities(input: &str) -> String {
    input
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

fn collapse_whitespace(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last_was_space = true;
    for c in input.chars() {
        if c.is_whitespace() {
            if !last_was_space {
                out.push(' ');
                last_was_space = true;
            }
        } else {
            out.push(c);
            last_was_space = false;
        }
    }
    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_tags_and_script_content() {
        let input = "<div>Hi<script>alert(1)</script> there</div>";
        assert_eq!(strip_html(input), "Hi there");
    }

    #[test]
    fn test_plain_text_passes_through() {
        assert_eq!(strip_html("just a note"), "just a note");
    }

    #[test]
    fn test_style_blocks_are_discarded() {
        let input = "<style>body { color: red; }</style><p>visible</p>";
        assert_eq!(strip_html(input), "visible");
    }

    #[test]
    fn test_whitespace_collapses() {
        let input = "<p>one</p>\n\n<p>two</p>";
        assert_eq!(strip_html(input), "one two");
    }

    #[test]
    fn test_entities_are_decoded() {
        assert_eq!(strip_html("a &amp; b"), "a & b");
    }

    #[test]
    fn test_markup_only_payload_becomes_empty() {
        assert_eq!(strip_html("<div><script>alert(1)</script></div>"), "");
    }

    #[test]
    fn test_unterminated_tag_is_dropped() {
        assert_eq!(strip_html("hello <div"), "hello");
    }
}
