//! Plain-text cleanup for received mail.
//!
//! Provider payloads frequently carry HTML entities in subjects and text
//! parts (`&amp;`, `&#39;`), and some messages arrive with an HTML part only.

use std::sync::LazyLock;

use regex::Regex;

static SCRIPT_OR_STYLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<script\b.*?</script\s*>|<style\b.*?</style\s*>|<head\b.*?</head\s*>")
        .expect("valid script/style regex")
});

static BLOCK_BREAK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<br\s*/?>|</(p|div|li|tr|h[1-6]|blockquote|table)\s*>")
        .expect("valid block break regex")
});

static TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid tag regex"));

static BLANK_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid blank line regex"));

/// Decode named and numeric HTML entities. Unknown entities are kept verbatim.
pub fn decode_html_entities(input: &str) -> String {
    if !input.contains('&') {
        return input.to_string();
    }

    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];

        let decoded = tail
            .char_indices()
            .take(12)
            .find(|&(_, c)| c == ';')
            .and_then(|(semi, _)| decode_entity(&tail[1..semi]).map(|c| (c, semi)));

        match decoded {
            Some((c, semi)) => {
                out.push(c);
                rest = &tail[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(name: &str) -> Option<char> {
    if let Some(num) = name.strip_prefix('#') {
        let code = match num.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => num.parse::<u32>().ok()?,
        };
        return char::from_u32(code);
    }

    let c = match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => ' ',
        "copy" => '©',
        "reg" => '®',
        "trade" => '™',
        "hellip" => '…',
        "mdash" => '—',
        "ndash" => '–',
        "lsquo" => '‘',
        "rsquo" => '’',
        "ldquo" => '“',
        "rdquo" => '”',
        "euro" => '€',
        "pound" => '£',
        "bull" => '•',
        "middot" => '·',
        _ => return None,
    };
    Some(c)
}

/// Best-effort plain-text rendering of an HTML body.
pub fn html_to_text(html: &str) -> String {
    let without_code = SCRIPT_OR_STYLE.replace_all(html, "");
    let with_breaks = BLOCK_BREAK.replace_all(&without_code, "\n");
    let stripped = TAG.replace_all(&with_breaks, "");
    let decoded = decode_html_entities(&stripped);

    let lines: Vec<&str> = decoded.lines().map(str::trim_end).collect();
    let joined = lines.join("\n");
    BLANK_RUNS.replace_all(joined.trim(), "\n\n").into_owned()
}

/// Collapse all whitespace runs to single spaces.
pub fn collapse_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_named_and_numeric_entities() {
        assert_eq!(
            decode_html_entities("Tom &amp; Jerry&#39;s &quot;show&quot; &#x27;x&#X27; &lt;b&gt;"),
            "Tom & Jerry's \"show\" 'x' <b>"
        );
    }

    #[test]
    fn keeps_unknown_or_unterminated_entities() {
        assert_eq!(decode_html_entities("a &bogus; b"), "a &bogus; b");
        assert_eq!(decode_html_entities("R&D department"), "R&D department");
        assert_eq!(decode_html_entities("trailing &"), "trailing &");
        assert_eq!(decode_html_entities("&#xZZ;"), "&#xZZ;");
    }

    #[test]
    fn double_encoded_input_decodes_one_level() {
        assert_eq!(decode_html_entities("&amp;amp;"), "&amp;");
    }

    #[test]
    fn html_to_text_strips_markup() {
        let html = "<html><head><title>x</title></head><body>\
                    <style>p { color: red }</style>\
                    <p>Hi Jane,</p><p>Your interview is <b>confirmed</b>.<br>See you &amp; good luck!</p>\
                    <script>alert(1)</script></body></html>";
        assert_eq!(
            html_to_text(html),
            "Hi Jane,\nYour interview is confirmed.\nSee you & good luck!"
        );
    }

    #[test]
    fn collapses_whitespace() {
        assert_eq!(collapse_whitespace("  a \t b\n\nc "), "a b c");
    }
}
