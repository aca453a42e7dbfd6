//! Mention detection.

/// Checks whether `text` begins by addressing `name`.
///
/// Accepts an optional leading `@` or `!`, then `name`, then one of `:`, `,`,
/// whitespace, or the end of the text. Returns the matched name.
///
/// ```rust
/// use abot_core::match_mention;
///
/// assert_eq!(match_mention("@bot: hi", "bot"), Some("bot"));
/// assert_eq!(match_mention("bot, hi", "bot"), Some("bot"));
/// assert_eq!(match_mention("botty hi", "bot"), None);
/// ```
pub fn match_mention<'a>(text: &str, name: &'a str) -> Option<&'a str> {
    if name.is_empty() {
        return None;
    }
    let body = text
        .strip_prefix('@')
        .or_else(|| text.strip_prefix('!'))
        .unwrap_or(text);
    let rest = body.strip_prefix(name)?;
    match rest.chars().next() {
        None => Some(name),
        Some(c) if c == ':' || c == ',' || c.is_whitespace() => Some(name),
        Some(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepted_forms() {
        for text in ["bot", "@bot", "!bot", "bot: hi", "@bot, hi", "!bot hello", "bot\tx"] {
            assert_eq!(match_mention(text, "bot"), Some("bot"), "{text:?}");
        }
    }

    #[test]
    fn rejected_forms() {
        for text in ["botty", "@botty hi", "hi bot", "", "@", "#bot", "@!bot"] {
            assert_eq!(match_mention(text, "bot"), None, "{text:?}");
        }
    }

    #[test]
    fn empty_name_never_matches() {
        assert_eq!(match_mention("anything", ""), None);
    }
}
