// src/core/rpc/mentions.rs

//! Resolves the `"<@123456789012345678>"` mention syntax operators paste
//! into slash-command arguments down to the bare snowflake, per the
//! specification's parameter-marshalling rule for player/operator lookups.

use once_cell::sync::Lazy;
use regex::Regex;

static MENTION_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^<@!?(\d+)>$").expect("valid mention regex"));

/// Returns the snowflake ID if `raw` is a Discord-style mention, otherwise
/// `None` -- callers fall back to treating the value as a literal name.
pub fn resolve_mention(raw: &str) -> Option<u64> {
    MENTION_PATTERN
        .captures(raw.trim())
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_plain_mention() {
        assert_eq!(resolve_mention("<@123456789012345678>"), Some(123456789012345678));
    }

    #[test]
    fn resolves_nickname_mention() {
        assert_eq!(resolve_mention("<@!42>"), Some(42));
    }

    #[test]
    fn rejects_non_mention() {
        assert_eq!(resolve_mention("some-host-name"), None);
    }
}
