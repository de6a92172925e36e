//! Inbound text routing.
//!
//! Free text is classified once at the boundary into a tagged variant; the
//! pipeline dispatches on the variant rather than re-matching strings in
//! every handler.

/// Where a piece of inbound text should go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Slash command with its remaining argument text
    Command { name: String, args: String },

    /// A URL the extraction engine should download
    DownloadUrl(String),

    /// A short-form-video URL for the lookup API
    ShortVideoUrl(String),

    /// Too short to be a usable query
    TooShort,

    /// Anything else is treated as a music search query
    SearchQuery(String),
}

/// Classify trimmed message text.
pub fn classify_text(text: &str) -> Inbound {
    let text = text.trim();

    if let Some(rest) = text.strip_prefix('/') {
        let mut parts = rest.splitn(2, char::is_whitespace);
        let raw_name = parts.next().unwrap_or_default();
        // Commands may arrive as /cut@botname in group chats.
        let name = raw_name.split('@').next().unwrap_or(raw_name).to_string();
        let args = parts.next().unwrap_or_default().trim().to_string();
        return Inbound::Command { name, args };
    }

    if text.starts_with("http") {
        if text.contains("youtube.com") || text.contains("youtu.be") {
            return Inbound::DownloadUrl(text.to_string());
        }
        if text.contains("tiktok.com") {
            return Inbound::ShortVideoUrl(text.to_string());
        }
    }

    if text.len() < 2 {
        return Inbound::TooShort;
    }

    Inbound::SearchQuery(text.to_string())
}

/// Pull `start=`/`end=` arguments out of a /cut command's argument text.
pub fn parse_cut_args(args: &str) -> (Option<String>, Option<String>) {
    let mut start = None;
    let mut end = None;
    for token in args.split_whitespace() {
        if let Some(value) = token.strip_prefix("start=") {
            start = Some(value.to_string());
        } else if let Some(value) = token.strip_prefix("end=") {
            end = Some(value.to_string());
        }
    }
    (start, end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commands_are_parsed_with_args() {
        assert_eq!(
            classify_text("/cut start=00:30 end=01:20"),
            Inbound::Command {
                name: "cut".to_string(),
                args: "start=00:30 end=01:20".to_string(),
            }
        );
        assert_eq!(
            classify_text("/merge"),
            Inbound::Command {
                name: "merge".to_string(),
                args: String::new(),
            }
        );
        assert_eq!(
            classify_text("/cut@some_bot start=5"),
            Inbound::Command {
                name: "cut".to_string(),
                args: "start=5".to_string(),
            }
        );
    }

    #[test]
    fn test_urls_route_by_platform() {
        assert_eq!(
            classify_text("https://www.youtube.com/watch?v=abc"),
            Inbound::DownloadUrl("https://www.youtube.com/watch?v=abc".to_string())
        );
        assert_eq!(
            classify_text("https://youtu.be/abc"),
            Inbound::DownloadUrl("https://youtu.be/abc".to_string())
        );
        assert_eq!(
            classify_text("https://vm.tiktok.com/ZMabc/"),
            Inbound::ShortVideoUrl("https://vm.tiktok.com/ZMabc/".to_string())
        );
    }

    #[test]
    fn test_short_text_is_rejected() {
        assert_eq!(classify_text("a"), Inbound::TooShort);
        assert_eq!(classify_text(" "), Inbound::TooShort);
    }

    #[test]
    fn test_everything_else_is_a_search() {
        assert_eq!(
            classify_text("never gonna give you up"),
            Inbound::SearchQuery("never gonna give you up".to_string())
        );
        // Non-media URLs fall through to search, like any other text.
        assert_eq!(
            classify_text("https://example.com/page"),
            Inbound::SearchQuery("https://example.com/page".to_string())
        );
    }

    #[test]
    fn test_parse_cut_args() {
        assert_eq!(
            parse_cut_args("start=00:30 end=01:20"),
            (Some("00:30".to_string()), Some("01:20".to_string()))
        );
        assert_eq!(parse_cut_args("end=01:20"), (None, Some("01:20".to_string())));
        assert_eq!(parse_cut_args(""), (None, None));
    }
}
