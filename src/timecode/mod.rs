//! Time token codec: `"H:MM:SS"`, `"MM:SS"`, or bare seconds to a canonical
//! second count and back.

/// Parse a colon-separated time token into seconds.
///
/// Accepts 1, 2, or 3 numeric fields interpreted as seconds,
/// minutes:seconds, or hours:minutes:seconds. Malformed or empty input
/// resolves to 0 rather than an error - the permissive behavior is a
/// deliberate product decision carried over from the chat interface, where a
/// bad token falls back to "from the beginning".
pub fn parse(token: &str) -> u64 {
    let fields: Option<Vec<u64>> = token
        .split(':')
        .map(|f| f.trim().parse::<u64>().ok())
        .collect();

    match fields.as_deref() {
        Some([s]) => *s,
        Some([m, s]) => m * 60 + s,
        Some([h, m, s]) => h * 3600 + m * 60 + s,
        _ => 0,
    }
}

/// Format seconds as a zero-padded time token.
///
/// The hour field is omitted below one hour: `format(90) == "01:30"`,
/// `format(3723) == "01:02:03"`.
pub fn format(total_secs: u64) -> String {
    let h = total_secs / 3600;
    let m = (total_secs % 3600) / 60;
    let s = total_secs % 60;

    if h > 0 {
        format!("{:02}:{:02}:{:02}", h, m, s)
    } else {
        format!("{:02}:{:02}", m, s)
    }
}
