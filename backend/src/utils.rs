/// Parse ISO8601 date string to Unix timestamp
pub fn parse_iso8601_to_timestamp(date_str: &str) -> i64 {
    if date_str.is_empty() {
        return 0;
    }

    use chrono::{DateTime, Utc};
    date_str
        .parse::<DateTime<Utc>>()
        .map(|dt| dt.timestamp())
        .unwrap_or(0)
}

/// Parse ISO8601 duration string (PT1H2M3S) to total seconds
pub fn parse_iso8601_duration_to_seconds(duration_str: &str) -> i64 {
    let Some(duration_part) = duration_str.strip_prefix("PT") else {
        return 0;
    };

    let mut total_seconds = 0.0;
    let mut current_number = String::new();

    for ch in duration_part.chars() {
        if ch.is_ascii_digit() || ch == '.' {
            current_number.push(ch);
            continue;
        }
        if let Ok(num) = current_number.parse::<f64>() {
            total_seconds += match ch {
                'H' => num * 3600.0,
                'M' => num * 60.0,
                'S' => num,
                _ => 0.0,
            };
        }
        current_number.clear();
    }

    total_seconds as i64
}

const CATEGORY_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "instruction",
        &[
            "lesson", "tip", "how to", "tutorial", "teach", "swing", "putting", "chipping",
            "drill",
        ],
    ),
    (
        "equipment",
        &[
            "review",
            "club",
            "ball",
            "gear",
            "equipment",
            "shaft",
            "driver",
            "iron",
            "test",
        ],
    ),
    (
        "tour",
        &[
            "pga",
            "tour",
            "tournament",
            "round",
            "leaderboard",
            "championship",
            "masters",
            "open",
        ],
    ),
    (
        "highlights",
        &["highlight", "best", "shot", "hole in one", "ace", "eagle", "amazing"],
    ),
    (
        "vlog",
        &[
            "vlog",
            "course",
            "round",
            "playing",
            "golf with",
            "day at",
            "experience",
        ],
    ),
    (
        "news",
        &["news", "update", "announcement", "breaking", "interview"],
    ),
];

pub const FALLBACK_CATEGORY: &str = "general";

/// Tags a video with the first category whose keywords appear in its title or
/// description.
pub fn categorize_video(title: &str, description: &str) -> String {
    let text = format!("{title} {description}").to_lowercase();

    CATEGORY_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|keyword| text.contains(keyword)))
        .map(|(category, _)| category.to_string())
        .unwrap_or_else(|| FALLBACK_CATEGORY.to_string())
}

pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Accepts a bare channel id or a `/channel/<id>` URL.
pub fn extract_channel_id(input: &str) -> Option<String> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    if let Ok(parsed_url) = url::Url::parse(input) {
        let mut segments = parsed_url.path_segments()?;
        while let Some(segment) = segments.next() {
            if segment == "channel" {
                return segments
                    .next()
                    .filter(|id| !id.is_empty())
                    .map(String::from);
            }
        }
        return None;
    }

    if input.contains('/') || input.contains(char::is_whitespace) {
        return None;
    }
    Some(input.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_iso_durations() {
        assert_eq!(parse_iso8601_duration_to_seconds("PT1H2M3S"), 3723);
        assert_eq!(parse_iso8601_duration_to_seconds("PT4M13S"), 253);
        assert_eq!(parse_iso8601_duration_to_seconds("PT45S"), 45);
        assert_eq!(parse_iso8601_duration_to_seconds("P1D"), 0);
        assert_eq!(parse_iso8601_duration_to_seconds(""), 0);
    }

    #[test]
    fn parses_publish_dates() {
        assert_eq!(parse_iso8601_to_timestamp("2024-01-01T00:00:00Z"), 1704067200);
        assert_eq!(parse_iso8601_to_timestamp("yesterday"), 0);
    }

    #[test]
    fn categorizes_by_first_matching_keyword() {
        assert_eq!(categorize_video("5 Putting Drills", ""), "instruction");
        assert_eq!(categorize_video("New Driver Review", ""), "equipment");
        assert_eq!(categorize_video("Masters Sunday", "final leaderboard"), "tour");
        assert_eq!(categorize_video("Hole in one!", ""), "highlights");
        assert_eq!(categorize_video("Breaking news", ""), "news");
        assert_eq!(categorize_video("Untitled", "nothing here"), FALLBACK_CATEGORY);
    }

    #[test]
    fn truncates_on_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }

    #[test]
    fn extracts_channel_ids() {
        assert_eq!(
            extract_channel_id("https://www.youtube.com/channel/UCTeLqJq1mXUX5WWoNXLmOIA"),
            Some("UCTeLqJq1mXUX5WWoNXLmOIA".to_string())
        );
        assert_eq!(
            extract_channel_id("  UCq-Cy3CK3r-qmjM7fXPqTlQ "),
            Some("UCq-Cy3CK3r-qmjM7fXPqTlQ".to_string())
        );
        assert_eq!(extract_channel_id("https://youtube.com/@handle"), None);
        assert_eq!(extract_channel_id(""), None);
    }
}
