pub mod api_football;
pub mod detector;
pub mod provider;

pub use api_football::ApiFootball;
pub use detector::ChangeDetector;
pub use provider::{FetchError, SnapshotFetcher};

use crate::models::LiveEvent;

/// Render a snapshot as a plain-text list of live matches.
pub fn format_live_matches(events: &[LiveEvent]) -> String {
    if events.is_empty() {
        return "No live matches right now.".to_string();
    }
    let mut message = String::from("⚽ Live Matches:\n\n");
    for ev in events {
        message.push_str(&format!(
            "{} {} - {} {}\n",
            ev.home_name, ev.home_score, ev.away_score, ev.away_name
        ));
        match ev.minute {
            Some(minute) => message.push_str(&format!("Time: {}'\n\n", minute)),
            None => message.push('\n'),
        }
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_live_matches() {
        let events = vec![LiveEvent {
            id: "1".into(),
            home_name: "Arsenal".into(),
            away_name: "Chelsea".into(),
            home_score: 2,
            away_score: 1,
            status: None,
            minute: Some(75),
        }];
        let text = format_live_matches(&events);
        assert!(text.starts_with("⚽ Live Matches:"));
        assert!(text.contains("Arsenal 2 - 1 Chelsea\nTime: 75'"));
    }

    #[test]
    fn test_format_no_matches() {
        assert_eq!(format_live_matches(&[]), "No live matches right now.");
    }
}
