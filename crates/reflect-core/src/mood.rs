//! Mood logging, trend points and the insight line

use anyhow::{Result, ensure};
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

/// How many recent logs the mood and insight views load
pub const DEFAULT_RECENT_LIMIT: usize = 20;

/// Insights need more than this many points before they say anything useful
const INSIGHT_MIN_POINTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mood {
    Joyful,
    Calm,
    Neutral,
    Anxious,
    Distressed,
}

impl Mood {
    pub const ALL: [Mood; 5] = [
        Mood::Joyful,
        Mood::Calm,
        Mood::Neutral,
        Mood::Anxious,
        Mood::Distressed,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Self::Joyful => "Joyful",
            Self::Calm => "Calm",
            Self::Neutral => "Neutral",
            Self::Anxious => "Anxious",
            Self::Distressed => "Distressed",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            Self::Joyful => "😄",
            Self::Calm => "😌",
            Self::Neutral => "😐",
            Self::Anxious => "😟",
            Self::Distressed => "😭",
        }
    }

    /// 5 (best) down to 1
    pub fn score(&self) -> u8 {
        match self {
            Self::Joyful => 5,
            Self::Calm => 4,
            Self::Neutral => 3,
            Self::Anxious => 2,
            Self::Distressed => 1,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|m| m.label().eq_ignore_ascii_case(s))
    }
}

impl std::fmt::Display for Mood {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.emoji(), self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoodEntry {
    pub id: String,
    pub mood: Mood,
    pub caption: String,
    pub logged_at: DateTime<Utc>,
}

impl MoodEntry {
    /// A mood must come with a reason; blank captions are rejected
    pub fn new(mood: Mood, caption: &str) -> Result<Self> {
        let caption = caption.trim();
        ensure!(!caption.is_empty(), "a mood log needs a caption");
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            mood,
            caption: caption.to_string(),
            logged_at: Utc::now(),
        })
    }
}

/// One point on the mood chart
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrendPoint {
    /// Short local weekday, e.g. "Mon"
    pub day: String,
    pub score: u8,
}

/// Chart points in chronological order from logs given newest first
pub fn trend(recent_newest_first: &[MoodEntry]) -> Vec<TrendPoint> {
    recent_newest_first
        .iter()
        .rev()
        .map(|entry| TrendPoint {
            day: entry
                .logged_at
                .with_timezone(&Local)
                .format("%a")
                .to_string(),
            score: entry.mood.score(),
        })
        .collect()
}

pub fn insight(points: &[TrendPoint]) -> &'static str {
    if points.len() > INSIGHT_MIN_POINTS {
        "Your mood seems to be stabilizing. Great job logging consistently!"
    } else {
        "Log more moods to unlock personalized AI insights."
    }
}

/// Whether two instants fall on the same local calendar day
pub fn is_same_day(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    a.with_timezone(&Local).date_naive() == b.with_timezone(&Local).date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entry(mood: Mood, days_ago: i64) -> MoodEntry {
        let mut e = MoodEntry::new(mood, "because").unwrap();
        e.logged_at = Utc::now() - Duration::days(days_ago);
        e
    }

    #[test]
    fn test_scores_and_labels() {
        let scores: Vec<u8> = Mood::ALL.iter().map(|m| m.score()).collect();
        assert_eq!(scores, vec![5, 4, 3, 2, 1]);
        assert_eq!(Mood::Calm.to_string(), "😌 Calm");
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!(Mood::parse("joyful"), Some(Mood::Joyful));
        assert_eq!(Mood::parse(" DISTRESSED "), Some(Mood::Distressed));
        assert_eq!(Mood::parse("meh"), None);
    }

    #[test]
    fn test_blank_caption_rejected() {
        assert!(MoodEntry::new(Mood::Neutral, "   ").is_err());
        let e = MoodEntry::new(Mood::Neutral, "  long day  ").unwrap();
        assert_eq!(e.caption, "long day");
    }

    #[test]
    fn test_trend_is_chronological() {
        let newest_first = vec![
            entry(Mood::Joyful, 0),
            entry(Mood::Anxious, 1),
            entry(Mood::Distressed, 2),
        ];
        let points = trend(&newest_first);
        let scores: Vec<u8> = points.iter().map(|p| p.score).collect();
        assert_eq!(scores, vec![1, 2, 5]);
        assert_eq!(points[0].day.len(), 3);
    }

    #[test]
    fn test_insight_threshold() {
        let three = trend(&[
            entry(Mood::Calm, 0),
            entry(Mood::Calm, 1),
            entry(Mood::Calm, 2),
        ]);
        assert_eq!(
            insight(&three),
            "Log more moods to unlock personalized AI insights."
        );
        let four = trend(&[
            entry(Mood::Calm, 0),
            entry(Mood::Calm, 1),
            entry(Mood::Calm, 2),
            entry(Mood::Calm, 3),
        ]);
        assert!(insight(&four).starts_with("Your mood seems to be stabilizing"));
    }

    #[test]
    fn test_is_same_day() {
        let now = Utc::now();
        assert!(is_same_day(now, now));
        assert!(!is_same_day(now, now - Duration::days(2)));
    }
}
