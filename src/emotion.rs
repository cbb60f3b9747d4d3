//! Driver emotion score and its presentation.
//!
//! The emotion collaborator rates how much the driver's current emotional
//! state threatens driving safety on a 0–9 scale. Only the latest score is
//! kept; a failed or unparseable rating is `None` and shown as "unknown".

use serde::{Deserialize, Serialize};

/// Driving-safety emotion rating in `0..=9`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct EmotionScore(u8);

/// Coarse bucket of an [`EmotionScore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmotionLevel {
    Calm,
    Good,
    Neutral,
    Uneasy,
    Tense,
    Severe,
}

impl EmotionScore {
    pub const MAX: u8 = 9;

    /// Returns `None` when `value` is out of range.
    pub fn new(value: u8) -> Option<Self> {
        (value <= Self::MAX).then_some(Self(value))
    }

    pub fn value(self) -> u8 {
        self.0
    }

    pub fn level(self) -> EmotionLevel {
        match self.0 {
            0 => EmotionLevel::Calm,
            1..=2 => EmotionLevel::Good,
            3..=4 => EmotionLevel::Neutral,
            5..=6 => EmotionLevel::Uneasy,
            7..=8 => EmotionLevel::Tense,
            _ => EmotionLevel::Severe,
        }
    }

    /// Parse a model reply into a score.
    ///
    /// `"null"` means the model declined to rate. Otherwise the leading
    /// integer is used if it is within range; anything else yields `None`.
    pub fn parse_reply(reply: &str) -> Option<Self> {
        let reply = reply.trim();
        if reply == "null" {
            return None;
        }
        let unsigned = reply.strip_prefix('+').unwrap_or(reply);
        let digits: String = unsigned.chars().take_while(char::is_ascii_digit).collect();
        if digits.is_empty() {
            return None;
        }
        digits.parse::<u32>().ok().and_then(|v| u8::try_from(v).ok()).and_then(Self::new)
    }
}

impl TryFrom<u8> for EmotionScore {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| format!("emotion score {value} out of range 0..=9"))
    }
}

impl From<EmotionScore> for u8 {
    fn from(score: EmotionScore) -> Self {
        score.0
    }
}

impl std::fmt::Display for EmotionScore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Emoji shown for a score; `None` renders as a question mark.
pub fn emoji(score: Option<EmotionScore>) -> &'static str {
    let Some(score) = score else {
        return "❓";
    };
    match score.level() {
        EmotionLevel::Calm => "😌",
        EmotionLevel::Good => "🙂",
        EmotionLevel::Neutral => "😐",
        EmotionLevel::Uneasy => "😕",
        EmotionLevel::Tense => "😟",
        EmotionLevel::Severe => "😡",
    }
}

/// Indicator colour: green→blue over 0..=4, blue→red over 5..=9, white when unknown.
pub fn color(score: Option<EmotionScore>) -> (u8, u8, u8) {
    let Some(score) = score else {
        return (255, 255, 255);
    };
    let v = f32::from(score.value());
    if v <= 4.0 {
        let ratio = v / 4.0;
        (0, (255.0 - ratio * 255.0).round() as u8, (ratio * 255.0).round() as u8)
    } else {
        let ratio = (v - 4.0) / 5.0;
        ((ratio * 255.0).round() as u8, 0, (255.0 - ratio * 255.0).round() as u8)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn parse_plain_digit() {
        assert_eq!(EmotionScore::parse_reply("3"), EmotionScore::new(3));
        assert_eq!(EmotionScore::parse_reply(" 7\n"), EmotionScore::new(7));
    }

    #[test]
    fn parse_uses_leading_integer() {
        assert_eq!(EmotionScore::parse_reply("5."), EmotionScore::new(5));
        assert_eq!(EmotionScore::parse_reply("2 (mild)"), EmotionScore::new(2));
    }

    #[test]
    fn parse_rejects_null_text_and_out_of_range() {
        assert_eq!(EmotionScore::parse_reply("null"), None);
        assert_eq!(EmotionScore::parse_reply("calm"), None);
        assert_eq!(EmotionScore::parse_reply("10"), None);
        assert_eq!(EmotionScore::parse_reply("-1"), None);
        assert_eq!(EmotionScore::parse_reply(""), None);
    }

    #[test]
    fn levels_follow_emoji_buckets() {
        assert_eq!(emoji(EmotionScore::new(0)), "😌");
        assert_eq!(emoji(EmotionScore::new(2)), "🙂");
        assert_eq!(emoji(EmotionScore::new(4)), "😐");
        assert_eq!(emoji(EmotionScore::new(6)), "😕");
        assert_eq!(emoji(EmotionScore::new(8)), "😟");
        assert_eq!(emoji(EmotionScore::new(9)), "😡");
        assert_eq!(emoji(None), "❓");
    }

    #[test]
    fn color_ramp_endpoints() {
        assert_eq!(color(None), (255, 255, 255));
        assert_eq!(color(EmotionScore::new(0)), (0, 255, 0));
        assert_eq!(color(EmotionScore::new(4)), (0, 0, 255));
        assert_eq!(color(EmotionScore::new(9)), (255, 0, 0));
    }

    #[test]
    fn serde_rejects_out_of_range() {
        let ok: EmotionScore = serde_json::from_str("3").unwrap();
        assert_eq!(ok.value(), 3);
        assert!(serde_json::from_str::<EmotionScore>("12").is_err());
    }
}
