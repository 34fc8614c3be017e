//! Emotion presentation table
//!
//! The backend labels every reply part with one of a fixed set of emotions.
//! Each emotion maps to an avatar image, an optional one-shot animation and an
//! optional bubble overlay (image + sound effect). The table is checked for
//! exhaustiveness when it is built, so lookups never fail.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::PlaybackError;

/// The closed set of emotions the backend may tag a reply part with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Emotion {
    Disgust,
    Happy,
    Worried,
    Angry,
    Nervous,
    Afraid,
    Shy,
    Flustered,
    Serious,
    Resigned,
    Excited,
    Puzzled,
    /// Shown while the client waits for a reply.
    Thinking,
}

impl Emotion {
    pub const ALL: [Emotion; 13] = [
        Emotion::Disgust,
        Emotion::Happy,
        Emotion::Worried,
        Emotion::Angry,
        Emotion::Nervous,
        Emotion::Afraid,
        Emotion::Shy,
        Emotion::Flustered,
        Emotion::Serious,
        Emotion::Resigned,
        Emotion::Excited,
        Emotion::Puzzled,
        Emotion::Thinking,
    ];

    /// Label used on the wire by the backend.
    pub fn tag(self) -> &'static str {
        match self {
            Emotion::Disgust => "厌恶",
            Emotion::Happy => "高兴",
            Emotion::Worried => "担心",
            Emotion::Angry => "生气",
            Emotion::Nervous => "紧张",
            Emotion::Afraid => "害怕",
            Emotion::Shy => "害羞",
            Emotion::Flustered => "慌张",
            Emotion::Serious => "认真",
            Emotion::Resigned => "无奈",
            Emotion::Excited => "兴奋",
            Emotion::Puzzled => "疑惑",
            Emotion::Thinking => "AI思考",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Emotion::Disgust => "disgust",
            Emotion::Happy => "happy",
            Emotion::Worried => "worried",
            Emotion::Angry => "angry",
            Emotion::Nervous => "nervous",
            Emotion::Afraid => "afraid",
            Emotion::Shy => "shy",
            Emotion::Flustered => "flustered",
            Emotion::Serious => "serious",
            Emotion::Resigned => "resigned",
            Emotion::Excited => "excited",
            Emotion::Puzzled => "puzzled",
            Emotion::Thinking => "thinking",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Emotion {
    type Err = PlaybackError;

    /// Accepts the wire tag or the English name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Emotion::ALL
            .into_iter()
            .find(|e| e.tag() == s || e.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| PlaybackError::UnknownEmotion(s.to_string()))
    }
}

impl Serialize for Emotion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.tag())
    }
}

impl<'de> Deserialize<'de> for Emotion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Transient overlay shown when the emotion changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bubble {
    pub image: String,
    /// Style class applied to the overlay (e.g. "angry", "shy")
    #[serde(default)]
    pub class: Option<String>,
    /// One-shot sound effect
    #[serde(default)]
    pub sound: Option<String>,
}

/// How one emotion is rendered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Presentation {
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub animation: Option<String>,
    #[serde(default)]
    pub bubble: Option<Bubble>,
}

/// Exhaustive emotion → presentation mapping.
#[derive(Debug, Clone)]
pub struct EmotionTable {
    entries: Vec<Presentation>,
}

impl EmotionTable {
    /// Build a table, rejecting duplicate or missing emotions.
    pub fn from_entries<I>(entries: I) -> Result<Self, PlaybackError>
    where
        I: IntoIterator<Item = (Emotion, Presentation)>,
    {
        let mut slots: Vec<Option<Presentation>> = vec![None; Emotion::ALL.len()];
        for (emotion, presentation) in entries {
            let slot = &mut slots[emotion.index()];
            if slot.is_some() {
                return Err(PlaybackError::DuplicateEmotion(emotion));
            }
            *slot = Some(presentation);
        }

        let mut table = Vec::with_capacity(slots.len());
        for (emotion, slot) in Emotion::ALL.into_iter().zip(slots) {
            table.push(slot.ok_or(PlaybackError::MissingEmotion(emotion))?);
        }
        Ok(Self { entries: table })
    }

    /// The character's stock assets.
    pub fn builtin() -> Self {
        fn entry(
            img: Option<&str>,
            animation: Option<&str>,
            bubble: Option<(&str, Option<&str>, &str)>,
        ) -> Presentation {
            Presentation {
                image: img.map(|i| format!("../pictures/qinling/{i}.png")),
                animation: animation.map(str::to_string),
                bubble: bubble.map(|(image, class, sound)| Bubble {
                    image: format!("../pictures/animation/{image}.webp"),
                    class: class.map(str::to_string),
                    sound: Some(format!("../audio_effects/{sound}.wav")),
                }),
            }
        }

        let assets = |emotion: Emotion| match emotion {
            Emotion::Disgust => entry(Some("厌恶"), None, Some(("生气", Some("angry"), "厌恶"))),
            Emotion::Happy => entry(
                Some("高兴或自信"),
                Some("happy-bounce"),
                Some(("高兴", Some("happy"), "喜悦")),
            ),
            Emotion::Worried => entry(Some("担心"), None, Some(("流泪", None, "伤心"))),
            Emotion::Angry => entry(
                Some("生气"),
                Some("angry-jump"),
                Some(("生气2", Some("angry"), "生气")),
            ),
            Emotion::Nervous => entry(Some("尴尬或紧张"), None, Some(("紧张", None, "尴尬"))),
            Emotion::Afraid => entry(Some("害怕"), None, Some(("惊讶", None, "震惊"))),
            Emotion::Shy => entry(Some("害羞"), None, Some(("害羞", Some("shy"), "害羞"))),
            Emotion::Flustered => entry(Some("慌张"), None, Some(("慌乱", None, "震惊"))),
            Emotion::Serious => entry(Some("认真"), Some("serious-think"), None),
            Emotion::Resigned => entry(Some("无奈"), None, Some(("叹气", None, "叹气"))),
            Emotion::Excited => entry(Some("兴奋"), None, Some(("聊天", None, "聊天"))),
            Emotion::Puzzled => entry(Some("疑惑"), None, Some(("疑问", None, "疑问"))),
            Emotion::Thinking => entry(None, None, Some(("AI思考", None, "无语"))),
        };

        Self {
            entries: Emotion::ALL.into_iter().map(assets).collect(),
        }
    }

    pub fn get(&self, emotion: Emotion) -> &Presentation {
        &self.entries[emotion.index()]
    }
}

impl Default for EmotionTable {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_wire_tags_and_names() {
        assert_eq!("高兴".parse::<Emotion>().unwrap(), Emotion::Happy);
        assert_eq!("AI思考".parse::<Emotion>().unwrap(), Emotion::Thinking);
        assert_eq!("Serious".parse::<Emotion>().unwrap(), Emotion::Serious);
        assert_eq!(" 害羞 ".parse::<Emotion>().unwrap(), Emotion::Shy);
    }

    #[test]
    fn unknown_tag_is_an_error() {
        let err = "开心".parse::<Emotion>().unwrap_err();
        assert!(matches!(err, PlaybackError::UnknownEmotion(ref t) if t == "开心"));
    }

    #[test]
    fn tags_and_names_are_unique() {
        for (i, a) in Emotion::ALL.iter().enumerate() {
            for b in &Emotion::ALL[i + 1..] {
                assert_ne!(a.tag(), b.tag());
                assert_ne!(a.name(), b.name());
            }
        }
    }

    #[test]
    fn serde_uses_wire_tag() {
        let json = serde_json::to_string(&Emotion::Angry).unwrap();
        assert_eq!(json, "\"生气\"");
        let back: Emotion = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Emotion::Angry);
        assert!(serde_json::from_str::<Emotion>("\"平静\"").is_err());
    }

    #[test]
    fn builtin_table_covers_every_emotion() {
        let table = EmotionTable::builtin();
        for emotion in Emotion::ALL {
            let _ = table.get(emotion);
        }
        assert_eq!(
            table.get(Emotion::Happy).animation.as_deref(),
            Some("happy-bounce")
        );
        assert!(table.get(Emotion::Serious).bubble.is_none());
        assert!(table.get(Emotion::Thinking).image.is_none());
    }

    #[test]
    fn missing_entry_rejected_at_construction() {
        let entries = Emotion::ALL
            .into_iter()
            .filter(|e| *e != Emotion::Puzzled)
            .map(|e| (e, EmotionTable::builtin().get(e).clone()));
        let err = EmotionTable::from_entries(entries).unwrap_err();
        assert!(matches!(err, PlaybackError::MissingEmotion(Emotion::Puzzled)));
    }

    #[test]
    fn duplicate_entry_rejected_at_construction() {
        let builtin = EmotionTable::builtin();
        let mut entries: Vec<_> = Emotion::ALL
            .into_iter()
            .map(|e| (e, builtin.get(e).clone()))
            .collect();
        entries.push((Emotion::Happy, builtin.get(Emotion::Happy).clone()));
        let err = EmotionTable::from_entries(entries).unwrap_err();
        assert!(matches!(err, PlaybackError::DuplicateEmotion(Emotion::Happy)));
    }
}
