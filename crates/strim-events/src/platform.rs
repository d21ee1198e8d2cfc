use serde::{Deserialize, Serialize};

/// Enumerates the external platforms Strim ingests from and sends to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Twitch,
    Youtube,
    Tiktok,
}

impl Platform {
    /// Returns the stable snake_case wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Twitch => "twitch",
            Self::Youtube => "youtube",
            Self::Tiktok => "tiktok",
        }
    }

    /// Parses a platform token; tolerant of surrounding whitespace and case.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "twitch" => Some(Self::Twitch),
            "youtube" => Some(Self::Youtube),
            "tiktok" => Some(Self::Tiktok),
            _ => None,
        }
    }

    /// Every supported platform, in stable order.
    pub fn all() -> [Platform; 3] {
        [Self::Twitch, Self::Youtube, Self::Tiktok]
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}
