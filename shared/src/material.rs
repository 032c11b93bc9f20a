/*!
Material codes and classifier answer decoding.

The classifier answers in free text. The only contract relied upon is that
the text contains one of the digits `1` to `5` somewhere; the first such digit
read left to right is the material code.
*/

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Material class of the object in front of the camera
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum MaterialCode {
    Metal = 1,
    Glass = 2,
    Paper = 3,
    Plastic = 4,
    /// No object, or nothing recognisable
    Empty = 5,
}

impl MaterialCode {
    /// Parse a material code from its ASCII digit
    pub fn from_digit(c: char) -> Option<Self> {
        match c {
            '1' => Some(Self::Metal),
            '2' => Some(Self::Glass),
            '3' => Some(Self::Paper),
            '4' => Some(Self::Plastic),
            '5' => Some(Self::Empty),
            _ => None,
        }
    }

    /// Numeric code (1-5)
    pub fn code(self) -> u8 {
        self as u8
    }

    /// ASCII digit used on the link
    pub fn digit(self) -> char {
        char::from(b'0' + self.code())
    }

    /// Lowercase English label
    pub fn label(self) -> &'static str {
        match self {
            Self::Metal => "metal",
            Self::Glass => "glass",
            Self::Paper => "paper",
            Self::Plastic => "plastic",
            Self::Empty => "empty",
        }
    }

    /// True when there is nothing for the actuator to sort
    pub fn is_empty(self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Actuator command line for this material, `None` for [`MaterialCode::Empty`]
    pub fn actuator_command(self) -> Option<String> {
        if self.is_empty() {
            None
        } else {
            Some(format!("{}\n", self.digit()))
        }
    }

    /// Scan classifier text for the first digit in `1..=5`.
    ///
    /// Returns the code and the byte offset of the digit, or `None` if the
    /// text carries no qualifying digit.
    pub fn scan(text: &str) -> Option<(Self, usize)> {
        text.char_indices()
            .find_map(|(idx, c)| Self::from_digit(c).map(|code| (code, idx)))
    }
}

impl std::fmt::Display for MaterialCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.code(), self.label())
    }
}

/// Decoded classifier answer for one frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub material: MaterialCode,
    /// Object description following the material digit
    pub description: String,
    /// Unmodified classifier text (empty when the call failed)
    pub raw_text: String,
    pub requested_at: DateTime<Local>,
}

impl ClassificationResult {
    /// Decode classifier text into a result, defaulting to [`MaterialCode::Empty`]
    pub fn from_text(text: &str, requested_at: DateTime<Local>) -> Self {
        let (material, description) = match MaterialCode::scan(text) {
            Some((material, idx)) => {
                let after = trim_separators(&text[idx + 1..]);
                let description = if after.is_empty() {
                    trim_separators(&text[..idx])
                } else {
                    after
                };
                (material, description.to_string())
            }
            None => {
                debug!("No material digit in classifier text, defaulting to empty");
                (MaterialCode::Empty, text.trim().to_string())
            }
        };

        Self {
            material,
            description,
            raw_text: text.to_string(),
            requested_at,
        }
    }

    /// Result used when the classifier could not be reached
    pub fn empty(requested_at: DateTime<Local>) -> Self {
        Self {
            material: MaterialCode::Empty,
            description: String::new(),
            raw_text: String::new(),
            requested_at,
        }
    }
}

fn trim_separators(s: &str) -> &str {
    s.trim_matches(|c: char| c.is_whitespace() || matches!(c, '-' | ':' | '.' | ',' | ')' | '*'))
}
