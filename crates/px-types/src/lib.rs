use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Chain account identifier, kept in the format the ledger reports it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct AccountId(pub String);

impl AccountId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hash of a broadcast write, used to wait for its confirmation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct TxHandle(pub String);

impl fmt::Display for TxHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("color must be 6 hex digits, got {0:?}")]
pub struct ColorParseError(pub String);

/// Six hex digits without the leading `#`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct ColorHex(String);

impl ColorHex {
    /// Accepts `"a1b2c3"` and `"#a1b2c3"`; case is preserved.
    pub fn parse(raw: &str) -> Result<Self, ColorParseError> {
        let trimmed = raw.trim();
        let digits = trimmed.strip_prefix('#').unwrap_or(trimmed);
        if digits.len() == 6 && digits.bytes().all(|byte| byte.is_ascii_hexdigit()) {
            Ok(Self(digits.to_owned()))
        } else {
            Err(ColorParseError(raw.to_owned()))
        }
    }

    pub fn from_rgb(r: u8, g: u8, b: u8) -> Self {
        Self(format!("{r:02x}{g:02x}{b:02x}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `#`-prefixed form for display layers.
    pub fn to_css(&self) -> String {
        format!("#{}", self.0)
    }
}

impl TryFrom<String> for ColorHex {
    type Error = ColorParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ColorHex> for String {
    fn from(value: ColorHex) -> Self {
        value.0
    }
}

impl fmt::Display for ColorHex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The two colours of one submission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColorPair {
    pub color_a: ColorHex,
    pub color_b: ColorHex,
}

impl ColorPair {
    pub fn new(color_a: ColorHex, color_b: ColorHex) -> Self {
        Self { color_a, color_b }
    }

    pub fn parse(color_a: &str, color_b: &str) -> Result<Self, ColorParseError> {
        Ok(Self {
            color_a: ColorHex::parse(color_a)?,
            color_b: ColorHex::parse(color_b)?,
        })
    }
}

/// One record of the ledger.
///
/// Identity is the whole tuple `(submitter, submitted_at, color_a, color_b)`:
/// two values are the same pixel exactly when they compare equal. Colours are
/// kept as the ledger returned them and compared case-sensitively.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Pixel {
    pub submitter: AccountId,
    /// Seconds since epoch, as recorded by the ledger.
    pub submitted_at: u64,
    pub color_a: String,
    pub color_b: String,
}

impl Pixel {
    pub fn new(
        submitter: AccountId,
        submitted_at: u64,
        color_a: impl Into<String>,
        color_b: impl Into<String>,
    ) -> Self {
        Self {
            submitter,
            submitted_at,
            color_a: color_a.into(),
            color_b: color_b.into(),
        }
    }

    pub fn from_colors(submitter: AccountId, submitted_at: u64, colors: &ColorPair) -> Self {
        Self::new(
            submitter,
            submitted_at,
            colors.color_a.as_str(),
            colors.color_b.as_str(),
        )
    }
}
