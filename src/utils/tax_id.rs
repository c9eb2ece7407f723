use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Number of digits in a company tax identifier (CNPJ).
pub const TAX_ID_LEN: usize = 14;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TaxIdError {
    #[error("taxpayer identifier is empty")]
    Empty,
    #[error("taxpayer identifier must have 14 digits, got {0}")]
    WrongLength(usize),
}

/// Strip every non-digit character (`"122.643.046-50"` -> `"12264304650"`).
pub fn digits_only(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Taxpayer identifier normalised to exactly 14 digits.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaxId(String);

impl TaxId {
    pub fn parse(raw: &str) -> Result<Self, TaxIdError> {
        let digits = digits_only(raw);
        if digits.is_empty() {
            return Err(TaxIdError::Empty);
        }
        if digits.len() != TAX_ID_LEN {
            return Err(TaxIdError::WrongLength(digits.len()));
        }
        Ok(Self(digits))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Display form `XX.XXX.XXX/XXXX-XX`.
    pub fn formatted(&self) -> String {
        let d = &self.0;
        format!(
            "{}.{}.{}/{}-{}",
            &d[0..2],
            &d[2..5],
            &d[5..8],
            &d[8..12],
            &d[12..14]
        )
    }
}

impl FromStr for TaxId {
    type Err = TaxIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TaxId {
    type Error = TaxIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TaxId> for String {
    fn from(id: TaxId) -> Self {
        id.0
    }
}

impl fmt::Display for TaxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_formatted_and_raw_input() {
        let a = TaxId::parse("49.189.181/0001-35").unwrap();
        let b: TaxId = "49189181000135".parse().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "49189181000135");
        assert_eq!(a.formatted(), "49.189.181/0001-35");
    }

    #[test]
    fn rejects_wrong_length() {
        assert_eq!(TaxId::parse("1234"), Err(TaxIdError::WrongLength(4)));
        assert_eq!(TaxId::parse("se indetificado!"), Err(TaxIdError::Empty));
    }

    #[test]
    fn digits_only_normalises_procurator_id() {
        assert_eq!(digits_only("122.643.046-50"), "12264304650");
    }

    #[test]
    fn serde_round_trips_through_plain_string() {
        let id = TaxId::parse("49189181000135").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"49189181000135\"");
        let bad: Result<TaxId, _> = serde_json::from_str("\"123\"");
        assert!(bad.is_err());
    }
}
