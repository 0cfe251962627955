use anyhow::{bail, Context, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Sequential index of a block.
///
/// Chain nodes report heights either as hex quantities (`0x1b4`) or as decimal
/// strings (`436`). Both parse into the same value, so equality and ordering
/// never depend on the wire representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct BlockHeight(u64);

impl BlockHeight {
    pub const ZERO: BlockHeight = BlockHeight(0);

    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    /// Parses a hex (`0x`-prefixed) or decimal representation.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            bail!("block height is empty");
        }

        let value = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
            Some(digits) => {
                if digits.is_empty() {
                    bail!("hex block height {raw:?} has no digits");
                }
                u64::from_str_radix(digits, 16)
                    .with_context(|| format!("invalid hex block height {raw:?}"))?
            }
            None => raw
                .parse::<u64>()
                .with_context(|| format!("invalid decimal block height {raw:?}"))?,
        };

        Ok(Self(value))
    }

    /// Hex quantity encoding used in JSON-RPC requests.
    pub fn to_quantity(self) -> String {
        format!("{:#x}", self.0)
    }

    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    pub fn saturating_sub(self, delta: u64) -> Self {
        Self(self.0.saturating_sub(delta))
    }

    /// Inclusive ascending range `start..=end`; empty when `start > end`.
    pub fn range_inclusive(start: Self, end: Self) -> impl Iterator<Item = BlockHeight> {
        (start.0..=end.0).map(BlockHeight)
    }
}

impl From<u64> for BlockHeight {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl FromStr for BlockHeight {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for BlockHeight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for BlockHeight {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.0)
    }
}

impl<'de> Deserialize<'de> for BlockHeight {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(value) => Ok(Self(value)),
            Raw::Text(text) => Self::parse(&text).map_err(serde::de::Error::custom),
        }
    }
}
