//! Core type definitions for crop provenance tracking
//!
//! Identifiers, the fixed seven-stage production table, per-stage evidence
//! counts and content hashes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub use crate::crypto::Hash256;

/// Number of production stages a batch must document
pub const STAGE_COUNT: usize = 7;

/// Minimum independently verified images per stage before a batch can be certified
pub const MIN_IMAGES_PER_STAGE: u32 = 2;

/// Serde module for serializing Hash256 as hex strings
pub mod hash256_hex {
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("expected 32 bytes for Hash256"))
    }
}

/// SHA-256 fingerprint of raw image bytes.
///
/// The natural deduplication key: byte-identical uploads always resolve to the
/// same hash, and the ledger writes at most one record per hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentHash(#[serde(with = "hash256_hex")] pub Hash256);

impl ContentHash {
    pub fn from_bytes(bytes: Hash256) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &Hash256 {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Error returned when a string is not a 64-character hex digest
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid content hash: {0}")]
pub struct InvalidContentHash(pub String);

impl FromStr for ContentHash {
    type Err = InvalidContentHash;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let hex_str = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        let bytes = hex::decode(hex_str).map_err(|_| InvalidContentHash(s.to_string()))?;
        let arr: Hash256 = bytes
            .try_into()
            .map_err(|_| InvalidContentHash(s.to_string()))?;
        Ok(Self(arr))
    }
}

/// Crop batch identifier, assigned by the web tier when a batch is created
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(pub String);

impl BatchId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for BatchId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for BatchId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The seven production stages, in their fixed order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    LandPreparation,
    Sowing,
    Irrigation,
    Fertilization,
    PestControl,
    Harvesting,
    Packaging,
}

impl Stage {
    pub const ALL: [Stage; STAGE_COUNT] = [
        Stage::LandPreparation,
        Stage::Sowing,
        Stage::Irrigation,
        Stage::Fertilization,
        Stage::PestControl,
        Stage::Harvesting,
        Stage::Packaging,
    ];

    /// Human-facing stage name
    pub fn name(&self) -> &'static str {
        match self {
            Stage::LandPreparation => "Land Preparation",
            Stage::Sowing => "Sowing",
            Stage::Irrigation => "Irrigation",
            Stage::Fertilization => "Fertilization",
            Stage::PestControl => "Pest Control",
            Stage::Harvesting => "Harvesting",
            Stage::Packaging => "Packaging",
        }
    }

    pub fn number(&self) -> StageNumber {
        StageNumber(*self as u8 + 1)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Stage number outside 1..=7
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("stage number {0} is outside 1..=7")]
pub struct InvalidStageNumber(pub i64);

/// Validated stage number in 1..=7
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct StageNumber(u8);

impl StageNumber {
    pub fn new(n: u8) -> Result<Self, InvalidStageNumber> {
        if (1..=STAGE_COUNT as u8).contains(&n) {
            Ok(Self(n))
        } else {
            Err(InvalidStageNumber(n as i64))
        }
    }

    /// Parse a stage number from an untyped request field
    pub fn from_i64(n: i64) -> Result<Self, InvalidStageNumber> {
        u8::try_from(n)
            .map_err(|_| InvalidStageNumber(n))
            .and_then(Self::new)
    }

    pub fn get(&self) -> u8 {
        self.0
    }

    pub fn stage(&self) -> Stage {
        Stage::ALL[self.index()]
    }

    fn index(&self) -> usize {
        (self.0 - 1) as usize
    }

    /// All stage numbers, 1 through 7
    pub fn all() -> impl Iterator<Item = StageNumber> {
        (1..=STAGE_COUNT as u8).map(StageNumber)
    }
}

impl TryFrom<u8> for StageNumber {
    type Error = InvalidStageNumber;

    fn try_from(n: u8) -> Result<Self, Self::Error> {
        Self::new(n)
    }
}

impl From<StageNumber> for u8 {
    fn from(n: StageNumber) -> u8 {
        n.0
    }
}

impl fmt::Display for StageNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Verified image count per stage; all seven stages are always present.
///
/// Serialized as `{"1": n, ..., "7": n}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(into = "BTreeMap<u8, u32>", try_from = "BTreeMap<u8, u32>")]
pub struct StageCounts([u32; STAGE_COUNT]);

impl StageCounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_array(counts: [u32; STAGE_COUNT]) -> Self {
        Self(counts)
    }

    pub fn get(&self, stage: StageNumber) -> u32 {
        self.0[stage.index()]
    }

    pub fn increment(&mut self, stage: StageNumber) -> u32 {
        let slot = &mut self.0[stage.index()];
        *slot = slot.saturating_add(1);
        *slot
    }

    pub fn total(&self) -> u64 {
        self.0.iter().map(|c| *c as u64).sum()
    }

    /// True when every stage has at least `floor` verified images
    pub fn all_at_least(&self, floor: u32) -> bool {
        self.0.iter().all(|c| *c >= floor)
    }

    /// Stages still below `floor`, in stage order
    pub fn stages_below(&self, floor: u32) -> Vec<StageNumber> {
        StageNumber::all().filter(|s| self.get(*s) < floor).collect()
    }

    pub fn as_array(&self) -> [u32; STAGE_COUNT] {
        self.0
    }
}

impl From<StageCounts> for BTreeMap<u8, u32> {
    fn from(counts: StageCounts) -> Self {
        StageNumber::all().map(|s| (s.get(), counts.get(s))).collect()
    }
}

impl TryFrom<BTreeMap<u8, u32>> for StageCounts {
    type Error = InvalidStageNumber;

    fn try_from(map: BTreeMap<u8, u32>) -> Result<Self, Self::Error> {
        let mut counts = StageCounts::new();
        for (stage, count) in map {
            let stage = StageNumber::new(stage)?;
            counts.0[stage.index()] = count;
        }
        Ok(counts)
    }
}

/// Image container formats accepted at ingestion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Jpeg,
    Png,
    Webp,
}

impl ImageFormat {
    pub const ALL: [ImageFormat; 3] = [ImageFormat::Jpeg, ImageFormat::Png, ImageFormat::Webp];

    /// Parse a declared MIME type (`image/jpeg`, `image/jpg`, `image/png`, `image/webp`)
    pub fn from_mime(mime: &str) -> Option<Self> {
        let essence = mime.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
        match essence.as_str() {
            "image/jpeg" | "image/jpg" => Some(ImageFormat::Jpeg),
            "image/png" => Some(ImageFormat::Png),
            "image/webp" => Some(ImageFormat::Webp),
            _ => None,
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Png => "image/png",
            ImageFormat::Webp => "image/webp",
        }
    }

    /// Leading magic bytes of the container
    pub fn signature(&self) -> &'static [u8] {
        match self {
            ImageFormat::Jpeg => &[0xFF, 0xD8, 0xFF],
            ImageFormat::Png => &[0x89, 0x50, 0x4E, 0x47],
            ImageFormat::Webp => &[0x52, 0x49, 0x46, 0x46],
        }
    }

    /// Identify the container from its leading bytes
    pub fn detect(content: &[u8]) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|format| content.starts_with(format.signature()))
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_table_is_fixed() {
        let names: Vec<_> = StageNumber::all().map(|s| s.stage().name()).collect();
        assert_eq!(
            names,
            vec![
                "Land Preparation",
                "Sowing",
                "Irrigation",
                "Fertilization",
                "Pest Control",
                "Harvesting",
                "Packaging"
            ]
        );
        assert_eq!(Stage::Packaging.number().get(), 7);
    }

    #[test]
    fn test_stage_number_bounds() {
        assert!(StageNumber::new(0).is_err());
        assert!(StageNumber::new(8).is_err());
        assert!(StageNumber::from_i64(-1).is_err());
        assert!(StageNumber::from_i64(300).is_err());
        assert_eq!(StageNumber::new(7).unwrap().get(), 7);
    }

    #[test]
    fn test_stage_counts_serialize_all_keys() {
        let mut counts = StageCounts::new();
        counts.increment(StageNumber::new(3).unwrap());

        let json = serde_json::to_value(counts).unwrap();
        assert_eq!(json.as_object().unwrap().len(), 7);
        assert_eq!(json["3"], 1);
        assert_eq!(json["7"], 0);

        let back: StageCounts = serde_json::from_value(json).unwrap();
        assert_eq!(back, counts);
    }

    #[test]
    fn test_content_hash_parse() {
        let hash = ContentHash([0xAB; 32]);
        let parsed: ContentHash = hash.to_hex().parse().unwrap();
        assert_eq!(parsed, hash);
        assert!("not-hex".parse::<ContentHash>().is_err());
        assert!("abcd".parse::<ContentHash>().is_err());
    }

    #[test]
    fn test_image_format_detection() {
        assert_eq!(ImageFormat::from_mime("image/JPG"), Some(ImageFormat::Jpeg));
        assert_eq!(ImageFormat::from_mime("image/png; q=1"), Some(ImageFormat::Png));
        assert_eq!(ImageFormat::from_mime("image/gif"), None);
        assert_eq!(ImageFormat::detect(&[0x89, 0x50, 0x4E, 0x47, 0x0D]), Some(ImageFormat::Png));
        assert_eq!(ImageFormat::detect(b"RIFF....WEBP"), Some(ImageFormat::Webp));
        assert_eq!(ImageFormat::detect(&[0x00, 0x01]), None);
    }
}
