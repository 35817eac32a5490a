//! Visual quality heuristic
//!
//! A size-based proxy, not image analysis. Any replacement must keep the
//! 0..=100 range and the "smaller or corrupted scores lower" ordering.

/// Below this size an image is likely a thumbnail or heavily compressed
pub const SMALL_IMAGE_BYTES: usize = 50 * 1024;

/// Above this size an image is likely unprocessed or padded
pub const LARGE_IMAGE_BYTES: usize = 5 * 1024 * 1024;

const BASE_SCORE: i32 = 100;
const SMALL_PENALTY: i32 = 30;
const LARGE_PENALTY: i32 = 10;
const CORRUPTION_PENALTY: i32 = 50;

/// Score in 0..=100
pub fn visual_quality_score(size_bytes: usize, integrity_valid: bool) -> u8 {
    let mut score = BASE_SCORE;

    if size_bytes < SMALL_IMAGE_BYTES {
        score -= SMALL_PENALTY;
    } else if size_bytes > LARGE_IMAGE_BYTES {
        score -= LARGE_PENALTY;
    }

    if !integrity_valid {
        score -= CORRUPTION_PENALTY;
    }

    score.clamp(0, 100) as u8
}
