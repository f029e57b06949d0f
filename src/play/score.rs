//! Lexicographic trigger scores.

use std::cmp::Ordering;
use std::ops::{Index, IndexMut};

/// Score components, most significant first. A difference in an earlier
/// level always outweighs any difference in a later one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScoreLevel {
    /// Negative when the incumbent is protected against this candidate.
    Interrupts,
    /// Idle beats released beats sustaining.
    Playing,
    PlayableRange,
    /// How long the incumbent has sounded, in rows.
    NoteAge,
    Priority,
    RemainingDuration,
    ToneOverlap,
    NoteHeight,
    Velocity,
}

impl ScoreLevel {
    pub const COUNT: usize = 9;

    pub const ALL: [ScoreLevel; ScoreLevel::COUNT] = [
        ScoreLevel::Interrupts,
        ScoreLevel::Playing,
        ScoreLevel::PlayableRange,
        ScoreLevel::NoteAge,
        ScoreLevel::Priority,
        ScoreLevel::RemainingDuration,
        ScoreLevel::ToneOverlap,
        ScoreLevel::NoteHeight,
        ScoreLevel::Velocity,
    ];
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScoreVector([f64; ScoreLevel::COUNT]);

impl ScoreVector {
    pub const ZERO: ScoreVector = ScoreVector([0.0; ScoreLevel::COUNT]);

    pub fn with(mut self, level: ScoreLevel, value: f64) -> Self {
        self[level] = value;
        self
    }

    /// Component-wise `self - other`.
    pub fn difference(&self, other: &ScoreVector) -> ScoreVector {
        let mut result = ScoreVector::ZERO;
        for level in ScoreLevel::ALL {
            result[level] = self[level] - other[level];
        }
        result
    }

    /// Lexicographic comparison: the first unequal component decides.
    pub fn compare(&self, other: &ScoreVector) -> Ordering {
        self.0
            .iter()
            .zip(other.0.iter())
            .find(|(a, b)| a != b)
            .and_then(|(a, b)| a.partial_cmp(b))
            .unwrap_or(Ordering::Equal)
    }

    pub fn is_better_than(&self, other: &ScoreVector) -> bool {
        self.compare(other) == Ordering::Greater
    }
}

impl Index<ScoreLevel> for ScoreVector {
    type Output = f64;

    fn index(&self, level: ScoreLevel) -> &f64 {
        &self.0[level as usize]
    }
}

impl IndexMut<ScoreLevel> for ScoreVector {
    fn index_mut(&mut self, level: ScoreLevel) -> &mut f64 {
        &mut self.0[level as usize]
    }
}

impl PartialOrd for ScoreVector {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.compare(other))
    }
}
