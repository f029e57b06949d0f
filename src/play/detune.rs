//! Chip period math and collision-avoiding detune.
//!
//! Two voices playing the same frequency, or an exact octave apart, beat
//! against each other on real hardware. After a note is accepted its period
//! is nudged by the smallest integer step that clears every other sounding
//! voice, within a detune limit.

use crate::voice::PhysicalVoice;

/// NTSC 2A03 clock.
pub const CPU_CLOCK: f64 = 1_789_773.0;

/// Frequency of a (fractional) MIDI key in equal temperament, A4 = 440 Hz.
pub fn key_frequency(key: f64) -> f64 {
    440.0 * 2f64.powf((key - 69.0) / 12.0)
}

fn clock_divider(voice: PhysicalVoice) -> Option<f64> {
    match voice {
        PhysicalVoice::PulseA | PhysicalVoice::PulseB | PhysicalVoice::PulseC | PhysicalVoice::PulseD => Some(16.0),
        PhysicalVoice::Triangle => Some(32.0),
        PhysicalVoice::Sawtooth => Some(14.0),
        PhysicalVoice::Noise | PhysicalVoice::Sample => None,
    }
}

/// Timer period producing `frequency` on `voice`; `None` for unpitched voices.
pub fn period(voice: PhysicalVoice, frequency: f64) -> Option<f64> {
    clock_divider(voice).map(|divider| CPU_CLOCK / (divider * frequency) - 1.0)
}

pub fn period_frequency(voice: PhysicalVoice, period: f64) -> Option<f64> {
    clock_divider(voice).map(|divider| CPU_CLOCK / (divider * (period + 1.0)))
}

fn semitones_between(a: f64, b: f64) -> f64 {
    (12.0 * (a / b).log2()).abs()
}

fn collides(frequency: f64, others: &[f64], min_hz: f64) -> bool {
    others.iter().any(|&other| {
        (frequency - other).abs() < min_hz
            || (frequency - 2.0 * other).abs() < min_hz
            || (frequency - other / 2.0).abs() < min_hz
    })
}

/// Smallest period offset (tried as 0, +1, -1, +2, ...) that moves
/// `frequency` clear of `others` in unison and at the octaves. Gives up and
/// returns 0 once both directions would detune by more than `max_semitones`,
/// or once the offset exceeds the base period.
pub fn resolve(voice: PhysicalVoice, frequency: f64, others: &[f64], max_semitones: f64, min_hz: f64) -> i32 {
    let Some(base) = period(voice, frequency) else {
        return 0;
    };
    let clear = |delta: i32| {
        let shifted = base + f64::from(delta);
        if shifted < 0.0 {
            return None;
        }
        let shifted_frequency = period_frequency(voice, shifted)?;
        if semitones_between(shifted_frequency, frequency) > max_semitones {
            return None;
        }
        Some(!collides(shifted_frequency, others, min_hz))
    };

    if clear(0) != Some(false) {
        return 0;
    }
    let limit = base.ceil().min(f64::from(i32::MAX - 1)) as i32 + 1;
    for step in 1..=limit {
        let up = clear(step);
        if up == Some(true) {
            return step;
        }
        let down = clear(-step);
        if down == Some(true) {
            return -step;
        }
        if up.is_none() && down.is_none() {
            break;
        }
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_frequency() {
        assert!((key_frequency(69.0) - 440.0).abs() < 1e-9);
        assert!((key_frequency(81.0) - 880.0).abs() < 1e-9);
        assert!((key_frequency(60.0) - 261.6256).abs() < 1e-3);
    }

    #[test]
    fn test_period_round_trip_per_voice() {
        let a4 = key_frequency(69.0);
        let pulse = period(PhysicalVoice::PulseA, a4).unwrap();
        assert!((pulse - 253.23).abs() < 0.01, "pulse period was {pulse}");
        let triangle = period(PhysicalVoice::Triangle, a4).unwrap();
        assert!(triangle < pulse, "triangle divides by 32");
        assert!(period(PhysicalVoice::Noise, a4).is_none());
        let back = period_frequency(PhysicalVoice::Sawtooth, period(PhysicalVoice::Sawtooth, a4).unwrap()).unwrap();
        assert!((back - a4).abs() < 1e-9);
    }

    #[test]
    fn test_no_collision_keeps_pitch() {
        let a4 = key_frequency(69.0);
        assert_eq!(resolve(PhysicalVoice::PulseA, a4, &[key_frequency(72.0)], 0.125, 0.5), 0);
        assert_eq!(resolve(PhysicalVoice::Noise, a4, &[a4], 0.125, 0.5), 0);
    }

    #[test]
    fn test_unison_and_octave_are_pulled_apart() {
        let a4 = key_frequency(69.0);
        let delta = resolve(PhysicalVoice::PulseB, a4, &[a4], 0.125, 0.5);
        assert_eq!(delta, 1, "one period step clears a unison at A4");

        let octave = resolve(PhysicalVoice::PulseB, a4, &[a4 / 2.0], 0.125, 0.5);
        assert_ne!(octave, 0);
    }

    #[test]
    fn test_huge_limits_terminate() {
        let a4 = key_frequency(69.0);
        assert_eq!(resolve(PhysicalVoice::PulseA, a4, &[a4], 1000.0, 1e6), 0);
        assert_eq!(resolve(PhysicalVoice::Triangle, a4, &[a4], f64::INFINITY, f64::INFINITY), 0);
    }

    #[test]
    fn test_gives_up_beyond_detune_limit() {
        let a4 = key_frequency(69.0);
        // with a huge collision window no step within the limit is clear
        assert_eq!(resolve(PhysicalVoice::PulseA, a4, &[a4], 0.125, 100.0), 0);
        assert_eq!(resolve(PhysicalVoice::PulseA, a4, &[a4], 0.0, 0.5), 0);
    }
}
