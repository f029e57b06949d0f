//! Static audio-similarity coefficients between chip waveforms.

use crate::voice::{ChannelFamily, DutyMode};

/// Waveforms with a row in the similarity matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Waveform {
    Pulse12,
    Pulse25,
    Pulse50,
    Triangle,
    NoiseNormal,
    NoiseLoop,
    Sample,
    Sawtooth,
}

// Rows and columns follow `Waveform` declaration order.
const SIMILARITY: [[f64; 8]; 8] = [
    [1.00, 0.95, 0.85, 0.55, 0.0, 0.0, 0.0, 0.80],
    [0.95, 1.00, 0.90, 0.60, 0.0, 0.0, 0.0, 0.75],
    [0.85, 0.90, 1.00, 0.65, 0.0, 0.0, 0.0, 0.70],
    [0.55, 0.60, 0.65, 1.00, 0.0, 0.0, 0.0, 0.50],
    [0.0, 0.0, 0.0, 0.0, 1.0, 0.5, 0.0, 0.0],
    [0.0, 0.0, 0.0, 0.0, 0.5, 1.0, 0.0, 0.0],
    [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0],
    [0.80, 0.75, 0.70, 0.50, 0.0, 0.0, 0.0, 1.00],
];

fn waveform(family: ChannelFamily, duty: DutyMode) -> Option<Waveform> {
    match family {
        ChannelFamily::Pulse => match duty {
            DutyMode::Pulse12 => Some(Waveform::Pulse12),
            DutyMode::Pulse25 => Some(Waveform::Pulse25),
            DutyMode::Pulse50 => Some(Waveform::Pulse50),
            _ => None,
        },
        ChannelFamily::Triangle => Some(Waveform::Triangle),
        ChannelFamily::Noise if duty == DutyMode::NoiseNormal => Some(Waveform::NoiseNormal),
        ChannelFamily::Noise => Some(Waveform::NoiseLoop),
        ChannelFamily::Sample => Some(Waveform::Sample),
        ChannelFamily::Sawtooth => Some(Waveform::Sawtooth),
    }
}

/// How close `chosen` sounds to `ideal`, in `[0, 1]`.
///
/// A pulse without a concrete duty ratio has no matrix entry; it only
/// matches an identical (family, duty) pair.
pub fn similarity(ideal: (ChannelFamily, DutyMode), chosen: (ChannelFamily, DutyMode)) -> f64 {
    match (waveform(ideal.0, ideal.1), waveform(chosen.0, chosen.1)) {
        (Some(a), Some(b)) => SIMILARITY[a as usize][b as usize],
        _ if ideal == chosen => 1.0,
        _ => 0.0,
    }
}
