//! Sample-format helpers shared by capture and playback.

/// Average interleaved frames down to one channel.
pub(crate) fn downmix(interleaved: &[f32], channels: u16) -> Vec<f32> {
    match usize::from(channels) {
        0 | 1 => interleaved.to_vec(),
        n => interleaved
            .chunks_exact(n)
            .map(|frame| frame.iter().sum::<f32>() / n as f32)
            .collect(),
    }
}

/// Linear-interpolation rate conversion.
///
/// Speech sits well below the Nyquist limit of every rate involved here
/// (16 kHz detector, 24 to 48 kHz devices and provider mp3), so no
/// anti-alias filter is applied.
pub(crate) fn resample(samples: &[f32], from_hz: u32, to_hz: u32) -> Vec<f32> {
    if from_hz == to_hz || from_hz == 0 || to_hz == 0 {
        return samples.to_vec();
    }
    let Some(&last) = samples.last() else {
        return Vec::new();
    };
    let step = f64::from(from_hz) / f64::from(to_hz);
    let len = (samples.len() as f64 / step) as usize;
    (0..len)
        .map(|i| {
            let pos = i as f64 * step;
            let left = pos.floor() as usize;
            let t = (pos - left as f64) as f32;
            let a = samples.get(left).copied().unwrap_or(last);
            let b = samples.get(left + 1).copied().unwrap_or(a);
            a + (b - a) * t
        })
        .collect()
}
