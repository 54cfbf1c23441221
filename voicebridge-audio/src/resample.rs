//! Sample-rate and channel conversion for s16le PCM.

/// Resample mono s16le PCM from `input_rate` to `output_rate` using linear
/// interpolation. Equal rates return the input unchanged (byte-exact).
/// Source positions past the last sample clamp to it, so the output never
/// extrapolates.
#[must_use]
pub fn resample_mono(input: &[u8], input_rate: u32, output_rate: u32) -> Vec<u8> {
    if input_rate == output_rate {
        return input.to_vec();
    }

    let input_samples = input.len() / 2;
    if input_samples == 0 {
        return Vec::new();
    }

    let ratio = f64::from(output_rate) / f64::from(input_rate);
    let output_samples = (input_samples as f64 * ratio) as usize;

    let mut output = Vec::with_capacity(output_samples * 2);
    for i in 0..output_samples {
        let src_pos = i as f64 / ratio;
        let src_idx = src_pos as usize;
        let frac = src_pos - src_idx as f64;

        let idx1 = src_idx.min(input_samples - 1);
        let idx2 = (src_idx + 1).min(input_samples - 1);

        let s1 = f64::from(sample_at(input, idx1));
        let s2 = f64::from(sample_at(input, idx2));
        let sample = (s1 * (1.0 - frac) + s2 * frac) as i16;

        output.extend_from_slice(&sample.to_le_bytes());
    }

    output
}

/// Upmix mono s16le PCM to interleaved stereo by duplicating every sample
/// into both channels.
#[must_use]
pub fn mono_to_stereo(mono: &[u8]) -> Vec<u8> {
    let samples = mono.len() / 2;
    let mut stereo = Vec::with_capacity(samples * 4);

    for i in 0..samples {
        let pair = &mono[i * 2..i * 2 + 2];
        stereo.extend_from_slice(pair);
        stereo.extend_from_slice(pair);
    }

    stereo
}

fn sample_at(pcm: &[u8], idx: usize) -> i16 {
    i16::from_le_bytes([pcm[idx * 2], pcm[idx * 2 + 1]])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    fn samples(pcm: &[u8]) -> Vec<i16> {
        pcm.chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect()
    }

    #[test]
    fn equal_rates_is_identity() {
        let input = pcm(&[1, -2, 300, -400, 32767, -32768]);
        assert_eq!(resample_mono(&input, 48_000, 48_000), input);
    }

    #[test]
    fn upsample_output_length() {
        // 1 second at 22050 Hz becomes 1 second at 48 kHz.
        let input = pcm(&vec![100i16; 22_050]);
        let out = resample_mono(&input, 22_050, 48_000);
        assert_eq!(out.len() / 2, (22_050.0 * (48_000.0 / 22_050.0)) as usize);
    }

    #[test]
    fn upsample_constant_signal_stays_constant() {
        // Truncation after interpolation may land one LSB low, never more.
        let input = pcm(&vec![1000i16; 441]);
        let out = resample_mono(&input, 44_100, 48_000);
        assert!(samples(&out).iter().all(|&s| (999..=1000).contains(&s)));
    }

    #[test]
    fn downsample_interpolates_between_neighbours() {
        let input = pcm(&[0, 1000]);
        let out = samples(&resample_mono(&input, 48_000, 24_000));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0], 0);
    }

    #[test]
    fn boundary_clamps_to_last_sample() {
        // The final interpolation points land past the last input sample and
        // must clamp instead of reading out of range.
        let input = pcm(&[0, 0, 0, 500]);
        let out = samples(&resample_mono(&input, 16_000, 48_000));
        assert!((499..=500).contains(out.last().unwrap()));
    }

    #[test]
    fn empty_input_gives_empty_output() {
        assert!(resample_mono(&[], 22_050, 48_000).is_empty());
    }

    #[test]
    fn mono_to_stereo_duplicates_each_sample() {
        let input = pcm(&[7, -7]);
        let out = samples(&mono_to_stereo(&input));
        assert_eq!(out, vec![7, 7, -7, -7]);
    }

    #[test]
    fn average_of_stereo_channels_recovers_mono() {
        let input = pcm(&[123, -456, 789]);
        let stereo = samples(&mono_to_stereo(&input));
        let recovered: Vec<i16> = stereo
            .chunks_exact(2)
            .map(|lr| ((i32::from(lr[0]) + i32::from(lr[1])) / 2) as i16)
            .collect();
        assert_eq!(recovered, samples(&input));
    }
}
