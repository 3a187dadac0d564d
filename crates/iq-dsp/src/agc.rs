//! Output gain control
//!
//! Three mutually exclusive profiles. DX and Local track the RMS envelope
//! with slow and fast loops; Digital scans for the stream peak, locks a
//! gain, and thereafter only ratchets down on clipping and creeps back up
//! after a hang period.

use num_complex::Complex;

use iq_core::config::AgcProfile;
use iq_core::tunables::{
    AGC_DIGITAL_HANG_SECONDS, AGC_DIGITAL_PEAK_SEED, AGC_DIGITAL_RECOVERY_PER_BLOCK,
    AGC_DIGITAL_SCAN_SECONDS,
};

/// RMS targets for the tracking profiles.
const AGC_RMS_TARGET: f32 = 0.5;
/// Normalized loop bandwidth, DX profile.
const AGC_DX_BANDWIDTH: f32 = 1e-4;
/// Normalized loop bandwidth, Local profile.
const AGC_LOCAL_BANDWIDTH: f32 = 1e-2;
/// Peak target for the Digital profile.
const AGC_DIGITAL_TARGET: f32 = 0.9;
/// Gain ceiling that keeps near-silence from exploding.
const AGC_MAX_GAIN: f32 = 1e5;

/// Output AGC in one of its profiles.
pub enum Agc {
    Rms(RmsAgc),
    Digital(DigitalAgc),
}

impl Agc {
    /// Build the AGC for a profile, or `None` when it is off.
    pub fn new(profile: AgcProfile, output_rate: f64) -> Option<Self> {
        match profile {
            AgcProfile::Off => None,
            AgcProfile::Dx => Some(Agc::Rms(RmsAgc::new(AGC_DX_BANDWIDTH))),
            AgcProfile::Local => Some(Agc::Rms(RmsAgc::new(AGC_LOCAL_BANDWIDTH))),
            AgcProfile::Digital => Some(Agc::Digital(DigitalAgc::new(output_rate))),
        }
    }

    pub fn process(&mut self, data: &mut [Complex<f32>]) {
        match self {
            Agc::Rms(agc) => agc.process(data),
            Agc::Digital(agc) => agc.process(data),
        }
    }

    pub fn reset(&mut self) {
        match self {
            Agc::Rms(agc) => agc.reset(),
            Agc::Digital(agc) => agc.reset(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RMS TRACKING PROFILES
// ═══════════════════════════════════════════════════════════════════════════════

/// Classic complex AGC: one-pole mean-square tracker driving the gain
/// toward a fixed RMS target.
pub struct RmsAgc {
    bandwidth: f32,
    mean_square: f32,
}

impl RmsAgc {
    fn new(bandwidth: f32) -> Self {
        Self {
            bandwidth,
            mean_square: 0.0,
        }
    }

    fn process(&mut self, data: &mut [Complex<f32>]) {
        let bw = self.bandwidth;
        let mut ms = self.mean_square;
        for sample in data.iter_mut() {
            ms += bw * (sample.norm_sqr() - ms);
            let gain = (AGC_RMS_TARGET / ms.max(1e-12).sqrt()).min(AGC_MAX_GAIN);
            *sample *= gain;
        }
        self.mean_square = ms;
    }

    fn reset(&mut self) {
        self.mean_square = 0.0;
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DIGITAL (PEAK-LOCK) PROFILE
// ═══════════════════════════════════════════════════════════════════════════════

/// Peak-locked AGC for digital modes: scan, lock, then clip-ratchet down
/// and hang-timed recovery up.
pub struct DigitalAgc {
    scan_samples: u64,
    hang_samples: u64,
    samples_seen: u64,
    peak_memory: f32,
    locked: bool,
    gain: f32,
    below_target_samples: u64,
}

impl DigitalAgc {
    fn new(output_rate: f64) -> Self {
        Self {
            scan_samples: (AGC_DIGITAL_SCAN_SECONDS * output_rate) as u64,
            hang_samples: (AGC_DIGITAL_HANG_SECONDS * output_rate) as u64,
            samples_seen: 0,
            peak_memory: AGC_DIGITAL_PEAK_SEED,
            locked: false,
            gain: AGC_DIGITAL_TARGET / AGC_DIGITAL_PEAK_SEED,
            below_target_samples: 0,
        }
    }

    fn process(&mut self, data: &mut [Complex<f32>]) {
        if data.is_empty() {
            return;
        }

        let block_peak = data.iter().map(|s| s.norm()).fold(0.0_f32, f32::max);

        if !self.locked {
            self.peak_memory = self.peak_memory.max(block_peak);
            // Running gain keeps the scan phase audible.
            self.gain = AGC_DIGITAL_TARGET / self.peak_memory;
            self.samples_seen += data.len() as u64;
            if self.samples_seen >= self.scan_samples {
                self.locked = true;
                log::debug!(
                    "digital AGC locked: peak {:.4}, gain {:.4}",
                    self.peak_memory,
                    self.gain
                );
            }
        } else if block_peak * self.gain > 1.0 {
            // Soft clip-ratchet: fast attack, immediate.
            self.gain = 0.99 / block_peak;
            self.below_target_samples = 0;
        } else if block_peak * self.gain <= 0.75 * AGC_DIGITAL_TARGET {
            self.below_target_samples += data.len() as u64;
            if self.below_target_samples > self.hang_samples {
                self.gain = (self.gain * AGC_DIGITAL_RECOVERY_PER_BLOCK).min(AGC_MAX_GAIN);
            }
        } else {
            self.below_target_samples = 0;
        }

        let gain = self.gain;
        for sample in data.iter_mut() {
            *sample *= gain;
        }
    }

    fn reset(&mut self) {
        self.samples_seen = 0;
        self.peak_memory = AGC_DIGITAL_PEAK_SEED;
        self.locked = false;
        self.gain = AGC_DIGITAL_TARGET / AGC_DIGITAL_PEAK_SEED;
        self.below_target_samples = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone_block(amplitude: f32, n: usize) -> Vec<Complex<f32>> {
        (0..n)
            .map(|i| {
                let theta = i as f32 * 0.1;
                Complex::new(theta.cos() * amplitude, theta.sin() * amplitude)
            })
            .collect()
    }

    #[test]
    fn test_rms_converges_to_target() {
        let mut agc = Agc::new(AgcProfile::Local, 48_000.0).unwrap();
        let mut last_rms = 0.0_f64;
        for _ in 0..50 {
            let mut block = tone_block(0.01, 4096);
            agc.process(&mut block);
            let power: f64 =
                block.iter().map(|s| s.norm_sqr() as f64).sum::<f64>() / block.len() as f64;
            last_rms = power.sqrt();
        }
        assert!(
            (last_rms - AGC_RMS_TARGET as f64).abs() < 0.05,
            "converged to {last_rms}"
        );
    }

    #[test]
    fn test_dx_slower_than_local() {
        let mut dx = Agc::new(AgcProfile::Dx, 48_000.0).unwrap();
        let mut local = Agc::new(AgcProfile::Local, 48_000.0).unwrap();

        let mut dx_block = tone_block(0.01, 4096);
        let mut local_block = tone_block(0.01, 4096);
        dx.process(&mut dx_block);
        local.process(&mut local_block);

        // After one block the fast loop has moved much closer to target.
        let rms = |b: &[Complex<f32>]| {
            (b[b.len() - 100..]
                .iter()
                .map(|s| s.norm_sqr() as f64)
                .sum::<f64>()
                / 100.0)
                .sqrt()
        };
        let local_err = (rms(&local_block) - 0.5).abs();
        let dx_err = (rms(&dx_block) - 0.5).abs();
        assert!(local_err < dx_err);
    }

    #[test]
    fn test_digital_scan_is_never_silent() {
        let rate = 10_000.0;
        let mut agc = Agc::new(AgcProfile::Digital, rate).unwrap();
        let mut block = tone_block(0.2, 1000);
        agc.process(&mut block);
        let peak = block.iter().map(|s| s.norm()).fold(0.0_f32, f32::max);
        // Running gain drives the scan-phase peak to the target.
        assert!((peak - AGC_DIGITAL_TARGET).abs() < 0.05, "scan peak {peak}");
    }

    #[test]
    fn test_digital_locks_after_scan() {
        let rate = 1000.0;
        let mut agc = DigitalAgc::new(rate);
        // 2 seconds at 1 kHz = 2000 samples.
        for _ in 0..4 {
            let mut block = tone_block(0.3, 500);
            agc.process(&mut block);
        }
        assert!(agc.locked);
        let locked_gain = agc.gain;

        // A quieter block must not change the gain before the hang expires.
        let mut quiet = tone_block(0.05, 100);
        agc.process(&mut quiet);
        assert_eq!(agc.gain, locked_gain);
    }

    #[test]
    fn test_digital_clip_ratchet() {
        let rate = 1000.0;
        let mut agc = DigitalAgc::new(rate);
        for _ in 0..4 {
            let mut block = tone_block(0.3, 500);
            agc.process(&mut block);
        }
        assert!(agc.locked);

        // A hot block forces the gain down to 0.99 / peak at once.
        let mut hot = tone_block(0.9, 64);
        let hot_peak = hot.iter().map(|s| s.norm()).fold(0.0_f32, f32::max);
        agc.process(&mut hot);
        assert!((agc.gain - 0.99 / hot_peak).abs() < 1e-6);

        let out_peak = hot.iter().map(|s| s.norm()).fold(0.0_f32, f32::max);
        assert!(out_peak <= 1.0);
    }

    #[test]
    fn test_digital_recovery_after_hang() {
        let rate = 1000.0;
        let mut agc = DigitalAgc::new(rate);
        for _ in 0..4 {
            let mut block = tone_block(0.3, 500);
            agc.process(&mut block);
        }
        let locked_gain = agc.gain;

        // Hang time is 1 s = 1000 samples; feed quiet blocks past it.
        for _ in 0..30 {
            let mut quiet = tone_block(0.01, 100);
            agc.process(&mut quiet);
        }
        assert!(agc.gain > locked_gain, "gain never recovered");
    }

    #[test]
    fn test_reset_returns_to_scan() {
        let rate = 1000.0;
        let mut agc = DigitalAgc::new(rate);
        for _ in 0..5 {
            let mut block = tone_block(0.3, 500);
            agc.process(&mut block);
        }
        assert!(agc.locked);
        agc.reset();
        assert!(!agc.locked);
        assert_eq!(agc.peak_memory, AGC_DIGITAL_PEAK_SEED);
    }
}
