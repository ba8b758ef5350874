//! Sampling controller for video jobs.
//!
//! Only every `frame_skip`-th frame is sent to the detector, which bounds
//! detector calls to roughly `target_rate` per second of video regardless of
//! the source frame rate.

/// Default number of evaluated frames per second of video.
pub const DEFAULT_TARGET_RATE: f64 = 10.0;

/// `max(1, round(original_fps / target_rate))`.
///
/// Degenerate inputs (non-finite or non-positive) evaluate every frame.
pub fn frame_skip(original_fps: f64, target_rate: f64) -> u32 {
    if !original_fps.is_finite()
        || !target_rate.is_finite()
        || original_fps <= 0.0
        || target_rate <= 0.0
    {
        return 1;
    }
    let skip = (original_fps / target_rate).round();
    if skip < 1.0 {
        1
    } else if skip >= u32::MAX as f64 {
        u32::MAX
    } else {
        skip as u32
    }
}

/// Sampling configuration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SamplingPolicy {
    pub target_rate: f64,
    /// Fixed skip that bypasses the rate computation.
    pub frame_skip: Option<u32>,
}

impl Default for SamplingPolicy {
    fn default() -> Self {
        Self {
            target_rate: DEFAULT_TARGET_RATE,
            frame_skip: None,
        }
    }
}

impl SamplingPolicy {
    pub fn sampler_for(&self, original_fps: f64) -> FrameSampler {
        let skip = match self.frame_skip {
            Some(skip) => skip.max(1),
            None => frame_skip(original_fps, self.target_rate),
        };
        FrameSampler { skip }
    }
}

/// Decides per frame index whether the detector runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameSampler {
    skip: u32,
}

impl FrameSampler {
    pub fn skip(&self) -> u32 {
        self.skip
    }

    pub fn should_evaluate(&self, index: u64) -> bool {
        index % u64::from(self.skip) == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_skip_matches_reference_rates() {
        assert_eq!(frame_skip(30.0, 10.0), 3);
        assert_eq!(frame_skip(24.0, 10.0), 2);
        assert_eq!(frame_skip(5.0, 10.0), 1);
        assert_eq!(frame_skip(60.0, 10.0), 6);
        assert_eq!(frame_skip(29.97, 10.0), 3);
    }

    #[test]
    fn degenerate_rates_evaluate_every_frame() {
        assert_eq!(frame_skip(0.0, 10.0), 1);
        assert_eq!(frame_skip(30.0, 0.0), 1);
        assert_eq!(frame_skip(f64::NAN, 10.0), 1);
        assert_eq!(frame_skip(f64::INFINITY, 10.0), 1);
    }

    #[test]
    fn sampler_selects_multiples_of_skip() {
        let sampler = SamplingPolicy::default().sampler_for(30.0);
        let picked: Vec<u64> = (0..10).filter(|&i| sampler.should_evaluate(i)).collect();
        assert_eq!(picked, vec![0, 3, 6, 9]);
    }

    #[test]
    fn override_wins_over_rate() {
        let policy = SamplingPolicy {
            target_rate: 10.0,
            frame_skip: Some(5),
        };
        assert_eq!(policy.sampler_for(30.0).skip(), 5);
        let zero = SamplingPolicy {
            target_rate: 10.0,
            frame_skip: Some(0),
        };
        assert_eq!(zero.sampler_for(30.0).skip(), 1);
    }
}
