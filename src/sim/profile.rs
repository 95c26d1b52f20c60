//! Seeded generation and consumption profiles by time of day.

use rand::{Rng, SeedableRng, rngs::StdRng};

/// Bounds on the cloud multiplier applied to clear-sky output.
const CLOUD_MIN: f64 = 0.1;
const CLOUD_MAX: f64 = 1.1;

/// Gaussian noise via the Box-Muller transform.
///
/// # Arguments
///
/// * `rng` - Random number generator
/// * `std_dev` - Standard deviation of the noise (0 or less yields 0)
pub fn gaussian_noise(rng: &mut StdRng, std_dev: f64) -> f64 {
    if std_dev <= 0.0 {
        return 0.0;
    }
    let u1: f64 = rng.random::<f64>().clamp(1e-9, 1.0);
    let u2: f64 = rng.random::<f64>();
    let z0 = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
    z0 * std_dev
}

/// Half-sine daylight fraction in `[0, 1]` for a fractional UTC hour.
pub fn daylight_frac(hour: f64, sunrise: f64, sunset: f64) -> f64 {
    if hour <= sunrise || hour >= sunset {
        return 0.0;
    }
    let x = (hour - sunrise) / (sunset - sunrise);
    (std::f64::consts::PI * x).sin().max(0.0)
}

/// PV output with temporally correlated cloud cover.
///
/// The clear-sky curve is a half sine between sunrise and sunset. A cloud
/// multiplier follows a mean-reverting AR(1) process around 1.0, so cloudy
/// spells persist across ticks instead of flickering.
#[derive(Debug, Clone)]
pub struct SolarProfile {
    pub peak_watts: f64,
    pub sunrise_hour: f64,
    pub sunset_hour: f64,
    /// Persistence of the cloud multiplier (0.0-1.0).
    pub alpha: f64,
    pub cloud_noise_std: f64,
    multiplier: f64,
    rng: StdRng,
}

impl SolarProfile {
    pub fn new(
        peak_watts: f64,
        sunrise_hour: f64,
        sunset_hour: f64,
        alpha: f64,
        cloud_noise_std: f64,
        seed: u64,
    ) -> Self {
        Self {
            peak_watts: peak_watts.max(0.0),
            sunrise_hour,
            sunset_hour,
            alpha: alpha.clamp(0.0, 1.0),
            cloud_noise_std: cloud_noise_std.max(0.0),
            multiplier: 1.0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Generation at `hour` (W). Advances the cloud process by one step.
    pub fn watts(&mut self, hour: f64) -> f64 {
        let epsilon = gaussian_noise(&mut self.rng, self.cloud_noise_std);
        self.multiplier = (1.0 + self.alpha * (self.multiplier - 1.0) + epsilon)
            .clamp(CLOUD_MIN, CLOUD_MAX);

        let frac = daylight_frac(hour, self.sunrise_hour, self.sunset_hour);
        (self.peak_watts * frac * self.multiplier).max(0.0)
    }
}

/// House consumption: a daily sinusoid plus noise, never negative.
#[derive(Debug, Clone)]
pub struct HouseProfile {
    pub base_watts: f64,
    pub amp_watts: f64,
    pub noise_std: f64,
    rng: StdRng,
}

impl HouseProfile {
    pub fn new(base_watts: f64, amp_watts: f64, noise_std: f64, seed: u64) -> Self {
        Self {
            base_watts,
            amp_watts,
            noise_std,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Consumption at `hour` (W). Peaks in the early evening.
    pub fn watts(&mut self, hour: f64) -> f64 {
        let angle = 2.0 * std::f64::consts::PI * (hour - 12.0) / 24.0;
        let noise = gaussian_noise(&mut self.rng, self.noise_std);
        (self.base_watts + self.amp_watts * angle.sin() + noise).max(0.0)
    }
}
