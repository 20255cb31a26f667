//! Per-source EQ chain: low-shelf, peaking and high-shelf biquads.
//!
//! One chain per scheduled offline source, carrying gain/EQ state across
//! an entire rendered segment. The biquad coefficient formulas follow
//! the standard RBJ Audio EQ Cookbook, the reference most DSP code in
//! this space implements against.

/// A single biquad filter stage, carrying its own state so a source's
/// chain stays continuous across an entire rendered segment (filter
/// state is never reset mid-source).
#[derive(Debug, Clone, Copy, Default)]
pub struct Biquad {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
    z1: f32,
    z2: f32,
}

impl Biquad {
    /// Identity filter (no-op), used before the first coefficient update.
    pub fn identity() -> Self {
        Self {
            b0: 1.0,
            ..Default::default()
        }
    }

    pub fn process(&mut self, x: f32) -> f32 {
        let y = self.b0 * x + self.z1;
        self.z1 = self.b1 * x - self.a1 * y + self.z2;
        self.z2 = self.b2 * x - self.a2 * y;
        y
    }

    fn set_coeffs(&mut self, b0: f64, b1: f64, b2: f64, a0: f64, a1: f64, a2: f64) {
        self.b0 = (b0 / a0) as f32;
        self.b1 = (b1 / a0) as f32;
        self.b2 = (b2 / a0) as f32;
        self.a1 = (a1 / a0) as f32;
        self.a2 = (a2 / a0) as f32;
    }

    /// RBJ low-shelf: boosts/cuts everything below `hz` by `gain_db`.
    pub fn low_shelf(&mut self, sample_rate: f64, hz: f64, gain_db: f64) {
        if gain_db.abs() < 1e-6 {
            *self = Self::identity();
            return;
        }
        let a = 10f64.powf(gain_db / 40.0);
        let w0 = 2.0 * std::f64::consts::PI * hz / sample_rate;
        let alpha = w0.sin() / 2.0 * ((a + 1.0 / a) * (1.0 / 0.707 - 1.0) + 2.0).sqrt();
        let cos_w0 = w0.cos();
        let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;

        let b0 = a * ((a + 1.0) - (a - 1.0) * cos_w0 + two_sqrt_a_alpha);
        let b1 = 2.0 * a * ((a - 1.0) - (a + 1.0) * cos_w0);
        let b2 = a * ((a + 1.0) - (a - 1.0) * cos_w0 - two_sqrt_a_alpha);
        let a0 = (a + 1.0) + (a - 1.0) * cos_w0 + two_sqrt_a_alpha;
        let a1 = -2.0 * ((a - 1.0) + (a + 1.0) * cos_w0);
        let a2 = (a + 1.0) + (a - 1.0) * cos_w0 - two_sqrt_a_alpha;

        self.set_coeffs(b0, b1, b2, a0, a1, a2);
    }

    /// RBJ high-shelf, mirroring `low_shelf`.
    pub fn high_shelf(&mut self, sample_rate: f64, hz: f64, gain_db: f64) {
        if gain_db.abs() < 1e-6 {
            *self = Self::identity();
            return;
        }
        let a = 10f64.powf(gain_db / 40.0);
        let w0 = 2.0 * std::f64::consts::PI * hz / sample_rate;
        let alpha = w0.sin() / 2.0 * ((a + 1.0 / a) * (1.0 / 0.707 - 1.0) + 2.0).sqrt();
        let cos_w0 = w0.cos();
        let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;

        let b0 = a * ((a + 1.0) + (a - 1.0) * cos_w0 + two_sqrt_a_alpha);
        let b1 = -2.0 * a * ((a - 1.0) + (a + 1.0) * cos_w0);
        let b2 = a * ((a + 1.0) + (a - 1.0) * cos_w0 - two_sqrt_a_alpha);
        let a0 = (a + 1.0) - (a - 1.0) * cos_w0 + two_sqrt_a_alpha;
        let a1 = 2.0 * ((a - 1.0) - (a + 1.0) * cos_w0);
        let a2 = (a + 1.0) - (a - 1.0) * cos_w0 - two_sqrt_a_alpha;

        self.set_coeffs(b0, b1, b2, a0, a1, a2);
    }

    /// RBJ peaking EQ at `hz` with quality `q` and `gain_db`.
    pub fn peaking(&mut self, sample_rate: f64, hz: f64, q: f64, gain_db: f64) {
        if gain_db.abs() < 1e-6 {
            *self = Self::identity();
            return;
        }
        let a = 10f64.powf(gain_db / 40.0);
        let w0 = 2.0 * std::f64::consts::PI * hz / sample_rate;
        let alpha = w0.sin() / (2.0 * q);
        let cos_w0 = w0.cos();

        let b0 = 1.0 + alpha * a;
        let b1 = -2.0 * cos_w0;
        let b2 = 1.0 - alpha * a;
        let a0 = 1.0 + alpha / a;
        let a1 = -2.0 * cos_w0;
        let a2 = 1.0 - alpha / a;

        self.set_coeffs(b0, b1, b2, a0, a1, a2);
    }
}

/// The fixed three-stage EQ every source passes through, per §4.8:
/// `gain -> lowShelf(320 Hz) -> peaking(1 kHz, Q=0.5) -> highShelf(3.2 kHz)
/// -> outputGain`. Only the low-shelf stage is animated by the fade
/// choreography; peaking and high-shelf are present in the chain's
/// topology but assigned no automation here, so they stay neutral
/// (0 dB, i.e. identity) — a real mastering pass would drive them from
/// track loudness/brightness analysis.
pub struct SourceChain {
    low_shelf: Biquad,
    peaking: Biquad,
    high_shelf: Biquad,
}

impl SourceChain {
    pub fn new() -> Self {
        Self {
            low_shelf: Biquad::identity(),
            peaking: Biquad::identity(),
            high_shelf: Biquad::identity(),
        }
    }

    pub fn set_low_shelf_db(&mut self, sample_rate: f64, hz: f64, gain_db: f64) {
        self.low_shelf.low_shelf(sample_rate, hz, gain_db);
    }

    pub fn process(&mut self, x: f32) -> f32 {
        let x = self.low_shelf.process(x);
        let x = self.peaking.process(x);
        self.high_shelf.process(x)
    }
}

impl Default for SourceChain {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_db_shelf_is_identity() {
        let mut chain = SourceChain::new();
        chain.set_low_shelf_db(44_100.0, 320.0, 0.0);
        let mut samples = Vec::new();
        for i in 0..32 {
            samples.push(chain.process((i as f32 * 0.1).sin()));
        }
        // Identity stage should reproduce the input unchanged.
        for (i, &s) in samples.iter().enumerate() {
            assert!((s - (i as f32 * 0.1).sin()).abs() < 1e-6);
        }
    }

    #[test]
    fn low_shelf_boost_increases_low_frequency_energy() {
        let sample_rate = 44_100.0;
        let mut flat = Biquad::identity();
        let mut boosted = Biquad::default();
        boosted.low_shelf(sample_rate, 320.0, 12.0);

        let input: Vec<f32> = (0..4096)
            .map(|i| (2.0 * std::f64::consts::PI * 100.0 * i as f64 / sample_rate).sin() as f32)
            .collect();

        let flat_energy: f32 = input.iter().map(|&x| flat.process(x).powi(2)).sum();
        let boosted_energy: f32 = input.iter().map(|&x| boosted.process(x).powi(2)).sum();
        assert!(boosted_energy > flat_energy);
    }
}
