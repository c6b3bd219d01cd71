//! Colour pair proposals for new pixels.
//!
//! Two independent random base colours are each widened into their analogous
//! hues (neighbours on the colour wheel) and one variant of each is picked.

use px_types::{ColorHex, ColorPair};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;

/// Size of the analogous set, the base colour included.
pub const ANALOGOUS_RESULTS: usize = 6;
/// Number of slices the colour wheel is cut into; one step is `360 / slices` degrees.
pub const ANALOGOUS_SLICES: u32 = 30;

/// RGB with every channel as a ratio in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rgb {
    pub r: f64,
    pub g: f64,
    pub b: f64,
}

/// HSL with hue in degrees `0.0..360.0`, saturation and lightness as ratios.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hsl {
    pub h: f64,
    pub s: f64,
    pub l: f64,
}

impl Rgb {
    pub fn new(r: f64, g: f64, b: f64) -> Self {
        Self {
            r: r.clamp(0.0, 1.0),
            g: g.clamp(0.0, 1.0),
            b: b.clamp(0.0, 1.0),
        }
    }

    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self::new(rng.r#gen(), rng.r#gen(), rng.r#gen())
    }

    pub fn to_hsl(self) -> Hsl {
        let Self { r, g, b } = self;
        let max = r.max(g).max(b);
        let min = r.min(g).min(b);
        let l = (max + min) / 2.0;

        if max == min {
            return Hsl { h: 0.0, s: 0.0, l };
        }

        let d = max - min;
        let s = if l > 0.5 {
            d / (2.0 - max - min)
        } else {
            d / (max + min)
        };
        let h = if max == r {
            (g - b) / d + if g < b { 6.0 } else { 0.0 }
        } else if max == g {
            (b - r) / d + 2.0
        } else {
            (r - g) / d + 4.0
        };

        Hsl {
            h: h / 6.0 * 360.0,
            s,
            l,
        }
    }

    pub fn to_hex(self) -> ColorHex {
        ColorHex::from_rgb(channel(self.r), channel(self.g), channel(self.b))
    }
}

impl Hsl {
    pub fn to_rgb(self) -> Rgb {
        let h = self.h.rem_euclid(360.0) / 360.0;
        let s = self.s.clamp(0.0, 1.0);
        let l = self.l.clamp(0.0, 1.0);

        if s == 0.0 {
            return Rgb::new(l, l, l);
        }

        let q = if l < 0.5 { l * (1.0 + s) } else { l + s - l * s };
        let p = 2.0 * l - q;
        Rgb::new(
            hue_to_channel(p, q, h + 1.0 / 3.0),
            hue_to_channel(p, q, h),
            hue_to_channel(p, q, h - 1.0 / 3.0),
        )
    }
}

fn hue_to_channel(p: f64, q: f64, t: f64) -> f64 {
    let t = if t < 0.0 {
        t + 1.0
    } else if t > 1.0 {
        t - 1.0
    } else {
        t
    };
    if t < 1.0 / 6.0 {
        p + (q - p) * 6.0 * t
    } else if t < 0.5 {
        q
    } else if t < 2.0 / 3.0 {
        p + (q - p) * (2.0 / 3.0 - t) * 6.0
    } else {
        p
    }
}

fn channel(ratio: f64) -> u8 {
    (ratio.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Analogous hues of `base`: the base itself first, then `results - 1`
/// colours spread around its hue in steps of `360 / slices` degrees.
pub fn analogous(base: Rgb, results: usize, slices: u32) -> Vec<Rgb> {
    if results == 0 {
        return Vec::new();
    }

    let part = 360.0 / f64::from(slices.max(1));
    let half_span = ((part * results as f64) as i64 >> 1) as f64;
    let mut hsl = base.to_hsl();
    hsl.h = (hsl.h - half_span + 720.0) % 360.0;

    let mut set = Vec::with_capacity(results);
    set.push(base);
    for _ in 1..results {
        hsl.h = (hsl.h + part) % 360.0;
        set.push(hsl.to_rgb());
    }
    set
}

/// Uniformly picks one analogous variant of `base`. An empty analogous set
/// falls back to the base colour.
pub fn pick_analogous<R: Rng + ?Sized>(rng: &mut R, base: Rgb) -> Rgb {
    let set = analogous(base, ANALOGOUS_RESULTS, ANALOGOUS_SLICES);
    if set.is_empty() {
        return base;
    }
    set[rng.gen_range(0..set.len())]
}

pub fn generate_with<R: Rng + ?Sized>(rng: &mut R) -> ColorPair {
    let base_a = Rgb::random(rng);
    let base_b = Rgb::random(rng);
    ColorPair::new(
        pick_analogous(rng, base_a).to_hex(),
        pick_analogous(rng, base_b).to_hex(),
    )
}

/// Source of default colour pairs.
pub trait ColorPairGenerator: Send + Sync {
    fn generate(&self) -> ColorPair;
}

/// Generator backed by the thread-local OS-seeded RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomColorPairs;

impl ColorPairGenerator for RandomColorPairs {
    fn generate(&self) -> ColorPair {
        generate_with(&mut rand::thread_rng())
    }
}

/// Reproducible generator for tests and demos.
pub struct SeededColorPairs {
    rng: Mutex<StdRng>,
}

impl SeededColorPairs {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl ColorPairGenerator for SeededColorPairs {
    fn generate(&self) -> ColorPair {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        generate_with(&mut *rng)
    }
}
