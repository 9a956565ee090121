//! Numeric primitives shared by the detectors.
//!
//! The chi-squared survival function is computed exactly through the
//! regularized upper incomplete gamma function `Q(k/2, x/2)`, using the
//! series expansion below `a + 1` and a Lentz continued fraction above it.
//! Relative accuracy is about 1e-12 over the ranges the detectors use.

const LANCZOS_G: f64 = 7.0;
#[allow(clippy::excessive_precision)]
const LANCZOS_COEFFS: [f64; 9] = [
    0.999_999_999_999_809_9,
    676.520_368_121_885_1,
    -1_259.139_216_722_402_8,
    771.323_428_777_653_1,
    -176.615_029_162_140_6,
    12.507_343_278_686_905,
    -0.138_571_095_265_720_12,
    9.984_369_578_019_572e-6,
    1.505_632_735_149_311_6e-7,
];

const MAX_ITERATIONS: usize = 500;
const EPSILON: f64 = 1e-15;
const TINY: f64 = 1e-300;

/// Natural log of the gamma function, for `x > 0`.
#[must_use]
pub fn ln_gamma(x: f64) -> f64 {
    if x < 0.5 {
        // Reflection.
        let pi = std::f64::consts::PI;
        return (pi / (pi * x).sin()).ln() - ln_gamma(1.0 - x);
    }
    let x = x - 1.0;
    let mut acc = LANCZOS_COEFFS[0];
    for (i, c) in LANCZOS_COEFFS.iter().enumerate().skip(1) {
        #[allow(clippy::cast_precision_loss)]
        let offset = i as f64;
        acc += c / (x + offset);
    }
    let t = x + LANCZOS_G + 0.5;
    0.5 * (2.0 * std::f64::consts::PI).ln() + (x + 0.5) * t.ln() - t + acc.ln()
}

fn gamma_p_series(a: f64, x: f64) -> f64 {
    let mut ap = a;
    let mut sum = 1.0 / a;
    let mut term = sum;
    for _ in 0..MAX_ITERATIONS {
        ap += 1.0;
        term *= x / ap;
        sum += term;
        if term.abs() < sum.abs() * EPSILON {
            break;
        }
    }
    sum * (-x + a * x.ln() - ln_gamma(a)).exp()
}

fn gamma_q_continued_fraction(a: f64, x: f64) -> f64 {
    let mut b = x + 1.0 - a;
    let mut c = 1.0 / TINY;
    let mut d = 1.0 / b;
    let mut h = d;
    for i in 1..=MAX_ITERATIONS {
        #[allow(clippy::cast_precision_loss)]
        let i = i as f64;
        let an = -i * (i - a);
        b += 2.0;
        d = an * d + b;
        if d.abs() < TINY {
            d = TINY;
        }
        c = b + an / c;
        if c.abs() < TINY {
            c = TINY;
        }
        d = 1.0 / d;
        let delta = d * c;
        h *= delta;
        if (delta - 1.0).abs() < EPSILON {
            break;
        }
    }
    (-x + a * x.ln() - ln_gamma(a)).exp() * h
}

/// Regularized upper incomplete gamma `Q(a, x) = Γ(a, x) / Γ(a)`.
#[must_use]
pub fn regularized_gamma_q(a: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return 1.0;
    }
    if x < a + 1.0 {
        (1.0 - gamma_p_series(a, x)).clamp(0.0, 1.0)
    } else {
        gamma_q_continued_fraction(a, x).clamp(0.0, 1.0)
    }
}

/// P(X ≥ statistic) for X ~ χ²(degrees_of_freedom).
#[must_use]
pub fn chi_squared_survival(statistic: f64, degrees_of_freedom: u32) -> f64 {
    regularized_gamma_q(f64::from(degrees_of_freedom) / 2.0, statistic / 2.0)
}

/// Pearson chi-squared statistic of observed counts against expected proportions.
///
/// Classes with zero expected proportion are skipped.
#[must_use]
pub fn chi_squared(observed: &[u64], expected_proportions: &[f64]) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let n = observed.iter().sum::<u64>() as f64;
    observed
        .iter()
        .zip(expected_proportions)
        .filter(|(_, p)| **p > 0.0)
        .map(|(o, p)| {
            #[allow(clippy::cast_precision_loss)]
            let o = *o as f64;
            let e = n * p;
            (o - e) * (o - e) / e
        })
        .sum()
}

/// Shannon entropy, in bits, of a distribution given by non-negative weights.
///
/// Returns `None` when the weights sum to zero.
#[must_use]
pub fn shannon_entropy_bits(weights: impl IntoIterator<Item = f64> + Clone) -> Option<f64> {
    let total: f64 = weights.clone().into_iter().filter(|w| *w > 0.0).sum();
    if total <= 0.0 {
        return None;
    }
    let h = weights
        .into_iter()
        .filter(|w| *w > 0.0)
        .map(|w| {
            let p = w / total;
            -p * p.log2()
        })
        .sum::<f64>();
    Some(h.max(0.0))
}
