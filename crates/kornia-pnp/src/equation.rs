//! Real roots of low-degree polynomials.
//!
//! Every solver falls back to the next lower degree when the leading coefficient vanishes, and returns
//! no roots for non-finite coefficients.

use std::cmp::Ordering;

use crate::scalar::{eps, lit, Real};

const POLISH_ITERATIONS: usize = 3;

fn all_finite<T: Real>(coefficients: &[T]) -> bool {
    coefficients.iter().all(|c| c.is_finite())
}

fn sorted<T: Real>(mut roots: Vec<T>) -> Vec<T> {
    roots.retain(|r| r.is_finite());
    roots.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    roots
}

/// Evaluates the polynomial with coefficients in descending order and its derivative at `x`.
fn evaluate<T: Real>(coefficients: &[T], x: T) -> (T, T) {
    let mut value = T::zero();
    let mut derivative = T::zero();
    for c in coefficients {
        derivative = derivative * x + value;
        value = value * x + *c;
    }
    (value, derivative)
}

/// Newton polishing, a step is only taken if it reduces the residual.
fn polish<T: Real>(coefficients: &[T], mut x: T) -> T {
    for _ in 0..POLISH_ITERATIONS {
        let (value, derivative) = evaluate(coefficients, x);
        if value == T::zero() || derivative.abs() <= eps::<T>() {
            break;
        }
        let candidate = x - value / derivative;
        if !candidate.is_finite() || evaluate(coefficients, candidate).0.abs() >= value.abs() {
            break;
        }
        x = candidate;
    }
    x
}

/// Real roots of `a x + b = 0`.
pub fn solve_linear<T: Real>(a: T, b: T) -> Vec<T> {
    if !all_finite(&[a, b]) || a.abs() <= eps::<T>() {
        return Vec::new();
    }
    vec![-b / a]
}

/// Real roots of `a x^2 + b x + c = 0`, in ascending order.
pub fn solve_quadratic<T: Real>(a: T, b: T, c: T) -> Vec<T> {
    if !all_finite(&[a, b, c]) {
        return Vec::new();
    }
    if a.abs() <= eps::<T>() {
        return solve_linear(b, c);
    }

    let discriminant = b * b - lit::<T>(4.0) * a * c;
    if discriminant < T::zero() {
        return Vec::new();
    }

    // numerically stable form avoiding cancellation
    let root = discriminant.sqrt();
    let q = if b >= T::zero() {
        -(b + root) * lit(0.5)
    } else {
        -(b - root) * lit(0.5)
    };

    if q == T::zero() {
        return vec![T::zero(), T::zero()];
    }
    sorted(vec![q / a, c / q])
}

/// Real roots of `a x^3 + b x^2 + c x + d = 0`, in ascending order.
pub fn solve_cubic<T: Real>(a: T, b: T, c: T, d: T) -> Vec<T> {
    if !all_finite(&[a, b, c, d]) {
        return Vec::new();
    }
    if a.abs() <= eps::<T>() {
        return solve_quadratic(b, c, d);
    }

    let (b, c, d) = (b / a, c / a, d / a);
    let normalized = [T::one(), b, c, d];

    let three: T = lit(3.0);
    let shift = -b / three;

    // depressed cubic t^3 + p t + q with x = t - b / 3
    let p = c - b * b / three;
    let q = lit::<T>(2.0) * b * b * b / lit(27.0) - b * c / three + d;

    let half_q = q * lit(0.5);
    let third_p = p / three;
    let discriminant = half_q * half_q + third_p * third_p * third_p;

    let roots = if discriminant > T::zero() {
        let root = discriminant.sqrt();
        let u = (-half_q + root).cbrt();
        let v = (-half_q - root).cbrt();
        vec![u + v + shift]
    } else if p.abs() <= eps::<T>() {
        vec![(-q).cbrt() + shift]
    } else {
        let r = lit::<T>(2.0) * (-third_p).sqrt();
        let argument = (three * q / (lit::<T>(2.0) * p) * (-three / p).sqrt())
            .max(-T::one())
            .min(T::one());
        let phi = argument.acos() / three;
        let third_turn = T::two_pi() / three;
        (0..3)
            .map(|k| r * (phi - third_turn * lit(k as f64)).cos() + shift)
            .collect()
    };

    sorted(roots.into_iter().map(|x| polish(&normalized, x)).collect())
}

/// Real roots of `a x^4 + b x^3 + c x^2 + d x + e = 0`, in ascending order.
///
/// Uses Ferrari's method with the largest root of the resolvent cubic; every root is polished with a
/// few Newton iterations on the original polynomial. Multiple roots may be reported more than once.
pub fn solve_quartic<T: Real>(a: T, b: T, c: T, d: T, e: T) -> Vec<T> {
    if !all_finite(&[a, b, c, d, e]) {
        return Vec::new();
    }
    if a.abs() <= eps::<T>() {
        return solve_cubic(b, c, d, e);
    }

    let (b, c, d, e) = (b / a, c / a, d / a, e / a);
    let normalized = [T::one(), b, c, d, e];

    let shift = -b / lit(4.0);
    let b2 = b * b;

    // depressed quartic y^4 + p y^2 + q y + r with x = y - b / 4
    let p = c - lit::<T>(3.0 / 8.0) * b2;
    let q = d - b * c * lit(0.5) + b2 * b / lit(8.0);
    let r = e - b * d / lit(4.0) + b2 * c / lit(16.0) - lit::<T>(3.0 / 256.0) * b2 * b2;

    let mut roots = Vec::with_capacity(4);

    if q.abs() <= eps::<T>() {
        // biquadratic
        for z in solve_quadratic(T::one(), p, r) {
            if z > T::zero() {
                let y = z.sqrt();
                roots.push(y + shift);
                roots.push(-y + shift);
            } else if z.abs() <= eps::<T>() {
                roots.push(shift);
            }
        }
    } else {
        let resolvent = solve_cubic(
            T::one(),
            p,
            p * p * lit(0.25) - r,
            -q * q / lit(8.0),
        );
        let m = match resolvent.last() {
            Some(m) if *m > T::zero() => *m,
            _ => return Vec::new(),
        };

        let s = (lit::<T>(2.0) * m).sqrt();
        let offset = q / (lit::<T>(2.0) * s);
        let base = p * lit(0.5) + m;

        for y in solve_quadratic(T::one(), -s, base + offset) {
            roots.push(y + shift);
        }
        for y in solve_quadratic(T::one(), s, base - offset) {
            roots.push(y + shift);
        }
    }

    sorted(roots.into_iter().map(|x| polish(&normalized, x)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn assert_roots(actual: &[f64], expected: &[f64], epsilon: f64) {
        assert_eq!(actual.len(), expected.len(), "roots {actual:?} != {expected:?}");
        for (a, e) in actual.iter().zip(expected.iter()) {
            assert_relative_eq!(a, e, epsilon = epsilon);
        }
    }

    #[test]
    fn test_quadratic() {
        assert_roots(&solve_quadratic(1.0, -3.0, 2.0), &[1.0, 2.0], 1e-12);
        assert_roots(&solve_quadratic(0.0, 2.0, -4.0), &[2.0], 1e-12);
        assert!(solve_quadratic(1.0, 0.0, 1.0).is_empty());
        // large coefficient spread without cancellation
        let roots = solve_quadratic(1.0, -1e8, 1.0);
        assert_relative_eq!(roots[0], 1e-8, max_relative = 1e-9);
    }

    #[test]
    fn test_cubic_three_real_roots() {
        // (x - 1)(x + 2)(x - 3)
        assert_roots(&solve_cubic(1.0, -2.0, -5.0, 6.0), &[-2.0, 1.0, 3.0], 1e-10);
    }

    #[test]
    fn test_cubic_single_real_root() {
        // (x + 1)(x^2 - x + 2)
        assert_roots(&solve_cubic(2.0, 0.0, 2.0, 4.0), &[-1.0], 1e-10);
    }

    #[test]
    fn test_quartic_four_real_roots() {
        // 2 (x - 1)(x - 2)(x + 3)(x - 0.5)
        assert_roots(
            &solve_quartic(2.0, -1.0, -14.0, 19.0, -6.0),
            &[-3.0, 0.5, 1.0, 2.0],
            1e-9,
        );
    }

    #[test]
    fn test_quartic_two_real_roots() {
        // (x^2 + 1)(x - 2)(x + 1)
        assert_roots(&solve_quartic(1.0, -1.0, -1.0, -1.0, -2.0), &[-1.0, 2.0], 1e-9);
    }

    #[test]
    fn test_quartic_biquadratic() {
        // (x^2 - 1)(x^2 - 4)
        assert_roots(
            &solve_quartic(1.0, 0.0, -5.0, 0.0, 4.0),
            &[-2.0, -1.0, 1.0, 2.0],
            1e-10,
        );
        assert!(solve_quartic(1.0, 0.0, 0.0, 0.0, 1.0).is_empty());
    }

    #[test]
    fn test_quartic_single_precision() {
        let roots = solve_quartic(2.0f32, -1.0, -14.0, 19.0, -6.0);
        assert_eq!(roots.len(), 4);
        for (a, e) in roots.iter().zip([-3.0f32, 0.5, 1.0, 2.0].iter()) {
            assert_relative_eq!(a, e, epsilon = 1e-3);
        }
    }

    #[test]
    fn test_degenerate_coefficients() {
        assert_roots(&solve_quartic(0.0, 1.0, -2.0, -5.0, 6.0), &[-2.0, 1.0, 3.0], 1e-10);
        assert!(solve_quartic(f64::NAN, 1.0, 1.0, 1.0, 1.0).is_empty());
        assert!(solve_cubic(1.0, f64::INFINITY, 0.0, 0.0).is_empty());
        assert!(solve_linear(0.0, 1.0).is_empty());
    }
}
