use thiserror::Error;

const MAX_ITER: usize = 100;
const XTOL: f64 = 2e-12;

#[derive(Debug, Error)]
pub enum SolverError {
    #[error("root is not bracketed on [{a}, {b}]: f(a) = {fa}, f(b) = {fb}")]
    NotBracketed { a: f64, b: f64, fa: f64, fb: f64 },

    #[error("no convergence after {0} iterations")]
    NoConvergence(usize),
}

/// Brent's method: find a root of `f` on the bracketing interval `[a, b]`.
///
/// Combines bisection with secant and inverse-quadratic steps, falling
/// back to bisection whenever an interpolated step would leave the
/// bracket or shrink too slowly.
pub fn brentq<F: FnMut(f64) -> f64>(mut f: F, a: f64, b: f64) -> Result<f64, SolverError> {
    let mut a = a;
    let mut b = b;
    let mut fa = f(a);
    let mut fb = f(b);

    if fa == 0.0 {
        return Ok(a);
    }
    if fb == 0.0 {
        return Ok(b);
    }
    if fa.signum() == fb.signum() {
        return Err(SolverError::NotBracketed { a, b, fa, fb });
    }

    let mut c = a;
    let mut fc = fa;
    let mut d = b - a;
    let mut e = d;

    for _ in 0..MAX_ITER {
        if fb.abs() > fc.abs() {
            // Keep b the best estimate, with c on the other side.
            a = b;
            b = c;
            c = a;
            fa = fb;
            fb = fc;
            fc = fa;
        }

        let tol = 2.0 * f64::EPSILON * b.abs() + 0.5 * XTOL;
        let xm = 0.5 * (c - b);
        if xm.abs() <= tol || fb == 0.0 {
            return Ok(b);
        }

        if e.abs() >= tol && fa.abs() > fb.abs() {
            let s = fb / fa;
            let (mut p, mut q) = if a == c {
                // Secant step.
                (2.0 * xm * s, 1.0 - s)
            } else {
                // Inverse quadratic interpolation.
                let qa = fa / fc;
                let r = fb / fc;
                (
                    s * (2.0 * xm * qa * (qa - r) - (b - a) * (r - 1.0)),
                    (qa - 1.0) * (r - 1.0) * (s - 1.0),
                )
            };
            if p > 0.0 {
                q = -q;
            }
            p = p.abs();
            let min1 = 3.0 * xm * q - (tol * q).abs();
            let min2 = (e * q).abs();
            if 2.0 * p < min1.min(min2) {
                e = d;
                d = p / q;
            } else {
                d = xm;
                e = d;
            }
        } else {
            d = xm;
            e = d;
        }

        a = b;
        fa = fb;
        if d.abs() > tol {
            b += d;
        } else {
            b += tol.copysign(xm);
        }
        fb = f(b);

        if fb.signum() == fc.signum() {
            c = a;
            fc = fa;
            d = b - a;
            e = d;
        }
    }

    Err(SolverError::NoConvergence(MAX_ITER))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_a_polynomial_root() {
        let root = brentq(|x| x * x - 4.0, 0.0, 10.0).unwrap();
        assert!((root - 2.0).abs() < 1e-9);
    }

    #[test]
    fn finds_a_transcendental_root() {
        let root = brentq(|x| x.cos() - x, 0.0, 1.0).unwrap();
        assert!((root.cos() - root).abs() < 1e-9);
    }

    #[test]
    fn handles_reversed_sign_orientation() {
        let root = brentq(|x| 4.0 - x * x, 0.0, 10.0).unwrap();
        assert!((root - 2.0).abs() < 1e-9);
    }

    #[test]
    fn endpoint_roots_return_immediately() {
        assert_eq!(brentq(|x| x, 0.0, 1.0).unwrap(), 0.0);
    }

    #[test]
    fn rejects_unbracketed_intervals() {
        let err = brentq(|x| x * x + 1.0, -1.0, 1.0).unwrap_err();
        assert!(matches!(err, SolverError::NotBracketed { .. }));
    }

    #[test]
    fn converges_on_flat_shallow_functions() {
        let root = brentq(|x| (x - 3.0) * 1e-8, 0.0, 10.0).unwrap();
        assert!((root - 3.0).abs() < 1e-6);
    }
}
