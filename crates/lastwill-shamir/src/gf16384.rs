//! Galois Field GF(2^14) arithmetic for Shamir's Secret Sharing
//!
//! Uses the primitive polynomial x^14 + x^5 + x^3 + x + 1 (0x402B).
//! A field of this size allows up to 16383 distinct share ids, enough for
//! any realistic keeper set, while keeping each word in a `u16`.

use std::sync::OnceLock;

/// Bits per field element
pub const BITS: u8 = 14;

/// Number of field elements (2^14)
pub const SIZE: usize = 1 << BITS;

/// Order of the multiplicative group (2^14 - 1)
pub const ORDER: usize = SIZE - 1;

/// Largest element value
pub const MAX_ELEMENT: u16 = ORDER as u16;

/// Reduction polynomial without the leading x^14 term
const PRIMITIVE: u16 = 0x002B;

struct Tables {
    /// log[x] = discrete log of x, log[0] is undefined
    log: Vec<u16>,
    /// exp[i] = g^i, doubled so that log_a + log_b never needs a modulo
    exp: Vec<u16>,
}

fn tables() -> &'static Tables {
    static TABLES: OnceLock<Tables> = OnceLock::new();
    TABLES.get_or_init(|| {
        let mut log = vec![0u16; SIZE];
        let mut exp = vec![0u16; 2 * ORDER];

        let mut x: u16 = 1;
        for i in 0..ORDER {
            exp[i] = x;
            exp[i + ORDER] = x;
            log[x as usize] = i as u16;
            x <<= 1;
            if x as usize >= SIZE {
                x = (x ^ PRIMITIVE) & MAX_ELEMENT;
            }
        }

        Tables { log, exp }
    })
}

/// Add two elements in GF(2^14) (XOR)
#[inline]
pub fn gf_add(a: u16, b: u16) -> u16 {
    a ^ b
}

/// Subtract two elements (same as add in characteristic 2)
#[inline]
pub fn gf_sub(a: u16, b: u16) -> u16 {
    a ^ b
}

/// Multiply two elements in GF(2^14)
#[inline]
pub fn gf_mul(a: u16, b: u16) -> u16 {
    if a == 0 || b == 0 {
        return 0;
    }
    let t = tables();
    let log_a = t.log[a as usize] as usize;
    let log_b = t.log[b as usize] as usize;
    t.exp[log_a + log_b]
}

/// Divide two elements in GF(2^14)
#[inline]
pub fn gf_div(a: u16, b: u16) -> u16 {
    assert!(b != 0, "Division by zero in GF(2^14)");
    if a == 0 {
        return 0;
    }
    let t = tables();
    let log_a = t.log[a as usize] as usize;
    let log_b = t.log[b as usize] as usize;
    t.exp[log_a + ORDER - log_b]
}

/// Inverse of a non-zero element
#[inline]
pub fn gf_inv(a: u16) -> u16 {
    assert!(a != 0, "Inverse of zero in GF(2^14)");
    let t = tables();
    t.exp[ORDER - t.log[a as usize] as usize]
}

/// Evaluate a polynomial at `x` (Horner).
/// coefficients[0] is the constant term.
pub fn poly_eval(coefficients: &[u16], x: u16) -> u16 {
    let mut result = 0u16;
    for &coef in coefficients.iter().rev() {
        result = gf_add(gf_mul(result, x), coef);
    }
    result
}

/// Lagrange interpolation at x = 0.
/// `points` are (x, y) pairs with distinct, non-zero x.
pub fn lagrange_interpolate(points: &[(u16, u16)]) -> u16 {
    let mut secret = 0u16;

    for (i, &(xi, yi)) in points.iter().enumerate() {
        let mut numerator = 1u16;
        let mut denominator = 1u16;

        for (j, &(xj, _)) in points.iter().enumerate() {
            if i != j {
                numerator = gf_mul(numerator, xj);
                denominator = gf_mul(denominator, gf_sub(xi, xj));
            }
        }

        secret = gf_add(secret, gf_mul(yi, gf_div(numerator, denominator)));
    }

    secret
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generator_cycles_through_every_element() {
        let t = tables();
        let mut seen = vec![false; SIZE];
        for &x in &t.exp[..ORDER] {
            assert!(x != 0 && (x as usize) < SIZE);
            assert!(!seen[x as usize], "element {} repeated", x);
            seen[x as usize] = true;
        }
        assert!(!seen[0]);
    }

    #[test]
    fn test_gf_mul_reduces() {
        assert_eq!(gf_mul(0, 0x1234), 0);
        assert_eq!(gf_mul(1, 0x1234), 0x1234);
        assert_eq!(gf_mul(2, 2), 4);
        // x^13 * x = x^14 = x^5 + x^3 + x + 1
        assert_eq!(gf_mul(1 << 13, 2), 0x2B);
    }

    #[test]
    fn test_gf_div_inverts_mul() {
        let a = 0x0ABC;
        let b = 0x3001;
        assert_eq!(gf_mul(gf_div(a, b), b), a);
        assert_eq!(gf_div(a, a), 1);
        assert_eq!(gf_div(0, b), 0);
    }

    #[test]
    fn test_gf_inv() {
        for a in (1..=MAX_ELEMENT).step_by(97) {
            assert_eq!(gf_mul(a, gf_inv(a)), 1, "Failed for a={}", a);
        }
        assert_eq!(gf_mul(MAX_ELEMENT, gf_inv(MAX_ELEMENT)), 1);
    }

    #[test]
    fn test_poly_eval() {
        let coeffs = [5u16, 3, 2];
        assert_eq!(poly_eval(&coeffs, 0), 5);
        // 5 ^ 3 ^ 2
        assert_eq!(poly_eval(&coeffs, 1), 4);
    }

    #[test]
    fn test_lagrange_recovers_constant_term() {
        let coeffs = [0x1F00u16, 0x0777, 0x2001];
        let points: Vec<(u16, u16)> = [3u16, 900, 16383]
            .iter()
            .map(|&x| (x, poly_eval(&coeffs, x)))
            .collect();
        assert_eq!(lagrange_interpolate(&points), 0x1F00);
    }
}
