//! Full-period linear congruential generator.
//!
//! Parameters are chosen to satisfy the Hull–Dobell theorem, so for modulus `m` the generator
//! visits every value in `0..m` exactly once in `m` steps before repeating.

use rand::Rng;

#[derive(Debug, Clone)]
pub struct FullPeriodLcg {
    modulus: u64,
    multiplier: u64,
    increment: u64,
    state: u64,
}

impl FullPeriodLcg {
    /// Random full-period parameters and a random starting point. `modulus` 0 is treated as 1.
    pub fn new<R: Rng + ?Sized>(modulus: u64, rng: &mut R) -> Self {
        let modulus = modulus.max(1);

        // a - 1 must be divisible by every prime factor of m, and by 4 when 4 | m.
        let mut step = radical(modulus);
        if modulus % 4 == 0 && step % 4 != 0 {
            step *= 2;
        }
        let k = rng.gen_range(0..=modulus / step);
        let multiplier = ((1 + k as u128 * step as u128) % modulus as u128) as u64;

        // c must be coprime with m.
        let increment = loop {
            let c = rng.gen_range(0..modulus);
            if gcd(c, modulus) == 1 {
                break c;
            }
        };

        Self {
            modulus,
            multiplier,
            increment,
            state: rng.gen_range(0..modulus),
        }
    }

    pub fn next_value(&mut self) -> u64 {
        let next = (self.multiplier as u128 * self.state as u128 + self.increment as u128)
            % self.modulus as u128;
        self.state = next as u64;
        self.state
    }
}

/// Whether (a, c) give a full period modulo m.
pub fn satisfies_hull_dobell(modulus: u64, multiplier: u64, increment: u64) -> bool {
    if gcd(increment, modulus) != 1 {
        return false;
    }
    let m = modulus.max(1) as u128;
    let a1 = ((multiplier as u128 % m + m - 1) % m) as u64;
    let r = radical(modulus);
    if a1 % r != 0 {
        return false;
    }
    !(modulus % 4 == 0 && a1 % 4 != 0)
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// Product of the distinct prime factors of `n`.
fn radical(mut n: u64) -> u64 {
    let mut out = 1u64;
    let mut p = 2u64;
    while p.saturating_mul(p) <= n {
        if n % p == 0 {
            out *= p;
            while n % p == 0 {
                n /= p;
            }
        }
        p += 1;
    }
    if n > 1 {
        out *= n;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn visits_every_value_once() {
        let mut rng = StdRng::seed_from_u64(7);
        for m in 1..=300u64 {
            let mut lcg = FullPeriodLcg::new(m, &mut rng);
            assert!(satisfies_hull_dobell(m, lcg.multiplier, lcg.increment), "m={m}");
            let mut seen = vec![false; m as usize];
            for _ in 0..m {
                let v = lcg.next_value() as usize;
                assert!(!seen[v], "m={m} repeated {v}");
                seen[v] = true;
            }
        }
    }

    #[test]
    fn radical_and_gcd() {
        assert_eq!(radical(256), 2);
        assert_eq!(radical(360), 30);
        assert_eq!(radical(97), 97);
        assert_eq!(gcd(12, 18), 6);
        assert_eq!(gcd(0, 1), 1);
    }

    #[test]
    fn rejects_bad_parameters() {
        // c shares a factor with m
        assert!(!satisfies_hull_dobell(16, 5, 4));
        // 4 | m but 4 does not divide a - 1
        assert!(!satisfies_hull_dobell(16, 3, 1));
        assert!(satisfies_hull_dobell(16, 5, 1));
    }
}
