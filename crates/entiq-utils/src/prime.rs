//! Prime helpers for sizing hash-partitioned structures.

/// Return true if `n` is prime.
#[must_use]
pub const fn is_prime(n: usize) -> bool {
    if n < 2 {
        return false;
    }
    if n < 4 {
        return true;
    }
    if n % 2 == 0 {
        return false;
    }

    let mut divisor = 3;
    while divisor * divisor <= n {
        if n % divisor == 0 {
            return false;
        }
        divisor += 2;
    }

    true
}

/// Return the smallest prime greater than or equal to `n` (2 for `n < 2`).
#[must_use]
pub const fn ceiling_prime(n: usize) -> usize {
    let mut candidate = if n < 2 { 2 } else { n };
    while !is_prime(candidate) {
        candidate += 1;
    }

    candidate
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::{ceiling_prime, is_prime};

    #[test]
    fn recognizes_small_primes() {
        let primes: Vec<usize> = (0..30).filter(|n| is_prime(*n)).collect();
        assert_eq!(primes, vec![2, 3, 5, 7, 11, 13, 17, 19, 23, 29]);
    }

    #[test]
    fn ceiling_prime_rounds_up_to_next_prime() {
        assert_eq!(ceiling_prime(0), 2);
        assert_eq!(ceiling_prime(4), 5);
        assert_eq!(ceiling_prime(32), 37);
        assert_eq!(ceiling_prime(37), 37);
        assert_eq!(ceiling_prime(90), 97);
    }
}
