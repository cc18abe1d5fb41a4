//! Built-in task handlers.
//!
//! Every handler takes the raw parameter string and returns the result text
//! that ends up in the client's result file.

use crate::commands::RESULT_CAPACITY;
use std::ops::ControlFlow;
use tracing::debug;

/// Read a leading integer the way C `atoi` does: optional sign, digits,
/// anything else stops the scan. No digits yields 0.
pub fn parse_int(parameter: &str) -> i64 {
    let s = parameter.trim_start();
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };

    let mut value: i64 = 0;
    for b in digits.bytes().take_while(u8::is_ascii_digit) {
        value = value.saturating_mul(10).saturating_add(i64::from(b - b'0'));
    }
    if negative { -value } else { value }
}

/// Witnesses that make Miller-Rabin exact for every `u64`.
const SMALL_PRIMES: [u64; 12] = [2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37];

fn mul_mod(a: u64, b: u64, m: u64) -> u64 {
    ((u128::from(a) * u128::from(b)) % u128::from(m)) as u64
}

fn pow_mod(mut base: u64, mut exp: u64, m: u64) -> u64 {
    let mut acc = 1;
    base %= m;
    while exp > 0 {
        if exp & 1 == 1 {
            acc = mul_mod(acc, base, m);
        }
        base = mul_mod(base, base, m);
        exp >>= 1;
    }
    acc
}

fn is_prime(n: i64) -> bool {
    if n < 2 {
        return false;
    }
    let n = n as u64;
    for p in SMALL_PRIMES {
        if n % p == 0 {
            return n == p;
        }
    }
    // No factor up to 37, so anything below 41^2 is prime.
    if n < 41 * 41 {
        return true;
    }

    let s = (n - 1).trailing_zeros();
    let d = (n - 1) >> s;
    'witness: for a in SMALL_PRIMES {
        let mut x = pow_mod(a, d, n);
        if x == 1 || x == n - 1 {
            continue;
        }
        for _ in 1..s {
            x = mul_mod(x, x, n);
            if x == n - 1 {
                continue 'witness;
            }
        }
        return false;
    }
    true
}

/// Number of primes `p` with `2 <= p <= n`.
pub fn count_primes(n: i64) -> usize {
    (2..=n).filter(|&i| is_prime(i)).count()
}

/// Number of distinct primes dividing `n`. Zero for `n < 2`.
pub fn count_prime_divisors(n: i64) -> usize {
    if n < 2 {
        return 0;
    }
    if is_prime(n) {
        return 1;
    }
    let mut rest = n;
    let mut count = 0;
    let mut d = 2;
    while d <= rest / d {
        if rest % d == 0 {
            count += 1;
            while rest % d == 0 {
                rest /= d;
            }
            if is_prime(rest) {
                return count + 1;
            }
        }
        d += 1;
    }
    if rest > 1 {
        count += 1;
    }
    count
}

/// Visit the distinct permutations of `chars[start..]` in swap order.
///
/// A character already tried at position `start` is not swapped in again:
/// its subtree would only repeat permutations visited before.
fn permute<F>(chars: &mut [char], start: usize, visit: &mut F) -> ControlFlow<()>
where
    F: FnMut(&[char]) -> ControlFlow<()>,
{
    if start + 1 >= chars.len() {
        return visit(chars);
    }
    let mut tried = Vec::with_capacity(chars.len() - start);
    for i in start..chars.len() {
        if tried.contains(&chars[i]) {
            continue;
        }
        tried.push(chars[i]);
        chars.swap(start, i);
        let flow = permute(chars, start + 1, visit);
        chars.swap(start, i);
        flow?;
    }
    ControlFlow::Continue(())
}

/// Distinct permutations of `word` in swap-generation order.
///
/// Generation stops once the joined output would exceed `budget` bytes.
/// Repeated letters are pruned while generating, so every visited
/// permutation is new and the budget bounds the work.
pub fn anagrams(word: &str, budget: usize) -> Vec<String> {
    let mut chars: Vec<char> = word.chars().collect();
    if chars.is_empty() {
        return Vec::new();
    }

    let mut out = Vec::new();
    let mut used = 0;
    let flow = permute(&mut chars, 0, &mut |perm: &[char]| {
        let candidate: String = perm.iter().collect();
        used += candidate.len() + 1;
        out.push(candidate);
        if used > budget {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    });
    if flow.is_break() {
        debug!(word, generated = out.len(), "Anagram output reached its budget");
    }
    out
}

/// `PRIMES <n>`
pub fn primes(parameter: &str) -> String {
    let n = parse_int(parameter);
    format!("Primes up to {}: {}", n, count_primes(n))
}

/// `PRIMEDIVISORS <n>`
pub fn prime_divisors(parameter: &str) -> String {
    let n = parse_int(parameter);
    format!("Prime divisors of {}: {}", n, count_prime_divisors(n))
}

/// `ANAGRAMS <word>`
pub fn anagrams_report(parameter: &str) -> String {
    let mut report = format!("Anagrams of {}:\n", parameter);
    let words = anagrams(parameter, RESULT_CAPACITY.saturating_sub(report.len()));
    if words.is_empty() {
        report.push_str("No anagrams generated.\n");
    }
    for word in words {
        report.push_str(&word);
        report.push('\n');
    }
    report
}
