//! Transaction reference generation.

use rand::distributions::Alphanumeric;
use rand::Rng;

const RANDOM_LEN: usize = 8;

/// Produces references of the form `<prefix><suffix><8 random chars>`.
///
/// The suffix walks `0-9A-Z`; when it wraps the alphabetic prefix advances
/// (`A`, `B`, ..., `Z`, `AA`, ...). The random tail is upper-case
/// alphanumeric.
#[derive(Debug, Clone)]
pub struct ReferenceGenerator {
    prefix: Vec<u8>,
    suffix: u8,
}

impl Default for ReferenceGenerator {
    fn default() -> Self {
        Self {
            prefix: vec![b'A'],
            suffix: b'0',
        }
    }
}

impl ReferenceGenerator {
    /// A generator starting at `A0`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Produce the next reference.
    pub fn generate(&mut self) -> String {
        let tail: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(RANDOM_LEN)
            .map(|b| char::from(b).to_ascii_uppercase())
            .collect();

        let mut reference = String::with_capacity(self.prefix.len() + 1 + RANDOM_LEN);
        reference.extend(self.prefix.iter().map(|&b| char::from(b)));
        reference.push(char::from(self.suffix));
        reference.push_str(&tail);

        self.advance();
        reference
    }

    fn advance(&mut self) {
        self.suffix = match self.suffix {
            b'9' => b'A',
            b'Z' => b'0',
            other => other + 1,
        };
        if self.suffix != b'0' {
            return;
        }
        for letter in self.prefix.iter_mut().rev() {
            if *letter == b'Z' {
                *letter = b'A';
            } else {
                *letter += 1;
                return;
            }
        }
        self.prefix.insert(0, b'A');
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn references_have_prefix_suffix_and_tail() {
        let mut generator = ReferenceGenerator::new();
        let first = generator.generate();
        assert!(first.starts_with("A0"));
        assert_eq!(first.len(), 10);
        assert!(first[2..]
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
        assert!(generator.generate().starts_with("A1"));
    }

    #[test]
    fn suffix_wrap_advances_prefix() {
        let mut generator = ReferenceGenerator {
            prefix: vec![b'Z'],
            suffix: b'Z',
        };
        assert!(generator.generate().starts_with("ZZ"));
        assert!(generator.generate().starts_with("AA0"));
        let mut generator = ReferenceGenerator {
            prefix: vec![b'A'],
            suffix: b'9',
        };
        generator.generate();
        assert!(generator.generate().starts_with("AA"));
    }
}
