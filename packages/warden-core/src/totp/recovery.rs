//! Single-use recovery codes.
//!
//! Codes look like `K7QXM-4TR9P`: two five-character segments drawn from an
//! alphabet without the easily confused `0/O` and `1/I/L`.

use rand::Rng;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

/// Characters a recovery code is drawn from
const ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";

/// Characters per segment
pub const SEGMENT_LEN: usize = 5;

/// Codes generated per set unless configured otherwise
pub const DEFAULT_RECOVERY_CODE_COUNT: usize = 8;

/// Ordered list of unused recovery codes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecoveryCodeSet(Vec<String>);

impl RecoveryCodeSet {
    /// Generate `count` fresh codes from the OS RNG
    pub fn generate(count: usize) -> Self {
        let mut rng = rand::rngs::OsRng;
        let codes = (0..count)
            .map(|_| {
                let mut segment = || -> String {
                    (0..SEGMENT_LEN)
                        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
                        .collect()
                };
                let first = segment();
                let second = segment();
                format!("{}-{}", first, second)
            })
            .collect();
        Self(codes)
    }

    /// Build a set from already formatted codes
    pub fn from_codes(codes: Vec<String>) -> Self {
        Self(codes)
    }

    /// Try to redeem `submitted`
    ///
    /// Matching ignores case, whitespace and hyphens. On a match the returned
    /// set no longer contains the code; otherwise it is an unchanged copy.
    pub fn consume(&self, submitted: &str) -> (bool, RecoveryCodeSet) {
        let wanted = normalize(submitted);
        if wanted.is_empty() {
            return (false, self.clone());
        }

        // Scan every code so timing does not reveal the position of a match.
        let mut matched: Option<usize> = None;
        for (index, code) in self.0.iter().enumerate() {
            let equal: bool = normalize(code).as_bytes().ct_eq(wanted.as_bytes()).into();
            if equal && matched.is_none() {
                matched = Some(index);
            }
        }

        match matched {
            Some(index) => {
                let mut remaining = self.0.clone();
                remaining.remove(index);
                (true, Self(remaining))
            }
            None => (false, self.clone()),
        }
    }

    /// Codes in display order
    pub fn codes(&self) -> &[String] {
        &self.0
    }

    /// Number of unused codes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether every code has been used
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Generate `count` formatted recovery codes
pub fn generate_recovery_codes(count: usize) -> RecoveryCodeSet {
    RecoveryCodeSet::generate(count)
}

/// Redeem `submitted` against `set`, returning `(matched, new_set)`
pub fn consume_recovery_code(set: &RecoveryCodeSet, submitted: &str) -> (bool, RecoveryCodeSet) {
    set.consume(submitted)
}

fn normalize(code: &str) -> String {
    code.chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_shape() {
        let set = generate_recovery_codes(DEFAULT_RECOVERY_CODE_COUNT);
        assert_eq!(set.len(), 8);

        for code in set.codes() {
            let parts: Vec<&str> = code.split('-').collect();
            assert_eq!(parts.len(), 2, "{}", code);
            assert!(parts
                .iter()
                .all(|p| p.len() == SEGMENT_LEN && p.bytes().all(|b| ALPHABET.contains(&b))));
        }
    }

    #[test]
    fn test_codes_are_random() {
        let a = generate_recovery_codes(8);
        let b = generate_recovery_codes(8);
        assert_ne!(a, b);
    }

    #[test]
    fn test_consume_is_single_use() {
        let set = RecoveryCodeSet::from_codes(vec!["ABCDE-FGHJK".into(), "MNPQR-STUVW".into()]);

        let (ok, after) = consume_recovery_code(&set, "ABCDE-FGHJK");
        assert!(ok);
        assert_eq!(after.len(), 1);

        let (again, unchanged) = consume_recovery_code(&after, "ABCDE-FGHJK");
        assert!(!again);
        assert_eq!(unchanged, after);
    }

    #[test]
    fn test_consume_ignores_case_and_whitespace() {
        let set = RecoveryCodeSet::from_codes(vec!["ABCDE-FGHJK".into()]);
        let (ok, after) = set.consume("  abcde-fghjk \n");
        assert!(ok);
        assert!(after.is_empty());

        let (ok, _) = set.consume("abcde fghjk");
        assert!(ok);
    }

    #[test]
    fn test_miss_leaves_set_unchanged() {
        let set = generate_recovery_codes(8);
        let (ok, after) = set.consume("ZZZZZ-ZZZZZ0");
        assert!(!ok);
        assert_eq!(after, set);

        let (ok, _) = set.consume("   ");
        assert!(!ok);
    }

    #[test]
    fn test_order_preserved_after_consume() {
        let set = RecoveryCodeSet::from_codes(vec![
            "AAAAA-AAAAA".into(),
            "BBBBB-BBBBB".into(),
            "CCCCC-CCCCC".into(),
        ]);
        let (_, after) = set.consume("BBBBB-BBBBB");
        assert_eq!(after.codes(), &["AAAAA-AAAAA".to_string(), "CCCCC-CCCCC".to_string()]);
    }
}
