use sha2::{Digest, Sha256};

/// Returns a stable hexadecimal id from the canonical rendering of the
/// given parts.
///
/// The rendering joins parts with `|`, so equal inputs hash equally on
/// every platform and run. Sixteen hex characters keep ids readable
/// while leaving collisions out of practical reach.
pub fn stable_id(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (index, part) in parts.iter().enumerate() {
        if index > 0 {
            hasher.update(b"|");
        }
        hasher.update(part.as_bytes());
    }
    let digest = hasher.finalize();
    digest[..8].iter().fold(String::new(), |mut out, byte| {
        out.push_str(&format!("{byte:02x}"));
        out
    })
}

/// Canonical float rendering used inside id hashes.
pub fn canon_f64(value: f64) -> String {
    format!("{value:.9}")
}

#[cfg(test)]
mod tests {
    use super::{canon_f64, stable_id};

    #[test]
    fn test_stable_and_distinct() {
        let a = stable_id(&["DN", "1.000000000", "2.000000000"]);
        let b = stable_id(&["DN", "1.000000000", "2.000000000"]);
        let c = stable_id(&["CN", "1.000000000", "2.000000000"]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn test_joining_is_unambiguous() {
        assert_ne!(stable_id(&["ab", "c"]), stable_id(&["a", "bc"]));
    }

    #[test]
    fn test_canon_f64() {
        assert_eq!(canon_f64(1.5), "1.500000000");
        assert_eq!(canon_f64(-0.25), "-0.250000000");
    }
}
