// Identifier generation.

/// Generate a fresh 21-character URL-safe identifier.
pub fn generate_id() -> String {
    nanoid::nanoid!()
}

/// Generate an identifier with a stable type prefix, e.g. `usr_V1StG...`.
pub fn prefixed_id(prefix: &str) -> String {
    format!("{prefix}_{}", nanoid::nanoid!())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(generate_id(), generate_id());
    }

    #[test]
    fn test_prefixed() {
        assert!(prefixed_id("usr").starts_with("usr_"));
    }
}
