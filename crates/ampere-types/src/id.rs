use uuid::Uuid;

// Fixed namespace so seeded ids stay stable across processes.
const ID_NAMESPACE: Uuid = Uuid::from_u128(0x9a7e_51cc_04d3_4c6e_8b1f_2d90a6f40b17);

/// Generate a fresh opaque id.
pub fn fresh_id() -> String {
    Uuid::new_v4().to_string()
}

/// Generate a deterministic id from seed components. An empty seed falls
/// back to a fresh id.
pub fn seeded_id(parts: &[&str]) -> String {
    if parts.is_empty() {
        return fresh_id();
    }
    Uuid::new_v5(&ID_NAMESPACE, parts.join(":").as_bytes()).to_string()
}

/// Current wall clock as milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_ids_are_unique() {
        assert_ne!(fresh_id(), fresh_id());
    }

    #[test]
    fn seeded_ids_are_deterministic() {
        let a = seeded_id(&["ticket", "t-1"]);
        let b = seeded_id(&["ticket", "t-1"]);
        assert_eq!(a, b);
        assert_ne!(a, seeded_id(&["ticket", "t-2"]));
    }

    #[test]
    fn empty_seed_falls_back_to_fresh() {
        assert_ne!(seeded_id(&[]), seeded_id(&[]));
    }
}
