// Identifier helpers.
//
// Persisted rows (refresh token records, security events) use UUIDv7 so
// they sort by creation time. Token `jti` claims use random v4 ids so they
// carry no timing information.

use uuid::Uuid;

/// Generate a new UUIDv7 (timestamp-sortable).
pub fn uuidv7() -> Uuid {
    Uuid::now_v7()
}

/// Generate a random token identifier for the `jti` claim.
pub fn token_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuidv7_is_valid() {
        let id = uuidv7();
        assert_eq!(id.get_version(), Some(uuid::Version::SortRand));
    }

    #[test]
    fn token_ids_are_unique() {
        assert_ne!(token_id(), token_id());
    }
}
