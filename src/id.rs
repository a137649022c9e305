use uuid::Uuid;

/// Time-ordered ids; insertion order and id order agree for fresh records.
pub fn new_uuid_v7() -> String {
    Uuid::now_v7().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_parse_and_differ() {
        let a = new_uuid_v7();
        let b = new_uuid_v7();
        assert!(Uuid::parse_str(&a).is_ok());
        assert_ne!(a, b);
    }
}
