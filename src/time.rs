use chrono::Utc;

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Timestamp for an update that must sort strictly after `prev`.
pub fn now_after(prev: i64) -> i64 {
    now_ms().max(prev + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_ms_is_reasonable() {
        let a = now_ms();
        assert!(a > 1_500_000_000_000); // after 2017
        assert!(a < 4_100_000_000_000); // before year ~2100
    }

    #[test]
    fn now_after_always_advances() {
        let future = now_ms() + 60_000;
        assert_eq!(now_after(future), future + 1);
        let past = now_ms() - 60_000;
        assert!(now_after(past) > past);
    }
}
