//! Correlation identifiers for turns and the calls made within them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

/// Generate a unique identifier for one user turn.
pub fn generate_turn_id() -> String {
    let ts = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    // Counter disambiguates turns started within the same clock tick.
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let count = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("turn-{ts:x}-{count:04x}")
}

/// Correlation id linking the `round`th call of a turn to its result.
pub fn generate_call_id(turn_id: &str, round: u32) -> String {
    format!("{turn_id}:call{round}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turn_id_unique() {
        let id1 = generate_turn_id();
        let id2 = generate_turn_id();
        assert_ne!(id1, id2);
        assert!(id1.starts_with("turn-"));
    }

    #[test]
    fn call_id_includes_round() {
        let turn = "turn-abc123-0000";
        let id = generate_call_id(turn, 3);
        assert!(id.ends_with("call3"));
        assert!(id.starts_with(turn));
    }
}
