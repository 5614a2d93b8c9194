//! Realtime presence and fan-out layer.

pub mod bridge;
pub mod events;
pub mod presence;
pub mod rooms;
pub mod router;
pub mod server;

use ulid::Ulid;

/// Generate an opaque connection identifier (`sock_` prefixed ULID).
pub fn connection_id() -> String {
    format!("sock_{}", Ulid::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_ids_are_prefixed_and_unique() {
        let a = connection_id();
        let b = connection_id();
        assert!(a.starts_with("sock_"));
        assert_eq!(a.len(), 5 + 26);
        assert_ne!(a, b);
    }
}
