use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Message identity: a time-ordered UUIDv7.
///
/// The embedded creation time is what acknowledgements use to compute round trips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Uid(Uuid);

impl Uid {
    /// Generate a fresh identity stamped with the current time.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Rebuild an identity from its wire bytes.
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// The 16 wire bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Creation time embedded in the identity, if it carries one.
    pub fn created_at(&self) -> Option<SystemTime> {
        let (secs, nanos) = self.0.get_timestamp()?.to_unix();
        Some(UNIX_EPOCH + Duration::new(secs, nanos))
    }

    /// Time since the identity was created; zero if the clock went backwards
    /// or the identity has no timestamp.
    pub fn elapsed(&self) -> Duration {
        self.created_at()
            .and_then(|created| SystemTime::now().duration_since(created).ok())
            .unwrap_or(Duration::ZERO)
    }
}

impl Default for Uid {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for Uid {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uids_are_unique() {
        let uids: std::collections::HashSet<Uid> = (0..1000).map(|_| Uid::new()).collect();
        assert_eq!(uids.len(), 1000);
    }

    #[test]
    fn test_bytes_roundtrip() {
        let uid = Uid::new();
        assert_eq!(Uid::from_bytes(*uid.as_bytes()), uid);
    }

    #[test]
    fn test_embedded_timestamp() {
        let before = SystemTime::now() - Duration::from_millis(2);
        let uid = Uid::new();
        let created = uid.created_at().expect("v7 carries a timestamp");
        assert!(created >= before);
        assert!(uid.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_elapsed_without_timestamp_is_zero() {
        let uid = Uid::from(Uuid::nil());
        assert_eq!(uid.elapsed(), Duration::ZERO);
    }

    #[test]
    fn test_serde_as_uuid_string() {
        let uid = Uid::new();
        let json = serde_json::to_string(&uid).unwrap();
        assert_eq!(json, format!("\"{uid}\""));
        let back: Uid = serde_json::from_str(&json).unwrap();
        assert_eq!(back, uid);
    }
}
