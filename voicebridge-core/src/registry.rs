//! Process-wide room lookup.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use crate::room::Room;
use crate::types::RoomId;

/// Lazily-populated map of room id to room. Rooms are created on first join
/// and retained for the life of the process; the expected room cardinality
/// is small.
#[derive(Default)]
pub struct RoomRegistry {
    rooms: DashMap<RoomId, Arc<Room>>,
}

impl RoomRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomic check-and-insert: concurrent callers for the same id observe
    /// the same room.
    pub fn get_or_create(&self, room_id: &RoomId) -> Arc<Room> {
        let room = self.rooms.entry(room_id.clone()).or_insert_with(|| {
            info!(room_id = %room_id, "room created");
            Room::new(room_id.clone())
        });
        Arc::clone(room.value())
    }

    #[must_use]
    pub fn get(&self, room_id: &RoomId) -> Option<Arc<Room>> {
        self.rooms.get(room_id).map(|r| Arc::clone(r.value()))
    }

    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_or_create_returns_the_same_room() {
        let registry = RoomRegistry::new();
        let id = RoomId::from("lobby");

        let a = registry.get_or_create(&id);
        let b = registry.get_or_create(&id);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.room_count(), 1);
    }

    #[test]
    fn distinct_ids_get_distinct_rooms() {
        let registry = RoomRegistry::new();
        let a = registry.get_or_create(&RoomId::from("a"));
        let b = registry.get_or_create(&RoomId::from("b"));
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(registry.room_count(), 2);
    }

    #[test]
    fn get_misses_unknown_rooms() {
        let registry = RoomRegistry::new();
        assert!(registry.get(&RoomId::from("nope")).is_none());
    }
}
