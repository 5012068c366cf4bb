/// A room the display can be assigned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Room {
    pub name: &'static str,
    pub id: &'static str,
}

pub const UNKNOWN_ROOM_ID: &str = "unknown";

pub const ROOMS: &[Room] = &[
    Room {
        name: "Incubator Future",
        id: "ACIN.Future",
    },
    Room {
        name: "Incubator Energy",
        id: "ACIN.IncubatorEnergy",
    },
    Room {
        name: "Incubator Research",
        id: "ACIN.Research",
    },
];

/// Teams room identity shown under "Call or add".
pub fn room_id(name: &str) -> &'static str {
    ROOMS
        .iter()
        .find(|room| room.name == name)
        .map(|room| room.id)
        .unwrap_or(UNKNOWN_ROOM_ID)
}
