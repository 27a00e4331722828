//! Position to parcel to topic hashing.
//!
//! Parcels are 16 m squares. Topics are 4x4 parcel cells named `"cx:cz"`,
//! where the cell index is computed on parcel coordinates shifted by the
//! world half-size so that every index is non-negative.

use commlink_core::protocol::Position;

pub const PARCEL_SIZE: f32 = 16.0;

/// World half-size in parcels.
pub const MAX_PARCEL: i32 = 150;

/// log2 of the topic cell width in parcels.
pub const TOPIC_CELL_SHIFT: i32 = 2;

pub const DEFAULT_COMM_RADIUS: i32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Parcel {
    pub x: i32,
    pub z: i32,
}

impl Parcel {
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Topic cell containing this parcel.
    pub fn cell(self) -> (i32, i32) {
        (
            (self.x + MAX_PARCEL) >> TOPIC_CELL_SHIFT,
            (self.z + MAX_PARCEL) >> TOPIC_CELL_SHIFT,
        )
    }

    pub fn topic(self) -> String {
        let (cx, cz) = self.cell();
        format!("{cx}:{cz}")
    }
}

pub fn position_to_parcel(position: &Position) -> Parcel {
    Parcel {
        x: (position.position_x / PARCEL_SIZE).floor() as i32,
        z: (position.position_z / PARCEL_SIZE).floor() as i32,
    }
}

/// Topic of the cell the position falls in.
pub fn position_hash(position: &Position) -> String {
    position_to_parcel(position).topic()
}

/// Parcel rectangle within `radius` of a center parcel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommunicationArea {
    pub min: Parcel,
    pub max: Parcel,
}

impl CommunicationArea {
    pub fn new(center: Parcel, radius: i32) -> Self {
        let r = radius.max(0);
        Self {
            min: Parcel::new(center.x - r, center.z - r),
            max: Parcel::new(center.x + r, center.z + r),
        }
    }

    pub fn contains(&self, parcel: Parcel) -> bool {
        (self.min.x..=self.max.x).contains(&parcel.x) && (self.min.z..=self.max.z).contains(&parcel.z)
    }

    /// Every topic cell overlapping the rectangle, row-major.
    pub fn topics(&self) -> Vec<String> {
        let (min_cx, min_cz) = self.min.cell();
        let (max_cx, max_cz) = self.max.cell();
        let mut out = Vec::new();
        for cx in min_cx..=max_cx {
            for cz in min_cz..=max_cz {
                out.push(format!("{cx}:{cz}"));
            }
        }
        out
    }
}

/// Topics a peer at `position` must be subscribed to: the island first (if
/// any), then the grid cells of its communication area. No duplicates.
pub fn topics_for(position: &Position, radius: i32, island: Option<&str>) -> Vec<String> {
    let area = CommunicationArea::new(position_to_parcel(position), radius);
    let mut topics: Vec<String> = Vec::new();
    if let Some(island) = island.filter(|i| !i.is_empty()) {
        topics.push(island.to_string());
    }
    for topic in area.topics() {
        if !topics.contains(&topic) {
            topics.push(topic);
        }
    }
    topics
}
