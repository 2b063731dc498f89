pub mod geometry;
pub mod net;
pub mod participant;
pub mod time;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers {
    use crate::geometry::Location;
    use crate::participant::{GroupId, ParticipantId, ParticipantView};

    /// Map used by every fixture location.
    pub const TEST_MAP: u32 = 1;

    /// A location on the test map.
    pub fn at(x: f32, y: f32) -> Location {
        Location::new(TEST_MAP, x, y, 0.0)
    }

    /// A single online, alive, non-GM participant standing at the origin.
    pub fn make_participant(id: ParticipantId, level: u8) -> ParticipantView {
        ParticipantView {
            id,
            name: format!("Hero{id}"),
            level,
            online: true,
            alive: true,
            is_gm: false,
            location: at(0.0, 0.0),
            group: None,
            items: Vec::new(),
        }
    }

    /// Create `n` participants with sequential IDs starting at 1, all in `group`.
    pub fn make_group(n: usize, group: GroupId, level: u8) -> Vec<ParticipantView> {
        (0..n)
            .map(|i| {
                let mut p = make_participant(i as ParticipantId + 1, level);
                p.group = Some(group);
                p
            })
            .collect()
    }
}
