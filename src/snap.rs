//! Snap-point index: grouped, enable-able time markers for quick navigation.

use crate::time::Ticks;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// Opaque consumer-defined data attached to a snap point.
pub type SnapData = Arc<dyn Any + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SnapPointId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SnapGroupId(u64);

/// A time marker. Navigable only while both its own `enabled` flag and its
/// group's (if any) are set.
#[derive(Clone)]
pub struct SnapPoint {
    pub id: SnapPointId,
    pub position: Ticks,
    pub data: Option<SnapData>,
    pub enabled: bool,
    pub group: Option<SnapGroupId>,
}

struct SnapGroup {
    enabled: bool,
}

/// Key identifying a generated group, so generators stay idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum GeneratorKey {
    Grid(u64),
    NoteStarts,
    NoteEnds,
}

/// Navigation direction relative to the current position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SnapDirection {
    First,
    Next,
    Previous,
}

/// Registry of snap points and their groups.
#[derive(Default)]
pub(crate) struct SnapPoints {
    points: Vec<SnapPoint>,
    groups: HashMap<SnapGroupId, SnapGroup>,
    generated: HashMap<GeneratorKey, SnapGroupId>,
    next_point: u64,
    next_group: u64,
}

impl SnapPoints {
    pub fn add(&mut self, position: Ticks, data: Option<SnapData>) -> SnapPointId {
        self.add_in_group(position, data, None)
    }

    fn add_in_group(
        &mut self,
        position: Ticks,
        data: Option<SnapData>,
        group: Option<SnapGroupId>,
    ) -> SnapPointId {
        let id = SnapPointId(self.next_point);
        self.next_point += 1;
        self.points.push(SnapPoint {
            id,
            position,
            data,
            enabled: true,
            group,
        });
        id
    }

    pub fn remove(&mut self, id: SnapPointId) -> bool {
        let before = self.points.len();
        self.points.retain(|p| p.id != id);
        self.points.len() != before
    }

    /// Remove every point whose data matches the predicate. Points without
    /// data are kept.
    pub fn remove_by(&mut self, predicate: impl Fn(&SnapData) -> bool) {
        self.points
            .retain(|p| !p.data.as_ref().is_some_and(|d| predicate(d)));
    }

    /// Remove all points, groups and generator caches.
    pub fn clear(&mut self) {
        self.points.clear();
        self.groups.clear();
        self.generated.clear();
    }

    pub fn set_point_enabled(&mut self, id: SnapPointId, enabled: bool) -> bool {
        match self.points.iter_mut().find(|p| p.id == id) {
            Some(point) => {
                point.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Toggle a whole group without touching member flags.
    pub fn set_group_enabled(&mut self, id: SnapGroupId, enabled: bool) -> bool {
        match self.groups.get_mut(&id) {
            Some(group) => {
                group.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Idempotent generator: the first call creates the group, later calls
    /// with the same key refresh its members in place and return the same
    /// group.
    pub fn generate(&mut self, key: GeneratorKey, positions: impl IntoIterator<Item = Ticks>) -> SnapGroupId {
        let group_id = match self.generated.get(&key) {
            Some(&existing) => {
                self.points.retain(|p| p.group != Some(existing));
                existing
            }
            None => {
                let id = SnapGroupId(self.next_group);
                self.next_group += 1;
                self.groups.insert(id, SnapGroup { enabled: true });
                self.generated.insert(key, id);
                id
            }
        };
        for position in positions {
            self.add_in_group(position, None, Some(group_id));
        }
        group_id
    }

    fn effective(&self, point: &SnapPoint) -> bool {
        point.enabled
            && point
                .group
                .map(|g| self.groups.get(&g).is_some_and(|group| group.enabled))
                .unwrap_or(true)
    }

    /// Best candidate position in `direction` from `from`, among effectively
    /// enabled points accepted by `filter`.
    pub fn resolve(
        &self,
        direction: SnapDirection,
        from: Ticks,
        filter: impl Fn(&SnapPoint) -> bool,
    ) -> Option<Ticks> {
        let candidates = self
            .points
            .iter()
            .filter(|p| self.effective(p) && filter(p))
            .map(|p| p.position);
        match direction {
            SnapDirection::First => candidates.min(),
            SnapDirection::Next => candidates.filter(|p| *p > from).min(),
            SnapDirection::Previous => candidates.filter(|p| *p < from).max(),
        }
    }
}
