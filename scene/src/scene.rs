use log::debug;
use rtaccel_bvh::{Aabb, Geometry};

use crate::{CurveSet, SceneError, TriangleMesh};

pub type ProgressCallback = Box<dyn Fn(usize) + Send + Sync>;

/// Contents of one geometry slot.
#[derive(Debug, Clone)]
pub enum Object {
    Mesh(TriangleMesh),
    Curves(CurveSet),
}

impl Object {
    pub fn bounds(&self) -> Aabb {
        match self {
            Object::Mesh(mesh) => mesh.bounds(),
            Object::Curves(curves) => curves.bounds(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Object::Mesh(mesh) => mesh.len(),
            Object::Curves(curves) => curves.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
struct Slot {
    object: Option<Object>,
    enabled: bool,
}

/// Geometry container handed to acceleration structures. Geometry ids are
/// slot indices; removed slots are reused by later additions.
pub struct Scene {
    slots: Vec<Slot>,
    empty_slots: Vec<usize>,
    is_static: bool,
    dirty: bool,
    progress: Option<ProgressCallback>,
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

impl Scene {
    pub fn new() -> Scene {
        Scene {
            slots: Vec::new(),
            empty_slots: Vec::new(),
            is_static: true,
            dirty: false,
            progress: None,
        }
    }

    /// Dynamic scenes keep build data around for fast rebuilds.
    pub fn set_static(&mut self, is_static: bool) {
        self.is_static = is_static;
    }

    pub fn set_progress_callback<F: Fn(usize) + Send + Sync + 'static>(&mut self, callback: F) {
        self.progress = Some(Box::new(callback));
    }

    pub fn add_object(&mut self, object: Object) -> usize {
        self.dirty = true;
        let slot = Slot {
            object: Some(object),
            enabled: true,
        };

        if let Some(index) = self.empty_slots.pop() {
            self.slots[index] = slot;
            return index;
        }

        self.slots.push(slot);
        self.slots.len() - 1
    }

    pub fn add_mesh(&mut self, mesh: TriangleMesh) -> usize {
        self.add_object(Object::Mesh(mesh))
    }

    pub fn add_curves(&mut self, curves: CurveSet) -> usize {
        self.add_object(Object::Curves(curves))
    }

    fn slot_mut(&mut self, index: usize) -> Result<&mut Slot, SceneError> {
        match self.slots.get_mut(index) {
            Some(slot) if slot.object.is_some() => Ok(slot),
            _ => Err(SceneError::NoSuchObject(index)),
        }
    }

    pub fn set_object(&mut self, index: usize, object: Object) -> Result<(), SceneError> {
        self.slot_mut(index)?.object = Some(object);
        self.dirty = true;
        Ok(())
    }

    pub fn remove_object(&mut self, index: usize) -> Result<Object, SceneError> {
        let slot = self.slot_mut(index)?;
        let object = slot.object.take().ok_or(SceneError::NoSuchObject(index))?;
        slot.enabled = false;
        self.empty_slots.push(index);
        self.dirty = true;
        debug!("removed object {}, slot free for reuse", index);
        Ok(object)
    }

    pub fn get_object(&self, index: usize) -> Option<&Object> {
        self.slots.get(index).and_then(|slot| slot.object.as_ref())
    }

    /// Disabled objects keep their id but are invisible to builds.
    pub fn set_enabled(&mut self, index: usize, enabled: bool) -> Result<(), SceneError> {
        let slot = self.slot_mut(index)?;
        if slot.enabled != enabled {
            slot.enabled = enabled;
            self.dirty = true;
        }
        Ok(())
    }

    pub fn is_enabled(&self, index: usize) -> bool {
        self.slots.get(index).map_or(false, |slot| slot.enabled && slot.object.is_some())
    }

    /// Number of live objects.
    pub fn len(&self) -> usize {
        self.slots.len() - self.empty_slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bounds(&self) -> Aabb {
        self.slots
            .iter()
            .filter(|slot| slot.enabled)
            .filter_map(|slot| slot.object.as_ref())
            .map(|object| object.bounds())
            .collect()
    }

    /// True when objects changed since the last [`mark_clean`](Self::mark_clean).
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }
}

impl rtaccel_bvh::Scene for Scene {
    fn geometry_count(&self) -> usize {
        self.slots.len()
    }

    fn geometry(&self, geom_id: u32) -> Option<Geometry<'_>> {
        let slot = self.slots.get(geom_id as usize)?;
        if !slot.enabled {
            return None;
        }
        match slot.object.as_ref()? {
            Object::Mesh(mesh) => Some(Geometry::Triangles(mesh)),
            Object::Curves(curves) => Some(Geometry::Curves(curves)),
        }
    }

    fn is_static(&self) -> bool {
        self.is_static
    }

    fn progress(&self, primitives: usize) {
        if let Some(callback) = &self.progress {
            callback(primitives);
        }
    }
}
