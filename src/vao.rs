//! Vertex array cache.
//!
//! Building a vertex array means one attribute call per bound location, so arrays are kept per
//! (context, program, vertex buffers, instance buffers) and reused by later draws. Entries are
//! purged when a buffer or program they reference is destroyed.

use std::collections::HashMap;

use crate::backend::{BufferId, ProgramId, VertexArrayId};
use crate::context::ContextId;

/// Everything a cached vertex array depends on.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub(crate) struct VertexDescription {
    pub context: ContextId,
    pub program: ProgramId,
    pub vertex_buffers: Vec<BufferId>,
    pub instance_buffers: Vec<BufferId>,
}

impl VertexDescription {
    fn uses_buffer(&self, buffer: BufferId) -> bool {
        self.vertex_buffers.contains(&buffer) || self.instance_buffers.contains(&buffer)
    }
}

#[derive(Debug, Default)]
pub(crate) struct VaoCache {
    entries: HashMap<VertexDescription, VertexArrayId>,
}

impl VaoCache {
    pub(crate) fn get(&self, description: &VertexDescription) -> Option<VertexArrayId> {
        self.entries.get(description).copied()
    }

    pub(crate) fn insert(&mut self, description: VertexDescription, vertex_array: VertexArrayId) {
        self.entries.insert(description, vertex_array);
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    fn evict<F>(&mut self, mut stale: F) -> Vec<VertexArrayId>
    where
        F: FnMut(&VertexDescription) -> bool,
    {
        let mut evicted = Vec::new();
        self.entries.retain(|description, &mut vao| {
            if stale(description) {
                evicted.push(vao);
                false
            } else {
                true
            }
        });
        evicted
    }

    /// Remove every entry reading from `buffer`, returning the arrays to delete.
    pub(crate) fn evict_buffer(&mut self, buffer: BufferId) -> Vec<VertexArrayId> {
        self.evict(|description| description.uses_buffer(buffer))
    }

    /// Remove every entry built for `program`, returning the arrays to delete.
    pub(crate) fn evict_program(&mut self, program: ProgramId) -> Vec<VertexArrayId> {
        self.evict(|description| description.program == program)
    }

    pub(crate) fn clear(&mut self) -> Vec<VertexArrayId> {
        self.entries.drain().map(|(_, vao)| vao).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SoftBackend;
    use crate::config::DriverConfiguration;
    use crate::context::GraphicsContext;

    fn description(context: ContextId, program: u32, vertex: &[u32], instance: &[u32]) -> VertexDescription {
        VertexDescription {
            context,
            program: ProgramId(program),
            vertex_buffers: vertex.iter().map(|&b| BufferId(b)).collect(),
            instance_buffers: instance.iter().map(|&b| BufferId(b)).collect(),
        }
    }

    #[test]
    fn eviction_by_buffer_and_program() {
        let ctx = GraphicsContext::new(
            Box::new(SoftBackend::new(1, 1)),
            DriverConfiguration::default(),
        )
        .unwrap();
        let id = ctx.id();

        let mut cache = VaoCache::default();
        cache.insert(description(id, 1, &[1, 2], &[]), VertexArrayId(1));
        cache.insert(description(id, 1, &[3], &[2]), VertexArrayId(2));
        cache.insert(description(id, 2, &[3], &[]), VertexArrayId(3));

        let mut evicted = cache.evict_buffer(BufferId(2));
        evicted.sort();
        assert_eq!(evicted, vec![VertexArrayId(1), VertexArrayId(2)]);
        assert_eq!(cache.len(), 1);

        assert_eq!(cache.evict_program(ProgramId(1)), vec![]);
        assert_eq!(cache.evict_program(ProgramId(2)), vec![VertexArrayId(3)]);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn buffer_order_is_part_of_the_key() {
        let ctx = GraphicsContext::new(
            Box::new(SoftBackend::new(1, 1)),
            DriverConfiguration::default(),
        )
        .unwrap();

        let mut cache = VaoCache::default();
        cache.insert(description(ctx.id(), 1, &[1, 2], &[]), VertexArrayId(7));

        assert_eq!(cache.get(&description(ctx.id(), 1, &[1, 2], &[])), Some(VertexArrayId(7)));
        assert_eq!(cache.get(&description(ctx.id(), 1, &[2, 1], &[])), None);
        assert_eq!(cache.get(&description(ctx.id(), 1, &[1], &[2])), None);
    }
}
