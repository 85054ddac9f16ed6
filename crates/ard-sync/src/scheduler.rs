use api::{
    types::{AccessFlags, Domain},
    Backend,
};
use rustc_hash::FxHashSet;

use crate::{context::Context, resource::ResourceId};

/// Access classes that are valid in shader stages of either domain.
const SHADER_ACCESS: AccessFlags = AccessFlags::UNIFORM_READ
    .union(AccessFlags::SHADER_READ)
    .union(AccessFlags::SHADER_WRITE);

/// Double buffered sets of resources whose barriers must be re-evaluated before the next
/// command in each domain.
///
/// Per domain, one set is live and receives enqueues while the other is empty staging storage.
/// Draining takes the live set and makes the staging set live, so anything re-enqueued while
/// draining lands in the fresh set and is handled on the next drain.
#[derive(Debug, Default)]
pub struct BarrierScheduler {
    sets: [[FxHashSet<ResourceId>; 2]; 2],
    live: [usize; 2],
}

impl BarrierScheduler {
    /// Returns `true` if the resource was not already pending.
    #[inline(always)]
    pub fn enqueue(&mut self, id: ResourceId, domain: Domain) -> bool {
        let d = domain.idx();
        self.sets[d][self.live[d]].insert(id)
    }

    /// Removes the resource from both sets of the domain.
    #[inline(always)]
    pub fn remove(&mut self, id: ResourceId, domain: Domain) {
        let d = domain.idx();
        self.sets[d][0].remove(&id);
        self.sets[d][1].remove(&id);
    }

    #[inline(always)]
    pub fn contains(&self, id: ResourceId, domain: Domain) -> bool {
        let d = domain.idx();
        self.sets[d][0].contains(&id) || self.sets[d][1].contains(&id)
    }

    #[inline(always)]
    pub fn is_pending(&self, domain: Domain) -> bool {
        let d = domain.idx();
        !self.sets[d][self.live[d]].is_empty()
    }

    #[inline(always)]
    pub fn pending(&self, domain: Domain) -> usize {
        let d = domain.idx();
        self.sets[d][self.live[d]].len()
    }

    /// Takes the live set and flips which set is live.
    pub(crate) fn take(&mut self, domain: Domain) -> FxHashSet<ResourceId> {
        let d = domain.idx();
        let drained = std::mem::take(&mut self.sets[d][self.live[d]]);
        self.live[d] ^= 1;
        debug_assert!(self.sets[d][self.live[d]].is_empty());
        drained
    }

    /// Returns a drained set to be reused as staging storage.
    pub(crate) fn restore(&mut self, domain: Domain, mut set: FxHashSet<ResourceId>) {
        let d = domain.idx();
        set.clear();
        self.sets[d][self.live[d] ^ 1] = set;
    }
}

impl<B: Backend> Context<B> {
    /// Records every barrier the pending resources of `domain` need for their current binds.
    pub(crate) fn update_barriers(&mut self, domain: Domain) {
        puffin::profile_function!();

        if !self.scheduler.is_pending(domain) {
            return;
        }

        let d = domain.idx();
        let drained = self.scheduler.take(domain);
        for id in drained.iter().copied() {
            let Some(state) = self.resources.state(id) else {
                continue;
            };

            if state.bind_count[d] == 0 {
                continue;
            }

            let stage = state.bind_stage(domain);
            if state.is_buffer {
                // Shader access classes of the other domain are folded in so the barrier does
                // not have to be repeated when that domain drains. Fixed function classes are
                // only valid for their own stages.
                let access =
                    state.bind_access(domain) | (state.bind_access(domain.other()) & SHADER_ACCESS);
                self.request_buffer_access(id, access, stage);
            } else {
                let layout = state.layout_eval(domain);
                let access = state.bind_access(domain);
                self.request_image_access(id, layout, access, stage);
            }

            // Write binds that alias other binds in the same domain need a barrier before
            // every command.
            if let Some(state) = self.resources.state(id) {
                if state.write_bind_count[d] > 0 && state.bind_count[d] > 1 {
                    self.scheduler.enqueue(id, domain);
                }
            }
        }

        self.scheduler.restore(domain, drained);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: u32) -> ResourceId {
        ResourceId::from_raw(raw)
    }

    #[test]
    fn enqueue_is_idempotent() {
        let mut scheduler = BarrierScheduler::default();
        assert!(scheduler.enqueue(id(1), Domain::Graphics));
        assert!(!scheduler.enqueue(id(1), Domain::Graphics));
        assert_eq!(scheduler.pending(Domain::Graphics), 1);
        assert_eq!(scheduler.pending(Domain::Compute), 0);
    }

    #[test]
    fn enqueue_while_drained_lands_in_live_set() {
        let mut scheduler = BarrierScheduler::default();
        scheduler.enqueue(id(1), Domain::Compute);
        scheduler.enqueue(id(2), Domain::Compute);

        let drained = scheduler.take(Domain::Compute);
        assert_eq!(drained.len(), 2);
        assert!(!scheduler.is_pending(Domain::Compute));

        scheduler.enqueue(id(1), Domain::Compute);
        scheduler.restore(Domain::Compute, drained);
        assert_eq!(scheduler.pending(Domain::Compute), 1);
        assert!(scheduler.contains(id(1), Domain::Compute));
        assert!(!scheduler.contains(id(2), Domain::Compute));
    }

    #[test]
    fn remove_clears_both_sets() {
        let mut scheduler = BarrierScheduler::default();
        scheduler.enqueue(id(3), Domain::Graphics);
        let drained = scheduler.take(Domain::Graphics);
        scheduler.enqueue(id(3), Domain::Graphics);
        scheduler.remove(id(3), Domain::Graphics);
        assert!(!scheduler.contains(id(3), Domain::Graphics));
        scheduler.restore(Domain::Graphics, drained);
        assert!(!scheduler.contains(id(3), Domain::Graphics));
    }
}
