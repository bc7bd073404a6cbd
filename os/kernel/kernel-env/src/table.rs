use crate::{Env, EnvId};
use alloc::vec::Vec;
use kernel_info::env::NENV;

struct Slot {
    /// Id of the most recent tenant; seeds the next generation.
    last_id: EnvId,
    env: Option<Env>,
}

/// Fixed-capacity arena of environment slots.
///
/// Free slots are handed out last-freed first, slot 0 first after boot.
/// Lookups by id check the generation, so stale ids miss.
pub struct EnvTable {
    slots: Vec<Slot>,
    free: Vec<usize>,
}

impl EnvTable {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.min(NENV);
        let slots = (0..capacity)
            .map(|_| Slot {
                last_id: EnvId::default(),
                env: None,
            })
            .collect();
        Self {
            slots,
            free: (0..capacity).rev().collect(),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of live environments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The id the next [`insert`](Self::insert) must use, or `None` when full.
    #[must_use]
    pub fn next_id(&self) -> Option<EnvId> {
        let &index = self.free.last()?;
        Some(EnvId::next(self.slots[index].last_id, index))
    }

    /// Occupy the slot named by `env.id`, which must come from
    /// [`next_id`](Self::next_id).
    pub(crate) fn insert(&mut self, env: Env) {
        let index = env.id.index();
        if self.free.last() == Some(&index) {
            self.free.pop();
        } else {
            self.free.retain(|&i| i != index);
        }
        let slot = &mut self.slots[index];
        slot.last_id = env.id;
        slot.env = Some(env);
    }

    /// Vacate the slot holding `id`.
    pub(crate) fn remove(&mut self, id: EnvId) -> Option<Env> {
        let slot = self.slots.get_mut(id.index())?;
        if slot.env.as_ref().is_none_or(|e| e.id != id) {
            return None;
        }
        let env = slot.env.take();
        self.free.push(id.index());
        env
    }

    #[must_use]
    pub fn get(&self, id: EnvId) -> Option<&Env> {
        self.slots
            .get(id.index())?
            .env
            .as_ref()
            .filter(|e| e.id == id)
    }

    pub(crate) fn get_mut(&mut self, id: EnvId) -> Option<&mut Env> {
        self.slots
            .get_mut(id.index())?
            .env
            .as_mut()
            .filter(|e| e.id == id)
    }

    /// The environment in slot `index`, whatever its id.
    #[must_use]
    pub fn slot(&self, index: usize) -> Option<&Env> {
        self.slots.get(index)?.env.as_ref()
    }

    /// Live environments in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &Env> + '_ {
        self.slots.iter().filter_map(|s| s.env.as_ref())
    }
}
