use crate::{
    error::{Error, HandleKind, Result},
    memory::Address,
};

/// Generation-checked reference into a [`HandleTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleId {
    index: u32,
    generation: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entry {
    Parser {
        addr: Address,
        language: Option<Address>,
    },
    Tree {
        addr: Address,
    },
    Node {
        addr: Address,
    },
}

impl Entry {
    pub const fn kind(&self) -> HandleKind {
        match self {
            Self::Parser { .. } => HandleKind::Parser,
            Self::Tree { .. } => HandleKind::Tree,
            Self::Node { .. } => HandleKind::Node,
        }
    }

    pub const fn addr(&self) -> Address {
        match self {
            Self::Parser { addr, .. } | Self::Tree { addr } | Self::Node { addr } => *addr,
        }
    }
}

struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

/// Live guest objects of one instance. Removing an entry bumps the slot
/// generation, so every outstanding [`HandleId`] for it stops resolving even
/// if the guest later hands out the same address again.
#[derive(Default)]
pub struct HandleTable {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

impl HandleTable {
    pub fn insert(&mut self, entry: Entry) -> HandleId {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.entry = Some(entry);
            return HandleId {
                index,
                generation: slot.generation,
            };
        }

        // Every live entry owns a distinct guest allocation, so the slot count
        // stays below the 32-bit address space.
        #[allow(clippy::cast_possible_truncation)]
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            entry: Some(entry),
        });
        HandleId {
            index,
            generation: 0,
        }
    }

    pub fn get_mut(&mut self, id: HandleId, kind: HandleKind) -> Result<&mut Entry> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.entry.as_mut())
            .filter(|entry| entry.kind() == kind)
            .ok_or(Error::UseAfterFree { kind })
    }

    pub fn get(&mut self, id: HandleId, kind: HandleKind) -> Result<Entry> {
        self.get_mut(id, kind).map(|entry| *entry)
    }

    /// Invalidates `id` and returns what it referred to.
    pub fn remove(&mut self, id: HandleId, kind: HandleKind) -> Result<Entry> {
        let entry = self.get(id, kind)?;
        let slot = &mut self.slots[id.index as usize];
        slot.entry = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.live -= 1;
        Ok(entry)
    }

    pub const fn len(&self) -> usize {
        self.live
    }
}
