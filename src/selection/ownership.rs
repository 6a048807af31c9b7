//! Who owns which selection, as far as this process knows.
//!
//! The table mirrors successful claims made through the transport. It holds
//! at most one record per `(display, selection)`; claiming a held selection
//! updates the record in place and hands back the previous owner so the
//! caller can tell it about the loss.

use btk_selection_backends::Timestamp;
use btk_selection_core::{Atom, DisplayId};

/// One owned selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerRecord<O> {
    /// Display the selection lives on
    pub display: DisplayId,
    /// The selection
    pub selection: Atom,
    /// Current owner
    pub owner: O,
    /// Time the ownership was acquired
    pub time: Timestamp,
}

/// In-process selection ownership records.
#[derive(Debug, Clone)]
pub struct OwnershipTable<O> {
    records: Vec<OwnerRecord<O>>,
}

impl<O> Default for OwnershipTable<O> {
    fn default() -> Self {
        Self { records: Vec::new() }
    }
}

impl<O: Clone + PartialEq> OwnershipTable<O> {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Record for `(display, selection)`, if owned here.
    pub fn get(&self, display: DisplayId, selection: Atom) -> Option<&OwnerRecord<O>> {
        self.records
            .iter()
            .find(|r| r.display == display && r.selection == selection)
    }

    /// Current owner of `(display, selection)`.
    pub fn owner(&self, display: DisplayId, selection: Atom) -> Option<O> {
        self.get(display, selection).map(|r| r.owner.clone())
    }

    /// Acquisition time if `owner` holds `(display, selection)`.
    pub fn time_owned_by(&self, display: DisplayId, selection: Atom, owner: &O) -> Option<Timestamp> {
        self.get(display, selection)
            .filter(|r| r.owner == *owner)
            .map(|r| r.time)
    }

    /// Record `owner` for `(display, selection)`; returns the previous owner.
    pub fn claim(&mut self, display: DisplayId, selection: Atom, owner: O, time: Timestamp) -> Option<O> {
        match self
            .records
            .iter_mut()
            .find(|r| r.display == display && r.selection == selection)
        {
            Some(record) => {
                let previous = std::mem::replace(&mut record.owner, owner);
                record.time = time;
                Some(previous)
            }
            None => {
                self.records.push(OwnerRecord {
                    display,
                    selection,
                    owner,
                    time,
                });
                None
            }
        }
    }

    /// Drop the record for `(display, selection)`.
    pub fn release(&mut self, display: DisplayId, selection: Atom) -> Option<OwnerRecord<O>> {
        let index = self
            .records
            .iter()
            .position(|r| r.display == display && r.selection == selection)?;
        Some(self.records.remove(index))
    }

    /// Drop the record only if `owner` holds it.
    pub fn release_if_owner(&mut self, display: DisplayId, selection: Atom, owner: &O) -> bool {
        let before = self.records.len();
        self.records
            .retain(|r| !(r.display == display && r.selection == selection && r.owner == *owner));
        before != self.records.len()
    }

    /// Drop every record held by `owner`, returning them.
    pub fn release_owner(&mut self, owner: &O) -> Vec<OwnerRecord<O>> {
        let (released, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.records)
            .into_iter()
            .partition(|r| r.owner == *owner);
        self.records = kept;
        released
    }

    /// All records
    pub fn iter(&self) -> impl Iterator<Item = &OwnerRecord<O>> {
        self.records.iter()
    }

    /// Number of owned selections
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True if nothing is owned
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
