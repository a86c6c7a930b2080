//! The fixed-capacity note table.
//!
//! A slot's identity is its index. Slots move `Free → Active` on create,
//! stay `Active` on update and return to `Free` on delete. Deleting does not
//! erase the record; the inactive flag alone hides it, and the next create
//! that picks the slot overwrites every field.
//!
//! Nothing here locks. Callers hold the segment lock around every call, so
//! each operation is atomic with respect to other processes.

use crate::bounded::{Author, NoteText, Timestamp};
use crate::error::NoteError;
use crate::layout::{MAX_NOTES, NoteRecord};

/// An owned snapshot of one active note.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note {
    pub index: usize,
    pub author: Author,
    pub timestamp: Timestamp,
    pub text: NoteText,
}

/// The slots as laid out in the segment.
#[repr(transparent)]
#[derive(Clone, Copy)]
pub struct NoteTable {
    slots: [NoteRecord; MAX_NOTES],
}

impl NoteTable {
    /// All slots free.
    pub const EMPTY: Self = Self {
        slots: [NoteRecord::EMPTY; MAX_NOTES],
    };

    pub const fn capacity(&self) -> usize {
        MAX_NOTES
    }

    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_active()).count()
    }

    /// Free every slot whose rewrite was cut short by a dying lock holder
    /// and return their indices.
    ///
    /// Only meaningful right after a recovered lock acquisition; a live
    /// holder never leaves a slot mid-rewrite.
    pub fn drop_torn(&mut self) -> Vec<usize> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter(|(_, slot)| slot.is_torn())
            .map(|(index, slot)| {
                slot.vacate();
                index
            })
            .collect()
    }

    /// Leave the slot at `index` as a writer that died mid-rewrite would.
    #[cfg(test)]
    pub(crate) fn tear(&mut self, index: usize) {
        self.slots[index].begin_rewrite();
    }

    /// The active note at `index`, if any.
    pub fn get(&self, index: usize) -> Option<Note> {
        self.slots
            .get(index)
            .filter(|slot| slot.is_active())
            .map(|slot| slot.to_note(index))
    }

    /// Every active note in index order.
    pub fn snapshot(&self) -> Vec<Note> {
        self.active().map(|(index, slot)| slot.to_note(index)).collect()
    }

    /// Active notes written by `author`, in index order.
    pub fn snapshot_by(&self, author: &Author) -> Vec<Note> {
        self.active()
            .filter(|(_, slot)| slot.is_owned_by(author))
            .map(|(index, slot)| slot.to_note(index))
            .collect()
    }

    /// Store a new note in the lowest free slot.
    pub fn create(
        &mut self,
        author: &Author,
        text: &NoteText,
        stamp: &Timestamp,
    ) -> Result<usize, NoteError> {
        let index = self
            .slots
            .iter()
            .position(|slot| !slot.is_active())
            .ok_or(NoteError::Full)?;
        self.slots[index].occupy(author, text, stamp);
        Ok(index)
    }

    /// Replace the text of a note owned by `author`.
    pub fn update(
        &mut self,
        index: usize,
        author: &Author,
        text: &NoteText,
        stamp: &Timestamp,
    ) -> Result<(), NoteError> {
        self.owned_slot_mut(index, author)?.rewrite(text, stamp);
        Ok(())
    }

    /// Free a note owned by `author`.
    pub fn delete(&mut self, index: usize, author: &Author) -> Result<(), NoteError> {
        self.owned_slot_mut(index, author)?.vacate();
        Ok(())
    }

    fn owned_slot_mut(&mut self, index: usize, author: &Author) -> Result<&mut NoteRecord, NoteError> {
        let slot = self
            .slots
            .get_mut(index)
            .filter(|slot| slot.is_active())
            .ok_or(NoteError::NotFound { index })?;
        if !slot.is_owned_by(author) {
            return Err(NoteError::Unauthorized { index });
        }
        Ok(slot)
    }

    fn active(&self) -> impl Iterator<Item = (usize, &NoteRecord)> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_active())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn author(name: &str) -> Author {
        Author::new(name).unwrap()
    }

    fn text(body: &str) -> NoteText {
        NoteText::new(body).unwrap()
    }

    fn stamp(s: &str) -> Timestamp {
        Timestamp::new(s).unwrap()
    }

    #[test]
    fn create_list_delete_round_trip() {
        let mut table = NoteTable::EMPTY;
        let alice = author("alice");
        let at = stamp("2024-05-01 09:30");

        let index = table.create(&alice, &text("hello"), &at).unwrap();
        assert_eq!(index, 0);
        assert_eq!(
            table.snapshot(),
            vec![Note {
                index,
                author: alice.clone(),
                timestamp: at.clone(),
                text: text("hello"),
            }]
        );

        table.delete(index, &alice).unwrap();
        assert!(table.snapshot().is_empty());
        assert_eq!(table.get(index), None);
    }

    #[test]
    fn consecutive_snapshots_are_identical() {
        let mut table = NoteTable::EMPTY;
        let at = stamp("2024-05-01 09:30");
        table.create(&author("a"), &text("one"), &at).unwrap();
        table.create(&author("b"), &text("two"), &at).unwrap();
        assert_eq!(table.snapshot(), table.snapshot());
    }

    #[test]
    fn twenty_first_create_is_full() {
        let mut table = NoteTable::EMPTY;
        let at = stamp("2024-05-01 09:30");
        for i in 0..MAX_NOTES {
            let index = table
                .create(&author("alice"), &text(&format!("note {i}")), &at)
                .unwrap();
            assert_eq!(index, i);
        }
        let before = table.snapshot();

        assert_eq!(
            table.create(&author("bob"), &text("overflow"), &at),
            Err(NoteError::Full)
        );
        assert_eq!(table.active_count(), MAX_NOTES);
        assert_eq!(table.snapshot(), before);
    }

    #[test]
    fn foreign_author_is_rejected() {
        let mut table = NoteTable::EMPTY;
        let alice = author("alice");
        let bob = author("bob");
        let at = stamp("2024-05-01 09:30");
        let index = table.create(&alice, &text("mine"), &at).unwrap();
        let before = table.get(index);

        let later = stamp("2024-05-02 10:00");
        assert_eq!(
            table.update(index, &bob, &text("x"), &later),
            Err(NoteError::Unauthorized { index })
        );
        assert_eq!(table.delete(index, &bob), Err(NoteError::Unauthorized { index }));
        assert_eq!(table.get(index), before);
    }

    #[test]
    fn lowest_free_index_is_reused() {
        let mut table = NoteTable::EMPTY;
        let alice = author("alice");
        let at = stamp("2024-05-01 09:30");
        for _ in 0..3 {
            table.create(&alice, &text("n"), &at).unwrap();
        }
        table.delete(1, &alice).unwrap();

        assert_eq!(table.create(&author("bob"), &text("fresh"), &at), Ok(1));
        let reused = table.get(1).unwrap();
        assert_eq!(reused.author, "bob");
        assert_eq!(reused.text, "fresh");
    }

    #[test]
    fn update_keeps_author_and_refreshes_timestamp() {
        let mut table = NoteTable::EMPTY;
        let alice = author("alice");
        let index = table
            .create(&alice, &text("draft"), &stamp("2024-05-01 09:30"))
            .unwrap();

        table
            .update(index, &alice, &text("final"), &stamp("2024-05-01 11:45"))
            .unwrap();

        let note = table.get(index).unwrap();
        assert_eq!(note.author, "alice");
        assert_eq!(note.text, "final");
        assert_eq!(note.timestamp, "2024-05-01 11:45");
    }

    #[test]
    fn shorter_update_leaves_no_stale_tail() {
        let mut table = NoteTable::EMPTY;
        let alice = author("alice");
        let at = stamp("2024-05-01 09:30");
        let index = table.create(&alice, &text("a much longer body"), &at).unwrap();
        table.update(index, &alice, &text("short"), &at).unwrap();
        assert_eq!(table.get(index).unwrap().text, "short");
    }

    #[test]
    fn missing_slots_are_not_found() {
        let mut table = NoteTable::EMPTY;
        let alice = author("alice");
        let at = stamp("2024-05-01 09:30");

        assert_eq!(
            table.update(MAX_NOTES, &alice, &text("x"), &at),
            Err(NoteError::NotFound { index: MAX_NOTES })
        );
        assert_eq!(table.delete(3, &alice), Err(NoteError::NotFound { index: 3 }));
    }

    #[test]
    fn deleted_note_is_hidden_from_every_operation() {
        let mut table = NoteTable::EMPTY;
        let alice = author("alice");
        let at = stamp("2024-05-01 09:30");
        let index = table.create(&alice, &text("secret"), &at).unwrap();
        table.delete(index, &alice).unwrap();

        assert!(table.snapshot().is_empty());
        assert!(table.snapshot_by(&alice).is_empty());
        assert_eq!(
            table.update(index, &alice, &text("revive"), &at),
            Err(NoteError::NotFound { index })
        );
        assert_eq!(table.delete(index, &alice), Err(NoteError::NotFound { index }));
    }

    #[test]
    fn snapshot_by_filters_on_author() {
        let mut table = NoteTable::EMPTY;
        let at = stamp("2024-05-01 09:30");
        table.create(&author("alice"), &text("a1"), &at).unwrap();
        table.create(&author("bob"), &text("b1"), &at).unwrap();
        table.create(&author("alice"), &text("a2"), &at).unwrap();

        let mine: Vec<usize> = table
            .snapshot_by(&author("alice"))
            .into_iter()
            .map(|note| note.index)
            .collect();
        assert_eq!(mine, vec![0, 2]);
    }

    #[test]
    fn torn_rewrite_is_dropped_and_others_survive() {
        let mut table = NoteTable::EMPTY;
        let alice = author("alice");
        let at = stamp("2024-05-01 09:30");
        table.create(&alice, &text("intact"), &at).unwrap();
        let torn = table.create(&alice, &text("half written"), &at).unwrap();

        table.tear(torn);
        assert_eq!(table.drop_torn(), vec![torn]);
        assert_eq!(table.get(torn), None);
        assert_eq!(table.get(0).unwrap().text, "intact");

        // Nothing left to repair, and the freed slot is reusable.
        assert!(table.drop_torn().is_empty());
        assert_eq!(table.create(&alice, &text("again"), &at), Ok(torn));
    }

    #[test]
    fn completed_update_is_not_torn() {
        let mut table = NoteTable::EMPTY;
        let alice = author("alice");
        let at = stamp("2024-05-01 09:30");
        let index = table.create(&alice, &text("draft"), &at).unwrap();
        table.update(index, &alice, &text("final"), &at).unwrap();
        assert!(table.drop_torn().is_empty());
        assert_eq!(table.get(index).unwrap().text, "final");
    }
}
