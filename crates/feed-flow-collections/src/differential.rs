//! Persistent list with a positional edit-script diff.
//!
//! [`DifferentialList`] wraps an [`im::Vector`] so snapshots share structure and
//! can be kept around cheaply. [`DifferentialList::diff`] computes a list of
//! [`ListChange`]s turning one snapshot into another.
//!
//! The diff trims the common head and tail and then correlates the remaining
//! middles by position. It is exact (applying the script always reproduces the
//! target) but not minimal: a moved item shows up as replacements rather than a
//! remove and an insert.

use std::fmt;
use std::ops::Index;

use im::Vector;

/// One step of an edit script. Indices refer to the list as it is after all
/// previous steps of the same script were applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListChange<T> {
    /// `items` were inserted starting at `index`.
    Insert { index: usize, items: Vec<T> },
    /// `items` were removed starting at `index`.
    Remove { index: usize, items: Vec<T> },
    /// `old` items starting at `index` were replaced by `new` items.
    Replace {
        index: usize,
        old: Vec<T>,
        new: Vec<T>,
    },
}

impl<T> ListChange<T> {
    /// The position the change applies to.
    pub fn index(&self) -> usize {
        match self {
            ListChange::Insert { index, .. }
            | ListChange::Remove { index, .. }
            | ListChange::Replace { index, .. } => *index,
        }
    }
}

/// Error returned when an edit script does not fit the list it is applied to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyError {
    pub index: usize,
    pub len: usize,
}

impl fmt::Display for ApplyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "change at index {} does not fit a list of length {}",
            self.index, self.len
        )
    }
}

impl std::error::Error for ApplyError {}

/// An immutable, structurally shared list.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct DifferentialList<T: Clone> {
    items: Vector<T>,
}

impl<T: Clone> DifferentialList<T> {
    pub fn new() -> Self {
        Self {
            items: Vector::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.items.get(index)
    }

    pub fn iter(&self) -> im::vector::Iter<'_, T> {
        self.items.iter()
    }

    /// The underlying persistent vector.
    pub fn as_vector(&self) -> &Vector<T> {
        &self.items
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }

    /// A new list with `items` appended. `self` is left untouched.
    pub fn appended(&self, items: impl IntoIterator<Item = T>) -> Self {
        let mut next = self.items.clone();
        next.extend(items);
        Self { items: next }
    }

    /// A new list with `item` pushed at the end.
    pub fn pushed(&self, item: T) -> Self {
        let mut next = self.items.clone();
        next.push_back(item);
        Self { items: next }
    }

    /// Apply an edit script produced by [`diff`](Self::diff) (or any script whose
    /// indices fit this list).
    pub fn apply(&self, changes: &[ListChange<T>]) -> Result<Self, ApplyError> {
        let mut items = self.items.clone();
        for change in changes {
            match change {
                ListChange::Insert { index, items: new } => {
                    if *index > items.len() {
                        return Err(ApplyError {
                            index: *index,
                            len: items.len(),
                        });
                    }
                    let tail = items.split_off(*index);
                    items.extend(new.iter().cloned());
                    items.append(tail);
                }
                ListChange::Remove { index, items: old } => {
                    splice(&mut items, *index, old.len(), &[])?;
                }
                ListChange::Replace { index, old, new } => {
                    splice(&mut items, *index, old.len(), new)?;
                }
            }
        }
        Ok(Self { items })
    }
}

fn splice<T: Clone>(
    items: &mut Vector<T>,
    index: usize,
    remove: usize,
    insert: &[T],
) -> Result<(), ApplyError> {
    if index + remove > items.len() {
        return Err(ApplyError {
            index,
            len: items.len(),
        });
    }
    let mut tail = items.split_off(index);
    let rest = tail.split_off(remove);
    items.extend(insert.iter().cloned());
    items.append(rest);
    Ok(())
}

impl<T: Clone + PartialEq> DifferentialList<T> {
    /// Compute the edit script that turns `self` into `target`.
    ///
    /// Equal lists produce an empty script.
    pub fn diff(&self, target: &Self) -> Vec<ListChange<T>> {
        self.diff_by(target, |a, b| a == b)
    }
}

impl<T: Clone> DifferentialList<T> {
    /// Like [`diff`](Self::diff) with a custom item equality.
    pub fn diff_by(&self, target: &Self, eq: impl Fn(&T, &T) -> bool) -> Vec<ListChange<T>> {
        let old = &self.items;
        let new = &target.items;

        let head = old
            .iter()
            .zip(new.iter())
            .take_while(|(a, b)| eq(a, b))
            .count();
        let max_tail = old.len().min(new.len()) - head;
        let tail = old
            .iter()
            .rev()
            .zip(new.iter().rev())
            .take(max_tail)
            .take_while(|(a, b)| eq(a, b))
            .count();

        let old_mid: Vec<&T> = old.iter().skip(head).take(old.len() - head - tail).collect();
        let new_mid: Vec<&T> = new.iter().skip(head).take(new.len() - head - tail).collect();
        let common = old_mid.len().min(new_mid.len());

        let mut changes = Vec::new();

        // Positional correlation over the shared part of the middles.
        let mut offset = 0;
        while offset < common {
            if eq(old_mid[offset], new_mid[offset]) {
                offset += 1;
                continue;
            }
            let start = offset;
            while offset < common && !eq(old_mid[offset], new_mid[offset]) {
                offset += 1;
            }
            changes.push(ListChange::Replace {
                index: head + start,
                old: old_mid[start..offset].iter().map(|t| (*t).clone()).collect(),
                new: new_mid[start..offset].iter().map(|t| (*t).clone()).collect(),
            });
        }

        if new_mid.len() > common {
            changes.push(ListChange::Insert {
                index: head + common,
                items: new_mid[common..].iter().map(|t| (*t).clone()).collect(),
            });
        } else if old_mid.len() > common {
            changes.push(ListChange::Remove {
                index: head + common,
                items: old_mid[common..].iter().map(|t| (*t).clone()).collect(),
            });
        }

        changes
    }
}

impl<T: Clone> Default for DifferentialList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> From<Vector<T>> for DifferentialList<T> {
    fn from(items: Vector<T>) -> Self {
        Self { items }
    }
}

impl<T: Clone> From<Vec<T>> for DifferentialList<T> {
    fn from(items: Vec<T>) -> Self {
        Self {
            items: items.into_iter().collect(),
        }
    }
}

impl<T: Clone> FromIterator<T> for DifferentialList<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}

impl<T: Clone> Index<usize> for DifferentialList<T> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        &self.items[index]
    }
}

impl<'a, T: Clone> IntoIterator for &'a DifferentialList<T> {
    type Item = &'a T;
    type IntoIter = im::vector::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl<T: Clone + fmt::Debug> fmt::Debug for DifferentialList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.items.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(items: &[i32]) -> DifferentialList<i32> {
        items.iter().copied().collect()
    }

    #[test]
    fn test_equal_lists_produce_empty_script() {
        let a = list(&[1, 2, 3]);
        assert!(a.diff(&a.clone()).is_empty());
        assert!(list(&[]).diff(&list(&[])).is_empty());
    }

    #[test]
    fn test_append_is_single_insert() {
        let old = list(&[1, 2]);
        let new = old.appended([3, 4]);
        assert_eq!(
            old.diff(&new),
            vec![ListChange::Insert {
                index: 2,
                items: vec![3, 4]
            }]
        );
        assert_eq!(old.apply(&old.diff(&new)).unwrap(), new);
    }

    #[test]
    fn test_head_and_tail_are_trimmed() {
        let old = list(&[1, 2, 3, 4, 5]);
        let new = list(&[1, 9, 4, 5]);
        let changes = old.diff(&new);
        assert_eq!(
            changes,
            vec![
                ListChange::Replace {
                    index: 1,
                    old: vec![2],
                    new: vec![9]
                },
                ListChange::Remove {
                    index: 2,
                    items: vec![3]
                },
            ]
        );
        assert_eq!(old.apply(&changes).unwrap(), new);
    }

    #[test]
    fn test_middle_insert() {
        let old = list(&[1, 5]);
        let new = list(&[1, 2, 3, 5]);
        assert_eq!(
            old.diff(&new),
            vec![ListChange::Insert {
                index: 1,
                items: vec![2, 3]
            }]
        );
    }

    #[test]
    fn test_reorder_round_trips() {
        let old = list(&[1, 2, 3, 4]);
        let new = list(&[4, 3, 2, 1]);
        assert_eq!(old.apply(&old.diff(&new)).unwrap(), new);
    }

    #[test]
    fn test_clear_and_fill() {
        let old = list(&[1, 2, 3]);
        let empty = list(&[]);
        assert_eq!(old.apply(&old.diff(&empty)).unwrap(), empty);
        assert_eq!(empty.apply(&empty.diff(&old)).unwrap(), old);
    }

    #[test]
    fn test_apply_rejects_out_of_range() {
        let old = list(&[1]);
        let err = old
            .apply(&[ListChange::Remove {
                index: 1,
                items: vec![7],
            }])
            .unwrap_err();
        assert_eq!(err, ApplyError { index: 1, len: 1 });
    }

    #[test]
    fn test_snapshots_are_independent() {
        let base = list(&[1, 2]);
        let grown = base.appended([3]);
        assert_eq!(base.len(), 2);
        assert_eq!(grown.len(), 3);
        assert_eq!(grown[2], 3);
    }
}
