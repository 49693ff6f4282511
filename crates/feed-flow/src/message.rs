//! Immutable messages and the builder that produces them.
//!
//! A [`Message`] is one transition of a state: the entry it was built from
//! (`previous`), the resulting entry (`current`), and the set of axes whose value
//! differs between the two (`changes`). Messages of one state form a chain where
//! each message's `previous` is the `current` of the message before it.

use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, LazyLock};

use feed_flow_collections::SelectionInfo;

use crate::axis::{Axis, AxisPayload, AxisValue, BindingSource, TypedAxis};
use crate::error::CapturedError;
use crate::feed::FeedValue;
use crate::pagination::PaginationInfo;

type Values = BTreeMap<Axis, AxisValue>;

static EMPTY_VALUES: LazyLock<Arc<Values>> = LazyLock::new(|| Arc::new(BTreeMap::new()));

/// The axis values of a message at one point of the chain.
///
/// Only set axes are stored. The Data axis holds an `Option<T>`: absent means
/// the value is undefined, `None` means it is defined as "no value".
pub struct MessageEntry<T> {
    values: Arc<Values>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> MessageEntry<T> {
    /// An entry without any value.
    pub fn empty() -> Self {
        Self::from_values(EMPTY_VALUES.clone())
    }

    fn from_values(values: Arc<Values>) -> Self {
        Self {
            values,
            _marker: PhantomData,
        }
    }

    /// The raw value of `axis`.
    pub fn get(&self, axis: &Axis) -> AxisValue {
        self.values.get(axis).cloned().unwrap_or_default()
    }

    /// The typed value of a custom axis.
    pub fn get_typed<V: AxisPayload>(&self, axis: &TypedAxis<V>) -> Option<&V> {
        self.values
            .get(axis.axis())
            .and_then(|v| v.downcast_ref::<V>())
    }

    /// The axes that hold a value, in name order.
    pub fn axes(&self) -> impl Iterator<Item = &Axis> {
        self.values.keys()
    }

    /// Returns `true` if the data is undefined.
    pub fn is_data_undefined(&self) -> bool {
        !self.values.contains_key(&Axis::data())
    }

    /// The captured error, if any.
    pub fn error(&self) -> Option<&CapturedError> {
        self.typed(&Axis::error())
    }

    /// Returns `true` while the value is being (re)computed.
    pub fn is_transient(&self) -> bool {
        self.typed::<bool>(&Axis::progress()).copied().unwrap_or(false)
    }

    pub fn pagination(&self) -> Option<&PaginationInfo> {
        self.typed(&Axis::pagination())
    }

    /// The selection, empty when none is set.
    pub fn selection(&self) -> SelectionInfo {
        self.typed::<SelectionInfo>(&Axis::selection())
            .cloned()
            .unwrap_or_default()
    }

    pub fn binding_source(&self) -> Option<BindingSource> {
        self.typed(&Axis::binding_source()).copied()
    }

    fn typed<V: 'static>(&self, axis: &Axis) -> Option<&V> {
        self.values.get(axis).and_then(|v| v.downcast_ref::<V>())
    }

    /// Whether two entries hold the same values, axis by axis.
    pub fn is_same(&self, other: &MessageEntry<T>) -> bool {
        if Arc::ptr_eq(&self.values, &other.values) {
            return true;
        }
        self.values.len() == other.values.len()
            && self.values.iter().all(|(axis, value)| {
                other
                    .values
                    .get(axis)
                    .is_some_and(|o| axis.are_equal(value, o))
            })
    }

    /// Merge this entry with a parent entry, axis by axis.
    ///
    /// An axis set on only one side keeps that value; an axis set on both sides
    /// is aggregated as `[parent, local]`.
    pub fn override_by(&self, parent: &MessageEntry<T>) -> MessageEntry<T> {
        if parent.values.is_empty() {
            return self.clone();
        }
        if self.values.is_empty() {
            return parent.clone();
        }
        let mut merged = (*parent.values).clone();
        for (axis, local) in self.values.iter() {
            let value = match merged.remove(axis) {
                Some(inherited) => axis.aggregate([inherited, local.clone()]),
                None => local.clone(),
            };
            if value.is_set() {
                merged.insert(axis.clone(), value);
            }
        }
        Self::from_values(Arc::new(merged))
    }
}

impl<T: FeedValue> MessageEntry<T> {
    /// The data, `None` when undefined or defined as no value.
    pub fn data(&self) -> Option<&T> {
        self.typed::<Option<T>>(&Axis::data())
            .and_then(Option::as_ref)
    }
}

impl<T> Clone for MessageEntry<T> {
    fn clone(&self) -> Self {
        Self::from_values(self.values.clone())
    }
}

impl<T> Default for MessageEntry<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T> fmt::Debug for MessageEntry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.values.iter()).finish()
    }
}

/// The axes that changed between two entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Changes(Arc<Vec<Axis>>);

impl Changes {
    pub fn contains(&self, axis: &Axis) -> bool {
        self.0.contains(axis)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Axis> {
        self.0.iter()
    }
}

impl<'a> IntoIterator for &'a Changes {
    type Item = &'a Axis;
    type IntoIter = std::slice::Iter<'a, Axis>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// One transition of a state.
pub struct Message<T> {
    previous: MessageEntry<T>,
    current: MessageEntry<T>,
    changes: Changes,
}

impl<T> Message<T> {
    /// The first message of a chain: empty entries and no changes.
    pub fn initial() -> Self {
        Self {
            previous: MessageEntry::empty(),
            current: MessageEntry::empty(),
            changes: Changes::default(),
        }
    }

    pub fn previous(&self) -> &MessageEntry<T> {
        &self.previous
    }

    pub fn current(&self) -> &MessageEntry<T> {
        &self.current
    }

    pub fn changes(&self) -> &Changes {
        &self.changes
    }

    /// Start building the next message of the chain from this one.
    pub fn with(&self) -> MessageBuilder<T> {
        MessageBuilder::new(self.current.clone())
    }
}

impl<T> Clone for Message<T> {
    fn clone(&self) -> Self {
        Self {
            previous: self.previous.clone(),
            current: self.current.clone(),
            changes: self.changes.clone(),
        }
    }
}

impl<T> fmt::Debug for Message<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("current", &self.current)
            .field("changes", &self.changes)
            .finish()
    }
}

/// Mutable staging area for the next message.
///
/// Setters chain on `&mut self`; [`build`](Self::build) can be called any number
/// of times and computes the change set against the base entry.
pub struct MessageBuilder<T> {
    previous: MessageEntry<T>,
    values: Values,
}

impl<T> MessageBuilder<T> {
    /// A builder whose base (and initial values) is `previous`.
    pub fn new(previous: MessageEntry<T>) -> Self {
        let values = (*previous.values).clone();
        Self { previous, values }
    }

    /// The entry this builder derives from.
    pub fn previous(&self) -> &MessageEntry<T> {
        &self.previous
    }

    pub fn get(&self, axis: &Axis) -> AxisValue {
        self.values.get(axis).cloned().unwrap_or_default()
    }

    pub fn set(&mut self, axis: &Axis, value: AxisValue) -> &mut Self {
        match value {
            AxisValue::Unset => {
                self.values.remove(axis);
            }
            value => {
                self.values.insert(axis.clone(), value);
            }
        }
        self
    }

    pub fn set_typed<V: AxisPayload>(&mut self, axis: &TypedAxis<V>, value: Option<V>) -> &mut Self {
        self.set(axis.axis(), axis.value(value))
    }

    /// Mark the data as undefined.
    pub fn undefined_data(&mut self) -> &mut Self {
        self.set(&Axis::data(), AxisValue::Unset)
    }

    /// Set or clear the error.
    pub fn error(&mut self, error: Option<CapturedError>) -> &mut Self {
        self.set(&Axis::error(), error.map(AxisValue::new).unwrap_or_default())
    }

    /// Flag the value as being (re)computed. `false` clears the axis.
    pub fn progress(&mut self, is_transient: bool) -> &mut Self {
        let value = if is_transient {
            AxisValue::new(true)
        } else {
            AxisValue::Unset
        };
        self.set(&Axis::progress(), value)
    }

    pub fn pagination(&mut self, pagination: Option<PaginationInfo>) -> &mut Self {
        self.set(
            &Axis::pagination(),
            pagination.map(AxisValue::new).unwrap_or_default(),
        )
    }

    /// Set the selection. An empty selection clears the axis.
    pub fn selection(&mut self, selection: SelectionInfo) -> &mut Self {
        let value = if selection.is_empty() {
            AxisValue::Unset
        } else {
            AxisValue::new(selection)
        };
        self.set(&Axis::selection(), value)
    }

    pub fn binding_source(&mut self, source: Option<BindingSource>) -> &mut Self {
        self.set(
            &Axis::binding_source(),
            source.map(AxisValue::new).unwrap_or_default(),
        )
    }

    /// Replace every axis value with the ones of `entry`.
    pub fn apply(&mut self, entry: &MessageEntry<T>) -> &mut Self {
        self.values = (*entry.values).clone();
        self
    }

    /// Finalize into an immutable message.
    ///
    /// `changes` holds exactly the axes whose value differs from the base entry
    /// according to the axis equality. When nothing changed, the current entry
    /// shares the base entry.
    pub fn build(&self) -> Message<T> {
        let mut changes = Vec::new();
        for (axis, value) in self.values.iter() {
            let changed = match self.previous.values.get(axis) {
                Some(old) => !axis.are_equal(old, value),
                None => true,
            };
            if changed {
                changes.push(axis.clone());
            }
        }
        for axis in self.previous.values.keys() {
            if !self.values.contains_key(axis) {
                changes.push(axis.clone());
            }
        }
        changes.sort();

        let current = if changes.is_empty() {
            self.previous.clone()
        } else {
            MessageEntry::from_values(Arc::new(self.values.clone()))
        };

        Message {
            previous: self.previous.clone(),
            current,
            changes: Changes(Arc::new(changes)),
        }
    }
}

impl<T: FeedValue> MessageBuilder<T> {
    /// Set the data. `None` defines the value as "no value".
    pub fn data(&mut self, data: Option<T>) -> &mut Self {
        self.set(&Axis::data(), AxisValue::new(data))
    }

    /// The staged data.
    pub fn get_data(&self) -> Option<&T> {
        self.values
            .get(&Axis::data())
            .and_then(|v| v.downcast_ref::<Option<T>>())
            .and_then(Option::as_ref)
    }
}
