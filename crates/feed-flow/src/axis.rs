//! Axes: named metadata channels carried by every message.
//!
//! A message maps each [`Axis`] to an [`AxisValue`]. Besides the value itself
//! (the Data axis), messages carry errors, progress, pagination state, selection
//! and so on. Each axis decides how concurrent values are combined
//! ([`AxisRules::aggregate`]) and when two values are the same
//! ([`AxisRules::are_equal`]).

use std::any::Any;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, LazyLock};

use feed_flow_collections::SelectionInfo;

use crate::error::{AggregateError, CapturedError};
use crate::pagination::PaginationInfo;

/// Object-safe payload stored in an [`AxisValue`].
///
/// Automatically implemented for every `PartialEq + Send + Sync + 'static` type.
pub trait AxisPayload: Any + Send + Sync {
    /// Get the payload as `Any` for downcasting.
    fn as_any(&self) -> &dyn Any;

    /// Returns `true` if `other` is the same concrete type and equal to `self`.
    fn dyn_eq(&self, other: &dyn Any) -> bool;

    /// Get the type name of the payload.
    fn type_name(&self) -> &'static str;
}

impl<T: PartialEq + Send + Sync + 'static> AxisPayload for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn dyn_eq(&self, other: &dyn Any) -> bool {
        other.downcast_ref::<T>().is_some_and(|o| self == o)
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// The value of one axis in a message.
#[derive(Clone, Default)]
pub enum AxisValue {
    /// No value. For the Data axis this means the value is undefined, which is
    /// different from a defined "no value" (`None`).
    #[default]
    Unset,
    /// A set value.
    Set(Arc<dyn AxisPayload>),
}

impl AxisValue {
    pub fn new<V: AxisPayload>(value: V) -> Self {
        AxisValue::Set(Arc::new(value))
    }

    pub fn is_set(&self) -> bool {
        matches!(self, AxisValue::Set(_))
    }

    /// Downcast the payload, returning `None` when unset or of another type.
    pub fn downcast_ref<V: 'static>(&self) -> Option<&V> {
        match self {
            AxisValue::Set(payload) => payload.as_any().downcast_ref::<V>(),
            AxisValue::Unset => None,
        }
    }

    /// Payload equality, short-circuiting on a shared allocation.
    pub fn payload_eq(&self, other: &AxisValue) -> bool {
        match (self, other) {
            (AxisValue::Unset, AxisValue::Unset) => true,
            (AxisValue::Set(a), AxisValue::Set(b)) => {
                Arc::ptr_eq(a, b) || a.dyn_eq(b.as_any())
            }
            _ => false,
        }
    }
}

impl fmt::Debug for AxisValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AxisValue::Unset => write!(f, "Unset"),
            AxisValue::Set(payload) => write!(f, "Set({})", payload.type_name()),
        }
    }
}

/// Aggregation and equality rules of an axis.
pub trait AxisRules: Send + Sync + 'static {
    /// Combine several set values of the axis into one.
    ///
    /// Only called with two or more values, none of them unset. The default keeps
    /// the last value.
    fn aggregate(&self, values: &[AxisValue]) -> AxisValue {
        values.last().cloned().unwrap_or_default()
    }

    /// Whether two values of the axis are the same.
    fn are_equal(&self, a: &AxisValue, b: &AxisValue) -> bool {
        a.payload_eq(b)
    }
}

/// Last-value-wins rules with payload equality.
pub struct DefaultRules;

impl AxisRules for DefaultRules {}

/// A named metadata channel.
///
/// Axes are identified by name: two axes with the same name are equal whatever
/// their rules.
#[derive(Clone)]
pub struct Axis {
    name: Arc<str>,
    rules: Arc<dyn AxisRules>,
}

impl Axis {
    pub fn new(name: impl Into<Arc<str>>, rules: impl AxisRules) -> Self {
        Self {
            name: name.into(),
            rules: Arc::new(rules),
        }
    }

    /// An axis with [`DefaultRules`].
    pub fn named(name: impl Into<Arc<str>>) -> Self {
        Self::new(name, DefaultRules)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Aggregate values of this axis, ignoring unset ones.
    pub fn aggregate(&self, values: impl IntoIterator<Item = AxisValue>) -> AxisValue {
        let mut set: Vec<AxisValue> = values.into_iter().filter(AxisValue::is_set).collect();
        match set.len() {
            0 => AxisValue::Unset,
            1 => set.pop().unwrap_or_default(),
            _ => self.rules.aggregate(&set),
        }
    }

    pub fn are_equal(&self, a: &AxisValue, b: &AxisValue) -> bool {
        match (a, b) {
            (AxisValue::Unset, AxisValue::Unset) => true,
            (AxisValue::Set(_), AxisValue::Set(_)) => self.rules.are_equal(a, b),
            _ => false,
        }
    }

    /// The value axis of a message.
    pub fn data() -> Axis {
        DATA.clone()
    }

    /// Captured failures. Aggregates into an [`AggregateError`].
    pub fn error() -> Axis {
        ERROR.clone()
    }

    /// Whether the value is being (re)computed. Aggregates with OR.
    pub fn progress() -> Axis {
        PROGRESS.clone()
    }

    /// Pagination state. Aggregates with [`PaginationInfo::merge`].
    pub fn pagination() -> Axis {
        PAGINATION.clone()
    }

    /// Selected indices. Aggregates with [`SelectionInfo::union`].
    pub fn selection() -> Axis {
        SELECTION.clone()
    }

    /// Marker of the binding that produced an update.
    pub fn binding_source() -> Axis {
        BINDING_SOURCE.clone()
    }
}

impl PartialEq for Axis {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Axis {}

impl Hash for Axis {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl PartialOrd for Axis {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Axis {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name.cmp(&other.name)
    }
}

impl fmt::Debug for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Axis({})", self.name)
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

// ============================================================================
// Built-in axes
// ============================================================================

static DATA: LazyLock<Axis> = LazyLock::new(|| Axis::named("Data"));
static ERROR: LazyLock<Axis> = LazyLock::new(|| Axis::new("Error", ErrorRules));
static PROGRESS: LazyLock<Axis> = LazyLock::new(|| Axis::new("Progress", ProgressRules));
static PAGINATION: LazyLock<Axis> = LazyLock::new(|| Axis::new("Pagination", PaginationRules));
static SELECTION: LazyLock<Axis> = LazyLock::new(|| Axis::new("Selection", SelectionRules));
static BINDING_SOURCE: LazyLock<Axis> = LazyLock::new(|| Axis::named("BindingSource"));

struct ErrorRules;

impl AxisRules for ErrorRules {
    fn aggregate(&self, values: &[AxisValue]) -> AxisValue {
        let errors = values
            .iter()
            .filter_map(|v| v.downcast_ref::<CapturedError>())
            .cloned();
        AxisValue::new(CapturedError::new(AggregateError::flatten(errors)))
    }
}

struct ProgressRules;

impl AxisRules for ProgressRules {
    fn aggregate(&self, values: &[AxisValue]) -> AxisValue {
        let transient = values
            .iter()
            .any(|v| v.downcast_ref::<bool>().copied().unwrap_or(false));
        AxisValue::new(transient)
    }
}

struct PaginationRules;

impl AxisRules for PaginationRules {
    fn aggregate(&self, values: &[AxisValue]) -> AxisValue {
        values
            .iter()
            .filter_map(|v| v.downcast_ref::<PaginationInfo>())
            .fold(None::<PaginationInfo>, |acc, info| {
                Some(match acc {
                    Some(acc) => acc.merge(info),
                    None => info.clone(),
                })
            })
            .map(AxisValue::new)
            .unwrap_or_default()
    }
}

struct SelectionRules;

impl AxisRules for SelectionRules {
    fn aggregate(&self, values: &[AxisValue]) -> AxisValue {
        let union = values
            .iter()
            .filter_map(|v| v.downcast_ref::<SelectionInfo>())
            .fold(SelectionInfo::empty(), |acc, s| acc.union(s));
        AxisValue::new(union)
    }
}

/// Identifies the binding that pushed an update, so the binding can recognize
/// (and skip) its own writes when they come back through the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindingSource(u64);

static BINDING_SOURCE_COUNTER: AtomicU64 = AtomicU64::new(1);

impl BindingSource {
    /// Allocate a fresh, unique marker.
    pub fn new() -> Self {
        Self(BINDING_SOURCE_COUNTER.fetch_add(1, AtomicOrdering::Relaxed))
    }
}

impl Default for BindingSource {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Typed axes
// ============================================================================

/// An axis whose values are known to be of type `V`.
pub struct TypedAxis<V> {
    axis: Axis,
    _marker: PhantomData<fn() -> V>,
}

impl<V: AxisPayload> TypedAxis<V> {
    pub fn new(name: impl Into<Arc<str>>, rules: impl AxisRules) -> Self {
        Self {
            axis: Axis::new(name, rules),
            _marker: PhantomData,
        }
    }

    /// A typed axis with [`DefaultRules`].
    pub fn named(name: impl Into<Arc<str>>) -> Self {
        Self::new(name, DefaultRules)
    }

    pub fn axis(&self) -> &Axis {
        &self.axis
    }

    /// Wrap a typed value (or `None` for unset).
    pub fn value(&self, value: Option<V>) -> AxisValue {
        value.map(AxisValue::new).unwrap_or_default()
    }

    /// Read a typed value out of an untyped one.
    pub fn get<'a>(&self, value: &'a AxisValue) -> Option<&'a V> {
        value.downcast_ref::<V>()
    }
}

impl<V> Clone for TypedAxis<V> {
    fn clone(&self) -> Self {
        Self {
            axis: self.axis.clone(),
            _marker: PhantomData,
        }
    }
}

impl<V> fmt::Debug for TypedAxis<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypedAxis({})", self.axis.name)
    }
}

#[cfg(test)]
mod tests {
    use feed_flow_collections::SelectionIndexRange;

    use super::*;

    #[test]
    fn test_axis_identity_is_name() {
        struct Custom;
        impl AxisRules for Custom {}

        assert_eq!(Axis::named("Data"), Axis::data());
        assert_eq!(Axis::new("Progress", Custom), Axis::progress());
        assert_ne!(Axis::data(), Axis::error());
    }

    #[test]
    fn test_aggregate_skips_unset() {
        let axis = Axis::named("Custom");
        assert!(!axis.aggregate([AxisValue::Unset, AxisValue::Unset]).is_set());

        let value = axis.aggregate([AxisValue::Unset, AxisValue::new(3u32)]);
        assert_eq!(value.downcast_ref::<u32>(), Some(&3));

        let last = axis.aggregate([AxisValue::new(1u32), AxisValue::new(2u32)]);
        assert_eq!(last.downcast_ref::<u32>(), Some(&2));
    }

    #[test]
    fn test_progress_aggregates_with_or() {
        let progress = Axis::progress();
        let value = progress.aggregate([AxisValue::new(false), AxisValue::new(true)]);
        assert_eq!(value.downcast_ref::<bool>(), Some(&true));
        let value = progress.aggregate([AxisValue::new(false), AxisValue::new(false)]);
        assert_eq!(value.downcast_ref::<bool>(), Some(&false));
    }

    #[test]
    fn test_error_aggregates_all() {
        let a = CapturedError::new(anyhow::anyhow!("a"));
        let b = CapturedError::new(anyhow::anyhow!("b"));
        let value = Axis::error().aggregate([AxisValue::new(a.clone()), AxisValue::new(b.clone())]);
        let aggregated = value
            .downcast_ref::<CapturedError>()
            .and_then(|e| e.downcast_ref::<AggregateError>())
            .map(|e| e.errors.clone());
        assert_eq!(aggregated, Some(vec![a, b]));
    }

    #[test]
    fn test_selection_aggregates_with_union() {
        let a = SelectionInfo::single(1);
        let b = SelectionInfo::from_range(SelectionIndexRange::new(2, 2));
        let value = Axis::selection().aggregate([AxisValue::new(a), AxisValue::new(b)]);
        assert_eq!(
            value.downcast_ref::<SelectionInfo>().map(|s| s.to_string()),
            Some("[1,3]".to_string())
        );
    }

    #[test]
    fn test_equality() {
        let data = Axis::data();
        assert!(data.are_equal(&AxisValue::Unset, &AxisValue::Unset));
        assert!(data.are_equal(&AxisValue::new(Some(1)), &AxisValue::new(Some(1))));
        assert!(!data.are_equal(&AxisValue::new(Some(1)), &AxisValue::new(None::<i32>)));
        assert!(!data.are_equal(&AxisValue::new(1i32), &AxisValue::new(1i64)));
        assert!(!data.are_equal(&AxisValue::Unset, &AxisValue::new(None::<i32>)));
    }

    #[test]
    fn test_typed_axis() {
        let retries = TypedAxis::<u8>::named("Retries");
        let value = retries.value(Some(2));
        assert_eq!(retries.get(&value), Some(&2));
        assert!(!retries.value(None).is_set());
        assert_eq!(retries.axis(), &Axis::named("Retries"));
    }
}
