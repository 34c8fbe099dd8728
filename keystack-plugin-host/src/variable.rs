//! Typed destinations for watched configuration values.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A value shared between application code and the notification registry.
///
/// Clones refer to the same storage; the registry writes through its clone
/// whenever the watched key changes.
#[derive(Debug, Default)]
pub struct Variable<T>(Arc<Mutex<T>>);

impl<T> Variable<T> {
    pub fn new(initial: T) -> Self {
        Self(Arc::new(Mutex::new(initial)))
    }

    fn lock(&self) -> MutexGuard<'_, T> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set(&self, value: T) {
        *self.lock() = value;
    }
}

impl<T: Copy> Variable<T> {
    pub fn get(&self) -> T {
        *self.lock()
    }
}

impl<T> Clone for Variable<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

/// A variable of one of the supported primitive kinds.
#[derive(Debug, Clone)]
pub enum VariableSlot {
    Int(Variable<i32>),
    Long(Variable<i64>),
    UnsignedLong(Variable<u64>),
    Float(Variable<f32>),
    Double(Variable<f64>),
}

impl VariableSlot {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Int(_) => "int",
            Self::Long(_) => "long",
            Self::UnsignedLong(_) => "unsigned long",
            Self::Float(_) => "float",
            Self::Double(_) => "double",
        }
    }
}

/// Primitive types that can be bound to a configuration key.
pub trait Watch: Copy + Send + 'static {
    fn slot(variable: &Variable<Self>) -> VariableSlot;
}

macro_rules! impl_watch {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl Watch for $ty {
                fn slot(variable: &Variable<Self>) -> VariableSlot {
                    VariableSlot::$variant(variable.clone())
                }
            }
        )*
    };
}

impl_watch! {
    i32 => Int,
    i64 => Long,
    u64 => UnsignedLong,
    f32 => Float,
    f64 => Double,
}
