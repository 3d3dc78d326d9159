//! Ownership wrappers: whether a stream borrows or owns what it wraps.
//!
//! Every decorator and backend is generic over a [`Dependency`], so one code
//! path accepts "a writer I borrow" (`&mut W`), "a writer I own" (`Owned<W>`
//! or `Box<W>`), or a choice made at runtime ([`AnyDependency`]).
//!
//! Decorators alias their inner stream's buffer through window offsets
//! rather than raw pointers, so relocating a wrapper never invalidates the
//! alias and no stability bookkeeping is needed on move.

use std::ops::{Deref, DerefMut};

/// Uniform accessor surface over a borrowed or owned target.
pub trait Dependency {
    /// The wrapped object, e.g. `dyn Writer` or `std::fs::File`.
    type Target: ?Sized;

    fn get(&self) -> &Self::Target;

    fn get_mut(&mut self) -> &mut Self::Target;

    /// Whether closing the holder should also close the target.
    fn is_owning(&self) -> bool;
}

impl<'a, T: ?Sized> Dependency for &'a mut T {
    type Target = T;

    fn get(&self) -> &T {
        self
    }

    fn get_mut(&mut self) -> &mut T {
        self
    }

    fn is_owning(&self) -> bool {
        false
    }
}

impl<T: ?Sized> Dependency for Box<T> {
    type Target = T;

    fn get(&self) -> &T {
        self
    }

    fn get_mut(&mut self) -> &mut T {
        self
    }

    fn is_owning(&self) -> bool {
        true
    }
}

/// Holds the target by value.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Owned<T>(pub T);

impl<T> Owned<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> Dependency for Owned<T> {
    type Target = T;

    fn get(&self) -> &T {
        &self.0
    }

    fn get_mut(&mut self) -> &mut T {
        &mut self.0
    }

    fn is_owning(&self) -> bool {
        true
    }
}

impl<T> Deref for Owned<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> DerefMut for Owned<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.0
    }
}

/// A target which is borrowed or owned depending on a runtime choice.
#[derive(Debug)]
pub enum AnyDependency<'a, T: ?Sized> {
    Borrowed(&'a mut T),
    Owned(Box<T>),
}

impl<'a, T: ?Sized> AnyDependency<'a, T> {
    /// Rebinds to a different target.
    pub fn reset(&mut self, other: AnyDependency<'a, T>) {
        *self = other;
    }
}

impl<'a, T: ?Sized> Dependency for AnyDependency<'a, T> {
    type Target = T;

    fn get(&self) -> &T {
        match self {
            Self::Borrowed(target) => target,
            Self::Owned(target) => target,
        }
    }

    fn get_mut(&mut self) -> &mut T {
        match self {
            Self::Borrowed(target) => target,
            Self::Owned(target) => target,
        }
    }

    fn is_owning(&self) -> bool {
        matches!(self, Self::Owned(_))
    }
}

impl<'a, T: ?Sized> From<&'a mut T> for AnyDependency<'a, T> {
    fn from(target: &'a mut T) -> Self {
        Self::Borrowed(target)
    }
}

impl<'a, T: ?Sized> From<Box<T>> for AnyDependency<'a, T> {
    fn from(target: Box<T>) -> Self {
        Self::Owned(target)
    }
}
