// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The dedup key: a type-erased (function identity, argument tuple) pair.
//!
//! C++ `arc` identifies the function by a cast-stable function pointer and
//! stores the argument tuple behind a hand-written vtable
//! (`key_impl_base`/`key_impl<F>` in `arc/detail/key.hpp`). Rust gives us
//! both of those for free: `TypeId::of::<F>()` is a stable-for-the-process
//! function identity for any `'static` function item or closure type, and a
//! trait object (`Box<dyn ErasedArgs>`) is precisely the vtable the C++
//! version hand-rolls.

use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Object-safe equality/hash/clone for a type-erased argument tuple.
///
/// Blanket-implemented below for any tuple that is itself `Eq + Hash +
/// Clone`; callers never implement this by hand.
pub(crate) trait ErasedArgs: Any + Send + Sync {
    fn dyn_eq(&self, other: &dyn ErasedArgs) -> bool;
    fn dyn_hash(&self, state: &mut dyn Hasher);
    fn dyn_clone(&self) -> Box<dyn ErasedArgs>;
    fn as_any(&self) -> &dyn Any;
}

impl<T> ErasedArgs for T
where
    T: Any + Eq + Hash + Clone + Send + Sync,
{
    fn dyn_eq(&self, other: &dyn ErasedArgs) -> bool {
        match other.as_any().downcast_ref::<T>() {
            Some(other) => self == other,
            None => false,
        }
    }

    fn dyn_hash(&self, mut state: &mut dyn Hasher) {
        Hash::hash(self, &mut state);
    }

    fn dyn_clone(&self) -> Box<dyn ErasedArgs> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// The composite `(function, arguments)` identity of one submission.
///
/// Keys are immutable once constructed; the hash is computed eagerly at
/// construction time (arguments never change afterwards) and is what
/// [`Hash`] reports, so repeated hashing of the same key is O(1).
pub struct Key {
    function: TypeId,
    function_name: &'static str,
    args: Box<dyn ErasedArgs>,
    hash: u64,
}

impl Key {
    pub(crate) fn new<F: 'static, Args>(function_name: &'static str, args: Args) -> Self
    where
        Args: Eq + Hash + Clone + Send + Sync + 'static,
    {
        let function = TypeId::of::<F>();
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        function.hash(&mut hasher);
        args.hash(&mut hasher);
        Key {
            function,
            function_name,
            args: Box::new(args),
            hash: hasher.finish(),
        }
    }

    /// Returns the stored argument tuple, checked against `F`'s identity.
    ///
    /// # Panics
    ///
    /// Panics if `F` is not the function that produced this key, or if
    /// `Args` does not match the type the key was constructed with. Both
    /// are precondition violations per §7: a wrong `f` passed to
    /// `get_keys()` is a programmer error, not a recoverable failure.
    pub(crate) fn downcast_args<F: 'static, Args: 'static>(&self) -> &Args {
        assert_eq!(
            self.function,
            TypeId::of::<F>(),
            "wrong function identity passed to get_keys() for entry `{}`",
            self.function_name
        );
        self.args
            .as_any()
            .downcast_ref::<Args>()
            .expect("key argument tuple type mismatch")
    }

    pub(crate) fn function_name(&self) -> &'static str {
        self.function_name
    }
}

impl Clone for Key {
    fn clone(&self) -> Self {
        Key {
            function: self.function,
            function_name: self.function_name,
            args: self.args.dyn_clone(),
            hash: self.hash,
        }
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.function == other.function && self.args.dyn_eq(other.args.as_ref())
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Key")
            .field("function", &self.function_name)
            .field("hash", &self.hash)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f(_x: u32) {}
    fn g(_x: u32) {}

    #[test]
    fn equal_function_and_args_are_equal() {
        let a = Key::new::<fn(u32), _>("f", (1u32,));
        let b = Key::new::<fn(u32), _>("f", (1u32,));
        assert_eq!(a, b);
        assert_eq!(a.hash, b.hash);
        let _ = (f, g);
    }

    #[test]
    fn different_args_are_unequal() {
        let a = Key::new::<fn(u32), _>("f", (1u32,));
        let b = Key::new::<fn(u32), _>("f", (2u32,));
        assert_ne!(a, b);
    }

    #[test]
    fn different_function_same_args_are_unequal() {
        // Distinct zero-sized function-item types (not the function-pointer
        // type `fn(u32)`, which would unify both) give distinct `TypeId`s,
        // mirroring distinct function-pointer values in the C++ original.
        type MarkerF = fn(u32);
        type MarkerG = fn(u32) -> u8;
        let a = Key::new::<MarkerF, _>("f", (1u32,));
        let b = Key::new::<MarkerG, _>("g", (1u32,));
        assert_ne!(a, b);
    }

    #[test]
    fn downcast_args_checks_function_identity() {
        let key = Key::new::<fn(u32), _>("f", (7u32,));
        assert_eq!(*key.downcast_args::<fn(u32), (u32,)>(), (7u32,));
    }

    #[test]
    #[should_panic(expected = "wrong function identity")]
    fn downcast_args_panics_on_mismatch() {
        let key = Key::new::<fn(u32), _>("f", (7u32,));
        let _ = key.downcast_args::<fn(u32) -> u32, (u32,)>();
    }
}
