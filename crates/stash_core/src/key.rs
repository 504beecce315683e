//! Entry/stack keys, the packed 64-bit address, and monotonic key generation

use core::cmp::Ordering;
use core::fmt;
use core::marker::PhantomData;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StorageError};

/// Raw value carried by an invalid key
pub const INVALID_KEY_VALUE: i32 = -1;

/// Value a fresh or reset [`KeyGenerator`] starts from. The first issued key is one above it.
pub const KEY_BASELINE: i32 = 100;

/// A 32-bit key issued by a [`KeyGenerator`]
pub trait SequentialKey: Copy + Ord + fmt::Debug {
    /// Wrap a raw value
    fn from_value(value: i32) -> Self;

    /// Raw value
    fn value(&self) -> i32;

    /// Whether this key can refer to anything
    fn is_valid(&self) -> bool {
        self.value() > INVALID_KEY_VALUE
    }
}

macro_rules! define_key {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i32);

        impl $name {
            /// The invalid/absent key
            pub const INVALID: Self = Self(INVALID_KEY_VALUE);

            /// Create a key from its raw value
            #[inline]
            pub const fn new(value: i32) -> Self {
                Self(value)
            }

            /// Raw value
            #[inline]
            pub const fn value(&self) -> i32 {
                self.0
            }

            /// Check that this key is not the invalid sentinel
            #[inline]
            pub const fn is_valid(&self) -> bool {
                self.0 > INVALID_KEY_VALUE
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::INVALID
            }
        }

        impl SequentialKey for $name {
            #[inline]
            fn from_value(value: i32) -> Self {
                Self(value)
            }

            #[inline]
            fn value(&self) -> i32 {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                if self.is_valid() {
                    write!(f, "{}({})", stringify!($name), self.0)
                } else {
                    write!(f, "{}(invalid)", stringify!($name))
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_key!(
    /// Identifies one entry inside a storage
    EntryKey
);

define_key!(
    /// Identifies one stack inside an entry
    StackKey
);

/// An entry key and a stack key packed into one 64-bit value.
///
/// Layout: entry key in the high 32 bits, stack key in the low 32 bits. Addresses are
/// persisted and sent over the wire, so the layout must not change.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(i64);

impl Address {
    /// The empty address
    pub const NONE: Self = Self(0);

    const STACK_MASK: i64 = 0x0000_0000_FFFF_FFFF;

    /// Pack an entry key and a stack key
    #[inline]
    pub const fn encode(entry: EntryKey, stack: StackKey) -> Self {
        Self(((entry.value() as i64) << 32) | (stack.value() as i64))
    }

    /// Unpack into `(entry, stack)`
    #[inline]
    pub const fn decode(&self) -> (EntryKey, StackKey) {
        (self.entry(), self.stack())
    }

    /// Entry half
    #[inline]
    pub const fn entry(&self) -> EntryKey {
        EntryKey::new((self.0 >> 32) as i32)
    }

    /// Stack half
    #[inline]
    pub const fn stack(&self) -> StackKey {
        StackKey::new((self.0 & Self::STACK_MASK) as i32)
    }

    /// Create from raw bits
    #[inline]
    pub const fn from_bits(bits: i64) -> Self {
        Self(bits)
    }

    /// Get the raw bits
    #[inline]
    pub const fn to_bits(&self) -> i64 {
        self.0
    }

    /// Whether this address is non-empty. Says nothing about whether it resolves.
    #[inline]
    pub const fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({}:{})", self.entry().value(), self.stack().value())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entry().value(), self.stack().value())
    }
}

impl From<(EntryKey, StackKey)> for Address {
    fn from((entry, stack): (EntryKey, StackKey)) -> Self {
        Self::encode(entry, stack)
    }
}

/// Issues strictly increasing keys. Keys are never handed out twice for the lifetime of
/// the generator, since callers may keep stale keys around and resolve them later.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyGenerator<K> {
    baseline: i32,
    previous: i32,
    _marker: PhantomData<fn() -> K>,
}

impl<K: SequentialKey> KeyGenerator<K> {
    /// Create a generator starting at [`KEY_BASELINE`]
    pub const fn new() -> Self {
        Self::with_baseline(KEY_BASELINE)
    }

    /// Create a generator starting at a custom baseline
    pub const fn with_baseline(baseline: i32) -> Self {
        Self {
            baseline,
            previous: baseline,
            _marker: PhantomData,
        }
    }

    /// Issue the next key. Fails once the 32-bit key space is used up.
    pub fn next_key(&mut self) -> Result<K> {
        let next = self
            .previous
            .checked_add(1)
            .ok_or(StorageError::KeysExhausted(self.previous))?;
        self.previous = next;
        Ok(K::from_value(next))
    }

    /// How many keys can still be issued
    pub fn remaining(&self) -> i64 {
        i64::from(i32::MAX) - i64::from(self.previous)
    }

    /// Highest key issued so far (the baseline if none were issued)
    pub fn position(&self) -> K {
        K::from_value(self.previous)
    }

    /// Fast-forward past `key`, typically the last key of a bulk load
    pub fn set_position(&mut self, key: K) -> Result<()> {
        match key.value().cmp(&self.previous) {
            Ordering::Greater => {
                self.previous = key.value();
                Ok(())
            }
            _ => Err(StorageError::KeyRegression {
                requested: key.value(),
                current: self.previous,
            }),
        }
    }

    /// Rewind to the baseline. Only sound once no previously issued key can be observed.
    pub fn reset(&mut self) {
        self.previous = self.baseline;
    }
}

impl<K: SequentialKey> Default for KeyGenerator<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> fmt::Debug for KeyGenerator<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyGenerator")
            .field("baseline", &self.baseline)
            .field("previous", &self.previous)
            .finish()
    }
}
