//! Slot ownership for content projected out of a shadow boundary.
//!
//! A widget that must live in the light DOM gets a named slot inside the
//! boundary and a same-named container next to the boundary host. The
//! registry makes sure one key is owned by one component at a time; dropping
//! the lease releases the key and removes the container.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use ulid::Ulid;

/// Prefix of generated slot names.
pub const SLOT_PREFIX: &str = "turnstile-";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PortalKey(Ulid);

impl PortalKey {
    pub fn generate() -> Self {
        Self(Ulid::new())
    }

    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    /// Value used for both the `<slot name>` and the container's `slot`
    /// attribute.
    pub fn slot_name(&self) -> String {
        format!("{SLOT_PREFIX}{}", self.0.to_string().to_lowercase())
    }
}

impl fmt::Display for PortalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.slot_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortalError {
    AlreadyClaimed(PortalKey),
}

impl fmt::Display for PortalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortalError::AlreadyClaimed(key) => write!(f, "portal `{key}` is already claimed"),
        }
    }
}

impl std::error::Error for PortalError {}

type Entries<N> = RefCell<HashMap<PortalKey, N>>;

/// Page-wide map from portal key to light-DOM container.
pub struct PortalRegistry<N> {
    entries: Rc<Entries<N>>,
}

impl<N> Clone for PortalRegistry<N> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

impl<N> Default for PortalRegistry<N> {
    fn default() -> Self {
        Self {
            entries: Rc::new(RefCell::new(HashMap::new())),
        }
    }
}

impl<N: Clone + 'static> PortalRegistry<N> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `key` for `container`. `on_release` runs once with the
    /// container when the lease is released or dropped.
    pub fn acquire(
        &self,
        key: PortalKey,
        container: N,
        on_release: impl FnOnce(&N) + 'static,
    ) -> Result<PortalLease<N>, PortalError> {
        let mut entries = self.entries.borrow_mut();
        if entries.contains_key(&key) {
            return Err(PortalError::AlreadyClaimed(key));
        }
        entries.insert(key.clone(), container.clone());
        Ok(PortalLease {
            key,
            container,
            entries: Rc::downgrade(&self.entries),
            on_release: Some(Box::new(on_release)),
        })
    }

    pub fn container(&self, key: &PortalKey) -> Option<N> {
        self.entries.borrow().get(key).cloned()
    }

    pub fn is_claimed(&self, key: &PortalKey) -> bool {
        self.entries.borrow().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exclusive claim on one portal key.
pub struct PortalLease<N> {
    key: PortalKey,
    container: N,
    entries: Weak<Entries<N>>,
    on_release: Option<Box<dyn FnOnce(&N)>>,
}

impl<N> PortalLease<N> {
    pub fn key(&self) -> &PortalKey {
        &self.key
    }

    pub fn container(&self) -> &N {
        &self.container
    }

    pub fn slot_name(&self) -> String {
        self.key.slot_name()
    }

    /// Same as dropping the lease.
    pub fn release(self) {}
}

impl<N> Drop for PortalLease<N> {
    fn drop(&mut self) {
        if let Some(entries) = self.entries.upgrade() {
            entries.borrow_mut().remove(&self.key);
        }
        if let Some(on_release) = self.on_release.take() {
            on_release(&self.container);
        }
    }
}
