//! Maps of values, traced by the collector.
//!
//! A map may have a prototype. Lookups that miss fall through to the prototype,
//! which is how a grammar inherits rules it doesn't define itself.

use std::ops::{Deref, DerefMut};

use gc::{Finalize, Trace};
use hashable::HashableHashMap;

use crate::{Expr, Value};

#[derive(PartialEq, Eq, Hash, Clone, Derivative)]
#[derivative(Debug)]
pub struct GcMap {
    entries: HashableHashMap<Value, Value>,
    proto: Option<Value>,
}

impl GcMap {
    pub fn new() -> GcMap {
        GcMap {
            entries: HashableHashMap::new(),
            proto: None,
        }
    }

    /// Make an empty map whose misses fall through to `proto`.
    pub fn with_proto(proto: Value) -> GcMap {
        GcMap {
            entries: HashableHashMap::new(),
            proto: Some(proto),
        }
    }

    pub fn proto(&self) -> Option<&Value> {
        self.proto.as_ref()
    }

    /// Look the key up here, then up the prototype chain.
    ///
    /// A prototype that isn't a map ends the chain.
    pub fn lookup(&self, key: &Expr) -> Option<Value> {
        let mut map = self;
        loop {
            if let Some(found) = map.entries.get(key) {
                return Some(found.clone());
            }
            match map.proto.as_deref() {
                Some(Expr::Map(parent)) => map = parent,
                _ => return None,
            }
        }
    }
}

impl Finalize for GcMap {}
unsafe impl Trace for GcMap {
    custom_trace!(this, {
        for (k, v) in this.entries.iter() {
            mark(k);
            mark(v);
        }
        if let Some(proto) = &this.proto {
            mark(proto);
        }
    });
}

// Everything but the prototype acts like the plain map.
impl Deref for GcMap {
    type Target = HashableHashMap<Value, Value>;

    fn deref(&self) -> &Self::Target {
        &self.entries
    }
}

impl DerefMut for GcMap {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.entries
    }
}

impl Default for GcMap {
    fn default() -> Self {
        Self::new()
    }
}

impl From<HashableHashMap<Value, Value>> for GcMap {
    fn from(entries: HashableHashMap<Value, Value>) -> Self {
        Self {
            entries,
            proto: None,
        }
    }
}
