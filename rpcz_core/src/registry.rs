use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::compressor::Compressor;

/// Table of compressors keyed by their wire identifier.
///
/// This is the lookup a transport performs when it sees a message encoding
/// name. Registering a second compressor under an existing name replaces the
/// first; the replaced one is handed back to the caller.
#[derive(Default)]
pub struct Registry {
    codecs: RwLock<HashMap<&'static str, Arc<dyn Compressor>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, codec: Arc<dyn Compressor>) -> Option<Arc<dyn Compressor>> {
        let name = codec.name();
        let previous = self.codecs.write().insert(name, codec);
        if previous.is_some() {
            log::debug!("compressor {name:?} re-registered, previous one shadowed");
        } else {
            log::debug!("compressor {name:?} registered");
        }
        previous
    }

    pub fn unregister(&self, name: &str) -> Option<Arc<dyn Compressor>> {
        self.codecs.write().remove(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Compressor>> {
        self.codecs.read().get(name).cloned()
    }

    /// Like [`get`](Self::get), but an unknown name is an error listing the
    /// registered ones.
    pub fn lookup(&self, name: &str) -> anyhow::Result<Arc<dyn Compressor>> {
        match self.get(name) {
            Some(codec) => Ok(codec),
            None => anyhow::bail!(
                "unknown compressor '{}'. Registered: {}",
                name,
                self.names().join(", ")
            ),
        }
    }

    /// Registered identifiers, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.codecs.read().keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.codecs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.codecs.read().is_empty()
    }
}
