//! The property tree.
//!
//! Objects expose their state as a tree of named properties. Each object
//! implements [`PropertyContainer`] for one level of the tree and hands out
//! sub-containers for structured properties. [`access_property`] walks a
//! query against that tree in one of the [`AccessMode`]s, deferring
//! properties that need an asynchronous preparation step and draining them
//! strictly in order once the synchronous walk is done.

mod access;
mod container;
mod descriptor;

pub use access::access_property;
pub use container::{NameMatch, PropertyContainer};
pub use descriptor::{
    PropertyDescription, PropertyDescriptor, PropertyDescriptorPtr, PropertyFlags,
};

use crate::ids::AccessDomain;
use crate::value::ApiValuePtr;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessMode {
    Read,
    Write,
    /// Stage a write; only a later `Write` of the same entity commits.
    WritePreload,
    Delete,
}

impl AccessMode {
    /// Write, write-preload or delete.
    pub fn is_write(&self) -> bool {
        !matches!(self, AccessMode::Read)
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AccessMode::Read => "read",
            AccessMode::Write => "write",
            AccessMode::WritePreload => "write-preload",
            AccessMode::Delete => "delete",
        };
        write!(f, "{}", s)
    }
}

/// A deferred access to one descriptor, waiting for
/// [`PropertyContainer::prepare_access`].
pub struct PropertyPreparation {
    pub container: Arc<dyn PropertyContainer>,
    pub descriptor: PropertyDescriptorPtr,
    pub domain: AccessDomain,
    /// Sub-query (read) or new value (write) for this descriptor.
    pub query: ApiValuePtr,
    /// Keys leading from the top-level result to this descriptor's entry.
    pub result_path: Vec<String>,
}

impl fmt::Debug for PropertyPreparation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyPreparation")
            .field("descriptor", &self.descriptor.path())
            .field("domain", &self.domain)
            .field("query", &self.query.description())
            .field("result_path", &self.result_path)
            .finish()
    }
}
