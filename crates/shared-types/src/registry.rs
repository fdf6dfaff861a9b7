//! # Type Registry
//!
//! Maps an envelope type tag to its decoder and, for consumers, its handler.
//!
//! Each consumer and each RPC client owns its own instance; there is no
//! process-wide registry. Registration happens during setup through
//! `&mut self`, after which the registry is shared read-only (typically
//! behind an `Arc`), so lookups take no lock.
//!
//! Dispatch branches on [`Lookup`] rather than on a caught error: an
//! unknown tag is data, not a failure.

use crate::errors::RegistryError;
use crate::message::{decoder_for, Decoder, Message};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// One registration.
pub struct RegisteredType<H> {
    pub type_tag: String,
    pub decoder: Decoder,
    pub handler: Option<H>,
}

/// Result of looking up a tag.
pub enum Lookup<'a, H> {
    /// The tag is registered.
    Matched {
        decoder: Decoder,
        handler: Option<&'a H>,
    },
    /// No registration for the tag.
    Unmatched,
}

impl<H> Lookup<'_, H> {
    /// Returns true for [`Lookup::Matched`].
    pub fn is_matched(&self) -> bool {
        matches!(self, Lookup::Matched { .. })
    }
}

/// Tag → decoder (+ handler) table for one role.
///
/// `H` is the handler type; client-side registries use `()`.
pub struct TypeRegistry<H = ()> {
    role: &'static str,
    entries: HashMap<String, RegisteredType<H>>,
}

impl<H> TypeRegistry<H> {
    /// Create an empty registry. `role` only labels log lines.
    pub fn new(role: &'static str) -> Self {
        Self {
            role,
            entries: HashMap::new(),
        }
    }

    /// Register a decoder (and optional handler) for a tag.
    ///
    /// # Errors
    ///
    /// - `RegistryError::DuplicateType` - the tag is already registered; the
    ///   existing registration is left untouched
    /// - `RegistryError::EmptyTypeTag` - the tag is blank
    pub fn register(
        &mut self,
        type_tag: impl Into<String>,
        decoder: Decoder,
        handler: Option<H>,
    ) -> Result<(), RegistryError> {
        let type_tag = type_tag.into();

        if type_tag.trim().is_empty() {
            return Err(RegistryError::EmptyTypeTag);
        }
        if self.entries.contains_key(&type_tag) {
            return Err(RegistryError::DuplicateType { type_tag });
        }

        debug!(
            role = self.role,
            type_tag = %type_tag,
            with_handler = handler.is_some(),
            "Registered message type"
        );

        self.entries.insert(
            type_tag.clone(),
            RegisteredType {
                type_tag,
                decoder,
                handler,
            },
        );
        Ok(())
    }

    /// Register `M` under its own tag with the default decoder.
    pub fn register_type<M: Message>(&mut self, handler: Option<H>) -> Result<(), RegistryError> {
        self.register(M::TYPE, decoder_for::<M>(), handler)
    }

    /// Look up a tag.
    pub fn lookup(&self, type_tag: &str) -> Lookup<'_, H> {
        match self.entries.get(type_tag) {
            Some(entry) => Lookup::Matched {
                decoder: entry.decoder,
                handler: entry.handler.as_ref(),
            },
            None => Lookup::Unmatched,
        }
    }

    /// All registered tags, sorted.
    pub fn registered_tags(&self) -> BTreeSet<String> {
        self.entries.keys().cloned().collect()
    }

    /// Returns true if the tag is registered.
    pub fn contains(&self, type_tag: &str) -> bool {
        self.entries.contains_key(type_tag)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Label given at construction.
    pub fn role(&self) -> &'static str {
        self.role
    }
}
