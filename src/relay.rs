//! Relay-style global object identification

use std::fmt;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

use crate::loaders::LoaderSet;
use crate::types::{Entity, EntityKind};
use crate::GraphQLError;

/// Decoded global id: the GraphQL type name plus the entity's local id.
///
/// Encoded as base64 of `"{type_name}:{local_id}"`. GraphQL type names never
/// contain `:`, so splitting on the first one always recovers the pair.
///
/// Only [`EntityKind`] names can be encoded. `decode` accepts any valid type
/// name so that unregistered ones surface as `UnknownType` rather than
/// `MalformedId`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GlobalId {
    pub type_name: String,
    pub local_id: String,
}

impl GlobalId {
    pub fn new(kind: EntityKind, local_id: impl Into<String>) -> Self {
        Self {
            type_name: kind.as_str().to_string(),
            local_id: local_id.into(),
        }
    }

    /// Global id of an already tagged entity
    pub fn of(entity: &Entity) -> Self {
        Self::new(entity.kind(), entity.local_id())
    }

    /// Encode a `(kind, local id)` pair
    pub fn encode(kind: EntityKind, local_id: &str) -> String {
        Self::new(kind, local_id).to_string()
    }

    /// Decode a global id produced by [`GlobalId::encode`]
    pub fn decode(global_id: &str) -> crate::Result<Self> {
        let malformed = || GraphQLError::MalformedId(global_id.to_string());

        let bytes = BASE64.decode(global_id.as_bytes()).map_err(|_| malformed())?;
        let raw = String::from_utf8(bytes).map_err(|_| malformed())?;
        let (type_name, local_id) = raw.split_once(':').ok_or_else(malformed)?;

        if !is_type_name(type_name) {
            return Err(malformed());
        }

        Ok(Self {
            type_name: type_name.to_string(),
            local_id: local_id.to_string(),
        })
    }

    /// Registered entity kind named by this id
    pub fn kind(&self) -> crate::Result<EntityKind> {
        self.type_name.parse()
    }
}

impl fmt::Display for GlobalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&BASE64.encode(format!("{}:{}", self.type_name, self.local_id)))
    }
}

fn is_type_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c == '_' || c.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

/// Concrete kind of a fetched entity.
///
/// Entities are tagged when parsed, so this is a tag read; shapes that match
/// no kind were already rejected with `UnknownType` at parse time.
pub fn resolve_type(entity: &Entity) -> EntityKind {
    entity.kind()
}

/// Decode `global_id` and load the entity through the request's loaders
pub async fn fetch_by_global_id(global_id: &str, loaders: &LoaderSet) -> crate::Result<Entity> {
    let id = GlobalId::decode(global_id)?;
    let kind = id.kind()?;
    loaders.load(kind, &id.local_id).await
}
