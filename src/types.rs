//! Domain entities returned by the content API
//!
//! Every entity carries an explicit [`EntityKind`] tag assigned when the
//! upstream JSON is parsed, so type dispatch never inspects shapes again.

use std::fmt;
use std::str::FromStr;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::GraphQLError;

/// Concrete entity kinds exposed through the `Node` interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Provider,
    Establishment,
}

impl EntityKind {
    pub const ALL: [EntityKind; 2] = [EntityKind::Provider, EntityKind::Establishment];

    /// GraphQL type name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Provider => "Provider",
            Self::Establishment => "Establishment",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = GraphQLError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| GraphQLError::UnknownType(s.to_string()))
    }
}

/// A doctor listed by the content API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Provider {
    pub id: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub slug: Option<String>,
}

impl Provider {
    /// Parse an upstream provider object.
    ///
    /// Upstream detail responses sometimes omit `id`; `fallback_id` (the id
    /// the object was requested by) fills it in, then the slug.
    pub fn from_json(value: Value, fallback_id: Option<&str>) -> serde_json::Result<Self> {
        let raw: RawProvider = serde_json::from_value(value)?;
        let id = raw
            .id
            .or_else(|| fallback_id.map(str::to_string))
            .or_else(|| raw.slug.clone())
            .ok_or_else(|| <serde_json::Error as de::Error>::custom("provider has neither id nor slug"))?;

        let name = raw.name.unwrap_or_default();

        Ok(Self {
            id,
            first_name: name.first_name,
            last_name: name.last_name,
            slug: raw.slug,
        })
    }

    pub fn display_name(&self) -> String {
        format!(
            "{} {}",
            self.first_name.as_deref().unwrap_or_default(),
            self.last_name.as_deref().unwrap_or_default()
        )
    }

    /// Key used to list this provider's establishments
    pub fn establishments_key(&self) -> &str {
        self.slug.as_deref().unwrap_or(&self.id)
    }
}

/// A clinic where a provider practices.
///
/// Establishments are only listed per provider, so the local id is the
/// compound `"{provider}/{id}"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Establishment {
    pub id: String,
    pub provider: String,
    pub name: Option<String>,
}

impl Establishment {
    pub fn from_json(value: Value, provider: &str, position: usize) -> serde_json::Result<Self> {
        let body = match serde_json::from_value::<RawEstablishment>(value)? {
            RawEstablishment::Nested { establishment } => establishment,
            RawEstablishment::Flat(body) => body,
        };

        Ok(Self {
            id: body.id.unwrap_or_else(|| position.to_string()),
            provider: provider.to_string(),
            name: body.name,
        })
    }

    pub fn local_id(&self) -> String {
        format!("{}/{}", self.provider, self.id)
    }

    /// Split a compound local id into `(provider, establishment id)`
    pub fn split_local_id(local_id: &str) -> Option<(&str, &str)> {
        local_id
            .rsplit_once('/')
            .filter(|(provider, id)| !provider.is_empty() && !id.is_empty())
    }
}

/// Tagged entity; the tag is fixed at parse time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entity {
    Provider(Provider),
    Establishment(Establishment),
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Provider(_) => EntityKind::Provider,
            Self::Establishment(_) => EntityKind::Establishment,
        }
    }

    pub fn local_id(&self) -> String {
        match self {
            Self::Provider(provider) => provider.id.clone(),
            Self::Establishment(establishment) => establishment.local_id(),
        }
    }

    pub fn into_provider(self) -> crate::Result<Provider> {
        match self {
            Self::Provider(provider) => Ok(provider),
            other => Err(GraphQLError::UnknownType(format!(
                "expected Provider, found {}",
                other.kind()
            ))),
        }
    }

    pub fn into_establishment(self) -> crate::Result<Establishment> {
        match self {
            Self::Establishment(establishment) => Ok(establishment),
            other => Err(GraphQLError::UnknownType(format!(
                "expected Establishment, found {}",
                other.kind()
            ))),
        }
    }
}

/// Value stored in a request's cache map: one entity or a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    Entity(Entity),
    List(Vec<Entity>),
}

impl Resource {
    pub fn into_entity(self) -> crate::Result<Entity> {
        match self {
            Self::Entity(entity) => Ok(entity),
            Self::List(_) => Err(GraphQLError::UnknownType(
                "expected a single entity, found a list".to_string(),
            )),
        }
    }

    pub fn into_list(self) -> crate::Result<Vec<Entity>> {
        match self {
            Self::List(entities) => Ok(entities),
            Self::Entity(entity) => Ok(vec![entity]),
        }
    }
}

/// Tag an untyped upstream payload fetched from `path`.
///
/// Used for direct URL loads where the route does not tell us the kind.
pub fn classify(value: Value, path: &str) -> crate::Result<Resource> {
    match value {
        Value::Null => Err(GraphQLError::NotFound(path.to_string())),
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(position, item)| classify_entity(item, path, position))
            .collect::<crate::Result<Vec<_>>>()
            .map(Resource::List),
        other => classify_entity(other, path, 0).map(Resource::Entity),
    }
}

fn classify_entity(value: Value, path: &str, position: usize) -> crate::Result<Entity> {
    let looks_like_provider = value.get("username").is_some()
        || value
            .get("name")
            .is_some_and(|name| name.get("first_name").is_some());
    let looks_like_establishment = value.get("establishment").is_some_and(Value::is_object);

    match (looks_like_provider, looks_like_establishment) {
        (true, false) => Provider::from_json(value, None)
            .map(Entity::Provider)
            .map_err(|e| GraphQLError::fetch(path, e)),
        (false, true) => {
            let owner = provider_key_from_path(path).ok_or_else(|| {
                GraphQLError::UnknownType(format!("establishment outside a provider listing: {path}"))
            })?;
            Establishment::from_json(value, owner, position)
                .map(Entity::Establishment)
                .map_err(|e| GraphQLError::fetch(path, e))
        }
        _ => Err(GraphQLError::UnknownType(format!(
            "unrecognized entity shape at {path}"
        ))),
    }
}

/// Extract `{key}` from `/providers/{key}/establishments...`
pub(crate) fn provider_key_from_path(path: &str) -> Option<&str> {
    let path = path.split('?').next().unwrap_or(path);
    let mut segments = path.split('/').filter(|s| !s.is_empty());
    match (segments.next(), segments.next(), segments.next()) {
        (Some("providers"), Some(key), Some("establishments")) => Some(key),
        _ => None,
    }
}

#[derive(Deserialize)]
struct RawProvider {
    #[serde(default, deserialize_with = "opt_id")]
    id: Option<String>,
    #[serde(default)]
    slug: Option<String>,
    #[serde(default)]
    name: Option<RawName>,
}

#[derive(Deserialize, Default)]
struct RawName {
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawEstablishment {
    Nested { establishment: RawEstablishmentBody },
    Flat(RawEstablishmentBody),
}

#[derive(Deserialize)]
struct RawEstablishmentBody {
    #[serde(default, deserialize_with = "opt_id")]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

/// Upstream ids arrive as numbers or strings
fn opt_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(de::Error::custom(format!(
            "expected string or number id, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn provider_json() -> Value {
        json!({
            "id": 42,
            "username": "dr-jane",
            "slug": "dr-jane-doe",
            "name": { "first_name": "Jane", "last_name": "Doe" }
        })
    }

    #[test]
    fn test_provider_from_json() {
        let provider = Provider::from_json(provider_json(), None).unwrap();
        assert_eq!(provider.id, "42");
        assert_eq!(provider.slug.as_deref(), Some("dr-jane-doe"));
        assert_eq!(provider.display_name(), "Jane Doe");
        assert_eq!(provider.establishments_key(), "dr-jane-doe");
    }

    #[test]
    fn test_provider_fallback_id() {
        let provider = Provider::from_json(json!({ "name": {} }), Some("7")).unwrap();
        assert_eq!(provider.id, "7");
        assert!(Provider::from_json(json!({ "name": {} }), None).is_err());
    }

    #[test]
    fn test_establishment_nested_and_flat() {
        let nested = Establishment::from_json(
            json!({ "establishment": { "id": 3, "name": "City Clinic" } }),
            "dr-jane-doe",
            0,
        )
        .unwrap();
        assert_eq!(nested.local_id(), "dr-jane-doe/3");
        assert_eq!(nested.name.as_deref(), Some("City Clinic"));

        let flat = Establishment::from_json(json!({ "name": "Annex" }), "dr-jane-doe", 4).unwrap();
        assert_eq!(flat.local_id(), "dr-jane-doe/4");
    }

    #[test]
    fn test_split_local_id() {
        assert_eq!(Establishment::split_local_id("slug/3"), Some(("slug", "3")));
        assert_eq!(Establishment::split_local_id("3"), None);
        assert_eq!(Establishment::split_local_id("/3"), None);
    }

    #[test]
    fn test_entity_kind_from_str() {
        assert_eq!("Provider".parse::<EntityKind>().unwrap(), EntityKind::Provider);
        assert_eq!(
            "Establishment".parse::<EntityKind>().unwrap(),
            EntityKind::Establishment
        );
        assert!(matches!(
            "Clinic".parse::<EntityKind>(),
            Err(GraphQLError::UnknownType(_))
        ));
    }

    #[test]
    fn test_classify_provider_shape() {
        let resource = classify(provider_json(), "/providers/42/?slug=true").unwrap();
        let entity = resource.into_entity().unwrap();
        assert_eq!(entity.kind(), EntityKind::Provider);
    }

    #[test]
    fn test_classify_establishment_listing() {
        let payload = json!([
            { "establishment": { "id": 1, "name": "A" } },
            { "establishment": { "id": 2, "name": "B" } }
        ]);
        let list = classify(payload, "/providers/dr-jane-doe/establishments?slug=true")
            .unwrap()
            .into_list()
            .unwrap();
        assert_eq!(list.len(), 2);
        assert!(list.iter().all(|e| e.kind() == EntityKind::Establishment));
        assert_eq!(list[1].local_id(), "dr-jane-doe/2");
    }

    #[test]
    fn test_classify_unknown_shape() {
        let err = classify(json!({ "title": "?" }), "/misc/").unwrap_err();
        assert!(matches!(err, GraphQLError::UnknownType(_)));
    }

    #[test]
    fn test_classify_null_is_not_found() {
        assert!(classify(Value::Null, "/providers/9/").unwrap_err().is_not_found());
    }

    #[test]
    fn test_provider_key_from_path() {
        assert_eq!(
            provider_key_from_path("/providers/abc/establishments?slug=true"),
            Some("abc")
        );
        assert_eq!(provider_key_from_path("/providers/abc/?slug=true"), None);
    }
}
