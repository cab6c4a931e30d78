//! Loader dimensions for the content API and the per-request [`LoaderSet`].
//!
//! | Dimension | Cache key | Upstream route |
//! |---|---|---|
//! | provider by id | `/providers/{id}/` | `/providers/{id}/?slug=true` |
//! | all providers | `__all__` | `/providers/` |
//! | provider by URL | the path | the path |
//! | establishments of a provider | `/providers/{key}/establishments/` | `/providers/{key}/establishments?slug=true` |
//! | establishment by id | `/establishments/{provider}/{id}/` | via the provider's listing |

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future;
use serde_json::Value;
use tracing::instrument;

use crate::client::Upstream;
use crate::dataloaders::{BatchLoader, CacheMap, DataLoader};
use crate::types::{classify, Entity, EntityKind, Establishment, Provider, Resource};
use crate::GraphQLError;

/// Sentinel key of the all-providers dimension
pub const ALL_PROVIDERS_KEY: &str = "__all__";

type Batch = crate::Result<HashMap<String, crate::Result<Resource>>>;

/// Issue one GET per key concurrently and collect per-key outcomes.
async fn fetch_each<P, F>(upstream: &dyn Upstream, keys: &[String], path: P, parse: F) -> Batch
where
    P: Fn(&str) -> String,
    F: Fn(&str, &str, Value) -> crate::Result<Resource>,
{
    let parse = &parse;
    let fetches = keys.iter().map(|key| {
        let path = path(key.as_str());
        async move {
            let result = match upstream.get_data(&path).await {
                Ok(value) => parse(key.as_str(), &path, value),
                Err(err) => Err(err),
            };
            (key.clone(), result)
        }
    });

    Ok(future::join_all(fetches).await.into_iter().collect())
}

fn parse_list<T>(
    value: Value,
    path: &str,
    parse: impl Fn(Value, usize) -> serde_json::Result<T>,
) -> crate::Result<Vec<T>> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(position, item)| parse(item, position).map_err(|e| GraphQLError::fetch(path, e)))
            .collect(),
        other => Err(GraphQLError::fetch(
            path,
            format!("expected a list, got {}", json_kind(&other)),
        )),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Providers by local id
pub struct ProviderLoader {
    upstream: Arc<dyn Upstream>,
}

#[async_trait]
impl BatchLoader<String, Resource> for ProviderLoader {
    fn name(&self) -> &'static str {
        "provider"
    }

    fn cache_key(&self, key: &String) -> String {
        format!("/providers/{key}/")
    }

    #[instrument(skip(self, keys), fields(key_count = keys.len()))]
    async fn load_batch(&self, keys: &[String]) -> Batch {
        fetch_each(
            self.upstream.as_ref(),
            keys,
            |id| format!("/providers/{id}/?slug=true"),
            |id, path, value| {
                if value.is_null() {
                    return Err(GraphQLError::NotFound(path.to_string()));
                }
                Provider::from_json(value, Some(id))
                    .map(|p| Resource::Entity(Entity::Provider(p)))
                    .map_err(|e| GraphQLError::fetch(path, e))
            },
        )
        .await
    }
}

/// The whole provider collection under a single sentinel key
pub struct AllProvidersLoader {
    upstream: Arc<dyn Upstream>,
}

#[async_trait]
impl BatchLoader<String, Resource> for AllProvidersLoader {
    fn name(&self) -> &'static str {
        "all_providers"
    }

    fn cache_key(&self, key: &String) -> String {
        key.clone()
    }

    #[instrument(skip(self, keys))]
    async fn load_batch(&self, keys: &[String]) -> Batch {
        fetch_each(
            self.upstream.as_ref(),
            keys,
            |_| "/providers/".to_string(),
            |_, path, value| {
                parse_list(value, path, |item, _| Provider::from_json(item, None))
                    .map(|providers| Resource::List(providers.into_iter().map(Entity::Provider).collect()))
            },
        )
        .await
    }
}

/// Anything reachable by a relative URL; the payload is tagged by shape
pub struct UrlLoader {
    upstream: Arc<dyn Upstream>,
}

#[async_trait]
impl BatchLoader<String, Resource> for UrlLoader {
    fn name(&self) -> &'static str {
        "by_url"
    }

    fn cache_key(&self, key: &String) -> String {
        key.clone()
    }

    #[instrument(skip(self, keys), fields(key_count = keys.len()))]
    async fn load_batch(&self, keys: &[String]) -> Batch {
        fetch_each(
            self.upstream.as_ref(),
            keys,
            |url| url.to_string(),
            |_, path, value| classify(value, path),
        )
        .await
    }
}

/// Establishment listings keyed by provider slug (or id)
pub struct EstablishmentsLoader {
    upstream: Arc<dyn Upstream>,
}

#[async_trait]
impl BatchLoader<String, Resource> for EstablishmentsLoader {
    fn name(&self) -> &'static str {
        "provider_establishments"
    }

    fn cache_key(&self, key: &String) -> String {
        format!("/providers/{key}/establishments/")
    }

    #[instrument(skip(self, keys), fields(key_count = keys.len()))]
    async fn load_batch(&self, keys: &[String]) -> Batch {
        fetch_each(
            self.upstream.as_ref(),
            keys,
            |provider| format!("/providers/{provider}/establishments?slug=true"),
            |provider, path, value| {
                parse_list(value, path, |item, position| {
                    Establishment::from_json(item, provider, position)
                })
                .map(|list| Resource::List(list.into_iter().map(Entity::Establishment).collect()))
            },
        )
        .await
    }
}

/// Single establishments by compound local id, picked out of the owning
/// provider's listing
pub struct EstablishmentLoader {
    listings: DataLoader<String, Resource, EstablishmentsLoader>,
}

#[async_trait]
impl BatchLoader<String, Resource> for EstablishmentLoader {
    fn name(&self) -> &'static str {
        "establishment"
    }

    fn cache_key(&self, key: &String) -> String {
        format!("/establishments/{key}/")
    }

    #[instrument(skip(self, keys), fields(key_count = keys.len()))]
    async fn load_batch(&self, keys: &[String]) -> Batch {
        let mut providers = Vec::new();
        let mut seen = HashSet::new();
        for key in keys {
            if let Some((provider, _)) = Establishment::split_local_id(key) {
                if seen.insert(provider) {
                    providers.push(provider.to_string());
                }
            }
        }

        // Dispatch the listing lookups right away instead of waiting a tick.
        let (outcomes, ()) = tokio::join!(
            self.listings.load_many(providers.clone()),
            self.listings.flush()
        );
        let listings: HashMap<String, crate::Result<Resource>> =
            providers.into_iter().zip(outcomes).collect();

        let results = keys
            .iter()
            .map(|key| {
                let result = match Establishment::split_local_id(key) {
                    None => Err(GraphQLError::NotFound(format!("/establishments/{key}/"))),
                    Some((provider, id)) => match listings.get(provider) {
                        Some(Ok(listing)) => find_establishment(listing, id)
                            .ok_or_else(|| GraphQLError::NotFound(format!("/establishments/{key}/"))),
                        Some(Err(err)) => Err(err.clone()),
                        None => Err(GraphQLError::NotFound(format!("/establishments/{key}/"))),
                    },
                };
                (key.clone(), result)
            })
            .collect();

        Ok(results)
    }
}

fn find_establishment(listing: &Resource, id: &str) -> Option<Resource> {
    let entities = match listing {
        Resource::List(entities) => entities.as_slice(),
        Resource::Entity(entity) => std::slice::from_ref(entity),
    };
    entities
        .iter()
        .find(|entity| matches!(entity, Entity::Establishment(e) if e.id == id))
        .cloned()
        .map(Resource::Entity)
}

/// Every loader used while answering one GraphQL operation.
///
/// All dimensions share one [`CacheMap`]. Build a new set for every request;
/// nothing here may outlive it.
#[derive(Clone)]
pub struct LoaderSet {
    cache: CacheMap<Resource>,
    provider: DataLoader<String, Resource, ProviderLoader>,
    all_providers: DataLoader<String, Resource, AllProvidersLoader>,
    by_url: DataLoader<String, Resource, UrlLoader>,
    establishments: DataLoader<String, Resource, EstablishmentsLoader>,
    establishment: DataLoader<String, Resource, EstablishmentLoader>,
}

impl LoaderSet {
    pub fn new(upstream: Arc<dyn Upstream>) -> Self {
        Self::with_delay(upstream, Duration::from_millis(1))
    }

    pub fn with_delay(upstream: Arc<dyn Upstream>, delay: Duration) -> Self {
        let cache = CacheMap::new();

        let establishments = DataLoader::with_cache(
            EstablishmentsLoader {
                upstream: upstream.clone(),
            },
            cache.clone(),
        )
        .delay(delay);

        Self {
            provider: DataLoader::with_cache(
                ProviderLoader {
                    upstream: upstream.clone(),
                },
                cache.clone(),
            )
            .delay(delay),
            all_providers: DataLoader::with_cache(
                AllProvidersLoader {
                    upstream: upstream.clone(),
                },
                cache.clone(),
            )
            .delay(delay),
            by_url: DataLoader::with_cache(UrlLoader { upstream }, cache.clone()).delay(delay),
            establishment: DataLoader::with_cache(
                EstablishmentLoader {
                    listings: establishments.clone(),
                },
                cache.clone(),
            )
            .delay(delay),
            establishments,
            cache,
        }
    }

    /// The request's shared cache map
    pub fn cache(&self) -> &CacheMap<Resource> {
        &self.cache
    }

    pub async fn load_provider(&self, id: &str) -> crate::Result<Provider> {
        self.provider.load(id.to_string()).await?.into_entity()?.into_provider()
    }

    pub async fn load_providers(&self, ids: Vec<String>) -> Vec<crate::Result<Provider>> {
        self.provider
            .load_many(ids)
            .await
            .into_iter()
            .map(|r| r.and_then(Resource::into_entity).and_then(Entity::into_provider))
            .collect()
    }

    /// The full provider collection, fetched at most once per request
    pub async fn load_all_providers(&self) -> crate::Result<Vec<Provider>> {
        self.all_providers
            .load(ALL_PROVIDERS_KEY.to_string())
            .await?
            .into_list()?
            .into_iter()
            .map(Entity::into_provider)
            .collect()
    }

    /// Load by relative resource path, e.g. `/providers/1/?slug=true`
    pub async fn load_by_url(&self, url: &str) -> crate::Result<Entity> {
        self.by_url.load(url.to_string()).await?.into_entity()
    }

    pub async fn load_many_by_url(&self, urls: Vec<String>) -> Vec<crate::Result<Entity>> {
        self.by_url
            .load_many(urls)
            .await
            .into_iter()
            .map(|r| r.and_then(Resource::into_entity))
            .collect()
    }

    /// Load whatever the path returns, single entity or listing
    pub async fn load_resource_by_url(&self, url: &str) -> crate::Result<Resource> {
        self.by_url.load(url.to_string()).await
    }

    /// Load a listing route such as `/providers/{slug}/establishments?slug=true`.
    ///
    /// A single-entity payload comes back as a one-element list.
    pub async fn load_list_by_url(&self, url: &str) -> crate::Result<Vec<Entity>> {
        self.load_resource_by_url(url).await?.into_list()
    }

    pub async fn load_establishment(&self, local_id: &str) -> crate::Result<Establishment> {
        self.establishment
            .load(local_id.to_string())
            .await?
            .into_entity()?
            .into_establishment()
    }

    pub async fn load_establishments(&self, local_ids: Vec<String>) -> Vec<crate::Result<Establishment>> {
        self.establishment
            .load_many(local_ids)
            .await
            .into_iter()
            .map(|r| r.and_then(Resource::into_entity).and_then(Entity::into_establishment))
            .collect()
    }

    /// Establishments listed under a provider slug (or id)
    pub async fn load_provider_establishments(&self, provider_key: &str) -> crate::Result<Vec<Establishment>> {
        self.establishments
            .load(provider_key.to_string())
            .await?
            .into_list()?
            .into_iter()
            .map(Entity::into_establishment)
            .collect()
    }

    /// Load any entity by kind and local id
    pub async fn load(&self, kind: EntityKind, local_id: &str) -> crate::Result<Entity> {
        match kind {
            EntityKind::Provider => self.load_provider(local_id).await.map(Entity::Provider),
            EntityKind::Establishment => self
                .load_establishment(local_id)
                .await
                .map(Entity::Establishment),
        }
    }

    /// Dispatch every pending batch now
    pub async fn flush(&self) {
        tokio::join!(
            self.provider.flush(),
            self.all_providers.flush(),
            self.by_url.flush(),
            self.establishments.flush(),
            self.establishment.flush(),
        );
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    /// In-memory upstream that records every path it serves.
    #[derive(Default)]
    pub(crate) struct FakeUpstream {
        pub routes: HashMap<String, crate::Result<Value>>,
        pub calls: Mutex<Vec<String>>,
    }

    impl FakeUpstream {
        pub fn with(routes: Vec<(&str, crate::Result<Value>)>) -> Arc<Self> {
            Arc::new(Self {
                routes: routes
                    .into_iter()
                    .map(|(path, value)| (path.to_string(), value))
                    .collect(),
                calls: Mutex::new(Vec::new()),
            })
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Upstream for FakeUpstream {
        async fn get_data(&self, relative_path: &str) -> crate::Result<Value> {
            self.calls.lock().unwrap().push(relative_path.to_string());
            self.routes
                .get(relative_path)
                .cloned()
                .unwrap_or(Ok(Value::Null))
        }
    }

    pub(crate) fn provider(id: u32, slug: &str) -> Value {
        json!({
            "id": id,
            "username": slug,
            "slug": slug,
            "name": { "first_name": "Dr", "last_name": slug }
        })
    }

    fn fixture() -> Arc<FakeUpstream> {
        FakeUpstream::with(vec![
            ("/providers/", Ok(json!([provider(1, "one"), provider(2, "two")]))),
            ("/providers/1/?slug=true", Ok(provider(1, "one"))),
            ("/providers/2/?slug=true", Ok(provider(2, "two"))),
            (
                "/providers/one/establishments?slug=true",
                Ok(json!([
                    { "establishment": { "id": 10, "name": "North Clinic" } },
                    { "establishment": { "id": 11, "name": "South Clinic" } }
                ])),
            ),
            ("/broken/", Err(GraphQLError::fetch("/broken/", "connection reset"))),
        ])
    }

    #[tokio::test]
    async fn test_load_provider_once_per_request() {
        let upstream = fixture();
        let loaders = LoaderSet::new(upstream.clone());

        let (a, b) = tokio::join!(loaders.load_provider("1"), loaders.load_provider("1"));
        assert_eq!(a.unwrap(), b.unwrap());
        loaders.load_provider("1").await.unwrap();

        assert_eq!(upstream.calls(), vec!["/providers/1/?slug=true".to_string()]);
        assert!(loaders.cache().contains("/providers/1/").await);
    }

    #[tokio::test]
    async fn test_load_providers_single_batch_in_order() {
        let upstream = fixture();
        let loaders = LoaderSet::new(upstream.clone());

        let results = loaders
            .load_providers(vec!["2".to_string(), "1".to_string(), "404".to_string()])
            .await;

        assert_eq!(results[0].as_ref().unwrap().id, "2");
        assert_eq!(results[1].as_ref().unwrap().id, "1");
        assert!(results[2].as_ref().unwrap_err().is_not_found());
        assert_eq!(upstream.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_load_all_providers_fetched_once() {
        let upstream = fixture();
        let loaders = LoaderSet::new(upstream.clone());

        let (first, second) = tokio::join!(loaders.load_all_providers(), loaders.load_all_providers());
        assert_eq!(first.unwrap().len(), 2);
        assert_eq!(second.unwrap().len(), 2);
        loaders.load_all_providers().await.unwrap();

        assert_eq!(upstream.calls(), vec!["/providers/".to_string()]);
    }

    #[tokio::test]
    async fn test_fresh_loader_sets_do_not_share_cache() {
        let upstream = fixture();

        LoaderSet::new(upstream.clone()).load_all_providers().await.unwrap();
        LoaderSet::new(upstream.clone()).load_all_providers().await.unwrap();

        assert_eq!(upstream.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_load_many_by_url_keeps_order_and_partial_failures() {
        let upstream = fixture();
        let loaders = LoaderSet::new(upstream.clone());

        let results = loaders
            .load_many_by_url(vec!["/providers/1/?slug=true".to_string(), "/broken/".to_string()])
            .await;

        assert_eq!(results[0].as_ref().unwrap().kind(), EntityKind::Provider);
        assert!(matches!(results[1], Err(GraphQLError::Fetch { .. })));
    }

    #[tokio::test]
    async fn test_load_list_by_url_returns_listing() {
        let upstream = fixture();
        let loaders = LoaderSet::new(upstream.clone());
        let url = "/providers/one/establishments?slug=true";

        let listing = loaders.load_list_by_url(url).await.unwrap();
        let again = loaders.load_resource_by_url(url).await.unwrap();

        assert_eq!(listing.len(), 2);
        assert!(listing.iter().all(|e| e.kind() == EntityKind::Establishment));
        assert_eq!(listing[1].local_id(), "one/11");
        assert_eq!(again, Resource::List(listing));
        assert!(matches!(
            loaders.load_by_url(url).await,
            Err(GraphQLError::UnknownType(_))
        ));
        assert_eq!(upstream.calls(), vec![url.to_string()]);
    }

    #[tokio::test]
    async fn test_load_list_by_url_wraps_single_entity() {
        let loaders = LoaderSet::new(fixture());

        let listing = loaders.load_list_by_url("/providers/2/?slug=true").await.unwrap();

        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].kind(), EntityKind::Provider);
    }

    #[tokio::test]
    async fn test_url_and_id_namespaces_do_not_collide() {
        let upstream = fixture();
        let loaders = LoaderSet::new(upstream.clone());

        loaders.load_provider("1").await.unwrap();
        loaders.load_by_url("/providers/1/?slug=true").await.unwrap();
        loaders.load_by_url("/providers/1/?slug=true").await.unwrap();

        assert_eq!(upstream.calls().len(), 2);
        assert_eq!(loaders.cache().len().await, 2);
    }

    #[tokio::test]
    async fn test_establishment_shares_provider_listing() {
        let upstream = fixture();
        let loaders = LoaderSet::new(upstream.clone());

        let (listing, north, south) = tokio::join!(
            loaders.load_provider_establishments("one"),
            loaders.load_establishment("one/10"),
            loaders.load_establishment("one/11"),
        );

        assert_eq!(listing.unwrap().len(), 2);
        assert_eq!(north.unwrap().name.as_deref(), Some("North Clinic"));
        assert_eq!(south.unwrap().local_id(), "one/11");
        assert_eq!(
            upstream.calls(),
            vec!["/providers/one/establishments?slug=true".to_string()]
        );
    }

    #[tokio::test]
    async fn test_one_listing_batch_per_resolver_wave() {
        let upstream = FakeUpstream::with(vec![
            ("/providers/", Ok(json!([provider(1, "one"), provider(2, "two")]))),
            (
                "/providers/one/establishments?slug=true",
                Ok(json!([{ "establishment": { "id": 10, "name": "North Clinic" } }])),
            ),
            (
                "/providers/two/establishments?slug=true",
                Ok(json!([{ "establishment": { "id": 20, "name": "East Clinic" } }])),
            ),
        ]);
        let loaders = LoaderSet::new(upstream.clone());

        let response = crate::schema::build_schema()
            .execute(
                async_graphql::Request::new("{ allProviders { establishments { name } } }")
                    .data(loaders.clone()),
            )
            .await;

        assert!(response.errors.is_empty(), "{:?}", response.errors);
        assert_eq!(loaders.establishments.batches_dispatched(), 1);
        let mut calls = upstream.calls();
        calls.sort();
        assert_eq!(
            calls,
            vec![
                "/providers/".to_string(),
                "/providers/one/establishments?slug=true".to_string(),
                "/providers/two/establishments?slug=true".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_establishment_not_found() {
        let loaders = LoaderSet::new(fixture());

        assert!(loaders.load_establishment("one/99").await.unwrap_err().is_not_found());
        assert!(loaders.load_establishment("no-owner").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_load_dispatches_by_kind() {
        let loaders = LoaderSet::new(fixture());

        let provider = loaders.load(EntityKind::Provider, "2").await.unwrap();
        let establishment = loaders.load(EntityKind::Establishment, "one/10").await.unwrap();

        assert_eq!(provider.kind(), EntityKind::Provider);
        assert_eq!(establishment.kind(), EntityKind::Establishment);
    }

    #[tokio::test]
    async fn test_flush_dispatches_without_waiting() {
        let upstream = fixture();
        let loaders = LoaderSet::with_delay(upstream.clone(), Duration::from_secs(3600));

        let handle = {
            let loaders = loaders.clone();
            tokio::spawn(async move { loaders.load_provider("1").await })
        };
        while !loaders.cache().contains("/providers/1/").await {
            tokio::task::yield_now().await;
        }
        loaders.flush().await;

        let provider = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("flush should dispatch the pending batch")
            .unwrap()
            .unwrap();
        assert_eq!(provider.slug.as_deref(), Some("one"));
    }
}
