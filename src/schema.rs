//! GraphQL schema over the request's [`LoaderSet`]
//!
//! Resolvers never fetch directly: every lookup goes through the loaders the
//! request context injected, so fields resolved in the same wave share batches
//! and cache entries.

use async_graphql::{
    Context, EmptyMutation, EmptySubscription, ErrorExtensions, Interface, Object, Result, Schema,
    ID,
};

use crate::loaders::LoaderSet;
use crate::relay::{fetch_by_global_id, GlobalId};
use crate::types::{Entity, EntityKind, Establishment, Provider};

pub type GatewaySchema = Schema<Query, EmptyMutation, EmptySubscription>;

pub fn build_schema() -> GatewaySchema {
    Schema::build(Query, EmptyMutation, EmptySubscription).finish()
}

fn loaders<'a>(ctx: &'a Context<'_>) -> Result<&'a LoaderSet> {
    ctx.data::<LoaderSet>()
}

/// `NotFound` becomes `null`; every other failure is a field error.
fn nullable<T>(result: crate::Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) if err.is_not_found() => Ok(None),
        Err(err) => Err(err.extend()),
    }
}

/// Relay Node interface - allows fetching any object by global ID
#[derive(Interface)]
#[graphql(field(name = "id", ty = "ID"))]
pub enum Node {
    Provider(Provider),
    Establishment(Establishment),
}

impl From<Entity> for Node {
    fn from(entity: Entity) -> Self {
        match entity {
            Entity::Provider(provider) => Node::Provider(provider),
            Entity::Establishment(establishment) => Node::Establishment(establishment),
        }
    }
}

/// The root of all... queries
pub struct Query;

#[Object]
impl Query {
    /// Everyone, everywhere
    async fn all_providers(&self, ctx: &Context<'_>) -> Result<Vec<Provider>> {
        loaders(ctx)?
            .load_all_providers()
            .await
            .map_err(|e| e.extend())
    }

    async fn provider(&self, ctx: &Context<'_>, id: ID) -> Result<Option<Provider>> {
        nullable(loaders(ctx)?.load_provider(&id).await)
    }

    /// Establishment by local id, `"{providerSlug}/{establishmentId}"`
    async fn establishment(&self, ctx: &Context<'_>, id: ID) -> Result<Option<Establishment>> {
        nullable(loaders(ctx)?.load_establishment(&id).await)
    }

    /// Fetch any node by its global ID
    async fn node(&self, ctx: &Context<'_>, id: ID) -> Result<Option<Node>> {
        nullable(fetch_by_global_id(&id, loaders(ctx)?).await.map(Node::from))
    }
}

/// All Doctors
#[Object]
impl Provider {
    async fn id(&self) -> ID {
        ID(GlobalId::encode(EntityKind::Provider, &self.id))
    }

    /// Doctor First Name
    async fn first_name(&self) -> Option<&str> {
        self.first_name.as_deref()
    }

    /// Doctor Last Name
    async fn last_name(&self) -> Option<&str> {
        self.last_name.as_deref()
    }

    /// Doctor Slug
    async fn slug(&self) -> Option<&str> {
        self.slug.as_deref()
    }

    /// A doctor name sandwich
    async fn full_name(&self) -> String {
        self.display_name()
    }

    /// Clinics where doctor works
    async fn establishments(&self, ctx: &Context<'_>) -> Result<Vec<Establishment>> {
        nullable(
            loaders(ctx)?
                .load_provider_establishments(self.establishments_key())
                .await,
        )
        .map(Option::unwrap_or_default)
    }
}

/// All Establishments
#[Object]
impl Establishment {
    async fn id(&self) -> ID {
        ID(GlobalId::encode(EntityKind::Establishment, &self.local_id()))
    }

    /// Establishment Name
    async fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    #[graphql(deprecation = "Use `name`")]
    async fn first_name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}
