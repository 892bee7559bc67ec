//! The indicator service only ever needs an APT group's display name by
//! id, so that is all it depends on, not the whole `AptGroupRepository`
//! surface. Keeps the indicator and APT-group services from depending on
//! each other.

use async_trait::async_trait;

#[async_trait]
pub trait AptLookup: Send + Sync {
    async fn name_for(&self, apt_id: i64) -> Option<String>;
}

/// Adapts the relational store's `AptGroupRepository` to [`AptLookup`].
pub struct RepositoryAptLookup<R: siem_store::AptGroupRepository> {
    repository: R,
}

impl<R: siem_store::AptGroupRepository> RepositoryAptLookup<R> {
    pub fn new(repository: R) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl<R: siem_store::AptGroupRepository> AptLookup for RepositoryAptLookup<R> {
    async fn name_for(&self, apt_id: i64) -> Option<String> {
        self.repository.get(apt_id).await.ok().flatten().map(|group| group.name)
    }
}
