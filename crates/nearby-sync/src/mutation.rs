//! Optimistic mutation coordinator.
//!
//! A mutation is applied to every cached copy of an entity before the
//! confirming call is sent. On success nothing else happens. On failure the
//! default policy keeps the local state and surfaces the error, leaving the
//! next refresh to reconcile; [`ConfirmPolicy::Compensate`] applies the
//! mutation's compensation instead.

use std::future::Future;

use tracing::{debug, warn};

use nearby_core::{Entity, Mutation};

use crate::cache::EntityCache;
use crate::error::{Result, SyncError};

/// What to do with the local state when the confirming call fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConfirmPolicy {
    /// Keep the optimistic state.
    #[default]
    KeepLocal,
    /// Undo it with the mutation's compensation, when it has one.
    Compensate,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MutationCoordinator {
    policy: ConfirmPolicy,
}

impl MutationCoordinator {
    pub fn new(policy: ConfirmPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> ConfirmPolicy {
        self.policy
    }

    /// Apply `mutation` to every cached copy of `id`.
    ///
    /// Fails with [`SyncError::Precondition`] when no collection and no
    /// detail slot holds `id`. Returns the number of copies changed.
    pub fn apply_local<T: Entity>(
        &self,
        cache: &EntityCache<T>,
        id: &T::Id,
        mutation: &dyn Mutation<T>,
    ) -> Result<usize> {
        let touched = cache.mutate_everywhere(id, mutation);
        if touched == 0 {
            return Err(SyncError::Precondition(format!(
                "no cached entity with id {id:?}"
            )));
        }
        debug!(?id, ?mutation, copies = touched, "applied local mutation");
        Ok(touched)
    }

    /// Apply locally, then await `confirm`.
    pub async fn apply_and_confirm<T, R, F>(
        &self,
        cache: &EntityCache<T>,
        id: &T::Id,
        mutation: &dyn Mutation<T>,
        confirm: F,
    ) -> Result<R>
    where
        T: Entity,
        F: Future<Output = Result<R>>,
    {
        self.apply_local(cache, id, mutation)?;

        match confirm.await {
            Ok(value) => Ok(value),
            Err(e) => {
                match (self.policy, mutation.compensation()) {
                    (ConfirmPolicy::Compensate, Some(undo)) => {
                        let copies = cache.mutate_everywhere(id, undo.as_ref());
                        warn!(?id, error = %e, copies, "confirmation failed, compensated");
                    }
                    _ => {
                        warn!(?id, error = %e, "confirmation failed, keeping local state");
                    }
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CollectionKey;
    use crate::envelope::ErrorCode;
    use crate::pagination::{PageQuery, Paginator};
    use crate::gateway::RequestGateway;
    use crate::transport::memory::{ok, MemoryTransport};
    use nearby_core::{CheckIn, Cursor, Like, UserId};
    use serde_json::{json, Value};
    use std::sync::Arc;

    #[derive(Debug)]
    struct Feed(&'static str);

    impl PageQuery for Feed {
        type Item = CheckIn;

        fn path(&self) -> &str {
            self.0
        }

        fn body(&self, cursor: Option<&Cursor>, limit: usize) -> Value {
            json!({ "cursor": cursor, "limit": limit })
        }
    }

    fn checkin_json(id: &str, likes: i64) -> Value {
        json!({
            "checkin_id": id,
            "user_id": 1,
            "latitude": 35.16,
            "longitude": 112.68,
            "created_at": "2024-05-01T08:00:00Z",
            "likes_count": likes,
            "liked_by_me": false
        })
    }

    /// `x` listed in two collections and the detail slot.
    async fn seeded() -> (EntityCache<CheckIn>, CollectionKey, CollectionKey) {
        let transport = MemoryTransport::new();
        transport.route("/nearby", |_| {
            Ok(ok(json!({ "items": [checkin_json("x", 3), checkin_json("y", 0)], "has_more": false })))
        });
        transport.route("/history", |_| {
            Ok(ok(json!({ "items": [checkin_json("x", 3)], "has_more": false })))
        });
        let engine = Paginator::new(Arc::new(RequestGateway::anonymous(transport)));

        let cache = EntityCache::new();
        let nearby = CollectionKey::new("nearby");
        let history = CollectionKey::new("history");
        engine.refresh(&cache, &nearby, Feed("/nearby")).await.unwrap();
        engine.refresh(&cache, &history, Feed("/history")).await.unwrap();
        let detail = cache.find(&"x".to_string()).unwrap();
        cache.set_detail(detail);
        (cache, nearby, history)
    }

    fn copies_of(cache: &EntityCache<CheckIn>, keys: &[&CollectionKey], id: &str) -> Vec<CheckIn> {
        let mut out: Vec<CheckIn> = keys
            .iter()
            .flat_map(|k| cache.items(k))
            .filter(|c| c.checkin_id == id)
            .collect();
        out.extend(cache.detail().filter(|c| c.checkin_id == id));
        out
    }

    #[tokio::test]
    async fn test_like_reaches_every_home() {
        let (cache, nearby, history) = seeded().await;
        let coordinator = MutationCoordinator::default();

        let touched = coordinator
            .apply_local(&cache, &"x".to_string(), &Like::like())
            .unwrap();
        assert_eq!(touched, 3);

        let copies = copies_of(&cache, &[&nearby, &history], "x");
        assert_eq!(copies.len(), 3);
        for copy in copies {
            assert!(copy.liked_by_me);
            assert_eq!(copy.likes_count, 4);
        }
        let y = cache.find(&"y".to_string()).unwrap();
        assert_eq!(y.likes_count, 0);
    }

    #[tokio::test]
    async fn test_unknown_id_is_precondition() {
        let (cache, _, _) = seeded().await;
        let err = MutationCoordinator::default()
            .apply_local(&cache, &"missing".to_string(), &Like::like())
            .unwrap_err();
        assert!(err.is_precondition());
    }

    #[tokio::test]
    async fn test_failed_confirm_keeps_local_state() {
        let (cache, nearby, history) = seeded().await;
        let coordinator = MutationCoordinator::default();

        let result: Result<()> = coordinator
            .apply_and_confirm(&cache, &"x".to_string(), &Like::like(), async {
                Err(SyncError::Request {
                    code: ErrorCode::Internal,
                    message: "点赞失败".into(),
                })
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.to_string(), "点赞失败");
        for copy in copies_of(&cache, &[&nearby, &history], "x") {
            assert!(copy.liked_by_me);
            assert_eq!(copy.likes_count, 4);
        }
    }

    #[tokio::test]
    async fn test_failed_confirm_with_compensation() {
        let (cache, nearby, history) = seeded().await;
        let coordinator = MutationCoordinator::new(ConfirmPolicy::Compensate);

        let _ = coordinator
            .apply_and_confirm(&cache, &"x".to_string(), &Like::like(), async {
                Err::<(), _>(SyncError::Auth("expired".into()))
            })
            .await;

        for copy in copies_of(&cache, &[&nearby, &history], "x") {
            assert!(!copy.liked_by_me);
            assert_eq!(copy.likes_count, 3);
        }
    }

    #[tokio::test]
    async fn test_successful_confirm_returns_value() {
        let (cache, _, _) = seeded().await;
        let value = MutationCoordinator::default()
            .apply_and_confirm(&cache, &"x".to_string(), &Like::like(), async { Ok(UserId(1)) })
            .await
            .unwrap();
        assert_eq!(value, UserId(1));
    }
}
