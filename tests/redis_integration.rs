//! Redis Integration Tests
//!
//! Exercises the `RediSearch` vector backend against a live server:
//! - Index bootstrap is repeatable
//! - Upsert, read-back and delete
//! - KNN self-match through the typed reply decoder
//!
//! These tests require a running Redis Stack server. Set the environment
//! variable `FINGERLINK_TEST_REDIS_URL` to enable them:
//!
//! ```bash
//! export FINGERLINK_TEST_REDIS_URL="redis://localhost:6379"
//! cargo test --features redis redis_integration
//! ```
//!
//! Tests write to the real scheme indexes with random templates and remove
//! what they wrote.

// Integration tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used, clippy::doc_markdown)]
#![cfg(feature = "redis")]

use fingerlink::models::{SchemeId, TemplateId};
use fingerlink::services::{SimilarityMatcher, TemplateStore};
use fingerlink::storage::{RedisVectorBackend, VectorBackend};
use std::env;
use std::sync::Arc;
use std::time::Duration;

/// Environment variable for Redis test connection URL.
const REDIS_URL_ENV: &str = "FINGERLINK_TEST_REDIS_URL";

/// Returns the Redis connection URL if available, or None to skip tests.
fn get_redis_url() -> Option<String> {
    env::var(REDIS_URL_ENV).ok()
}

/// Macro to skip tests when Redis is not available.
macro_rules! require_redis {
    () => {
        match get_redis_url() {
            Some(url) => url,
            None => {
                eprintln!(
                    "Skipping test: {} not set. Set this environment variable to run Redis tests.",
                    REDIS_URL_ENV
                );
                return;
            },
        }
    };
}

fn random_template(len: usize) -> Vec<u8> {
    let seed = uuid::Uuid::new_v4();
    seed.as_bytes().iter().copied().cycle().take(len).collect()
}

fn backend(url: String) -> Arc<RedisVectorBackend> {
    Arc::new(RedisVectorBackend::new(url, Duration::from_secs(5)).unwrap())
}

#[test]
fn test_health_check_and_bootstrap() {
    let url = require_redis!();
    let backend = backend(url);
    assert!(backend.health_check().unwrap());

    let store = TemplateStore::new(backend);
    store.bootstrap().unwrap();
    store.bootstrap().unwrap();
}

#[test]
fn test_upsert_get_remove() {
    let url = require_redis!();
    let backend = backend(url);
    let scheme = SchemeId::Normalized16.scheme();
    backend.ensure_index(scheme).unwrap();

    let raw = random_template(16);
    let id = TemplateId::from_bytes(&raw);
    let vector = scheme.encode(&raw).unwrap();
    let store = TemplateStore::new(backend);

    store.upsert(&id, &vector).unwrap();
    store.upsert(&id, &vector).unwrap();
    assert!(store.contains(scheme.id, &id).unwrap());
    assert_eq!(store.get(scheme.id, &id).unwrap().as_deref(), Some(vector.values()));
    assert!(store.ids(scheme.id).unwrap().contains(&id));

    assert!(store.remove(scheme.id, &id).unwrap());
    assert!(!store.contains(scheme.id, &id).unwrap());
}

#[test]
fn test_knn_self_match_for_every_scheme() {
    let url = require_redis!();
    let store = TemplateStore::new(backend(url));
    store.bootstrap().unwrap();
    let matcher = SimilarityMatcher::new(store.clone());

    for id in SchemeId::all() {
        let scheme = id.scheme();
        let raw = random_template(scheme.dimension);
        let template_id = TemplateId::from_bytes(&raw);
        let vector = scheme.encode(&raw).unwrap();
        store.upsert(&template_id, &vector).unwrap();

        let hit = matcher.query(&vector).unwrap().unwrap();
        assert_eq!(hit.template_id, template_id, "scheme {id}");
        assert!(hit.distance.abs() <= scheme.threshold, "scheme {id}: {}", hit.distance);

        store.remove(*id, &template_id).unwrap();
    }
}
