//! Integration tests running content queries through the executor.

use contentql_content::{
    add_base_fields, ContentConfig, ContentEntity, ContentGraph, InMemoryContentStore,
    ReferenceField, ReferenceItem, StorageCall, TranslationData,
};
use contentql_runtime::{ExecutorConfig, Field, FieldValue, PathSegment, Request};
use serde_json::json;
use std::sync::Arc;

/// Two pages (one translated, with two revisions) and an article.
fn store() -> Arc<InMemoryContentStore> {
    let store = InMemoryContentStore::new();
    store.save(
        ContentEntity::new("node", 1, "page", "en", TranslationData::new("About").at(200, 200))
            .with_translation("fr", TranslationData::new("A propos").at(200, 200)),
    );
    store.save(ContentEntity::new(
        "node",
        2,
        "page",
        "en",
        TranslationData::new("Contact").at(100, 100),
    ));
    store.save(
        ContentEntity::new("node", 1, "page", "en", TranslationData::new("About us").at(200, 300))
            .with_translation("fr", TranslationData::new("A propos de nous").at(200, 300)),
    );
    store.save(ContentEntity::new(
        "node",
        3,
        "article",
        "en",
        TranslationData::new("News").at(50, 50),
    ));
    store.set_alias("node", 1, "en", "/about");
    store.set_alias("node", 1, "fr", "/a-propos");
    store.clear_calls();
    Arc::new(store)
}

fn graph(store: &Arc<InMemoryContentStore>) -> ContentGraph {
    ContentGraph::builder()
        .config(ContentConfig::new().map_type("article", "Article"))
        .collaborators(Arc::clone(store))
        .build()
        .unwrap()
}

fn content(path: &str) -> Field {
    Field::new("content").arg("path", path)
}

fn load_calls(store: &InMemoryContentStore) -> Vec<StorageCall> {
    store
        .calls()
        .into_iter()
        .filter(|call| !matches!(call, StorageCall::Query(_)))
        .collect()
}

/// Test that a path with no content serializes to a null field and nothing else.
#[tokio::test]
async fn test_absent_path_is_null() {
    let store = store();
    let response = graph(&store)
        .execute(&Request::new(vec![content("/node/999").fields(["label"])]))
        .await;

    assert_eq!(
        serde_json::to_string(&response).unwrap(),
        r#"{"data":{"content":null}}"#
    );
    assert!(response.cache.tags.contains("node_list"));
    assert!(response.cache.tags.contains("4xx-response"));
}

/// Test that a path no route matches is null and invalidated by new content.
#[tokio::test]
async fn test_unrouted_path_is_null() {
    let store = store();
    let response = graph(&store)
        .execute(&Request::new(vec![content("/no-such-alias").fields(["label"])]))
        .await;

    assert_eq!(
        serde_json::to_string(&response).unwrap(),
        r#"{"data":{"content":null}}"#
    );
    assert!(response.cache.tags.contains("node_list"));
    assert!(response.cache.tags.contains("4xx-response"));
    assert!(store.calls().is_empty());
}

/// Test that the latest revision is the default and a revision argument wins.
#[tokio::test]
async fn test_revision_precedence() {
    let store = store();
    let graph = graph(&store);
    let request = Request::new(vec![
        content("/node/1").alias("latest").fields(["label", "revision"]),
        content("/node/1")
            .alias("first")
            .arg("revision", 1)
            .fields(["label", "revision"]),
    ]);

    let response = graph.execute(&request).await;

    assert_eq!(
        response.data.unwrap(),
        json!({
            "latest": {"label": "About us", "revision": 3},
            "first": {"label": "About", "revision": 1}
        })
    );
}

/// Test that a revision of another entity is not served under this path.
#[tokio::test]
async fn test_foreign_revision_is_absent() {
    let store = store();
    let response = graph(&store)
        .execute(&Request::new(vec![content("/node/1")
            .arg("revision", 2)
            .fields(["label"])]))
        .await;

    assert_eq!(response.data.clone().unwrap(), json!({"content": null}));
    assert!(!response.has_errors());
}

/// Test translation selection and the fallback to the base language.
#[tokio::test]
async fn test_language_fallback() {
    let store = store();
    let graph = graph(&store);
    let request = Request::new(vec![
        content("/node/1")
            .alias("french")
            .arg("lang", "fr")
            .fields(["label", "lang", "path"]),
        content("/node/1")
            .alias("german")
            .arg("langcode", "de")
            .fields(["label", "lang", "path"]),
    ]);

    let response = graph.execute(&request).await;

    assert_eq!(
        response.data.unwrap(),
        json!({
            "french": {"label": "A propos de nous", "lang": "fr", "path": "/a-propos"},
            "german": {"label": "About us", "lang": "en", "path": "/about"}
        })
    );
    assert!(response.cache.contexts.contains("static:language:fr"));
    assert!(!response.cache.contexts.contains("static:language:de"));
}

/// Test that lookups of one level are fetched in a single storage call.
#[tokio::test]
async fn test_lookups_coalesce() {
    let store = store();
    let graph = graph(&store);
    let request = Request::new(vec![
        content("/node/1").alias("a").fields(["label"]),
        content("/node/2").alias("b").fields(["label"]),
        content("/about").alias("c").fields(["label"]),
        content("/node/1").alias("d").arg("lang", "fr").fields(["label"]),
    ]);

    let response = graph.execute(&request).await;

    assert_eq!(
        response.data.unwrap(),
        json!({
            "a": {"label": "About us"},
            "b": {"label": "Contact"},
            "c": {"label": "About us"},
            "d": {"label": "A propos de nous"}
        })
    );
    assert_eq!(
        load_calls(&store),
        vec![StorageCall::LoadMany {
            entity_type: "node".to_string(),
            ids: vec![1, 2],
        }]
    );
}

/// Test that an entity loaded by an earlier batch is served from the request cache.
#[tokio::test]
async fn test_later_batches_reuse_loaded_entities() {
    let store = store();
    let graph = graph(&store);
    let request = Request::new(vec![
        content("/node/1").fields(["label"]),
        Field::new("contentPaths")
            .arg("type", "page")
            .fields(["path"]),
    ]);

    let response = graph.execute(&request).await;

    assert!(!response.has_errors());
    assert_eq!(
        load_calls(&store),
        vec![
            StorageCall::LoadMany {
                entity_type: "node".to_string(),
                ids: vec![1],
            },
            StorageCall::LoadMany {
                entity_type: "node".to_string(),
                ids: vec![2],
            },
        ]
    );
}

/// Test that content paths come in creation order, one per translation,
/// with every translation on its entity's path.
#[tokio::test]
async fn test_content_paths_order() {
    let store = store();
    let request = Request::new(vec![Field::new("contentPaths")
        .arg("type", "page")
        .fields(["path", "langcode"])]);

    let response = graph(&store).execute(&request).await;

    assert_eq!(
        response.data.unwrap(),
        json!({"contentPaths": [
            {"path": "/node/2", "langcode": "en"},
            {"path": "/about", "langcode": "en"},
            {"path": "/about", "langcode": "fr"}
        ]})
    );
    let queries: Vec<_> = store
        .calls()
        .into_iter()
        .filter(|call| matches!(call, StorageCall::Query(_)))
        .collect();
    assert_eq!(queries.len(), 1);
    assert_eq!(load_calls(&store).len(), 1);
    assert!(response.cache.tags.contains("node_list"));
    assert!(response.cache.contexts.contains("user.node_grants:view"));
}

/// Test that content a viewer may not see is null without an error.
#[tokio::test]
async fn test_denied_content_is_null() {
    let store = store();
    store.deny_view("node", 2);

    let response = graph(&store)
        .execute(&Request::new(vec![content("/node/2").fields(["label"])]))
        .await;

    assert_eq!(
        serde_json::to_string(&response).unwrap(),
        r#"{"data":{"content":null}}"#
    );
    assert!(response.cache.contexts.contains("user.permissions"));
}

/// Test that an unmapped bundle fails only its own field.
#[tokio::test]
async fn test_unmapped_bundle_is_a_field_error() {
    let store = store();
    let graph = ContentGraph::builder()
        .collaborators(Arc::clone(&store))
        .build()
        .unwrap();
    let request = Request::new(vec![
        content("/node/3").fields(["__typename", "label"]),
        content("/node/2").alias("other").fields(["__typename", "label"]),
    ]);

    let response = graph.execute(&request).await;

    assert_eq!(
        response.data.clone().unwrap(),
        json!({
            "content": null,
            "other": {"__typename": "Page", "label": "Contact"}
        })
    );
    let errors = response.errors.unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].path, Some(vec![PathSegment::Field("content".into())]));
    assert_eq!(
        errors[0].extensions.as_ref().unwrap()["code"],
        json!("TYPE_RESOLUTION_FAILED")
    );
    assert!(errors[0].message.contains("article"));
}

/// Test that a failed bulk load is reported by every field that waited on it.
#[tokio::test]
async fn test_bulk_load_failure() {
    let store = store();
    store.fail_loads("database unavailable");
    let request = Request::new(vec![
        content("/node/1").alias("a").fields(["label"]),
        content("/node/2").alias("b").fields(["label"]),
    ]);

    let response = graph(&store).execute(&request).await;

    assert_eq!(response.data.clone().unwrap(), json!({"a": null, "b": null}));
    let errors = response.errors.unwrap();
    assert_eq!(errors.len(), 2);
    assert!(errors
        .iter()
        .all(|error| error.message.contains("database unavailable")));
    assert_eq!(load_calls(&store).len(), 1);
}

/// Test that host resolvers registered first are not replaced.
#[tokio::test]
async fn test_host_resolvers_win() {
    let store = store();
    let graph = ContentGraph::builder()
        .collaborators(Arc::clone(&store))
        .register(|resolvers| {
            resolvers.add_fn("Page", "label", |_, _, _, _| {
                Ok(FieldValue::leaf("Custom label"))
            });
        })
        .build()
        .unwrap();

    let response = graph
        .execute(&Request::new(vec![content("/node/2").fields(["label", "id"])]))
        .await;

    assert_eq!(
        response.data.unwrap(),
        json!({"content": {"label": "Custom label", "id": 2}})
    );
}

/// Test a request decoded from its JSON envelope, with variables.
#[tokio::test]
async fn test_request_envelope() {
    let store = store();
    let request: Request = serde_json::from_value(json!({
        "query": [{
            "name": "content",
            "arguments": {"path": {"$var": "path"}, "lang": {"$var": "lang"}},
            "selection": [
                {"name": "__typename"},
                {"name": "uuid"},
                {"name": "label", "alias": "title"},
                {"name": "created"},
                {"name": "changed"}
            ]
        }],
        "variables": {"path": "about", "lang": "fr"},
        "operationName": "Page"
    }))
    .unwrap();

    let response = graph(&store).execute(&request).await;

    assert_eq!(
        response.to_json(),
        json!({"data": {"content": {
            "__typename": "Page",
            "uuid": "00000000-0000-4000-8000-000000000001",
            "title": "A propos de nous",
            "created": 200,
            "changed": 300
        }}})
    );
}

/// Test that a missing path argument is a field error.
#[tokio::test]
async fn test_missing_path_argument() {
    let store = store();
    let response = graph(&store)
        .execute(&Request::new(vec![Field::new("content").fields(["label"])]))
        .await;

    assert_eq!(response.data.clone().unwrap(), json!({"content": null}));
    assert_eq!(
        response.errors.unwrap()[0].extensions.as_ref().unwrap()["code"],
        json!("BAD_USER_INPUT")
    );
}

/// Test that cache metadata is exposed when configured.
#[tokio::test]
async fn test_cache_metadata_extension() {
    let store = store();
    let graph = ContentGraph::builder()
        .config(ContentConfig::new().map_type("article", "Article"))
        .executor_config(ExecutorConfig {
            expose_cache_metadata: true,
            ..ExecutorConfig::default()
        })
        .collaborators(Arc::clone(&store))
        .build()
        .unwrap();

    let response = graph
        .execute(&Request::new(vec![content("/node/1")
            .arg("lang", "fr")
            .fields(["label"])]))
        .await;

    let cache = &response.to_json()["extensions"]["cache"];
    assert!(cache["tags"]
        .as_array()
        .unwrap()
        .contains(&json!("node:1")));
    assert!(cache["contexts"]
        .as_array()
        .unwrap()
        .contains(&json!("static:language:fr")));
}

/// Pages linking to guides (one with a draft revision) which name their authors.
fn linked_store() -> Arc<InMemoryContentStore> {
    let store = InMemoryContentStore::new();
    store.save(ContentEntity::new("user", 30, "person", "en", TranslationData::new("Ada")));
    store.save(ContentEntity::new("user", 31, "person", "en", TranslationData::new("Grace")));
    let author = |id| ReferenceItem::new("user", id);
    store.save(
        ContentEntity::new("node", 20, "page", "en", TranslationData::new("Guide draft"))
            .with_reference("field_author", author(30)),
    );
    store.save(
        ContentEntity::new("node", 21, "page", "en", TranslationData::new("FAQ"))
            .with_reference("field_author", author(31)),
    );
    store.save(
        ContentEntity::new("node", 20, "page", "en", TranslationData::new("Guide"))
            .with_reference("field_author", author(30)),
    );
    let related = |id| ReferenceItem::new("node", id);
    store.save(
        ContentEntity::new("node", 10, "page", "en", TranslationData::new("Home"))
            .with_reference("field_related", related(20))
            .with_reference("field_related", related(21)),
    );
    store.save(
        ContentEntity::new("node", 11, "page", "en", TranslationData::new("Blog"))
            .with_reference("field_related", related(21)),
    );
    store.save(
        ContentEntity::new("node", 12, "page", "en", TranslationData::new("Shop"))
            .with_reference("field_related", related(20).at_revision(3)),
    );
    store.clear_calls();
    Arc::new(store)
}

fn linked_graph(store: &Arc<InMemoryContentStore>) -> ContentGraph {
    let config = ContentConfig::new()
        .map_type("person", "Person")
        .reference(ReferenceField::entity("Page", "related", "field_related"))
        .reference(ReferenceField::revision("Page", "pinned", "field_related"))
        .reference(ReferenceField::entity("Page", "author", "field_author").single())
        .reference(ReferenceField::reverse(
            "Page",
            "mentionedBy",
            "node",
            "field_related",
        ));
    ContentGraph::builder()
        .config(config)
        .collaborators(Arc::clone(store))
        .register(|resolvers| add_base_fields(resolvers, "Page", &["status", "field_related"]))
        .build()
        .unwrap()
}

/// Test that references of every parent on a level load in one storage call
/// per level.
#[tokio::test]
async fn test_references_load_once_per_level() {
    let store = linked_store();
    let related = Field::new("related")
        .fields(["label"])
        .select(Field::new("author").fields(["label"]));
    let request = Request::new(vec![
        content("/node/10").alias("a").fields(["label"]).select(related.clone()),
        content("/node/11").alias("b").fields(["label"]).select(related.clone()),
        content("/node/12").alias("c").fields(["label"]).select(related),
    ]);

    let response = linked_graph(&store).execute(&request).await;

    let guide = json!({"label": "Guide", "author": {"label": "Ada"}});
    let faq = json!({"label": "FAQ", "author": {"label": "Grace"}});
    assert_eq!(
        response.data.unwrap(),
        json!({
            "a": {"label": "Home", "related": [guide, faq]},
            "b": {"label": "Blog", "related": [faq]},
            "c": {"label": "Shop", "related": [guide]}
        })
    );
    assert_eq!(
        store.calls(),
        vec![
            StorageCall::LoadMany {
                entity_type: "node".to_string(),
                ids: vec![10, 11, 12],
            },
            StorageCall::LoadMany {
                entity_type: "node".to_string(),
                ids: vec![20, 21],
            },
            StorageCall::LoadMany {
                entity_type: "user".to_string(),
                ids: vec![30, 31],
            },
        ]
    );
}

/// Test revision references, reverse references and base field callbacks.
#[tokio::test]
async fn test_reference_kinds() {
    let store = linked_store();
    let request = Request::new(vec![
        content("/node/12")
            .alias("shop")
            .fields(["status", "field_related"])
            .select(Field::new("pinned").fields(["label", "revision"]))
            .select(Field::new("author").fields(["label"])),
        content("/node/21")
            .alias("faq")
            .select(Field::new("mentionedBy").fields(["label"])),
    ]);

    let response = linked_graph(&store).execute(&request).await;

    assert!(!response.has_errors());
    assert_eq!(
        response.data.unwrap(),
        json!({
            "shop": {
                "status": true,
                "field_related": [20],
                "pinned": [{"label": "Guide draft", "revision": 3}],
                "author": null
            },
            "faq": {"mentionedBy": [{"label": "Home"}, {"label": "Blog"}]}
        })
    );
    assert!(response.cache.tags.contains("node_list"));
    assert!(store.calls().contains(&StorageCall::LoadRevisions {
        entity_type: "node".to_string(),
        revision_ids: vec![3],
    }));
}
