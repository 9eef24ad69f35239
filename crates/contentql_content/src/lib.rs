//! Content resolvers for contentql.
//!
//! This crate resolves content entities by path, revision and language, and
//! lists content paths per translation, without N+1 storage round trips:
//! - `storage`: collaborator traits (storage, routing, access, URLs)
//! - `buffers`: request-scoped entity and revision buffers
//! - `route_entity`: `content(path, revision, lang)`
//! - `content_paths`: `contentPaths(type)`
//! - `references`: fields following entity references
//! - `extension`: registration of the content fields
//! - `service`: a configured graph executing requests
//! - `memory`: in-memory collaborators for tests and fixtures

pub mod buffers;
pub mod config;
pub mod content_paths;
pub mod entity;
pub mod extension;
pub mod memory;
pub mod references;
pub mod route_entity;
pub mod service;
pub mod storage;

pub use buffers::{ContentBuffers, EntityLoader, ReverseKey, ReverseLoader, RevisionLoader};
pub use config::{ConfigError, ContentConfig, ReferenceField, ReferenceKind};
pub use content_paths::ContentPathsResolver;
pub use entity::{
    ContentEntity, ContentPathEntry, EntityId, EntityRef, ReferenceItem, ResolutionKey,
    ResolvedEntity, RevisionId, TranslationData,
};
pub use extension::{add_base_fields, add_entity_field, ContentExtension};
pub use memory::{InMemoryContentStore, StorageCall};
pub use references::ReferenceResolver;
pub use route_entity::EntityResolver;
pub use service::{ContentGraph, ContentGraphBuilder};
pub use storage::{
    AccessChecker, AccessResult, ContentQuery, EntityStorage, RouteMatch, RouteResolver,
    StorageError, UrlGenerator,
};
