//! Runtime for contentql.
//!
//! This crate provides the field execution core:
//! - `deferred`: memoized lazy values resolved at most once
//! - `dataloader`: per-request key buffers coalescing lookups into batch fetches
//! - `query`: request documents and field selections
//! - `value`: values produced by field resolvers
//! - `resolver`: resolver trait and the (type, field) registry
//! - `cache`: cacheability metadata collected while resolving
//! - `executor`: breadth-first execution flushing buffers once per level

pub mod cache;
pub mod dataloader;
pub mod deferred;
pub mod executor;
pub mod query;
pub mod resolver;
pub mod value;

pub use cache::{CacheMetadata, CacheableDependency, FieldContext, MaxAge};
pub use dataloader::{BatchLoad, KeyBuffer};
pub use deferred::{BoxFuture, Deferred};
pub use executor::{Context, Executor, ExecutorConfig, FieldError, PathSegment, Response};
pub use query::{Field, InputValue, Request};
pub use resolver::{
    FnResolver, RegistryError, Resolver, ResolverArgs, ResolverError, ResolverInfo, ResolverMap,
    ResolverResult, TypeMapping,
};
pub use value::{FieldValue, ObjectValue, Resolved};
