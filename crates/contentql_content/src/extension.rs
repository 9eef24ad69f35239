//! Registers the content fields on a resolver map.

use crate::buffers::ContentBuffers;
use crate::config::{ContentConfig, ReferenceField};
use crate::content_paths::ContentPathsResolver;
use crate::entity::{ContentPathEntry, ResolvedEntity, RevisionId};
use crate::references::ReferenceResolver;
use crate::route_entity::EntityResolver;
use crate::storage::{AccessChecker, EntityStorage, RouteResolver, UrlGenerator};
use contentql_runtime::{
    FieldValue, FnResolver, Resolved, ResolverArgs, ResolverError, ResolverMap, TypeMapping,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

/// Reads the requested language from the first configured argument present.
fn language_argument(
    args: &ResolverArgs,
    names: &[String],
) -> Result<Option<String>, ResolverError> {
    for name in names {
        if let Some(language) = args.optional::<String>(name)? {
            return Ok(Some(language));
        }
    }
    Ok(None)
}

fn entity_field<F>(read: F) -> FnResolver
where
    F: Fn(&ResolvedEntity) -> Value + Send + Sync + 'static,
{
    FnResolver::from_parent::<ResolvedEntity, _>(move |resolved| Resolved::from(read(resolved)))
}

/// Registers fields that read the entity's base field of the same name.
///
/// Unknown base fields resolve to null.
pub fn add_base_fields(registry: &mut ResolverMap, type_name: &str, fields: &[&str]) {
    for field in fields {
        let name = field.to_string();
        registry.add(
            type_name,
            field,
            entity_field(move |resolved| resolved.entity.field(&name).unwrap_or(Value::Null)),
        );
    }
}

/// Registers a field computed from the resolved entity.
pub fn add_entity_field<F>(registry: &mut ResolverMap, type_name: &str, field: &str, read: F)
where
    F: Fn(&ResolvedEntity) -> Value + Send + Sync + 'static,
{
    registry.add(type_name, field, entity_field(read));
}

/// Content query fields:
///
/// ```graphql
/// type Query {
///   content(path: String!, revision: Int, lang: String): Content
///   contentPaths(type: String!): [ContentPath!]!
/// }
///
/// type ContentPath { path: String!  langcode: String! }
///
/// interface Content {
///   id: Int!  uuid: String!  label: String!  created: Int!  changed: Int!
///   lang: String!  path: String!  revision: Int!
/// }
/// ```
///
/// One concrete type per configured bundle implements `Content`.
pub struct ContentExtension {
    config: Arc<ContentConfig>,
    entities: Arc<EntityResolver>,
    paths: Arc<ContentPathsResolver>,
    references: Arc<ReferenceResolver>,
    urls: Arc<dyn UrlGenerator>,
}

impl ContentExtension {
    pub fn new(
        config: ContentConfig,
        storage: Arc<dyn EntityStorage>,
        routes: Arc<dyn RouteResolver>,
        access: Arc<dyn AccessChecker>,
        urls: Arc<dyn UrlGenerator>,
    ) -> Self {
        let references = ReferenceResolver::new(Arc::clone(&access));
        let entities = EntityResolver::new(&config, routes, access);
        let paths = ContentPathsResolver::new(&config, storage, Arc::clone(&urls));
        Self {
            config: Arc::new(config),
            entities: Arc::new(entities),
            paths: Arc::new(paths),
            references: Arc::new(references),
            urls,
        }
    }

    pub fn config(&self) -> &ContentConfig {
        &self.config
    }

    /// Adds the content fields.
    ///
    /// Query fields replace earlier registrations. Fields of the concrete
    /// content types are only added where nothing is registered yet, so a
    /// host extension registered first keeps its own resolvers.
    pub fn register_resolvers(&self, registry: &mut ResolverMap) {
        self.register_query_fields(registry);
        self.register_content_path_fields(registry);
        for type_name in self.config.types.values() {
            self.register_entity_fields(registry, type_name);
        }
        for reference in &self.config.references {
            self.register_reference_field(registry, reference);
        }
        self.register_type_resolver(registry);
    }

    fn register_query_fields(&self, registry: &mut ResolverMap) {
        let entities = Arc::clone(&self.entities);
        let interface = self.config.interface.clone();
        let language_arguments = self.config.language_arguments.clone();
        registry.add_fn("Query", "content", move |_, args, ctx, _| {
            let path: String = args.require("path")?;
            let revision: Option<RevisionId> = args.optional("revision")?;
            let language = language_argument(args, &language_arguments)?;
            let buffers = ctx.require::<ContentBuffers>()?;

            let interface = interface.clone();
            let handle = entities.resolve(
                buffers,
                &path,
                revision,
                language.as_deref(),
                ctx.cache_context(),
            );
            Ok(FieldValue::Pending(
                handle.map(move |entity| Resolved::object(&interface, entity)),
            ))
        });

        let paths = Arc::clone(&self.paths);
        registry.add_fn("Query", "contentPaths", move |_, args, ctx, _| {
            let content_type: String = args.require("type")?;
            let buffers = ctx.require::<ContentBuffers>()?;

            let handle = paths.resolve(buffers, &content_type, ctx.cache_context());
            Ok(FieldValue::Pending(handle.map(|entries| {
                Resolved::List(
                    entries
                        .into_iter()
                        .map(|entry| Resolved::object("ContentPath", Some(entry)))
                        .collect(),
                )
            })))
        });
    }

    fn register_content_path_fields(&self, registry: &mut ResolverMap) {
        registry.add(
            "ContentPath",
            "path",
            FnResolver::from_parent::<ContentPathEntry, _>(|entry| Resolved::from(json!(entry.path))),
        );
        registry.add(
            "ContentPath",
            "langcode",
            FnResolver::from_parent::<ContentPathEntry, _>(|entry| {
                Resolved::from(json!(entry.langcode))
            }),
        );
    }

    fn register_entity_fields(&self, registry: &mut ResolverMap, type_name: &str) {
        let urls = Arc::clone(&self.urls);
        let fields: [(&str, FnResolver); 8] = [
            ("id", entity_field(|r| json!(r.entity.id()))),
            ("uuid", entity_field(|r| json!(r.entity.uuid()))),
            ("label", entity_field(|r| json!(r.entity.label()))),
            ("created", entity_field(|r| json!(r.entity.created()))),
            ("changed", entity_field(|r| json!(r.entity.changed()))),
            ("lang", entity_field(|r| json!(r.langcode()))),
            (
                "path",
                entity_field(move |r| {
                    json!(urls.alias_by_path(&r.entity.system_path(), r.langcode()))
                }),
            ),
            ("revision", entity_field(|r| json!(r.revision_id()))),
        ];

        for (field, resolver) in fields {
            if !registry.add_if_absent(type_name, field, resolver) {
                debug!(type_name, field, "keeping existing resolver");
            }
        }
    }

    fn register_reference_field(&self, registry: &mut ResolverMap, reference: &ReferenceField) {
        let references = Arc::clone(&self.references);
        let interface = self.config.interface.clone();
        let reference_field = reference.clone();
        let added = registry.add_fn_if_absent(
            &reference.type_name,
            &reference.field,
            move |parent, _, ctx, info| {
                let resolved = parent.downcast_ref::<ResolvedEntity>().ok_or_else(|| {
                    ResolverError::Internal(format!(
                        "unexpected parent payload for {}.{}",
                        info.parent_type, info.field_name
                    ))
                })?;
                let buffers = ctx.require::<ContentBuffers>()?;

                let handle =
                    references.resolve(buffers, resolved, &reference_field, ctx.cache_context());
                let interface = interface.clone();
                let multiple = reference_field.multiple;
                Ok(FieldValue::Pending(handle.map(move |targets| {
                    if multiple {
                        Resolved::List(
                            targets
                                .into_iter()
                                .map(|target| Resolved::object(&interface, Some(target)))
                                .collect(),
                        )
                    } else {
                        Resolved::object(&interface, targets.into_iter().next())
                    }
                })))
            },
        );
        if !added {
            debug!(
                type_name = %reference.type_name,
                field = %reference.field,
                "keeping existing resolver"
            );
        }
    }

    fn register_type_resolver(&self, registry: &mut ResolverMap) {
        let mapping = self.config.types.iter().fold(
            TypeMapping::new(|value| {
                value
                    .downcast_ref::<ResolvedEntity>()
                    .map(|resolved| resolved.entity.bundle().to_string())
            }),
            |mapping, (bundle, type_name)| mapping.map(bundle.as_str(), type_name.as_str()),
        );
        registry.add_type_resolver(&self.config.interface, mapping);
    }
}
