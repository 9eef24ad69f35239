//! Loads the entity a path points at, in a given revision and language.

use crate::buffers::ContentBuffers;
use crate::config::ContentConfig;
use crate::entity::{ContentEntity, ResolutionKey, ResolvedEntity, RevisionId};
use crate::storage::{AccessChecker, RouteResolver};
use contentql_runtime::{Deferred, FieldContext};
use std::sync::Arc;
use tracing::{trace, warn};

/// Cache tag marking a response as a client error.
pub const NOT_FOUND_TAG: &str = "4xx-response";

/// Resolves `content(path, revision, lang)`.
pub struct EntityResolver {
    routes: Arc<dyn RouteResolver>,
    access: Arc<dyn AccessChecker>,
    list_cache_tags: Vec<String>,
}

impl EntityResolver {
    pub fn new(
        config: &ContentConfig,
        routes: Arc<dyn RouteResolver>,
        access: Arc<dyn AccessChecker>,
    ) -> Self {
        Self {
            routes,
            access,
            list_cache_tags: config.list_cache_tags(),
        }
    }

    /// Queues the lookup and returns the entity, or `None` when the path,
    /// entity or revision does not exist or the viewer may not see it.
    ///
    /// With a language the matching translation is returned when there is
    /// one; otherwise the entity stays in its own language.
    pub fn resolve(
        &self,
        buffers: &ContentBuffers,
        path: &str,
        revision: Option<RevisionId>,
        language: Option<&str>,
        cache: &FieldContext,
    ) -> Deferred<Option<ResolvedEntity>> {
        let Some(route) = self.routes.resolve_path(path) else {
            trace!(path, "path does not route to an entity");
            cache
                .add_cache_tags(self.list_cache_tags.iter().cloned())
                .add_cache_tags([NOT_FOUND_TAG]);
            return Deferred::ready(None);
        };

        let key = match revision {
            Some(revision) => ResolutionKey::revision(&route.entity_type, route.id, revision),
            None => ResolutionKey::entity(&route.entity_type, route.id),
        };
        let handle = buffers.load(key);

        let access = Arc::clone(&self.access);
        let list_cache_tags = self.list_cache_tags.clone();
        let language = language.map(str::to_string);
        let cache = cache.clone();

        handle.map(move |loaded| {
            let Some(entity) = loaded else {
                cache
                    .add_cache_tags(list_cache_tags)
                    .add_cache_tags([NOT_FOUND_TAG]);
                return None;
            };
            if let Some(language) = language
                .as_deref()
                .filter(|language| !entity.has_translation(language))
            {
                warn!(
                    entity_type = entity.entity_type(),
                    id = entity.id(),
                    language,
                    "translation missing, using the base language"
                );
            }
            view_entity(entity, language.as_deref(), access.as_ref(), &cache)
        })
    }
}

/// Switches a loaded entity to the requested translation when it has one,
/// then checks view access. Cacheability of both ends up in `cache`.
pub(crate) fn view_entity(
    mut entity: ContentEntity,
    language: Option<&str>,
    access: &dyn AccessChecker,
    cache: &FieldContext,
) -> Option<ResolvedEntity> {
    if let Some(language) = language.filter(|language| *language != entity.langcode()) {
        if let Some(mut translated) = entity.translation(language) {
            translated.add_cache_contexts([format!("static:language:{language}")]);
            entity = translated;
        }
    }

    let decision = access.can_view(&entity);
    cache.add_cacheable_dependency(&decision);
    if !decision.is_allowed() {
        trace!(id = entity.id(), "view access denied");
        return None;
    }

    cache.add_cacheable_dependency(&entity);
    Some(ResolvedEntity {
        entity,
        access: decision,
    })
}
