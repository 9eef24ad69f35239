//! Follows entity reference fields from a resolved entity.
//!
//! Targets are queued on the request buffers while the parent's fields are
//! resolved, so a list of parents loads all of their targets in one flush.

use crate::buffers::{ContentBuffers, ReverseKey};
use crate::config::{ReferenceField, ReferenceKind};
use crate::entity::ResolvedEntity;
use crate::route_entity::view_entity;
use crate::storage::AccessChecker;
use contentql_runtime::{Deferred, FieldContext};
use std::sync::Arc;
use tracing::trace;

/// Resolves reference fields to the entities they point at.
///
/// Targets are shown in the parent's language when they have that
/// translation. Targets that are missing or hidden from the viewer are left
/// out.
pub struct ReferenceResolver {
    access: Arc<dyn AccessChecker>,
}

impl ReferenceResolver {
    pub fn new(access: Arc<dyn AccessChecker>) -> Self {
        Self { access }
    }

    pub fn resolve(
        &self,
        buffers: &ContentBuffers,
        parent: &ResolvedEntity,
        reference: &ReferenceField,
        cache: &FieldContext,
    ) -> Deferred<Vec<ResolvedEntity>> {
        let access = Arc::clone(&self.access);
        let language = parent.langcode().to_string();
        let cache = cache.clone();

        match &reference.kind {
            ReferenceKind::Entity | ReferenceKind::Revision => {
                let pinned = reference.kind == ReferenceKind::Revision;
                let handles: Vec<_> = parent
                    .entity
                    .references(&reference.source)
                    .iter()
                    .map(|item| buffers.load(item.key(pinned)))
                    .collect();
                if handles.is_empty() {
                    return Deferred::ready(Vec::new());
                }
                trace!(field = %reference.source, targets = handles.len(), "queued references");

                Deferred::new(move || async move {
                    let mut targets = Vec::with_capacity(handles.len());
                    for handle in handles {
                        if let Some(entity) = handle.resolve().await? {
                            targets.extend(view_entity(
                                entity,
                                Some(language.as_str()),
                                access.as_ref(),
                                &cache,
                            ));
                        }
                    }
                    Ok(targets)
                })
            }
            ReferenceKind::Reverse {
                entity_type,
                bundles,
            } => {
                cache.add_cache_tags([format!("{entity_type}_list")]);
                let handle = buffers.load_reverse(ReverseKey {
                    entity_type: entity_type.clone(),
                    field: reference.source.clone(),
                    bundles: bundles.clone(),
                    target: parent.entity.entity_ref(),
                });
                handle.map(move |entities| {
                    entities
                        .into_iter()
                        .filter_map(|entity| {
                            view_entity(entity, Some(language.as_str()), access.as_ref(), &cache)
                        })
                        .collect()
                })
            }
        }
    }
}
