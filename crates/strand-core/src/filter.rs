// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Stream scoping: filters and mode flags.

use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;

use crate::document::{CategoryId, Document, EntityInfo, WorksetId};
use crate::ident::EntityId;

bitflags! {
    /// Which documents and which part of each document a stream considers its own.
    ///
    /// The empty set means unfiltered: every open, non-linked document.
    #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
    pub struct StreamMode: u32 {
        /// Only the active document.
        const CURRENT_DOCUMENT = 1;
        /// Only entities owned by the active view.
        const CURRENT_VIEW = 2;
        /// Only entities in the active design option.
        const CURRENT_DESIGN_OPTION = 4;
        /// Only entities in the active workset.
        const CURRENT_WORKSET = 8;
    }
}

/// Generic predicate over entity facets.
pub type EntityPredicate = Arc<dyn Fn(&EntityInfo) -> bool + Send + Sync>;

/// Conjunction of optional constraints an entity must meet to belong to a stream.
#[derive(Clone, Default)]
pub struct StreamFilter {
    /// Required category.
    pub category: Option<CategoryId>,
    /// Required design option.
    pub design_option: Option<EntityId>,
    /// Required owner view.
    pub owner_view: Option<EntityId>,
    /// Required workset.
    pub workset: Option<WorksetId>,
    /// Extra predicate.
    pub predicate: Option<EntityPredicate>,
}

impl StreamFilter {
    /// Filter that accepts everything.
    #[must_use]
    pub fn unfiltered() -> Self {
        Self::default()
    }

    /// Restricts to `category`.
    #[must_use]
    pub fn with_category(mut self, category: CategoryId) -> Self {
        self.category = Some(category);
        self
    }

    /// Adds a generic predicate.
    #[must_use]
    pub fn with_predicate<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&EntityInfo) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// Builds the filter `mode` implies for `doc`.
    ///
    /// Flags whose "active" value the document cannot provide (no graphical
    /// view open, not workshared) add no constraint.
    pub fn for_mode<D>(doc: &D, mode: StreamMode, category: Option<CategoryId>) -> Self
    where
        D: Document + ?Sized,
    {
        let mut filter = Self {
            category,
            ..Self::default()
        };
        if mode.contains(StreamMode::CURRENT_DESIGN_OPTION) {
            filter.design_option = doc.active_design_option();
        }
        if mode.contains(StreamMode::CURRENT_VIEW) {
            filter.owner_view = doc.active_view();
        }
        if mode.contains(StreamMode::CURRENT_WORKSET) {
            filter.workset = doc.active_workset();
        }
        filter
    }

    /// Returns `true` if `info` meets every constraint.
    #[must_use]
    pub fn passes(&self, info: &EntityInfo) -> bool {
        if self.category.is_some() && info.category != self.category {
            return false;
        }
        if self.design_option.is_some() && info.design_option != self.design_option {
            return false;
        }
        if self.owner_view.is_some() && info.owner_view != self.owner_view {
            return false;
        }
        if self.workset.is_some() && info.workset != self.workset {
            return false;
        }
        self.predicate.as_ref().is_none_or(|p| p(info))
    }
}

impl fmt::Debug for StreamFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamFilter")
            .field("category", &self.category)
            .field("design_option", &self.design_option)
            .field("owner_view", &self.owner_view)
            .field("workset", &self.workset)
            .field("predicate", &self.predicate.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::UniqueId;

    fn info() -> EntityInfo {
        EntityInfo {
            id: EntityId(1),
            unique_id: UniqueId::new("u-1"),
            category: Some(CategoryId(-2000011)),
            owner_view: None,
            design_option: Some(EntityId(40)),
            workset: Some(WorksetId(0)),
        }
    }

    #[test]
    fn unfiltered_accepts_everything() {
        assert!(StreamFilter::unfiltered().passes(&info()));
    }

    #[test]
    fn each_constraint_is_conjunctive() {
        let e = info();
        assert!(StreamFilter::unfiltered()
            .with_category(CategoryId(-2000011))
            .passes(&e));
        assert!(!StreamFilter::unfiltered()
            .with_category(CategoryId(1))
            .passes(&e));

        let mut view = StreamFilter::unfiltered();
        view.owner_view = Some(EntityId(9));
        assert!(!view.passes(&e));

        let mut option = StreamFilter::unfiltered();
        option.design_option = Some(EntityId(40));
        assert!(option.passes(&e));
        option.workset = Some(WorksetId(3));
        assert!(!option.passes(&e));

        assert!(!StreamFilter::unfiltered()
            .with_predicate(|i| i.id == EntityId(2))
            .passes(&e));
    }
}
