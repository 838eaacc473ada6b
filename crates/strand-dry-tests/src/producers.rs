// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Scripted producing nodes for [`MemoryHost`] sessions.

use strand_core::memory::{EntitySpec, MemoryHost};
use strand_core::{
    make_node_id, CategoryId, CycleContext, DocumentId, EntityRef, HostError, NodeId,
    ProduceError, Producer, StreamMode, TrackingMode,
};

/// What one [`EntityProducer::produce`] call did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProducerRun {
    /// Entities created from scratch.
    pub created: Vec<EntityRef>,
    /// Entities handed back by the stream and kept.
    pub reused: Vec<EntityRef>,
    /// Positions whose build step failed.
    pub failed: usize,
}

/// A node that outputs `count` entities into every document its stream
/// covers, reusing the previous cycle's entities when tracking allows.
#[derive(Debug)]
pub struct EntityProducer {
    name: String,
    node: NodeId,
    slot: String,
    mode: StreamMode,
    category: Option<CategoryId>,
    tracking: Option<TrackingMode>,
    count: u32,
    fail_at: Option<u32>,
    touch: Vec<EntityRef>,
    runs: Vec<ProducerRun>,
}

impl EntityProducer {
    /// Producer for the node labelled `label` (see [`make_node_id`]),
    /// writing slot `"Out"` once per cycle.
    pub fn new(label: &str) -> Self {
        Self {
            name: label.to_owned(),
            node: make_node_id(label),
            slot: "Out".to_owned(),
            mode: StreamMode::empty(),
            category: None,
            tracking: None,
            count: 1,
            fail_at: None,
            touch: Vec::new(),
            runs: Vec::new(),
        }
    }

    /// Output slot name.
    pub fn slot(mut self, slot: &str) -> Self {
        self.slot = slot.to_owned();
        self
    }

    /// Stream scoping.
    pub fn mode(mut self, mode: StreamMode) -> Self {
        self.mode = mode;
        self
    }

    /// Category of the entities created and of the stream filter.
    pub fn category(mut self, category: CategoryId) -> Self {
        self.category = Some(category);
        self
    }

    /// Overrides the session's tracking mode.
    pub fn tracking(mut self, tracking: TrackingMode) -> Self {
        self.tracking = Some(tracking);
        self
    }

    /// Entities per document per cycle.
    pub fn count(mut self, count: u32) -> Self {
        self.count = count;
        self
    }

    /// Changes the output size for the next cycle.
    pub fn set_count(&mut self, count: u32) {
        self.count = count;
    }

    /// Makes the build step at `index` fail (`None` heals).
    pub fn set_fail_at(&mut self, index: Option<u32>) {
        self.fail_at = index;
    }

    /// Entities the node modifies before producing, as a node that edits
    /// its own inputs would.
    pub fn set_touch(&mut self, refs: Vec<EntityRef>) {
        self.touch = refs;
    }

    /// Node id.
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Every run so far.
    pub fn runs(&self) -> &[ProducerRun] {
        &self.runs
    }

    /// Most recent run.
    pub fn last_run(&self) -> Option<&ProducerRun> {
        self.runs.last()
    }
}

impl Producer<MemoryHost> for EntityProducer {
    fn name(&self) -> &str {
        &self.name
    }

    fn produce(&mut self, cx: &mut CycleContext<'_, MemoryHost>) -> Result<(), ProduceError> {
        for target in &self.touch {
            cx.documents_mut()
                .doc_mut(target.document)
                .ok_or(HostError::UnknownDocument(target.document))?
                .modify(target.id)?;
        }

        let id = cx.stream_id(self.node, &self.slot)?;
        let documents: Vec<DocumentId> = cx.open(&id, self.mode, self.category)?.documents().collect();
        let tracking = self.tracking.unwrap_or(cx.config().tracking);

        let mut run = ProducerRun::default();
        let mut first_error = None;
        for document in documents {
            for index in 0..self.count {
                let fail = self.fail_at == Some(index);
                let spec = EntitySpec {
                    category: self.category,
                    ..EntitySpec::default()
                };
                let mut reused = false;
                let result = cx.reconstruct(&id, document, tracking, |host, candidate| {
                    if fail {
                        return Err(ProduceError::Failed(format!("position {index} failed")));
                    }
                    if candidate.is_some() {
                        reused = true;
                        return Ok(candidate);
                    }
                    let doc = host
                        .doc_mut(document)
                        .ok_or(HostError::UnknownDocument(document))?;
                    Ok(Some(doc.create(spec)?))
                });
                match result {
                    Ok(Some(entity)) if reused => run.reused.push(EntityRef::new(document, entity)),
                    Ok(Some(entity)) => run.created.push(EntityRef::new(document, entity)),
                    Ok(None) => {}
                    Err(err) => {
                        run.failed += 1;
                        first_error.get_or_insert(err);
                    }
                }
            }
        }
        self.runs.push(run);
        first_error.map_or(Ok(()), Err)
    }
}

/// A node that always fails without touching anything.
#[derive(Debug)]
pub struct FailingProducer {
    name: String,
    reason: String,
}

impl FailingProducer {
    /// Fails with `reason`.
    pub fn new(name: &str, reason: &str) -> Self {
        Self {
            name: name.to_owned(),
            reason: reason.to_owned(),
        }
    }
}

impl<H> Producer<H> for FailingProducer
where
    H: strand_core::DocumentHost + ?Sized,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn produce(&mut self, _cx: &mut CycleContext<'_, H>) -> Result<(), ProduceError> {
        Err(ProduceError::Failed(self.reason.clone()))
    }
}
