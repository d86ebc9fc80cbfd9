use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::RwLock;

use crate::definition::{Link, LinkId};
use crate::instance::changes::{Change, ChangeTracker, ChangeType};
use crate::model::LinkStatus;

/// Status of one link within one flow instance.
#[derive(Debug)]
pub struct LinkInstance {
    link: Arc<Link>,
    status: RwLock<LinkStatus>,
    sub_flow_id: u32,
    tracker: Arc<ChangeTracker>,
}

impl LinkInstance {
    pub fn id(&self) -> LinkId {
        self.link.id()
    }

    pub fn link(&self) -> &Link {
        &self.link
    }

    pub fn status(&self) -> LinkStatus {
        *self.status.read()
    }

    pub fn set_status(&self, status: LinkStatus) {
        *self.status.write() = status;
        self.tracker.track(
            self.sub_flow_id,
            ChangeType::Update,
            Change::LinkStatus {
                link_id: self.id(),
                status,
            },
        );
    }
}

/// Link instances of one flow instance, created on first use.
#[derive(Debug)]
pub struct LinkTracker {
    links: DashMap<LinkId, Arc<LinkInstance>>,
    sub_flow_id: u32,
    tracker: Arc<ChangeTracker>,
}

impl LinkTracker {
    pub fn new(sub_flow_id: u32, tracker: Arc<ChangeTracker>) -> Self {
        Self {
            links: DashMap::new(),
            sub_flow_id,
            tracker,
        }
    }

    /// The instance of `link`, created in `Pending` status if absent.
    /// Repeated calls return the same `Arc`.
    pub fn find_or_create(&self, link: &Arc<Link>) -> Arc<LinkInstance> {
        let (inst, created) = match self.links.entry(link.id()) {
            Entry::Occupied(e) => (e.get().clone(), false),
            Entry::Vacant(e) => {
                let inst = Arc::new(self.new_instance(link, LinkStatus::Pending));
                e.insert(inst.clone());
                (inst, true)
            }
        };

        // Tracked after the shard lock is released.
        if created {
            self.tracker.track(
                self.sub_flow_id,
                ChangeType::Add,
                Change::LinkStatus {
                    link_id: inst.id(),
                    status: inst.status(),
                },
            );
        }
        inst
    }

    pub fn get(&self, id: LinkId) -> Option<Arc<LinkInstance>> {
        self.links.get(&id).map(|l| l.value().clone())
    }

    /// Every instantiated link, ordered by id.
    pub fn link_instances(&self) -> Vec<Arc<LinkInstance>> {
        let mut links: Vec<_> = self.links.iter().map(|l| l.value().clone()).collect();
        links.sort_by_key(|l| l.id());
        links
    }

    /// Re-creates a link instance from a checkpoint without recording a change.
    pub fn restore(&self, link: &Arc<Link>, status: LinkStatus) {
        self.links
            .insert(link.id(), Arc::new(self.new_instance(link, status)));
    }

    fn new_instance(&self, link: &Arc<Link>, status: LinkStatus) -> LinkInstance {
        LinkInstance {
            link: link.clone(),
            status: RwLock::new(status),
            sub_flow_id: self.sub_flow_id,
            tracker: self.tracker.clone(),
        }
    }
}
