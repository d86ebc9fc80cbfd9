use std::sync::{Arc, Weak};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::RwLock;
use serde_json::Value;
use uuid::Uuid;

use crate::activity::{ActivityHost, ActivityRegistry};
use crate::data::attribute::Attribute;
use crate::data::resolver::DataResolver;
use crate::data::scope::{Scope, SimpleScope};
use crate::definition::{FlowDefinition, Link, Task};
use crate::error::{DataError, FlowError};
use crate::instance::changes::{Change, ChangeSink, ChangeTracker, ChangeType};
use crate::instance::interceptor::Interceptor;
use crate::instance::link::{LinkInstance, LinkTracker};
use crate::instance::snapshot::{InstanceSnapshot, LinkSnapshot, TaskSnapshot};
use crate::instance::task::TaskInstance;
use crate::model::{FlowContext, FlowStatus, TaskContext};

/// Shared collaborators every flow instance looks up at run time.
#[derive(Clone)]
pub struct FlowServices {
    pub activities: Arc<ActivityRegistry>,
    pub resolver: Arc<dyn DataResolver>,
    pub sink: Arc<dyn ChangeSink>,
}

/// One running execution of a flow definition.
pub struct FlowInstance {
    id: String,
    sub_flow_id: u32,
    self_ref: Weak<FlowInstance>,
    definition: Arc<FlowDefinition>,
    services: FlowServices,
    status: RwLock<FlowStatus>,
    attrs: SimpleScope,
    tasks: DashMap<String, Arc<TaskInstance>>,
    links: LinkTracker,
    tracker: Arc<ChangeTracker>,
    interceptor: Option<Interceptor>,
}

impl FlowInstance {
    pub fn new(definition: Arc<FlowDefinition>, services: FlowServices) -> Arc<Self> {
        let id = Uuid::new_v4().to_string();
        let tracker = Arc::new(ChangeTracker::new(&id, services.sink.clone()));
        Self::build(id, definition, services, tracker, None)
    }

    pub fn with_options(
        id: &str,
        definition: Arc<FlowDefinition>,
        services: FlowServices,
        interceptor: Option<Interceptor>,
    ) -> Arc<Self> {
        let tracker = Arc::new(ChangeTracker::new(id, services.sink.clone()));
        Self::build(id.to_string(), definition, services, tracker, interceptor)
    }

    fn build(
        id: String,
        definition: Arc<FlowDefinition>,
        services: FlowServices,
        tracker: Arc<ChangeTracker>,
        interceptor: Option<Interceptor>,
    ) -> Arc<Self> {
        let sub_flow_id = 0;
        Arc::new_cyclic(|self_ref| Self {
            attrs: SimpleScope::with_attrs(definition.attrs().iter().cloned()),
            links: LinkTracker::new(sub_flow_id, tracker.clone()),
            tasks: DashMap::new(),
            status: RwLock::new(FlowStatus::NotStarted),
            self_ref: self_ref.clone(),
            id,
            sub_flow_id,
            definition,
            services,
            tracker,
            interceptor,
        })
    }

    /// Rehydrates an instance from a checkpoint. Restoring records no
    /// changes; numbering continues after the checkpoint's last sequence.
    pub fn restore(
        definition: Arc<FlowDefinition>,
        services: FlowServices,
        snapshot: InstanceSnapshot,
        interceptor: Option<Interceptor>,
    ) -> Result<Arc<Self>, FlowError> {
        if snapshot.flow_id != definition.id() {
            return Err(FlowError::SnapshotMismatch {
                expected: definition.id().to_string(),
                actual: snapshot.flow_id,
            });
        }

        let tracker = Arc::new(ChangeTracker::starting_at(
            &snapshot.id,
            services.sink.clone(),
            snapshot.seq,
        ));
        let inst = Self::build(snapshot.id, definition, services, tracker, interceptor);
        *inst.status.write() = snapshot.status;

        for attr in snapshot.attrs {
            inst.attrs.add_attr(attr);
        }

        for task_snap in snapshot.tasks {
            let task = inst
                .definition
                .task(&task_snap.task_id)
                .cloned()
                .ok_or_else(|| FlowError::UnknownTask(task_snap.task_id.clone()))?;
            let task_inst = Arc::new(inst.new_task_inst(task));
            task_inst.restore_state(task_snap.status, task_snap.working_data);
            inst.tasks.insert(task_snap.task_id, task_inst);
        }

        for link_snap in snapshot.links {
            let link = inst
                .definition
                .link(link_snap.link_id)
                .ok_or(FlowError::UnknownLink(link_snap.link_id))?;
            inst.links.restore(link, link_snap.status);
        }

        Ok(inst)
    }

    pub fn snapshot(&self) -> InstanceSnapshot {
        let tasks = self
            .task_insts()
            .into_iter()
            .map(|t| TaskSnapshot {
                task_id: t.task().id().to_string(),
                status: t.status(),
                working_data: t.working_data(),
            })
            .collect();

        let links = self
            .links
            .link_instances()
            .into_iter()
            .map(|l| LinkSnapshot {
                link_id: l.id(),
                status: l.status(),
            })
            .collect();

        InstanceSnapshot {
            id: self.id.clone(),
            flow_id: self.definition.id().to_string(),
            status: self.status(),
            seq: self.tracker.last_seq(),
            attrs: self.attrs.attrs(),
            tasks,
            links,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        self.definition.name()
    }

    pub fn sub_flow_id(&self) -> u32 {
        self.sub_flow_id
    }

    pub fn definition(&self) -> &Arc<FlowDefinition> {
        &self.definition
    }

    pub fn services(&self) -> &FlowServices {
        &self.services
    }

    pub fn interceptor(&self) -> Option<&Interceptor> {
        self.interceptor.as_ref()
    }

    pub fn status(&self) -> FlowStatus {
        *self.status.read()
    }

    pub fn set_status(&self, status: FlowStatus) {
        *self.status.write() = status;
        self.tracker
            .track(self.sub_flow_id, ChangeType::Update, Change::FlowStatus { status });
    }

    pub fn get_attr(&self, name: &str) -> Option<Attribute> {
        self.attrs.get_attr(name)
    }

    pub fn attr_value(&self, name: &str) -> Option<Value> {
        self.attrs.get_value(name)
    }

    pub fn attrs(&self) -> Vec<Attribute> {
        self.attrs.attrs()
    }

    fn new_task_inst(&self, task: Arc<Task>) -> TaskInstance {
        TaskInstance::new(
            self.self_ref.clone(),
            self.definition.clone(),
            task,
            self.sub_flow_id,
            self.tracker.clone(),
        )
    }

    /// The instance of `task`, created in `NotStarted` status if absent.
    pub fn find_or_create_task_inst(&self, task: &Arc<Task>) -> Arc<TaskInstance> {
        let (inst, created) = match self.tasks.entry(task.id().to_string()) {
            Entry::Occupied(e) => (e.get().clone(), false),
            Entry::Vacant(e) => {
                let inst = Arc::new(self.new_task_inst(task.clone()));
                e.insert(inst.clone());
                (inst, true)
            }
        };

        if created {
            self.tracker.track(
                self.sub_flow_id,
                ChangeType::Add,
                Change::TaskStatus {
                    task_id: task.id().to_string(),
                    status: inst.status(),
                },
            );
        }
        inst
    }

    pub fn task_inst(&self, task_id: &str) -> Option<Arc<TaskInstance>> {
        self.tasks.get(task_id).map(|t| t.value().clone())
    }

    /// Task instances that exist, in definition order.
    pub fn task_insts(&self) -> Vec<Arc<TaskInstance>> {
        self.definition
            .tasks()
            .iter()
            .filter_map(|t| self.task_inst(t.id()))
            .collect()
    }

    pub fn find_or_create_link_inst(&self, link: &Arc<Link>) -> Arc<LinkInstance> {
        self.links.find_or_create(link)
    }

    pub fn link_insts(&self) -> Vec<Arc<LinkInstance>> {
        self.links.link_instances()
    }
}

impl std::fmt::Debug for FlowInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowInstance")
            .field("id", &self.id)
            .field("flow", &self.definition.id())
            .field("status", &self.status())
            .finish()
    }
}

/// Flow attributes. Writes are recorded as changes.
impl Scope for FlowInstance {
    fn get_attr(&self, name: &str) -> Option<Attribute> {
        self.attrs.get_attr(name)
    }

    fn set_attr_value(&self, name: &str, value: Value) -> Result<(), DataError> {
        let chg_type = if self.attrs.get_attr(name).is_some() {
            ChangeType::Update
        } else {
            ChangeType::Add
        };
        self.attrs.set_attr_value(name, value)?;

        if let Some(attr) = self.attrs.get_attr(name) {
            self.tracker.track(
                self.sub_flow_id,
                chg_type,
                Change::Attr {
                    name: name.to_string(),
                    value: attr.into_value(),
                },
            );
        }
        Ok(())
    }

    fn attrs(&self) -> Vec<Attribute> {
        self.attrs.attrs()
    }
}

impl ActivityHost for FlowInstance {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        self.definition.name()
    }

    fn get_attr(&self, name: &str) -> Option<Value> {
        self.attrs.get_value(name)
    }

    fn set_attr(&self, name: &str, value: Value) -> Result<(), DataError> {
        Scope::set_attr_value(self, name, value)
    }

    fn attrs(&self) -> Vec<Attribute> {
        self.attrs.attrs()
    }
}

impl FlowContext for FlowInstance {
    fn flow_definition(&self) -> &FlowDefinition {
        &self.definition
    }

    fn task_instances(&self) -> Vec<Arc<dyn TaskContext>> {
        self.task_insts()
            .into_iter()
            .map(|t| t as Arc<dyn TaskContext>)
            .collect()
    }
}
