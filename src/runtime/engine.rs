use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use anyhow::{Result, anyhow, bail};
use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::activity::{Activity, ActivityRegistry};
use crate::data::resolver::{BasicResolver, DataResolver};
use crate::data::scope::Scope;
use crate::definition::FlowDefinition;
use crate::error::EvalError;
use crate::instance::changes::{ChangeSink, TracingChangeSink};
use crate::instance::flow::{FlowInstance, FlowServices};
use crate::instance::interceptor::Interceptor;
use crate::instance::redis_sink::RedisChangeSink;
use crate::instance::snapshot::InstanceSnapshot;
use crate::instance::task::TaskInstance;
use crate::model::{
    EnterResult, EvalResult, FlowModel, FlowStatus, ModelRegistry, TaskContext, TaskEntry,
    TaskStatus,
};
use crate::runtime::config::EngineConfig;

/// Synchronous flow driver.
///
/// Owns the flow, activity and model registries plus the collaborators every
/// instance shares. `run` drives one instance until the flow behavior reports
/// it done, a failure goes unhandled, or only waiting tasks remain.
pub struct Engine {
    config: EngineConfig,
    flows: DashMap<String, Arc<FlowDefinition>>,
    models: ModelRegistry,
    activities: Arc<ActivityRegistry>,
    resolver: Arc<dyn DataResolver>,
    sink: Arc<dyn ChangeSink>,
    instances: DashMap<String, Arc<FlowInstance>>,
}

impl Engine {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            config,
            flows: DashMap::new(),
            models: ModelRegistry::new(),
            activities: Arc::new(ActivityRegistry::with_builtins()),
            resolver: Arc::new(BasicResolver::new()),
            sink: Arc::new(TracingChangeSink),
            instances: DashMap::new(),
        }
    }

    /// An engine whose change sink follows `config.redis_url`.
    pub fn from_config(config: EngineConfig) -> Result<Self> {
        let sink: Option<Arc<dyn ChangeSink>> = match &config.redis_url {
            Some(url) => Some(Arc::new(RedisChangeSink::open(
                url,
                &config.changes_key_prefix,
            )?)),
            None => None,
        };

        let engine = Self::with_config(config);
        Ok(match sink {
            Some(sink) => engine.with_change_sink(sink),
            None => engine,
        })
    }

    pub fn with_change_sink(mut self, sink: Arc<dyn ChangeSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn DataResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn register_flow(&self, definition: FlowDefinition) -> Arc<FlowDefinition> {
        let definition = Arc::new(definition);
        for task in definition.tasks() {
            if let Some(activity_ref) = task.activity_ref() {
                if !self.activities.contains(activity_ref) {
                    warn!(flow = %definition.id(), task = %task.id(), activity = %activity_ref, "Activity not registered");
                }
            }
        }
        self.flows
            .insert(definition.id().to_string(), definition.clone());
        definition
    }

    pub fn register_activity(&self, activity: Arc<dyn Activity>) {
        self.activities.register(activity);
    }

    pub fn register_model(&self, model: FlowModel) {
        self.models.register(model);
    }

    pub fn flow(&self, flow_id: &str) -> Option<Arc<FlowDefinition>> {
        self.flows.get(flow_id).map(|f| f.value().clone())
    }

    pub fn instance(&self, instance_id: &str) -> Option<Arc<FlowInstance>> {
        self.instances.get(instance_id).map(|i| i.value().clone())
    }

    pub fn services(&self) -> FlowServices {
        FlowServices {
            activities: self.activities.clone(),
            resolver: self.resolver.clone(),
            sink: self.sink.clone(),
        }
    }

    fn model(&self) -> Result<FlowModel> {
        self.models
            .get(&self.config.flow_model)
            .ok_or_else(|| anyhow!("Flow model not found: {}", self.config.flow_model))
    }

    /// Creates an instance without running it.
    pub fn new_instance(
        &self,
        flow_id: &str,
        interceptor: Option<Interceptor>,
    ) -> Result<Arc<FlowInstance>> {
        let definition = self
            .flow(flow_id)
            .ok_or_else(|| anyhow!("Flow not found: {}", flow_id))?;

        let instance = match interceptor {
            Some(interceptor) => FlowInstance::with_options(
                &Uuid::new_v4().to_string(),
                definition,
                self.services(),
                Some(interceptor),
            ),
            None => FlowInstance::new(definition, self.services()),
        };
        self.instances
            .insert(instance.id().to_string(), instance.clone());
        Ok(instance)
    }

    /// Creates an instance of `flow_id`, applies `attrs` and runs it.
    pub fn start_flow(
        &self,
        flow_id: &str,
        attrs: HashMap<String, Value>,
    ) -> Result<Arc<FlowInstance>> {
        let instance = self.new_instance(flow_id, None)?;
        for (name, value) in attrs {
            Scope::set_attr_value(&*instance, &name, value)?;
        }
        info!(flow = %flow_id, instance = %instance.id(), "Flow started");
        self.run(&instance)?;
        Ok(instance)
    }

    /// Starts a freshly created instance.
    pub fn run(&self, instance: &Arc<FlowInstance>) -> Result<()> {
        let model = self.model()?;

        let (started, entries) = model.flow_behavior().start(&**instance);
        if !started {
            warn!(instance = %instance.id(), "Flow behavior refused to start flow");
            return Ok(());
        }
        instance.set_status(FlowStatus::Active);

        let mut queue = VecDeque::new();
        let notify = self.enter_tasks(instance, &model, entries, &mut queue);
        self.drive(instance, &model, queue, notify)
    }

    /// Rehydrates an instance from `snapshot` and continues it.
    pub fn resume_flow(&self, snapshot: InstanceSnapshot) -> Result<Arc<FlowInstance>> {
        let definition = self
            .flow(&snapshot.flow_id)
            .ok_or_else(|| anyhow!("Flow not found: {}", snapshot.flow_id))?;

        let instance = FlowInstance::restore(definition, self.services(), snapshot, None)?;
        self.instances
            .insert(instance.id().to_string(), instance.clone());

        match instance.status() {
            FlowStatus::NotStarted => self.run(&instance)?,
            FlowStatus::Active => self.continue_instance(&instance)?,
            status => info!(instance = %instance.id(), ?status, "Flow already finished"),
        }
        Ok(instance)
    }

    fn continue_instance(&self, instance: &Arc<FlowInstance>) -> Result<()> {
        let model = self.model()?;
        if !model.flow_behavior().resume(&**instance) {
            warn!(instance = %instance.id(), "Flow behavior refused to resume flow");
            return Ok(());
        }

        let mut queue = VecDeque::new();
        let mut entries = Vec::new();
        for task in instance.definition().tasks() {
            match instance.task_inst(task.id()) {
                Some(task_inst) => match task_inst.status() {
                    TaskStatus::Scheduled | TaskStatus::InProgress => queue.push_back(task_inst),
                    TaskStatus::Entered => entries.push(TaskEntry::new(task.clone())),
                    _ => {}
                },
                None if task.from_links().is_empty() => entries.push(TaskEntry::new(task.clone())),
                None => {}
            }
        }

        info!(instance = %instance.id(), scheduled = queue.len(), entered = entries.len(), "Flow resumed");
        let notify = self.enter_tasks(instance, &model, entries, &mut queue);
        self.drive(instance, &model, queue, notify)
    }

    /// Completes a waiting task with the outputs its activity produced and
    /// continues the flow.
    pub fn complete_task(
        &self,
        instance_id: &str,
        task_id: &str,
        outputs: HashMap<String, Value>,
    ) -> Result<()> {
        let instance = self
            .instance(instance_id)
            .ok_or_else(|| anyhow!("Instance not found: {}", instance_id))?;
        if instance.status() != FlowStatus::Active {
            bail!(
                "Instance {} is not active (status {:?})",
                instance_id,
                instance.status()
            );
        }
        let task_inst = instance
            .task_inst(task_id)
            .ok_or_else(|| anyhow!("Task instance not found: {}", task_id))?;

        if task_inst.status() != TaskStatus::Waiting {
            bail!("Task {} is not waiting (status {:?})", task_id, task_inst.status());
        }

        let model = self.model()?;
        let mut queue = VecDeque::new();

        let notify = match task_inst.complete(outputs) {
            Ok(()) => {
                let (notify, next) = model.task_behavior().done(&*task_inst);
                self.enter_tasks(&instance, &model, next, &mut queue) || notify
            }
            Err(err) => {
                task_inst.set_status(TaskStatus::Failed);
                match self.handle_failure(&instance, &model, &task_inst, &err, &mut queue) {
                    Some(notify) => notify,
                    None => return Ok(()),
                }
            }
        };

        self.drive(&instance, &model, queue, notify)
    }

    /// Enters each entry's task. Ready tasks are queued for evaluation and
    /// skipped tasks propagate the skip to their successors right away.
    fn enter_tasks(
        &self,
        instance: &FlowInstance,
        model: &FlowModel,
        entries: Vec<TaskEntry>,
        queue: &mut VecDeque<Arc<TaskInstance>>,
    ) -> bool {
        let task_behavior = model.task_behavior();
        let mut pending: VecDeque<TaskEntry> = entries.into();
        let mut notify = false;

        while let Some(entry) = pending.pop_front() {
            let task_inst = instance.find_or_create_task_inst(&entry.task);
            match task_behavior.enter(&*task_inst) {
                EnterResult::Eval => queue.push_back(task_inst),
                EnterResult::NotReady => {}
                EnterResult::Skip => {
                    debug!(task = %entry.task.id(), "Task skipped");
                    let (skip_notify, next) = task_behavior.skip(&*task_inst);
                    notify |= skip_notify;
                    pending.extend(next);
                }
            }
        }
        notify
    }

    /// Routes a failed task through the task behavior. `None` means the
    /// failure was unhandled and the flow has been marked failed.
    fn handle_failure(
        &self,
        instance: &FlowInstance,
        model: &FlowModel,
        task_inst: &TaskInstance,
        err: &EvalError,
        queue: &mut VecDeque<Arc<TaskInstance>>,
    ) -> Option<bool> {
        let (handled, next) = model.task_behavior().error(task_inst, err);
        if !handled {
            error!(flow = %instance.name(), instance = %instance.id(), task = %task_inst.task().id(), error = %err, "Flow failed");
            instance.set_status(FlowStatus::Failed);
            return None;
        }
        Some(self.enter_tasks(instance, model, next, queue))
    }

    fn drive(
        &self,
        instance: &FlowInstance,
        model: &FlowModel,
        mut queue: VecDeque<Arc<TaskInstance>>,
        mut notify: bool,
    ) -> Result<()> {
        let flow_behavior = model.flow_behavior();
        let task_behavior = model.task_behavior();
        let mut steps = 0;

        loop {
            if instance.status() != FlowStatus::Active {
                debug!(instance = %instance.id(), status = ?instance.status(), "Flow not active, driving stopped");
                return Ok(());
            }

            if notify && flow_behavior.task_done(instance) {
                return self.finish(instance, model);
            }

            let Some(task_inst) = queue.pop_front() else {
                break;
            };

            steps += 1;
            if steps > self.config.max_steps {
                bail!(
                    "Flow {} exceeded {} steps",
                    instance.id(),
                    self.config.max_steps
                );
            }

            notify = match task_behavior.eval(&*task_inst) {
                EvalResult::Done => {
                    let (done_notify, next) = task_behavior.done(&*task_inst);
                    self.enter_tasks(instance, model, next, &mut queue) || done_notify
                }
                EvalResult::Waiting => {
                    debug!(task = %task_inst.task().id(), "Task waiting");
                    false
                }
                EvalResult::Failed(err) => {
                    match self.handle_failure(instance, model, &task_inst, &err, &mut queue) {
                        Some(handled_notify) => handled_notify,
                        None => return Ok(()),
                    }
                }
            };
        }

        if flow_behavior.task_done(instance) {
            return self.finish(instance, model);
        }

        info!(instance = %instance.id(), "Flow suspended");
        Ok(())
    }

    fn finish(&self, instance: &FlowInstance, model: &FlowModel) -> Result<()> {
        if instance.status() != FlowStatus::Active {
            return Ok(());
        }
        model.flow_behavior().done(instance);
        instance.set_status(FlowStatus::Completed);
        info!(flow = %instance.name(), instance = %instance.id(), "Flow completed");
        Ok(())
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
