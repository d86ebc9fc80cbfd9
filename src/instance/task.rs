use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::activity::{Activity, ActivityContext, ActivityHost};
use crate::data::attribute::Attribute;
use crate::data::resolver::is_resolvable;
use crate::data::scope::{FixedScope, Scope};
use crate::definition::{ActivityConfig, FlowDefinition, Link, Task};
use crate::error::{panic_message, ActivityError, DataError, EvalError, FlowError};
use crate::instance::changes::{Change, ChangeTracker, ChangeType};
use crate::instance::flow::FlowInstance;
use crate::instance::interceptor::TaskInterceptor;
use crate::instance::link::LinkInstance;
use crate::model::{TaskContext, TaskStatus};

/// Execution context of one task within one flow instance.
pub struct TaskInstance {
    flow_inst: Weak<FlowInstance>,
    definition: Arc<FlowDefinition>,
    task: Arc<Task>,
    sub_flow_id: u32,
    tracker: Arc<ChangeTracker>,

    status: RwLock<TaskStatus>,
    working_data: Mutex<Option<HashMap<String, Attribute>>>,

    in_scope: OnceLock<Option<Arc<FixedScope>>>,
    out_scope: OnceLock<Option<Arc<FixedScope>>>,
    activity: OnceLock<Option<Arc<dyn Activity>>>,
}

impl TaskInstance {
    pub(crate) fn new(
        flow_inst: Weak<FlowInstance>,
        definition: Arc<FlowDefinition>,
        task: Arc<Task>,
        sub_flow_id: u32,
        tracker: Arc<ChangeTracker>,
    ) -> Self {
        Self {
            flow_inst,
            definition,
            task,
            sub_flow_id,
            tracker,
            status: RwLock::new(TaskStatus::NotStarted),
            working_data: Mutex::new(None),
            in_scope: OnceLock::new(),
            out_scope: OnceLock::new(),
            activity: OnceLock::new(),
        }
    }

    /// Puts back checkpointed state without recording changes.
    pub(crate) fn restore_state(&self, status: TaskStatus, working_data: Vec<Attribute>) {
        *self.status.write() = status;
        if !working_data.is_empty() {
            let map = working_data
                .into_iter()
                .map(|a| (a.name().to_string(), a))
                .collect();
            *self.working_data.lock() = Some(map);
        }
    }

    pub fn sub_flow_id(&self) -> u32 {
        self.sub_flow_id
    }

    /// Working data entries, ordered by name.
    pub fn working_data(&self) -> Vec<Attribute> {
        let mut data: Vec<Attribute> = self
            .working_data
            .lock()
            .as_ref()
            .map(|d| d.values().cloned().collect())
            .unwrap_or_default();
        data.sort_by(|a, b| a.name().cmp(b.name()));
        data
    }

    fn flow(&self) -> Result<Arc<FlowInstance>, FlowError> {
        self.flow_inst.upgrade().ok_or(FlowError::InstanceDropped)
    }

    /// The activity the task runs, looked up once in the flow's registry.
    fn activity(&self) -> Option<Arc<dyn Activity>> {
        self.activity
            .get_or_init(|| {
                let activity_ref = self.task.activity_ref()?;
                let flow = self.flow_inst.upgrade()?;
                flow.services().activities.get(activity_ref)
            })
            .clone()
    }

    /// Closed scope over the activity's declared inputs, seeded with the
    /// task-level input values. `None` when the task has no activity.
    pub fn input_scope(&self) -> Option<Arc<FixedScope>> {
        self.in_scope
            .get_or_init(|| {
                let Some(activity) = self.activity() else {
                    self.no_scope("input");
                    return None;
                };
                let defaults = self
                    .task
                    .activity_config()
                    .map(|c| c.input_values().clone())
                    .unwrap_or_default();
                Some(Arc::new(FixedScope::new(activity.metadata().input(), defaults)))
            })
            .clone()
    }

    /// Closed scope over the activity's declared outputs.
    pub fn output_scope(&self) -> Option<Arc<FixedScope>> {
        self.out_scope
            .get_or_init(|| {
                let Some(activity) = self.activity() else {
                    self.no_scope("output");
                    return None;
                };
                Some(Arc::new(FixedScope::new(
                    activity.metadata().output(),
                    HashMap::new(),
                )))
            })
            .clone()
    }

    fn no_scope(&self, kind: &str) {
        if self.task.is_scope() {
            debug!(task = %self.task.id(), "Scope task, {} scope wired by its subflow", kind);
        }
    }

    fn track_data(&self, chg_type: ChangeType, attr: &Attribute) {
        self.tracker.track(
            self.sub_flow_id,
            chg_type,
            Change::TaskData {
                task_id: self.task.id().to_string(),
                name: attr.name().to_string(),
                value: attr.value().clone(),
            },
        );
    }

    fn run_activity(&self, flow: &FlowInstance, config: &ActivityConfig) -> Result<bool, EvalError> {
        let name = self.task.name();
        let resolver = flow.services().resolver.clone();
        let intercept = flow.interceptor().and_then(|i| i.task(self.task.id()));

        if let Some(mapper) = config.input_mapper() {
            if let Some(in_scope) = self.input_scope() {
                mapper
                    .apply(flow, &*in_scope, &*resolver)
                    .map_err(|e| EvalError::mapper(name, e))?;
            }

            if let Some(intercept) = intercept {
                if intercept.skip {
                    debug!(task = %name, "Activity skipped by interceptor");
                    return Ok(true);
                }
                for (input, value) in &intercept.inputs {
                    self.set_input(input, value.clone())
                        .map_err(|e| EvalError::mapper(name, e))?;
                }
            }
        }

        let activity = self.activity().ok_or_else(|| {
            let mut err = ActivityError::new(format!(
                "activity '{}' is not registered",
                config.activity_ref()
            ))
            .with_code("not_registered");
            err.set_activity_name(name);
            EvalError::Activity(err)
        })?;

        let done = match panic::catch_unwind(AssertUnwindSafe(|| activity.eval(self))) {
            Ok(Ok(done)) => done,
            Ok(Err(mut err)) => {
                err.set_activity_name(name);
                return Err(EvalError::Activity(err));
            }
            Err(payload) => {
                return Err(EvalError::unhandled(name, panic_message(&*payload)));
            }
        };

        if done {
            self.map_outputs(flow, config, intercept)?;
        }
        Ok(done)
    }

    fn map_outputs(
        &self,
        flow: &FlowInstance,
        config: &ActivityConfig,
        intercept: Option<&TaskInterceptor>,
    ) -> Result<(), EvalError> {
        let Some(mapper) = config.output_mapper() else {
            return Ok(());
        };
        let name = self.task.name();

        if let Some(intercept) = intercept {
            for (output, value) in &intercept.outputs {
                if let Err(e) = self.set_output(output, value.clone()) {
                    warn!(task = %name, output = %output, error = %e, "Output interceptor not applied");
                }
            }
        }

        let applied = match self.output_scope() {
            Some(out_scope) => {
                mapper
                    .apply(&*out_scope, flow, &*flow.services().resolver)
                    .map_err(|e| EvalError::mapper(name, e))?;
                true
            }
            None => false,
        };

        if !applied && !self.task.is_scope() {
            debug!(task = %name, "Mapper not applied");
        }
        Ok(())
    }

    /// Finishes a waiting activity with the outputs it produced, then maps
    /// them like a synchronous completion.
    pub fn complete(&self, outputs: HashMap<String, Value>) -> Result<(), EvalError> {
        let Some(config) = self.task.activity_config() else {
            return Ok(());
        };
        let name = self.task.name();
        let flow = self
            .flow()
            .map_err(|e| EvalError::unhandled(name, e.to_string()))?;

        for (output, value) in outputs {
            self.set_output(&output, value)
                .map_err(|e| EvalError::mapper(name, e))?;
        }

        let intercept = flow.interceptor().and_then(|i| i.task(self.task.id()));
        self.map_outputs(&flow, config, intercept)
    }
}

impl std::fmt::Debug for TaskInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskInstance")
            .field("task", &self.task.id())
            .field("sub_flow_id", &self.sub_flow_id)
            .field("status", &*self.status.read())
            .finish()
    }
}

impl ActivityContext for TaskInstance {
    fn name(&self) -> &str {
        self.task.name()
    }

    fn host(&self) -> Option<Arc<dyn ActivityHost>> {
        self.flow_inst
            .upgrade()
            .map(|f| f as Arc<dyn ActivityHost>)
    }

    fn get_input(&self, name: &str) -> Option<Value> {
        self.input_scope()?.get_value(name)
    }

    fn set_input(&self, name: &str, value: Value) -> Result<(), DataError> {
        match self.input_scope() {
            Some(scope) => scope.set_attr_value(name, value),
            None => Err(DataError::AttrNotDefined(name.to_string())),
        }
    }

    fn get_output(&self, name: &str) -> Option<Value> {
        self.output_scope()?.get_value(name)
    }

    fn set_output(&self, name: &str, value: Value) -> Result<(), DataError> {
        match self.output_scope() {
            Some(scope) => scope.set_attr_value(name, value),
            None => Err(DataError::AttrNotDefined(name.to_string())),
        }
    }

    /// A `$`-prefixed string setting is resolved against the flow
    /// attributes. An unresolvable setting reads as absent.
    fn get_setting(&self, name: &str) -> Option<Value> {
        let value = self.task.get_setting(name)?;

        let Some(reference) = value.as_str().filter(|s| is_resolvable(s)) else {
            return Some(value.clone());
        };

        let flow = self.flow_inst.upgrade()?;
        match flow.services().resolver.resolve(reference, &*flow) {
            Ok(resolved) => Some(resolved),
            Err(e) => {
                debug!(task = %self.task.id(), setting = %name, error = %e, "Unable to resolve setting");
                None
            }
        }
    }

    fn add_working_data(&self, attr: Attribute) {
        self.working_data
            .lock()
            .get_or_insert_with(HashMap::new)
            .insert(attr.name().to_string(), attr.clone());
        self.track_data(ChangeType::Add, &attr);
    }

    fn get_working_data(&self, key: &str) -> Option<Attribute> {
        self.working_data.lock().as_ref()?.get(key).cloned()
    }

    fn update_working_data(&self, key: &str, value: Value) -> Result<(), FlowError> {
        let updated = {
            let mut guard = self.working_data.lock();
            let attr = guard
                .as_mut()
                .and_then(|data| data.get_mut(key))
                .ok_or_else(|| FlowError::WorkingDataNotDefined(key.to_string()))?;
            attr.set_value(value)?;
            attr.clone()
        };
        self.track_data(ChangeType::Update, &updated);
        Ok(())
    }

    fn from_link_instances(&self) -> Vec<Arc<LinkInstance>> {
        let Some(flow) = self.flow_inst.upgrade() else {
            return Vec::new();
        };
        self.task
            .from_links()
            .iter()
            .map(|l| flow.find_or_create_link_inst(l))
            .collect()
    }

    fn to_link_instances(&self) -> Vec<Arc<LinkInstance>> {
        let Some(flow) = self.flow_inst.upgrade() else {
            return Vec::new();
        };
        self.task
            .to_links()
            .iter()
            .map(|l| flow.find_or_create_link_inst(l))
            .collect()
    }

    fn eval_link(&self, link: &Link) -> Result<bool, FlowError> {
        let Some(manager) = self.definition.link_expr_manager() else {
            return Ok(true);
        };
        let flow = self.flow()?;

        match panic::catch_unwind(AssertUnwindSafe(|| manager.eval_link_expr(link, &*flow))) {
            Ok(result) => result.map_err(|e| FlowError::LinkEval {
                link_id: e.link_id,
                message: e.message,
            }),
            Err(payload) => {
                let message = panic_message(&*payload);
                warn!(task = %self.task.id(), link = link.id(), error = %message, "Unhandled error evaluating link");
                Err(FlowError::LinkEval {
                    link_id: link.id(),
                    message,
                })
            }
        }
    }

    fn has_activity(&self) -> bool {
        self.activity().is_some()
    }
}

impl TaskContext for TaskInstance {
    fn task(&self) -> &Arc<Task> {
        &self.task
    }

    fn flow_definition(&self) -> &FlowDefinition {
        &self.definition
    }

    fn status(&self) -> TaskStatus {
        *self.status.read()
    }

    fn set_status(&self, status: TaskStatus) {
        *self.status.write() = status;
        self.tracker.track(
            self.sub_flow_id,
            ChangeType::Update,
            Change::TaskStatus {
                task_id: self.task.id().to_string(),
                status,
            },
        );
    }

    /// Maps inputs, runs the activity and maps outputs. A task without an
    /// activity completes immediately.
    fn eval_activity(&self) -> Result<bool, EvalError> {
        let Some(config) = self.task.activity_config() else {
            return Ok(true);
        };
        let flow = self
            .flow()
            .map_err(|e| EvalError::unhandled(self.task.name(), e.to_string()))?;

        let result = self.run_activity(&flow, config);
        if let Err(err) = &result {
            error!(
                task = %self.task.id(),
                flow = %flow.name(),
                category = err.category(),
                error = %err,
                "Execution failed for Activity[{}] in Flow[{}]",
                self.task.name(),
                flow.name()
            );
        }
        result
    }
}
