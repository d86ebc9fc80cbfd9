use std::fmt::Debug;

use tracing::debug;

use crate::definition::FlowDefinition;
use crate::model::{FlowContext, TaskEntry, TaskStatus};

/// Flow-level policy: which tasks start a flow and when it is finished.
pub trait FlowBehavior: Send + Sync + Debug {
    /// Entries to run when a new instance starts. The flag reports whether
    /// the flow may start at all.
    fn start(&self, ctx: &dyn FlowContext) -> (bool, Vec<TaskEntry>);

    /// Called before a rehydrated instance continues.
    fn resume(&self, ctx: &dyn FlowContext) -> bool;

    /// Called after a task reported completion. `true` means the whole flow
    /// is done.
    fn task_done(&self, ctx: &dyn FlowContext) -> bool;

    /// Called once, after `task_done` returned `true`.
    fn done(&self, ctx: &dyn FlowContext);
}

/// Every root task starts, and the flow is done once every task instance
/// that exists has reached a terminal status.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimpleFlowBehavior;

impl FlowBehavior for SimpleFlowBehavior {
    fn start(&self, ctx: &dyn FlowContext) -> (bool, Vec<TaskEntry>) {
        let def = ctx.flow_definition();
        debug!(flow = %def.name(), "Starting flow");
        (true, root_entries(def))
    }

    fn resume(&self, ctx: &dyn FlowContext) -> bool {
        debug!(flow = %ctx.flow_definition().name(), "Resuming flow");
        true
    }

    fn task_done(&self, ctx: &dyn FlowContext) -> bool {
        let pending = ctx
            .task_instances()
            .iter()
            .find(|t| t.status() < TaskStatus::Done)
            .map(|t| t.task().id().to_string());

        match pending {
            Some(task) => {
                debug!(task = %task, "Task not done, flow continues");
                false
            }
            None => true,
        }
    }

    fn done(&self, ctx: &dyn FlowContext) {
        debug!(flow = %ctx.flow_definition().name(), "Flow done");
    }
}

/// Tasks with no incoming links, in definition order.
pub fn root_entries(def: &FlowDefinition) -> Vec<TaskEntry> {
    def.tasks()
        .iter()
        .filter(|t| t.from_links().is_empty())
        .map(|t| TaskEntry::new(t.clone()))
        .collect()
}
