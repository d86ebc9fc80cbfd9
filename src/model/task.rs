use std::collections::HashSet;
use std::fmt::Debug;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::definition::{Link, LinkType};
use crate::error::EvalError;
use crate::model::{LinkStatus, TaskContext, TaskEntry, TaskStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnterResult {
    /// Every incoming link is resolved and at least one fired.
    Eval,
    /// Every incoming link is resolved and none fired.
    Skip,
    /// Some incoming link is still pending.
    NotReady,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EvalResult {
    Done,
    Waiting,
    Failed(EvalError),
}

/// Task-level policy used by the driver.
///
/// The `(bool, Vec<TaskEntry>)` pairs returned by `done`, `skip` and `error`
/// carry a flag plus the successor tasks to enter next. For `done` and
/// `skip` the flag asks the driver to consult the flow behavior; for `error`
/// it reports whether the failure was handled.
pub trait TaskBehavior: Send + Sync + Debug {
    fn enter(&self, ctx: &dyn TaskContext) -> EnterResult;
    fn eval(&self, ctx: &dyn TaskContext) -> EvalResult;
    fn done(&self, ctx: &dyn TaskContext) -> (bool, Vec<TaskEntry>);
    fn skip(&self, ctx: &dyn TaskContext) -> (bool, Vec<TaskEntry>);
    fn error(&self, ctx: &dyn TaskContext, err: &EvalError) -> (bool, Vec<TaskEntry>);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SimpleTaskBehavior;

impl TaskBehavior for SimpleTaskBehavior {
    fn enter(&self, ctx: &dyn TaskContext) -> EnterResult {
        if ctx.status() >= TaskStatus::Scheduled {
            return EnterResult::NotReady;
        }

        let links = ctx.from_link_instances();
        if links.is_empty() {
            ctx.set_status(TaskStatus::Scheduled);
            return EnterResult::Eval;
        }

        let mut fired = false;
        for link in &links {
            match link.status() {
                LinkStatus::Pending => {
                    debug!(task = %ctx.task().id(), link = link.id(), "Task entered, waiting on link");
                    if ctx.status() != TaskStatus::Entered {
                        ctx.set_status(TaskStatus::Entered);
                    }
                    return EnterResult::NotReady;
                }
                LinkStatus::True => fired = true,
                LinkStatus::False | LinkStatus::Skipped => {}
            }
        }

        if fired {
            ctx.set_status(TaskStatus::Scheduled);
            EnterResult::Eval
        } else {
            ctx.set_status(TaskStatus::Skipped);
            EnterResult::Skip
        }
    }

    fn eval(&self, ctx: &dyn TaskContext) -> EvalResult {
        ctx.set_status(TaskStatus::InProgress);

        match ctx.eval_activity() {
            Ok(true) => EvalResult::Done,
            Ok(false) => {
                ctx.set_status(TaskStatus::Waiting);
                EvalResult::Waiting
            }
            Err(err) => {
                ctx.set_status(TaskStatus::Failed);
                EvalResult::Failed(err)
            }
        }
    }

    fn done(&self, ctx: &dyn TaskContext) -> (bool, Vec<TaskEntry>) {
        ctx.set_status(TaskStatus::Done);

        let to_links = ctx.to_link_instances();
        if to_links.is_empty() {
            return (true, Vec::new());
        }

        for inst in &to_links {
            let status = if inst.link().kind() == LinkType::Error {
                LinkStatus::False
            } else {
                match ctx.eval_link(inst.link()) {
                    Ok(true) => LinkStatus::True,
                    Ok(false) => LinkStatus::False,
                    Err(e) => {
                        warn!(task = %ctx.task().id(), link = inst.id(), error = %e, "Link evaluation failed, link treated as false");
                        LinkStatus::False
                    }
                }
            };
            inst.set_status(status);
        }

        (false, successor_entries(ctx, ctx.task().to_links()))
    }

    fn skip(&self, ctx: &dyn TaskContext) -> (bool, Vec<TaskEntry>) {
        let to_links = ctx.to_link_instances();
        if to_links.is_empty() {
            return (true, Vec::new());
        }

        for inst in &to_links {
            inst.set_status(LinkStatus::Skipped);
        }
        (false, successor_entries(ctx, ctx.task().to_links()))
    }

    fn error(&self, ctx: &dyn TaskContext, err: &EvalError) -> (bool, Vec<TaskEntry>) {
        let to_links = ctx.to_link_instances();
        if !to_links.iter().any(|l| l.link().kind() == LinkType::Error) {
            return (false, Vec::new());
        }

        debug!(task = %ctx.task().id(), error = %err, "Routing failure through error links");
        for inst in &to_links {
            if inst.link().kind() == LinkType::Error {
                inst.set_status(LinkStatus::True);
            } else {
                inst.set_status(LinkStatus::Skipped);
            }
        }
        (true, successor_entries(ctx, ctx.task().to_links()))
    }
}

/// Target tasks of `links`, once each, in link order.
fn successor_entries(ctx: &dyn TaskContext, links: &[Arc<Link>]) -> Vec<TaskEntry> {
    let def = ctx.flow_definition();
    let mut seen = HashSet::new();
    links
        .iter()
        .filter(|l| seen.insert(l.to_task()))
        .filter_map(|l| def.task(l.to_task()))
        .map(|t| TaskEntry::new(t.clone()))
        .collect()
}
