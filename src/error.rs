use std::any::Any;

use serde_json::Value;
use thiserror::Error;

use crate::data::attribute::DataType;
use crate::definition::LinkId;

/// Errors raised by attribute scopes, value coercion and data resolution.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DataError {
    #[error("attribute '{0}' is not defined")]
    AttrNotDefined(String),

    #[error("unable to coerce {value} to {data_type}")]
    Coercion { value: String, data_type: DataType },

    #[error("unable to resolve '{0}'")]
    Unresolved(String),

    #[error("unknown resolver in '{0}'")]
    UnknownResolver(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MapperError {
    #[error("mapping to '{map_to}' failed: {source}")]
    Data {
        map_to: String,
        #[source]
        source: DataError,
    },

    #[error("expression '{expr}' failed: {message}")]
    Expression { expr: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("expression for link {link_id} failed: {message}")]
pub struct ExprError {
    pub link_id: LinkId,
    pub message: String,
}

/// Error returned by an activity implementation.
///
/// The task instance attaches the name of the task that ran the activity
/// before handing the error to the driver.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct ActivityError {
    message: String,
    code: Option<String>,
    data: Option<Value>,
    activity_name: Option<String>,
}

impl ActivityError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            data: None,
            activity_name: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    pub fn activity_name(&self) -> Option<&str> {
        self.activity_name.as_deref()
    }

    pub fn set_activity_name(&mut self, name: impl Into<String>) {
        self.activity_name = Some(name.into());
    }
}

/// Outcome of a failed `eval_activity` call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("activity '{task_name}' failed [mapper]: {message}")]
    Mapper { task_name: String, message: String },

    #[error("activity '{task_name}' failed [unhandled]: {message}")]
    Unhandled { task_name: String, message: String },

    #[error("activity failed [activity]: {0}")]
    Activity(ActivityError),
}

impl EvalError {
    pub fn mapper(task_name: &str, err: impl ToString) -> Self {
        EvalError::Mapper {
            task_name: task_name.to_string(),
            message: err.to_string(),
        }
    }

    pub fn unhandled(task_name: &str, message: impl Into<String>) -> Self {
        EvalError::Unhandled {
            task_name: task_name.to_string(),
            message: message.into(),
        }
    }

    pub fn category(&self) -> &'static str {
        match self {
            EvalError::Mapper { .. } => "mapper",
            EvalError::Unhandled { .. } => "unhandled",
            EvalError::Activity(_) => "activity",
        }
    }

    pub fn task_name(&self) -> Option<&str> {
        match self {
            EvalError::Mapper { task_name, .. } | EvalError::Unhandled { task_name, .. } => {
                Some(task_name)
            }
            EvalError::Activity(e) => e.activity_name(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DefinitionError {
    #[error("duplicate task id: {0}")]
    DuplicateTask(String),

    #[error("link {link_id} references unknown task '{task_id}'")]
    UnknownTask { link_id: LinkId, task_id: String },

    #[error("expression link {0} has no expression")]
    MissingExpression(LinkId),

    #[error("invalid expression on link {link_id}: {message}")]
    InvalidExpression { link_id: LinkId, message: String },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FlowError {
    #[error("working data '{0}' not defined")]
    WorkingDataNotDefined(String),

    #[error("error evaluating link {link_id}: {message}")]
    LinkEval { link_id: LinkId, message: String },

    #[error("flow instance is no longer available")]
    InstanceDropped,

    #[error("snapshot of flow '{actual}' cannot restore flow '{expected}'")]
    SnapshotMismatch { expected: String, actual: String },

    #[error("snapshot references unknown task '{0}'")]
    UnknownTask(String),

    #[error("snapshot references unknown link {0}")]
    UnknownLink(LinkId),

    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Definition(#[from] DefinitionError),
}

/// Extracts a readable message from a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
