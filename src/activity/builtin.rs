use tracing::info;

use crate::activity::{Activity, ActivityContext, Metadata};
use crate::data::attribute::DataType;
use crate::error::ActivityError;
use crate::expr;

/// Logs its `message` input.
#[derive(Debug)]
pub struct LogActivity {
    metadata: Metadata,
}

impl LogActivity {
    pub fn new() -> Self {
        Self {
            metadata: Metadata::new("log")
                .with_input("message", DataType::String)
                .with_input("flowInfo", DataType::Boolean),
        }
    }
}

impl Default for LogActivity {
    fn default() -> Self {
        Self::new()
    }
}

impl Activity for LogActivity {
    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn eval(&self, ctx: &dyn ActivityContext) -> Result<bool, ActivityError> {
        let message = ctx
            .get_input("message")
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        let flow_info = ctx
            .get_input("flowInfo")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        match ctx.host().filter(|_| flow_info) {
            Some(host) => info!(flow = %host.name(), instance = %host.id(), task = %ctx.name(), "[LOG] {}", message),
            None => info!("[LOG] {}", message),
        }
        Ok(true)
    }
}

/// Evaluates its `expression` input over the flow attributes and writes the
/// result to the `result` output.
#[derive(Debug)]
pub struct ExpressionActivity {
    metadata: Metadata,
}

impl ExpressionActivity {
    pub fn new() -> Self {
        Self {
            metadata: Metadata::new("expression")
                .with_input("expression", DataType::String)
                .with_output("result", DataType::Any),
        }
    }
}

impl Default for ExpressionActivity {
    fn default() -> Self {
        Self::new()
    }
}

impl Activity for ExpressionActivity {
    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn eval(&self, ctx: &dyn ActivityContext) -> Result<bool, ActivityError> {
        let raw = ctx
            .get_input("expression")
            .and_then(|v| v.as_str().map(str::to_string))
            .ok_or_else(|| ActivityError::new("missing input: expression").with_code("missing_input"))?;

        let attrs = ctx.host().map(|h| h.attrs()).unwrap_or_default();
        let eval_ctx = expr::context_from_attrs(&attrs);

        let result = evalexpr::eval_with_context(&expr::clean_expression(&raw), &eval_ctx)
            .map_err(|e| {
                ActivityError::new(format!("expression '{}' failed: {}", raw, e))
                    .with_code("expression")
            })?;

        ctx.set_output("result", expr::from_eval_value(result))
            .map_err(|e| ActivityError::new(e.to_string()))?;
        Ok(true)
    }
}

/// Always fails with its `message` input, carrying `data` along.
#[derive(Debug)]
pub struct ErrorActivity {
    metadata: Metadata,
}

impl ErrorActivity {
    pub fn new() -> Self {
        Self {
            metadata: Metadata::new("error")
                .with_input("message", DataType::String)
                .with_input("data", DataType::Any),
        }
    }
}

impl Default for ErrorActivity {
    fn default() -> Self {
        Self::new()
    }
}

impl Activity for ErrorActivity {
    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn eval(&self, ctx: &dyn ActivityContext) -> Result<bool, ActivityError> {
        let message = ctx
            .get_input("message")
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| "error".to_string());

        let mut err = ActivityError::new(message);
        if let Some(data) = ctx.get_input("data").filter(|d| !d.is_null()) {
            err = err.with_data(data);
        }
        Err(err)
    }
}

