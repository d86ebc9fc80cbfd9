use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use evalexpr::{DefaultNumericTypes, Node as EvalNode, build_operator_tree};

use crate::data::scope::Scope;
use crate::definition::{Link, LinkId, LinkType};
use crate::error::{DefinitionError, ExprError};
use crate::expr;

/// Evaluates link guard expressions.
pub trait LinkExprManager: Send + Sync + Debug {
    fn eval_link_expr(&self, link: &Link, scope: &dyn Scope) -> Result<bool, ExprError>;
}

#[derive(Debug)]
struct CompiledExpr {
    raw: String,
    node: EvalNode<DefaultNumericTypes>,
}

/// Link expressions compiled once per flow definition and evaluated with
/// evalexpr over the flow attributes. Non-expression links are always true.
#[derive(Debug)]
pub struct ExprLinkManager {
    exprs: HashMap<LinkId, CompiledExpr>,
}

impl ExprLinkManager {
    pub fn new(links: &[Arc<Link>]) -> Result<Self, DefinitionError> {
        let mut exprs = HashMap::new();
        for link in links.iter().filter(|l| l.kind() == LinkType::Expression) {
            let raw = link
                .value()
                .ok_or(DefinitionError::MissingExpression(link.id()))?;
            let clean = expr::clean_expression(raw);
            let node = build_operator_tree::<DefaultNumericTypes>(&clean).map_err(|e| {
                DefinitionError::InvalidExpression {
                    link_id: link.id(),
                    message: e.to_string(),
                }
            })?;
            exprs.insert(link.id(), CompiledExpr { raw: clean, node });
        }
        Ok(Self { exprs })
    }
}

impl LinkExprManager for ExprLinkManager {
    fn eval_link_expr(&self, link: &Link, scope: &dyn Scope) -> Result<bool, ExprError> {
        if link.kind() != LinkType::Expression {
            return Ok(true);
        }

        let compiled = self.exprs.get(&link.id()).ok_or_else(|| ExprError {
            link_id: link.id(),
            message: "no compiled expression".to_string(),
        })?;

        let ctx = expr::context_from_attrs(&scope.attrs());
        compiled
            .node
            .eval_boolean_with_context(&ctx)
            .map_err(|e| ExprError {
                link_id: link.id(),
                message: format!("'{}': {}", compiled.raw, e),
            })
    }
}
