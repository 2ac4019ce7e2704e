//! CONSTRUCT handler
//!
//! The template is instantiated once per solution; nothing is stored.

use super::{instantiate_all, template_bindings, HandlerContext, HandlerResult, QueryHandler, TemplateBlanks};
use crate::sparql::ast::Query;
use crate::sparql::results::QueryResult;
use crate::sparql::sql::SelectSql;
use tracing::debug;

pub struct ConstructQueryHandler;

impl QueryHandler for ConstructQueryHandler {
    fn name(&self) -> &'static str {
        "ConstructQueryHandler"
    }

    fn handle(&self, ctx: &mut HandlerContext<'_>, query: &Query) -> HandlerResult<QueryResult> {
        let plan = ctx.plan(query)?;
        let variables = template_bindings(&query.template, &plan, TemplateBlanks::Fresh);
        let select = SelectSql::new(&plan, &variables).with_modifiers(&query.modifiers);
        let solutions = ctx.solutions(&select)?;

        let triples = instantiate_all(&query.template, &solutions);
        debug!(solutions = solutions.len(), triples = triples.len(), "constructed graph");
        Ok(QueryResult::Graph(triples))
    }
}
