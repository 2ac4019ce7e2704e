//! SELECT handler

use super::{HandlerContext, HandlerResult, QueryHandler};
use crate::sparql::ast::Query;
use crate::sparql::results::QueryResult;
use crate::sparql::sql::SelectSql;

pub struct SelectQueryHandler;

impl QueryHandler for SelectQueryHandler {
    fn name(&self) -> &'static str {
        "SelectQueryHandler"
    }

    fn handle(&self, ctx: &mut HandlerContext<'_>, query: &Query) -> HandlerResult<QueryResult> {
        let plan = ctx.plan(query)?;
        let variables = query.result_variables();
        for var in &variables {
            if !plan.binds(var) {
                ctx.diagnostics
                    .warning(format!("Result variable \"{}\" not used in query.", var), self.name());
            }
        }

        let select = SelectSql::new(&plan, &variables).with_modifiers(&query.modifiers);
        let rows = ctx.solutions(&select)?;
        Ok(QueryResult::Bindings { variables, rows })
    }
}
