//! ASK handler

use super::{HandlerContext, HandlerResult, QueryHandler};
use crate::sparql::ast::Query;
use crate::sparql::results::QueryResult;
use crate::sparql::sql::SelectSql;

pub struct AskQueryHandler;

impl QueryHandler for AskQueryHandler {
    fn name(&self) -> &'static str {
        "AskQueryHandler"
    }

    fn handle(&self, ctx: &mut HandlerContext<'_>, query: &Query) -> HandlerResult<QueryResult> {
        let plan = ctx.plan(query)?;
        let rows = ctx.solutions(&SelectSql::new(&plan, &[]).first_row_only())?;
        Ok(QueryResult::Boolean(!rows.is_empty()))
    }
}
