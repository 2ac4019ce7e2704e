//! DELETE handler

use super::{update_triples, HandlerContext, HandlerError, HandlerResult, QueryHandler, TemplateBlanks};
use crate::sparql::ast::Query;
use crate::sparql::results::QueryResult;
use tracing::debug;

pub struct DeleteQueryHandler;

impl QueryHandler for DeleteQueryHandler {
    fn name(&self) -> &'static str {
        "DeleteQueryHandler"
    }

    fn handle(&self, ctx: &mut HandlerContext<'_>, query: &Query) -> HandlerResult<QueryResult> {
        let graph = query.target_graph.as_ref();

        if query.template.is_empty() && query.pattern.is_none() {
            let Some(graph) = graph else {
                return Err(HandlerError::Invalid("DELETE without triples needs a FROM graph".to_string()));
            };
            let t_count = ctx.clear_graph(graph)?;
            debug!(graph = %graph, t_count, "cleared graph");
            return Ok(QueryResult::Update { t_count });
        }

        let triples = update_triples(ctx, query, TemplateBlanks::Matched, self.name())?;
        let mut t_count = 0;
        for triple in &triples {
            match ctx.remove_triple(triple, graph) {
                Ok(n) => t_count += n,
                Err(e) if e.is_backend_failure() => return Err(e),
                Err(e) => ctx.diagnostics.error(e.to_string(), self.name()),
            }
        }
        debug!(t_count, candidates = triples.len(), "removed triples");
        Ok(QueryResult::Update { t_count })
    }
}
