//! INSERT handler
//!
//! Data forms store the template as written. WHERE forms store one
//! instantiation per solution, so a pattern without matches stores nothing.

use super::{update_triples, HandlerContext, HandlerResult, QueryHandler, TemplateBlanks};
use crate::rdf::{NamedNode, Triple};
use crate::sparql::ast::Query;
use crate::sparql::results::QueryResult;
use tracing::debug;

pub struct InsertQueryHandler;

impl InsertQueryHandler {
    /// Store triples one by one. A triple that cannot be encoded is reported
    /// and skipped; backend failures abort.
    pub fn store_all(
        &self,
        ctx: &mut HandlerContext<'_>,
        triples: &[Triple],
        graph: Option<&NamedNode>,
    ) -> HandlerResult<u64> {
        let mut stored = 0;
        for triple in triples {
            match ctx.store_triple(triple, graph) {
                Ok(n) => stored += n,
                Err(e) if e.is_backend_failure() => return Err(e),
                Err(e) => ctx.diagnostics.error(e.to_string(), self.name()),
            }
        }
        debug!(stored, candidates = triples.len(), "stored triples");
        Ok(stored)
    }
}

impl QueryHandler for InsertQueryHandler {
    fn name(&self) -> &'static str {
        "InsertQueryHandler"
    }

    fn handle(&self, ctx: &mut HandlerContext<'_>, query: &Query) -> HandlerResult<QueryResult> {
        let triples = update_triples(ctx, query, TemplateBlanks::Fresh, self.name())?;
        let t_count = self.store_all(ctx, &triples, query.target_graph.as_ref())?;
        Ok(QueryResult::Update { t_count })
    }
}
