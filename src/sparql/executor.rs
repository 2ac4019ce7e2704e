//! SPARQL query executor
//!
//! Parses one query, dispatches it to the handler for its form and turns
//! any failure into a diagnostic. `execute` always returns an envelope.

use super::handlers::{handler_for, HandlerContext};
use super::parser::SparqlParser;
use super::results::{QueryType, ResultEnvelope};
use std::time::Instant;
use tracing::debug;

/// Executes queries against one store's state
pub struct SparqlExecutor<'a> {
    ctx: HandlerContext<'a>,
    parser: &'a SparqlParser,
}

impl<'a> SparqlExecutor<'a> {
    pub fn new(ctx: HandlerContext<'a>, parser: &'a SparqlParser) -> Self {
        Self { ctx, parser }
    }

    pub fn execute(&mut self, text: &str) -> ResultEnvelope {
        let started = Instant::now();

        let query = match self.parser.parse(text) {
            Ok(query) => query,
            Err(e) => {
                self.ctx.diagnostics.error(e.to_string(), "SparqlParser");
                let query_type = QueryType::sniff(text);
                return ResultEnvelope {
                    query_type,
                    result: query_type.empty_result(Vec::new()),
                    query_time: started.elapsed().as_secs_f64(),
                };
            }
        };

        let query_type = QueryType::from_form(&query.form);
        let handler = handler_for(&query.form);
        debug!(handler = handler.name(), "executing {} query", query_type.as_str());

        let result = match handler.handle(&mut self.ctx, &query) {
            Ok(result) => result,
            Err(e) => {
                self.ctx.diagnostics.error(e.to_string(), handler.name());
                query_type.empty_result(query.result_variables())
            }
        };

        ResultEnvelope {
            query_type,
            result,
            query_time: started.elapsed().as_secs_f64(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::SqliteAdapter;
    use crate::config::StoreConfig;
    use crate::rdf::codec::TermCodec;
    use crate::sparql::diagnostics::Diagnostics;

    #[test]
    fn test_parse_error_keeps_sniffed_type() {
        let config = StoreConfig::default();
        let mut adapter = SqliteAdapter::in_memory().unwrap();
        adapter.setup(&config.tables()).unwrap();
        let mut codec = TermCodec::new(config.tables(), 16);
        let mut diagnostics = Diagnostics::new();
        let parser = SparqlParser::new();

        let envelope = {
            let ctx = HandlerContext::new(&mut adapter, &mut codec, &mut diagnostics);
            SparqlExecutor::new(ctx, &parser).execute("ASK { ?s ?p ")
        };
        assert_eq!(envelope.query_type, QueryType::Ask);
        assert_eq!(envelope.result.boolean(), Some(false));
        assert_eq!(diagnostics.errors().len(), 1);
        assert!(diagnostics.errors()[0].ends_with(" via SparqlParser"));
    }
}
