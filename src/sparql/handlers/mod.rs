//! Query handlers, one per query form
//!
//! A handler turns a parsed [`Query`] into SQL through the planner and the
//! codec, runs it through the adapter and shapes the result. Errors bubble
//! out of [`QueryHandler::handle`] and are turned into diagnostics by the
//! executor; per-triple problems inside INSERT and DELETE are recorded by
//! the handler itself so the remaining triples still go through.

mod ask;
mod construct;
mod delete;
mod insert;
mod select;

pub use ask::AskQueryHandler;
pub use construct::ConstructQueryHandler;
pub use delete::DeleteQueryHandler;
pub use insert::InsertQueryHandler;
pub use select::SelectQueryHandler;

use super::ast::{PatternNode, PatternTerm, Query, QueryForm, TriplePattern};
use super::diagnostics::Diagnostics;
use super::planner::{PatternPlanner, PlanError, RelationalPlan};
use super::results::{QueryResult, ResultRow};
use super::sql::{column_alias, SelectSql};
use crate::adapter::{Adapter, AdapterError};
use crate::rdf::codec::{BlankNodeScope, CodecError, EncodedTerm, TermCodec};
use crate::rdf::{NamedNode, RdfError, Term, Triple};
use indexmap::IndexSet;
use thiserror::Error;
use tracing::debug;

/// Handler errors. `Display` is the message of the underlying failure.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HandlerError {
    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error(transparent)]
    Rdf(#[from] RdfError),

    /// Query that parses but has nothing to act on
    #[error("{0}")]
    Invalid(String),
}

impl HandlerError {
    /// Failures of the backend itself, as opposed to one bad term
    pub fn is_backend_failure(&self) -> bool {
        matches!(self, HandlerError::Adapter(_) | HandlerError::Codec(CodecError::Adapter(_)))
    }
}

pub type HandlerResult<T> = Result<T, HandlerError>;

/// Store state a handler works against
pub struct HandlerContext<'a> {
    pub adapter: &'a mut dyn Adapter,
    pub codec: &'a mut TermCodec,
    pub diagnostics: &'a mut Diagnostics,
}

impl<'a> HandlerContext<'a> {
    pub fn new(adapter: &'a mut dyn Adapter, codec: &'a mut TermCodec, diagnostics: &'a mut Diagnostics) -> Self {
        Self {
            adapter,
            codec,
            diagnostics,
        }
    }

    /// Plan the query's WHERE pattern over its dataset
    pub fn plan(&self, query: &Query) -> HandlerResult<RelationalPlan> {
        let empty = PatternNode::empty();
        let pattern = query.pattern.as_ref().unwrap_or(&empty);
        Ok(PatternPlanner::new(&*self.adapter, &*self.codec, &query.dataset).plan(pattern)?)
    }

    /// Run a SELECT and decode its rows, keyed by variable name
    pub fn solutions(&mut self, select: &SelectSql<'_>) -> HandlerResult<Vec<ResultRow>> {
        let sql = select.render(&*self.adapter, &*self.codec)?;
        debug!(%sql, "evaluating graph pattern");
        let rows = self.adapter.fetch_list(&sql)?;

        let mut solutions = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut solution = ResultRow::new();
            for (i, var) in select.variables().iter().enumerate() {
                if let Some(term) = TermCodec::decode(row, &column_alias(i))? {
                    solution.insert(var.clone(), term);
                }
            }
            solutions.push(solution);
        }
        Ok(solutions)
    }

    fn graph_id(&mut self, graph: Option<&NamedNode>) -> HandlerResult<i64> {
        match graph {
            Some(g) => Ok(self.codec.encode(&mut *self.adapter, &Term::NamedNode(g.clone()))?.value_id),
            None => Ok(0),
        }
    }

    /// Store one triple unless an identical one exists; returns rows added
    pub fn store_triple(&mut self, triple: &Triple, graph: Option<&NamedNode>) -> HandlerResult<u64> {
        let s = self.codec.encode(&mut *self.adapter, &triple.subject.clone().into())?;
        let p = self
            .codec
            .encode(&mut *self.adapter, &Term::NamedNode(triple.predicate.clone()))?;
        let o = self.codec.encode(&mut *self.adapter, &triple.object)?;
        let g = self.graph_id(graph)?;

        let table = &self.codec.tables().triple;
        let lang = self.adapter.quote(&o.lang);
        let sql = format!(
            "INSERT INTO {table} (g, s, s_type, p, o, o_type, o_dt, o_lang) \
             SELECT {g}, {s}, {st}, {p}, {o}, {ot}, {dt}, {lang} FROM (SELECT 1 AS one) X \
             WHERE NOT EXISTS (SELECT 1 FROM {table} WHERE {matches})",
            table = table,
            g = g,
            s = s.value_id,
            st = s.kind.code(),
            p = p.value_id,
            o = o.value_id,
            ot = o.kind.code(),
            dt = o.datatype_id,
            lang = lang,
            matches = self.match_conditions(&s, &p, &o, Some(g)),
        );
        Ok(self.adapter.exec(&sql)?)
    }

    /// Remove one triple; without a graph it goes from every graph
    pub fn remove_triple(&mut self, triple: &Triple, graph: Option<&NamedNode>) -> HandlerResult<u64> {
        let terms = [
            Term::from(triple.subject.clone()),
            Term::NamedNode(triple.predicate.clone()),
            triple.object.clone(),
        ];
        let mut encoded = Vec::with_capacity(3);
        for term in &terms {
            match self.codec.encode_existing(&mut *self.adapter, term)? {
                Some(e) => encoded.push(e),
                None => return Ok(0),
            }
        }
        let g = match graph {
            Some(g) => match self.codec.lookup(&mut *self.adapter, g.as_str())? {
                Some(id) => Some(id),
                None => return Ok(0),
            },
            None => None,
        };
        let sql = format!(
            "DELETE FROM {} WHERE {}",
            self.codec.tables().triple,
            self.match_conditions(&encoded[0], &encoded[1], &encoded[2], g)
        );
        Ok(self.adapter.exec(&sql)?)
    }

    /// Remove every triple of a graph
    pub fn clear_graph(&mut self, graph: &NamedNode) -> HandlerResult<u64> {
        let Some(g) = self.codec.lookup(&mut *self.adapter, graph.as_str())? else {
            return Ok(0);
        };
        let sql = format!("DELETE FROM {} WHERE g = {}", self.codec.tables().triple, g);
        Ok(self.adapter.exec(&sql)?)
    }

    fn match_conditions(&self, s: &EncodedTerm, p: &EncodedTerm, o: &EncodedTerm, g: Option<i64>) -> String {
        let mut conditions = vec![
            format!("s = {}", s.value_id),
            format!("s_type = {}", s.kind.code()),
            format!("p = {}", p.value_id),
            format!("o = {}", o.value_id),
            format!("o_type = {}", o.kind.code()),
            format!("o_dt = {}", o.datatype_id),
            format!("o_lang = {}", self.adapter.quote(&o.lang)),
        ];
        if let Some(g) = g {
            conditions.insert(0, format!("g = {}", g));
        }
        conditions.join(" AND ")
    }
}

/// Handler for one query form
pub trait QueryHandler {
    /// Name used to attribute diagnostics
    fn name(&self) -> &'static str;

    fn handle(&self, ctx: &mut HandlerContext<'_>, query: &Query) -> HandlerResult<QueryResult>;
}

/// Handler responsible for a query form
pub fn handler_for(form: &QueryForm) -> &'static dyn QueryHandler {
    match form {
        QueryForm::Select { .. } => &SelectQueryHandler,
        QueryForm::Construct => &ConstructQueryHandler,
        QueryForm::Ask => &AskQueryHandler,
        QueryForm::Insert => &InsertQueryHandler,
        QueryForm::Delete => &DeleteQueryHandler,
    }
}

/// What a template blank node stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TemplateBlanks {
    /// A new node for every solution (CONSTRUCT, INSERT)
    Fresh,
    /// The node the same label matched in the pattern (DELETE WHERE)
    Matched,
}

/// Template positions the WHERE pattern can bind: variables, plus blank
/// node labels that also occur in the pattern when `blanks` is `Matched`
fn template_bindings(template: &[TriplePattern], plan: &RelationalPlan, blanks: TemplateBlanks) -> Vec<String> {
    let mut vars: Vec<String> = Vec::new();
    for tp in template {
        for term in tp.terms() {
            if matches!(term, PatternTerm::BlankNode(_)) && blanks == TemplateBlanks::Fresh {
                continue;
            }
            if let Some(name) = term.binding_name() {
                if plan.binds(&name) && !vars.contains(&name) {
                    vars.push(name);
                }
            }
        }
    }
    vars
}

/// Fill a template triple from one solution.
///
/// `Ok(None)` when a variable has no value; template blank nodes not bound
/// by the solution come from `scope`.
fn instantiate(
    tp: &TriplePattern,
    solution: &ResultRow,
    scope: &mut BlankNodeScope,
) -> Result<Option<Triple>, RdfError> {
    let mut terms = Vec::with_capacity(3);
    for term in tp.terms() {
        let value = match term {
            PatternTerm::Term(t) => t.clone(),
            PatternTerm::Variable(v) => match solution.get(v) {
                Some(t) => t.clone(),
                None => return Ok(None),
            },
            PatternTerm::BlankNode(label) => {
                let name = label.binding_name();
                match solution.get(&name) {
                    Some(t) => t.clone(),
                    None => Term::BlankNode(scope.resolve(&name)),
                }
            }
        };
        terms.push(value);
    }
    let mut terms = terms.into_iter();
    match (terms.next(), terms.next(), terms.next()) {
        (Some(s), Some(p), Some(o)) => Triple::from_terms(s, p, o).map(Some),
        _ => Ok(None),
    }
}

/// Instantiate the template once per solution, dropping duplicates.
/// Blank nodes are fresh for every solution.
fn instantiate_all(template: &[TriplePattern], solutions: &[ResultRow]) -> Vec<Triple> {
    let mut scope = BlankNodeScope::new();
    let mut triples = IndexSet::new();
    for solution in solutions {
        scope.reset_labels();
        for tp in template {
            if let Ok(Some(triple)) = instantiate(tp, solution, &mut scope) {
                triples.insert(triple);
            }
        }
    }
    triples.into_iter().collect()
}

/// Ground triples an update acts on: the data block as written, or the
/// template instantiated over the WHERE solutions.
///
/// In a data block, triples with a variable are skipped with a warning and
/// triples RDF forbids (literal subject...) are reported as errors.
fn update_triples(
    ctx: &mut HandlerContext<'_>,
    query: &Query,
    blanks: TemplateBlanks,
    origin: &str,
) -> HandlerResult<Vec<Triple>> {
    if query.pattern.is_some() {
        let plan = ctx.plan(query)?;
        let variables = template_bindings(&query.template, &plan, blanks);
        let solutions = ctx.solutions(&SelectSql::new(&plan, &variables))?;
        return Ok(instantiate_all(&query.template, &solutions));
    }

    let mut scope = BlankNodeScope::new();
    let empty = ResultRow::new();
    let mut triples = Vec::with_capacity(query.template.len());
    for tp in &query.template {
        match instantiate(tp, &empty, &mut scope) {
            Ok(Some(triple)) => triples.push(triple),
            Ok(None) => ctx
                .diagnostics
                .warning(format!("Skipped triple with variable: {}", tp), origin),
            Err(e) => ctx.diagnostics.error(e.to_string(), origin),
        }
    }
    Ok(triples)
}
