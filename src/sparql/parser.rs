//! SPARQL query parser using Pest
//!
//! Turns query text into a [`Query`]: prefixes and BASE are resolved here,
//! blank-node and collection shorthands are expanded into plain triple
//! patterns, and FILTER expressions are built with a Pratt parser.

use super::ast::*;
use crate::rdf::codec::infer_literal;
use crate::rdf::{Literal, NamedNode, NamespaceManager, Term};
use oxiri::Iri;
use oxrdf::vocab::rdf;
use pest::error::InputLocation;
use pest::iterators::Pair;
use pest::pratt_parser::{Assoc, Op, PrattParser};
use pest::Parser;
use pest_derive::Parser;
use std::sync::LazyLock;
use thiserror::Error;

#[derive(Parser)]
#[grammar = "sparql/sparql.pest"]
struct SparqlGrammar;

static PRATT_PARSER: LazyLock<PrattParser<Rule>> = LazyLock::new(|| {
    PrattParser::new()
        .op(Op::infix(Rule::or_op, Assoc::Left))
        .op(Op::infix(Rule::and_op, Assoc::Left))
        .op(Op::infix(Rule::comparison_op, Assoc::Left))
        .op(Op::infix(Rule::add_sub_op, Assoc::Left))
        .op(Op::infix(Rule::mul_div_op, Assoc::Left))
});

/// Parser errors. Every variant carries the byte offset it refers to.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Malformed query text
    #[error("Syntax error at position {position}: {message}")]
    Syntax { message: String, position: usize },

    /// Prefixed name whose prefix was never declared
    #[error("Unknown prefix \"{prefix}:\" at position {position}")]
    UnknownPrefix { prefix: String, position: usize },

    /// `"x"@lang^^<dt>`
    #[error("Literal at position {position} has both a language tag and a datatype")]
    ConflictingLiteral { position: usize },

    /// Well-formed text with an unusable value
    #[error("{message} at position {position}")]
    Invalid { message: String, position: usize },
}

impl ParseError {
    pub fn position(&self) -> usize {
        match self {
            ParseError::Syntax { position, .. }
            | ParseError::UnknownPrefix { position, .. }
            | ParseError::ConflictingLiteral { position }
            | ParseError::Invalid { position, .. } => *position,
        }
    }
}

pub type ParseResult<T> = Result<T, ParseError>;

fn syntax_error(err: pest::error::Error<Rule>) -> ParseError {
    let position = match err.location {
        InputLocation::Pos(pos) => pos,
        InputLocation::Span((start, _)) => start,
    };
    ParseError::Syntax {
        message: err.variant.message().into_owned(),
        position,
    }
}

fn invalid(message: impl Into<String>, position: usize) -> ParseError {
    ParseError::Invalid {
        message: message.into(),
        position,
    }
}

/// Reusable query parser; holds the prefixes and base every query starts with
#[derive(Debug, Clone, Default)]
pub struct SparqlParser {
    namespaces: NamespaceManager,
    default_base: Option<String>,
}

impl SparqlParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Base used for relative IRIs when the query declares no BASE
    pub fn with_default_base(mut self, base: Option<String>) -> Self {
        self.default_base = base;
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>, iri: impl Into<String>) -> Self {
        self.namespaces.add_prefix(prefix, iri);
        self
    }

    /// Parse a query string into an AST
    pub fn parse(&self, text: &str) -> ParseResult<Query> {
        let mut pairs = SparqlGrammar::parse(Rule::query, text).map_err(syntax_error)?;
        let pair = pairs
            .next()
            .ok_or_else(|| invalid("Empty query", 0))?;
        QueryBuilder::new(self).build(pair)
    }
}

/// Per-call parse state
struct QueryBuilder {
    namespaces: NamespaceManager,
    base: Option<Iri<String>>,
    prologue: Prologue,
    next_anon: u32,
}

impl QueryBuilder {
    fn new(parser: &SparqlParser) -> Self {
        let base = parser
            .default_base
            .as_ref()
            .and_then(|b| Iri::parse(b.clone()).ok());
        Self {
            namespaces: parser.namespaces.clone(),
            base,
            prologue: Prologue::default(),
            next_anon: 0,
        }
    }

    fn build(mut self, pair: Pair<Rule>) -> ParseResult<Query> {
        let position = pair.as_span().start();
        let mut query = None;
        for inner in pair.into_inner() {
            match inner.as_rule() {
                Rule::prologue => self.parse_prologue(inner)?,
                Rule::select_query => query = Some(self.parse_select(inner)?),
                Rule::construct_query => query = Some(self.parse_construct(inner)?),
                Rule::ask_query => query = Some(self.parse_ask(inner)?),
                Rule::insert_query => query = Some(self.parse_insert(inner)?),
                Rule::delete_query => query = Some(self.parse_delete(inner)?),
                _ => {}
            }
        }
        let mut query = query.ok_or_else(|| invalid("Missing query form", position))?;
        query.prologue = self.prologue;
        Ok(query)
    }

    // ------------------------------------------------------------------
    // Prologue and IRIs
    // ------------------------------------------------------------------

    fn parse_prologue(&mut self, pair: Pair<Rule>) -> ParseResult<()> {
        for decl in pair.into_inner() {
            match decl.as_rule() {
                Rule::base_decl => {
                    let position = decl.as_span().start();
                    let iriref = child(decl, Rule::iriref)?;
                    let iri = self.resolve(iriref_body(&iriref));
                    self.base = Some(
                        Iri::parse(iri.clone())
                            .map_err(|e| invalid(format!("Invalid BASE <{}>: {}", iri, e), position))?,
                    );
                    self.prologue.base = Some(NamedNode::new_unchecked(iri));
                }
                Rule::prefix_decl => {
                    let position = decl.as_span().start();
                    let mut prefix = None;
                    let mut iri = None;
                    for part in decl.into_inner() {
                        match part.as_rule() {
                            Rule::pname_ns => prefix = Some(part.as_str().trim_end_matches(':').to_string()),
                            Rule::iriref => iri = Some(self.resolve(iriref_body(&part))),
                            _ => {}
                        }
                    }
                    let prefix = prefix.ok_or_else(|| invalid("PREFIX without name", position))?;
                    let iri = iri.ok_or_else(|| invalid("PREFIX without IRI", position))?;
                    self.namespaces.add_prefix(prefix.clone(), iri.clone());
                    self.prologue.prefixes.insert(prefix, iri);
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Resolve against the active base; left untouched when there is none
    fn resolve(&self, raw: &str) -> String {
        match &self.base {
            Some(base) => base
                .resolve(raw)
                .map(Iri::into_inner)
                .unwrap_or_else(|_| raw.to_string()),
            None => raw.to_string(),
        }
    }

    fn parse_iri(&self, pair: Pair<Rule>) -> ParseResult<NamedNode> {
        let position = pair.as_span().start();
        let inner = pair
            .into_inner()
            .next()
            .ok_or_else(|| invalid("Expected IRI", position))?;
        match inner.as_rule() {
            Rule::iriref => Ok(NamedNode::new_unchecked(self.resolve(iriref_body(&inner)))),
            Rule::prefixed_name => {
                let (prefix, local) = inner
                    .as_str()
                    .split_once(':')
                    .ok_or_else(|| invalid("Expected prefixed name", position))?;
                let iri = self
                    .namespaces
                    .expand(prefix, local)
                    .map_err(|_| ParseError::UnknownPrefix {
                        prefix: prefix.to_string(),
                        position,
                    })?;
                Ok(NamedNode::new_unchecked(self.resolve(&iri)))
            }
            _ => Err(invalid("Expected IRI", position)),
        }
    }

    // ------------------------------------------------------------------
    // Query forms
    // ------------------------------------------------------------------

    fn parse_select(&mut self, pair: Pair<Rule>) -> ParseResult<Query> {
        let mut query = Query::new(QueryForm::Select {
            projection: Projection::All,
        });
        for inner in pair.into_inner() {
            match inner.as_rule() {
                Rule::select_modifier => {
                    query.modifiers.distinct = inner
                        .into_inner()
                        .any(|kw| kw.as_rule() == Rule::kw_distinct);
                }
                Rule::select_clause => {
                    let vars: Vec<String> = inner
                        .into_inner()
                        .filter(|p| p.as_rule() == Rule::var)
                        .map(|p| var_name(&p))
                        .collect();
                    if !vars.is_empty() {
                        query.form = QueryForm::Select {
                            projection: Projection::Variables(vars),
                        };
                    }
                }
                _ => self.parse_query_part(inner, &mut query)?,
            }
        }
        Ok(query)
    }

    fn parse_construct(&mut self, pair: Pair<Rule>) -> ParseResult<Query> {
        let mut query = Query::new(QueryForm::Construct);
        for inner in pair.into_inner() {
            self.parse_query_part(inner, &mut query)?;
        }
        Ok(query)
    }

    fn parse_ask(&mut self, pair: Pair<Rule>) -> ParseResult<Query> {
        let mut query = Query::new(QueryForm::Ask);
        for inner in pair.into_inner() {
            self.parse_query_part(inner, &mut query)?;
        }
        Ok(query)
    }

    fn parse_insert(&mut self, pair: Pair<Rule>) -> ParseResult<Query> {
        let mut query = Query::new(QueryForm::Insert);
        for inner in pair.into_inner() {
            match inner.as_rule() {
                Rule::insert_data | Rule::insert_template => {
                    for part in inner.into_inner() {
                        self.parse_query_part(part, &mut query)?;
                    }
                }
                _ => {}
            }
        }
        Ok(query)
    }

    fn parse_delete(&mut self, pair: Pair<Rule>) -> ParseResult<Query> {
        let mut query = Query::new(QueryForm::Delete);
        for inner in pair.into_inner() {
            match inner.as_rule() {
                Rule::delete_data | Rule::delete_template => {
                    for part in inner.into_inner() {
                        self.parse_query_part(part, &mut query)?;
                    }
                }
                Rule::delete_where => {
                    let group = child(inner, Rule::group_graph_pattern)?;
                    let pattern = self.parse_group(group)?;
                    query.template = pattern.triple_patterns().into_iter().cloned().collect();
                    query.pattern = Some(pattern);
                }
                _ => {}
            }
        }
        Ok(query)
    }

    /// Clauses shared by several forms
    fn parse_query_part(&mut self, pair: Pair<Rule>, query: &mut Query) -> ParseResult<()> {
        match pair.as_rule() {
            Rule::dataset_clause => {
                let iri = child(pair, Rule::iri)?;
                query.dataset.push(self.parse_iri(iri)?);
            }
            Rule::target_graph => {
                let iri = child(pair, Rule::iri)?;
                query.target_graph = Some(self.parse_iri(iri)?);
            }
            Rule::where_clause => {
                let group = child(pair, Rule::group_graph_pattern)?;
                query.pattern = Some(self.parse_group(group)?);
            }
            Rule::triples_template => {
                for block in pair.into_inner() {
                    if block.as_rule() == Rule::triples_block {
                        self.parse_triples_block(block, &mut query.template)?;
                    }
                }
            }
            Rule::update_where => {
                for part in pair.into_inner() {
                    self.parse_query_part(part, query)?;
                }
            }
            Rule::solution_modifiers => self.parse_solution_modifiers(pair, &mut query.modifiers)?,
            _ => {}
        }
        Ok(())
    }

    fn parse_solution_modifiers(&self, pair: Pair<Rule>, modifiers: &mut SolutionModifiers) -> ParseResult<()> {
        for inner in pair.into_inner() {
            match inner.as_rule() {
                Rule::order_clause => {
                    for condition in inner.into_inner() {
                        if condition.as_rule() == Rule::order_condition {
                            modifiers.order_by.push(self.parse_order_condition(condition)?);
                        }
                    }
                }
                Rule::limit_offset => {
                    for clause in inner.into_inner() {
                        let position = clause.as_span().start();
                        let rule = clause.as_rule();
                        let value = child(clause, Rule::integer)?
                            .as_str()
                            .parse::<u64>()
                            .map_err(|e| invalid(format!("Invalid number: {}", e), position))?;
                        match rule {
                            Rule::limit_clause => modifiers.limit = Some(value),
                            Rule::offset_clause => modifiers.offset = Some(value),
                            _ => {}
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn parse_order_condition(&self, pair: Pair<Rule>) -> ParseResult<OrderCondition> {
        let position = pair.as_span().start();
        let mut descending = false;
        let mut expression = None;
        for inner in pair.into_inner() {
            match inner.as_rule() {
                Rule::order_direction => {
                    descending = inner.into_inner().any(|kw| kw.as_rule() == Rule::kw_desc);
                }
                Rule::var => expression = Some(Expression::Variable(var_name(&inner))),
                Rule::bracketted_expression => {
                    expression = Some(self.parse_expression(child(inner, Rule::expression)?)?)
                }
                _ => {}
            }
        }
        Ok(OrderCondition {
            expression: expression.ok_or_else(|| invalid("Empty ORDER BY condition", position))?,
            descending,
        })
    }

    // ------------------------------------------------------------------
    // Graph patterns
    // ------------------------------------------------------------------

    fn parse_group(&mut self, pair: Pair<Rule>) -> ParseResult<PatternNode> {
        let mut acc: Option<PatternNode> = None;
        let mut filters = Vec::new();

        for inner in pair.into_inner() {
            match inner.as_rule() {
                Rule::triples_block => {
                    let mut triples = Vec::new();
                    self.parse_triples_block(inner, &mut triples)?;
                    acc = Some(join(acc, PatternNode::Bgp(triples)));
                }
                Rule::group_element => {
                    let position = inner.as_span().start();
                    let element = inner
                        .into_inner()
                        .next()
                        .ok_or_else(|| invalid("Empty group element", position))?;
                    match element.as_rule() {
                        Rule::optional_pattern => {
                            let group = child(element, Rule::group_graph_pattern)?;
                            let optional = PatternNode::Optional(Box::new(self.parse_group(group)?));
                            acc = Some(join(acc, optional));
                        }
                        Rule::filter => {
                            let constraint = child(element, Rule::constraint)?;
                            filters.push(self.parse_constraint(constraint)?);
                        }
                        Rule::union_pattern => {
                            let mut node: Option<PatternNode> = None;
                            for group in element.into_inner() {
                                if group.as_rule() != Rule::group_graph_pattern {
                                    continue;
                                }
                                let branch = self.parse_group(group)?;
                                node = Some(match node {
                                    None => branch,
                                    Some(left) => PatternNode::Union(Box::new(left), Box::new(branch)),
                                });
                            }
                            let node = node.ok_or_else(|| invalid("Empty group", position))?;
                            acc = Some(join(acc, node));
                        }
                        _ => {}
                    }
                }
                _ => {}
            }
        }

        // FILTER applies to the whole group it appears in
        let mut node = acc.unwrap_or_else(PatternNode::empty);
        for filter in filters {
            node = PatternNode::Filter(Box::new(node), filter);
        }
        Ok(node)
    }

    fn parse_triples_block(&mut self, pair: Pair<Rule>, out: &mut Vec<TriplePattern>) -> ParseResult<()> {
        for inner in pair.into_inner() {
            if inner.as_rule() == Rule::triples_same_subject {
                self.parse_triples_same_subject(inner, out)?;
            }
        }
        Ok(())
    }

    fn parse_triples_same_subject(&mut self, pair: Pair<Rule>, out: &mut Vec<TriplePattern>) -> ParseResult<()> {
        let position = pair.as_span().start();
        let mut inner = pair.into_inner();
        let first = inner.next().ok_or_else(|| invalid("Missing subject", position))?;
        let subject = match first.as_rule() {
            Rule::subject => self.parse_var_or_term(child(first, Rule::var_or_term)?)?,
            Rule::triples_node => self.parse_triples_node(first, out)?,
            _ => return Err(invalid("Expected subject", position)),
        };
        if let Some(list) = inner.next() {
            self.parse_property_list(list, &subject, out)?;
        }
        Ok(())
    }

    fn parse_property_list(
        &mut self,
        pair: Pair<Rule>,
        subject: &PatternTerm,
        out: &mut Vec<TriplePattern>,
    ) -> ParseResult<()> {
        for predicate_object in pair.into_inner() {
            let position = predicate_object.as_span().start();
            let mut parts = predicate_object.into_inner();
            let verb = parts.next().ok_or_else(|| invalid("Missing predicate", position))?;
            let predicate = self.parse_verb(verb)?;
            let objects = parts.next().ok_or_else(|| invalid("Missing object", position))?;
            for node in objects.into_inner() {
                let mut nested = Vec::new();
                let object = self.parse_graph_node(node, &mut nested)?;
                out.push(TriplePattern::new(subject.clone(), predicate.clone(), object));
                out.extend(nested);
            }
        }
        Ok(())
    }

    fn parse_verb(&self, pair: Pair<Rule>) -> ParseResult<PatternTerm> {
        let position = pair.as_span().start();
        let inner = pair
            .into_inner()
            .next()
            .ok_or_else(|| invalid("Missing predicate", position))?;
        match inner.as_rule() {
            Rule::var => Ok(PatternTerm::Variable(var_name(&inner))),
            Rule::iri => Ok(PatternTerm::Term(Term::NamedNode(self.parse_iri(inner)?))),
            Rule::kw_a => Ok(PatternTerm::Term(Term::NamedNode(rdf::TYPE.into()))),
            _ => Err(invalid("Expected predicate", position)),
        }
    }

    /// Object position; triples the node introduces go to `out`
    fn parse_graph_node(&mut self, pair: Pair<Rule>, out: &mut Vec<TriplePattern>) -> ParseResult<PatternTerm> {
        let position = pair.as_span().start();
        let inner = pair
            .into_inner()
            .next()
            .ok_or_else(|| invalid("Missing object", position))?;
        match inner.as_rule() {
            Rule::var_or_term => self.parse_var_or_term(inner),
            Rule::triples_node => self.parse_triples_node(inner, out),
            _ => Err(invalid("Expected object", position)),
        }
    }

    /// `[ p o ]` or `( a b c )`
    fn parse_triples_node(&mut self, pair: Pair<Rule>, out: &mut Vec<TriplePattern>) -> ParseResult<PatternTerm> {
        let position = pair.as_span().start();
        let inner = pair
            .into_inner()
            .next()
            .ok_or_else(|| invalid("Empty node", position))?;
        match inner.as_rule() {
            Rule::blank_node_property_list => {
                let node = self.anonymous();
                let list = child(inner, Rule::property_list)?;
                self.parse_property_list(list, &node, out)?;
                Ok(node)
            }
            Rule::collection => {
                let mut items = Vec::new();
                for item in inner.into_inner() {
                    let mut nested = Vec::new();
                    let term = self.parse_graph_node(item, &mut nested)?;
                    items.push((term, nested));
                }
                let cells: Vec<PatternTerm> = items.iter().map(|_| self.anonymous()).collect();
                let first = PatternTerm::Term(Term::NamedNode(rdf::FIRST.into()));
                let rest = PatternTerm::Term(Term::NamedNode(rdf::REST.into()));
                let nil = PatternTerm::Term(Term::NamedNode(rdf::NIL.into()));
                for (i, (term, nested)) in items.into_iter().enumerate() {
                    out.push(TriplePattern::new(cells[i].clone(), first.clone(), term));
                    out.extend(nested);
                    let next = cells.get(i + 1).cloned().unwrap_or_else(|| nil.clone());
                    out.push(TriplePattern::new(cells[i].clone(), rest.clone(), next));
                }
                cells
                    .into_iter()
                    .next()
                    .ok_or_else(|| invalid("Empty collection", position))
            }
            _ => Err(invalid("Expected blank node or collection", position)),
        }
    }

    fn parse_var_or_term(&mut self, pair: Pair<Rule>) -> ParseResult<PatternTerm> {
        let position = pair.as_span().start();
        let inner = pair
            .into_inner()
            .next()
            .ok_or_else(|| invalid("Expected term", position))?;
        match inner.as_rule() {
            Rule::var => Ok(PatternTerm::Variable(var_name(&inner))),
            Rule::graph_term => self.parse_graph_term(inner),
            _ => Err(invalid("Expected term", position)),
        }
    }

    fn parse_graph_term(&mut self, pair: Pair<Rule>) -> ParseResult<PatternTerm> {
        let position = pair.as_span().start();
        let inner = pair
            .into_inner()
            .next()
            .ok_or_else(|| invalid("Expected term", position))?;
        let term = match inner.as_rule() {
            Rule::iri => Term::NamedNode(self.parse_iri(inner)?),
            Rule::rdf_literal => Term::Literal(self.parse_literal(inner)?),
            Rule::numeric_literal | Rule::boolean_literal => Term::Literal(infer_literal(inner.as_str())),
            Rule::nil => Term::NamedNode(rdf::NIL.into()),
            Rule::blank_node => {
                let node = inner
                    .into_inner()
                    .next()
                    .ok_or_else(|| invalid("Expected blank node", position))?;
                return Ok(match node.as_rule() {
                    Rule::blank_node_label => {
                        let label = node.as_str().trim_start_matches("_:").to_string();
                        PatternTerm::BlankNode(BlankLabel::Named(label))
                    }
                    _ => self.anonymous(),
                });
            }
            _ => return Err(invalid("Expected term", position)),
        };
        Ok(PatternTerm::Term(term))
    }

    fn parse_literal(&self, pair: Pair<Rule>) -> ParseResult<Literal> {
        let position = pair.as_span().start();
        let mut value = String::new();
        let mut lang = None;
        let mut datatype = None;
        for part in pair.into_inner() {
            match part.as_rule() {
                Rule::string => value = string_value(part),
                Rule::langtag => lang = Some(part.as_str().trim_start_matches('@').to_string()),
                Rule::iri => datatype = Some(self.parse_iri(part)?),
                _ => {}
            }
        }
        match (lang, datatype) {
            (Some(_), Some(_)) => Err(ParseError::ConflictingLiteral { position }),
            (Some(lang), None) => Literal::new_language_tagged_literal(value, lang)
                .map_err(|e| invalid(e.to_string(), position)),
            (None, Some(datatype)) => Ok(Literal::new_typed_literal(value, datatype)),
            (None, None) => Ok(Literal::new_simple_literal(value)),
        }
    }

    fn anonymous(&mut self) -> PatternTerm {
        self.next_anon += 1;
        PatternTerm::BlankNode(BlankLabel::Anonymous(self.next_anon))
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn parse_constraint(&self, pair: Pair<Rule>) -> ParseResult<Expression> {
        let position = pair.as_span().start();
        let inner = pair
            .into_inner()
            .next()
            .ok_or_else(|| invalid("Empty FILTER", position))?;
        match inner.as_rule() {
            Rule::bracketted_expression => self.parse_expression(child(inner, Rule::expression)?),
            Rule::builtin_call => self.parse_builtin_call(inner),
            _ => Err(invalid("Expected FILTER expression", position)),
        }
    }

    fn parse_expression(&self, pair: Pair<Rule>) -> ParseResult<Expression> {
        PRATT_PARSER
            .map_primary(|primary| self.parse_unary(primary))
            .map_infix(|left, op, right| {
                let left = left?;
                let right = right?;

                let op = match (op.as_rule(), op.as_str()) {
                    (Rule::or_op, _) => BinaryOp::Or,
                    (Rule::and_op, _) => BinaryOp::And,
                    (Rule::comparison_op, "=") => BinaryOp::Eq,
                    (Rule::comparison_op, "!=") => BinaryOp::NotEq,
                    (Rule::comparison_op, "<") => BinaryOp::Lt,
                    (Rule::comparison_op, "<=") => BinaryOp::LtEq,
                    (Rule::comparison_op, ">") => BinaryOp::Gt,
                    (Rule::comparison_op, ">=") => BinaryOp::GtEq,
                    (Rule::add_sub_op, "+") => BinaryOp::Add,
                    (Rule::add_sub_op, "-") => BinaryOp::Sub,
                    (Rule::mul_div_op, "*") => BinaryOp::Mul,
                    (Rule::mul_div_op, "/") => BinaryOp::Div,
                    (_, other) => {
                        return Err(invalid(
                            format!("Unexpected operator: {}", other),
                            op.as_span().start(),
                        ))
                    }
                };

                Ok(Expression::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                })
            })
            .parse(pair.into_inner())
    }

    fn parse_unary(&self, pair: Pair<Rule>) -> ParseResult<Expression> {
        let position = pair.as_span().start();
        let mut ops = Vec::new();
        let mut primary = None;
        for inner in pair.into_inner() {
            match inner.as_rule() {
                Rule::unary_op => ops.push(match inner.as_str() {
                    "!" => UnaryOp::Not,
                    "-" => UnaryOp::Minus,
                    _ => UnaryOp::Plus,
                }),
                Rule::primary_expression => primary = Some(self.parse_primary(inner)?),
                _ => {}
            }
        }
        let mut expr = primary.ok_or_else(|| invalid("Missing operand", position))?;
        for op in ops.into_iter().rev() {
            expr = Expression::Unary {
                op,
                expr: Box::new(expr),
            };
        }
        Ok(expr)
    }

    fn parse_primary(&self, pair: Pair<Rule>) -> ParseResult<Expression> {
        let position = pair.as_span().start();
        let inner = pair
            .into_inner()
            .next()
            .ok_or_else(|| invalid("Missing operand", position))?;
        match inner.as_rule() {
            Rule::bracketted_expression => self.parse_expression(child(inner, Rule::expression)?),
            Rule::builtin_call => self.parse_builtin_call(inner),
            Rule::var => Ok(Expression::Variable(var_name(&inner))),
            Rule::rdf_literal => Ok(Expression::Term(Term::Literal(self.parse_literal(inner)?))),
            Rule::numeric_literal | Rule::boolean_literal => {
                Ok(Expression::Term(Term::Literal(infer_literal(inner.as_str()))))
            }
            Rule::iri => Ok(Expression::Term(Term::NamedNode(self.parse_iri(inner)?))),
            _ => Err(invalid("Unexpected operand", position)),
        }
    }

    fn parse_builtin_call(&self, pair: Pair<Rule>) -> ParseResult<Expression> {
        let position = pair.as_span().start();
        let mut function = None;
        let mut args = Vec::new();
        for inner in pair.into_inner() {
            match inner.as_rule() {
                Rule::builtin_name => {
                    function = Some(
                        Function::from_name(inner.as_str())
                            .ok_or_else(|| invalid(format!("Unknown function {}", inner.as_str()), position))?,
                    )
                }
                Rule::expression => args.push(self.parse_expression(inner)?),
                _ => {}
            }
        }
        let function = function.ok_or_else(|| invalid("Missing function name", position))?;
        let (min, max) = function.arity();
        if args.len() < min || args.len() > max {
            return Err(invalid(
                format!("{:?} takes {} to {} arguments, got {}", function, min, max, args.len()),
                position,
            ));
        }
        Ok(Expression::Call { function, args })
    }
}

/// Append `node` to a group under construction
fn join(acc: Option<PatternNode>, node: PatternNode) -> PatternNode {
    match (acc, node) {
        (None, node @ PatternNode::Optional(_)) => {
            PatternNode::Join(Box::new(PatternNode::empty()), Box::new(node))
        }
        (None, node) => node,
        (Some(PatternNode::Bgp(mut left)), PatternNode::Bgp(right)) => {
            left.extend(right);
            PatternNode::Bgp(left)
        }
        (Some(left), node) => PatternNode::Join(Box::new(left), Box::new(node)),
    }
}

fn child(pair: Pair<Rule>, rule: Rule) -> ParseResult<Pair<Rule>> {
    let position = pair.as_span().start();
    pair.into_inner()
        .find(|p| p.as_rule() == rule)
        .ok_or_else(|| invalid(format!("Expected {:?}", rule), position))
}

fn var_name(pair: &Pair<Rule>) -> String {
    pair.as_str()[1..].to_string()
}

fn iriref_body<'a>(pair: &Pair<'a, Rule>) -> &'a str {
    let text = pair.as_str();
    text.strip_prefix('<')
        .and_then(|t| t.strip_suffix('>'))
        .unwrap_or(text)
}

fn string_value(pair: Pair<Rule>) -> String {
    pair.into_inner()
        .next()
        .and_then(|quoted| quoted.into_inner().next())
        .map(|body| unescape(body.as_str()))
        .unwrap_or_default()
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('b') => out.push('\u{8}'),
            Some('f') => out.push('\u{c}'),
            Some(marker @ ('u' | 'U')) => {
                let len = if marker == 'u' { 4 } else { 8 };
                let hex: String = chars.by_ref().take(len).collect();
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(decoded) => out.push(decoded),
                    None => {
                        out.push('\\');
                        out.push(marker);
                        out.push_str(&hex);
                    }
                }
            }
            Some(other @ ('"' | '\'' | '\\')) => out.push(other),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxrdf::vocab::xsd;

    fn parse(text: &str) -> Query {
        SparqlParser::new().parse(text).unwrap()
    }

    fn iri(value: &str) -> PatternTerm {
        PatternTerm::Term(Term::NamedNode(NamedNode::new_unchecked(value)))
    }

    fn var(name: &str) -> PatternTerm {
        PatternTerm::Variable(name.to_string())
    }

    fn bgp(query: &Query) -> Vec<TriplePattern> {
        match query.pattern.as_ref().unwrap() {
            PatternNode::Bgp(triples) => triples.clone(),
            other => panic!("expected BGP, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_select_star_with_from() {
        let query = parse("SELECT * FROM <http://example.com/> {?s ?p ?o.}");
        assert_eq!(
            query.form,
            QueryForm::Select {
                projection: Projection::All
            }
        );
        assert_eq!(query.dataset[0].as_str(), "http://example.com/");
        assert_eq!(bgp(&query), vec![TriplePattern::new(var("s"), var("p"), var("o"))]);
        assert_eq!(query.result_variables(), vec!["s", "p", "o"]);
    }

    #[test]
    fn test_parse_projection_and_modifiers() {
        let query = parse(
            "select distinct ?name ?age where { ?x <http://name> ?name ; <http://age> ?age } \
             ORDER BY DESC(?age) ?name LIMIT 10 OFFSET 5",
        );
        assert_eq!(query.result_variables(), vec!["name", "age"]);
        assert!(query.modifiers.distinct);
        assert_eq!(query.modifiers.limit, Some(10));
        assert_eq!(query.modifiers.offset, Some(5));
        assert_eq!(query.modifiers.order_by.len(), 2);
        assert!(query.modifiers.order_by[0].descending);
        assert_eq!(
            query.modifiers.order_by[1].expression,
            Expression::Variable("name".to_string())
        );
        assert_eq!(bgp(&query).len(), 2);
    }

    #[test]
    fn test_prefixes_and_builtin_namespaces() {
        let query = parse(
            "PREFIX ex: <http://example.com/ns#> SELECT ?s WHERE { ?s a ex:Person ; rdf:value xsd:int }",
        );
        let triples = bgp(&query);
        assert_eq!(triples[0].predicate, iri(rdf::TYPE.as_str()));
        assert_eq!(triples[0].object, iri("http://example.com/ns#Person"));
        assert_eq!(triples[1].object, iri("http://www.w3.org/2001/XMLSchema#int"));
        assert_eq!(query.prologue.prefixes["ex"], "http://example.com/ns#");
    }

    #[test]
    fn test_unknown_prefix_is_an_error() {
        let err = SparqlParser::new()
            .parse("SELECT ?s WHERE { ?s nope:p ?o }")
            .unwrap_err();
        assert!(matches!(err, ParseError::UnknownPrefix { ref prefix, .. } if prefix == "nope"));
        assert_eq!(err.position(), 21);
    }

    #[test]
    fn test_syntax_error_reports_position() {
        let err = SparqlParser::new().parse("SELECT ?s WHERE { ?s ").unwrap_err();
        assert!(matches!(err, ParseError::Syntax { .. }));
        assert!(err.position() >= 18);
    }

    #[test]
    fn test_conflicting_literal() {
        let err = SparqlParser::new()
            .parse("INSERT INTO <http://g> { <http://s> <http://p> \"x\"@en^^xsd:string }")
            .unwrap_err();
        assert!(matches!(err, ParseError::ConflictingLiteral { .. }));
    }

    #[test]
    fn test_literal_forms() {
        let query = parse(
            r#"INSERT INTO <http://g> {
                <http://s> <http://p> 1, 2.0, "3", "4"^^xsd:integer, "5"@en, "a\"b\u0041" .
            }"#,
        );
        assert_eq!(query.form, QueryForm::Insert);
        assert_eq!(query.target_graph.as_ref().unwrap().as_str(), "http://g");
        let objects: Vec<Literal> = query
            .template
            .iter()
            .map(|t| match &t.object {
                PatternTerm::Term(Term::Literal(l)) => l.clone(),
                other => panic!("expected literal, got {:?}", other),
            })
            .collect();
        assert_eq!(objects[0].datatype().unwrap().as_str(), xsd::INTEGER.as_str());
        assert_eq!(objects[1].datatype().unwrap().as_str(), xsd::DECIMAL.as_str());
        assert_eq!(objects[2].datatype(), None);
        assert_eq!(objects[3].datatype().unwrap().as_str(), xsd::INTEGER.as_str());
        assert_eq!(objects[4].language(), Some("en"));
        assert_eq!(objects[5].value(), "a\"bA");
    }

    #[test]
    fn test_relative_iris_use_default_base() {
        let parser = SparqlParser::new().with_default_base(Some("http://example.com/base".to_string()));
        let query = parser
            .parse("INSERT INTO <http://g> { <#make> <#me> <#happy> . }")
            .unwrap();
        assert_eq!(query.template[0].subject, iri("http://example.com/base#make"));

        let query = parser
            .parse("BASE <http://other.org/dir/> INSERT INTO <http://g> { <a> <b> <../c> }")
            .unwrap();
        assert_eq!(query.template[0].subject, iri("http://other.org/dir/a"));
        assert_eq!(query.template[0].object, iri("http://other.org/c"));
        assert_eq!(query.prologue.base.unwrap().as_str(), "http://other.org/dir/");

        // no base at all: kept verbatim
        let query = parse("INSERT INTO <http://g> { <#make> <#me> <#happy> }");
        assert_eq!(query.template[0].subject, iri("#make"));
    }

    #[test]
    fn test_blank_node_property_list_order() {
        let query = parse("INSERT INTO <http://g> { <http://s> <http://p1> [ <http://foo> <http://bar> ] . }");
        let t = &query.template;
        assert_eq!(t.len(), 2);
        assert_eq!(t[0].subject, iri("http://s"));
        let node = t[0].object.clone();
        assert!(matches!(node, PatternTerm::BlankNode(BlankLabel::Anonymous(_))));
        assert_eq!(t[1].subject, node);
        assert_eq!(t[1].object, iri("http://bar"));
    }

    #[test]
    fn test_collection_expands_to_list() {
        let query = parse("INSERT INTO <http://g> { <http://s> <http://p> (1 2) }");
        let t = &query.template;
        assert_eq!(t.len(), 5);
        let head = t[0].object.clone();
        assert_eq!(t[1].subject, head);
        assert_eq!(t[1].predicate, iri(rdf::FIRST.as_str()));
        assert_eq!(t[2].predicate, iri(rdf::REST.as_str()));
        let second = t[2].object.clone();
        assert_eq!(t[3].subject, second);
        assert_eq!(t[4].object, iri(rdf::NIL.as_str()));
    }

    #[test]
    fn test_named_blank_nodes_and_variables_in_data() {
        let query = parse(
            "INSERT INTO <http://g> { _:b0 rdf:first 1 ; rdf:rest _:b1 . _:b1 rdf:first ?x ; rdf:rest rdf:nil . }",
        );
        assert_eq!(query.template.len(), 4);
        assert_eq!(
            query.template[1].object,
            PatternTerm::BlankNode(BlankLabel::Named("b1".to_string()))
        );
        assert_eq!(query.template[2].object, var("x"));
        assert!(query.pattern.is_none());
    }

    #[test]
    fn test_optional_union_filter_structure() {
        let query = parse(
            "SELECT * WHERE { ?s <http://p> ?o OPTIONAL { ?o <http://q> ?x } \
             { ?s <http://a> ?y } UNION { ?s <http://b> ?y } FILTER(?o > 3 && !bound(?x)) }",
        );
        let PatternNode::Filter(inner, expr) = query.pattern.unwrap() else {
            panic!("expected filter at top");
        };
        let PatternNode::Join(left, union) = *inner else {
            panic!("expected join");
        };
        assert!(matches!(*union, PatternNode::Union(_, _)));
        let PatternNode::Join(bgp, optional) = *left else {
            panic!("expected join");
        };
        assert!(matches!(*bgp, PatternNode::Bgp(_)));
        assert!(matches!(*optional, PatternNode::Optional(_)));

        let Expression::Binary { op, right, .. } = expr else {
            panic!("expected binary");
        };
        assert_eq!(op, BinaryOp::And);
        assert!(matches!(*right, Expression::Unary { op: UnaryOp::Not, .. }));
    }

    #[test]
    fn test_expression_precedence() {
        let query = parse("SELECT ?x WHERE { ?x <http://v> ?v FILTER(?v + 2 * 3 = 8 || regex(?x, \"^a\", \"i\")) }");
        let PatternNode::Filter(_, expr) = query.pattern.unwrap() else {
            panic!("expected filter");
        };
        let Expression::Binary { op: BinaryOp::Or, left, right } = expr else {
            panic!("expected or");
        };
        let Expression::Binary { op: BinaryOp::Eq, left: sum, .. } = *left else {
            panic!("expected eq");
        };
        assert!(matches!(*sum, Expression::Binary { op: BinaryOp::Add, .. }));
        assert!(matches!(*right, Expression::Call { function: Function::Regex, ref args } if args.len() == 3));
    }

    #[test]
    fn test_insert_into_construct_where() {
        let query = parse(
            r#"INSERT INTO <http://example.com/> CONSTRUCT {
                <http://baz> <http://location> "Leipzig" .
                <http://baz2> <http://location> "Grimma" .
            } WHERE {
                ?s <http://location> "Leipzig" .
            }"#,
        );
        assert_eq!(query.form, QueryForm::Insert);
        assert_eq!(query.template.len(), 2);
        assert_eq!(bgp(&query).len(), 1);
    }

    #[test]
    fn test_delete_forms() {
        let query = parse("DELETE FROM <http://g> { <http://s> <http://p> \"x\" }");
        assert_eq!(query.form, QueryForm::Delete);
        assert_eq!(query.target_graph.as_ref().unwrap().as_str(), "http://g");
        assert_eq!(query.template.len(), 1);
        assert!(query.pattern.is_none());

        let query = parse("DELETE WHERE { ?s <http://p> ?o }");
        assert_eq!(query.template, bgp(&query));

        let query = parse("DELETE { ?s <http://p> ?o } WHERE { ?s <http://p> ?o FILTER(?o = 1) }");
        assert_eq!(query.template.len(), 1);
        assert!(matches!(query.pattern, Some(PatternNode::Filter(_, _))));

        let query = parse("DELETE FROM <http://g>");
        assert!(query.template.is_empty());
        assert!(query.pattern.is_none());
    }

    #[test]
    fn test_ask_and_insert_data() {
        let query = parse("ASK { ?s ?p ?o }");
        assert_eq!(query.form, QueryForm::Ask);

        let query = parse("INSERT DATA { <http://s> <http://p> <http://o> }");
        assert_eq!(query.form, QueryForm::Insert);
        assert!(query.target_graph.is_none());
        assert_eq!(query.template.len(), 1);
    }

    #[test]
    fn test_unescape() {
        assert_eq!(unescape(r"a\tb\\c\'"), "a\tb\\c'");
        assert_eq!(unescape(r"\u00e9\U0001F600"), "\u{e9}\u{1F600}");
        assert_eq!(unescape(r"\q"), "\\q");
    }
}
