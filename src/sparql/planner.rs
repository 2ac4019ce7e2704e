//! Pattern planner - converts a graph pattern to relational scans
//!
//! Every triple pattern becomes one scan (`T0`, `T1`, ...) over the triple
//! table. The first occurrence of a variable binds it to a scan column; later
//! occurrences become equi-join conditions on the encoded columns. OPTIONAL
//! groups turn into `LEFT JOIN`s, FILTERs into SQL predicates, and UNIONs are
//! expanded into independent branches that the SQL renderer glues together
//! with `UNION ALL`.

use super::ast::*;
use crate::adapter::Adapter;
use crate::rdf::codec::TermCodec;
use crate::rdf::{NamedNode, Term, TermKind};
use indexmap::IndexMap;
use oxrdf::vocab::{rdf, xsd};
use thiserror::Error;
use tracing::debug;

/// Upper bound on branches produced by UNION expansion
const MAX_BRANCHES: usize = 64;

/// Planning errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// Pattern shape the relational translation does not cover
    #[error("Unsupported query construct: {0}")]
    Unsupported(String),

    /// UNION expansion would exceed [`MAX_BRANCHES`]
    #[error("Query expands to more than {0} UNION branches")]
    TooManyBranches(usize),
}

pub type PlanResult<T> = Result<T, PlanError>;

/// Triple table column a variable is read from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    Subject,
    Predicate,
    Object,
}

/// Where a variable is bound: scan alias plus column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Binding {
    pub alias: usize,
    pub position: Position,
}

impl Binding {
    fn scan(&self) -> String {
        format!("T{}", self.alias)
    }

    /// Dictionary id column
    pub fn id_column(&self) -> String {
        let column = match self.position {
            Position::Subject => "s",
            Position::Predicate => "p",
            Position::Object => "o",
        };
        format!("{}.{}", self.scan(), column)
    }

    /// Kind code; predicates are always IRIs
    pub fn kind_column(&self) -> String {
        match self.position {
            Position::Subject => format!("{}.s_type", self.scan()),
            Position::Predicate => TermKind::Uri.code().to_string(),
            Position::Object => format!("{}.o_type", self.scan()),
        }
    }

    /// Datatype id column; only objects carry one
    pub fn datatype_column(&self) -> Option<String> {
        (self.position == Position::Object).then(|| format!("{}.o_dt", self.scan()))
    }

    /// Language tag column, `''` outside the object position
    pub fn lang_column(&self) -> String {
        match self.position {
            Position::Object => format!("{}.o_lang", self.scan()),
            _ => "''".to_string(),
        }
    }
}

/// One UNION-free alternative of the pattern
#[derive(Debug, Clone, PartialEq)]
pub struct BranchPlan {
    /// FROM clause body (scans and their joins)
    pub from: String,
    /// WHERE conditions, ANDed
    pub conditions: Vec<String>,
    /// Variables (and WHERE blank nodes) in binding order
    pub bindings: IndexMap<String, Binding>,
}

/// Relational access plan for a whole pattern
#[derive(Debug, Clone, PartialEq)]
pub struct RelationalPlan {
    pub branches: Vec<BranchPlan>,
}

impl RelationalPlan {
    /// Whether any branch binds `var`
    pub fn binds(&self, var: &str) -> bool {
        self.branches.iter().any(|b| b.bindings.contains_key(var))
    }
}

/// Union-free pattern flattened to the pieces a SQL block needs
#[derive(Default)]
struct Group<'q> {
    triples: Vec<&'q TriplePattern>,
    optionals: Vec<Group<'q>>,
    filters: Vec<&'q Expression>,
    /// Names first bound inside an OPTIONAL of this group
    optional_names: Vec<String>,
}

impl<'q> Group<'q> {
    /// Flatten `node`. Required triples are planned before the OPTIONALs, so
    /// a triple following an OPTIONAL must not reuse a name the OPTIONAL
    /// binds first.
    fn collect(&mut self, node: &'q PatternNode) -> PlanResult<()> {
        match node {
            PatternNode::Bgp(triples) => {
                for tp in triples {
                    let reused = tp.terms().into_iter().find(|t| {
                        t.binding_name()
                            .is_some_and(|name| self.optional_names.contains(&name))
                    });
                    if let Some(term) = reused {
                        return Err(PlanError::Unsupported(format!(
                            "{} joins on {} after the OPTIONAL that binds it",
                            tp, term
                        )));
                    }
                    self.triples.push(tp);
                }
            }
            PatternNode::Join(left, right) => {
                self.collect(left)?;
                self.collect(right)?;
            }
            PatternNode::Optional(inner) => {
                let mut group = Group::default();
                group.collect(inner)?;
                let required = self.names();
                for name in group.names() {
                    if !required.contains(&name) && !self.optional_names.contains(&name) {
                        self.optional_names.push(name);
                    }
                }
                self.optionals.push(group);
            }
            PatternNode::Filter(inner, expr) => {
                self.collect(inner)?;
                self.filters.push(expr);
            }
            // expanded away before grouping
            PatternNode::Union(left, right) => {
                self.collect(left)?;
                self.collect(right)?;
            }
        }
        Ok(())
    }

    /// Names bound by the required triples and, recursively, the OPTIONALs
    fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        let own = self.triples.iter().flat_map(|tp| tp.terms()).filter_map(|t| t.binding_name());
        let nested = self.optionals.iter().flat_map(|g| g.names());
        for name in own.chain(nested) {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }
}

struct Condition {
    sql: String,
    /// Lowest scan alias the condition reads
    min_alias: usize,
}

struct Scan {
    alias: usize,
    conditions: Vec<Condition>,
}

#[derive(Default)]
struct BranchState {
    next_alias: usize,
    bindings: IndexMap<String, Binding>,
}

/// Builds [`RelationalPlan`]s for one query
pub struct PatternPlanner<'a> {
    adapter: &'a dyn Adapter,
    codec: &'a TermCodec,
    dataset: &'a [NamedNode],
}

impl<'a> PatternPlanner<'a> {
    /// `dataset` restricts every scan to the listed graphs; empty means all
    pub fn new(adapter: &'a dyn Adapter, codec: &'a TermCodec, dataset: &'a [NamedNode]) -> Self {
        Self {
            adapter,
            codec,
            dataset,
        }
    }

    pub fn plan(&self, pattern: &PatternNode) -> PlanResult<RelationalPlan> {
        let branches = expand_unions(pattern)?
            .iter()
            .map(|branch| self.plan_branch(branch))
            .collect::<PlanResult<Vec<_>>>()?;
        debug!(branches = branches.len(), "planned graph pattern");
        Ok(RelationalPlan { branches })
    }

    fn plan_branch(&self, node: &PatternNode) -> PlanResult<BranchPlan> {
        let mut group = Group::default();
        group.collect(node)?;

        let mut state = BranchState::default();
        let mut conditions = Vec::new();
        let scans = self.plan_scans(&group.triples, &mut state)?;

        let mut from = String::new();
        for (i, scan) in scans.iter().enumerate() {
            let on: Vec<String> = scan.conditions.iter().map(|c| c.sql.clone()).collect();
            if i == 0 {
                from = format!("{} T{}", self.codec.tables().triple, scan.alias);
                conditions.extend(on);
            } else {
                from.push_str(&self.join_clause("JOIN", scan.alias, &on));
            }
        }
        if scans.is_empty() {
            // a single empty solution for OPTIONAL-only or empty groups
            from = "(SELECT 1 AS one) B".to_string();
        }

        for optional in &group.optionals {
            from.push_str(&self.plan_optional(optional, &mut state)?);
        }
        for filter in &group.filters {
            conditions.push(self.filter_condition(filter, &state)?);
        }

        Ok(BranchPlan {
            from,
            conditions,
            bindings: state.bindings,
        })
    }

    fn plan_optional(&self, group: &Group<'_>, state: &mut BranchState) -> PlanResult<String> {
        let first = state.next_alias;
        let scans = self.plan_scans(&group.triples, state)?;
        if scans.is_empty() {
            return Err(PlanError::Unsupported("OPTIONAL without triple patterns".to_string()));
        }

        let mut outer_on = Vec::new();
        let mut inner = String::new();
        for (i, scan) in scans.iter().enumerate() {
            let mut on = Vec::new();
            for condition in &scan.conditions {
                if i == 0 || condition.min_alias < first {
                    outer_on.push(condition.sql.clone());
                } else {
                    on.push(condition.sql.clone());
                }
            }
            if i == 0 {
                inner = format!("{} T{}", self.codec.tables().triple, scan.alias);
            } else {
                inner.push_str(&self.join_clause("JOIN", scan.alias, &on));
            }
        }
        for nested in &group.optionals {
            inner.push_str(&self.plan_optional(nested, state)?);
        }
        for filter in &group.filters {
            outer_on.push(self.filter_condition(filter, state)?);
        }

        let table = if scans.len() == 1 && group.optionals.is_empty() {
            inner
        } else {
            format!("({})", inner)
        };
        if outer_on.is_empty() {
            outer_on.push("1 = 1".to_string());
        }
        Ok(format!(" LEFT JOIN {} ON ({})", table, outer_on.join(" AND ")))
    }

    fn join_clause(&self, join: &str, alias: usize, on: &[String]) -> String {
        let table = &self.codec.tables().triple;
        if on.is_empty() {
            format!(" CROSS JOIN {} T{}", table, alias)
        } else {
            format!(" {} {} T{} ON ({})", join, table, alias, on.join(" AND "))
        }
    }

    fn plan_scans(&self, triples: &[&TriplePattern], state: &mut BranchState) -> PlanResult<Vec<Scan>> {
        let mut scans = Vec::with_capacity(triples.len());
        for tp in triples {
            let alias = state.next_alias;
            state.next_alias += 1;
            let mut conditions = Vec::new();

            let positions = [
                (Position::Subject, &tp.subject),
                (Position::Predicate, &tp.predicate),
                (Position::Object, &tp.object),
            ];
            for (position, term) in positions {
                let here = Binding { alias, position };
                let name = match term {
                    PatternTerm::Term(term) => {
                        conditions.extend(self.match_term(here, term).into_iter().map(|sql| Condition {
                            sql,
                            min_alias: alias,
                        }));
                        continue;
                    }
                    PatternTerm::Variable(v) => v.clone(),
                    PatternTerm::BlankNode(label) => label.binding_name(),
                };
                match state.bindings.get(&name) {
                    Some(bound) => conditions.extend(equate(*bound, here).into_iter().map(|sql| Condition {
                        sql,
                        min_alias: bound.alias,
                    })),
                    None => {
                        state.bindings.insert(name, here);
                    }
                }
            }

            if let Some(sql) = self.dataset_condition(alias) {
                conditions.push(Condition { sql, min_alias: alias });
            }
            scans.push(Scan { alias, conditions });
        }
        Ok(scans)
    }

    /// Conditions pinning a scan column to a concrete term
    fn match_term(&self, here: Binding, term: &Term) -> Vec<String> {
        if here.position == Position::Predicate && !matches!(term, Term::NamedNode(_)) {
            return vec!["1 = 0".to_string()];
        }
        let mut conditions = vec![format!(
            "{} = {}",
            here.id_column(),
            self.codec.id_subquery(self.adapter, &term.lexical())
        )];
        if here.position != Position::Predicate {
            conditions.push(format!("{} = {}", here.kind_column(), term.kind().code()));
        }
        if let (Term::Literal(lit), Some(dt_column)) = (term, here.datatype_column()) {
            let dt = match lit.datatype() {
                Some(dt) => self.codec.id_subquery(self.adapter, dt.as_str()),
                None => "0".to_string(),
            };
            conditions.push(format!("{} = {}", dt_column, dt));
            conditions.push(format!(
                "{} = {}",
                here.lang_column(),
                self.adapter.quote(lit.language().unwrap_or_default())
            ));
        }
        conditions
    }

    fn dataset_condition(&self, alias: usize) -> Option<String> {
        if self.dataset.is_empty() {
            return None;
        }
        let graphs: Vec<String> = self
            .dataset
            .iter()
            .map(|g| self.adapter.quote(g.as_str()))
            .collect();
        Some(format!(
            "T{}.g IN (SELECT id FROM {} WHERE val IN ({}))",
            alias,
            self.codec.tables().id2val,
            graphs.join(", ")
        ))
    }

    fn filter_condition(&self, expr: &Expression, state: &BranchState) -> PlanResult<String> {
        let resolver = BindingColumns {
            bindings: &state.bindings,
            codec: self.codec,
        };
        ExpressionTranslator::new(&resolver, self.adapter, self.codec).condition(expr)
    }
}

/// Join conditions between two occurrences of one variable
fn equate(bound: Binding, here: Binding) -> Vec<String> {
    let mut conditions = vec![format!("{} = {}", here.id_column(), bound.id_column())];
    let objects = [bound.position, here.position]
        .iter()
        .filter(|p| **p == Position::Object)
        .count();
    if objects > 0 {
        conditions.push(format!("{} = {}", here.kind_column(), bound.kind_column()));
    }
    if let (2, Some(a), Some(b)) = (objects, here.datatype_column(), bound.datatype_column()) {
        conditions.push(format!("{} = {}", a, b));
        conditions.push(format!("{} = {}", here.lang_column(), bound.lang_column()));
    }
    conditions
}

/// Rewrite the pattern into UNION-free branches
fn expand_unions(node: &PatternNode) -> PlanResult<Vec<PatternNode>> {
    let branches = match node {
        PatternNode::Bgp(_) => vec![node.clone()],
        PatternNode::Union(left, right) => {
            let mut branches = expand_unions(left)?;
            branches.extend(expand_unions(right)?);
            branches
        }
        PatternNode::Join(left, right) => {
            let left = expand_unions(left)?;
            let right = expand_unions(right)?;
            let mut branches = Vec::with_capacity(left.len() * right.len());
            for l in &left {
                for r in &right {
                    branches.push(PatternNode::Join(Box::new(l.clone()), Box::new(r.clone())));
                }
            }
            branches
        }
        PatternNode::Filter(inner, expr) => expand_unions(inner)?
            .into_iter()
            .map(|b| PatternNode::Filter(Box::new(b), expr.clone()))
            .collect(),
        PatternNode::Optional(inner) => {
            let mut inner = expand_unions(inner)?;
            if inner.len() > 1 {
                return Err(PlanError::Unsupported("UNION inside OPTIONAL".to_string()));
            }
            match inner.pop() {
                Some(single) => vec![PatternNode::Optional(Box::new(single))],
                None => Vec::new(),
            }
        }
    };
    if branches.len() > MAX_BRANCHES {
        return Err(PlanError::TooManyBranches(MAX_BRANCHES));
    }
    Ok(branches)
}

// ----------------------------------------------------------------------
// Expressions
// ----------------------------------------------------------------------

/// SQL fragments that read one variable's term
#[derive(Debug, Clone, PartialEq)]
pub struct VarColumns {
    /// Dictionary id, when the source still has it
    pub id: Option<String>,
    /// Lexical value
    pub value: String,
    /// Kind code
    pub kind: String,
    /// Datatype IRI text, NULL when none
    pub datatype: String,
    /// Language tag, `''` when none
    pub lang: String,
}

/// Maps variables to the SQL that reads them
pub trait ColumnResolver {
    fn columns(&self, var: &str) -> Option<VarColumns>;
}

/// Resolver over scan bindings, used for FILTER
struct BindingColumns<'a> {
    bindings: &'a IndexMap<String, Binding>,
    codec: &'a TermCodec,
}

impl ColumnResolver for BindingColumns<'_> {
    fn columns(&self, var: &str) -> Option<VarColumns> {
        let binding = self.bindings.get(var)?;
        let id = binding.id_column();
        Some(VarColumns {
            value: self.codec.value_subquery(&id),
            id: Some(id),
            kind: binding.kind_column(),
            datatype: binding
                .datatype_column()
                .map(|dt| self.codec.value_subquery(&dt))
                .unwrap_or_else(|| "NULL".to_string()),
            lang: binding.lang_column(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Class {
    Boolean,
    Numeric,
    Text,
}

struct Operand {
    sql: String,
    class: Class,
}

impl Operand {
    fn new(sql: impl Into<String>, class: Class) -> Self {
        Self { sql: sql.into(), class }
    }

    /// Effective boolean value
    fn truth(&self) -> String {
        match self.class {
            Class::Boolean => self.sql.clone(),
            Class::Numeric => format!("({} <> 0)", self.sql),
            Class::Text => format!("(COALESCE({}, '') NOT IN ('', '0', 'false'))", self.sql),
        }
    }

    fn numeric(&self) -> String {
        match self.class {
            Class::Numeric => self.sql.clone(),
            _ => format!("({} + 0)", self.sql),
        }
    }
}

/// Translates FILTER / ORDER BY expressions into SQL
pub struct ExpressionTranslator<'a> {
    resolver: &'a dyn ColumnResolver,
    adapter: &'a dyn Adapter,
    codec: &'a TermCodec,
}

impl<'a> ExpressionTranslator<'a> {
    pub fn new(resolver: &'a dyn ColumnResolver, adapter: &'a dyn Adapter, codec: &'a TermCodec) -> Self {
        Self {
            resolver,
            adapter,
            codec,
        }
    }

    /// SQL predicate for the expression's effective boolean value
    pub fn condition(&self, expr: &Expression) -> PlanResult<String> {
        Ok(self.translate(expr)?.truth())
    }

    /// SQL value expression, for ordering
    pub fn value(&self, expr: &Expression) -> PlanResult<String> {
        Ok(self.translate(expr)?.sql)
    }

    fn translate(&self, expr: &Expression) -> PlanResult<Operand> {
        match expr {
            Expression::Variable(v) => Ok(match self.resolver.columns(v) {
                Some(columns) => Operand::new(columns.value, Class::Text),
                None => Operand::new("NULL", Class::Text),
            }),
            Expression::Term(term) => Ok(self.constant(term)),
            Expression::Unary { op, expr } => {
                let inner = self.translate(expr)?;
                Ok(match op {
                    UnaryOp::Not => Operand::new(format!("(NOT {})", inner.truth()), Class::Boolean),
                    UnaryOp::Minus => Operand::new(format!("(-{})", inner.numeric()), Class::Numeric),
                    UnaryOp::Plus => Operand::new(inner.numeric(), Class::Numeric),
                })
            }
            Expression::Binary { op, left, right } => self.binary(*op, left, right),
            Expression::Call { function, args } => self.call(*function, args),
        }
    }

    fn constant(&self, term: &Term) -> Operand {
        match term {
            Term::Literal(lit) => match lit.datatype() {
                Some(dt) if is_numeric_datatype(&dt) && lit.value().parse::<f64>().is_ok() => {
                    Operand::new(lit.value().trim_start_matches('+'), Class::Numeric)
                }
                Some(dt) if dt.as_str() == xsd::BOOLEAN.as_str() => {
                    let truth = matches!(lit.value(), "true" | "1");
                    Operand::new(if truth { "1" } else { "0" }, Class::Boolean)
                }
                _ => Operand::new(self.adapter.quote(lit.value()), Class::Text),
            },
            other => Operand::new(self.adapter.quote(&other.lexical()), Class::Text),
        }
    }

    fn binary(&self, op: BinaryOp, left: &Expression, right: &Expression) -> PlanResult<Operand> {
        if matches!(op, BinaryOp::Eq | BinaryOp::NotEq) {
            if let Some(sql) = self.identity(left, right) {
                let sql = if op == BinaryOp::NotEq { format!("(NOT {})", sql) } else { sql };
                return Ok(Operand::new(sql, Class::Boolean));
            }
        }

        let l = self.translate(left)?;
        let r = self.translate(right)?;
        let sql = match op {
            BinaryOp::Or => return Ok(Operand::new(format!("({} OR {})", l.truth(), r.truth()), Class::Boolean)),
            BinaryOp::And => {
                return Ok(Operand::new(format!("({} AND {})", l.truth(), r.truth()), Class::Boolean))
            }
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => {
                let symbol = match op {
                    BinaryOp::Add => "+",
                    BinaryOp::Sub => "-",
                    BinaryOp::Mul => "*",
                    _ => "/",
                };
                return Ok(Operand::new(
                    format!("({} {} {})", l.numeric(), symbol, r.numeric()),
                    Class::Numeric,
                ));
            }
            BinaryOp::Eq => compare(&l, "=", &r),
            BinaryOp::NotEq => compare(&l, "<>", &r),
            BinaryOp::Lt => compare(&l, "<", &r),
            BinaryOp::LtEq => compare(&l, "<=", &r),
            BinaryOp::Gt => compare(&l, ">", &r),
            BinaryOp::GtEq => compare(&l, ">=", &r),
        };
        Ok(Operand::new(sql, Class::Boolean))
    }

    /// `?x = <iri>` compares terms, not strings
    fn identity(&self, left: &Expression, right: &Expression) -> Option<String> {
        let (var, term) = match (left, right) {
            (Expression::Variable(v), Expression::Term(t)) | (Expression::Term(t), Expression::Variable(v)) => (v, t),
            _ => return None,
        };
        // numbers and booleans compare by value, so "01"^^xsd:int = 1
        if matches!(term, Term::Literal(_)) && self.constant(term).class != Class::Text {
            return None;
        }
        Some(match self.resolver.columns(var) {
            Some(columns) => self.term_match(&columns, term),
            None => "(1 = 0)".to_string(),
        })
    }

    fn term_match(&self, columns: &VarColumns, term: &Term) -> String {
        let mut parts = vec![match &columns.id {
            Some(id) => format!("{} = {}", id, self.codec.id_subquery(self.adapter, &term.lexical())),
            None => format!("{} = {}", columns.value, self.adapter.quote(&term.lexical())),
        }];
        parts.push(format!("{} = {}", columns.kind, term.kind().code()));
        if let Term::Literal(lit) = term {
            parts.push(match lit.datatype() {
                Some(dt) => format!("{} = {}", columns.datatype, self.adapter.quote(dt.as_str())),
                None => format!("{} IS NULL", columns.datatype),
            });
            parts.push(format!(
                "COALESCE({}, '') = {}",
                columns.lang,
                self.adapter.quote(lit.language().unwrap_or_default())
            ));
        }
        format!("({})", parts.join(" AND "))
    }

    fn var_columns(&self, expr: &Expression, function: Function) -> PlanResult<Option<VarColumns>> {
        match expr {
            Expression::Variable(v) => Ok(self.resolver.columns(v)),
            _ => Err(PlanError::Unsupported(format!("{:?}() expects a variable", function))),
        }
    }

    fn call(&self, function: Function, args: &[Expression]) -> PlanResult<Operand> {
        let arg = |i: usize| {
            args.get(i)
                .ok_or_else(|| PlanError::Unsupported(format!("missing argument {} to {:?}()", i + 1, function)))
        };

        let operand = match function {
            Function::Regex => {
                let text = self.translate(arg(0)?)?;
                let case_insensitive = match args.get(2) {
                    None => false,
                    Some(Expression::Term(Term::Literal(flags))) => flags.value().contains('i'),
                    Some(_) => return Err(PlanError::Unsupported("non-constant regex flags".to_string())),
                };
                let pattern = match arg(1)? {
                    Expression::Term(Term::Literal(lit)) => {
                        let pattern = if case_insensitive {
                            format!("(?i){}", lit.value())
                        } else {
                            lit.value().to_string()
                        };
                        self.adapter.quote(&pattern)
                    }
                    other => {
                        let pattern = self.translate(other)?.sql;
                        if case_insensitive {
                            format!("('(?i)' || {})", pattern)
                        } else {
                            pattern
                        }
                    }
                };
                Operand::new(format!("({} REGEXP {})", text.sql, pattern), Class::Boolean)
            }
            Function::Bound => {
                let sql = match self.var_columns(arg(0)?, function)? {
                    Some(columns) => format!("({} IS NOT NULL)", columns.id.unwrap_or(columns.value)),
                    None => "(1 = 0)".to_string(),
                };
                Operand::new(sql, Class::Boolean)
            }
            Function::Str => Operand::new(self.translate(arg(0)?)?.sql, Class::Text),
            Function::Lang => match arg(0)? {
                Expression::Term(Term::Literal(lit)) => {
                    Operand::new(self.adapter.quote(lit.language().unwrap_or_default()), Class::Text)
                }
                other => match self.var_columns(other, function)? {
                    Some(columns) => Operand::new(format!("COALESCE({}, '')", columns.lang), Class::Text),
                    None => Operand::new("NULL", Class::Text),
                },
            },
            Function::LangMatches => {
                let tag = self.translate(arg(0)?)?.sql;
                let sql = match arg(1)? {
                    Expression::Term(Term::Literal(range)) if range.value() == "*" => {
                        format!("(COALESCE({}, '') <> '')", tag)
                    }
                    other => {
                        let range = self.translate(other)?.sql;
                        format!(
                            "(LOWER({tag}) = LOWER({range}) OR LOWER({tag}) LIKE LOWER({range}) || '-%')",
                            tag = tag,
                            range = range
                        )
                    }
                };
                Operand::new(sql, Class::Boolean)
            }
            Function::Datatype => match arg(0)? {
                Expression::Term(Term::Literal(lit)) => {
                    let dt = lit
                        .datatype()
                        .map(|dt| dt.as_str().to_string())
                        .unwrap_or_else(|| plain_datatype(lit.language().is_some()).to_string());
                    Operand::new(self.adapter.quote(&dt), Class::Text)
                }
                other => match self.var_columns(other, function)? {
                    Some(columns) => Operand::new(
                        format!(
                            "(CASE WHEN {kind} = {literal} THEN CASE WHEN {lang} <> '' THEN {lang_string} \
                             ELSE COALESCE({dt}, {string}) END END)",
                            kind = columns.kind,
                            literal = TermKind::Literal.code(),
                            lang = columns.lang,
                            lang_string = self.adapter.quote(plain_datatype(true)),
                            dt = columns.datatype,
                            string = self.adapter.quote(plain_datatype(false)),
                        ),
                        Class::Text,
                    ),
                    None => Operand::new("NULL", Class::Text),
                },
            },
            Function::IsIri | Function::IsBlank | Function::IsLiteral => {
                let kind = match function {
                    Function::IsIri => TermKind::Uri,
                    Function::IsBlank => TermKind::BlankNode,
                    _ => TermKind::Literal,
                };
                let sql = match arg(0)? {
                    Expression::Term(term) => bool_sql(term.kind() == kind),
                    other => match self.var_columns(other, function)? {
                        Some(columns) => format!("({} = {})", columns.kind, kind.code()),
                        None => "(1 = 0)".to_string(),
                    },
                };
                Operand::new(sql, Class::Boolean)
            }
            Function::SameTerm => {
                let sql = match (arg(0)?, arg(1)?) {
                    (Expression::Term(a), Expression::Term(b)) => bool_sql(a == b),
                    (Expression::Variable(v), Expression::Term(t)) | (Expression::Term(t), Expression::Variable(v)) => {
                        match self.resolver.columns(v) {
                            Some(columns) => self.term_match(&columns, t),
                            None => "(1 = 0)".to_string(),
                        }
                    }
                    (Expression::Variable(a), Expression::Variable(b)) => {
                        match (self.resolver.columns(a), self.resolver.columns(b)) {
                            (Some(a), Some(b)) => same_columns(&a, &b),
                            _ => "(1 = 0)".to_string(),
                        }
                    }
                    _ => return Err(PlanError::Unsupported("sameTerm() over expressions".to_string())),
                };
                Operand::new(sql, Class::Boolean)
            }
        };
        Ok(operand)
    }
}

fn compare(l: &Operand, op: &str, r: &Operand) -> String {
    if l.class == Class::Numeric || r.class == Class::Numeric {
        format!("({} {} {})", l.numeric(), op, r.numeric())
    } else {
        format!("({} {} {})", l.sql, op, r.sql)
    }
}

fn same_columns(a: &VarColumns, b: &VarColumns) -> String {
    let identity = match (&a.id, &b.id) {
        (Some(x), Some(y)) => format!("{} = {}", x, y),
        _ => format!("{} = {}", a.value, b.value),
    };
    format!(
        "({} AND {} = {} AND COALESCE({}, '') = COALESCE({}, '') AND COALESCE({}, '') = COALESCE({}, ''))",
        identity, a.kind, b.kind, a.datatype, b.datatype, a.lang, b.lang
    )
}

fn bool_sql(value: bool) -> String {
    let sql = if value { "(1 = 1)" } else { "(1 = 0)" };
    sql.to_string()
}

fn plain_datatype(tagged: bool) -> &'static str {
    if tagged {
        rdf::LANG_STRING.as_str()
    } else {
        xsd::STRING.as_str()
    }
}

fn is_numeric_datatype(dt: &NamedNode) -> bool {
    [
        xsd::INTEGER,
        xsd::DECIMAL,
        xsd::DOUBLE,
        xsd::FLOAT,
        xsd::INT,
        xsd::LONG,
        xsd::SHORT,
        xsd::BYTE,
        xsd::NON_NEGATIVE_INTEGER,
        xsd::POSITIVE_INTEGER,
        xsd::NON_POSITIVE_INTEGER,
        xsd::NEGATIVE_INTEGER,
        xsd::UNSIGNED_INT,
        xsd::UNSIGNED_LONG,
        xsd::UNSIGNED_SHORT,
        xsd::UNSIGNED_BYTE,
    ]
    .iter()
    .any(|n| n.as_str() == dt.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::SqliteAdapter;
    use crate::config::StoreConfig;
    use crate::sparql::parser::SparqlParser;

    fn fixture() -> (SqliteAdapter, TermCodec) {
        let tables = StoreConfig::default().tables();
        (SqliteAdapter::in_memory().unwrap(), TermCodec::new(tables, 16))
    }

    fn plan(text: &str) -> PlanResult<RelationalPlan> {
        let (adapter, codec) = fixture();
        let query = SparqlParser::new().parse(text).unwrap();
        let pattern = query.pattern.unwrap();
        PatternPlanner::new(&adapter, &codec, &query.dataset).plan(&pattern)
    }

    #[test]
    fn test_single_pattern_binds_variables() {
        let plan = plan("SELECT * WHERE { ?s ?p ?o }").unwrap();
        assert_eq!(plan.branches.len(), 1);
        let branch = &plan.branches[0];
        assert_eq!(branch.from, "arc_triple T0");
        assert!(branch.conditions.is_empty());
        assert_eq!(
            branch.bindings["o"],
            Binding {
                alias: 0,
                position: Position::Object
            }
        );
        assert!(plan.binds("p"));
        assert!(!plan.binds("x"));
    }

    #[test]
    fn test_shared_variable_becomes_join() {
        let plan = plan("SELECT ?n WHERE { ?s <http://knows> ?o . ?o <http://name> ?n }").unwrap();
        let branch = &plan.branches[0];
        assert!(branch.from.starts_with("arc_triple T0 JOIN arc_triple T1 ON ("));
        assert!(branch.from.contains("T1.s = T0.o"));
        assert!(branch.from.contains("T1.s_type = T0.o_type"));
        assert!(branch.conditions[0].contains("T0.p = (SELECT id FROM arc_id2val WHERE val = 'http://knows')"));
    }

    #[test]
    fn test_literal_constraints() {
        let plan = plan("SELECT ?s WHERE { ?s <http://p> \"it's\"@en }").unwrap();
        let conditions = plan.branches[0].conditions.join(" AND ");
        assert!(conditions.contains("T0.o = (SELECT id FROM arc_id2val WHERE val = 'it''s')"));
        assert!(conditions.contains("T0.o_type = 2"));
        assert!(conditions.contains("T0.o_dt = 0"));
        assert!(conditions.contains("T0.o_lang = 'en'"));
    }

    #[test]
    fn test_dataset_restricts_every_scan() {
        let plan = plan("SELECT * FROM <http://g1> FROM <http://g2> WHERE { ?s ?p ?o . ?o ?q ?r }").unwrap();
        let branch = &plan.branches[0];
        assert!(branch.conditions[0].contains("T0.g IN (SELECT id FROM arc_id2val WHERE val IN ('http://g1', 'http://g2'))"));
        assert!(branch.from.contains("T1.g IN"));
    }

    #[test]
    fn test_optional_becomes_left_join() {
        let plan = plan("SELECT * WHERE { ?s <http://p> ?o OPTIONAL { ?s <http://q> ?x . ?x <http://r> ?y } }").unwrap();
        let from = &plan.branches[0].from;
        assert!(from.contains(" LEFT JOIN (arc_triple T1 JOIN arc_triple T2 ON ("));
        assert!(from.contains("T2.s = T1.o"));
        assert!(from.ends_with(") ON (T1.s = T0.s AND T1.p = (SELECT id FROM arc_id2val WHERE val = 'http://q'))"));
    }

    #[test]
    fn test_union_expands_to_branches() {
        let plan = plan("SELECT * WHERE { { ?s <http://a> ?o } UNION { ?s <http://b> ?x } FILTER(?o != 1) }").unwrap();
        assert_eq!(plan.branches.len(), 2);
        assert!(plan.branches[0].bindings.contains_key("o"));
        assert!(!plan.branches[1].bindings.contains_key("o"));
        assert!(plan.branches[1].conditions.iter().any(|c| c.contains("NULL")));
    }

    #[test]
    fn test_union_inside_optional_is_rejected() {
        let err = plan("SELECT * WHERE { ?s ?p ?o OPTIONAL { { ?s <http://a> ?x } UNION { ?s <http://b> ?x } } }")
            .unwrap_err();
        assert!(matches!(err, PlanError::Unsupported(_)));
    }

    #[test]
    fn test_filter_translation() {
        let plan = plan(
            "SELECT * WHERE { ?s <http://p> ?o FILTER(?o > 3 && regex(?o, \"^a\", \"i\") && !bound(?z) && isIRI(?s)) }",
        )
        .unwrap();
        let filter = plan.branches[0].conditions.last().unwrap();
        assert!(filter.contains("((SELECT val FROM arc_id2val WHERE id = T0.o) + 0) > 3"));
        assert!(filter.contains("REGEXP '(?i)^a'"));
        assert!(filter.contains("(NOT (1 = 0))"));
        assert!(filter.contains("(T0.s_type = 0)"));
    }

    #[test]
    fn test_iri_equality_uses_dictionary_ids() {
        let plan = plan("SELECT * WHERE { ?s ?p ?o FILTER(?o = <http://x>) }").unwrap();
        let filter = plan.branches[0].conditions.last().unwrap();
        assert_eq!(
            filter,
            "(T0.o = (SELECT id FROM arc_id2val WHERE val = 'http://x') AND T0.o_type = 0)"
        );
    }

    #[test]
    fn test_blank_nodes_in_where_join_like_variables() {
        let plan = plan("SELECT ?o WHERE { _:a <http://p> ?o . _:a <http://q> ?x }").unwrap();
        assert!(plan.branches[0].from.contains("T1.s = T0.s"));
        assert!(plan.branches[0].bindings.contains_key("_:a"));
    }

    #[test]
    fn test_triple_reusing_optional_binding_is_rejected() {
        let err = plan("SELECT * WHERE { ?s <http://p> ?o OPTIONAL { ?s <http://q> ?x } ?y <http://r> ?x }")
            .unwrap_err();
        assert!(matches!(err, PlanError::Unsupported(ref m) if m.contains("?x")));

        // names bound before the OPTIONAL, or only after it, keep their meaning
        let planned = plan("SELECT * WHERE { ?s <http://p> ?o OPTIONAL { ?s <http://q> ?x } ?s <http://r> ?z }").unwrap();
        assert!(planned.branches[0].from.contains(" LEFT JOIN arc_triple T2 ON ("));
    }

    #[test]
    fn test_literal_equality_matches_kind_datatype_and_language() {
        let plain = plan("SELECT ?o WHERE { ?s <http://p> ?o FILTER(?o = \"5\") }").unwrap();
        let filter = plain.branches[0].conditions.last().unwrap();
        assert!(filter.contains("T0.o = (SELECT id FROM arc_id2val WHERE val = '5')"));
        assert!(filter.contains("T0.o_type = 2"));
        assert!(filter.contains("IS NULL"));
        assert!(filter.contains("COALESCE(T0.o_lang, '') = ''"));

        let tagged = plan("SELECT ?o WHERE { ?s <http://p> ?o FILTER(?o != \"chat\"@fr) }").unwrap();
        let filter = tagged.branches[0].conditions.last().unwrap();
        assert!(filter.starts_with("(NOT ("));
        assert!(filter.contains("COALESCE(T0.o_lang, '') = 'fr'"));

        // numeric constants keep value comparison
        let numeric = plan("SELECT ?o WHERE { ?s <http://p> ?o FILTER(?o = 5) }").unwrap();
        assert!(!numeric.branches[0].conditions.last().unwrap().contains("o_type"));
    }
}
