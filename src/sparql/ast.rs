//! Abstract syntax tree for parsed queries
//!
//! Built once per `query()` call by the parser and consumed by the handlers.

use crate::rdf::{NamedNode, Term};
use indexmap::IndexMap;
use std::fmt;

/// A parsed query
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub prologue: Prologue,
    pub form: QueryForm,
    /// `FROM` graphs; empty means every graph
    pub dataset: Vec<NamedNode>,
    /// WHERE pattern; `None` for data-only INSERT/DELETE
    pub pattern: Option<PatternNode>,
    /// CONSTRUCT/INSERT/DELETE template
    pub template: Vec<TriplePattern>,
    /// `INTO <g>` / `FROM <g>` target of an update
    pub target_graph: Option<NamedNode>,
    pub modifiers: SolutionModifiers,
}

impl Query {
    pub fn new(form: QueryForm) -> Self {
        Self {
            prologue: Prologue::default(),
            form,
            dataset: Vec::new(),
            pattern: None,
            template: Vec::new(),
            target_graph: None,
            modifiers: SolutionModifiers::default(),
        }
    }

    /// Variables in order of first appearance, for `SELECT *`.
    pub fn pattern_variables(&self) -> Vec<String> {
        let mut vars = Vec::new();
        if let Some(pattern) = &self.pattern {
            pattern.collect_variables(&mut vars);
        }
        vars
    }

    /// Variables a SELECT returns, in result order
    pub fn result_variables(&self) -> Vec<String> {
        match &self.form {
            QueryForm::Select {
                projection: Projection::Variables(vars),
            } => vars.clone(),
            QueryForm::Select {
                projection: Projection::All,
            } => self.pattern_variables(),
            _ => Vec::new(),
        }
    }
}

/// BASE and PREFIX declarations as written in the query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Prologue {
    pub base: Option<NamedNode>,
    pub prefixes: IndexMap<String, String>,
}

/// Query form
#[derive(Debug, Clone, PartialEq)]
pub enum QueryForm {
    Select { projection: Projection },
    Construct,
    Ask,
    Insert,
    Delete,
}

impl QueryForm {
    pub fn name(&self) -> &'static str {
        match self {
            QueryForm::Select { .. } => "select",
            QueryForm::Construct => "construct",
            QueryForm::Ask => "ask",
            QueryForm::Insert => "insert",
            QueryForm::Delete => "delete",
        }
    }
}

/// SELECT projection
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    All,
    Variables(Vec<String>),
}

/// ORDER BY / LIMIT / OFFSET / DISTINCT
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SolutionModifiers {
    pub distinct: bool,
    pub order_by: Vec<OrderCondition>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderCondition {
    pub expression: Expression,
    pub descending: bool,
}

/// Graph pattern tree
#[derive(Debug, Clone, PartialEq)]
pub enum PatternNode {
    Bgp(Vec<TriplePattern>),
    Join(Box<PatternNode>, Box<PatternNode>),
    /// Right-hand side of a left join; the left side is the enclosing `Join`
    Optional(Box<PatternNode>),
    Filter(Box<PatternNode>, Expression),
    Union(Box<PatternNode>, Box<PatternNode>),
}

impl PatternNode {
    pub fn empty() -> Self {
        PatternNode::Bgp(Vec::new())
    }

    fn collect_variables(&self, vars: &mut Vec<String>) {
        match self {
            PatternNode::Bgp(patterns) => {
                for tp in patterns {
                    for term in tp.terms() {
                        if let PatternTerm::Variable(v) = term {
                            if !vars.contains(v) {
                                vars.push(v.clone());
                            }
                        }
                    }
                }
            }
            PatternNode::Join(l, r) | PatternNode::Union(l, r) => {
                l.collect_variables(vars);
                r.collect_variables(vars);
            }
            PatternNode::Optional(inner) | PatternNode::Filter(inner, _) => {
                inner.collect_variables(vars);
            }
        }
    }

    /// Every triple pattern in the tree, left to right
    pub fn triple_patterns(&self) -> Vec<&TriplePattern> {
        match self {
            PatternNode::Bgp(patterns) => patterns.iter().collect(),
            PatternNode::Join(l, r) | PatternNode::Union(l, r) => {
                let mut out = l.triple_patterns();
                out.extend(r.triple_patterns());
                out
            }
            PatternNode::Optional(inner) | PatternNode::Filter(inner, _) => inner.triple_patterns(),
        }
    }
}

/// One triple pattern; any position may be a variable
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TriplePattern {
    pub subject: PatternTerm,
    pub predicate: PatternTerm,
    pub object: PatternTerm,
}

impl TriplePattern {
    pub fn new(subject: PatternTerm, predicate: PatternTerm, object: PatternTerm) -> Self {
        Self {
            subject,
            predicate,
            object,
        }
    }

    pub fn terms(&self) -> [&PatternTerm; 3] {
        [&self.subject, &self.predicate, &self.object]
    }

    /// First variable in the pattern, if any
    pub fn first_variable(&self) -> Option<&str> {
        self.terms().into_iter().find_map(|t| match t {
            PatternTerm::Variable(v) => Some(v.as_str()),
            _ => None,
        })
    }
}

impl fmt::Display for TriplePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {} .", self.subject, self.predicate, self.object)
    }
}

/// A position in a triple pattern
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PatternTerm {
    Variable(String),
    Term(Term),
    BlankNode(BlankLabel),
}

impl PatternTerm {
    /// Name under which a blank node binds when it appears in a WHERE
    /// pattern. Never clashes with `?var` names, which cannot contain ':'.
    pub fn binding_name(&self) -> Option<String> {
        match self {
            PatternTerm::Variable(v) => Some(v.clone()),
            PatternTerm::BlankNode(label) => Some(label.binding_name()),
            PatternTerm::Term(_) => None,
        }
    }
}

impl fmt::Display for PatternTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatternTerm::Variable(v) => write!(f, "?{}", v),
            PatternTerm::Term(t) => write!(f, "{}", t),
            PatternTerm::BlankNode(BlankLabel::Named(l)) => write!(f, "_:{}", l),
            PatternTerm::BlankNode(BlankLabel::Anonymous(n)) => write!(f, "[]#{}", n),
        }
    }
}

/// Source-level blank node: a `_:label` or a `[]`/collection node
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BlankLabel {
    Named(String),
    Anonymous(u32),
}

impl BlankLabel {
    pub fn binding_name(&self) -> String {
        match self {
            BlankLabel::Named(l) => format!("_:{}", l),
            BlankLabel::Anonymous(n) => format!("_:#{}", n),
        }
    }
}

/// FILTER / ORDER BY expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Variable(String),
    Term(Term),
    Binary {
        op: BinaryOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Unary {
        op: UnaryOp,
        expr: Box<Expression>,
    },
    Call {
        function: Function,
        args: Vec<Expression>,
    },
}

impl Expression {
    /// Variables read by the expression, in order of appearance
    pub fn variables(&self) -> Vec<&str> {
        let mut vars = Vec::new();
        self.collect_variables(&mut vars);
        vars
    }

    fn collect_variables<'a>(&'a self, vars: &mut Vec<&'a str>) {
        match self {
            Expression::Variable(v) => {
                if !vars.contains(&v.as_str()) {
                    vars.push(v);
                }
            }
            Expression::Term(_) => {}
            Expression::Binary { left, right, .. } => {
                left.collect_variables(vars);
                right.collect_variables(vars);
            }
            Expression::Unary { expr, .. } => expr.collect_variables(vars),
            Expression::Call { args, .. } => {
                for arg in args {
                    arg.collect_variables(vars);
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Minus,
    Plus,
}

/// Built-in functions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Regex,
    Bound,
    Str,
    Lang,
    LangMatches,
    Datatype,
    IsIri,
    IsBlank,
    IsLiteral,
    SameTerm,
}

impl Function {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "regex" => Some(Function::Regex),
            "bound" => Some(Function::Bound),
            "str" => Some(Function::Str),
            "lang" => Some(Function::Lang),
            "langmatches" => Some(Function::LangMatches),
            "datatype" => Some(Function::Datatype),
            "isiri" | "isuri" => Some(Function::IsIri),
            "isblank" => Some(Function::IsBlank),
            "isliteral" => Some(Function::IsLiteral),
            "sameterm" => Some(Function::SameTerm),
            _ => None,
        }
    }

    /// Accepted argument counts (min, max)
    pub fn arity(self) -> (usize, usize) {
        match self {
            Function::Regex => (2, 3),
            Function::LangMatches | Function::SameTerm => (2, 2),
            _ => (1, 1),
        }
    }
}
