//! SELECT statement rendering
//!
//! Turns a [`RelationalPlan`] plus the requested variables and solution
//! modifiers into one SQL statement. Each output variable `i` yields four
//! columns: `c<i>` (lexical value), `c<i>_type`, `c<i>_dt` and `c<i>_lang`,
//! which [`TermCodec::decode`](crate::rdf::codec::TermCodec::decode) reads
//! back into a term.

use super::ast::{Expression, SolutionModifiers};
use super::planner::{BranchPlan, ColumnResolver, ExpressionTranslator, PlanError, PlanResult, RelationalPlan, VarColumns};
use crate::adapter::Adapter;
use crate::rdf::codec::TermCodec;

/// Column alias holding the value of output variable `index`
pub fn column_alias(index: usize) -> String {
    format!("c{}", index)
}

/// Largest LIMIT accepted by the common backends, used for OFFSET alone
const NO_LIMIT: u64 = i64::MAX as u64;

struct OutputColumn<'v> {
    var: &'v str,
    /// Requested by the caller; an unbindable requested variable is kept in
    /// the select list as an unjoined column reference
    requested: bool,
}

/// Builder for the SELECT over a plan
pub struct SelectSql<'a> {
    plan: &'a RelationalPlan,
    variables: &'a [String],
    modifiers: Option<&'a SolutionModifiers>,
    first_row_only: bool,
}

impl<'a> SelectSql<'a> {
    pub fn new(plan: &'a RelationalPlan, variables: &'a [String]) -> Self {
        Self {
            plan,
            variables,
            modifiers: None,
            first_row_only: false,
        }
    }

    /// Apply DISTINCT, ORDER BY, LIMIT and OFFSET
    pub fn with_modifiers(mut self, modifiers: &'a SolutionModifiers) -> Self {
        self.modifiers = Some(modifiers);
        self
    }

    /// Fetch at most one row (ASK)
    pub fn first_row_only(mut self) -> Self {
        self.first_row_only = true;
        self
    }

    /// Requested variables; column `c<i>` belongs to `variables()[i]`
    pub fn variables(&self) -> &[String] {
        self.variables
    }

    pub fn render(&self, adapter: &dyn Adapter, codec: &TermCodec) -> PlanResult<String> {
        if self.plan.branches.is_empty() {
            return Err(PlanError::Unsupported("empty graph pattern".to_string()));
        }

        let columns = self.output_columns();
        let distinct = self.modifiers.is_some_and(|m| m.distinct);
        let order_by = self.modifiers.map(|m| m.order_by.as_slice()).unwrap_or_default();

        let mut sql = if self.plan.branches.len() == 1 && order_by.is_empty() {
            self.render_branch(&self.plan.branches[0], &columns, distinct, codec)
        } else {
            let branches: Vec<String> = self
                .plan
                .branches
                .iter()
                .map(|branch| self.render_branch(branch, &columns, false, codec))
                .collect();
            let branches = branches.join(" UNION ALL ");
            let requested = self.variables.len();
            // DISTINCT must not see the hidden ORDER BY columns: collapse on
            // the requested ones and order by an aggregate of the rest
            let collapse = distinct && columns.len() > requested;
            let mut sql = if collapse && requested == 0 {
                format!("SELECT DISTINCT 1 AS c_one FROM ({}) U", branches)
            } else if collapse {
                let grouped: Vec<String> = (0..requested)
                    .flat_map(|i| {
                        let alias = column_alias(i);
                        [
                            alias.clone(),
                            format!("{}_type", alias),
                            format!("{}_dt", alias),
                            format!("{}_lang", alias),
                        ]
                    })
                    .collect();
                let select: Vec<String> = grouped.iter().map(|c| format!("U.{} AS {}", c, c)).collect();
                let keys: Vec<String> = grouped.iter().map(|c| format!("U.{}", c)).collect();
                format!(
                    "SELECT {} FROM ({}) U GROUP BY {}",
                    select.join(", "),
                    branches,
                    keys.join(", ")
                )
            } else {
                format!(
                    "SELECT {}U.* FROM ({}) U",
                    if distinct { "DISTINCT " } else { "" },
                    branches
                )
            };
            if !order_by.is_empty() && !(collapse && requested == 0) {
                let vars: Vec<String> = columns.iter().map(|c| c.var.to_string()).collect();
                let resolver = OutputColumns { vars: &vars };
                let translator = ExpressionTranslator::new(&resolver, adapter, codec);
                let mut terms = Vec::new();
                for condition in order_by {
                    let direction = if condition.descending { "DESC" } else { "ASC" };
                    match &condition.expression {
                        Expression::Variable(v) => {
                            let column = resolver.value_column(v).unwrap_or_else(|| "NULL".to_string());
                            let hidden = vars.iter().position(|name| name == v).is_some_and(|i| i >= requested);
                            if collapse && hidden {
                                let aggregate = if condition.descending { "MAX" } else { "MIN" };
                                terms.push(format!("{}({} + 0) {}", aggregate, column, direction));
                                terms.push(format!("{}({}) {}", aggregate, column, direction));
                            } else {
                                terms.push(format!("({} + 0) {}", column, direction));
                                terms.push(format!("{} {}", column, direction));
                            }
                        }
                        other => terms.push(format!("{} {}", translator.value(other)?, direction)),
                    }
                }
                sql.push_str(" ORDER BY ");
                sql.push_str(&terms.join(", "));
            }
            sql
        };

        if self.first_row_only {
            sql.push_str(" LIMIT 1");
        } else if let Some(m) = self.modifiers {
            match (m.limit, m.offset) {
                (Some(limit), Some(offset)) => sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset)),
                (Some(limit), None) => sql.push_str(&format!(" LIMIT {}", limit)),
                (None, Some(offset)) => sql.push_str(&format!(" LIMIT {} OFFSET {}", NO_LIMIT, offset)),
                (None, None) => {}
            }
        }
        Ok(sql)
    }

    /// Requested variables, then any ORDER BY variable not among them
    fn output_columns(&self) -> Vec<OutputColumn<'a>> {
        let mut columns: Vec<OutputColumn<'a>> = self
            .variables
            .iter()
            .map(|var| OutputColumn {
                var: var.as_str(),
                requested: true,
            })
            .collect();
        if let Some(modifiers) = self.modifiers {
            for condition in &modifiers.order_by {
                for var in condition.expression.variables() {
                    if !columns.iter().any(|c| c.var == var) {
                        columns.push(OutputColumn {
                            var,
                            requested: false,
                        });
                    }
                }
            }
        }
        columns
    }

    fn render_branch(&self, branch: &BranchPlan, columns: &[OutputColumn<'_>], distinct: bool, codec: &TermCodec) -> String {
        let id2val = &codec.tables().id2val;
        let mut select = Vec::new();
        let mut joins = String::new();

        for (i, column) in columns.iter().enumerate() {
            let alias = column_alias(i);
            match branch.bindings.get(column.var) {
                Some(binding) => {
                    joins.push_str(&format!(
                        " LEFT JOIN {} V{} ON (V{}.id = {})",
                        id2val,
                        i,
                        i,
                        binding.id_column()
                    ));
                    select.push(format!("V{}.val AS {}", i, alias));
                    select.push(format!("{} AS {}_type", binding.kind_column(), alias));
                    match binding.datatype_column() {
                        Some(dt) => {
                            joins.push_str(&format!(" LEFT JOIN {} D{} ON (D{}.id = {})", id2val, i, i, dt));
                            select.push(format!("D{}.val AS {}_dt", i, alias));
                        }
                        None => select.push(format!("NULL AS {}_dt", alias)),
                    }
                    select.push(format!("{} AS {}_lang", binding.lang_column(), alias));
                }
                None => {
                    // requested but bindable nowhere: the reference has no join behind it
                    if column.requested && !self.plan.binds(column.var) {
                        select.push(format!("V{}.val AS {}", i, alias));
                    } else {
                        select.push(format!("NULL AS {}", alias));
                    }
                    select.push(format!("NULL AS {}_type", alias));
                    select.push(format!("NULL AS {}_dt", alias));
                    select.push(format!("NULL AS {}_lang", alias));
                }
            }
        }
        if select.is_empty() {
            select.push("1 AS c_one".to_string());
        }

        let mut sql = format!(
            "SELECT {}{} FROM {}{}",
            if distinct { "DISTINCT " } else { "" },
            select.join(", "),
            branch.from,
            joins
        );
        if !branch.conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&branch.conditions.join(" AND "));
        }
        sql
    }
}

/// Resolver over the output columns of the wrapped union
struct OutputColumns<'a> {
    vars: &'a [String],
}

impl OutputColumns<'_> {
    fn value_column(&self, var: &str) -> Option<String> {
        self.vars
            .iter()
            .position(|v| v == var)
            .map(|i| format!("U.{}", column_alias(i)))
    }
}

impl ColumnResolver for OutputColumns<'_> {
    fn columns(&self, var: &str) -> Option<VarColumns> {
        let value = self.value_column(var)?;
        Some(VarColumns {
            id: None,
            kind: format!("{}_type", value),
            datatype: format!("{}_dt", value),
            lang: format!("{}_lang", value),
            value,
        })
    }
}
