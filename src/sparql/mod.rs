//! SPARQL query support
//!
//! Text goes through [`parser`] into an [`ast::Query`], the WHERE pattern is
//! turned into SQL by [`planner`] and [`sql`], and the handler for the
//! query's form executes it through the adapter. [`executor`] glues these
//! steps and records failures in the [`diagnostics`] sink.

pub mod ast;
pub mod diagnostics;
pub mod executor;
pub mod handlers;
pub mod parser;
pub mod planner;
pub mod results;
pub mod sql;

pub use diagnostics::Diagnostics;
pub use executor::SparqlExecutor;
pub use handlers::{HandlerContext, HandlerError, HandlerResult, QueryHandler};
pub use parser::{ParseError, ParseResult, SparqlParser};
pub use planner::{PatternPlanner, PlanError, PlanResult, RelationalPlan};
pub use results::{QueryResult, QueryType, ResultEnvelope, ResultRow};
