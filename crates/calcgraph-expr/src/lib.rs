//! A small recursive-descent expression language for combining existing
//! [`calcgraph::Key`]s into new ones, e.g. `z = sum(x, "dim") / y`
//! (spec.md §3.5 / §4.8 / §9's stated grammar).
//!
//! Grammar:
//! ```text
//! stmts := stmt (( ";" | "\n" ) stmt)*
//! stmt  := ident "=" expr
//! expr  := term (("+"|"-") term)*
//! term  := factor (("*"|"/") factor)*
//! factor:= primary ("**" factor)?
//! primary := number | string | ident ["(" (expr ("," expr)*)? ")"] | "(" expr ")"
//! ```
//! A bare `ident` not followed by `(` refers to an existing key by name; an
//! `ident(...)` call is an operator application.

mod lexer;
mod parser;

use std::fmt;

use calcgraph::{AddSpec, Computer, Key, TaskArg, Value};

pub use lexer::LexError;
pub use parser::{BinOpKind, Expr, Stmt};

/// Errors raised while parsing or evaluating an expression program,
/// mirroring the source-crate-wraps-engine-error convention this codebase
/// uses elsewhere (`calcgraph::error::Error::Computation` wrapping).
#[derive(Debug)]
pub enum ExprError {
    Lex(LexError),
    Parse(String),
    Engine(calcgraph::Error),
}

impl fmt::Display for ExprError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExprError::Lex(e) => write!(f, "lexical error: {e}"),
            ExprError::Parse(s) => write!(f, "parse error: {s}"),
            ExprError::Engine(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ExprError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExprError::Engine(e) => Some(e),
            _ => None,
        }
    }
}

impl From<LexError> for ExprError {
    fn from(e: LexError) -> Self {
        ExprError::Lex(e)
    }
}
impl From<calcgraph::Error> for ExprError {
    fn from(e: calcgraph::Error) -> Self {
        ExprError::Engine(e)
    }
}

pub type Result<T> = std::result::Result<T, ExprError>;

/// Parse and evaluate a program of statements against `computer`, adding one
/// key per statement's left-hand identifier. Intermediate sub-expressions
/// get an anonymous generated key name so they can be added to the graph
/// like any other task. Returns the keys assigned, in statement order.
pub fn eval(computer: &mut Computer, source: &str) -> Result<Vec<Key>> {
    let stmts = parser::parse_program(source)?;
    let mut tmp_counter = 0usize;
    let mut assigned = Vec::with_capacity(stmts.len());

    for stmt in stmts {
        let result_key = eval_expr(computer, &mut tmp_counter, &stmt.expr)?;
        let target = Key::bare(stmt.ident.clone());
        computer.add(target.clone(), AddSpec::Alias(result_key), false, false)?;
        assigned.push(target);
    }
    Ok(assigned)
}

/// Convert a literal-only expression (number, string, or nested list of
/// these) directly to a [`Value`], without touching the graph — used for
/// operator arguments like a dims list that are not themselves references
/// to computed quantities.
fn expr_to_literal(expr: &Expr) -> Result<Value> {
    match expr {
        Expr::Number(n) => Ok(Value::Scalar(*n)),
        Expr::Str(s) => Ok(Value::Str(s.clone())),
        Expr::List(items) => Ok(Value::Sequence(
            items.iter().map(expr_to_literal).collect::<Result<Vec<_>>>()?,
        )),
        other => Err(ExprError::Parse(format!(
            "expected a literal (number, string, or list) inside a list argument, found {other:?}"
        ))),
    }
}

fn next_tmp(counter: &mut usize) -> Key {
    *counter += 1;
    Key::bare(format!("__expr_tmp_{counter}"))
}

fn eval_expr(computer: &mut Computer, counter: &mut usize, expr: &Expr) -> Result<Key> {
    match expr {
        Expr::Number(n) => {
            let k = next_tmp(counter);
            computer.add(k.clone(), AddSpec::Literal(Value::Scalar(*n)), true, false)?;
            Ok(k)
        }
        Expr::Str(s) => {
            let k = next_tmp(counter);
            computer.add(k.clone(), AddSpec::Literal(Value::Str(s.clone())), true, false)?;
            Ok(k)
        }
        Expr::Ident(name) => Ok(Key::bare(name.clone())),
        Expr::List(items) => {
            let values = items
                .iter()
                .map(expr_to_literal)
                .collect::<Result<Vec<_>>>()?;
            let k = next_tmp(counter);
            computer.add(k.clone(), AddSpec::Literal(Value::Sequence(values)), true, false)?;
            Ok(k)
        }
        Expr::Call(name, args) => {
            if !computer.has_operator(name) {
                return Err(ExprError::Engine(calcgraph::Error::Name(name.clone())));
            }
            let mut task_args = Vec::with_capacity(args.len());
            for a in args {
                task_args.push(TaskArg::Ref(eval_expr(computer, counter, a)?));
            }
            let k = next_tmp(counter);
            computer.add(k.clone(), AddSpec::Apply(name.clone(), task_args), true, false)?;
            Ok(k)
        }
        Expr::BinOp(lhs, op, rhs) => {
            let l = eval_expr(computer, counter, lhs)?;
            let r = eval_expr(computer, counter, rhs)?;
            let op_name = match op {
                BinOpKind::Add => "add",
                BinOpKind::Sub => "sub",
                BinOpKind::Mul => "mul",
                BinOpKind::Div => "div",
                BinOpKind::Pow => "pow",
            };
            let k = next_tmp(counter);
            computer.add(
                k.clone(),
                AddSpec::Apply(op_name.into(), vec![TaskArg::Ref(l), TaskArg::Ref(r)]),
                true,
                false,
            )?;
            Ok(k)
        }
    }
}
