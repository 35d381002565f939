//! Expressions over event observables
//!
//! Expressions are used for histogrammed quantities, selection cuts,
//! channel definitions and per-event weights. The syntax follows the
//! usual C-like precedence rules:
//!
//! | precedence | operators                      |
//! |------------|--------------------------------|
//! | lowest     | `\|\|`                         |
//! |            | `&&`                           |
//! |            | `==` `!=` `<` `<=` `>` `>=`    |
//! |            | `+` `-`                        |
//! |            | `*` `/`                        |
//! | highest    | unary `!` `-` `+`              |
//!
//! Comparisons and logical operators evaluate to 1 or 0. Any non-zero
//! value other than NaN is true. Variables are the names of
//! [Observable]s, `weight` for the central event weight and
//! `weight("name")` for a named weight. The functions `abs`, `sqrt`,
//! `log`, `exp`, `pow`, `min` and `max` are available.
//!
//! An empty expression is the constant 1.
use std::{fmt::{self, Display}, str::FromStr};

use nom::{
    branch::alt,
    bytes::complete::{tag, take_until},
    character::complete::{alpha1, alphanumeric1, char, multispace0},
    combinator::{all_consuming, map, map_res, opt, recognize},
    multi::{fold_many0, many0_count, separated_list0},
    number::complete::recognize_float,
    sequence::{delimited, pair, preceded},
    IResult,
};
use thiserror::Error;

use crate::{observable::Observable, reco::RecoEvent};

/// A compiled expression
#[derive(Clone, Debug, PartialEq)]
pub struct Expr {
    source: String,
    root: Node,
}

#[derive(Clone, Debug, PartialEq)]
enum Node {
    Const(f64),
    Var(Variable),
    Not(Box<Node>),
    Neg(Box<Node>),
    Binary(BinOp, Box<Node>, Box<Node>),
    Call(Func, Vec<Node>),
}

#[derive(Clone, Debug, PartialEq)]
enum Variable {
    Observable(Observable),
    CentralWeight,
    NamedWeight(usize, String),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum BinOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Func {
    Abs,
    Sqrt,
    Log,
    Exp,
    Pow,
    Min,
    Max,
}

impl Func {
    fn arity(&self) -> usize {
        match self {
            Func::Pow | Func::Min | Func::Max => 2,
            _ => 1,
        }
    }
}

impl FromStr for Func {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "abs" => Ok(Func::Abs),
            "sqrt" => Ok(Func::Sqrt),
            "log" => Ok(Func::Log),
            "exp" => Ok(Func::Exp),
            "pow" => Ok(Func::Pow),
            "min" => Ok(Func::Min),
            "max" => Ok(Func::Max),
            _ => Err(()),
        }
    }
}

/// Error compiling an expression
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExprError {
    /// Malformed expression
    #[error("Syntax error in expression `{0}`: {1}")]
    Syntax(String, String),
    /// Identifier that is neither an observable nor `weight`
    #[error("Unknown variable `{0}` in expression `{1}`")]
    UnknownVariable(String, String),
    /// Named weight that is not available
    #[error("Unknown weight \"{0}\" in expression `{1}`. Available weights: {2}")]
    UnknownWeight(String, String, String),
    /// Unknown function
    #[error("Unknown function `{0}` in expression `{1}`")]
    UnknownFunction(String, String),
    /// Wrong number of function arguments
    #[error("Function `{0}` expects {1} argument(s) in expression `{2}`")]
    Arity(String, usize, String),
    /// String literal outside of `weight("...")`
    #[error("Unexpected string \"{0}\" in expression `{1}`")]
    UnexpectedString(String, String),
}

/// Error evaluating an expression for a specific event
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EvalError {
    /// The event lacks a named weight
    #[error("Event has no weight \"{0}\"")]
    MissingWeight(String),
}

impl Expr {
    /// Parse and compile an expression
    ///
    /// `weight_names` are the names of the weights that are available
    /// through `weight("name")`, in the order they are stored in the
    /// event weights.
    pub fn compile(source: &str, weight_names: &[String]) -> Result<Self, ExprError> {
        let root = match parse(source)? {
            Some(ast) => ast.compile(source, weight_names)?,
            None => Node::Const(1.),
        };
        Ok(Self {
            source: source.to_owned(),
            root,
        })
    }

    /// The constant expression 1
    pub fn one() -> Self {
        Self {
            source: String::new(),
            root: Node::Const(1.),
        }
    }

    /// The original expression text
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether the expression is a constant, independent of the event
    pub fn is_const(&self) -> bool {
        matches!(self.root, Node::Const(_))
    }

    /// Evaluate the expression for the given event
    pub fn eval(&self, ev: &RecoEvent) -> Result<f64, EvalError> {
        self.root.eval(ev)
    }

    /// Whether the expression evaluates to true for the given event
    pub fn passes(&self, ev: &RecoEvent) -> Result<bool, EvalError> {
        self.eval(ev).map(is_true)
    }
}

/// Names of all weights referenced as `weight("name")` in an expression
pub fn referenced_weights(source: &str) -> Result<Vec<String>, ExprError> {
    let mut names = Vec::new();
    if let Some(ast) = parse(source)? {
        ast.collect_weights(&mut names);
    }
    Ok(names)
}

const MAX_NESTING: usize = 64;

fn parse(source: &str) -> Result<Option<Ast>, ExprError> {
    if source.trim().is_empty() {
        return Ok(None);
    }
    if nesting(source) > MAX_NESTING {
        return Err(ExprError::Syntax(
            source.to_owned(),
            format!("nested deeper than {MAX_NESTING} levels"),
        ));
    }
    let (_, ast) = all_consuming(ws(expr))(source)
        .map_err(|err| ExprError::Syntax(source.to_owned(), err.to_string()))?;
    Ok(Some(ast))
}

// upper bound on the parser recursion: open parentheses plus chained
// prefix operators, ignoring string literals
fn nesting(source: &str) -> usize {
    let mut max = 0;
    let mut parens = 0usize;
    let mut prefix = 0;
    let mut quote = None;
    for c in source.chars() {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => {
                quote = Some(c);
                prefix = 0;
            }
            '(' => parens += 1,
            ')' => {
                parens = parens.saturating_sub(1);
                prefix = 0;
            }
            '!' | '-' | '+' => prefix += 1,
            c if c.is_whitespace() => {}
            _ => prefix = 0,
        }
        max = max.max(parens + prefix);
    }
    max
}

impl Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

fn is_true(x: f64) -> bool {
    x != 0. && !x.is_nan()
}

fn from_bool(b: bool) -> f64 {
    if b {
        1.
    } else {
        0.
    }
}

impl Node {
    fn eval(&self, ev: &RecoEvent) -> Result<f64, EvalError> {
        use Node::*;
        let res = match self {
            Const(c) => *c,
            Var(Variable::Observable(o)) => o.value(ev),
            Var(Variable::CentralWeight) => ev.weights.central().raw(),
            Var(Variable::NamedWeight(idx, name)) => ev
                .weights
                .named(*idx)
                .ok_or_else(|| EvalError::MissingWeight(name.clone()))?
                .raw(),
            Not(arg) => from_bool(!is_true(arg.eval(ev)?)),
            Neg(arg) => -arg.eval(ev)?,
            Binary(BinOp::Or, lhs, rhs) => {
                from_bool(is_true(lhs.eval(ev)?) || is_true(rhs.eval(ev)?))
            }
            Binary(BinOp::And, lhs, rhs) => {
                from_bool(is_true(lhs.eval(ev)?) && is_true(rhs.eval(ev)?))
            }
            Binary(op, lhs, rhs) => {
                let lhs = lhs.eval(ev)?;
                let rhs = rhs.eval(ev)?;
                match op {
                    BinOp::Eq => from_bool(lhs == rhs),
                    BinOp::Ne => from_bool(lhs != rhs),
                    BinOp::Lt => from_bool(lhs < rhs),
                    BinOp::Le => from_bool(lhs <= rhs),
                    BinOp::Gt => from_bool(lhs > rhs),
                    BinOp::Ge => from_bool(lhs >= rhs),
                    BinOp::Add => lhs + rhs,
                    BinOp::Sub => lhs - rhs,
                    BinOp::Mul => lhs * rhs,
                    BinOp::Div => lhs / rhs,
                    BinOp::Or | BinOp::And => unreachable!(),
                }
            }
            Call(func, args) => {
                let x = args[0].eval(ev)?;
                match func {
                    Func::Abs => x.abs(),
                    Func::Sqrt => x.sqrt(),
                    Func::Log => x.ln(),
                    Func::Exp => x.exp(),
                    Func::Pow => x.powf(args[1].eval(ev)?),
                    Func::Min => x.min(args[1].eval(ev)?),
                    Func::Max => x.max(args[1].eval(ev)?),
                }
            }
        };
        Ok(res)
    }
}

// Syntax tree before name resolution
#[derive(Clone, Debug, PartialEq)]
enum Ast {
    Num(f64),
    Str(String),
    Ident(String),
    Call(String, Vec<Ast>),
    Not(Box<Ast>),
    Neg(Box<Ast>),
    Binary(BinOp, Box<Ast>, Box<Ast>),
}

impl Ast {
    fn collect_weights(&self, names: &mut Vec<String>) {
        match self {
            Ast::Call(name, args) if name == "weight" => {
                if let [Ast::Str(weight)] = args.as_slice() {
                    if !names.contains(weight) {
                        names.push(weight.clone());
                    }
                }
            }
            Ast::Call(_, args) => args.iter().for_each(|a| a.collect_weights(names)),
            Ast::Not(arg) | Ast::Neg(arg) => arg.collect_weights(names),
            Ast::Binary(_, lhs, rhs) => {
                lhs.collect_weights(names);
                rhs.collect_weights(names);
            }
            Ast::Num(_) | Ast::Str(_) | Ast::Ident(_) => {}
        }
    }

    fn compile(self, source: &str, weight_names: &[String]) -> Result<Node, ExprError> {
        let node = match self {
            Ast::Num(x) => Node::Const(x),
            Ast::Str(s) => return Err(ExprError::UnexpectedString(s, source.to_owned())),
            Ast::Ident(name) => {
                if name == "weight" {
                    Node::Var(Variable::CentralWeight)
                } else if let Ok(obs) = Observable::from_str(&name) {
                    Node::Var(Variable::Observable(obs))
                } else {
                    return Err(ExprError::UnknownVariable(name, source.to_owned()));
                }
            }
            Ast::Call(name, mut args) if name == "weight" => match args.pop() {
                Some(Ast::Str(weight)) if args.is_empty() => {
                    let Some(idx) = weight_names.iter().position(|n| *n == weight) else {
                        return Err(ExprError::UnknownWeight(
                            weight,
                            source.to_owned(),
                            weight_names.join(", "),
                        ));
                    };
                    Node::Var(Variable::NamedWeight(idx, weight))
                }
                None => Node::Var(Variable::CentralWeight),
                _ => return Err(ExprError::Arity(name, 1, source.to_owned())),
            },
            Ast::Call(name, args) => {
                let Ok(func) = Func::from_str(&name) else {
                    return Err(ExprError::UnknownFunction(name, source.to_owned()));
                };
                if args.len() != func.arity() {
                    return Err(ExprError::Arity(name, func.arity(), source.to_owned()));
                }
                let args = args
                    .into_iter()
                    .map(|a| a.compile(source, weight_names))
                    .collect::<Result<_, _>>()?;
                Node::Call(func, args)
            }
            Ast::Not(arg) => Node::Not(Box::new(arg.compile(source, weight_names)?)),
            Ast::Neg(arg) => Node::Neg(Box::new(arg.compile(source, weight_names)?)),
            Ast::Binary(op, lhs, rhs) => Node::Binary(
                op,
                Box::new(lhs.compile(source, weight_names)?),
                Box::new(rhs.compile(source, weight_names)?),
            ),
        };
        // fold constant subexpressions
        match node {
            Node::Var(_) | Node::Const(_) => Ok(node),
            node if node.is_constant() => match node.eval(&RecoEvent::default()) {
                Ok(value) => Ok(Node::Const(value)),
                Err(_) => Ok(node),
            },
            node => Ok(node),
        }
    }
}

impl Node {
    fn is_constant(&self) -> bool {
        match self {
            Node::Const(_) => true,
            Node::Var(_) => false,
            Node::Not(arg) | Node::Neg(arg) => arg.is_constant(),
            Node::Binary(_, lhs, rhs) => lhs.is_constant() && rhs.is_constant(),
            Node::Call(_, args) => args.iter().all(|a| a.is_constant()),
        }
    }
}

fn ws<'a, O, F>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    delimited(multispace0, inner, multispace0)
}

fn binary(op: BinOp, lhs: Ast, rhs: Ast) -> Ast {
    Ast::Binary(op, Box::new(lhs), Box::new(rhs))
}

fn expr(i: &str) -> IResult<&str, Ast> {
    let (i, init) = and_expr(i)?;
    fold_many0(
        preceded(ws(tag("||")), and_expr),
        move || init.clone(),
        |acc, rhs| binary(BinOp::Or, acc, rhs),
    )(i)
}

fn and_expr(i: &str) -> IResult<&str, Ast> {
    let (i, init) = cmp_expr(i)?;
    fold_many0(
        preceded(ws(tag("&&")), cmp_expr),
        move || init.clone(),
        |acc, rhs| binary(BinOp::And, acc, rhs),
    )(i)
}

fn cmp_op(i: &str) -> IResult<&str, BinOp> {
    ws(alt((
        map(tag("=="), |_| BinOp::Eq),
        map(tag("!="), |_| BinOp::Ne),
        map(tag("<="), |_| BinOp::Le),
        map(tag(">="), |_| BinOp::Ge),
        map(tag("<"), |_| BinOp::Lt),
        map(tag(">"), |_| BinOp::Gt),
    )))(i)
}

fn cmp_expr(i: &str) -> IResult<&str, Ast> {
    let (i, lhs) = sum(i)?;
    let (i, rhs) = opt(pair(cmp_op, sum))(i)?;
    let res = match rhs {
        Some((op, rhs)) => binary(op, lhs, rhs),
        None => lhs,
    };
    Ok((i, res))
}

fn sum(i: &str) -> IResult<&str, Ast> {
    let (i, init) = product(i)?;
    fold_many0(
        pair(
            ws(alt((
                map(char('+'), |_| BinOp::Add),
                map(char('-'), |_| BinOp::Sub),
            ))),
            product,
        ),
        move || init.clone(),
        |acc, (op, rhs)| binary(op, acc, rhs),
    )(i)
}

fn product(i: &str) -> IResult<&str, Ast> {
    let (i, init) = unary(i)?;
    fold_many0(
        pair(
            ws(alt((
                map(char('*'), |_| BinOp::Mul),
                map(char('/'), |_| BinOp::Div),
            ))),
            unary,
        ),
        move || init.clone(),
        |acc, (op, rhs)| binary(op, acc, rhs),
    )(i)
}

fn unary(i: &str) -> IResult<&str, Ast> {
    alt((
        map(preceded(ws(char('!')), unary), |a| Ast::Not(Box::new(a))),
        map(preceded(ws(char('-')), unary), |a| Ast::Neg(Box::new(a))),
        preceded(ws(char('+')), unary),
        ws(primary),
    ))(i)
}

fn primary(i: &str) -> IResult<&str, Ast> {
    alt((
        number,
        string,
        call_or_ident,
        delimited(char('('), ws(expr), char(')')),
    ))(i)
}

fn number(i: &str) -> IResult<&str, Ast> {
    // signs are handled as unary operators
    let (rest, _) = nom::combinator::not(alt((char('+'), char('-'))))(i)?;
    map_res(recognize_float, |s: &str| s.parse::<f64>().map(Ast::Num))(rest)
}

fn string(i: &str) -> IResult<&str, Ast> {
    map(
        alt((
            delimited(char('"'), take_until("\""), char('"')),
            delimited(char('\''), take_until("'"), char('\'')),
        )),
        |s: &str| Ast::Str(s.to_owned()),
    )(i)
}

fn identifier(i: &str) -> IResult<&str, &str> {
    recognize(pair(
        alt((alpha1, tag("_"))),
        many0_count(alt((alphanumeric1, tag("_")))),
    ))(i)
}

fn call_or_ident(i: &str) -> IResult<&str, Ast> {
    let (i, name) = identifier(i)?;
    let (i, args) = opt(delimited(
        ws(char('(')),
        separated_list0(ws(char(',')), ws(expr)),
        char(')'),
    ))(i)?;
    let res = match args {
        Some(args) => Ast::Call(name.to_owned(), args),
        None => Ast::Ident(name.to_owned()),
    };
    Ok((i, res))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{event::Weights, reco::Lepton};
    use noisy_float::prelude::*;
    use particle_id::ParticleID;

    fn event() -> RecoEvent {
        let lepton = |id, pt| Lepton {
            id: ParticleID::new(id),
            p: [pt, pt, 0., 0.].into(),
        };
        RecoEvent {
            weights: Weights::from(vec![n64(2.), n64(0.5)]),
            leptons: vec![lepton(11, 40.), lepton(-11, 30.), lepton(13, 20.)],
            ..Default::default()
        }
    }

    fn eval(s: &str) -> f64 {
        Expr::compile(s, &["scale_up".to_owned()])
            .unwrap()
            .eval(&event())
            .unwrap()
    }

    #[test]
    fn precedence() {
        assert_eq!(eval("1 + 2 * 3"), 7.);
        assert_eq!(eval("(1 + 2) * 3"), 9.);
        assert_eq!(eval("2 - 1 - 1"), 0.);
        assert_eq!(eval("8 / 2 / 2"), 2.);
        assert_eq!(eval("-2 * -3"), 6.);
        assert_eq!(eval("1 < 2 && 3 > 4 || 1"), 1.);
        assert_eq!(eval("!(1 == 1)"), 0.);
        assert_eq!(eval("1e1 + .5"), 10.5);
        assert_eq!(eval("pow(2, 3) + max(1, abs(-4)) + sqrt(4)"), 14.);
        assert_eq!(eval(""), 1.);
    }

    #[test]
    fn variables() {
        assert_eq!(eval("n_e == 2 && n_mu == 1"), 1.);
        assert_eq!(eval("n_e==3"), 0.);
        assert_eq!(eval("pt_l1 > 35 && pt_l3 >= 20"), 1.);
        assert_eq!(eval("weight"), 2.);
        assert_eq!(eval("weight * weight(\"scale_up\")"), 1.);
        assert_eq!(eval("weight('scale_up')"), 0.5);
        // undefined observables fail all comparisons
        assert_eq!(eval("pt_j1 > 0 || pt_j1 <= 0"), 0.);
        let cut = Expr::compile("m_jj > 500", &[]).unwrap();
        assert!(!cut.passes(&event()).unwrap());
    }

    #[test]
    fn errors() {
        let names = ["scale_up".to_owned()];
        assert!(matches!(
            Expr::compile("n_e ==", &names),
            Err(ExprError::Syntax(..))
        ));
        assert!(matches!(
            Expr::compile("n_electrons > 1", &names),
            Err(ExprError::UnknownVariable(..))
        ));
        assert!(matches!(
            Expr::compile("weight(\"scale_down\")", &names),
            Err(ExprError::UnknownWeight(..))
        ));
        assert!(matches!(
            Expr::compile("cos(eta_l1)", &names),
            Err(ExprError::UnknownFunction(..))
        ));
        assert!(matches!(
            Expr::compile("pow(2)", &names),
            Err(ExprError::Arity(..))
        ));
        let deep = format!("{}n_e{}", "(".repeat(100_000), ")".repeat(100_000));
        assert!(matches!(
            Expr::compile(&deep, &names),
            Err(ExprError::Syntax(..))
        ));
        let deep = format!("{}n_e", "-".repeat(100_000));
        assert!(matches!(
            referenced_weights(&deep),
            Err(ExprError::Syntax(..))
        ));
        let nested = format!("{}n_e{}", "(".repeat(10), ")".repeat(10));
        assert!(Expr::compile(&nested, &names).is_ok());
        assert!(Expr::compile("-(-(!n_e)) - -1", &names).is_ok());

        // compiled against a weight the event does not carry
        let expr = Expr::compile("weight(\"other\")", &[
            "scale_up".to_owned(),
            "other".to_owned(),
        ])
        .unwrap();
        assert_eq!(
            expr.eval(&event()),
            Err(EvalError::MissingWeight("other".to_owned()))
        );
    }

    #[test]
    fn weight_references() {
        let names =
            referenced_weights("weight(\"b\") * (weight('a') > 0) + weight(\"b\")")
                .unwrap();
        assert_eq!(names, ["b", "a"]);
        assert!(referenced_weights("").unwrap().is_empty());
        assert!(referenced_weights("weight(").is_err());
    }

    #[test]
    fn constant_folding() {
        let expr = Expr::compile("2 * (3 + 4)", &[]).unwrap();
        assert!(expr.is_const());
        assert_eq!(expr.to_string(), "2 * (3 + 4)");
        assert!(!Expr::compile("2 * n_l", &[]).unwrap().is_const());
    }
}
