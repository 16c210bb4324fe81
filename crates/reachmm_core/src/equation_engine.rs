//! Dynamics defined by expression strings.
//!
//! Each right-hand side is parsed into an [`Expr`], compiled into stack
//! [`Bytecode`] and evaluated by the [`VM`] for any [`Scalar`] type, so the same
//! system runs on `f64` for simulation, on [`Dual`](crate::autodiff::Dual)
//! numbers for pointwise Jacobians and on
//! [`IntervalDual`](crate::interval_dual::IntervalDual) numbers for Jacobian
//! enclosures.

use crate::error::{ReachError, Result};
use crate::traits::{cast, DynamicalSystem, Scalar};
use anyhow::Context;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Sin,
    Cos,
    Tan,
    Exp,
    Log,
    Sqrt,
    Tanh,
    Atan,
    Abs,
}

impl Function {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "sin" => Function::Sin,
            "cos" => Function::Cos,
            "tan" => Function::Tan,
            "exp" => Function::Exp,
            "log" | "ln" => Function::Log,
            "sqrt" => Function::Sqrt,
            "tanh" => Function::Tanh,
            "atan" => Function::Atan,
            "abs" => Function::Abs,
            _ => return None,
        })
    }

    fn eval<T: Scalar>(self, a: T) -> T {
        match self {
            Function::Sin => a.sin(),
            Function::Cos => a.cos(),
            Function::Tan => a.tan(),
            Function::Exp => a.exp(),
            Function::Log => a.ln(),
            Function::Sqrt => a.sqrt(),
            Function::Tanh => a.tanh(),
            Function::Atan => a.atan(),
            Function::Abs => a.abs(),
        }
    }
}

/// OpCodes for the stack machine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OpCode {
    LoadConst(f64),
    /// Pushes state variable `x[idx]`.
    LoadState(usize),
    /// Pushes control input `u[idx]`.
    LoadControl(usize),
    LoadParam(usize),
    LoadTime,
    /// Pops b, a; pushes a + b.
    Add,
    Sub,
    Mul,
    Div,
    /// Pops b, a; pushes a ^ b.
    Pow,
    Neg,
    Call(Function),
}

/// A compiled expression together with the stack depth it needs.
#[derive(Debug, Clone, PartialEq)]
pub struct Bytecode {
    pub ops: Vec<OpCode>,
    pub max_stack: usize,
}

/// Stateless evaluator for [`Bytecode`].
pub struct VM;

impl VM {
    /// Runs `bytecode` on a caller-owned stack of at least
    /// [`Bytecode::max_stack`] slots.
    ///
    /// The compiler guarantees every pop has a matching push and that the depth
    /// stays within `max_stack`, so an underflow or overflow only arises from
    /// hand-built bytecode or a short stack, and yields NaN.
    pub fn execute<T: Scalar>(
        bytecode: &Bytecode,
        t: T,
        x: &[T],
        u: &[T],
        params: &[f64],
        stack: &mut [T],
    ) -> T {
        let mut sp = 0usize;

        for op in &bytecode.ops {
            let (pops, value) = match *op {
                OpCode::LoadConst(v) => (0, cast(v)),
                OpCode::LoadState(i) => (0, x[i]),
                OpCode::LoadControl(i) => (0, u[i]),
                OpCode::LoadParam(i) => (0, cast(params[i])),
                OpCode::LoadTime => (0, t),
                OpCode::Neg | OpCode::Call(_) => {
                    let Some(&a) = sp.checked_sub(1).and_then(|i| stack.get(i)) else {
                        return T::nan();
                    };
                    let value = match *op {
                        OpCode::Call(f) => f.eval(a),
                        _ => -a,
                    };
                    (1, value)
                }
                binary => {
                    let Some([a, b]) = sp.checked_sub(2).and_then(|i| stack.get(i..sp)) else {
                        return T::nan();
                    };
                    let (a, b) = (*a, *b);
                    let value = match binary {
                        OpCode::Add => a + b,
                        OpCode::Sub => a - b,
                        OpCode::Mul => a * b,
                        OpCode::Div => a / b,
                        // Integral exponents keep negative bases well defined.
                        OpCode::Pow => match b.to_i32() {
                            Some(n) if cast::<T>(n as f64) == b => a.powi(n),
                            _ => a.powf(b),
                        },
                        _ => T::nan(),
                    };
                    (2, value)
                }
            };
            sp -= pops;
            let Some(slot) = stack.get_mut(sp) else {
                return T::nan();
            };
            *slot = value;
            sp += 1;
        }

        match sp.checked_sub(1).and_then(|i| stack.get(i)) {
            Some(&top) => top,
            None => T::nan(),
        }
    }
}

// --- AST & Parser ---

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Variable(String),
    Binary(Box<Expr>, char, Box<Expr>),
    Negate(Box<Expr>),
    Call(String, Box<Expr>),
}

/// Resolves names and lowers an [`Expr`] to [`Bytecode`].
pub struct Compiler {
    pub state_map: HashMap<String, usize>,
    pub control_map: HashMap<String, usize>,
    pub param_map: HashMap<String, usize>,
}

impl Compiler {
    pub fn new(state_names: &[String], control_names: &[String], param_names: &[String]) -> Self {
        let index = |names: &[String]| -> HashMap<String, usize> {
            names
                .iter()
                .enumerate()
                .map(|(i, name)| (name.clone(), i))
                .collect()
        };
        Self {
            state_map: index(state_names),
            control_map: index(control_names),
            param_map: index(param_names),
        }
    }

    pub fn compile(&self, expr: &Expr) -> Result<Bytecode> {
        let mut ops = Vec::new();
        self.emit(expr, &mut ops)?;

        let mut depth = 0usize;
        let mut max_stack = 0usize;
        for op in &ops {
            match op {
                OpCode::LoadConst(_)
                | OpCode::LoadState(_)
                | OpCode::LoadControl(_)
                | OpCode::LoadParam(_)
                | OpCode::LoadTime => depth += 1,
                OpCode::Neg | OpCode::Call(_) => {}
                _ => depth -= 1,
            }
            max_stack = max_stack.max(depth);
        }
        Ok(Bytecode { ops, max_stack })
    }

    fn emit(&self, expr: &Expr, ops: &mut Vec<OpCode>) -> Result<()> {
        match expr {
            Expr::Number(n) => ops.push(OpCode::LoadConst(*n)),
            Expr::Variable(name) => ops.push(self.resolve(name)?),
            Expr::Binary(left, op, right) => {
                self.emit(left, ops)?;
                self.emit(right, ops)?;
                ops.push(match op {
                    '+' => OpCode::Add,
                    '-' => OpCode::Sub,
                    '*' => OpCode::Mul,
                    '/' => OpCode::Div,
                    '^' => OpCode::Pow,
                    other => {
                        return Err(ReachError::Expression(format!(
                            "unknown binary operator '{other}'"
                        )))
                    }
                });
            }
            Expr::Negate(operand) => {
                self.emit(operand, ops)?;
                ops.push(OpCode::Neg);
            }
            Expr::Call(name, arg) => {
                let function = Function::from_name(name)
                    .ok_or_else(|| ReachError::Expression(format!("unknown function '{name}'")))?;
                self.emit(arg, ops)?;
                ops.push(OpCode::Call(function));
            }
        }
        Ok(())
    }

    fn resolve(&self, name: &str) -> Result<OpCode> {
        if let Some(&i) = self.state_map.get(name) {
            Ok(OpCode::LoadState(i))
        } else if let Some(&i) = self.control_map.get(name) {
            Ok(OpCode::LoadControl(i))
        } else if let Some(&i) = self.param_map.get(name) {
            Ok(OpCode::LoadParam(i))
        } else if name == "t" {
            Ok(OpCode::LoadTime)
        } else {
            Err(ReachError::Expression(format!("unknown symbol '{name}'")))
        }
    }
}

/// Parses an infix expression. `^` binds tighter than unary minus and is
/// right-associative, so `-x^2` is `-(x^2)`.
pub fn parse(input: &str) -> Result<Expr> {
    let tokens = tokenize(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.sum()?;
    match parser.peek() {
        None => Ok(expr),
        Some(token) => Err(ReachError::Expression(format!(
            "unexpected trailing token {token:?}"
        ))),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Op(char),
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c.is_ascii_digit() || c == '.' {
            let mut end = start;
            let mut prev = c;
            while let Some(&(i, d)) = chars.peek() {
                let exponent_sign = (d == '-' || d == '+') && (prev == 'e' || prev == 'E');
                if d.is_ascii_digit() || d == '.' || d == 'e' || d == 'E' || exponent_sign {
                    end = i + d.len_utf8();
                    prev = d;
                    chars.next();
                } else {
                    break;
                }
            }
            let text = &input[start..end];
            let value = text
                .parse()
                .map_err(|_| ReachError::Expression(format!("invalid number '{text}'")))?;
            tokens.push(Token::Number(value));
        } else if c.is_alphabetic() || c == '_' {
            let mut ident = String::new();
            while let Some(&(_, d)) = chars.peek() {
                if d.is_alphanumeric() || d == '_' {
                    ident.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(Token::Ident(ident));
        } else {
            tokens.push(match c {
                '+' | '-' | '*' | '/' | '^' => Token::Op(c),
                '(' => Token::LParen,
                ')' => Token::RParen,
                _ => {
                    return Err(ReachError::Expression(format!(
                        "unexpected character '{c}' at {start}"
                    )))
                }
            });
            chars.next();
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn eat_op(&mut self, ops: &[char]) -> Option<char> {
        match self.peek() {
            Some(Token::Op(c)) if ops.contains(c) => {
                let c = *c;
                self.pos += 1;
                Some(c)
            }
            _ => None,
        }
    }

    fn sum(&mut self) -> Result<Expr> {
        let mut left = self.product()?;
        while let Some(op) = self.eat_op(&['+', '-']) {
            let right = self.product()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn product(&mut self) -> Result<Expr> {
        let mut left = self.unary()?;
        while let Some(op) = self.eat_op(&['*', '/']) {
            let right = self.unary()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr> {
        if self.eat_op(&['-']).is_some() {
            return Ok(Expr::Negate(Box::new(self.unary()?)));
        }
        if self.eat_op(&['+']).is_some() {
            return self.unary();
        }
        self.power()
    }

    fn power(&mut self) -> Result<Expr> {
        let base = self.primary()?;
        if self.eat_op(&['^']).is_some() {
            let exponent = self.unary()?;
            return Ok(Expr::Binary(Box::new(base), '^', Box::new(exponent)));
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<Expr> {
        match self.next() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Ident(name)) => {
                if let Some(Token::LParen) = self.peek() {
                    self.pos += 1;
                    let arg = self.sum()?;
                    self.expect_rparen()?;
                    Ok(Expr::Call(name, Box::new(arg)))
                } else {
                    Ok(Expr::Variable(name))
                }
            }
            Some(Token::LParen) => {
                let expr = self.sum()?;
                self.expect_rparen()?;
                Ok(expr)
            }
            Some(token) => Err(ReachError::Expression(format!(
                "unexpected token {token:?}"
            ))),
            None => Err(ReachError::Expression(
                "unexpected end of expression".to_string(),
            )),
        }
    }

    fn expect_rparen(&mut self) -> Result<()> {
        match self.next() {
            Some(Token::RParen) => Ok(()),
            _ => Err(ReachError::Expression("expected ')'".to_string())),
        }
    }
}

// --- EquationSystem ---

/// A controlled system whose right-hand sides are compiled expressions.
///
/// [`apply`](DynamicalSystem::apply) allocates its stack per call, so one
/// system can be shared across threads; hot loops pass their own stack to
/// [`apply_with`](DynamicalSystem::apply_with).
#[derive(Debug, Clone)]
pub struct EquationSystem {
    pub equations: Vec<Bytecode>,
    pub params: Vec<f64>,
    pub control_dim: usize,
}

impl EquationSystem {
    pub fn new(equations: Vec<Bytecode>, params: Vec<f64>, control_dim: usize) -> Self {
        Self {
            equations,
            params,
            control_dim,
        }
    }

    /// Parses and compiles one equation per state variable.
    ///
    /// `params` pairs each parameter name with its value.
    pub fn from_strings(
        state_names: &[String],
        control_names: &[String],
        params: &[(String, f64)],
        equations: &[String],
    ) -> anyhow::Result<Self> {
        if equations.len() != state_names.len() {
            anyhow::bail!(
                "expected one equation per state variable ({}), got {}",
                state_names.len(),
                equations.len()
            );
        }
        let param_names: Vec<String> = params.iter().map(|(name, _)| name.clone()).collect();
        let compiler = Compiler::new(state_names, control_names, &param_names);
        let bytecodes = equations
            .iter()
            .zip(state_names)
            .map(|(equation, state)| {
                let expr = parse(equation)
                    .with_context(|| format!("failed to parse equation for '{state}'"))?;
                compiler
                    .compile(&expr)
                    .with_context(|| format!("failed to compile equation for '{state}'"))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Self::new(
            bytecodes,
            params.iter().map(|(_, v)| *v).collect(),
            control_names.len(),
        ))
    }
}

impl<T: Scalar> DynamicalSystem<T> for EquationSystem {
    fn dimension(&self) -> usize {
        self.equations.len()
    }

    fn control_dimension(&self) -> usize {
        self.control_dim
    }

    fn apply(&self, t: T, x: &[T], u: &[T], out: &mut [T]) {
        let mut stack = vec![T::zero(); DynamicalSystem::<T>::workspace_len(self)];
        self.apply_with(t, x, u, out, &mut stack)
    }

    fn workspace_len(&self) -> usize {
        self.equations.iter().map(|b| b.max_stack).max().unwrap_or(0)
    }

    fn apply_with(&self, t: T, x: &[T], u: &[T], out: &mut [T], workspace: &mut [T]) {
        for (slot, equation) in out.iter_mut().zip(&self.equations) {
            *slot = VM::execute(equation, t, x, u, &self.params, workspace);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autodiff::{jacobian, Dual};

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn eval(expr: &str, x: &[f64]) -> f64 {
        let compiler = Compiler::new(&names(&["x", "y"]), &names(&["u"]), &names(&["k"]));
        let code = compiler.compile(&parse(expr).unwrap()).unwrap();
        let mut stack = vec![0.0; code.max_stack];
        VM::execute(&code, 0.5, x, &[3.0], &[2.0], &mut stack)
    }

    #[test]
    fn operator_precedence() {
        assert_eq!(eval("1 + 2 * 3", &[0.0, 0.0]), 7.0);
        assert_eq!(eval("-x^2", &[3.0, 0.0]), -9.0);
        assert_eq!(eval("2^3^2", &[0.0, 0.0]), 512.0);
        assert_eq!(eval("(1 + 2) * 3", &[0.0, 0.0]), 9.0);
        assert_eq!(eval("x - y - 1", &[5.0, 2.0]), 2.0);
    }

    #[test]
    fn symbols_resolve_to_state_control_params_and_time() {
        assert_eq!(eval("x + y + u + k + t", &[1.0, 10.0]), 16.5);
        assert_eq!(eval("2.5e-1 * 4", &[0.0, 0.0]), 1.0);
        let expected = 0.2f64.sin() + 0.1f64.exp();
        assert!((eval("sin(x) + exp(y)", &[0.2, 0.1]) - expected).abs() < 1e-15);
        assert_eq!(eval("x^2", &[-3.0, 0.0]), 9.0);
    }

    #[test]
    fn reports_malformed_input() {
        assert!(matches!(parse("1 +"), Err(ReachError::Expression(_))));
        assert!(matches!(parse("(x"), Err(ReachError::Expression(_))));
        assert!(matches!(parse("x # y"), Err(ReachError::Expression(_))));
        assert!(matches!(parse("x y"), Err(ReachError::Expression(_))));

        let compiler = Compiler::new(&names(&["x"]), &[], &[]);
        let err = compiler.compile(&parse("x + missing").unwrap()).unwrap_err();
        assert!(err.to_string().contains("unknown symbol"), "unexpected error: {err}");
        assert!(compiler.compile(&parse("foo(x)").unwrap()).is_err());
    }

    #[test]
    fn stack_depth_is_tracked() {
        let compiler = Compiler::new(&names(&["x"]), &[], &[]);
        let code = compiler.compile(&parse("x * (x + (x - 1))").unwrap()).unwrap();
        assert_eq!(code.max_stack, 4);

        let mut stack = vec![0.0; code.max_stack];
        assert_eq!(VM::execute(&code, 0.0, &[2.0], &[], &[], &mut stack), 6.0);
        let mut short = vec![0.0; code.max_stack - 1];
        assert!(VM::execute::<f64>(&code, 0.0, &[2.0], &[], &[], &mut short).is_nan());

        let underflow = Bytecode {
            ops: vec![OpCode::LoadConst(1.0), OpCode::Add],
            max_stack: 1,
        };
        assert!(VM::execute::<f64>(&underflow, 0.0, &[], &[], &[], &mut stack).is_nan());
        let empty = Bytecode {
            ops: Vec::new(),
            max_stack: 0,
        };
        assert!(VM::execute::<f64>(&empty, 0.0, &[], &[], &[], &mut []).is_nan());
    }

    #[test]
    fn caller_stack_matches_allocating_apply() {
        let system = EquationSystem::from_strings(
            &names(&["x", "y"]),
            &names(&["u"]),
            &[],
            &names(&["x * (y + (x - u))", "-y + sin(x) ^ 2"]),
        )
        .unwrap();
        let len = DynamicalSystem::<f64>::workspace_len(&system);
        assert_eq!(len, 4);
        let (x, u) = ([0.7, -1.3], [0.25]);
        let mut expected = [0.0; 2];
        system.apply(0.0, &x, &u, &mut expected);
        let mut out = [0.0; 2];
        let mut workspace = vec![f64::NAN; len];
        system.apply_with(0.0, &x, &u, &mut out, &mut workspace);
        assert_eq!(out, expected);
        // Stale values left in the workspace do not leak into the next call.
        system.apply_with(0.0, &x, &u, &mut out, &mut workspace);
        assert_eq!(out, expected);
    }

    #[test]
    fn from_strings_builds_a_controlled_system() {
        let system = EquationSystem::from_strings(
            &names(&["p", "v"]),
            &names(&["u"]),
            &[("c".to_string(), 0.5)],
            &names(&["v", "u - c * v"]),
        )
        .unwrap();
        assert_eq!(DynamicalSystem::<f64>::dimension(&system), 2);
        assert_eq!(DynamicalSystem::<f64>::control_dimension(&system), 1);

        let mut out = [0.0; 2];
        system.apply(0.0, &[1.0, 2.0], &[3.0], &mut out);
        assert_eq!(out, [2.0, 2.0]);

        let jac = jacobian(&system, 0.0, &[1.0, 2.0], &[3.0]).unwrap();
        assert_eq!(jac[(1, 1)], -0.5);
        assert_eq!(jac[(1, 2)], 1.0);
        let _: &dyn DynamicalSystem<Dual> = &system;
    }

    #[test]
    fn from_strings_adds_context_to_errors() {
        let err = EquationSystem::from_strings(&names(&["x"]), &[], &[], &names(&["x +"]))
            .unwrap_err();
        assert!(format!("{err:#}").contains("failed to parse equation for 'x'"));
        let mismatched =
            EquationSystem::from_strings(&names(&["x", "y"]), &[], &[], &names(&["x"]));
        assert!(mismatched.is_err());
    }
}
