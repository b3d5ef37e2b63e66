use crate::autodiff::Dual;
use crate::error::{NumethError, Result};
use crate::traits::{Scalar, ScalarOde};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;

/// Functions an expression may call. Anything else is rejected at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Sinh,
    Cosh,
    Tanh,
    Exp,
    /// Natural logarithm, spelled `log` or `ln`.
    Log,
    Sqrt,
    Abs,
}

impl Function {
    pub fn lookup(name: &str) -> Option<Self> {
        let function = match name {
            "sin" => Self::Sin,
            "cos" => Self::Cos,
            "tan" => Self::Tan,
            "asin" => Self::Asin,
            "acos" => Self::Acos,
            "atan" => Self::Atan,
            "sinh" => Self::Sinh,
            "cosh" => Self::Cosh,
            "tanh" => Self::Tanh,
            "exp" => Self::Exp,
            "log" | "ln" => Self::Log,
            "sqrt" => Self::Sqrt,
            "abs" => Self::Abs,
            _ => return None,
        };
        Some(function)
    }

    pub fn apply<T: Scalar>(self, a: T) -> T {
        match self {
            Self::Sin => a.sin(),
            Self::Cos => a.cos(),
            Self::Tan => a.tan(),
            Self::Asin => a.asin(),
            Self::Acos => a.acos(),
            Self::Atan => a.atan(),
            Self::Sinh => a.sinh(),
            Self::Cosh => a.cosh(),
            Self::Tanh => a.tanh(),
            Self::Exp => a.exp(),
            Self::Log => a.ln(),
            Self::Sqrt => a.sqrt(),
            Self::Abs => a.abs(),
        }
    }
}

/// Named constants usable in any expression.
fn lookup_constant(name: &str) -> Option<f64> {
    match name {
        "pi" => Some(std::f64::consts::PI),
        "E" => Some(std::f64::consts::E),
        _ => None,
    }
}

/// OpCodes for the stack-based virtual machine.
/// The VM operates on a stack of `Scalar` values (f64 or Dual).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OpCode {
    /// Pushes a constant `f64` value onto the stack.
    LoadConst(f64),
    /// Pushes the value of a variable (by index in the declared order).
    LoadVar(usize),
    /// Pops top two values (b, a), pushes (a + b).
    Add,
    /// Pops top two values (b, a), pushes (a - b).
    Sub,
    /// Pops top two values (b, a), pushes (a * b).
    Mul,
    /// Pops top two values (b, a), pushes (a / b).
    Div,
    /// Pops top two values (b, a), pushes (a ^ b).
    Pow,
    /// Pops top value (a), pushes -a.
    Neg,
    /// Pops top value (a), pushes f(a).
    Call(Function),
}

/// A compiled sequence of operations. Only `Compiler` builds these, so every
/// instance leaves exactly one value on the stack.
#[derive(Debug, Clone, PartialEq)]
pub struct Bytecode {
    ops: Vec<OpCode>,
}

/// Stack-based virtual machine for evaluating compiled expressions.
pub struct VM;

impl VM {
    /// Executes the bytecode against `vars`, using `stack` as scratch space.
    pub fn execute<T: Scalar>(bytecode: &Bytecode, vars: &[T], stack: &mut Vec<T>) -> T {
        stack.clear();

        for op in &bytecode.ops {
            match *op {
                OpCode::LoadConst(value) => stack.push(T::lift(value)),
                OpCode::LoadVar(idx) => stack.push(vars.get(idx).copied().unwrap_or_else(T::nan)),
                OpCode::Add => binary(stack, |a, b| a + b),
                OpCode::Sub => binary(stack, |a, b| a - b),
                OpCode::Mul => binary(stack, |a, b| a * b),
                OpCode::Div => binary(stack, |a, b| a / b),
                OpCode::Pow => binary(stack, |a, b| a.powf(b)),
                OpCode::Neg => unary(stack, |a| -a),
                OpCode::Call(function) => unary(stack, |a| function.apply(a)),
            }
        }

        pop(stack)
    }
}

fn pop<T: Scalar>(stack: &mut Vec<T>) -> T {
    stack.pop().unwrap_or_else(T::nan)
}

fn binary<T: Scalar>(stack: &mut Vec<T>, op: impl Fn(T, T) -> T) {
    let b = pop(stack);
    let a = pop(stack);
    stack.push(op(a, b));
}

fn unary<T: Scalar>(stack: &mut Vec<T>, op: impl Fn(T) -> T) {
    let a = pop(stack);
    stack.push(op(a));
}

// --- AST & Parser ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

/// Abstract syntax tree for expressions.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Variable(String),
    Binary(Box<Expr>, BinaryOp, Box<Expr>),
    Neg(Box<Expr>),
    Call(String, Box<Expr>),
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Number(n) => write!(f, "{n}"),
            Expr::Variable(name) => write!(f, "{name}"),
            Expr::Binary(left, op, right) => {
                let symbol = match op {
                    BinaryOp::Add => "+",
                    BinaryOp::Sub => "-",
                    BinaryOp::Mul => "*",
                    BinaryOp::Div => "/",
                    BinaryOp::Pow => "**",
                };
                write!(f, "({left} {symbol} {right})")
            }
            Expr::Neg(operand) => write!(f, "(-{operand})"),
            Expr::Call(name, arg) => write!(f, "{name}({arg})"),
        }
    }
}

/// Compiles an AST (`Expr`) into `Bytecode`, resolving variable names to
/// indices in declaration order.
pub struct Compiler {
    pub var_map: HashMap<String, usize>,
}

impl Compiler {
    pub fn new<S: AsRef<str>>(var_names: &[S]) -> Self {
        let var_map = var_names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_ref().to_string(), i))
            .collect();
        Self { var_map }
    }

    pub fn compile(&self, expr: &Expr) -> Result<Bytecode> {
        let mut ops = Vec::new();
        self.compile_recursive(expr, &mut ops)?;
        Ok(Bytecode { ops })
    }

    fn compile_recursive(&self, expr: &Expr, ops: &mut Vec<OpCode>) -> Result<()> {
        match expr {
            Expr::Number(n) => ops.push(OpCode::LoadConst(*n)),
            Expr::Variable(name) => {
                if let Some(&idx) = self.var_map.get(name) {
                    ops.push(OpCode::LoadVar(idx));
                } else if let Some(value) = lookup_constant(name) {
                    ops.push(OpCode::LoadConst(value));
                } else if Function::lookup(name).is_some() {
                    return Err(NumethError::UnknownSymbol(format!(
                        "function {name} used without arguments"
                    )));
                } else {
                    return Err(NumethError::UnknownSymbol(name.clone()));
                }
            }
            Expr::Binary(left, op, right) => {
                self.compile_recursive(left, ops)?;
                self.compile_recursive(right, ops)?;
                ops.push(match op {
                    BinaryOp::Add => OpCode::Add,
                    BinaryOp::Sub => OpCode::Sub,
                    BinaryOp::Mul => OpCode::Mul,
                    BinaryOp::Div => OpCode::Div,
                    BinaryOp::Pow => OpCode::Pow,
                });
            }
            Expr::Neg(operand) => {
                self.compile_recursive(operand, ops)?;
                ops.push(OpCode::Neg);
            }
            Expr::Call(name, arg) => {
                let function = Function::lookup(name)
                    .ok_or_else(|| NumethError::UnknownSymbol(format!("{name}()")))?;
                self.compile_recursive(arg, ops)?;
                ops.push(OpCode::Call(function));
            }
        }
        Ok(())
    }
}

/// Parses a string expression into an AST.
pub fn parse(input: &str) -> Result<Expr> {
    let tokens = tokenize(input)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: input.len(),
        depth: 0,
    };
    let parsed = parser.parse_expression()?;
    match parser.peek() {
        None => Ok(parsed.expr),
        Some(token) => Err(NumethError::parse(
            token.offset,
            format!("unexpected {}", token.kind),
        )),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Number(f64),
    Identifier(String),
    Plus,
    Minus,
    Star,
    Slash,
    Power,
    LParen,
    RParen,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Number(n) => write!(f, "number {n}"),
            TokenKind::Identifier(name) => write!(f, "name '{name}'"),
            TokenKind::Plus => f.write_str("'+'"),
            TokenKind::Minus => f.write_str("'-'"),
            TokenKind::Star => f.write_str("'*'"),
            TokenKind::Slash => f.write_str("'/'"),
            TokenKind::Power => f.write_str("'**'"),
            TokenKind::LParen => f.write_str("'('"),
            TokenKind::RParen => f.write_str("')'"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Token {
    kind: TokenKind,
    offset: usize,
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(offset, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c.is_ascii_digit() || c == '.' {
            let mut end = offset;
            let mut previous = c;
            while let Some(&(i, d)) = chars.peek() {
                // An exponent sign only belongs to the literal right after 'e'/'E'.
                let exponent_sign = (d == '+' || d == '-') && matches!(previous, 'e' | 'E');
                if d.is_ascii_digit() || d == '.' || d == 'e' || d == 'E' || exponent_sign {
                    end = i + d.len_utf8();
                    previous = d;
                    chars.next();
                } else {
                    break;
                }
            }
            let literal = &input[offset..end];
            let value = literal
                .parse::<f64>()
                .map_err(|_| NumethError::parse(offset, format!("malformed number '{literal}'")))?;
            tokens.push(Token {
                kind: TokenKind::Number(value),
                offset,
            });
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
            tokens.push(Token {
                kind: TokenKind::Identifier(ident),
                offset,
            });
        } else {
            chars.next();
            let kind = match c {
                '+' => TokenKind::Plus,
                '-' => TokenKind::Minus,
                '*' => {
                    if matches!(chars.peek(), Some(&(_, '*'))) {
                        chars.next();
                        TokenKind::Power
                    } else {
                        TokenKind::Star
                    }
                }
                '/' => TokenKind::Slash,
                '^' => TokenKind::Power,
                '(' => TokenKind::LParen,
                ')' => TokenKind::RParen,
                other => {
                    return Err(NumethError::parse(
                        offset,
                        format!("unexpected character '{other}'"),
                    ))
                }
            };
            tokens.push(Token { kind, offset });
        }
    }
    Ok(tokens)
}

/// Bound on both parser recursion and syntax-tree height, so parsing,
/// compiling and dropping an `Expr` stay within the stack.
const MAX_DEPTH: usize = 256;

fn nested_too_deeply(offset: usize) -> NumethError {
    NumethError::parse(offset, "expression nested too deeply")
}

/// A subtree together with its height.
struct Parsed {
    expr: Expr,
    height: usize,
}

impl Parsed {
    fn leaf(expr: Expr) -> Self {
        Self { expr, height: 1 }
    }

    fn unary(
        operand: Parsed,
        offset: usize,
        build: impl FnOnce(Box<Expr>) -> Expr,
    ) -> Result<Self> {
        let height = operand.height + 1;
        if height > MAX_DEPTH {
            return Err(nested_too_deeply(offset));
        }
        Ok(Self {
            expr: build(Box::new(operand.expr)),
            height,
        })
    }

    fn binary(left: Parsed, op: BinaryOp, right: Parsed, offset: usize) -> Result<Self> {
        let height = left.height.max(right.height) + 1;
        if height > MAX_DEPTH {
            return Err(nested_too_deeply(offset));
        }
        Ok(Self {
            expr: Expr::Binary(Box::new(left.expr), op, Box::new(right.expr)),
            height,
        })
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    end: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_kind(&self) -> Option<&TokenKind> {
        self.peek().map(|token| &token.kind)
    }

    fn consume(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    /// Enters a nested construct opened by the token at `offset`.
    fn descend(&mut self, offset: usize) -> Result<()> {
        if self.depth >= MAX_DEPTH {
            return Err(nested_too_deeply(offset));
        }
        self.depth += 1;
        Ok(())
    }

    fn ascend(&mut self) {
        self.depth -= 1;
    }

    fn expect_rparen(&mut self, open_offset: usize) -> Result<()> {
        match self.consume() {
            Some(Token {
                kind: TokenKind::RParen,
                ..
            }) => Ok(()),
            Some(token) => Err(NumethError::parse(
                token.offset,
                format!("expected ')' to close '(' at {open_offset}, found {}", token.kind),
            )),
            None => Err(NumethError::parse(
                self.end,
                format!("unclosed '(' at {open_offset}"),
            )),
        }
    }

    fn parse_expression(&mut self) -> Result<Parsed> {
        let mut left = self.parse_term()?;

        while let Some(token) = self.peek() {
            let op = match token.kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => break,
            };
            let offset = token.offset;
            self.consume();
            let right = self.parse_term()?;
            left = Parsed::binary(left, op, right, offset)?;
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> Result<Parsed> {
        let mut left = self.parse_unary()?;

        while let Some(token) = self.peek() {
            let op = match token.kind {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                _ => break,
            };
            let offset = token.offset;
            self.consume();
            let right = self.parse_unary()?;
            left = Parsed::binary(left, op, right, offset)?;
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Parsed> {
        let (negate, offset) = match self.peek() {
            Some(Token {
                kind: TokenKind::Minus,
                offset,
            }) => (true, *offset),
            Some(Token {
                kind: TokenKind::Plus,
                offset,
            }) => (false, *offset),
            _ => return self.parse_power(),
        };
        self.consume();
        self.descend(offset)?;
        let operand = self.parse_unary()?;
        self.ascend();
        if negate {
            Parsed::unary(operand, offset, Expr::Neg)
        } else {
            Ok(operand)
        }
    }

    /// Exponentiation is right-associative and binds tighter than a leading
    /// minus on its base, but its exponent may carry a sign: `-x**-2`.
    fn parse_power(&mut self) -> Result<Parsed> {
        let base = self.parse_primary()?;
        let Some(Token {
            kind: TokenKind::Power,
            offset,
        }) = self.peek()
        else {
            return Ok(base);
        };
        let offset = *offset;
        self.consume();
        self.descend(offset)?;
        let exponent = self.parse_unary()?;
        self.ascend();
        Parsed::binary(base, BinaryOp::Pow, exponent, offset)
    }

    fn parse_primary(&mut self) -> Result<Parsed> {
        let Some(token) = self.consume() else {
            return Err(NumethError::parse(self.end, "unexpected end of expression"));
        };
        match token.kind {
            TokenKind::Number(n) => Ok(Parsed::leaf(Expr::Number(n))),
            TokenKind::Identifier(name) => {
                if let Some(TokenKind::LParen) = self.peek_kind() {
                    let open = self.consume().map_or(self.end, |t| t.offset);
                    self.descend(open)?;
                    let arg = self.parse_expression()?;
                    self.expect_rparen(open)?;
                    self.ascend();
                    Parsed::unary(arg, open, |arg| Expr::Call(name, arg))
                } else {
                    Ok(Parsed::leaf(Expr::Variable(name)))
                }
            }
            TokenKind::LParen => {
                self.descend(token.offset)?;
                let parsed = self.parse_expression()?;
                self.expect_rparen(token.offset)?;
                self.ascend();
                Ok(parsed)
            }
            other => Err(NumethError::parse(
                token.offset,
                format!("unexpected {other}"),
            )),
        }
    }
}

// --- Compiled expressions ---

/// One argument of a broadcast evaluation.
#[derive(Debug, Clone, Copy)]
pub enum Argument<'a> {
    Scalar(f64),
    Array(&'a [f64]),
}

impl Argument<'_> {
    fn at(&self, i: usize) -> f64 {
        match self {
            Argument::Scalar(value) => *value,
            Argument::Array(values) => values[i],
        }
    }
}

/// A user formula compiled against an ordered list of variable names.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledExpression {
    source: String,
    var_names: Vec<String>,
    bytecode: Bytecode,
}

impl CompiledExpression {
    pub fn compile<S: AsRef<str>>(source: &str, var_names: &[S]) -> Result<Self> {
        let expr = parse(source)?;
        let bytecode = Compiler::new(var_names).compile(&expr)?;
        log::trace!("compiled '{}' to {} ops", source, bytecode.ops.len());
        Ok(Self {
            source: source.to_string(),
            var_names: var_names.iter().map(|s| s.as_ref().to_string()).collect(),
            bytecode,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn arity(&self) -> usize {
        self.var_names.len()
    }

    /// Evaluates at one point. `args` follows the declared variable order.
    pub fn evaluate(&self, args: &[f64]) -> Result<f64> {
        self.check_arity(args.len())?;
        let mut stack = Vec::with_capacity(self.bytecode.ops.len());
        Ok(VM::execute(&self.bytecode, args, &mut stack))
    }

    /// Evaluates over arrays: every `Array` argument must share one length,
    /// `Scalar` arguments are repeated. With no arrays, yields a single value.
    pub fn evaluate_broadcast(&self, args: &[Argument<'_>]) -> Result<Vec<f64>> {
        self.check_arity(args.len())?;
        let mut len = None;
        for arg in args {
            if let Argument::Array(values) = arg {
                match len {
                    None => len = Some(values.len()),
                    Some(n) if n != values.len() => {
                        return Err(NumethError::InvalidInput(format!(
                            "array arguments have different lengths ({n} and {})",
                            values.len()
                        )))
                    }
                    Some(_) => {}
                }
            }
        }

        let len = len.unwrap_or(1);
        let mut stack = Vec::with_capacity(self.bytecode.ops.len());
        let mut point = vec![0.0; args.len()];
        let mut out = Vec::with_capacity(len);
        for i in 0..len {
            for (slot, arg) in point.iter_mut().zip(args) {
                *slot = arg.at(i);
            }
            out.push(VM::execute(&self.bytecode, &point, &mut stack));
        }
        Ok(out)
    }

    /// Value and exact first derivative of a single-variable expression.
    pub fn value_and_derivative(&self, x: f64) -> Result<(f64, f64)> {
        self.check_arity(1)?;
        let mut stack = Vec::with_capacity(self.bytecode.ops.len());
        let out = VM::execute(&self.bytecode, &[Dual::variable(x)], &mut stack);
        Ok((out.value, out.deriv))
    }

    fn check_arity(&self, given: usize) -> Result<()> {
        if given != self.arity() {
            return Err(NumethError::InvalidInput(format!(
                "'{}' takes {} argument(s) ({}), got {}",
                self.source,
                self.arity(),
                self.var_names.join(", "),
                given
            )));
        }
        Ok(())
    }
}

/// Adapts a two-variable expression `f(x, y)` to `ScalarOde`.
pub struct ExpressionOde<'a, T: Scalar> {
    expression: &'a CompiledExpression,
    // Interior mutability for the VM stack to avoid allocating per slope.
    stack: RefCell<Vec<T>>,
}

impl<'a, T: Scalar> ExpressionOde<'a, T> {
    pub fn new(expression: &'a CompiledExpression) -> Result<Self> {
        expression.check_arity(2)?;
        Ok(Self {
            expression,
            stack: RefCell::new(Vec::with_capacity(expression.bytecode.ops.len())),
        })
    }
}

impl<T: Scalar> ScalarOde<T> for ExpressionOde<'_, T> {
    fn slope(&self, x: T, y: T) -> T {
        let mut stack = self.stack.borrow_mut();
        VM::execute(&self.expression.bytecode, &[x, y], &mut stack)
    }
}
