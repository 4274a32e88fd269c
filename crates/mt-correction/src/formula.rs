//! TFormula expressions used by correctionlib `formula` nodes.
//!
//! Supports the dialect found in jet energy correction files:
//! - variables `x`, `y`, `z`, `t` (bound to the node's declared inputs)
//! - parameters `[0]`, `[1]`, ...
//! - arithmetic `+ - * /` and power `^` (right associative)
//! - comparisons and `&&`, `||`, `!` (evaluating to 1 or 0)
//! - functions `abs`, `sqrt`, `log`, `log10`, `exp`, `pow`, `min`, `max`,
//!   `atan`, `atan2`, `erf`, `sin`, `cos`, `tan`, `sinh`, `cosh`, `tanh`,
//!   also with the `TMath::` prefix.

use mt_core::{Error, Result};

#[derive(Debug, Clone)]
enum Node {
    Const(f64),
    Input(usize),
    Param(usize),
    Negate(Box<Node>),
    LogicalNot(Box<Node>),
    Binary(Op, Box<Node>, Box<Node>),
    Apply(Func, Vec<Node>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Op {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl Op {
    /// Infix operators handled by precedence climbing. `^` binds tighter than
    /// unary minus and is parsed separately.
    fn infix(sym: &str) -> Option<Op> {
        let op = match sym {
            "||" => Op::Or,
            "&&" => Op::And,
            "==" => Op::Eq,
            "!=" => Op::Ne,
            "<" => Op::Lt,
            "<=" => Op::Le,
            ">" => Op::Gt,
            ">=" => Op::Ge,
            "+" => Op::Add,
            "-" => Op::Sub,
            "*" => Op::Mul,
            "/" => Op::Div,
            _ => return None,
        };
        Some(op)
    }

    fn binding(self) -> u8 {
        match self {
            Op::Or => 1,
            Op::And => 2,
            Op::Eq | Op::Ne | Op::Lt | Op::Le | Op::Gt | Op::Ge => 3,
            Op::Add | Op::Sub => 4,
            Op::Mul | Op::Div => 5,
            Op::Pow => 6,
        }
    }

    fn apply(self, l: f64, r: f64) -> f64 {
        match self {
            Op::Add => l + r,
            Op::Sub => l - r,
            Op::Mul => l * r,
            Op::Div => l / r,
            Op::Pow => l.powf(r),
            Op::Eq => truth(l == r),
            Op::Ne => truth(l != r),
            Op::Lt => truth(l < r),
            Op::Le => truth(l <= r),
            Op::Gt => truth(l > r),
            Op::Ge => truth(l >= r),
            Op::And => truth(l != 0.0 && r != 0.0),
            Op::Or => truth(l != 0.0 || r != 0.0),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Func {
    Abs,
    Sqrt,
    Log,
    Log10,
    Exp,
    Pow,
    Min,
    Max,
    Atan,
    Atan2,
    Erf,
    Sin,
    Cos,
    Tan,
    Sinh,
    Cosh,
    Tanh,
}

impl Func {
    fn lookup(name: &str) -> Option<(Func, usize)> {
        let bare = name.strip_prefix("TMath::").unwrap_or(name);
        let f = match bare {
            "abs" | "fabs" | "Abs" => (Func::Abs, 1),
            "sqrt" | "Sqrt" => (Func::Sqrt, 1),
            "log" | "Log" => (Func::Log, 1),
            "log10" | "Log10" => (Func::Log10, 1),
            "exp" | "Exp" => (Func::Exp, 1),
            "pow" | "Power" => (Func::Pow, 2),
            "min" | "Min" => (Func::Min, 2),
            "max" | "Max" => (Func::Max, 2),
            "atan" | "ATan" => (Func::Atan, 1),
            "atan2" | "ATan2" => (Func::Atan2, 2),
            "erf" | "Erf" => (Func::Erf, 1),
            "sin" | "Sin" => (Func::Sin, 1),
            "cos" | "Cos" => (Func::Cos, 1),
            "tan" | "Tan" => (Func::Tan, 1),
            "sinh" | "SinH" => (Func::Sinh, 1),
            "cosh" | "CosH" => (Func::Cosh, 1),
            "tanh" | "TanH" => (Func::Tanh, 1),
            _ => return None,
        };
        Some(f)
    }

    fn call(self, args: &[f64]) -> f64 {
        let u = args[0];
        match self {
            Func::Abs => u.abs(),
            Func::Sqrt => u.sqrt(),
            Func::Log => u.ln(),
            Func::Log10 => u.log10(),
            Func::Exp => u.exp(),
            Func::Pow => u.powf(args[1]),
            Func::Min => u.min(args[1]),
            Func::Max => u.max(args[1]),
            Func::Atan => u.atan(),
            Func::Atan2 => u.atan2(args[1]),
            Func::Erf => erf(u),
            Func::Sin => u.sin(),
            Func::Cos => u.cos(),
            Func::Tan => u.tan(),
            Func::Sinh => u.sinh(),
            Func::Cosh => u.cosh(),
            Func::Tanh => u.tanh(),
        }
    }
}

/// A parsed TFormula expression.
#[derive(Debug, Clone)]
pub struct Formula {
    root: Node,
    n_vars: usize,
    n_params: usize,
}

impl Formula {
    /// Parse an expression.
    pub fn compile(text: &str) -> Result<Self> {
        let toks = lex(text)?;
        let mut cur = Cursor { toks: &toks, at: 0, vars: 0, params: 0 };
        let root = cur.expr(1)?;
        if let Some(extra) = toks.get(cur.at) {
            return Err(bad(format!("trailing {extra:?} in '{text}'")));
        }
        Ok(Formula { root, n_vars: cur.vars, n_params: cur.params })
    }

    /// Number of variables referenced (highest of x=1, y=2, z=3, t=4).
    pub fn n_vars(&self) -> usize {
        self.n_vars
    }

    pub fn n_params(&self) -> usize {
        self.n_params
    }

    /// Evaluate with the given variable and parameter values.
    ///
    /// Callers must supply at least [`n_vars`](Self::n_vars) variables and
    /// [`n_params`](Self::n_params) parameters.
    pub fn eval(&self, vars: &[f64], params: &[f64]) -> f64 {
        walk(&self.root, vars, params)
    }
}

fn bad(msg: String) -> Error {
    Error::Correction(format!("formula: {msg}"))
}

fn truth(b: bool) -> f64 {
    if b { 1.0 } else { 0.0 }
}

fn walk(node: &Node, vars: &[f64], params: &[f64]) -> f64 {
    match node {
        Node::Const(v) => *v,
        Node::Input(i) => vars[*i],
        Node::Param(i) => params[*i],
        Node::Negate(inner) => -walk(inner, vars, params),
        Node::LogicalNot(inner) => truth(walk(inner, vars, params) == 0.0),
        Node::Binary(op, l, r) => op.apply(walk(l, vars, params), walk(r, vars, params)),
        Node::Apply(f, args) => {
            let mut vals = [0.0; 2];
            for (slot, a) in vals.iter_mut().zip(args) {
                *slot = walk(a, vars, params);
            }
            f.call(&vals[..args.len()])
        }
    }
}

/// Error function, W. J. Cody rational approximations (|rel err| < 1e-15).
fn erf(x: f64) -> f64 {
    if x.is_nan() {
        return f64::NAN;
    }
    let ax = x.abs();
    let r = if ax < 0.5 {
        const P: [f64; 5] = [
            3.209_377_589_138_469_5e3,
            3.774_852_376_853_020_2e2,
            1.138_641_541_510_501_6e2,
            3.161_123_743_870_565_6,
            1.857_777_061_846_031_5e-1,
        ];
        const Q: [f64; 5] = [
            2.844_236_833_439_170_6e3,
            1.282_616_526_077_372_3e3,
            2.440_246_379_344_441_7e2,
            2.360_129_095_234_412_1e1,
            1.0,
        ];
        let z = x * x;
        let num = P[0] + z * (P[1] + z * (P[2] + z * (P[3] + z * P[4])));
        let den = Q[0] + z * (Q[1] + z * (Q[2] + z * (Q[3] + z * Q[4])));
        return x * num / den;
    } else if ax < 4.0 {
        const P: [f64; 9] = [
            1.230_339_354_797_997_2e3,
            2.051_078_377_826_071_6e3,
            1.712_047_612_634_070_6e3,
            8.819_522_212_417_690_9e2,
            2.986_351_381_974_001_3e2,
            6.611_919_063_714_163e1,
            8.883_149_794_388_375_9,
            5.641_884_969_886_700_9e-1,
            2.153_115_354_744_038_5e-8,
        ];
        const Q: [f64; 9] = [
            1.230_339_354_803_749_4e3,
            3.439_367_674_143_721_6e3,
            4.362_619_090_143_247e3,
            3.290_799_235_733_459_7e3,
            1.621_389_574_566_690_2e3,
            5.371_811_018_620_098_6e2,
            1.176_939_508_913_125e2,
            1.574_492_611_070_983_5e1,
            1.0,
        ];
        let mut num = P[8];
        let mut den = Q[8];
        for i in (0..8).rev() {
            num = num * ax + P[i];
            den = den * ax + Q[i];
        }
        let erfc = (-ax * ax).exp() * num / den;
        1.0 - erfc
    } else {
        const P: [f64; 6] = [
            -6.587_491_615_298_378e-4,
            -1.608_378_514_874_227_5e-2,
            -1.257_817_261_112_292_6e-1,
            -3.603_448_999_498_044_4e-1,
            -3.053_266_349_612_323_4e-1,
            -1.631_538_713_730_709_6e-2,
        ];
        const Q: [f64; 6] = [
            2.335_204_976_268_691_8e-3,
            6.051_834_131_244_132e-2,
            5.279_051_029_514_284e-1,
            1.872_952_849_923_460_4,
            2.568_520_192_289_822,
            1.0,
        ];
        let z = 1.0 / (ax * ax);
        let mut num = P[5];
        let mut den = Q[5];
        for i in (0..5).rev() {
            num = num * z + P[i];
            den = den * z + Q[i];
        }
        const FRAC_1_SQRT_PI: f64 = 0.564_189_583_547_756_3;
        let erfc = (-ax * ax).exp() / ax * (FRAC_1_SQRT_PI + z * num / den);
        1.0 - erfc
    };
    if x < 0.0 { -r } else { r }
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Number(f64),
    Name(String),
    Slot(usize),
    Sym(&'static str),
}

// two-character symbols come first so `<=` is not read as `<`
const SYMBOLS: [&str; 17] =
    ["&&", "||", "==", "!=", "<=", ">=", "+", "-", "*", "/", "^", "(", ")", ",", "<", ">", "!"];

fn lex(text: &str) -> Result<Vec<Tok>> {
    let bytes = text.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while let Some(c) = text[i..].chars().next() {
        if c.is_whitespace() {
            i += c.len_utf8();
        } else if let Some(sym) = SYMBOLS.iter().find(|s| text[i..].starts_with(**s)) {
            out.push(Tok::Sym(*sym));
            i += sym.len();
        } else if c == '[' {
            let close = text[i..].find(']').map(|k| i + k);
            let digits = close.map(|k| &text[i + 1..k]).unwrap_or("");
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return Err(bad(format!("malformed parameter reference at offset {i}")));
            }
            let idx: usize = digits.parse().map_err(|_| bad(format!("invalid parameter index '{digits}'")))?;
            out.push(Tok::Slot(idx));
            i += digits.len() + 2;
        } else if c.is_ascii_digit() || c == '.' {
            let mut j = i;
            while let Some(&b) = bytes.get(j) {
                let exp_sign = (b == b'+' || b == b'-') && j > i && matches!(bytes[j - 1], b'e' | b'E');
                if !(b.is_ascii_digit() || matches!(b, b'.' | b'e' | b'E') || exp_sign) {
                    break;
                }
                j += 1;
            }
            let lit = &text[i..j];
            out.push(Tok::Number(lit.parse().map_err(|_| bad(format!("invalid number: '{lit}'")))?));
            i = j;
        } else if c.is_ascii_alphabetic() || c == '_' {
            let mut j = i;
            loop {
                while bytes.get(j).is_some_and(|b| b.is_ascii_alphanumeric() || *b == b'_') {
                    j += 1;
                }
                // namespace separator, as in TMath::Log
                if text[j..].starts_with("::") {
                    j += 2;
                } else {
                    break;
                }
            }
            out.push(Tok::Name(text[i..j].to_string()));
            i = j;
        } else {
            return Err(bad(format!("unexpected character: '{c}'")));
        }
    }
    Ok(out)
}

/// Precedence-climbing parser over the token stream. Tracks the highest
/// variable slot and parameter index seen.
struct Cursor<'t> {
    toks: &'t [Tok],
    at: usize,
    vars: usize,
    params: usize,
}

impl Cursor<'_> {
    fn sym(&self) -> Option<&'static str> {
        match self.toks.get(self.at) {
            Some(Tok::Sym(s)) => Some(s),
            _ => None,
        }
    }

    fn eat(&mut self, sym: &str) -> bool {
        let hit = self.sym() == Some(sym);
        if hit {
            self.at += 1;
        }
        hit
    }

    fn close_paren(&mut self) -> Result<()> {
        if self.eat(")") {
            Ok(())
        } else {
            Err(bad(format!("missing ')' before {:?}", self.toks.get(self.at))))
        }
    }

    fn expr(&mut self, min_binding: u8) -> Result<Node> {
        let mut lhs = self.prefix()?;
        while let Some(op) = self.sym().and_then(Op::infix) {
            let b = op.binding();
            if b < min_binding {
                break;
            }
            self.at += 1;
            let rhs = self.expr(b + 1)?;
            lhs = Node::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    // `-x^2` is `-(x^2)` and `2^3^2` is `2^(3^2)`
    fn prefix(&mut self) -> Result<Node> {
        if self.eat("-") {
            return Ok(Node::Negate(Box::new(self.prefix()?)));
        }
        if self.eat("+") {
            return self.prefix();
        }
        if self.eat("!") {
            return Ok(Node::LogicalNot(Box::new(self.prefix()?)));
        }
        let base = self.primary()?;
        if self.eat("^") {
            let exponent = self.prefix()?;
            return Ok(Node::Binary(Op::Pow, Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<Node> {
        let tok = self.toks.get(self.at).cloned();
        self.at += 1;
        match tok {
            Some(Tok::Number(v)) => Ok(Node::Const(v)),
            Some(Tok::Slot(i)) => {
                self.params = self.params.max(i + 1);
                Ok(Node::Param(i))
            }
            Some(Tok::Sym("(")) => {
                let inner = self.expr(1)?;
                self.close_paren()?;
                Ok(inner)
            }
            Some(Tok::Name(name)) if self.eat("(") => {
                let (func, arity) =
                    Func::lookup(&name).ok_or_else(|| bad(format!("unknown function: '{name}'")))?;
                let mut args = vec![self.expr(1)?];
                while self.eat(",") {
                    args.push(self.expr(1)?);
                }
                self.close_paren()?;
                if args.len() != arity {
                    return Err(bad(format!("function '{name}' takes {arity} argument(s), got {}", args.len())));
                }
                Ok(Node::Apply(func, args))
            }
            Some(Tok::Name(name)) => {
                let slot = match name.as_str() {
                    "x" => 0,
                    "y" => 1,
                    "z" => 2,
                    "t" => 3,
                    "pi" | "TMath::Pi" => return Ok(Node::Const(std::f64::consts::PI)),
                    _ => return Err(bad(format!("unknown variable: '{name}'"))),
                };
                self.vars = self.vars.max(slot + 1);
                Ok(Node::Input(slot))
            }
            other => Err(bad(format!("expected a value, got {other:?}"))),
        }
    }
}
