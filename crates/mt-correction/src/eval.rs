//! Compiled corrections and their evaluation.

use std::collections::HashMap;
use std::hash::Hasher;

use mt_core::{Error, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, StandardNormal};

use crate::formula::Formula;
use crate::schema::{
    CategoryKey, CompoundCorrectionDoc, Content, CorrectionDoc, Edges, Flow, FlowMode, FormulaNode,
    Node as DocNode, PrngDistribution, UpdateOp, VarType, Variable,
};
use crate::{InputBag, Value};

/// A correction ready for evaluation.
#[derive(Debug, Clone)]
pub struct Correction {
    name: String,
    description: Option<String>,
    inputs: Vec<Variable>,
    output: Variable,
    root: Node,
}

#[derive(Debug, Clone)]
enum Node {
    Const(f64),
    Binning {
        input: usize,
        edges: BinEdges,
        content: Vec<Node>,
        flow: NodeFlow,
    },
    MultiBinning {
        inputs: Vec<usize>,
        edges: Vec<BinEdges>,
        strides: Vec<usize>,
        content: Vec<Node>,
        flow: NodeFlow,
    },
    Category {
        input: usize,
        int_keys: HashMap<i64, usize>,
        str_keys: HashMap<String, usize>,
        content: Vec<Node>,
        default: Option<Box<Node>>,
    },
    Formula {
        formula: Formula,
        vars: Vec<usize>,
        params: Vec<f64>,
    },
    Transform {
        input: usize,
        rule: Box<Node>,
        content: Box<Node>,
    },
    HashPrng {
        inputs: Vec<usize>,
        distribution: PrngDistribution,
    },
}

#[derive(Debug, Clone)]
enum NodeFlow {
    Clamp,
    Error,
    Default(Box<Node>),
}

#[derive(Debug, Clone)]
enum BinEdges {
    Uniform { n: usize, low: f64, high: f64 },
    Explicit(Vec<f64>),
}

impl BinEdges {
    fn from_doc(e: &Edges) -> Result<Self> {
        match e {
            Edges::Uniform { n, low, high } => {
                if *n == 0 || !(high > low) {
                    return Err(Error::Correction(format!(
                        "invalid uniform binning n={n} low={low} high={high}"
                    )));
                }
                Ok(BinEdges::Uniform { n: *n, low: *low, high: *high })
            }
            Edges::Explicit(v) => {
                if v.len() < 2 || v.windows(2).any(|w| !(w[1] > w[0])) {
                    return Err(Error::Correction(
                        "bin edges must be strictly increasing with at least two entries".into(),
                    ));
                }
                Ok(BinEdges::Explicit(v.clone()))
            }
        }
    }

    fn n_bins(&self) -> usize {
        match self {
            BinEdges::Uniform { n, .. } => *n,
            BinEdges::Explicit(v) => v.len() - 1,
        }
    }

    /// Bin index, or `Err(below)` when out of range.
    fn locate(&self, x: f64) -> std::result::Result<usize, bool> {
        match self {
            BinEdges::Uniform { n, low, high } => {
                if x < *low {
                    return Err(true);
                }
                if x >= *high {
                    return Err(false);
                }
                let i = ((x - low) / (high - low) * *n as f64) as usize;
                Ok(i.min(n - 1))
            }
            BinEdges::Explicit(edges) => {
                if x < edges[0] {
                    return Err(true);
                }
                if x >= edges[edges.len() - 1] {
                    return Err(false);
                }
                // first edge strictly greater than x, minus one
                Ok(edges.partition_point(|e| *e <= x) - 1)
            }
        }
    }
}

fn input_index(inputs: &[Variable], name: &str, correction: &str) -> Result<usize> {
    inputs
        .iter()
        .position(|v| v.name == name)
        .ok_or_else(|| Error::Correction(format!("'{correction}': node refers to unknown input '{name}'")))
}

struct Compiler<'a> {
    name: &'a str,
    inputs: &'a [Variable],
    generic: Vec<(Formula, Vec<usize>)>,
}

impl<'a> Compiler<'a> {
    fn formula(&self, node: &FormulaNode) -> Result<(Formula, Vec<usize>)> {
        if node.parser != "TFormula" {
            return Err(Error::Correction(format!(
                "'{}': unsupported formula parser '{}'",
                self.name, node.parser
            )));
        }
        let formula = Formula::compile(&node.expression)?;
        let vars = node
            .variables
            .iter()
            .map(|v| input_index(self.inputs, v, self.name))
            .collect::<Result<Vec<_>>>()?;
        if formula.n_vars() > vars.len() {
            return Err(Error::Correction(format!(
                "'{}': formula '{}' uses {} variable(s) but declares {}",
                self.name,
                node.expression,
                formula.n_vars(),
                vars.len()
            )));
        }
        Ok((formula, vars))
    }

    fn check_params(&self, formula: &Formula, params: &[f64]) -> Result<()> {
        if formula.n_params() > params.len() {
            return Err(Error::Correction(format!(
                "'{}': formula needs {} parameter(s), got {}",
                self.name,
                formula.n_params(),
                params.len()
            )));
        }
        Ok(())
    }

    fn flow(&self, flow: &Flow) -> Result<NodeFlow> {
        Ok(match flow {
            Flow::Mode(FlowMode::Clamp) => NodeFlow::Clamp,
            Flow::Mode(FlowMode::Error) => NodeFlow::Error,
            Flow::Content(c) => NodeFlow::Default(Box::new(self.content(c)?)),
        })
    }

    fn content(&self, c: &Content) -> Result<Node> {
        match c {
            Content::Number(v) => Ok(Node::Const(*v)),
            Content::Node(n) => self.node(n),
        }
    }

    fn node(&self, n: &DocNode) -> Result<Node> {
        match n {
            DocNode::Binning(b) => {
                let edges = BinEdges::from_doc(&b.edges)?;
                if b.content.len() != edges.n_bins() {
                    return Err(Error::Correction(format!(
                        "'{}': binning on '{}' has {} bins but {} contents",
                        self.name,
                        b.input,
                        edges.n_bins(),
                        b.content.len()
                    )));
                }
                Ok(Node::Binning {
                    input: input_index(self.inputs, &b.input, self.name)?,
                    edges,
                    content: b.content.iter().map(|c| self.content(c)).collect::<Result<_>>()?,
                    flow: self.flow(&b.flow)?,
                })
            }
            DocNode::MultiBinning(m) => {
                if m.inputs.len() != m.edges.len() || m.inputs.is_empty() {
                    return Err(Error::Correction(format!(
                        "'{}': multibinning has {} inputs and {} edge sets",
                        self.name,
                        m.inputs.len(),
                        m.edges.len()
                    )));
                }
                let edges = m.edges.iter().map(BinEdges::from_doc).collect::<Result<Vec<_>>>()?;
                let mut strides = vec![1usize; edges.len()];
                for d in (0..edges.len().saturating_sub(1)).rev() {
                    strides[d] = strides[d + 1] * edges[d + 1].n_bins();
                }
                let total: usize = edges.iter().map(BinEdges::n_bins).product();
                if total != m.content.len() {
                    return Err(Error::Correction(format!(
                        "'{}': multibinning expects {total} contents, got {}",
                        self.name,
                        m.content.len()
                    )));
                }
                Ok(Node::MultiBinning {
                    inputs: m
                        .inputs
                        .iter()
                        .map(|i| input_index(self.inputs, i, self.name))
                        .collect::<Result<_>>()?,
                    edges,
                    strides,
                    content: m.content.iter().map(|c| self.content(c)).collect::<Result<_>>()?,
                    flow: self.flow(&m.flow)?,
                })
            }
            DocNode::Category(cat) => {
                let input = input_index(self.inputs, &cat.input, self.name)?;
                let mut int_keys = HashMap::new();
                let mut str_keys = HashMap::new();
                let mut content = Vec::with_capacity(cat.content.len());
                for (i, item) in cat.content.iter().enumerate() {
                    match &item.key {
                        CategoryKey::Int(k) => int_keys.insert(*k, i),
                        CategoryKey::Str(k) => str_keys.insert(k.clone(), i),
                    };
                    content.push(self.content(&item.value)?);
                }
                let default = match &cat.default {
                    Some(d) => Some(Box::new(self.content(d)?)),
                    None => None,
                };
                Ok(Node::Category { input, int_keys, str_keys, content, default })
            }
            DocNode::Formula(f) => {
                let (formula, vars) = self.formula(f)?;
                self.check_params(&formula, &f.parameters)?;
                Ok(Node::Formula { formula, vars, params: f.parameters.clone() })
            }
            DocNode::FormulaRef(r) => {
                let (formula, vars) = self.generic.get(r.index).cloned().ok_or_else(|| {
                    Error::Correction(format!(
                        "'{}': formularef index {} out of range",
                        self.name, r.index
                    ))
                })?;
                self.check_params(&formula, &r.parameters)?;
                Ok(Node::Formula { formula, vars, params: r.parameters.clone() })
            }
            DocNode::Transform(t) => Ok(Node::Transform {
                input: input_index(self.inputs, &t.input, self.name)?,
                rule: Box::new(self.content(&t.rule)?),
                content: Box::new(self.content(&t.content)?),
            }),
            DocNode::HashPrng(h) => Ok(Node::HashPrng {
                inputs: h
                    .inputs
                    .iter()
                    .map(|i| input_index(self.inputs, i, self.name))
                    .collect::<Result<_>>()?,
                distribution: h.distribution,
            }),
        }
    }
}

impl Correction {
    /// Compile a correction document.
    pub fn compile(doc: &CorrectionDoc) -> Result<Self> {
        let mut compiler = Compiler { name: &doc.name, inputs: &doc.inputs, generic: Vec::new() };
        let mut generic = Vec::with_capacity(doc.generic_formulas.len());
        for g in &doc.generic_formulas {
            generic.push(compiler.formula(g)?);
        }
        compiler.generic = generic;
        let root = compiler.content(&doc.data)?;
        Ok(Self {
            name: doc.name.clone(),
            description: doc.description.clone(),
            inputs: doc.inputs.clone(),
            output: doc.output.clone(),
            root,
        })
    }

    /// Correction name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Description, if any.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Declared inputs in positional order.
    pub fn inputs(&self) -> &[Variable] {
        &self.inputs
    }

    /// Output declaration.
    pub fn output(&self) -> &Variable {
        &self.output
    }

    /// Evaluate with positional inputs.
    pub fn evaluate(&self, args: &[Value]) -> Result<f64> {
        if args.len() != self.inputs.len() {
            return Err(Error::Correction(format!(
                "'{}' expects {} inputs ({}), got {}",
                self.name,
                self.inputs.len(),
                self.inputs.iter().map(|v| v.name.as_str()).collect::<Vec<_>>().join(", "),
                args.len()
            )));
        }
        let mut values = Vec::with_capacity(args.len());
        for (decl, v) in self.inputs.iter().zip(args) {
            values.push(coerce(&self.name, decl, v)?);
        }
        eval_node(&self.name, &self.inputs, &self.root, &values)
    }

    /// Evaluate with inputs looked up by name.
    pub fn evaluate_named(&self, bag: &InputBag) -> Result<f64> {
        let args = self
            .inputs
            .iter()
            .map(|decl| {
                bag.get(&decl.name).cloned().ok_or_else(|| {
                    Error::Correction(format!("'{}': missing input '{}'", self.name, decl.name))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        self.evaluate(&args)
    }
}

fn coerce(name: &str, decl: &Variable, v: &Value) -> Result<Value> {
    match (decl.ty, v) {
        (VarType::Real, Value::Real(_)) | (VarType::Int, Value::Int(_)) | (VarType::String, Value::Str(_)) => {
            Ok(v.clone())
        }
        (VarType::Real, Value::Int(i)) => Ok(Value::Real(*i as f64)),
        (VarType::Int, Value::Real(x)) if x.fract() == 0.0 => Ok(Value::Int(*x as i64)),
        _ => Err(Error::Correction(format!(
            "'{name}': input '{}' expects {:?}, got {v:?}",
            decl.name, decl.ty
        ))),
    }
}

fn real_at(name: &str, decls: &[Variable], values: &[Value], i: usize) -> Result<f64> {
    match &values[i] {
        Value::Real(x) => Ok(*x),
        Value::Int(k) => Ok(*k as f64),
        Value::Str(s) => Err(Error::Correction(format!(
            "'{name}': input '{}' is used numerically but holds string '{s}'",
            decls[i].name
        ))),
    }
}

fn locate_with_flow(
    name: &str,
    decls: &[Variable],
    edges: &BinEdges,
    input: usize,
    x: f64,
    flow: &NodeFlow,
) -> Result<Option<usize>> {
    if x.is_nan() {
        return Err(Error::Correction(format!("'{name}': input '{}' is NaN", decls[input].name)));
    }
    match edges.locate(x) {
        Ok(i) => Ok(Some(i)),
        Err(below) => match flow {
            NodeFlow::Clamp => Ok(Some(if below { 0 } else { edges.n_bins() - 1 })),
            NodeFlow::Default(_) => Ok(None),
            NodeFlow::Error => Err(Error::Correction(format!(
                "'{name}': value {x} of input '{}' is out of range",
                decls[input].name
            ))),
        },
    }
}

fn eval_node(name: &str, decls: &[Variable], node: &Node, values: &[Value]) -> Result<f64> {
    match node {
        Node::Const(v) => Ok(*v),
        Node::Binning { input, edges, content, flow } => {
            let x = real_at(name, decls, values, *input)?;
            match locate_with_flow(name, decls, edges, *input, x, flow)? {
                Some(i) => eval_node(name, decls, &content[i], values),
                None => match flow {
                    NodeFlow::Default(d) => eval_node(name, decls, d, values),
                    _ => unreachable!("only default flow defers"),
                },
            }
        }
        Node::MultiBinning { inputs, edges, strides, content, flow } => {
            let mut idx = 0usize;
            for (d, input) in inputs.iter().enumerate() {
                let x = real_at(name, decls, values, *input)?;
                match locate_with_flow(name, decls, &edges[d], *input, x, flow)? {
                    Some(i) => idx += i * strides[d],
                    None => {
                        if let NodeFlow::Default(dflt) = flow {
                            return eval_node(name, decls, dflt, values);
                        }
                    }
                }
            }
            eval_node(name, decls, &content[idx], values)
        }
        Node::Category { input, int_keys, str_keys, content, default } => {
            let hit = match &values[*input] {
                Value::Int(k) => int_keys.get(k),
                Value::Str(s) => str_keys.get(s),
                Value::Real(x) => {
                    return Err(Error::Correction(format!(
                        "'{name}': category input '{}' must be int or string, got {x}",
                        decls[*input].name
                    )));
                }
            };
            match (hit, default) {
                (Some(i), _) => eval_node(name, decls, &content[*i], values),
                (None, Some(d)) => eval_node(name, decls, d, values),
                (None, None) => Err(Error::Correction(format!(
                    "'{name}': no category for {} = {:?}",
                    decls[*input].name, values[*input]
                ))),
            }
        }
        Node::Formula { formula, vars, params } => {
            let xs = vars
                .iter()
                .map(|i| real_at(name, decls, values, *i))
                .collect::<Result<Vec<_>>>()?;
            Ok(formula.eval(&xs, params))
        }
        Node::Transform { input, rule, content } => {
            let new_value = eval_node(name, decls, rule, values)?;
            let mut rewritten = values.to_vec();
            rewritten[*input] = match decls[*input].ty {
                VarType::Int => Value::Int(new_value.round() as i64),
                VarType::Real => Value::Real(new_value),
                VarType::String => {
                    return Err(Error::Correction(format!(
                        "'{name}': transform cannot rewrite string input '{}'",
                        decls[*input].name
                    )));
                }
            };
            eval_node(name, decls, content, &rewritten)
        }
        Node::HashPrng { inputs, distribution } => {
            let mut hasher = twox_hash::XxHash64::with_seed(0);
            for i in inputs {
                match &values[*i] {
                    Value::Real(x) => hasher.write(&x.to_le_bytes()),
                    Value::Int(k) => hasher.write(&k.to_le_bytes()),
                    Value::Str(s) => hasher.write(s.as_bytes()),
                }
            }
            let mut rng = StdRng::seed_from_u64(hasher.finish());
            Ok(match distribution {
                PrngDistribution::StdFlat => rng.random::<f64>(),
                PrngDistribution::StdNormal | PrngDistribution::Normal => StandardNormal.sample(&mut rng),
            })
        }
    }
}

/// A compiled compound correction referencing corrections of its set.
#[derive(Debug, Clone)]
pub struct CompoundCorrection {
    name: String,
    inputs: Vec<Variable>,
    inputs_update: Vec<usize>,
    input_op: UpdateOp,
    output_op: UpdateOp,
    stack: Vec<(Correction, Vec<usize>)>,
}

impl CompoundCorrection {
    pub(crate) fn compile(doc: &CompoundCorrectionDoc, lookup: &HashMap<String, Correction>) -> Result<Self> {
        let mut stack = Vec::with_capacity(doc.stack.len());
        for stage in &doc.stack {
            let corr = lookup.get(stage).ok_or_else(|| {
                Error::Correction(format!("compound '{}': unknown stage '{stage}'", doc.name))
            })?;
            let map = corr
                .inputs()
                .iter()
                .map(|v| input_index(&doc.inputs, &v.name, &doc.name))
                .collect::<Result<Vec<_>>>()?;
            stack.push((corr.clone(), map));
        }
        let inputs_update = doc
            .inputs_update
            .iter()
            .map(|n| input_index(&doc.inputs, n, &doc.name))
            .collect::<Result<Vec<_>>>()?;
        for &i in &inputs_update {
            if doc.inputs[i].ty != VarType::Real {
                return Err(Error::Correction(format!(
                    "compound '{}': updated input '{}' must be real",
                    doc.name, doc.inputs[i].name
                )));
            }
        }
        Ok(Self {
            name: doc.name.clone(),
            inputs: doc.inputs.clone(),
            inputs_update,
            input_op: doc.input_op,
            output_op: doc.output_op,
            stack,
        })
    }

    /// Compound name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared inputs.
    pub fn inputs(&self) -> &[Variable] {
        &self.inputs
    }

    /// Evaluate with positional inputs.
    pub fn evaluate(&self, args: &[Value]) -> Result<f64> {
        if args.len() != self.inputs.len() {
            return Err(Error::Correction(format!(
                "compound '{}' expects {} inputs, got {}",
                self.name,
                self.inputs.len(),
                args.len()
            )));
        }
        let mut values = Vec::with_capacity(args.len());
        for (decl, v) in self.inputs.iter().zip(args) {
            values.push(coerce(&self.name, decl, v)?);
        }
        let mut out = match self.output_op {
            UpdateOp::Add => 0.0,
            _ => 1.0,
        };
        for (corr, map) in &self.stack {
            let stage_args: Vec<Value> = map.iter().map(|&i| values[i].clone()).collect();
            let stage_out = corr.evaluate(&stage_args)?;
            for &i in &self.inputs_update {
                if let Value::Real(x) = values[i] {
                    values[i] = Value::Real(self.input_op.apply(x, stage_out));
                }
            }
            out = self.output_op.apply(out, stage_out);
        }
        Ok(out)
    }

    /// Evaluate with inputs looked up by name.
    pub fn evaluate_named(&self, bag: &InputBag) -> Result<f64> {
        let args = self
            .inputs
            .iter()
            .map(|decl| {
                bag.get(&decl.name).cloned().ok_or_else(|| {
                    Error::Correction(format!("compound '{}': missing input '{}'", self.name, decl.name))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        self.evaluate(&args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn compile(json: &str) -> Correction {
        let doc: CorrectionDoc = serde_json::from_str(json).unwrap();
        Correction::compile(&doc).unwrap()
    }

    fn jer_sf() -> Correction {
        compile(
            r#"{
            "name": "JER_SF", "version": 1,
            "inputs": [{"name": "JetEta", "type": "real"}, {"name": "systematic", "type": "string"}],
            "output": {"name": "sf", "type": "real"},
            "data": {"nodetype": "category", "input": "systematic", "content": [
                {"key": "nom", "value": {"nodetype": "binning", "input": "JetEta",
                    "edges": [-2.5, -1.0, 0.0, 1.0, 2.5], "content": [1.15, 1.10, 1.10, 1.15], "flow": "clamp"}},
                {"key": "up", "value": {"nodetype": "binning", "input": "JetEta",
                    "edges": {"n": 2, "low": -2.5, "high": 2.5}, "content": [1.2, 1.2], "flow": "error"}}
            ]}
        }"#,
        )
    }

    #[test]
    fn binning_lookup_and_clamp() {
        let c = jer_sf();
        assert_eq!(c.evaluate(&[0.5.into(), "nom".into()]).unwrap(), 1.10);
        assert_eq!(c.evaluate(&[(-1.0).into(), "nom".into()]).unwrap(), 1.10);
        assert_eq!(c.evaluate(&[(-1.5).into(), "nom".into()]).unwrap(), 1.15);
        // clamped on both sides, including the upper edge itself
        assert_eq!(c.evaluate(&[4.0.into(), "nom".into()]).unwrap(), 1.15);
        assert_eq!(c.evaluate(&[2.5.into(), "nom".into()]).unwrap(), 1.15);
        assert_eq!(c.evaluate(&[(-9.0).into(), "nom".into()]).unwrap(), 1.15);
    }

    #[test]
    fn error_flow_and_bad_inputs() {
        let c = jer_sf();
        assert_eq!(c.evaluate(&[0.1.into(), "up".into()]).unwrap(), 1.2);
        let err = c.evaluate(&[3.0.into(), "up".into()]).unwrap_err();
        assert!(err.to_string().contains("out of range"), "{err}");
        assert!(c.evaluate(&[0.1.into(), "down".into()]).is_err());
        assert!(c.evaluate(&["x".into(), "nom".into()]).is_err());
        assert!(c.evaluate(&[0.1.into()]).is_err());
        assert!(c.evaluate(&[f64::NAN.into(), "nom".into()]).is_err());
    }

    #[test]
    fn named_inputs_ignore_extras() {
        let c = jer_sf();
        let bag = InputBag::new().real("JetEta", -0.5).string("systematic", "nom").real("JetPt", 400.0);
        assert_eq!(c.evaluate_named(&bag).unwrap(), 1.10);
        let bag = InputBag::new().real("JetEta", -0.5);
        assert!(c.evaluate_named(&bag).unwrap_err().to_string().contains("systematic"));
    }

    #[test]
    fn multibinning_row_major() {
        let c = compile(
            r#"{
            "name": "map", "inputs": [{"name": "pt", "type": "real"}, {"name": "eta", "type": "real"}],
            "output": {"name": "w", "type": "real"},
            "data": {"nodetype": "multibinning", "inputs": ["pt", "eta"],
                "edges": [[0, 100, 200], [0, 1, 2, 3]],
                "content": [1, 2, 3, 4, 5, 6], "flow": 0.5}
        }"#,
        );
        assert_eq!(c.evaluate(&[50.0.into(), 0.5.into()]).unwrap(), 1.0);
        assert_eq!(c.evaluate(&[50.0.into(), 2.5.into()]).unwrap(), 3.0);
        assert_eq!(c.evaluate(&[150.0.into(), 1.5.into()]).unwrap(), 5.0);
        assert_eq!(c.evaluate(&[250.0.into(), 1.5.into()]).unwrap(), 0.5);
        assert_eq!(c.evaluate(&[150.0.into(), (-1.0).into()]).unwrap(), 0.5);
    }

    #[test]
    fn integer_category_with_default() {
        let c = compile(
            r#"{
            "name": "prescale", "inputs": [{"name": "run", "type": "int"}],
            "output": {"name": "w", "type": "real"},
            "data": {"nodetype": "category", "input": "run",
                "content": [{"key": 355100, "value": 12.0}], "default": 1.0}
        }"#,
        );
        assert_eq!(c.evaluate(&[Value::Int(355100)]).unwrap(), 12.0);
        assert_eq!(c.evaluate(&[Value::Real(355100.0)]).unwrap(), 12.0);
        assert_eq!(c.evaluate(&[Value::Int(1)]).unwrap(), 1.0);
        assert!(c.evaluate(&[Value::Real(3.5)]).is_err());
    }

    #[test]
    fn formula_formularef_and_transform() {
        let c = compile(
            r#"{
            "name": "res", "inputs": [{"name": "pt", "type": "real"}, {"name": "eta", "type": "real"}],
            "output": {"name": "r", "type": "real"},
            "generic_formulas": [{"nodetype": "formula", "expression": "[0]+[1]/x",
                "parser": "TFormula", "variables": ["pt"]}],
            "data": {"nodetype": "transform", "input": "eta",
                "rule": {"nodetype": "formula", "expression": "abs(x)", "parser": "TFormula", "variables": ["eta"]},
                "content": {"nodetype": "binning", "input": "eta", "edges": [0, 1.3, 5],
                    "content": [
                        {"nodetype": "formularef", "index": 0, "parameters": [0.02, 2.0]},
                        {"nodetype": "formula", "expression": "[0]*x+y", "parser": "TFormula",
                         "variables": ["pt", "eta"], "parameters": [0.001]}
                    ], "flow": "clamp"}}
        }"#,
        );
        assert_relative_eq!(c.evaluate(&[100.0.into(), (-0.5).into()]).unwrap(), 0.04);
        assert_relative_eq!(c.evaluate(&[100.0.into(), (-2.0).into()]).unwrap(), 2.1);
    }

    #[test]
    fn hashprng_is_deterministic() {
        let c = compile(
            r#"{
            "name": "smear", "inputs": [{"name": "event", "type": "int"}, {"name": "pt", "type": "real"}],
            "output": {"name": "r", "type": "real"},
            "data": {"nodetype": "hashprng", "inputs": ["event", "pt"], "distribution": "stdflat"}
        }"#,
        );
        let a = c.evaluate(&[Value::Int(42), 30.0.into()]).unwrap();
        let b = c.evaluate(&[Value::Int(42), 30.0.into()]).unwrap();
        let d = c.evaluate(&[Value::Int(43), 30.0.into()]).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, d);
        assert!((0.0..1.0).contains(&a));
    }

    #[test]
    fn compile_rejects_inconsistent_nodes() {
        let doc: CorrectionDoc = serde_json::from_str(
            r#"{"name": "bad", "inputs": [{"name": "pt", "type": "real"}],
                "output": {"name": "w", "type": "real"},
                "data": {"nodetype": "binning", "input": "pt", "edges": [0, 1, 2], "content": [1.0], "flow": "clamp"}}"#,
        )
        .unwrap();
        assert!(Correction::compile(&doc).is_err());

        let doc: CorrectionDoc = serde_json::from_str(
            r#"{"name": "bad", "inputs": [{"name": "pt", "type": "real"}],
                "output": {"name": "w", "type": "real"},
                "data": {"nodetype": "binning", "input": "eta", "edges": [0, 1], "content": [1.0], "flow": "clamp"}}"#,
        )
        .unwrap();
        let err = Correction::compile(&doc).unwrap_err();
        assert!(err.to_string().contains("unknown input 'eta'"));
    }
}
