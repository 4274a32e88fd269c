//! Serde model of the correctionlib JSON schema (version 2).
//!
//! These types mirror the on-disk document one to one and are used both to
//! read correction files and to write the reweighting maps produced by the
//! analysis. Evaluation goes through the compiled form in [`crate::Correction`].

use serde::{Deserialize, Serialize};

/// Supported schema version.
pub const SCHEMA_VERSION: u32 = 2;

/// Top-level document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectionSetDoc {
    /// Schema version, must be 2.
    pub schema_version: u32,
    /// Free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Corrections.
    pub corrections: Vec<CorrectionDoc>,
    /// Compound corrections (ordered stacks of corrections).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub compound_corrections: Vec<CompoundCorrectionDoc>,
}

impl CorrectionSetDoc {
    /// New document holding the given corrections.
    pub fn new(description: impl Into<String>, corrections: Vec<CorrectionDoc>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            description: Some(description.into()),
            corrections,
            compound_corrections: Vec::new(),
        }
    }
}

/// Declared type of an input or output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VarType {
    /// Floating point
    Real,
    /// Integer
    Int,
    /// String
    String,
}

/// Input or output variable declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variable {
    /// Variable name.
    pub name: String,
    /// Variable type.
    #[serde(rename = "type")]
    pub ty: VarType,
    /// Description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Variable {
    /// Real-valued variable.
    pub fn real(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self { name: name.into(), ty: VarType::Real, description: Some(description.into()) }
    }

    /// String-valued variable.
    pub fn string(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self { name: name.into(), ty: VarType::String, description: Some(description.into()) }
    }
}

/// A single correction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectionDoc {
    /// Correction name.
    pub name: String,
    /// Description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Version number.
    #[serde(default)]
    pub version: i64,
    /// Inputs, in positional order.
    pub inputs: Vec<Variable>,
    /// Output declaration.
    pub output: Variable,
    /// Shared formulas referenced by `formularef` nodes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub generic_formulas: Vec<FormulaNode>,
    /// Root content node.
    pub data: Content,
}

/// A compound correction: an ordered stack of corrections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompoundCorrectionDoc {
    /// Name.
    pub name: String,
    /// Description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Inputs of the compound.
    pub inputs: Vec<Variable>,
    /// Output declaration.
    pub output: Variable,
    /// Inputs updated with each stage output.
    pub inputs_update: Vec<String>,
    /// Operation combining an updated input with a stage output.
    pub input_op: UpdateOp,
    /// Operation combining stage outputs.
    pub output_op: UpdateOp,
    /// Names of the stacked corrections, in evaluation order.
    pub stack: Vec<String>,
}

/// Combination operator for compound corrections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateOp {
    /// Sum
    #[serde(rename = "+")]
    Add,
    /// Product
    #[serde(rename = "*")]
    Multiply,
    /// Quotient
    #[serde(rename = "/")]
    Divide,
    /// Keep only the latest stage output
    #[serde(rename = "last")]
    Last,
}

impl UpdateOp {
    /// Apply `acc op x`.
    pub fn apply(self, acc: f64, x: f64) -> f64 {
        match self {
            UpdateOp::Add => acc + x,
            UpdateOp::Multiply => acc * x,
            UpdateOp::Divide => acc / x,
            UpdateOp::Last => x,
        }
    }
}

/// Any content: a constant or a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    /// Constant value.
    Number(f64),
    /// Structured node.
    Node(Box<Node>),
}

impl Content {
    /// Category node keyed by strings.
    pub fn category(input: impl Into<String>, items: Vec<(String, Content)>) -> Self {
        Content::Node(Box::new(Node::Category(CategoryNode {
            input: input.into(),
            content: items
                .into_iter()
                .map(|(k, value)| CategoryItem { key: CategoryKey::Str(k), value })
                .collect(),
            default: None,
        })))
    }

    /// Multi-dimensional binning with explicit edges and row-major constants.
    pub fn multibinning(inputs: Vec<String>, edges: Vec<Vec<f64>>, values: Vec<f64>, flow: Flow) -> Self {
        Content::Node(Box::new(Node::MultiBinning(MultiBinningNode {
            inputs,
            edges: edges.into_iter().map(Edges::Explicit).collect(),
            content: values.into_iter().map(Content::Number).collect(),
            flow,
        })))
    }
}

/// Structured content node, tagged by `nodetype`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "nodetype", rename_all = "lowercase")]
pub enum Node {
    /// 1D binning
    Binning(BinningNode),
    /// N-D binning
    MultiBinning(MultiBinningNode),
    /// Discrete lookup
    Category(CategoryNode),
    /// Inline formula
    Formula(FormulaNode),
    /// Reference to a generic formula
    FormulaRef(FormulaRefNode),
    /// Input rewrite
    Transform(TransformNode),
    /// Deterministic pseudo-random draw
    HashPrng(HashPrngNode),
}

/// Bin edges: explicit list or uniform grid.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Edges {
    /// Monotonically increasing edges.
    Explicit(Vec<f64>),
    /// `n` equal bins in `[low, high)`.
    Uniform {
        /// Number of bins.
        n: usize,
        /// Lower edge.
        low: f64,
        /// Upper edge.
        high: f64,
    },
}

/// Behaviour for inputs outside the binning range.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Flow {
    /// `clamp` or `error`.
    Mode(FlowMode),
    /// Evaluate this content instead.
    Content(Content),
}

/// Named flow behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowMode {
    /// Use the nearest bin.
    Clamp,
    /// Fail the evaluation.
    Error,
}

/// 1D binning node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinningNode {
    /// Input name.
    pub input: String,
    /// Edges.
    pub edges: Edges,
    /// One content per bin.
    pub content: Vec<Content>,
    /// Flow behaviour.
    pub flow: Flow,
}

/// N-D binning node; content is row-major with the last input fastest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiBinningNode {
    /// Input names.
    pub inputs: Vec<String>,
    /// Edges per input.
    pub edges: Vec<Edges>,
    /// Flattened content.
    pub content: Vec<Content>,
    /// Flow behaviour.
    pub flow: Flow,
}

/// Category key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CategoryKey {
    /// Integer key
    Int(i64),
    /// String key
    Str(String),
}

/// One category entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryItem {
    /// Key.
    pub key: CategoryKey,
    /// Value.
    pub value: Content,
}

/// Category node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryNode {
    /// Input name.
    pub input: String,
    /// Entries.
    pub content: Vec<CategoryItem>,
    /// Fallback when no key matches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Content>,
}

/// Formula node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormulaNode {
    /// Expression text.
    pub expression: String,
    /// Parser dialect; only `TFormula` is supported.
    pub parser: String,
    /// Input names bound to `x`, `y`, `z`, `t`.
    pub variables: Vec<String>,
    /// Parameter values for `[i]`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<f64>,
}

/// Reference to a generic formula with its parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormulaRefNode {
    /// Index into `generic_formulas`.
    pub index: usize,
    /// Parameter values.
    pub parameters: Vec<f64>,
}

/// Transform node: rewrite one input, then evaluate content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformNode {
    /// Input to rewrite.
    pub input: String,
    /// Content producing the new input value.
    pub rule: Content,
    /// Content evaluated with the rewritten input.
    pub content: Content,
}

/// Distribution drawn by `hashprng`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrngDistribution {
    /// Uniform in [0, 1)
    StdFlat,
    /// Standard normal
    StdNormal,
    /// Standard normal (alias)
    Normal,
}

/// Hash-seeded pseudo-random node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashPrngNode {
    /// Inputs feeding the hash.
    pub inputs: Vec<String>,
    /// Distribution.
    pub distribution: PrngDistribution,
}
