//! Dense map → correction conversion.

use mt_core::{Error, Result};

use crate::schema::{BinningNode, Content, CorrectionDoc, Edges, Flow, FlowMode, Node, Variable};

/// A dense table of values over string-category axes followed by binned
/// axes, the shape of a histogram with category axes.
#[derive(Debug, Clone)]
pub struct DenseMap {
    /// Correction name.
    pub name: String,
    /// Correction description.
    pub description: Option<String>,
    /// Output variable name.
    pub output: String,
    /// Category axes: input name and ordered keys.
    pub categories: Vec<(String, Vec<String>)>,
    /// Binned axes: input name and bin edges.
    pub dense: Vec<(String, Vec<f64>)>,
    /// Values, row-major over `categories` then `dense` (last axis fastest).
    pub values: Vec<f64>,
}

impl DenseMap {
    fn expected_len(&self) -> usize {
        let ncat: usize = self.categories.iter().map(|(_, k)| k.len()).product();
        let ndense: usize = self.dense.iter().map(|(_, e)| e.len().saturating_sub(1)).product();
        ncat * ndense
    }
}

/// Build a correction from a dense map.
///
/// Category axes become nested `category` nodes (in axis order), the binned
/// axes a single `multibinning` leaf (or `binning` for one axis). Values
/// outside the binned range are clamped to the edge bins.
pub fn from_histogram(map: &DenseMap) -> Result<CorrectionDoc> {
    if map.dense.is_empty() {
        return Err(Error::Correction(format!("'{}': at least one binned axis is required", map.name)));
    }
    for (name, edges) in &map.dense {
        if edges.len() < 2 || edges.windows(2).any(|w| w[1] <= w[0]) {
            return Err(Error::Correction(format!(
                "'{}': edges of axis '{name}' must be increasing with at least one bin",
                map.name
            )));
        }
    }
    if map.values.len() != map.expected_len() {
        return Err(Error::Correction(format!(
            "'{}': {} values for a map of {} cells",
            map.name,
            map.values.len(),
            map.expected_len()
        )));
    }

    let leaf_len: usize = map.dense.iter().map(|(_, e)| e.len() - 1).product();
    let data = build_level(map, 0, &map.values, leaf_len);

    let mut inputs: Vec<Variable> =
        map.categories.iter().map(|(n, _)| Variable::string(n.clone(), format!("{n} category"))).collect();
    inputs.extend(map.dense.iter().map(|(n, _)| Variable::real(n.clone(), n.clone())));

    Ok(CorrectionDoc {
        name: map.name.clone(),
        description: map.description.clone(),
        version: 0,
        inputs,
        output: Variable::real(map.output.clone(), "correction factor"),
        generic_formulas: Vec::new(),
        data,
    })
}

fn build_level(map: &DenseMap, level: usize, values: &[f64], leaf_len: usize) -> Content {
    let Some((input, keys)) = map.categories.get(level) else {
        let (inputs, edges): (Vec<String>, Vec<Vec<f64>>) = map.dense.iter().cloned().unzip();
        return if inputs.len() == 1 {
            Content::Node(Box::new(Node::Binning(BinningNode {
                input: inputs[0].clone(),
                edges: Edges::Explicit(edges[0].clone()),
                content: values.iter().map(|&v| Content::Number(v)).collect(),
                flow: Flow::Mode(FlowMode::Clamp),
            })))
        } else {
            Content::multibinning(inputs, edges, values.to_vec(), Flow::Mode(FlowMode::Clamp))
        };
    };
    let stride: usize = map.categories[level + 1..].iter().map(|(_, k)| k.len()).product::<usize>() * leaf_len;
    let items = keys
        .iter()
        .enumerate()
        .map(|(i, k)| (k.clone(), build_level(map, level + 1, &values[i * stride..(i + 1) * stride], leaf_len)))
        .collect();
    Content::category(input.clone(), items)
}
