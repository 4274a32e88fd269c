//! NanoAOD-flattened Parquet files.
//!
//! Each row is one event. Collection fields are list columns named
//! `{Collection}_{field}` (`FatJet_pt`, `Muon_tightId`, `SV_dxySig`, ...);
//! event quantities are scalar columns (`run`, `event`, `genWeight`,
//! `HLT_*`, `Flag_*`). Numeric and boolean columns of any width are
//! promoted to `f64` on read; unknown collection fields land in the
//! objects' `extra` maps.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::path::Path;

use arrow::array::{Array, ArrayRef, AsArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Float64Type};
use arrow::record_batch::RecordBatch;
use mt_core::{Error, Result};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

use crate::model::{Electron, Event, FatJet, GenJet, Muon, SecondaryVertex, SubJet};

const COLLECTIONS: [&str; 6] = ["FatJet", "SubJet", "Muon", "Electron", "SV", "GenJetAK8"];

const FATJET_FIELDS: &[&str] = &[
    "pt", "eta", "phi", "mass", "msoftdrop", "rawFactor", "area", "tau1", "tau2", "tau3", "jetId",
    "subJetIdx1", "subJetIdx2", "genJetAK8Idx", "nBHadrons", "nCHadrons",
];
const SUBJET_FIELDS: &[&str] = &["pt", "eta", "phi", "mass"];
const MUON_FIELDS: &[&str] = &["pt", "eta", "phi", "mass", "charge", "pfRelIso04_all"];
const SV_FIELDS: &[&str] = &["pt", "eta", "phi", "mass", "dxySig", "pAngle"];

fn parquet_err(path: &Path, e: impl std::fmt::Display) -> Error {
    Error::Input(format!("{}: {e}", path.display()))
}

/// Column names of a Parquet file, read from its footer only.
pub fn parquet_columns(path: &Path) -> Result<Vec<String>> {
    let file = File::open(path).map_err(|e| Error::io_at(path, e))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file).map_err(|e| parquet_err(path, e))?;
    Ok(builder.schema().fields().iter().map(|f| f.name().clone()).collect())
}

/// Read all events of a Parquet file.
pub fn read_parquet_events(path: &Path) -> Result<Vec<Event>> {
    let file = File::open(path).map_err(|e| Error::io_at(path, e))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file).map_err(|e| parquet_err(path, e))?;
    let reader = builder.build().map_err(|e| parquet_err(path, e))?;
    let mut events = Vec::new();
    for batch in reader {
        let batch = batch.map_err(|e| parquet_err(path, e))?;
        events.extend(events_from_batch(&batch).map_err(|e| parquet_err(path, e))?);
    }
    Ok(events)
}

/// One list column, flattened.
struct Jagged {
    offsets: Vec<usize>,
    values: Vec<f64>,
    is_bool: bool,
}

impl Jagged {
    fn len_at(&self, row: usize) -> usize {
        self.offsets[row + 1] - self.offsets[row]
    }

    fn get(&self, row: usize, k: usize) -> f64 {
        self.values[self.offsets[row] + k]
    }
}

fn to_f64(name: &str, arr: &ArrayRef) -> Result<Vec<f64>> {
    let c = cast(arr, &DataType::Float64)
        .map_err(|e| Error::Input(format!("column '{name}': cannot read as number: {e}")))?;
    Ok(c.as_primitive::<Float64Type>().values().to_vec())
}

fn list_column(name: &str, arr: &ArrayRef) -> Result<Jagged> {
    let (offsets, child): (Vec<usize>, &ArrayRef) = match arr.data_type() {
        DataType::List(_) => {
            let l = arr.as_list::<i32>();
            (l.value_offsets().iter().map(|&o| o as usize).collect(), l.values())
        }
        DataType::LargeList(_) => {
            let l = arr.as_list::<i64>();
            (l.value_offsets().iter().map(|&o| o as usize).collect(), l.values())
        }
        other => {
            return Err(Error::Input(format!("column '{name}': expected a list, found {other}")));
        }
    };
    let is_bool = matches!(child.data_type(), DataType::Boolean);
    Ok(Jagged { offsets, values: to_f64(name, child)?, is_bool })
}

fn is_scalar(dt: &DataType) -> bool {
    dt.is_numeric() || matches!(dt, DataType::Boolean)
}

struct Collection<'a> {
    name: &'static str,
    fields: Option<&'a BTreeMap<String, Jagged>>,
}

impl Collection<'_> {
    fn count(&self, row: usize) -> Result<usize> {
        let Some(fields) = self.fields else { return Ok(0) };
        let Some(pt) = fields.get("pt") else {
            return Err(Error::Input(format!("collection '{}' has no '{}_pt' column", self.name, self.name)));
        };
        let n = pt.len_at(row);
        for (leaf, col) in fields {
            if col.len_at(row) != n {
                return Err(Error::Input(format!(
                    "row {row}: '{}_{leaf}' has {} entries but '{}_pt' has {n}",
                    self.name,
                    col.len_at(row),
                    self.name
                )));
            }
        }
        Ok(n)
    }

    fn opt(&self, leaf: &str, row: usize, k: usize) -> Option<f64> {
        self.fields?.get(leaf).map(|c| c.get(row, k))
    }

    fn req(&self, leaf: &str, row: usize, k: usize) -> Result<f64> {
        self.opt(leaf, row, k)
            .ok_or_else(|| Error::Input(format!("missing column '{}_{leaf}'", self.name)))
    }

    fn floats(&self, known: &[&str], row: usize, k: usize) -> BTreeMap<String, f64> {
        let Some(fields) = self.fields else { return BTreeMap::new() };
        fields
            .iter()
            .filter(|(leaf, c)| !c.is_bool && !known.contains(&leaf.as_str()))
            .map(|(leaf, c)| (leaf.clone(), c.get(row, k)))
            .collect()
    }

    fn bools(&self, row: usize, k: usize) -> BTreeMap<String, bool> {
        let Some(fields) = self.fields else { return BTreeMap::new() };
        fields.iter().filter(|(_, c)| c.is_bool).map(|(leaf, c)| (leaf.clone(), c.get(row, k) != 0.0)).collect()
    }
}

fn index_or_none(v: Option<f64>) -> i32 {
    v.map(|x| x as i32).unwrap_or(-1)
}

fn events_from_batch(batch: &RecordBatch) -> Result<Vec<Event>> {
    let schema = batch.schema();
    let n_rows = batch.num_rows();
    let mut scalars: HashMap<String, Vec<f64>> = HashMap::new();
    let mut bool_scalars: Vec<(String, Vec<f64>)> = Vec::new();
    let mut collections: HashMap<&'static str, BTreeMap<String, Jagged>> = HashMap::new();

    for (i, field) in schema.fields().iter().enumerate() {
        let name = field.name();
        let col = batch.column(i);
        match field.data_type() {
            DataType::List(_) | DataType::LargeList(_) => {
                let Some((coll, leaf)) = COLLECTIONS
                    .iter()
                    .find_map(|c| name.strip_prefix(c).and_then(|r| r.strip_prefix('_')).map(|leaf| (*c, leaf)))
                else {
                    continue;
                };
                collections.entry(coll).or_default().insert(leaf.to_string(), list_column(name, col)?);
            }
            dt if is_scalar(dt) => {
                let values = to_f64(name, col)?;
                if name.starts_with("HLT_") || name.starts_with("Flag_") {
                    bool_scalars.push((name.clone(), values));
                } else {
                    scalars.insert(name.clone(), values);
                }
            }
            _ => {}
        }
    }

    let required = |name: &str| {
        scalars.get(name).ok_or_else(|| Error::Input(format!("missing event column '{name}'")))
    };
    let run = required("run")?;
    let lumi = required("luminosityBlock")?;
    let event = required("event")?;
    let rho = scalars.get("fixedGridRhoFastjetAll").or_else(|| scalars.get("Rho_fixedGridRhoFastjetAll"));
    let npv = scalars.get("PV_npvsGood");
    let gen_weight = scalars.get("genWeight");
    let n_true_int = scalars.get("Pileup_nTrueInt");

    let coll = |name: &'static str| Collection { name, fields: collections.get(name) };
    let fatjets = coll("FatJet");
    let subjets = coll("SubJet");
    let muons = coll("Muon");
    let electrons = coll("Electron");
    let svs = coll("SV");
    let genjets = coll("GenJetAK8");

    let mut out = Vec::with_capacity(n_rows);
    for r in 0..n_rows {
        let mut ev = Event {
            run: run[r] as u32,
            luminosity_block: lumi[r] as u32,
            event: event[r] as u64,
            rho: rho.map(|v| v[r]).unwrap_or(0.0),
            n_pv_good: npv.map(|v| v[r] as u32).unwrap_or(0),
            gen_weight: gen_weight.map(|v| v[r]),
            n_true_int: n_true_int.map(|v| v[r]),
            ..Default::default()
        };
        for (name, values) in &bool_scalars {
            let on = values[r] != 0.0;
            if let Some(path) = name.strip_prefix("HLT_") {
                ev.hlt.insert(path.to_string(), on);
            } else if let Some(flag) = name.strip_prefix("Flag_") {
                ev.flags.insert(flag.to_string(), on);
            }
        }

        for k in 0..fatjets.count(r)? {
            ev.fatjets.push(FatJet {
                pt: fatjets.req("pt", r, k)?,
                eta: fatjets.req("eta", r, k)?,
                phi: fatjets.req("phi", r, k)?,
                mass: fatjets.req("mass", r, k)?,
                msoftdrop: fatjets.opt("msoftdrop", r, k).unwrap_or(0.0),
                raw_factor: fatjets.opt("rawFactor", r, k).unwrap_or(0.0),
                area: fatjets.opt("area", r, k).unwrap_or(0.0),
                tau1: fatjets.opt("tau1", r, k).unwrap_or(0.0),
                tau2: fatjets.opt("tau2", r, k).unwrap_or(0.0),
                tau3: fatjets.opt("tau3", r, k).unwrap_or(0.0),
                jet_id: fatjets.opt("jetId", r, k).unwrap_or(0.0) as i32,
                subjet_idx1: index_or_none(fatjets.opt("subJetIdx1", r, k)),
                subjet_idx2: index_or_none(fatjets.opt("subJetIdx2", r, k)),
                gen_jet_idx: index_or_none(fatjets.opt("genJetAK8Idx", r, k)),
                n_b_hadrons: fatjets.opt("nBHadrons", r, k).map(|v| v as u32),
                n_c_hadrons: fatjets.opt("nCHadrons", r, k).map(|v| v as u32),
                extra: fatjets.floats(FATJET_FIELDS, r, k),
                ..Default::default()
            });
        }
        for k in 0..subjets.count(r)? {
            ev.subjets.push(SubJet {
                pt: subjets.req("pt", r, k)?,
                eta: subjets.req("eta", r, k)?,
                phi: subjets.req("phi", r, k)?,
                mass: subjets.opt("mass", r, k).unwrap_or(0.0),
                extra: subjets.floats(SUBJET_FIELDS, r, k),
            });
        }
        for k in 0..muons.count(r)? {
            ev.muons.push(Muon {
                pt: muons.req("pt", r, k)?,
                eta: muons.req("eta", r, k)?,
                phi: muons.req("phi", r, k)?,
                mass: muons.opt("mass", r, k).unwrap_or(0.105_658),
                charge: muons.opt("charge", r, k).unwrap_or(0.0) as i32,
                pf_rel_iso04_all: muons.opt("pfRelIso04_all", r, k).unwrap_or(0.0),
                ids: muons.bools(r, k),
                extra: muons.floats(MUON_FIELDS, r, k),
            });
        }
        for k in 0..electrons.count(r)? {
            ev.electrons.push(Electron {
                pt: electrons.req("pt", r, k)?,
                eta: electrons.req("eta", r, k)?,
                phi: electrons.req("phi", r, k)?,
                mass: electrons.opt("mass", r, k).unwrap_or(0.0),
                delta_eta_sc: electrons.opt("deltaEtaSC", r, k).unwrap_or(0.0),
                pf_rel_iso03_all: electrons.opt("pfRelIso03_all", r, k).unwrap_or(0.0),
                ids: electrons.bools(r, k),
            });
        }
        for k in 0..svs.count(r)? {
            ev.svs.push(SecondaryVertex {
                pt: svs.req("pt", r, k)?,
                eta: svs.req("eta", r, k)?,
                phi: svs.req("phi", r, k)?,
                mass: svs.req("mass", r, k)?,
                dxy_sig: svs.opt("dxySig", r, k).unwrap_or(0.0),
                p_angle: svs.opt("pAngle", r, k).unwrap_or(0.0),
                extra: svs.floats(SV_FIELDS, r, k),
            });
        }
        for k in 0..genjets.count(r)? {
            ev.genjets_ak8.push(GenJet {
                pt: genjets.req("pt", r, k)?,
                eta: genjets.req("eta", r, k)?,
                phi: genjets.req("phi", r, k)?,
                mass: genjets.opt("mass", r, k).unwrap_or(0.0),
                n_b_hadrons: genjets.opt("nBHadrons", r, k).map(|v| v as u32),
                n_c_hadrons: genjets.opt("nCHadrons", r, k).map(|v| v as u32),
            });
        }
        out.push(ev);
    }
    Ok(out)
}
