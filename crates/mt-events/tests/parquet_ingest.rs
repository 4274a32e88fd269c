//! Parquet ingestion against a small NanoAOD-shaped file.

use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use arrow::array::{
    ArrayRef, BooleanArray, BooleanBuilder, Float32Array, Int32Array, ListArray, ListBuilder, UInt32Array,
    UInt64Array,
};
use arrow::datatypes::{Float32Type, Int32Type};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;

use mt_events::ingest::read_events_range;
use mt_events::read_events;
use mt_events::triggers::file_triggers;

fn tmp_file(name: &str) -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!("mt_events_{}_{nanos}_{name}", std::process::id()))
}

fn f32_list(rows: Vec<Vec<f32>>) -> ArrayRef {
    Arc::new(ListArray::from_iter_primitive::<Float32Type, _, _>(
        rows.into_iter().map(|r| Some(r.into_iter().map(Some).collect::<Vec<_>>())),
    ))
}

fn i32_list(rows: Vec<Vec<i32>>) -> ArrayRef {
    Arc::new(ListArray::from_iter_primitive::<Int32Type, _, _>(
        rows.into_iter().map(|r| Some(r.into_iter().map(Some).collect::<Vec<_>>())),
    ))
}

fn bool_list(rows: Vec<Vec<bool>>) -> ArrayRef {
    let mut b = ListBuilder::new(BooleanBuilder::new());
    for r in rows {
        for v in r {
            b.values().append_value(v);
        }
        b.append(true);
    }
    Arc::new(b.finish())
}

fn write_sample(path: &PathBuf) {
    let batch = RecordBatch::try_from_iter(vec![
        ("run", Arc::new(UInt32Array::from(vec![1, 1])) as ArrayRef),
        ("luminosityBlock", Arc::new(UInt32Array::from(vec![3, 3])) as ArrayRef),
        ("event", Arc::new(UInt64Array::from(vec![100, 101])) as ArrayRef),
        ("Rho_fixedGridRhoFastjetAll", Arc::new(Float32Array::from(vec![20.5, 18.0])) as ArrayRef),
        ("PV_npvsGood", Arc::new(Int32Array::from(vec![31, 12])) as ArrayRef),
        ("genWeight", Arc::new(Float32Array::from(vec![1.5, -1.5])) as ArrayRef),
        ("HLT_BTagMu_AK8Jet300_Mu5", Arc::new(BooleanArray::from(vec![true, false])) as ArrayRef),
        ("HLT_BTagMu_AK4DiJet70_Mu5", Arc::new(BooleanArray::from(vec![false, true])) as ArrayRef),
        ("Flag_goodVertices", Arc::new(BooleanArray::from(vec![true, true])) as ArrayRef),
        ("FatJet_pt", f32_list(vec![vec![450.0, 320.0], vec![]])),
        ("FatJet_eta", f32_list(vec![vec![0.5, -1.0], vec![]])),
        ("FatJet_phi", f32_list(vec![vec![1.0, -2.0], vec![]])),
        ("FatJet_mass", f32_list(vec![vec![90.0, 60.0], vec![]])),
        ("FatJet_msoftdrop", f32_list(vec![vec![85.0, 45.0], vec![]])),
        ("FatJet_jetId", i32_list(vec![vec![6, 2], vec![]])),
        ("FatJet_subJetIdx1", i32_list(vec![vec![0, -1], vec![]])),
        ("FatJet_particleNetMD_Xbb", f32_list(vec![vec![0.25, 0.75], vec![]])),
        ("Muon_pt", f32_list(vec![vec![12.0], vec![7.0]])),
        ("Muon_eta", f32_list(vec![vec![0.4], vec![1.1]])),
        ("Muon_phi", f32_list(vec![vec![1.1], vec![0.1]])),
        ("Muon_looseId", bool_list(vec![vec![true], vec![false]])),
    ])
    .unwrap();
    let file = File::create(path).unwrap();
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None).unwrap();
    writer.write(&batch).unwrap();
    writer.close().unwrap();
}

#[test]
fn reads_collections_and_event_columns() {
    let path = tmp_file("events.parquet");
    write_sample(&path);

    let events = read_events(&path).unwrap();
    assert_eq!(events.len(), 2);

    let e0 = &events[0];
    assert_eq!(e0.event, 100);
    assert_eq!(e0.luminosity_block, 3);
    assert_eq!(e0.rho, 20.5);
    assert_eq!(e0.n_pv_good, 31);
    assert_eq!(e0.gen_weight, Some(1.5));
    assert!(e0.fired("HLT_BTagMu_AK8Jet300_Mu5"));
    assert!(!e0.fired("BTagMu_AK4DiJet70_Mu5"));
    assert_eq!(e0.flag("goodVertices"), Some(true));

    assert_eq!(e0.fatjets.len(), 2);
    assert_eq!(e0.fatjets[0].jet_id, 6);
    assert_eq!(e0.fatjets[0].subjet_idx1, 0);
    assert_eq!(e0.fatjets[1].subjet_idx1, -1);
    assert_eq!(e0.fatjets[1].subjet_idx2, -1);
    assert_eq!(e0.fatjets[1].field("particleNetMD_Xbb"), Some(0.75));
    assert!(e0.fatjets[0].n_b_hadrons.is_none());

    assert!(e0.muons[0].passes_id("looseId"));
    assert!(e0.muons[0].extra.is_empty());
    assert!(events[1].fatjets.is_empty());
    assert!(!events[1].muons[0].passes_id("looseId"));

    let tail = read_events_range(&path, 1..10).unwrap();
    assert_eq!(tail.len(), 1);
    assert_eq!(tail[0].event, 101);

    let trig = file_triggers(&path).unwrap();
    assert!(trig.ak8.contains("BTagMu_AK8Jet300_Mu5"));
    assert!(trig.ak4.contains("BTagMu_AK4DiJet70_Mu5"));

    let _ = std::fs::remove_file(&path);
}

#[test]
fn missing_pt_column_is_reported() {
    let path = tmp_file("nopt.parquet");
    let batch = RecordBatch::try_from_iter(vec![
        ("run", Arc::new(UInt32Array::from(vec![1])) as ArrayRef),
        ("luminosityBlock", Arc::new(UInt32Array::from(vec![1])) as ArrayRef),
        ("event", Arc::new(UInt64Array::from(vec![1])) as ArrayRef),
        ("SV_mass", f32_list(vec![vec![1.0]])),
    ])
    .unwrap();
    let file = File::create(&path).unwrap();
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None).unwrap();
    writer.write(&batch).unwrap();
    writer.close().unwrap();

    let err = read_events(&path).unwrap_err().to_string();
    assert!(err.contains("SV_pt"), "{err}");
    let _ = std::fs::remove_file(&path);
}
