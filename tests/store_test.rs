use serde_json::Value;
use std::collections::BTreeMap;
use tempfile::tempdir;

use rusty_tau::collection::PointerClick;
use rusty_tau::error::TauError;
use rusty_tau::io::{read_traces, write_events_csv};
use rusty_tau::session::{AdvanceOutcome, Session};
use rusty_tau::signal::{AuxTrace, Representation, Stimulus, StimulusOnset};
use rusty_tau::store::DataSet;

const TRACES: &str = "\
roi_0,roi_1
100.0,20.0
100.0,21.0
100.0,19.5
100.0,20.5
100.0,20.0
100.0,22.0
100.0,19.0
100.0,20.0
100.0,21.5
100.0,20.0
100.0,20.5
118.1,19.0
129.8,20.0
137.3,22.0
142.2,21.0
145.3,20.0
134.4,19.0
127.0,21.5
121.7,20.0
117.8,20.5
115.2,19.5
113.3,20.0
112.0,21.0
111.1,20.0
110.5,19.5
";

fn data_set() -> DataSet {
    let mut data = DataSet::new("rec", 10.0, 5.0).unwrap();
    for (key, raw) in read_traces(TRACES.as_bytes()).unwrap() {
        data.add_channel_trace(&key, raw).unwrap();
    }
    data.set_stimulus(
        Stimulus::from_onsets(
            vec![StimulusOnset {
                start: 1.0,
                end: 1.2,
                info: "puff".to_string(),
            }],
            2.5,
            0.01,
        )
        .unwrap(),
    );
    data.add_metadata(BTreeMap::from([
        ("animal".to_string(), Value::from("m7")),
        ("depth".to_string(), Value::from(150.0)),
    ]));
    data
}

fn annotated() -> DataSet {
    let mut session = Session::new(data_set(), 11).unwrap();
    session.set_filter_window(Some(0.3)).unwrap();
    session.set_filter_active(true).unwrap();
    session.begin_annotation().unwrap();
    for t in [1.0, 1.5, 2.0] {
        session.handle_click(&PointerClick::at(t, 0.0));
    }
    let AdvanceOutcome::TauPhase(guides) = session.advance().unwrap() else {
        panic!("Boundary phase did not complete");
    };
    session.handle_click(&PointerClick::at(1.2, guides.rise.y));
    session.handle_click(&PointerClick::at(1.9, guides.decay.y));
    assert_eq!(session.advance(), Ok(AdvanceOutcome::Committed(0)));
    session.next_channel().unwrap();
    session.toggle_flag().unwrap();
    let mut data = session.into_data();
    data.set_stimulus_trace(
        "roi_1",
        AuxTrace::build(vec![0.0, 0.5, 1.0], vec![0.0, 1.0, 0.0]).unwrap(),
    )
    .unwrap();
    data
}

/// Save the data set, edit the saved JSON and load it back.
fn load_edited<F: FnOnce(&mut Value)>(data: &DataSet, edit: F) -> Result<DataSet, TauError> {
    let dir = tempdir().unwrap();
    let path = dir.path().join("session.json");
    data.save_to(&path).unwrap();

    let mut json: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    edit(&mut json);
    std::fs::write(&path, serde_json::to_string(&json).unwrap()).unwrap();
    DataSet::load_from(&path)
}

#[test]
fn test_save_load_round_trip() {
    let data = annotated();
    let dir = tempdir().unwrap();
    let path = dir.path().join("session.json");

    data.save_to(&path).unwrap();
    let loaded = DataSet::load_from(&path).unwrap();
    assert_eq!(loaded, data);
    assert_eq!(loaded.flagged_channels(), vec!["roi_1"]);
    assert_eq!(loaded.meta().stimulus.as_ref().unwrap().onsets()[0].info, "puff");
    assert_eq!(
        loaded.channel("roi_1").unwrap().stimulus_trace().unwrap().values,
        vec![0.0, 1.0, 0.0]
    );
    assert_eq!(loaded.channel("roi_0").unwrap().stimulus_trace(), None);
}

#[test]
fn test_load_rejects_out_of_range_event() {
    let data = annotated();
    assert!(load_edited(&data, |_| {}).is_ok());

    let loaded = load_edited(&data, |json| {
        json["channels"][0]["events"][0]["end_idx"] = Value::from(500);
    });
    assert!(matches!(loaded, Err(TauError::InvalidIndices(_))));

    let loaded = load_edited(&data, |json| {
        json["channels"][0]["events"][0]["center_idx"] = Value::from(5);
    });
    assert!(matches!(loaded, Err(TauError::InvalidIndices(_))));
}

#[test]
fn test_load_rejects_inconsistent_traces() {
    let data = annotated();
    let loaded = load_edited(&data, |json| {
        if let Value::Array(z) = &mut json["channels"][1]["data_traces"]["z"] {
            z.pop();
        }
    });
    assert!(matches!(loaded, Err(TauError::InvalidTrace(_))));

    let loaded = load_edited(&data, |json| {
        let first = json["channels"][0].clone();
        if let Value::Array(channels) = &mut json["channels"] {
            channels.push(first);
        }
    });
    assert!(matches!(loaded, Err(TauError::InvalidParameter(_))));
}

#[test]
fn test_load_missing_file() {
    let dir = tempdir().unwrap();
    assert!(DataSet::load_from(dir.path().join("missing.json")).is_err());
}

#[test]
fn test_event_rows() {
    let data = annotated();
    let rows = data.event_rows();
    assert_eq!(rows.len(), 1);

    let row = &rows[0];
    assert_eq!(row["roi"], Value::from("roi_0"));
    assert_eq!(row["event"], Value::from(0));
    assert_eq!(row["start_idx"], Value::from(10));
    assert_eq!(row["end_idx"], Value::from(20));
    assert_eq!(row["animal"], Value::from("m7"));
    assert_eq!(row["fbs_percentile"], Value::from(5.0));
    assert_eq!(row["f_base_line"], Value::from(100.0));
    assert_eq!(row["norm_mode"], Value::from("raw"));
    assert!(row.contains_key("peak_filtered_z_decay"));
    assert!(!row.contains_key("colors"));
    assert!(!row.keys().any(|k| k.contains("curve")));
}

#[test]
fn test_fit_reports() {
    let data = annotated();
    let reports = data.fit_reports().unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].channel, "roi_0");
    assert_eq!(reports[0].norm_mode, Representation::Raw);
    let decay = reports[0].decay.as_ref().unwrap();
    assert_eq!(decay.residuals.len(), 5);
    assert!(decay.r_squared > 0.8);
}

#[test]
fn test_write_events_csv() {
    let data = annotated();
    let dir = tempdir().unwrap();
    let path = dir.path().join("events.csv");
    write_events_csv(&path, &data.event_rows()).unwrap();

    let mut reader = csv::Reader::from_path(&path).unwrap();
    let headers = reader.headers().unwrap().clone();
    assert_eq!(&headers[0], "roi");
    assert_eq!(&headers[1], "event");
    let records = reader.records().collect::<Result<Vec<_>, _>>().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(&records[0][0], "roi_0");
    assert_eq!(&records[0][1], "0");
}
