//! End-to-end test of the line-delimited JSON protocol, driving the
//! estimator the way the `node-ranker` binary's stdin loop would.

use node_ranker::driver::process_line;
use node_ranker::Estimator;

#[test]
fn s1_two_nodes_linear_data_reaches_ready() {
    let mut estimator = Estimator::default();

    let lines = [
        r#"{"node":"A","task":"T","rchar":1.0,"target":1.0}"#,
        r#"{"node":"A","task":"T","rchar":2.0,"target":2.0}"#,
        r#"{"node":"A","task":"T","rchar":3.0,"target":3.0}"#,
        r#"{"node":"A","task":"T","rchar":4.0,"target":4.0}"#,
        r#"{"node":"B","task":"T","rchar":1.0,"target":2.0}"#,
        r#"{"node":"B","task":"T","rchar":2.0,"target":4.0}"#,
        r#"{"node":"B","task":"T","rchar":3.0,"target":6.0}"#,
        r#"{"node":"B","task":"T","rchar":4.0,"target":8.0}"#,
    ];

    for line in lines {
        let out = process_line(&mut estimator, line);
        assert!(out.is_none(), "learn records produce no output line");
    }

    let response = process_line(&mut estimator, r#"{"estimate":2,"id":7}"#).unwrap();
    assert!(response.starts_with("7;"));
    assert!(!response.contains("NOT READY"));

    let parts: Vec<&str> = response.split(';').collect();
    let mut scores = std::collections::HashMap::new();
    for part in &parts[1..] {
        let (node, score) = part.split_once('=').unwrap();
        scores.insert(node, score.parse::<f64>().unwrap());
    }
    let ratio = scores["A"] / scores["B"];
    assert!((ratio - 0.5).abs() < 1e-6, "expected A about half the cost of B, got {ratio}");
}

#[test]
fn s2_insufficient_nodes_reports_not_ready() {
    let mut estimator = Estimator::default();
    for line in [
        r#"{"node":"A","task":"T","rchar":1.0,"target":1.0}"#,
        r#"{"node":"A","task":"T","rchar":2.0,"target":2.0}"#,
    ] {
        process_line(&mut estimator, line);
    }

    let response = process_line(&mut estimator, r#"{"estimate":3,"id":9}"#).unwrap();
    assert_eq!(response, "9;NOT READY");
}

#[test]
fn malformed_and_unrecognized_lines_are_silently_skipped() {
    let mut estimator = Estimator::default();
    assert!(process_line(&mut estimator, "{not valid json").is_none());
    assert!(process_line(&mut estimator, r#"{"node":"A"}"#).is_none());
    assert_eq!(estimator.node_count(), 0);
}
