//! Line-delimited JSON protocol: classifies each input line as a learn
//! record or an estimate-request record, dispatches it, and formats the
//! estimate-response line.
//!
//! The JSON reader and argument parsing are external collaborators per
//! `spec.md` §1; this module is the thin seam between them and the
//! engine, kept separate from `src/bin/node_ranker.rs` so the protocol
//! logic is unit-testable without going through stdin/stdout.

use serde_json::Value;
use tracing::{debug, warn};

use crate::estimator::Estimator;
use crate::model::Sample;

const LEARN_KEYS: [&str; 4] = ["node", "task", "rchar", "target"];
const ESTIMATE_KEYS: [&str; 2] = ["estimate", "id"];

/// One decoded input record.
enum Record {
    Learn(Sample),
    Estimate { estimate: usize, id: i64 },
}

fn is_exactly(obj: &serde_json::Map<String, Value>, keys: &[&str]) -> bool {
    obj.len() == keys.len() && keys.iter().all(|k| obj.contains_key(*k))
}

fn classify(value: &Value) -> Option<Record> {
    let obj = value.as_object()?;

    if is_exactly(obj, &LEARN_KEYS) {
        let sample: Sample = serde_json::from_value(value.clone()).ok()?;
        return Some(Record::Learn(sample));
    }

    if is_exactly(obj, &ESTIMATE_KEYS) {
        // The key set alone makes this an estimate-request; a value of
        // the wrong sign or type must not demote it back to
        // "unrecognized" — it still owes the caller a response line.
        // A negative or non-numeric `estimate` clamps to a threshold
        // (0, or unreachably high) rather than aborting recognition.
        let estimate = obj
            .get("estimate")
            .and_then(Value::as_f64)
            .map(|n| n.max(0.0).round() as usize)
            .unwrap_or(usize::MAX);
        let id = obj.get("id").and_then(Value::as_i64).unwrap_or(0);
        return Some(Record::Estimate { estimate, id });
    }

    None
}

/// Processes one input line against `estimator`, returning the response
/// line to print for an estimate-request, or `None` for a learn record
/// or a line that produced no output.
pub fn process_line(estimator: &mut Estimator, line: &str) -> Option<String> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    let value: Value = match serde_json::from_str(trimmed) {
        Ok(v) => v,
        Err(err) => {
            warn!(line = trimmed, error = %err, "malformed input line, skipping");
            return None;
        }
    };

    match classify(&value) {
        Some(Record::Learn(sample)) => {
            estimator.learn(sample);
            None
        }
        Some(Record::Estimate { estimate, id }) => {
            let ranking = if estimator.node_count() >= estimate {
                estimator.ranking()
            } else {
                None
            };

            let mut parts = vec![id.to_string()];
            match ranking {
                Some(scores) => {
                    for node in estimator.nodes() {
                        if let Some(score) = scores.get(node) {
                            parts.push(format!("{node}={score}"));
                        }
                    }
                }
                None => parts.push("NOT READY".to_string()),
            }
            Some(parts.join(";"))
        }
        None => {
            debug!(line = trimmed, "invalid input message: unrecognized key set");
            None
        }
    }
}
