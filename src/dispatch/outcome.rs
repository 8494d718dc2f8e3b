use crate::error::ScriptError;

/// Classified result of invoking one candidate node.
#[derive(Debug)]
pub enum Outcome<T> {
    Success(T),
    /// The candidate does not know the script/run, or is unreachable for a
    /// point lookup (an unreachable node cannot own the run).
    NotFound,
    /// Any failure other than NotFound; carried into the aggregate error.
    Failed(ScriptError),
}

/// Reduce outcomes of a point operation: any success wins; otherwise the
/// result is NotFound only when every candidate (and the empty candidate
/// set) reported NotFound; otherwise the collected causes surface as one
/// service error.
pub fn reduce_point<T>(
    outcomes: Vec<Outcome<T>>,
    missing: impl FnOnce() -> ScriptError,
) -> Result<T, ScriptError> {
    let mut causes = Vec::new();
    for outcome in outcomes {
        match outcome {
            Outcome::Success(value) => return Ok(value),
            Outcome::NotFound => {}
            Outcome::Failed(e) => causes.push(e.to_string()),
        }
    }
    if causes.is_empty() {
        Err(missing())
    } else {
        Err(ScriptError::aggregate(causes))
    }
}

/// Reduce outcomes of a fan-out producing lists: the successful
/// candidates' lists are concatenated, and a candidate failure never
/// discards another candidate's results. Only when nothing succeeded does
/// the NotFound-vs-service-error split apply. An empty outcome list is an
/// empty result, not an error.
pub fn reduce_all<T>(
    outcomes: Vec<Outcome<Vec<T>>>,
    missing: impl FnOnce() -> ScriptError,
) -> Result<Vec<T>, ScriptError> {
    if outcomes.is_empty() {
        return Ok(Vec::new());
    }
    let mut merged = Vec::new();
    let mut succeeded = false;
    let mut causes = Vec::new();
    for outcome in outcomes {
        match outcome {
            Outcome::Success(list) => {
                succeeded = true;
                merged.extend(list);
            }
            Outcome::NotFound => {}
            Outcome::Failed(e) => causes.push(e.to_string()),
        }
    }
    if succeeded {
        Ok(merged)
    } else if causes.is_empty() {
        Err(missing())
    } else {
        Err(ScriptError::aggregate(causes))
    }
}
