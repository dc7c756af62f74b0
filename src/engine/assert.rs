use serde_json::Value;

/// A single response-body assertion from the job spec.
#[derive(Debug, Clone)]
pub struct Assertion {
    pub asserter: Asserter,
    pub expression: String,
    pub condition: Condition,
    pub expected: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Asserter {
    JsonPath,
    /// Reserved asserter kinds are accepted but not evaluated.
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    Null,
    NotNull,
    Equal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssertOutcome {
    pub successful: bool,
}

pub const ASSERT_SUCCESS: AssertOutcome = AssertOutcome { successful: true };
pub const ASSERT_FAILURE: AssertOutcome = AssertOutcome { successful: false };

/// Evaluates `assertions` in order against a response body.
///
/// The body is parsed as JSON once; a parse failure fails the whole set.
/// Evaluation short-circuits on the first failing assertion. Reserved
/// asserter kinds pass without being evaluated.
#[must_use]
pub fn assert_that(body: &[u8], assertions: &[Assertion]) -> AssertOutcome {
    if assertions.iter().all(|a| a.asserter != Asserter::JsonPath) {
        return ASSERT_SUCCESS;
    }

    let Ok(json) = serde_json::from_slice::<Value>(body) else {
        return ASSERT_FAILURE;
    };

    for assertion in assertions {
        if assertion.asserter != Asserter::JsonPath {
            continue;
        }
        let outcome = json_path_assert(&json, assertion);
        if !outcome.successful {
            return outcome;
        }
    }
    ASSERT_SUCCESS
}

fn json_path_assert(json: &Value, assertion: &Assertion) -> AssertOutcome {
    let resolved = lookup(json, &assertion.expression);

    match assertion.condition {
        Condition::Null => match resolved {
            None => ASSERT_SUCCESS,
            Some(_) => ASSERT_FAILURE,
        },
        Condition::NotNull => match resolved {
            Some(_) => ASSERT_SUCCESS,
            None => ASSERT_FAILURE,
        },
        Condition::Equal => match resolved.and_then(canonical_form) {
            Some(actual) if actual == assertion.expected => ASSERT_SUCCESS,
            _ => ASSERT_FAILURE,
        },
    }
}

/// Resolves a JSONPath expression to a single value.
///
/// A lookup error, an empty selection, or an explicit JSON `null` all count
/// as absent.
fn lookup<'v>(json: &'v Value, expression: &str) -> Option<&'v Value> {
    let selected = jsonpath_lib::select(json, expression).ok()?;
    match selected.first() {
        Some(Value::Null) | None => None,
        Some(value) => Some(value),
    }
}

/// Canonical string form used for `EQUAL` comparison: strings verbatim,
/// integers in base 10, floats in the shortest round-trippable decimal,
/// booleans as `true`/`false`. Arrays and objects never compare equal.
fn canonical_form(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => {
            if let Some(int) = number.as_i64() {
                Some(int.to_string())
            } else if let Some(uint) = number.as_u64() {
                Some(uint.to_string())
            } else {
                number.as_f64().map(|float| float.to_string())
            }
        }
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}
