use serde_json::Value;

/// Turn command-line words into JSON-RPC parameters.
///
/// `10`, `true`, `{"a":1}` and `"quoted"` are taken as JSON; anything that
/// does not parse (`VRSC`, `alice@`) is sent as a string.
pub(crate) fn parse_params(raw: &[String]) -> Vec<Value> {
    raw.iter()
        .map(|word| serde_json::from_str(word).unwrap_or_else(|_| Value::String(word.clone())))
        .collect()
}

/// Render a result the way daemon CLIs do: bare strings, nothing for
/// `null`, JSON for everything else.
pub(crate) fn render_result(value: &Value, compact: bool) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other if compact => Some(other.to_string()),
        other => Some(serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string())),
    }
}
