//! JSON canónico: claves ordenadas, sin espacios y números normalizados.
//!
//! Dos valores semánticamente idénticos (`{"b":1.0,"a":"x"}` y
//! `{"a":"x","b":1}`) producen exactamente el mismo texto, que es lo que se
//! hashea para obtener fingerprints.

use serde_json::{Number, Value};
use std::collections::BTreeMap;

pub fn to_canonical_json(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => canonical_number(n),
        // Display de `Value` aplica el escape JSON estándar y no puede fallar.
        Value::String(_) => value.to_string(),
        Value::Array(arr) => {
            let items: Vec<String> = arr.iter().map(to_canonical_json).collect();
            format!("[{}]", items.join(","))
        }
        Value::Object(map) => {
            let mut tree = BTreeMap::new();
            for (k, v) in map {
                tree.insert(k, to_canonical_json(v));
            }
            let items: Vec<String> = tree.into_iter()
                                         .map(|(k, v)| format!("{}:{}", Value::String(k.clone()), v))
                                         .collect();
            format!("{{{}}}", items.join(","))
        }
    }
}

/// -2^63, el menor i64; exacto en f64.
const I64_MIN_F: f64 = -9_223_372_036_854_775_808.0;
/// 2^64, uno más que u64::MAX; exacto en f64.
const U64_END_F: f64 = 18_446_744_073_709_551_616.0;

/// Floats con parte fraccionaria cero se emiten como enteros y `-0` como `0`,
/// de modo que `1`, `1.0`, `1e0` y también `1e19` y `10000000000000000000`
/// colapsan al mismo texto. Cubre todo el rango `[i64::MIN, u64::MAX]`; fuera
/// de él no hay entero JSON con el que confundirse y queda la forma de serde.
fn canonical_number(n: &Number) -> String {
    if let Some(i) = n.as_i64() {
        return i.to_string();
    }
    if let Some(u) = n.as_u64() {
        return u.to_string();
    }
    match n.as_f64() {
        Some(f) if f == 0.0 => "0".to_string(),
        // dentro del rango la conversión es exacta: un f64 entero no tiene bits fraccionarios
        Some(f) if f.fract() == 0.0 && (I64_MIN_F..0.0).contains(&f) => (f as i64).to_string(),
        Some(f) if f.fract() == 0.0 && (0.0..U64_END_F).contains(&f) => (f as u64).to_string(),
        _ => n.to_string(),
    }
}

/// Devuelve una copia normalizada del valor (números canónicos). El orden de
/// claves lo resuelve `to_canonical_json` al serializar.
pub fn normalize_value(value: &Value) -> Value {
    match value {
        Value::Number(n) => {
            let text = canonical_number(n);
            serde_json::from_str::<Value>(&text).unwrap_or_else(|_| value.clone())
        }
        Value::Array(arr) => Value::Array(arr.iter().map(normalize_value).collect()),
        Value::Object(map) => Value::Object(map.iter().map(|(k, v)| (k.clone(), normalize_value(v))).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_matter() {
        let a = json!({"b": 2, "a": {"y": 1, "x": [3, 2]}});
        let b = json!({"a": {"x": [3, 2], "y": 1}, "b": 2});
        assert_eq!(to_canonical_json(&a), to_canonical_json(&b));
        assert_eq!(to_canonical_json(&a), r#"{"a":{"x":[3,2],"y":1},"b":2}"#);
    }

    #[test]
    fn integral_floats_beyond_2_pow_53_match_their_integer() {
        let cases = [("10000000000000000000", "1e19"),
                     ("18446744073709549568", "1.8446744073709549568e19"),
                     ("-1152921504606846976", "-1.152921504606846976e18"),
                     ("4611686018427387904", "4.611686018427387904e18")];
        for (int, float) in cases {
            let a: Value = serde_json::from_str(int).unwrap();
            let b: Value = serde_json::from_str(float).unwrap();
            assert_eq!(to_canonical_json(&a), to_canonical_json(&b), "{int} vs {float}");
            assert_eq!(to_canonical_json(&b), int);
        }
        // fuera de u64 no hay entero equivalente
        let huge: Value = serde_json::from_str("1e20").unwrap();
        assert_eq!(to_canonical_json(&huge), huge.to_string());
    }

    #[test]
    fn integral_floats_collapse_to_integers() {
        assert_eq!(to_canonical_json(&json!(1.0)), "1");
        assert_eq!(to_canonical_json(&json!(-0.0)), "0");
        assert_eq!(to_canonical_json(&json!(2.5)), "2.5");
        assert_eq!(normalize_value(&json!({"n": 3.0})), json!({"n": 3}));
    }

    #[test]
    fn strings_are_escaped() {
        assert_eq!(to_canonical_json(&json!("a\"b")), r#""a\"b""#);
    }
}
