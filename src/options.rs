//! Typed replacement for the source's `Any`-typed option bags (spec §9
//! design notes). [`OptionValue`] covers `ProtocolConfig` options; the
//! interceptor metadata bag remains a plain `Map<String, String>` by design
//! (spec §4.4/§4.5).

use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
  Bool(bool),
  Int(i64),
  Double(f64),
  String(String),
  List(Vec<OptionValue>),
  Map(HashMap<String, OptionValue>),
}

impl From<bool> for OptionValue {
  fn from(v: bool) -> Self {
    OptionValue::Bool(v)
  }
}

impl From<i64> for OptionValue {
  fn from(v: i64) -> Self {
    OptionValue::Int(v)
  }
}

impl From<f64> for OptionValue {
  fn from(v: f64) -> Self {
    OptionValue::Double(v)
  }
}

impl From<String> for OptionValue {
  fn from(v: String) -> Self {
    OptionValue::String(v)
  }
}

impl From<&str> for OptionValue {
  fn from(v: &str) -> Self {
    OptionValue::String(v.to_string())
  }
}

/// Options bag threaded through `ProtocolConfig`-style construction.
pub type OptionMap = HashMap<String, OptionValue>;
