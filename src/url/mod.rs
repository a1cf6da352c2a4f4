//! URL query-string synchronization.
//!
//! The dashboard URL carries the time range and every non-default variable
//! selection:
//!
//! ```text
//! ?lower=now%28%29%20-%201h&vars%5BCSVVariable%5D=c3
//!   └── lower bound ──┘      └─ vars[CSVVariable]=c3 ─┘
//! ```
//!
//! Keys and values are percent-encoded on output. On input both the encoded
//! and the bare `vars[Name]` forms are accepted, `+` decodes to a space, and
//! malformed pairs are skipped. Parameters this module does not own are kept
//! in place, and updates keep a parameter's position.

use std::borrow::Cow;

use crate::config::EngineConfig;
use crate::core::TimeRange;

/// Ordered query-string parameters of the dashboard URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlState {
    params: Vec<(String, String)>,
    vars_param: String,
    lower_param: String,
    upper_param: String,
}

fn decode(raw: &str) -> Option<String> {
    let spaced: Cow<'_, str> = if raw.contains('+') {
        Cow::Owned(raw.replace('+', " "))
    } else {
        Cow::Borrowed(raw)
    };
    urlencoding::decode(&spaced).ok().map(Cow::into_owned)
}

impl UrlState {
    /// Empty state using the parameter names from `config`.
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            params: Vec::new(),
            vars_param: config.vars_param.clone(),
            lower_param: config.lower_param.clone(),
            upper_param: config.upper_param.clone(),
        }
    }

    /// Parse a search string, with or without the leading `?`.
    pub fn parse(search: &str, config: &EngineConfig) -> Self {
        let mut state = Self::new(config);
        let search = search.strip_prefix('?').unwrap_or(search);

        for pair in search.split('&').filter(|p| !p.is_empty()) {
            let (raw_key, raw_value) = pair.split_once('=').unwrap_or((pair, ""));
            match (decode(raw_key), decode(raw_value)) {
                (Some(key), Some(value)) if !key.is_empty() => {
                    if state.params.iter().any(|(k, _)| *k == key) {
                        tracing::debug!(target: "url", "Ignoring repeated URL parameter '{key}'");
                        continue;
                    }
                    state.params.push((key, value));
                }
                _ => tracing::debug!(target: "url", "Ignoring malformed URL parameter '{pair}'"),
            }
        }
        state
    }

    fn var_key(&self, name: &str) -> String {
        format!("{}[{name}]", self.vars_param)
    }

    fn var_name<'a>(&self, key: &'a str) -> Option<&'a str> {
        key.strip_prefix(self.vars_param.as_str())?
            .strip_prefix('[')?
            .strip_suffix(']')
            .filter(|name| !name.is_empty())
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.params.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    fn set(&mut self, key: String, value: String) -> bool {
        match self.params.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) if *existing == value => false,
            Some((_, existing)) => {
                *existing = value;
                true
            }
            None => {
                self.params.push((key, value));
                true
            }
        }
    }

    fn remove(&mut self, key: &str) -> bool {
        let before = self.params.len();
        self.params.retain(|(k, _)| k != key);
        self.params.len() != before
    }

    /// Time range carried by the URL, if it has a lower bound.
    pub fn time_range(&self) -> Option<TimeRange> {
        let lower = self.get(&self.lower_param).filter(|l| !l.is_empty())?;
        Some(TimeRange {
            lower: lower.to_string(),
            upper: self.get(&self.upper_param).filter(|u| !u.is_empty()).map(str::to_string),
        })
    }

    /// `(name, value)` of every variable override, in URL order.
    pub fn variables(&self) -> Vec<(String, String)> {
        self.params
            .iter()
            .filter_map(|(k, v)| self.var_name(k).map(|name| (name.to_string(), v.clone())))
            .collect()
    }

    /// Override value of one variable.
    pub fn variable(&self, name: &str) -> Option<&str> {
        self.get(&self.var_key(name))
    }

    /// Set (`Some`) or remove (`None`) a variable override. Returns true on change.
    pub fn set_variable(&mut self, name: &str, value: Option<&str>) -> bool {
        let key = self.var_key(name);
        let changed = match value {
            Some(value) => self.set(key, value.to_string()),
            None => self.remove(&key),
        };
        if changed {
            tracing::debug!(target: "url", "URL override for '{name}' is now {value:?}");
        }
        changed
    }

    /// Write the time range. An open upper bound removes the upper parameter.
    pub fn set_time_range(&mut self, range: &TimeRange) -> bool {
        let mut changed = self.set(self.lower_param.clone(), range.lower.clone());
        changed |= match &range.upper {
            Some(upper) => self.set(self.upper_param.clone(), upper.clone()),
            None => {
                let upper = self.upper_param.clone();
                self.remove(&upper)
            }
        };
        changed
    }

    /// Serialize back to a search string: `""` or `?k=v&...`.
    pub fn to_search(&self) -> String {
        if self.params.is_empty() {
            return String::new();
        }
        let pairs: Vec<String> = self
            .params
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect();
        format!("?{}", pairs.join("&"))
    }
}
