//! Client-side filtering, sorting and pagination of fetched JSON lists

use std::cmp::Ordering;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

/// Case-insensitive substring filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    /// Field to match; None matches against any scalar field
    pub field: Option<String>,
    pub text: String,
}

impl Filter {
    /// Parse `field=text`, or plain `text` for any field
    pub fn parse(raw: &str) -> Self {
        match raw.split_once('=') {
            Some((field, text)) if !field.is_empty() => Self {
                field: Some(field.to_string()),
                text: text.to_string(),
            },
            _ => Self {
                field: None,
                text: raw.to_string(),
            },
        }
    }

    fn matches(&self, item: &Value) -> bool {
        let needle = self.text.to_lowercase();
        match &self.field {
            Some(field) => item.get(field).is_some_and(|v| contains(v, &needle)),
            None => match item {
                Value::Object(map) => map.values().any(|v| contains(v, &needle)),
                other => contains(other, &needle),
            },
        }
    }
}

fn contains(value: &Value, needle: &str) -> bool {
    let haystack = match value {
        Value::String(s) => s.to_lowercase(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null | Value::Array(_) | Value::Object(_) => return false,
    };
    haystack.contains(needle)
}

/// Sort order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
    pub field: String,
    pub descending: bool,
}

/// What the user wants to see of a fetched list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewQuery {
    pub filter: Option<Filter>,
    pub sort: Option<Sort>,
    /// 1-based page number
    pub page: usize,
    pub page_size: usize,
}

impl Default for ViewQuery {
    fn default() -> Self {
        Self {
            filter: None,
            sort: None,
            page: 1,
            page_size: 20,
        }
    }
}

/// One page of a filtered and sorted list
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page {
    pub items: Vec<Value>,
    /// Items left after filtering
    pub total: usize,
    /// Page actually shown, after clamping
    pub page: usize,
    #[serde(rename = "page-count")]
    pub page_count: usize,
}

impl ViewQuery {
    /// Filter, sort and slice `items`
    ///
    /// The page is clamped to the available range, so asking for page 9 of 3
    /// yields page 3. An empty result is page 1 of 1.
    pub fn apply(&self, items: &[Value]) -> Page {
        debug!(?self, count = items.len(), "ViewQuery::apply: called");

        let mut selected: Vec<&Value> = match &self.filter {
            Some(filter) => items.iter().filter(|item| filter.matches(item)).collect(),
            None => items.iter().collect(),
        };

        if let Some(sort) = &self.sort {
            // Stable sort; missing values stay last in both directions
            selected.sort_by(|a, b| compare_field(a.get(&sort.field), b.get(&sort.field), sort.descending));
        }

        let total = selected.len();
        let page_size = self.page_size.max(1);
        let page_count = total.div_ceil(page_size).max(1);
        let page = self.page.clamp(1, page_count);

        let items = selected
            .into_iter()
            .skip((page - 1) * page_size)
            .take(page_size)
            .cloned()
            .collect();

        Page {
            items,
            total,
            page,
            page_count,
        }
    }
}

fn compare_field(a: Option<&Value>, b: Option<&Value>, descending: bool) -> Ordering {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => {
            let ord = compare_values(a, b);
            if descending { ord.reverse() } else { ord }
        }
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        // Mixed types: numbers, then bools, then strings, then the rest
        _ => rank(a).cmp(&rank(b)),
    }
}

fn rank(value: &Value) -> u8 {
    match value {
        Value::Number(_) => 0,
        Value::Bool(_) => 1,
        Value::String(_) => 2,
        Value::Array(_) => 3,
        Value::Object(_) => 4,
        Value::Null => 5,
    }
}

/// Select the list to display from a fetched document
///
/// `pointer` is a JSON pointer such as `/data/spots`; an empty pointer means
/// the document itself. A non-array target is treated as a single item.
pub fn extract_items(value: &Value, pointer: Option<&str>) -> Option<Vec<Value>> {
    let target = match pointer {
        Some(p) if !p.is_empty() => value.pointer(p)?,
        _ => value,
    };
    Some(match target {
        Value::Array(items) => items.clone(),
        other => vec![other.clone()],
    })
}
