//! Per-selector content captured from a page, and the incremental merge used
//! when the same page is sampled several times.
//!
//! A dynamic page (infinite scroll, "load more") is re-sampled after each page
//! interaction. Every sample repeats what was already on the page plus some new
//! tail, so each sample has to be diffed against what was already captured.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Ordered values extracted per selector
///
/// Values at the same index across selectors form one logical row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Content(BTreeMap<String, Vec<String>>);

impl Content {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(|values| values.is_empty())
    }

    /// Values captured for one selector
    pub fn get(&self, selector: &str) -> Option<&[String]> {
        self.0.get(selector).map(|v| v.as_slice())
    }

    /// Replaces the values of one selector
    pub fn insert(&mut self, selector: impl Into<String>, values: Vec<String>) {
        self.0.insert(selector.into(), values);
    }

    pub fn selectors(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(|k| k.as_str())
    }

    /// Length of the longest selector list
    pub fn row_count(&self) -> usize {
        self.0.values().map(|v| v.len()).max().unwrap_or(0)
    }

    /// Content as rows, one cell per selector in selector order
    ///
    /// Shorter selector lists leave empty cells.
    pub fn rows(&self) -> Vec<Vec<String>> {
        (0..self.row_count())
            .map(|idx| {
                self.0
                    .values()
                    .map(|values| values.get(idx).cloned().unwrap_or_default())
                    .collect()
            })
            .collect()
    }

    /// Appends another content's values selector by selector
    pub fn append(&mut self, other: &Content) {
        for (selector, values) in &other.0 {
            self.0
                .entry(selector.clone())
                .or_default()
                .extend(values.iter().cloned());
        }
    }

    /// Merges a fresh sample into this accumulated content
    ///
    /// Only the part of `sample` that follows the previously captured data is
    /// appended. Returns that appended part, padded so every selector has the
    /// same number of new values. A selector with nothing to repeat stays empty.
    pub fn merge_sample(&mut self, sample: &Content) -> Content {
        let cut = find_cut_point(self, sample);

        let mut fresh: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let offsets = relative_edges(self, sample);
        for (selector, values) in &sample.0 {
            let skip = match cut {
                Some(cut) => cut + offsets.get(selector.as_str()).copied().unwrap_or(0) + 1,
                None => 0,
            };
            fresh.insert(
                selector.clone(),
                values.iter().skip(skip).cloned().collect(),
            );
        }

        let target = fresh.values().map(|v| v.len()).max().unwrap_or(0);
        for (selector, values) in fresh.iter_mut() {
            if values.len() >= target {
                continue;
            }
            let filler = values
                .last()
                .or_else(|| self.0.get(selector).and_then(|prev| prev.last()))
                .cloned();
            // Nothing to repeat; the selector never matched
            if let Some(filler) = filler {
                values.resize(target, filler);
            }
        }

        let fresh = Content(fresh);
        self.append(&fresh);
        fresh
    }
}

impl From<BTreeMap<String, Vec<String>>> for Content {
    fn from(map: BTreeMap<String, Vec<String>>) -> Self {
        Self(map)
    }
}

impl<S: Into<String>> FromIterator<(S, Vec<String>)> for Content {
    fn from_iter<I: IntoIterator<Item = (S, Vec<String>)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// The last previously captured value of a selector and its index
struct Edge<'a> {
    index: usize,
    value: &'a str,
}

fn edges<'a>(previous: &'a Content, sample: &Content) -> BTreeMap<&'a str, Edge<'a>> {
    sample
        .0
        .keys()
        .filter_map(|selector| {
            let (key, values) = previous.0.get_key_value(selector)?;
            let value = values.last()?;
            Some((
                key.as_str(),
                Edge {
                    index: values.len() - 1,
                    value: value.as_str(),
                },
            ))
        })
        .collect()
}

/// Edge indices relative to the smallest edge index among the sampled selectors
///
/// Selectors without an edge are aligned with the smallest one.
fn relative_edges<'a>(previous: &'a Content, sample: &Content) -> BTreeMap<&'a str, usize> {
    let edges = edges(previous, sample);
    let min = edges.values().map(|e| e.index).min().unwrap_or(0);
    edges
        .into_iter()
        .map(|(selector, edge)| (selector, edge.index - min))
        .collect()
}

/// First row of `sample` at which every selector repeats its previous edge value
fn find_cut_point(previous: &Content, sample: &Content) -> Option<usize> {
    let edges = edges(previous, sample);
    if edges.is_empty() {
        return None;
    }

    let min = edges.values().map(|e| e.index).min().unwrap_or(0);
    let rows = sample.row_count();

    (0..rows).find(|&row| {
        edges.iter().all(|(selector, edge)| {
            let offset = edge.index - min;
            sample
                .0
                .get(*selector)
                .and_then(|values| values.get(row + offset))
                .is_some_and(|value| value == edge.value)
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content(pairs: &[(&str, &[&str])]) -> Content {
        pairs
            .iter()
            .map(|(selector, values)| {
                (
                    selector.to_string(),
                    values.iter().map(|v| v.to_string()).collect::<Vec<_>>(),
                )
            })
            .collect()
    }

    #[test]
    fn test_first_sample_is_entirely_new() {
        let mut captured = Content::new();
        let sample = content(&[("h1", &["a", "b"]), ("h2", &["x"])]);

        let fresh = captured.merge_sample(&sample);

        assert_eq!(fresh.get("h1").unwrap(), ["a", "b"]);
        // padded with its own last value
        assert_eq!(fresh.get("h2").unwrap(), ["x", "x"]);
        assert_eq!(captured, fresh);
    }

    #[test]
    fn test_only_new_tail_is_appended() {
        let mut captured = content(&[("h1", &["A"]), ("h2", &["B1"])]);
        let sample = content(&[("h1", &["A", "A2"]), ("h2", &["B1", "B2"])]);

        let fresh = captured.merge_sample(&sample);

        assert_eq!(fresh, content(&[("h1", &["A2"]), ("h2", &["B2"])]));
        assert_eq!(
            captured,
            content(&[("h1", &["A", "A2"]), ("h2", &["B1", "B2"])])
        );
    }

    #[test]
    fn test_merging_same_sample_again_changes_nothing() {
        let mut captured = content(&[("h1", &["A", "A2"]), ("h2", &["B1", "B2"])]);
        let sample = captured.clone();

        let fresh = captured.merge_sample(&sample);

        assert!(fresh.is_empty());
        assert_eq!(
            captured,
            content(&[("h1", &["A", "A2"]), ("h2", &["B1", "B2"])])
        );
    }

    #[test]
    fn test_unrelated_sample_is_entirely_new() {
        let mut captured = content(&[("h1", &["A"])]);
        let sample = content(&[("h1", &["X", "Y"])]);

        let fresh = captured.merge_sample(&sample);

        assert_eq!(fresh.get("h1").unwrap(), ["X", "Y"]);
        assert_eq!(captured.get("h1").unwrap(), ["A", "X", "Y"]);
    }

    #[test]
    fn test_sample_with_dropped_head_rows() {
        // virtualized lists drop rows that scrolled out of view
        let mut captured = content(&[("li", &["1", "2", "3"])]);
        let sample = content(&[("li", &["2", "3", "4", "5"])]);

        let fresh = captured.merge_sample(&sample);

        assert_eq!(fresh.get("li").unwrap(), ["4", "5"]);
        assert_eq!(captured.get("li").unwrap(), ["1", "2", "3", "4", "5"]);
    }

    #[test]
    fn test_selectors_with_different_edge_indices() {
        // h1 has one extra leading value; edges align relative to h2
        let mut captured = content(&[("h1", &["title", "A1", "A2"]), ("h2", &["B1", "B2"])]);
        let sample = content(&[
            ("h1", &["title", "A1", "A2", "A3"]),
            ("h2", &["B1", "B2", "B3"]),
        ]);

        let fresh = captured.merge_sample(&sample);

        assert_eq!(fresh, content(&[("h1", &["A3"]), ("h2", &["B3"])]));
    }

    #[test]
    fn test_empty_previous_selector_adds_no_constraint() {
        let mut captured = content(&[("h1", &["A"]), ("h2", &[])]);
        let sample = content(&[("h1", &["A", "A2"]), ("h2", &["late", "B2"])]);

        let fresh = captured.merge_sample(&sample);

        assert_eq!(fresh.get("h1").unwrap(), ["A2"]);
        assert_eq!(fresh.get("h2").unwrap(), ["B2"]);
    }

    #[test]
    fn test_padding_uses_previous_value_when_selector_has_no_new_values() {
        let mut captured = content(&[("h1", &["A"]), ("h2", &["B"])]);
        let sample = content(&[("h1", &["A", "A2", "A3"]), ("h2", &["B"])]);

        let fresh = captured.merge_sample(&sample);

        assert_eq!(fresh.get("h1").unwrap(), ["A2", "A3"]);
        assert_eq!(fresh.get("h2").unwrap(), ["B", "B"]);
    }

    #[test]
    fn test_selector_that_never_matched_stays_empty() {
        let mut captured = Content::new();
        let sample = content(&[("h1", &["A", "B"]), (".price", &[])]);

        let fresh = captured.merge_sample(&sample);

        assert_eq!(fresh.get("h1").unwrap(), ["A", "B"]);
        assert!(fresh.get(".price").unwrap().is_empty());

        let next = content(&[("h1", &["A", "B", "C"]), (".price", &[])]);
        let fresh = captured.merge_sample(&next);

        assert_eq!(fresh.get("h1").unwrap(), ["C"]);
        assert!(captured.get(".price").unwrap().is_empty());
    }

    #[test]
    fn test_rows() {
        let c = content(&[("a", &["1", "2"]), ("b", &["x"])]);
        assert_eq!(
            c.rows(),
            vec![
                vec!["1".to_string(), "x".to_string()],
                vec!["2".to_string(), String::new()],
            ]
        );
    }

    #[test]
    fn test_serializes_as_map() {
        let c = content(&[("h1", &["A"])]);
        let json = serde_json::to_string(&c).unwrap();
        assert_eq!(json, r#"{"h1":["A"]}"#);
        let back: Content = serde_json::from_str(&json).unwrap();
        assert_eq!(back, c);
    }
}
