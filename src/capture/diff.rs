//! Binding deltas between consecutive captures of one activation

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::CapturedValue;

/// Captured bindings of one frame, by variable name
pub type Bindings = BTreeMap<String, CapturedValue>;

/// Old and new value of a rebound name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueChange {
    pub old: CapturedValue,
    pub new: CapturedValue,
}

/// Difference between two captures.
///
/// `added`, `removed` and `changed` are disjoint and together cover every name
/// whose binding differs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariableDelta {
    #[serde(default)]
    pub added: Bindings,
    #[serde(default)]
    pub removed: Bindings,
    #[serde(default)]
    pub changed: BTreeMap<String, ValueChange>,
}

impl VariableDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }

    /// Names touched by this delta, in name order
    pub fn touched_names(&self) -> impl Iterator<Item = &str> {
        self.added
            .keys()
            .chain(self.removed.keys())
            .chain(self.changed.keys())
            .map(String::as_str)
    }
}

/// Compute the delta from `previous` to `current`.
///
/// With no previous capture every current binding counts as added.
pub fn compute_delta(previous: Option<&Bindings>, current: &Bindings) -> VariableDelta {
    let Some(previous) = previous else {
        return VariableDelta {
            added: current.clone(),
            ..VariableDelta::default()
        };
    };

    let mut delta = VariableDelta::default();
    for (name, value) in current {
        match previous.get(name) {
            None => {
                delta.added.insert(name.clone(), value.clone());
            }
            Some(old) if old != value => {
                delta.changed.insert(
                    name.clone(),
                    ValueChange {
                        old: old.clone(),
                        new: value.clone(),
                    },
                );
            }
            Some(_) => {}
        }
    }
    for (name, value) in previous {
        if !current.contains_key(name) {
            delta.removed.insert(name.clone(), value.clone());
        }
    }
    delta
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    fn bindings(pairs: &[(&str, &str)]) -> Bindings {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), CapturedValue::scalar(*v, None)))
            .collect()
    }

    #[test]
    fn test_first_capture_is_all_added() {
        let current = bindings(&[("x", "1"), ("y", "2")]);
        let delta = compute_delta(None, &current);
        assert_eq!(delta.added, current);
        assert!(delta.removed.is_empty());
        assert!(delta.changed.is_empty());
    }

    #[test]
    fn test_classifies_added_removed_changed() {
        let previous = bindings(&[("x", "1"), ("y", "2"), ("z", "3")]);
        let current = bindings(&[("x", "1"), ("y", "5"), ("w", "0")]);
        let delta = compute_delta(Some(&previous), &current);

        assert_eq!(delta.added.keys().collect::<Vec<_>>(), vec!["w"]);
        assert_eq!(delta.removed.keys().collect::<Vec<_>>(), vec!["z"]);
        let change = &delta.changed["y"];
        assert_eq!(change.old, CapturedValue::scalar("2", None));
        assert_eq!(change.new, CapturedValue::scalar("5", None));
    }

    #[test]
    fn test_identical_captures_have_empty_delta() {
        let previous = bindings(&[("x", "1")]);
        assert!(compute_delta(Some(&previous), &previous.clone()).is_empty());
    }

    fn arb_bindings() -> impl Strategy<Value = Bindings> {
        prop::collection::btree_map("[a-e]", "[0-3]", 0..6).prop_map(|map| {
            map.into_iter()
                .map(|(k, v)| (k, CapturedValue::scalar(v, None)))
                .collect()
        })
    }

    proptest! {
        #[test]
        fn delta_partitions_the_difference(previous in arb_bindings(), current in arb_bindings()) {
            let delta = compute_delta(Some(&previous), &current);

            let added: BTreeSet<_> = delta.added.keys().cloned().collect();
            let removed: BTreeSet<_> = delta.removed.keys().cloned().collect();
            let changed: BTreeSet<_> = delta.changed.keys().cloned().collect();

            prop_assert!(added.is_disjoint(&removed));
            prop_assert!(added.is_disjoint(&changed));
            prop_assert!(removed.is_disjoint(&changed));

            let prev_keys: BTreeSet<_> = previous.keys().cloned().collect();
            let curr_keys: BTreeSet<_> = current.keys().cloned().collect();
            let expected_added: BTreeSet<_> = curr_keys.difference(&prev_keys).cloned().collect();
            let expected_removed: BTreeSet<_> = prev_keys.difference(&curr_keys).cloned().collect();
            let expected_changed: BTreeSet<_> = curr_keys
                .intersection(&prev_keys)
                .filter(|k| previous[*k] != current[*k])
                .cloned()
                .collect();

            prop_assert_eq!(added, expected_added);
            prop_assert_eq!(removed, expected_removed);
            prop_assert_eq!(changed, expected_changed);
        }
    }
}
