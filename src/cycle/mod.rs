use std::collections::HashMap;
use log::debug;

/// Remembers which meters already reported in the running measurement cycle.
///
/// Several meters share one decoder stream and some of them transmit far
/// more often than others, so a cycle is only complete once every
/// configured meter delivered one fresh reading.
pub struct CycleTracker {
    seen: HashMap<String, bool>,
}

impl CycleTracker {
    pub fn new<I, S>(meter_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        return CycleTracker {
            seen: meter_ids.into_iter().map(|id| (id.into(), false)).collect(),
        }
    }

    /// Marks a meter as seen, returns `true` if it was not seen before in
    /// this cycle. Ids that are not configured are ignored.
    pub fn mark_seen(&mut self, meter_id: &str) -> bool {
        return match self.seen.get_mut(meter_id) {
            Some(flag) if !*flag => {
                *flag = true;
                true
            }
            Some(_) => false,
            None => {
                debug!("Ignoring unknown meter {meter_id} in cycle tracking");
                false
            }
        };
    }

    pub fn is_seen(&self, meter_id: &str) -> bool {
        return self.seen.get(meter_id).copied().unwrap_or(false);
    }

    pub fn is_cycle_complete(&self) -> bool {
        return !self.seen.is_empty() && self.seen.values().all(|seen| *seen);
    }

    pub fn missing(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.seen.iter()
            .filter(|(_, seen)| !**seen)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        return ids;
    }

    pub fn reset(&mut self) {
        for flag in self.seen.values_mut() {
            *flag = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complete_after_all_seen() {
        let mut tracker = CycleTracker::new(["A", "B"]);
        assert!(!tracker.is_cycle_complete());

        assert!(tracker.mark_seen("A"));
        assert!(!tracker.is_cycle_complete());

        /* a second reading of A must not complete the cycle */
        assert!(!tracker.mark_seen("A"));
        assert!(!tracker.is_cycle_complete());
        assert_eq!(tracker.missing(), vec!["B".to_string()]);

        assert!(tracker.mark_seen("B"));
        assert!(tracker.is_cycle_complete());
    }

    #[test]
    fn test_reset_clears_all() {
        let mut tracker = CycleTracker::new(vec!["A".to_string(), "B".to_string()]);
        tracker.mark_seen("A");
        tracker.mark_seen("B");
        assert!(tracker.is_cycle_complete());

        tracker.reset();
        assert!(!tracker.is_cycle_complete());
        assert!(!tracker.is_seen("A"));
        assert!(!tracker.is_seen("B"));
    }

    #[test]
    fn test_unknown_ids_ignored() {
        let mut tracker = CycleTracker::new(["A"]);
        assert!(!tracker.mark_seen("Z"));
        assert!(!tracker.is_seen("Z"));
        assert!(!tracker.is_cycle_complete());
    }

    #[test]
    fn test_empty_set_never_completes() {
        let tracker = CycleTracker::new(Vec::<String>::new());
        assert!(!tracker.is_cycle_complete());
    }
}
