//! Frequency tallies shared by the detection stages

/// Counts in first-seen order
pub fn tally<T: PartialEq>(values: impl IntoIterator<Item = T>) -> Vec<(T, usize)> {
    let mut counts: Vec<(T, usize)> = Vec::new();
    for value in values {
        match counts.iter_mut().find(|(seen, _)| *seen == value) {
            Some((_, count)) => *count += 1,
            None => counts.push((value, 1)),
        }
    }
    counts
}

/// Most frequent value; a tie goes to the value seen first
pub fn most_frequent<T: PartialEq>(values: impl IntoIterator<Item = T>) -> Option<T> {
    let mut best: Option<(T, usize)> = None;
    for (value, count) in tally(values) {
        if best.as_ref().map_or(true, |(_, top)| count > *top) {
            best = Some((value, count));
        }
    }
    best.map(|(value, _)| value)
}

/// Value with the strictly highest count, `None` when the lead is shared
pub fn unique_most_frequent<T: PartialEq>(values: impl IntoIterator<Item = T>) -> Option<T> {
    let counts = tally(values);
    let top = counts.iter().map(|(_, count)| *count).max()?;
    let mut leaders = counts.into_iter().filter(|(_, count)| *count == top);
    let leader = leaders.next()?;
    leaders.next().is_none().then_some(leader.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tally_keeps_first_seen_order() {
        assert_eq!(tally(["/b", "/a", "/b"]), vec![("/b", 2), ("/a", 1)]);
        assert!(tally(Vec::<&str>::new()).is_empty());
    }

    #[test]
    fn test_most_frequent_tie_goes_to_first_seen() {
        assert_eq!(most_frequent(["/a", "/b"]), Some("/a"));
        assert_eq!(most_frequent(["/a", "/b", "/b"]), Some("/b"));
        assert_eq!(most_frequent(Vec::<&str>::new()), None);
    }

    #[test]
    fn test_unique_most_frequent_rejects_ties() {
        assert_eq!(unique_most_frequent(["/a", "/b", "/a"]), Some("/a"));
        assert_eq!(unique_most_frequent(["/a", "/b"]), None);
        assert_eq!(unique_most_frequent(Vec::<&str>::new()), None);
    }
}
