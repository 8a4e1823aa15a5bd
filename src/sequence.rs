use std::cmp::Ordering;

/// Separator between a node prefix and its store-assigned sequence number.
pub const SEQUENCE_SEPARATOR: char = '-';

/// Extract the numeric sequence suffix of a sequential node name.
///
/// The suffix is whatever follows the last `SEQUENCE_SEPARATOR` (or the whole name
/// if no separator is present) and must be a non-negative integer.
pub fn sequence_number(name: &str) -> Option<u64> {
    let suffix = match name.rfind(SEQUENCE_SEPARATOR) {
        Some(index) => &name[index + 1..],
        None => name,
    };
    suffix.parse().ok()
}

/// Order two sibling names by their sequence number.
///
/// Names without a valid sequence number sort after all numbered names,
/// amongst themselves by name.
pub fn compare(left: &str, right: &str) -> Ordering {
    match (sequence_number(left), sequence_number(right)) {
        (Some(left), Some(right)) => left.cmp(&right),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => left.cmp(right),
    }
}

/// Sort sibling names in place by sequence number (stable).
pub fn sort(siblings: &mut [String]) {
    siblings.sort_by(|left, right| compare(left, right));
}

#[cfg(test)]
mod tests {
    use super::sequence_number;
    use super::sort;

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn suffix_after_last_separator() {
        assert_eq!(sequence_number("iron-throne-0000000042"), Some(42));
        assert_eq!(sequence_number("node-9"), Some(9));
        assert_eq!(sequence_number("17"), Some(17));
        assert_eq!(sequence_number("node-"), None);
        assert_eq!(sequence_number("node-abc"), None);
    }

    #[test]
    fn numeric_not_lexicographic() {
        let mut siblings = names(&["a-10", "b-9", "c-100", "d-1"]);
        sort(&mut siblings);
        assert_eq!(siblings, names(&["d-1", "b-9", "a-10", "c-100"]));
    }

    #[test]
    fn independent_of_prefix() {
        let mut siblings = names(&["zzz-0000000002", "aaa-0000000003", "mmm-0000000001"]);
        sort(&mut siblings);
        assert_eq!(
            siblings,
            names(&["mmm-0000000001", "zzz-0000000002", "aaa-0000000003"])
        );
    }

    #[test]
    fn unnumbered_names_sort_last() {
        let mut siblings = names(&["stray", "node-2", "other", "node-1"]);
        sort(&mut siblings);
        assert_eq!(siblings, names(&["node-1", "node-2", "other", "stray"]));
    }

    #[test]
    fn equal_sequences_keep_input_order() {
        let mut siblings = names(&["b-5", "a-5", "c-1"]);
        sort(&mut siblings);
        assert_eq!(siblings, names(&["c-1", "b-5", "a-5"]));
    }
}
