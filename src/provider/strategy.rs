use std::sync::Mutex;

use rand::seq::SliceRandom;

use super::super::config::Strategy;

/// Selects one instance out of a listing.
pub trait ProviderStrategy: Send + Sync {
    /// Pick an element of the listing, `None` only if the listing is empty.
    fn choose<'a>(&self, instances: &'a [String]) -> Option<&'a String>;
}

/// Build the strategy selected in the configuration.
pub fn from_config(strategy: Strategy) -> Box<dyn ProviderStrategy> {
    match strategy {
        Strategy::Random => Box::new(RandomStrategy),
        Strategy::RoundRobin => Box::new(RoundRobinStrategy::default()),
    }
}

/// Uniformly random pick, independent across calls.
#[derive(Debug, Default)]
pub struct RandomStrategy;

impl ProviderStrategy for RandomStrategy {
    fn choose<'a>(&self, instances: &'a [String]) -> Option<&'a String> {
        instances.choose(&mut rand::thread_rng())
    }
}

/// Cycle through the listing, one step per call.
///
/// The cursor wraps around the length of the listing passed to each call and
/// restarts from the first element if the listing shrank below it.
#[derive(Debug, Default)]
pub struct RoundRobinStrategy {
    cursor: Mutex<usize>,
}

impl ProviderStrategy for RoundRobinStrategy {
    fn choose<'a>(&self, instances: &'a [String]) -> Option<&'a String> {
        if instances.is_empty() {
            return None;
        }
        let mut cursor = self.cursor.lock().expect("RoundRobinStrategy::cursor lock poisoned");
        let mut index = *cursor;
        if index >= instances.len() {
            index = 0;
        }
        *cursor = (index + 1) % instances.len();
        instances.get(index)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::ProviderStrategy;
    use super::RandomStrategy;
    use super::RoundRobinStrategy;

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn empty_listing_has_no_choice() {
        assert_eq!(RandomStrategy.choose(&[]), None);
        assert_eq!(RoundRobinStrategy::default().choose(&[]), None);
    }

    #[test]
    fn random_picks_members() {
        let listing = names(&["a", "b", "c"]);
        let strategy = RandomStrategy;
        let mut seen = HashSet::new();
        for _ in 0..200 {
            let pick = strategy.choose(&listing).unwrap();
            assert!(listing.contains(pick));
            seen.insert(pick.clone());
        }
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn round_robin_cycles() {
        let listing = names(&["a", "b", "c"]);
        let strategy = RoundRobinStrategy::default();
        let picks: Vec<&String> = (0..6).map(|_| strategy.choose(&listing).unwrap()).collect();
        assert_eq!(picks, vec!["a", "b", "c", "a", "b", "c"]);
    }

    #[test]
    fn round_robin_restarts_when_listing_shrinks() {
        let strategy = RoundRobinStrategy::default();
        let listing = names(&["a", "b", "c"]);
        strategy.choose(&listing);
        strategy.choose(&listing);
        let shrunk = names(&["z"]);
        assert_eq!(strategy.choose(&shrunk).unwrap(), "z");
        assert_eq!(strategy.choose(&shrunk).unwrap(), "z");
        let two = names(&["x", "y"]);
        assert_eq!(strategy.choose(&two).unwrap(), "x");
        assert_eq!(strategy.choose(&two).unwrap(), "y");
    }
}
