use super::super::sequence;
use super::ElectionEvent;
use super::ElectionStatus;

/// Outcome of evaluating a fresh listing of election candidates.
#[derive(Debug)]
pub(crate) enum Evaluation {
    /// The derived state was updated, emit these events (possibly none).
    Changed(Vec<ElectionEvent>),

    /// No candidates are left in the election.
    Empty,

    /// The candidates list does not include this participant's node.
    NodeMissing,

    /// The election was withdrawn or has no node: the listing is ignored.
    Stale,
}

/// Election state owned by a single participant.
///
/// All changes derived from the candidates listing go through `ElectionState::evaluate`.
#[derive(Debug, Default)]
pub(crate) struct ElectionState {
    /// A children watcher is installed for the current epoch.
    pub armed: bool,

    /// Incremented every time the node is claimed or released.
    ///
    /// Watchers and listings from an older epoch are ignored.
    pub epoch: u64,
    pub follower: Option<String>,
    pub is_group_leader: bool,
    pub leader: Option<String>,

    /// Name (not path) of the node owned by this participant.
    pub node: Option<String>,

    /// Node from a previous session that may still need removal.
    pub stale_node: Option<String>,
    pub status: ElectionStatus,
    pub topology: Vec<String>,

    /// Token of the most recently armed watcher.
    pub watch: u64,
    pub withdrawn: bool,
}

impl ElectionState {
    /// Check if a cycle started in `epoch` may still change the state.
    pub fn accepts(&self, epoch: u64) -> bool {
        self.epoch == epoch && !self.withdrawn && self.node.is_some()
    }

    /// Derive leader, follower and topology from a candidates listing.
    pub fn evaluate(&mut self, children: Vec<String>) -> Evaluation {
        if self.withdrawn {
            return Evaluation::Stale;
        }
        let node = match self.node.as_ref() {
            Some(node) => node.clone(),
            None => return Evaluation::Stale,
        };
        if children.is_empty() {
            return Evaluation::Empty;
        }

        let mut siblings = children;
        sequence::sort(&mut siblings);
        let index = match siblings.iter().position(|sibling| *sibling == node) {
            Some(index) => index,
            None => return Evaluation::NodeMissing,
        };
        let leader = match index {
            0 => None,
            index => Some(siblings[index - 1].clone()),
        };
        let follower = siblings.get(index + 1).cloned();

        let mut events = Vec::new();
        if index == 0 && !self.is_group_leader {
            self.is_group_leader = true;
            events.push(ElectionEvent::GroupLeader);
        }
        if index != 0 {
            self.is_group_leader = false;
        }
        if leader != self.leader {
            self.leader = leader.clone();
            events.push(ElectionEvent::LeaderChanged(leader));
        }
        if follower != self.follower {
            self.follower = follower.clone();
            events.push(ElectionEvent::FollowerChanged(follower));
        }
        if siblings != self.topology {
            self.topology = siblings.clone();
            events.push(ElectionEvent::TopologyChanged(siblings));
        }
        self.status = if self.is_group_leader {
            ElectionStatus::Leader
        } else {
            ElectionStatus::Follower
        };
        Evaluation::Changed(events)
    }

    /// Forget everything derived from candidate listings.
    pub fn reset_derived(&mut self) {
        self.follower = None;
        self.is_group_leader = false;
        self.leader = None;
        self.topology.clear();
    }

    /// Move to the withdrawn state and return the node that should be removed, if any.
    pub fn withdraw(&mut self) -> Option<String> {
        self.reset_derived();
        self.armed = false;
        self.epoch += 1;
        self.status = ElectionStatus::Withdrawn;
        self.withdrawn = true;
        self.node.take()
    }
}

#[cfg(test)]
mod tests {
    use super::super::ElectionEvent;
    use super::super::ElectionStatus;
    use super::ElectionState;
    use super::Evaluation;

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    fn state(node: &str) -> ElectionState {
        ElectionState {
            node: Some(node.to_string()),
            status: ElectionStatus::Active,
            ..Default::default()
        }
    }

    fn events(evaluation: Evaluation) -> Vec<ElectionEvent> {
        match evaluation {
            Evaluation::Changed(events) => events,
            other => panic!("unexpected evaluation {:?}", other),
        }
    }

    #[test]
    fn lowest_sequence_becomes_group_leader() {
        let mut state = state("a-0000000001");
        let events = events(state.evaluate(names(&["b-0000000002", "a-0000000001"])));
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], ElectionEvent::GroupLeader));
        assert!(matches!(
            &events[1],
            ElectionEvent::FollowerChanged(Some(follower)) if follower == "b-0000000002"
        ));
        assert!(matches!(&events[2], ElectionEvent::TopologyChanged(topology) if topology.len() == 2));
        assert!(state.is_group_leader);
        assert_eq!(state.leader, None);
        assert_eq!(state.status, ElectionStatus::Leader);
    }

    #[test]
    fn middle_participant_tracks_both_neighbours() {
        let mut state = state("x-10");
        let events = events(state.evaluate(names(&["x-100", "x-10", "x-9"])));
        assert_eq!(state.leader.as_deref(), Some("x-9"));
        assert_eq!(state.follower.as_deref(), Some("x-100"));
        assert_eq!(state.topology, names(&["x-9", "x-10", "x-100"]));
        assert!(!state.is_group_leader);
        assert_eq!(state.status, ElectionStatus::Follower);
        assert!(matches!(&events[0], ElectionEvent::LeaderChanged(Some(leader)) if leader == "x-9"));
    }

    #[test]
    fn unchanged_listing_emits_nothing() {
        let mut state = state("x-2");
        let listing = names(&["x-1", "x-2", "x-3"]);
        let first = events(state.evaluate(listing.clone()));
        assert!(!first.is_empty());
        let again = events(state.evaluate(listing));
        assert!(again.is_empty());
    }

    #[test]
    fn group_leader_fires_once_per_ascent() {
        let mut state = state("x-2");
        events(state.evaluate(names(&["x-1", "x-2"])));
        let ascent = events(state.evaluate(names(&["x-2"])));
        let leaders = ascent
            .iter()
            .filter(|event| matches!(event, ElectionEvent::GroupLeader))
            .count();
        assert_eq!(leaders, 1);
        assert!(matches!(&ascent[1], ElectionEvent::LeaderChanged(None)));
        let stay = events(state.evaluate(names(&["x-2", "x-3"])));
        assert!(!stay.iter().any(|event| matches!(event, ElectionEvent::GroupLeader)));
    }

    #[test]
    fn topology_compared_as_sequence() {
        let mut state = state("x-1");
        events(state.evaluate(names(&["x-1", "x-2", "x-3"])));
        // Same length, different members.
        let events = events(state.evaluate(names(&["x-1", "x-3", "x-4"])));
        assert!(matches!(
            &events[..],
            [ElectionEvent::FollowerChanged(Some(_)), ElectionEvent::TopologyChanged(_)]
        ));
    }

    #[test]
    fn empty_listing_is_reported() {
        let mut state = state("x-1");
        assert!(matches!(state.evaluate(Vec::new()), Evaluation::Empty));
    }

    #[test]
    fn missing_node_is_reported() {
        let mut state = state("x-1");
        assert!(matches!(state.evaluate(names(&["x-2"])), Evaluation::NodeMissing));
    }

    #[test]
    fn withdrawn_state_ignores_listings() {
        let mut state = state("x-1");
        assert_eq!(state.withdraw().as_deref(), Some("x-1"));
        assert!(matches!(state.evaluate(names(&["x-1"])), Evaluation::Stale));
        assert!(!state.is_group_leader);
        assert!(!state.accepts(state.epoch));
    }

    #[test]
    fn older_epochs_are_rejected() {
        let mut state = state("x-1");
        state.epoch = 3;
        assert!(state.accepts(3));
        assert!(!state.accepts(2));
    }
}
