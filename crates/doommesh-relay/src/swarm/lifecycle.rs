//! Match swarm state machine: `none -> active -> none`.
//!
//! At most one match swarm is active per relay. Entering a different match
//! replaces the current one; the caller tears the old one down.

use super::topic::Topic;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveMatch {
    pub match_id: String,
    pub topic: Topic,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Ensure {
    /// Already in this match on this topic.
    Unchanged,
    /// Entered the match; `replaced` is the swarm that must be torn down.
    Created { replaced: Option<ActiveMatch> },
}

#[derive(Debug, Default)]
pub struct MatchSwarm {
    active: Option<ActiveMatch>,
}

impl MatchSwarm {
    pub fn match_id(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.match_id.as_str())
    }

    pub fn topic(&self) -> Option<Topic> {
        self.active.as_ref().map(|a| a.topic)
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn ensure(&mut self, match_id: &str, topic: Topic) -> Ensure {
        if let Some(a) = &self.active {
            if a.match_id == match_id && a.topic == topic {
                return Ensure::Unchanged;
            }
        }
        let replaced = self.active.replace(ActiveMatch {
            match_id: match_id.to_string(),
            topic,
        });
        Ensure::Created { replaced }
    }

    /// `active -> none`.
    pub fn take(&mut self) -> Option<ActiveMatch> {
        self.active.take()
    }

    /// The transport failed to join `topic`; revert if it is still current.
    pub fn join_failed(&mut self, topic: Topic) -> Option<ActiveMatch> {
        if self.topic() == Some(topic) {
            self.active.take()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_is_idempotent_and_switch_reports_old_swarm() {
        let mut s = MatchSwarm::default();
        let t1 = Topic::for_match("c", "g1");
        let t2 = Topic::for_match("c", "g2");
        assert_eq!(s.ensure("g1", t1), Ensure::Created { replaced: None });
        assert_eq!(s.ensure("g1", t1), Ensure::Unchanged);
        match s.ensure("g2", t2) {
            Ensure::Created { replaced: Some(old) } => assert_eq!(old.match_id, "g1"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(s.match_id(), Some("g2"));
    }

    #[test]
    fn take_returns_to_none() {
        let mut s = MatchSwarm::default();
        s.ensure("g1", Topic::for_match("c", "g1"));
        assert_eq!(s.take().map(|a| a.match_id), Some("g1".to_string()));
        assert!(!s.is_active());
        assert!(s.take().is_none());
    }

    #[test]
    fn stale_join_failure_is_ignored() {
        let mut s = MatchSwarm::default();
        let t1 = Topic::for_match("c", "g1");
        s.ensure("g1", t1);
        s.ensure("g2", Topic::for_match("c", "g2"));
        assert!(s.join_failed(t1).is_none());
        assert_eq!(s.match_id(), Some("g2"));
    }
}
