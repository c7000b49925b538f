use gradelink_proto::{GradingResult, SessionStatus, StatusResponse};

/// What the initiator is showing. Only moves forward; `Completed` and
/// `Failed` absorb every later observation.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Phase {
    #[default]
    Waiting,
    Connected,
    Processing,
    Completed(GradingResult),
    Failed,
}

impl Phase {
    fn rank(&self) -> u8 {
        match self {
            Phase::Waiting => 0,
            Phase::Connected => 1,
            Phase::Processing => 2,
            Phase::Completed(_) | Phase::Failed => 3,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Completed(_) | Phase::Failed)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Phase::Waiting => "waiting",
            Phase::Connected => "connected",
            Phase::Processing => "processing",
            Phase::Completed(_) => "completed",
            Phase::Failed => "failed",
        }
    }

    pub fn result(&self) -> Option<&GradingResult> {
        match self {
            Phase::Completed(result) => Some(result),
            _ => None,
        }
    }
}

/// Side effect the poll loop owes after an observation.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    None,
    Advanced(Phase),
    /// Emitted once per session; carries the result for the callback.
    Completed(GradingResult),
    RemoteExpired,
    Failed,
}

#[derive(Debug, Default)]
pub struct PhaseMachine {
    phase: Phase,
    remote_expired: bool,
}

impl PhaseMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn remote_expired(&self) -> bool {
        self.remote_expired
    }

    /// True once no further observation can change anything.
    pub fn is_settled(&self) -> bool {
        self.phase.is_terminal() || self.remote_expired
    }

    pub fn observe(&mut self, response: &StatusResponse) -> Effect {
        if self.is_settled() {
            return Effect::None;
        }
        let target = match (response.status, &response.result) {
            (SessionStatus::WaitingForMobile, _) => Phase::Waiting,
            (SessionStatus::MobileConnected, _) => Phase::Connected,
            (SessionStatus::ImageUploaded, _) => Phase::Processing,
            (SessionStatus::Completed, Some(result)) => Phase::Completed(result.clone()),
            // Result not attached yet; a later tick carries it.
            (SessionStatus::Completed, None) => Phase::Processing,
            (SessionStatus::Failed, _) => Phase::Failed,
            (SessionStatus::Expired, _) => {
                self.remote_expired = true;
                return Effect::RemoteExpired;
            }
        };
        if target.rank() <= self.phase.rank() {
            return Effect::None;
        }
        self.phase = target.clone();
        match target {
            Phase::Completed(result) => Effect::Completed(result),
            Phase::Failed => Effect::Failed,
            other => Effect::Advanced(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gradelink_proto::Grade;
    use proptest::prelude::*;

    fn result() -> GradingResult {
        GradingResult {
            grade: Grade::Mark("9/10".into()),
            feedback: "Clear working.".into(),
            corrections: Vec::new(),
            strengths: vec!["units carried throughout".into()],
        }
    }

    fn observed(status: SessionStatus) -> StatusResponse {
        let result = (status == SessionStatus::Completed).then(result);
        StatusResponse { status, result }
    }

    fn expected_phase(status: SessionStatus) -> Phase {
        match status {
            SessionStatus::WaitingForMobile => Phase::Waiting,
            SessionStatus::MobileConnected => Phase::Connected,
            SessionStatus::ImageUploaded => Phase::Processing,
            SessionStatus::Completed => Phase::Completed(result()),
            SessionStatus::Failed => Phase::Failed,
            SessionStatus::Expired => unreachable!("expired leaves the phase untouched"),
        }
    }

    #[test]
    fn skipped_intermediate_statuses_go_straight_to_completed() {
        let mut machine = PhaseMachine::new();
        assert_eq!(machine.observe(&observed(SessionStatus::WaitingForMobile)), Effect::None);
        assert_eq!(
            machine.observe(&observed(SessionStatus::Completed)),
            Effect::Completed(result())
        );
        assert_eq!(machine.phase(), &Phase::Completed(result()));
    }

    #[test]
    fn completion_is_reported_once() {
        let mut machine = PhaseMachine::new();
        let completed = observed(SessionStatus::Completed);
        assert!(matches!(machine.observe(&completed), Effect::Completed(_)));
        assert_eq!(machine.observe(&completed), Effect::None);
        assert_eq!(machine.observe(&observed(SessionStatus::Failed)), Effect::None);
    }

    #[test]
    fn completed_without_result_waits_for_next_tick() {
        let mut machine = PhaseMachine::new();
        let bare = StatusResponse {
            status: SessionStatus::Completed,
            result: None,
        };
        assert_eq!(machine.observe(&bare), Effect::Advanced(Phase::Processing));
        assert_eq!(machine.observe(&bare), Effect::None);
        assert!(matches!(
            machine.observe(&observed(SessionStatus::Completed)),
            Effect::Completed(_)
        ));
    }

    #[test]
    fn stale_observations_do_not_move_backwards() {
        let mut machine = PhaseMachine::new();
        machine.observe(&observed(SessionStatus::ImageUploaded));
        assert_eq!(machine.observe(&observed(SessionStatus::MobileConnected)), Effect::None);
        assert_eq!(machine.phase(), &Phase::Processing);
    }

    #[test]
    fn remote_expiry_settles_without_changing_phase() {
        let mut machine = PhaseMachine::new();
        machine.observe(&observed(SessionStatus::MobileConnected));
        assert_eq!(machine.observe(&observed(SessionStatus::Expired)), Effect::RemoteExpired);
        assert!(machine.is_settled());
        assert_eq!(machine.phase(), &Phase::Connected);
        assert_eq!(machine.observe(&observed(SessionStatus::Completed)), Effect::None);
    }

    fn monotonic_statuses() -> impl Strategy<Value = Vec<SessionStatus>> {
        let progress = prop::collection::vec(0u8..=3, 1..12).prop_map(|mut ranks| {
            ranks.sort_unstable();
            ranks
                .into_iter()
                .map(|rank| match rank {
                    0 => SessionStatus::WaitingForMobile,
                    1 => SessionStatus::MobileConnected,
                    2 => SessionStatus::ImageUploaded,
                    _ => SessionStatus::Completed,
                })
                .collect::<Vec<_>>()
        });
        (progress, prop::bool::ANY).prop_map(|(mut statuses, fail)| {
            if fail && statuses.last() != Some(&SessionStatus::Completed) {
                statuses.push(SessionStatus::Failed);
            }
            statuses
        })
    }

    proptest! {
        #[test]
        fn phase_tracks_last_observed_status(statuses in monotonic_statuses()) {
            let mut machine = PhaseMachine::new();
            let mut completions = 0;
            for status in &statuses {
                if let Effect::Completed(_) = machine.observe(&observed(*status)) {
                    completions += 1;
                }
            }
            let last = *statuses.last().unwrap();
            prop_assert_eq!(machine.phase(), &expected_phase(last));
            prop_assert_eq!(completions, usize::from(last == SessionStatus::Completed));
        }
    }
}
