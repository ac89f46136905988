//! Pure selection rules used by the moderator engine.

use crate::storage::{Participant, Question, Reaction};

/// Participants who may be asked to speak: everyone joined except the
/// current presenter and the last questioner. Input order is preserved.
pub fn eligible_participants<'a>(
    joined: &'a [Participant],
    presenter_id: &str,
    last_questioner: Option<&str>,
) -> Vec<&'a Participant> {
    joined
        .iter()
        .filter(|p| p.user_id != presenter_id)
        .filter(|p| Some(p.user_id.as_str()) != last_questioner)
        .collect()
}

/// Oldest unanswered question of the requested kind. `questions` must be
/// ordered oldest first.
pub fn oldest_pending(questions: &[Question], is_voice: bool) -> Option<&Question> {
    questions
        .iter()
        .find(|q| q.is_voice == is_voice && !q.answered)
}

/// The reaction to escalate, if any.
///
/// Takes the unsuggested reaction with the highest counter (the first one on
/// ties) and escalates it when its counter is positive and at least half of
/// `eligible`.
pub fn escalation_candidate(reactions: &[Reaction], eligible: usize) -> Option<&Reaction> {
    let top = reactions
        .iter()
        .filter(|r| !r.suggested)
        .fold(None::<&Reaction>, |best, r| match best {
            Some(b) if b.count >= r.count => Some(b),
            _ => Some(r),
        })?;

    let count = usize::try_from(top.count).ok()?;
    (count > 0 && count.saturating_mul(2) >= eligible).then_some(top)
}

/// Lowest speak count wins; ties go to the earliest in input order.
pub fn fairness_pick<'a>(eligible: &[&'a Participant]) -> Option<&'a Participant> {
    eligible.iter().copied().min_by_key(|p| p.speak_count)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn participant(user_id: &str, order: i32, speak_count: i32) -> Participant {
        Participant {
            meeting_id: 1,
            user_id: user_id.to_string(),
            presenter_order: order,
            speak_count,
            joining: true,
        }
    }

    fn reaction(page: i32, count: i32, suggested: bool) -> Reaction {
        Reaction {
            document_id: 1,
            page,
            count,
            suggested,
        }
    }

    fn question(id: i64, is_voice: bool, answered: bool, minutes: i64) -> Question {
        Question {
            id,
            document_id: 1,
            user_id: format!("user-{id}"),
            body: String::new(),
            page: 1,
            vote_count: 0,
            submitted_at: Utc.with_ymd_and_hms(2024, 4, 1, 10, 0, 0).unwrap()
                + Duration::minutes(minutes),
            answered,
            is_voice,
        }
    }

    #[test]
    fn test_fairness_picks_lowest_speak_count() {
        let joined = vec![
            participant("amy", -1, 2),
            participant("ben", -1, 0),
            participant("cat", -1, 1),
        ];
        let eligible = eligible_participants(&joined, "presenter", None);

        assert_eq!(fairness_pick(&eligible).unwrap().user_id, "ben");
    }

    #[test]
    fn test_fairness_ties_go_to_natural_order() {
        let joined = vec![
            participant("amy", -1, 1),
            participant("ben", -1, 0),
            participant("cat", -1, 0),
        ];
        let eligible = eligible_participants(&joined, "presenter", None);

        assert_eq!(fairness_pick(&eligible).unwrap().user_id, "ben");
    }

    #[test]
    fn test_eligible_excludes_presenter_and_last_questioner() {
        let joined = vec![
            participant("amy", 0, 0),
            participant("ben", -1, 0),
            participant("cat", -1, 3),
            participant("dan", 1, 5),
        ];

        let eligible = eligible_participants(&joined, "amy", Some("ben"));
        let ids: Vec<&str> = eligible.iter().map(|p| p.user_id.as_str()).collect();
        assert_eq!(ids, vec!["cat", "dan"]);

        assert_eq!(fairness_pick(&eligible).unwrap().user_id, "cat");
        assert!(fairness_pick(&[]).is_none());
    }

    #[test]
    fn test_escalation_boundary_with_four_eligible() {
        assert_eq!(
            escalation_candidate(&[reaction(3, 2, false)], 4).map(|r| r.page),
            Some(3)
        );
        assert!(escalation_candidate(&[reaction(3, 1, false)], 4).is_none());
    }

    #[test]
    fn test_escalation_takes_highest_unsuggested() {
        let reactions = vec![
            reaction(1, 9, true),
            reaction(2, 3, false),
            reaction(4, 5, false),
            reaction(6, 5, false),
        ];

        let picked = escalation_candidate(&reactions, 4).unwrap();
        assert_eq!(picked.page, 4, "suggested pages are skipped, ties keep the first");
    }

    #[test]
    fn test_escalation_needs_positive_count() {
        assert!(escalation_candidate(&[reaction(1, 0, false)], 0).is_none());
        assert!(escalation_candidate(&[reaction(1, -2, false)], 0).is_none());
        assert!(escalation_candidate(&[], 0).is_none());
    }

    #[test]
    fn test_oldest_pending_by_kind() {
        let questions = vec![
            question(1, true, true, 0),
            question(2, false, false, 1),
            question(3, true, false, 2),
            question(4, true, false, 3),
        ];

        assert_eq!(oldest_pending(&questions, true).unwrap().id, 3);
        assert_eq!(oldest_pending(&questions, false).unwrap().id, 2);
        assert!(oldest_pending(questions.get(..1).unwrap(), true).is_none());
    }
}
