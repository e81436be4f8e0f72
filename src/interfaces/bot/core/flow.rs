use crate::application::admin::AdminField;
use crate::application::ledger::types::{RewardRange, UserId};
use crate::application::tasks::types::TaskId;
use crate::interfaces::bot::ui::states::{State, TaskDraft};

/// Shape of an inbound event once the handler has classified it.
#[derive(Clone, Debug, PartialEq)]
pub enum Input {
    Cancel,
    Text(String),
    /// Telegram file id of the largest photo size.
    Photo(String),
    Skip,
    Confirm,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Action {
    /// Nothing expected in the current state.
    Ignore,
    Cancelled,
    /// Input had the wrong shape; the state is unchanged.
    Reprompt(&'static str),
    /// Moved to a state that asks for more input.
    Prompt,
    OpenInvoice { amount: String },
    SubmitWithdrawal { amount: u64 },
    SubmitProof { task_id: TaskId, image_ref: String },
    CreateTask { draft: TaskDraft, image: Option<String> },
    DeleteTask(TaskId),
    Broadcast(String),
    SelectAdminTarget(UserId),
    EditUser { target: UserId, field: AdminField, value: String },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Step {
    pub action: Action,
    pub next: State,
}

impl Step {
    fn to(action: Action, next: State) -> Self {
        Self { action, next }
    }

    fn stay(state: &State, hint: &'static str) -> Self {
        Self::to(Action::Reprompt(hint), state.clone())
    }

    fn prompt(next: State) -> Self {
        Self::to(Action::Prompt, next)
    }

    fn finish(action: Action) -> Self {
        Self::to(action, State::Idle)
    }
}

const NEED_NUMBER: &str = "Please send a positive whole number.";
const NEED_AMOUNT: &str = "Please send a positive amount, for example 5 or 2.5.";
const NEED_TEXT: &str = "Please send text.";
const NEED_PHOTO: &str = "Please send a photo.";
const NEED_CONFIRM: &str = "Press Confirm to continue or Cancel to stop.";
const NEED_RANGE: &str = "Send a reward like 7 or a range like 5-10.";
const NEED_FIELD: &str = "Choose one of the offered fields.";
const NEED_USER_ID: &str = "Please send a numeric user id.";

/// The single (state, input) dispatch table of every multi-step conversation.
pub fn advance(state: &State, input: Input) -> Step {
    if input == Input::Cancel {
        return Step::finish(Action::Cancelled);
    }

    match (state, input) {
        (State::Idle, _) => Step::to(Action::Ignore, State::Idle),

        (State::AwaitingDepositAmount, Input::Text(text)) => match parse_amount(&text) {
            Some(()) => Step::finish(Action::OpenInvoice {
                amount: text.trim().to_string(),
            }),
            None => Step::stay(state, NEED_AMOUNT),
        },
        (State::AwaitingDepositAmount, _) => Step::stay(state, NEED_AMOUNT),

        (State::AwaitingWithdrawAmount, Input::Text(text)) => match parse_positive::<u64>(&text) {
            Some(amount) => Step::prompt(State::AwaitingWithdrawConfirm { amount }),
            None => Step::stay(state, NEED_NUMBER),
        },
        (State::AwaitingWithdrawAmount, _) => Step::stay(state, NEED_NUMBER),

        (State::AwaitingWithdrawConfirm { amount }, Input::Confirm) => {
            Step::finish(Action::SubmitWithdrawal { amount: *amount })
        }
        (State::AwaitingWithdrawConfirm { .. }, _) => Step::stay(state, NEED_CONFIRM),

        (State::AwaitingTaskProof { task_id }, Input::Photo(image_ref)) => {
            Step::finish(Action::SubmitProof {
                task_id: *task_id,
                image_ref,
            })
        }
        (State::AwaitingTaskProof { .. }, _) => Step::stay(state, NEED_PHOTO),

        (State::AwaitingBroadcastText, Input::Text(text)) if !text.trim().is_empty() => {
            Step::finish(Action::Broadcast(text))
        }
        (State::AwaitingBroadcastText, _) => Step::stay(state, NEED_TEXT),

        (State::AwaitingTaskFieldNumber, Input::Text(text)) => match parse_positive::<u32>(&text) {
            Some(number) => Step::prompt(State::AwaitingTaskFieldText {
                number: Some(number),
            }),
            None => Step::stay(state, NEED_NUMBER),
        },
        (State::AwaitingTaskFieldNumber, Input::Skip) => {
            Step::prompt(State::AwaitingTaskFieldText { number: None })
        }
        (State::AwaitingTaskFieldNumber, _) => Step::stay(state, NEED_NUMBER),

        (State::AwaitingTaskFieldText { number }, Input::Text(text)) if !text.trim().is_empty() => {
            Step::prompt(State::AwaitingTaskFieldReward {
                draft: TaskDraft {
                    number: *number,
                    description: text.trim().to_string(),
                    ..TaskDraft::default()
                },
            })
        }
        (State::AwaitingTaskFieldText { .. }, _) => Step::stay(state, NEED_TEXT),

        (State::AwaitingTaskFieldReward { draft }, Input::Text(text)) => {
            match RewardRange::parse(&text).filter(|range| range.max > 0) {
                Some(reward) => Step::prompt(State::AwaitingTaskFieldCap {
                    draft: TaskDraft {
                        reward: Some(reward),
                        ..draft.clone()
                    },
                }),
                None => Step::stay(state, NEED_RANGE),
            }
        }
        (State::AwaitingTaskFieldReward { draft }, Input::Skip) => {
            Step::prompt(State::AwaitingTaskFieldCap {
                draft: draft.clone(),
            })
        }
        (State::AwaitingTaskFieldReward { .. }, _) => Step::stay(state, NEED_RANGE),

        (State::AwaitingTaskFieldCap { draft }, Input::Text(text)) => {
            match parse_positive::<u32>(&text) {
                Some(cap) => Step::prompt(State::AwaitingTaskFieldPhoto {
                    draft: TaskDraft {
                        max_performers: Some(cap),
                        ..draft.clone()
                    },
                }),
                None => Step::stay(state, NEED_NUMBER),
            }
        }
        (State::AwaitingTaskFieldCap { draft }, Input::Skip) => {
            Step::prompt(State::AwaitingTaskFieldPhoto {
                draft: draft.clone(),
            })
        }
        (State::AwaitingTaskFieldCap { .. }, _) => Step::stay(state, NEED_NUMBER),

        (State::AwaitingTaskFieldPhoto { draft }, Input::Photo(image)) => {
            Step::finish(Action::CreateTask {
                draft: draft.clone(),
                image: Some(image),
            })
        }
        (State::AwaitingTaskFieldPhoto { draft }, Input::Skip) => Step::finish(Action::CreateTask {
            draft: draft.clone(),
            image: None,
        }),
        (State::AwaitingTaskFieldPhoto { .. }, _) => Step::stay(state, NEED_PHOTO),

        (State::AwaitingTaskDeleteNumber, Input::Text(text)) => match parse_positive::<u32>(&text)
        {
            Some(task_id) => Step::finish(Action::DeleteTask(task_id)),
            None => Step::stay(state, NEED_NUMBER),
        },
        (State::AwaitingTaskDeleteNumber, _) => Step::stay(state, NEED_NUMBER),

        (State::AwaitingAdminTargetId, Input::Text(text)) => match text.trim().parse::<UserId>() {
            Ok(target) => Step::to(
                Action::SelectAdminTarget(target),
                State::AwaitingAdminField { target },
            ),
            Err(_) => Step::stay(state, NEED_USER_ID),
        },
        (State::AwaitingAdminTargetId, _) => Step::stay(state, NEED_USER_ID),

        (State::AwaitingAdminField { target }, Input::Text(text)) => {
            match AdminField::parse(&text.trim().to_lowercase()) {
                Some(field) => Step::prompt(State::AwaitingAdminValue {
                    target: *target,
                    field,
                }),
                None => Step::stay(state, NEED_FIELD),
            }
        }
        (State::AwaitingAdminField { .. }, _) => Step::stay(state, NEED_FIELD),

        (State::AwaitingAdminValue { target, field }, Input::Text(value)) => {
            Step::finish(Action::EditUser {
                target: *target,
                field: *field,
                value,
            })
        }
        (State::AwaitingAdminValue { .. }, _) => Step::stay(state, NEED_TEXT),
    }
}

fn parse_positive<T>(text: &str) -> Option<T>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    text.trim()
        .parse::<T>()
        .ok()
        .filter(|value| *value > T::default())
}

/// Shape check only; unit conversion and rounding happen when the invoice is opened.
fn parse_amount(text: &str) -> Option<()> {
    let value: f64 = text.trim().replace(',', ".").parse().ok()?;
    (value.is_finite() && value > 0.0).then_some(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(value: &str) -> Input {
        Input::Text(value.to_string())
    }

    fn all_states() -> Vec<State> {
        let draft = TaskDraft {
            number: Some(1),
            description: "Follow".to_string(),
            reward: None,
            max_performers: None,
        };
        vec![
            State::AwaitingDepositAmount,
            State::AwaitingWithdrawAmount,
            State::AwaitingWithdrawConfirm { amount: 10 },
            State::AwaitingTaskProof { task_id: 1 },
            State::AwaitingBroadcastText,
            State::AwaitingTaskFieldNumber,
            State::AwaitingTaskFieldText { number: None },
            State::AwaitingTaskFieldReward {
                draft: draft.clone(),
            },
            State::AwaitingTaskFieldCap {
                draft: draft.clone(),
            },
            State::AwaitingTaskFieldPhoto { draft },
            State::AwaitingTaskDeleteNumber,
            State::AwaitingAdminTargetId,
            State::AwaitingAdminField { target: 5 },
            State::AwaitingAdminValue {
                target: 5,
                field: AdminField::Balance,
            },
        ]
    }

    #[test]
    fn cancel_returns_every_state_to_idle() {
        for state in all_states() {
            let step = advance(&state, Input::Cancel);
            assert_eq!(step.action, Action::Cancelled, "{:?}", state);
            assert_eq!(step.next, State::Idle);
        }
    }

    #[test]
    fn wrong_shape_reprompts_without_leaving_the_state() {
        let cases = vec![
            (State::AwaitingDepositAmount, text("abc")),
            (State::AwaitingDepositAmount, text("-3")),
            (State::AwaitingWithdrawAmount, text("ten")),
            (State::AwaitingWithdrawAmount, text("0")),
            (State::AwaitingWithdrawConfirm { amount: 5 }, text("yes")),
            (State::AwaitingTaskProof { task_id: 2 }, text("done")),
            (State::AwaitingTaskFieldNumber, text("x")),
            (State::AwaitingTaskFieldPhoto { draft: TaskDraft::default() }, text("no photo")),
            (State::AwaitingAdminTargetId, text("@someone")),
            (State::AwaitingAdminField { target: 1 }, text("referrals")),
            (State::AwaitingBroadcastText, Input::Photo("file".to_string())),
        ];
        for (state, input) in cases {
            let step = advance(&state, input);
            assert!(matches!(step.action, Action::Reprompt(_)), "{:?}", state);
            assert_eq!(step.next, state);
        }
    }

    #[test]
    fn idle_ignores_free_input() {
        let step = advance(&State::Idle, text("hello"));
        assert_eq!(step.action, Action::Ignore);
        assert!(step.next.is_idle());
    }

    #[test]
    fn withdrawal_needs_confirmation() {
        let step = advance(&State::AwaitingWithdrawAmount, text(" 25 "));
        assert_eq!(step.next, State::AwaitingWithdrawConfirm { amount: 25 });
        let step = advance(&step.next, Input::Confirm);
        assert_eq!(step.action, Action::SubmitWithdrawal { amount: 25 });
        assert!(step.next.is_idle());
    }

    #[test]
    fn deposit_accepts_decimal_comma() {
        let step = advance(&State::AwaitingDepositAmount, text("2,5"));
        assert_eq!(
            step.action,
            Action::OpenInvoice {
                amount: "2,5".to_string()
            }
        );
    }

    #[test]
    fn task_creation_collects_every_field() {
        let step = advance(&State::AwaitingTaskFieldNumber, text("7"));
        let step = advance(&step.next, text("Join the channel"));
        let step = advance(&step.next, text("5-10"));
        let step = advance(&step.next, text("50"));
        assert!(matches!(step.next, State::AwaitingTaskFieldPhoto { .. }));
        let step = advance(&step.next, Input::Photo("photo-id".to_string()));
        match step.action {
            Action::CreateTask { draft, image } => {
                assert_eq!(draft.number, Some(7));
                assert_eq!(draft.description, "Join the channel");
                assert_eq!(draft.reward, RewardRange::new(5, 10));
                assert_eq!(draft.max_performers, Some(50));
                assert_eq!(image.as_deref(), Some("photo-id"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(step.next.is_idle());
    }

    #[test]
    fn optional_task_fields_can_be_skipped() {
        let step = advance(&State::AwaitingTaskFieldNumber, Input::Skip);
        assert_eq!(step.next, State::AwaitingTaskFieldText { number: None });
        let step = advance(&step.next, text("Like a post"));
        let step = advance(&step.next, Input::Skip);
        let step = advance(&step.next, Input::Skip);
        let step = advance(&step.next, Input::Skip);
        match step.action {
            Action::CreateTask { draft, image } => {
                assert_eq!(draft.reward, None);
                assert_eq!(draft.max_performers, None);
                assert_eq!(image, None);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn admin_edit_walks_target_field_value() {
        let step = advance(&State::AwaitingAdminTargetId, text("42"));
        assert_eq!(step.action, Action::SelectAdminTarget(42));
        let step = advance(&step.next, text("Balance"));
        assert_eq!(
            step.next,
            State::AwaitingAdminValue {
                target: 42,
                field: AdminField::Balance
            }
        );
        let step = advance(&step.next, text("100"));
        assert!(matches!(step.action, Action::EditUser { target: 42, .. }));
        assert!(step.next.is_idle());
    }
}
