//! Scripted reply flow.
//!
//! The conversation position is never stored server-side: every button
//! carries the token of the state it leads to, and the provider echoes that
//! token back as a callback when the user taps it.

use tracing::{debug, error, info};

use crate::channel::{Button, ChannelError, OutboundReply, ReplyChannel};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Start,
    UseWeni,
    DontUseWeni,
    SupportWeni,
    NewProductsWeni,
    ProductDetails,
    HireServices,
    TalkSpecialist,
}

struct FlowStep {
    state: FlowState,
    token: Option<&'static str>,
    text: &'static str,
    buttons: &'static [(&'static str, FlowState)],
}

const WELCOME_TEXT: &str = "Hello! Welcome to Weni support. \
Are you already a Weni customer?";

const EXISTING_USER_TEXT: &str = "Great to see you again! \
How can we help you today?";

const NEW_USER_TEXT: &str = "No problem, we would love to introduce you to Weni. \
What would you like to do?";

const SUPPORT_HANDOFF_TEXT: &str = "Thanks! A support agent will join this \
conversation shortly to help you.";

const PRODUCT_MENU_TEXT: &str = "These are our newest products. \
Would you like to know more or talk to one of our specialists?";

const PRODUCT_DETAILS_TEXT: &str = "Weni is a platform for building and running \
conversational experiences. With Weni you can design chatbot flows without code, \
connect them to messaging channels like Telegram and WhatsApp, plug in artificial \
intelligence to understand what your customers say, and hand conversations over to \
human agents whenever needed. Dashboards show how your flows perform so your team \
can improve them continuously.";

const HIRE_HANDOFF_TEXT: &str = "Awesome! One of our sales team members will \
contact you in this chat to talk about hiring our services.";

const SPECIALIST_HANDOFF_TEXT: &str = "Perfect! A specialist will join this \
conversation shortly to answer your questions.";

const FLOW_TABLE: &[FlowStep] = &[
    FlowStep {
        state: FlowState::Start,
        token: None,
        text: WELCOME_TEXT,
        buttons: &[
            ("Yes, I already use Weni", FlowState::UseWeni),
            ("Not yet", FlowState::DontUseWeni),
        ],
    },
    FlowStep {
        state: FlowState::UseWeni,
        token: Some("use_weni"),
        text: EXISTING_USER_TEXT,
        buttons: &[
            ("I need support", FlowState::SupportWeni),
            ("New products", FlowState::NewProductsWeni),
        ],
    },
    FlowStep {
        state: FlowState::DontUseWeni,
        token: Some("dont_use_weni"),
        text: NEW_USER_TEXT,
        buttons: &[
            ("Product details", FlowState::ProductDetails),
            ("Hire services", FlowState::HireServices),
        ],
    },
    FlowStep {
        state: FlowState::SupportWeni,
        token: Some("support_weni"),
        text: SUPPORT_HANDOFF_TEXT,
        buttons: &[],
    },
    FlowStep {
        state: FlowState::NewProductsWeni,
        token: Some("new_products_weni"),
        text: PRODUCT_MENU_TEXT,
        buttons: &[
            ("Product details", FlowState::ProductDetails),
            ("Talk to a specialist", FlowState::TalkSpecialist),
        ],
    },
    FlowStep {
        state: FlowState::ProductDetails,
        token: Some("product_details"),
        text: PRODUCT_DETAILS_TEXT,
        buttons: &[("Talk to a specialist", FlowState::TalkSpecialist)],
    },
    FlowStep {
        state: FlowState::HireServices,
        token: Some("hire_services"),
        text: HIRE_HANDOFF_TEXT,
        buttons: &[],
    },
    FlowStep {
        state: FlowState::TalkSpecialist,
        token: Some("talk_specialist"),
        text: SPECIALIST_HANDOFF_TEXT,
        buttons: &[],
    },
];

impl FlowState {
    fn step(self) -> &'static FlowStep {
        FLOW_TABLE
            .iter()
            .find(|step| step.state == self)
            .unwrap_or(&FLOW_TABLE[0])
    }

    pub fn from_token(token: &str) -> Option<Self> {
        FLOW_TABLE
            .iter()
            .find(|step| step.token == Some(token))
            .map(|step| step.state)
    }

    /// Callback token of the state; `Start` has none.
    pub fn token(self) -> Option<&'static str> {
        self.step().token
    }

    pub fn is_terminal(self) -> bool {
        self.step().buttons.is_empty()
    }

    pub fn reply(self) -> OutboundReply {
        let step = self.step();
        OutboundReply {
            text: step.text.to_string(),
            keyboard: step
                .buttons
                .iter()
                .filter_map(|(label, next)| next.token().map(|t| Button::new(*label, t)))
                .collect(),
        }
    }
}

/// What caused the flow to run.
#[derive(Debug, Clone, Copy)]
pub enum Trigger<'a> {
    Text(&'a str),
    Callback { token: &'a str, message_id: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowOutcome {
    /// A new message was sent.
    Sent(FlowState),
    /// The button message was edited in place.
    Edited(FlowState),
    /// Free text that does not start the flow; left for a human agent.
    Ignored,
    /// Callback token that matches no state. Nothing was sent.
    Unhandled(String),
}

impl FlowOutcome {
    pub fn is_handled(&self) -> bool {
        !matches!(self, FlowOutcome::Unhandled(_))
    }
}

fn starts_flow(text: &str) -> bool {
    text.to_lowercase().contains("start")
}

/// Runs one transition and issues exactly one outbound call when a state is
/// reached. Provider errors are returned to the caller untouched.
pub async fn dispatch(
    channel: &dyn ReplyChannel,
    chat_id: i64,
    trigger: Trigger<'_>,
) -> Result<FlowOutcome, ChannelError> {
    match trigger {
        Trigger::Text(text) if starts_flow(text) => {
            channel.send(chat_id, &FlowState::Start.reply()).await?;
            info!(chat_id, "flow started");
            Ok(FlowOutcome::Sent(FlowState::Start))
        }
        Trigger::Text(_) => {
            debug!(chat_id, "free text, no scripted reply");
            Ok(FlowOutcome::Ignored)
        }
        Trigger::Callback { token, message_id } => match FlowState::from_token(token) {
            Some(state) => {
                channel.edit(chat_id, message_id, &state.reply()).await?;
                info!(chat_id, token, "flow advanced");
                Ok(FlowOutcome::Edited(state))
            }
            None => {
                error!(chat_id, token, "unhandled callback token, no reply sent");
                Ok(FlowOutcome::Unhandled(token.to_string()))
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MockReplyChannel;

    #[test]
    fn every_button_points_at_a_known_token() {
        for step in FLOW_TABLE {
            for (_, next) in step.buttons {
                let token = next.token().expect("buttons never lead back to start");
                assert_eq!(FlowState::from_token(token), Some(*next));
            }
        }
    }

    #[test]
    fn terminal_states() {
        assert!(FlowState::SupportWeni.is_terminal());
        assert!(FlowState::HireServices.is_terminal());
        assert!(FlowState::TalkSpecialist.is_terminal());
        assert!(!FlowState::Start.is_terminal());
        assert!(!FlowState::ProductDetails.is_terminal());
    }

    #[test]
    fn scripted_texts_never_restart_the_flow() {
        for step in FLOW_TABLE {
            assert!(!starts_flow(step.text), "{:?}", step.state);
        }
    }

    #[tokio::test]
    async fn start_in_any_case_sends_welcome() {
        for text in ["start", "/start", "START", "please Start over"] {
            let mut channel = MockReplyChannel::new();
            channel
                .expect_send()
                .withf(|chat_id, reply| {
                    *chat_id == 42
                        && reply.text == WELCOME_TEXT
                        && reply.tokens() == vec!["use_weni", "dont_use_weni"]
                })
                .times(1)
                .returning(|_, _| Ok(()));
            channel.expect_edit().never();

            let outcome = dispatch(&channel, 42, Trigger::Text(text)).await.unwrap();
            assert_eq!(outcome, FlowOutcome::Sent(FlowState::Start));
        }
    }

    #[tokio::test]
    async fn use_weni_edits_in_place() {
        let mut channel = MockReplyChannel::new();
        channel.expect_send().never();
        channel
            .expect_edit()
            .withf(|chat_id, message_id, reply| {
                *chat_id == 42
                    && *message_id == 7
                    && reply.text == EXISTING_USER_TEXT
                    && reply.tokens() == vec!["support_weni", "new_products_weni"]
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let trigger = Trigger::Callback {
            token: "use_weni",
            message_id: 7,
        };
        let outcome = dispatch(&channel, 42, trigger).await.unwrap();
        assert_eq!(outcome, FlowOutcome::Edited(FlowState::UseWeni));
    }

    #[tokio::test]
    async fn transitions_follow_the_table() {
        let cases = [
            ("dont_use_weni", vec!["product_details", "hire_services"]),
            ("new_products_weni", vec!["product_details", "talk_specialist"]),
            ("product_details", vec!["talk_specialist"]),
            ("support_weni", vec![]),
            ("hire_services", vec![]),
            ("talk_specialist", vec![]),
        ];
        for (token, expected) in cases {
            let mut channel = MockReplyChannel::new();
            channel
                .expect_edit()
                .withf(move |_, _, reply| reply.tokens() == expected)
                .times(1)
                .returning(|_, _, _| Ok(()));
            let trigger = Trigger::Callback {
                token,
                message_id: 1,
            };
            let outcome = dispatch(&channel, 42, trigger).await.unwrap();
            assert!(matches!(outcome, FlowOutcome::Edited(_)), "{token}");
        }
    }

    #[tokio::test]
    async fn unknown_token_sends_nothing() {
        let mut channel = MockReplyChannel::new();
        channel.expect_send().never();
        channel.expect_edit().never();

        let trigger = Trigger::Callback {
            token: "refund_please",
            message_id: 3,
        };
        let outcome = dispatch(&channel, 42, trigger).await.unwrap();
        assert_eq!(outcome, FlowOutcome::Unhandled("refund_please".to_string()));
        assert!(!outcome.is_handled());
    }

    #[tokio::test]
    async fn free_text_is_ignored() {
        let mut channel = MockReplyChannel::new();
        channel.expect_send().never();
        channel.expect_edit().never();

        let outcome = dispatch(&channel, 42, Trigger::Text("my order is late"))
            .await
            .unwrap();
        assert_eq!(outcome, FlowOutcome::Ignored);
    }

    #[tokio::test]
    async fn provider_errors_propagate() {
        let mut channel = MockReplyChannel::new();
        channel.expect_send().times(1).returning(|_, _| {
            Err(ChannelError::Rejected {
                status: 403,
                description: "Forbidden: bot was blocked by the user".to_string(),
            })
        });

        let result = dispatch(&channel, 42, Trigger::Text("start")).await;
        assert!(matches!(
            result,
            Err(ChannelError::Rejected { status: 403, .. })
        ));
    }
}
