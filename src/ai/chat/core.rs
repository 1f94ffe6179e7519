use anyhow::Result;
use futures_util::StreamExt;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::models::{INTRODUCTION_TRIGGER, Message, Role, Transcript};
use crate::ai::prompt;
use crate::anthropic::{CompletionEndpoint, CompletionError, CompletionRequest, MAX_OUTPUT_TOKENS};
use crate::core::{Model, SessionConfig};

pub const RATE_LIMIT_APOLOGY: &str = "I'm sorry, the API rate limit has been exceeded. Please wait a minute before sending another message.";
pub const RATE_LIMIT_NOTICE: &str =
    "Rate limit exceeded. Please wait a minute before trying again.";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("An Anthropic API key is required before chatting")]
    MissingCredential,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    Idle,
    Streaming,
}

/// Notifications emitted after every change to the session so a
/// presentation layer can redraw.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// A message was appended to the transcript
    Message { message: Message },
    State { state: TurnState },
    /// The next piece of the response currently being streamed along
    /// with everything streamed so far
    Fragment { text: String, partial: String },
    /// Raw failure for an error display, separate from the apology
    /// committed to the transcript
    Error { message: String },
    /// The turn is over
    Refresh,
}

#[derive(Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted,
    /// Empty or whitespace-only input
    Ignored,
    /// A response is still streaming. The submission is dropped.
    Busy,
    /// The greeting has not run yet. Call `introduce` and submit again.
    NotIntroduced,
}

/// One person's conversation with the assistant, from the first
/// greeting until the session is dropped. At most one turn streams at
/// a time.
///
/// ```ignore
/// let mut session = ChatSession::new(config)?;
/// // Greets the user. Must run before the first submission.
/// session.introduce(&client).await;
/// if session.submit_user_turn("How is Michael doing in math?") == SubmitOutcome::Accepted {
///     session.run_streaming_turn(&client).await;
/// }
/// ```
#[derive(Debug)]
pub struct ChatSession {
    id: Uuid,
    config: SessionConfig,
    transcript: Transcript,
    state: TurnState,
    partial: String,
    introduced: bool,
    events: Option<mpsc::UnboundedSender<TurnEvent>>,
}

fn failure_apology(err: &anyhow::Error) -> (String, String) {
    let rate_limited = err
        .downcast_ref::<CompletionError>()
        .is_some_and(CompletionError::is_rate_limited);
    if rate_limited {
        (RATE_LIMIT_APOLOGY.to_string(), RATE_LIMIT_NOTICE.to_string())
    } else {
        (
            format!("I'm sorry, an error occurred: {}", err),
            format!("An error occurred: {}", err),
        )
    }
}

impl ChatSession {
    pub fn new(config: SessionConfig) -> Result<Self, SessionError> {
        if config.api_key.is_empty() {
            return Err(SessionError::MissingCredential);
        }
        let id = Uuid::new_v4();
        tracing::info!("Starting chat session {} with {}", id, config.model);

        Ok(Self {
            id,
            config,
            transcript: Transcript::new(),
            state: TurnState::Idle,
            partial: String::new(),
            introduced: false,
            events: None,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn model(&self) -> Model {
        self.config.model
    }

    /// Applies to the next turn, never to one already streaming.
    pub fn set_model(&mut self, model: Model) {
        if model != self.config.model {
            tracing::debug!("Session {} switching model to {}", self.id, model);
            self.config.model = model;
        }
    }

    pub fn turn_state(&self) -> TurnState {
        self.state
    }

    /// Text streamed so far for the active turn.
    pub fn partial_response(&self) -> &str {
        &self.partial
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn snapshot(&self) -> Vec<Message> {
        self.transcript.snapshot()
    }

    pub fn display_view(&self) -> Vec<Message> {
        self.transcript.display_view()
    }

    /// Routes all future events to the returned receiver. Any previous
    /// subscriber stops receiving events.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<TurnEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.events = Some(tx);
        rx
    }

    /// Closes the current subscriber's channel.
    pub fn unsubscribe(&mut self) {
        self.events = None;
    }

    fn emit(&self, event: TurnEvent) {
        if let Some(tx) = &self.events {
            // A closed receiver must not interrupt the turn
            let _ = tx.send(event);
        }
    }

    fn commit(&mut self, message: Message) {
        self.transcript.append(message.clone());
        self.emit(TurnEvent::Message { message });
    }

    fn set_state(&mut self, state: TurnState) {
        self.state = state;
        self.emit(TurnEvent::State { state });
    }

    /// Records the user's message and marks a response as pending.
    pub fn submit_user_turn(&mut self, text: &str) -> SubmitOutcome {
        if text.trim().is_empty() {
            return SubmitOutcome::Ignored;
        }
        if self.state == TurnState::Streaming {
            tracing::debug!("Session {} dropped a submission while streaming", self.id);
            return SubmitOutcome::Busy;
        }
        if !self.introduced {
            return SubmitOutcome::NotIntroduced;
        }

        self.commit(Message::new(Role::User, text));
        self.set_state(TurnState::Streaming);
        SubmitOutcome::Accepted
    }

    /// Whether the greeting turn has run. User submissions are refused
    /// until it has, so the trigger is always the first message.
    pub fn is_introduced(&self) -> bool {
        self.introduced
    }

    /// Has the assistant greet the user. Only the first call does
    /// anything.
    pub async fn introduce(&mut self, endpoint: &dyn CompletionEndpoint) -> bool {
        if self.introduced {
            return false;
        }
        self.introduced = true;

        self.commit(Message::new(Role::User, INTRODUCTION_TRIGGER));
        self.set_state(TurnState::Streaming);
        self.run_streaming_turn(endpoint).await;
        true
    }

    /// Streams the assistant's response to the pending turn and commits
    /// it to the transcript. Failures are committed as an apology and
    /// are never retried. The session is always idle afterwards.
    pub async fn run_streaming_turn(&mut self, endpoint: &dyn CompletionEndpoint) {
        if self.state != TurnState::Streaming {
            tracing::debug!("Session {} has no pending turn", self.id);
            return;
        }
        self.partial.clear();

        match self.stream_response(endpoint).await {
            Ok(content) => {
                tracing::debug!(
                    "Session {} received {} bytes of response",
                    self.id,
                    content.len()
                );
                self.commit(Message::new(Role::Assistant, &content));
            }
            Err(e) => {
                tracing::error!("Chat turn failed for session {}: {}", self.id, e);
                // Whatever streamed before the failure is discarded
                self.partial.clear();
                let (apology, notice) = failure_apology(&e);
                self.emit(TurnEvent::Error { message: notice });
                self.commit(Message::new(Role::Assistant, &apology));
            }
        }

        self.partial.clear();
        self.set_state(TurnState::Idle);
        self.emit(TurnEvent::Refresh);
    }

    async fn stream_response(&mut self, endpoint: &dyn CompletionEndpoint) -> Result<String> {
        // Rendered every turn so long-lived sessions see the right date
        let system = prompt::system_instruction(&self.config.system_prompt)?;
        let request = CompletionRequest {
            model: self.config.model.api_name().to_string(),
            max_tokens: MAX_OUTPUT_TOKENS,
            system,
            messages: self.transcript.snapshot(),
        };

        let mut fragments = endpoint.stream(&self.config.api_key, &request).await?;
        while let Some(fragment) = fragments.next().await {
            let fragment = fragment?;
            self.partial.push_str(&fragment);
            self.emit(TurnEvent::Fragment {
                text: fragment,
                partial: self.partial.clone(),
            });
        }

        Ok(self.partial.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anthropic::FragmentStream;
    use crate::core::Credential;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Completion endpoint that replays a fixed response and records
    /// every request it receives.
    #[derive(Default)]
    struct ScriptedEndpoint {
        fragments: Vec<&'static str>,
        // Raised after the fragments
        fail_with: Option<fn() -> CompletionError>,
        // Raised before the stream opens
        reject_with: Option<fn() -> CompletionError>,
        requests: Mutex<Vec<CompletionRequest>>,
    }

    impl ScriptedEndpoint {
        fn replying(fragments: Vec<&'static str>) -> Self {
            Self {
                fragments,
                ..Default::default()
            }
        }

        fn requests(&self) -> Vec<CompletionRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CompletionEndpoint for ScriptedEndpoint {
        async fn stream(
            &self,
            _api_key: &Credential,
            request: &CompletionRequest,
        ) -> Result<FragmentStream, CompletionError> {
            self.requests.lock().unwrap().push(request.clone());
            if let Some(reject) = self.reject_with {
                return Err(reject());
            }
            let mut items: Vec<Result<String, CompletionError>> =
                self.fragments.iter().map(|f| Ok(f.to_string())).collect();
            if let Some(fail) = self.fail_with {
                items.push(Err(fail()));
            }
            Ok(Box::pin(futures::stream::iter(items)))
        }
    }

    fn config() -> SessionConfig {
        SessionConfig {
            system_prompt: "You are Wittly.".to_string(),
            model: Model::Claude37Sonnet,
            api_key: Credential::new("test-key"),
        }
    }

    fn session() -> ChatSession {
        ChatSession::new(config()).unwrap()
    }

    const GREETING: &str = "Hi, I'm Wittly.";

    /// A session whose greeting turn already ran against its own
    /// endpoint, ready for user submissions.
    async fn introduced_session() -> ChatSession {
        let greeter = ScriptedEndpoint::replying(vec![GREETING]);
        let mut session = session();
        assert!(session.introduce(&greeter).await);
        session
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<TurnEvent>) -> Vec<TurnEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_new_requires_credential() {
        let mut config = config();
        config.api_key = Credential::new("  ");
        assert!(matches!(
            ChatSession::new(config),
            Err(SessionError::MissingCredential)
        ));
    }

    #[tokio::test]
    async fn test_submit_appends_and_starts_streaming() {
        let mut session = introduced_session().await;
        assert_eq!(session.submit_user_turn("Hello"), SubmitOutcome::Accepted);
        assert_eq!(session.turn_state(), TurnState::Streaming);
        assert_eq!(session.transcript().len(), 3);
        assert_eq!(
            session.snapshot().pop(),
            Some(Message::new(Role::User, "Hello"))
        );
    }

    #[test]
    fn test_submission_before_greeting_is_refused() {
        let mut session = session();
        assert_eq!(
            session.submit_user_turn("Hello"),
            SubmitOutcome::NotIntroduced
        );
        assert!(session.transcript().is_empty());
        assert_eq!(session.turn_state(), TurnState::Idle);
        assert!(!session.is_introduced());
    }

    #[test]
    fn test_blank_submission_is_ignored() {
        let mut session = session();
        assert_eq!(session.submit_user_turn(""), SubmitOutcome::Ignored);
        assert_eq!(session.submit_user_turn("  \n\t "), SubmitOutcome::Ignored);
        assert!(session.transcript().is_empty());
        assert_eq!(session.turn_state(), TurnState::Idle);
    }

    #[tokio::test]
    async fn test_submission_while_streaming_is_dropped() {
        let mut session = introduced_session().await;
        session.submit_user_turn("first");
        let before = session.snapshot();

        assert_eq!(session.submit_user_turn("second"), SubmitOutcome::Busy);
        assert_eq!(session.snapshot(), before);
        assert_eq!(session.turn_state(), TurnState::Streaming);
    }

    #[tokio::test]
    async fn test_streamed_fragments_are_concatenated() {
        let endpoint = ScriptedEndpoint::replying(vec!["Hel", "lo, ", "world!"]);
        let mut session = introduced_session().await;
        let mut rx = session.subscribe();

        session.submit_user_turn("Say hello");
        session.run_streaming_turn(&endpoint).await;

        let last = session.snapshot().pop().unwrap();
        assert_eq!(last, Message::new(Role::Assistant, "Hello, world!"));
        assert_eq!(session.turn_state(), TurnState::Idle);
        assert_eq!(session.partial_response(), "");

        let fragments: Vec<(String, String)> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                TurnEvent::Fragment { text, partial } => Some((text, partial)),
                _ => None,
            })
            .collect();
        assert_eq!(
            fragments,
            vec![
                ("Hel".to_string(), "Hel".to_string()),
                ("lo, ".to_string(), "Hello, ".to_string()),
                ("world!".to_string(), "Hello, world!".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_event_order_for_a_turn() {
        let endpoint = ScriptedEndpoint::replying(vec!["Hi"]);
        let mut session = introduced_session().await;
        let mut rx = session.subscribe();

        session.submit_user_turn("Hello");
        session.run_streaming_turn(&endpoint).await;

        assert_eq!(
            drain(&mut rx),
            vec![
                TurnEvent::Message {
                    message: Message::new(Role::User, "Hello")
                },
                TurnEvent::State {
                    state: TurnState::Streaming
                },
                TurnEvent::Fragment {
                    text: "Hi".to_string(),
                    partial: "Hi".to_string(),
                },
                TurnEvent::Message {
                    message: Message::new(Role::Assistant, "Hi")
                },
                TurnEvent::State {
                    state: TurnState::Idle
                },
                TurnEvent::Refresh,
            ]
        );
    }

    #[tokio::test]
    async fn test_request_contents() {
        let endpoint = ScriptedEndpoint::replying(vec!["ok"]);
        let mut session = introduced_session().await;
        session.set_model(Model::Claude35Sonnet);

        session.submit_user_turn("How is Michael doing?");
        session.run_streaming_turn(&endpoint).await;

        let requests = endpoint.requests();
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert_eq!(request.model, "claude-3-5-sonnet-20241022");
        assert_eq!(request.max_tokens, 4000);
        assert!(request.system.starts_with("You are Wittly.\n\nToday's date is "));
        assert_eq!(
            request.messages,
            vec![
                Message::new(Role::User, INTRODUCTION_TRIGGER),
                Message::new(Role::Assistant, GREETING),
                Message::new(Role::User, "How is Michael doing?"),
            ]
        );
    }

    #[tokio::test]
    async fn test_rate_limit_before_any_fragment() {
        let endpoint = ScriptedEndpoint {
            reject_with: Some(|| CompletionError::RateLimited("429".to_string())),
            ..Default::default()
        };
        let mut session = introduced_session().await;
        let mut rx = session.subscribe();

        session.submit_user_turn("Hello");
        session.run_streaming_turn(&endpoint).await;

        assert_eq!(session.transcript().len(), 4);
        assert_eq!(
            session.snapshot()[3],
            Message::new(Role::Assistant, RATE_LIMIT_APOLOGY)
        );
        assert_eq!(session.turn_state(), TurnState::Idle);
        assert!(drain(&mut rx).contains(&TurnEvent::Error {
            message: RATE_LIMIT_NOTICE.to_string()
        }));
    }

    #[tokio::test]
    async fn test_rate_limit_signalled_in_stream() {
        let endpoint = ScriptedEndpoint {
            fail_with: Some(|| CompletionError::RateLimited("slow down".to_string())),
            ..Default::default()
        };
        let mut session = introduced_session().await;
        session.submit_user_turn("Hello");
        session.run_streaming_turn(&endpoint).await;

        assert_eq!(session.snapshot()[3].content, RATE_LIMIT_APOLOGY);
        assert_eq!(session.turn_state(), TurnState::Idle);
    }

    #[tokio::test]
    async fn test_rate_limited_greeting() {
        let endpoint = ScriptedEndpoint {
            reject_with: Some(|| CompletionError::RateLimited("429".to_string())),
            ..Default::default()
        };
        let mut session = session();

        assert!(session.introduce(&endpoint).await);
        assert_eq!(
            session.display_view(),
            vec![Message::new(Role::Assistant, RATE_LIMIT_APOLOGY)]
        );
        // The session is usable once the greeting turn is over
        assert_eq!(session.submit_user_turn("Hello"), SubmitOutcome::Accepted);
    }

    #[tokio::test]
    async fn test_mid_stream_failure_discards_partial() {
        let endpoint = ScriptedEndpoint {
            fragments: vec!["partial"],
            fail_with: Some(|| CompletionError::Transport("connection reset".to_string())),
            ..Default::default()
        };
        let mut session = introduced_session().await;
        let mut rx = session.subscribe();

        session.submit_user_turn("Hello");
        session.run_streaming_turn(&endpoint).await;

        let committed = session.snapshot().pop().unwrap();
        assert_eq!(committed.role, Role::Assistant);
        assert_eq!(
            committed.content,
            "I'm sorry, an error occurred: Request failed: connection reset"
        );
        assert!(!committed.content.contains("partial"));
        assert_eq!(session.partial_response(), "");
        assert_eq!(session.turn_state(), TurnState::Idle);

        let events = drain(&mut rx);
        assert!(events.contains(&TurnEvent::Error {
            message: "An error occurred: Request failed: connection reset".to_string()
        }));
        assert_eq!(events.last(), Some(&TurnEvent::Refresh));
    }

    #[tokio::test]
    async fn test_can_submit_again_after_failure() {
        let failing = ScriptedEndpoint {
            reject_with: Some(|| CompletionError::Endpoint {
                status: 500,
                message: "boom".to_string(),
            }),
            ..Default::default()
        };
        let working = ScriptedEndpoint::replying(vec!["Back again"]);
        let mut session = introduced_session().await;

        session.submit_user_turn("one");
        session.run_streaming_turn(&failing).await;
        assert_eq!(session.submit_user_turn("two"), SubmitOutcome::Accepted);
        session.run_streaming_turn(&working).await;

        assert_eq!(session.transcript().len(), 6);
        assert_eq!(session.snapshot()[5].content, "Back again");
        // The failed turn's apology is still part of the context
        assert_eq!(working.requests()[0].messages.len(), 5);
    }

    #[tokio::test]
    async fn test_run_without_pending_turn_is_noop() {
        let endpoint = ScriptedEndpoint::replying(vec!["unused"]);
        let mut session = session();
        session.run_streaming_turn(&endpoint).await;

        assert!(session.transcript().is_empty());
        assert!(endpoint.requests().is_empty());
    }

    #[tokio::test]
    async fn test_introduce_once() {
        let endpoint = ScriptedEndpoint::replying(vec!["Hi, I'm ", "Wittly."]);
        let mut session = session();

        assert!(session.introduce(&endpoint).await);
        assert!(!session.introduce(&endpoint).await);

        assert_eq!(
            session.snapshot(),
            vec![
                Message::new(Role::User, INTRODUCTION_TRIGGER),
                Message::new(Role::Assistant, GREETING),
            ]
        );
        assert_eq!(
            session.display_view(),
            vec![Message::new(Role::Assistant, GREETING)]
        );
        assert_eq!(endpoint.requests().len(), 1);
        assert_eq!(session.turn_state(), TurnState::Idle);
    }

    #[tokio::test]
    async fn test_trigger_is_always_first() {
        let endpoint = ScriptedEndpoint::replying(vec!["ok"]);
        let mut session = session();

        // Talking before the greeting changes nothing
        session.submit_user_turn("hi");
        session.run_streaming_turn(&endpoint).await;
        assert!(session.transcript().is_empty());

        assert!(session.introduce(&endpoint).await);
        assert_eq!(session.submit_user_turn("hi"), SubmitOutcome::Accepted);
        session.run_streaming_turn(&endpoint).await;

        let snapshot = session.snapshot();
        assert_eq!(snapshot.len(), 4);
        assert_eq!(snapshot[0], Message::new(Role::User, INTRODUCTION_TRIGGER));
        assert_eq!(snapshot[2], Message::new(Role::User, "hi"));
        assert_eq!(endpoint.requests()[0].messages.len(), 1);
    }

    #[tokio::test]
    async fn test_message_count_is_two_per_turn_plus_trigger() {
        let endpoint = ScriptedEndpoint::replying(vec!["ok"]);
        let failing = ScriptedEndpoint {
            fail_with: Some(|| CompletionError::Malformed("bad".to_string())),
            ..Default::default()
        };
        let mut session = session();
        session.introduce(&endpoint).await;

        for n in 0..5 {
            session.submit_user_turn(&format!("question {}", n));
            // Dropped, must not count
            session.submit_user_turn("impatient");
            session.submit_user_turn("   ");
            if n % 2 == 0 {
                session.run_streaming_turn(&endpoint).await;
            } else {
                session.run_streaming_turn(&failing).await;
            }
        }

        // Greeting turn plus two messages per user turn, failed or not
        assert_eq!(session.transcript().len(), 2 * 5 + 2);
        let roles: Vec<Role> = session.transcript().iter().map(|m| m.role).collect();
        for pair in roles.chunks(2) {
            assert_eq!(pair, [Role::User, Role::Assistant]);
        }
    }

    #[tokio::test]
    async fn test_trigger_typed_later_is_displayed() {
        let endpoint = ScriptedEndpoint::replying(vec!["Hi"]);
        let mut session = session();
        session.introduce(&endpoint).await;
        session.submit_user_turn(INTRODUCTION_TRIGGER);
        session.run_streaming_turn(&endpoint).await;

        let view = session.display_view();
        assert_eq!(view.len(), 3);
        assert_eq!(view[1], Message::new(Role::User, INTRODUCTION_TRIGGER));
    }

    #[tokio::test]
    async fn test_unsubscribe_closes_channel() {
        let mut session = introduced_session().await;
        let mut rx = session.subscribe();
        session.unsubscribe();
        assert!(rx.recv().await.is_none());

        // Turns still complete without a subscriber
        let endpoint = ScriptedEndpoint::replying(vec!["quiet"]);
        session.submit_user_turn("Hello");
        session.run_streaming_turn(&endpoint).await;
        assert_eq!(session.snapshot()[3].content, "quiet");
    }
}
