//! Relay pipeline
//!
//! Every message passes through two moderation phases:
//!
//! 1. **Ingress** - the raw user text is checked against the pre-block list
//!    (refusal) and the red-flag list (escalation) before anything is sent
//!    upstream.
//! 2. **Egress** - once the completion API answers, the user text and the
//!    reply are checked together against the red-flag list. A match discards
//!    the reply and escalates instead.
//!
//! History only grows on a round trip that passes both phases.

use chatguard_core::{ChatMessage, Persona};
use chatguard_policy::{RedFlagMatch, RuleStore};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::gateway::{CompletionGateway, GatewayError};
use crate::session::{Session, SessionError, SessionStore};

#[derive(Debug, Error)]
pub enum RelayError {
    /// Missing or invalid request field
    #[error("{0}")]
    Validation(String),

    #[error("session not found")]
    NotFound,

    #[error("completion failed: {0}")]
    Gateway(#[from] GatewayError),
}

impl From<SessionError> for RelayError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotFound(_) => RelayError::NotFound,
        }
    }
}

/// How a message was answered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Pre-blocked; the fixed refusal text
    Refused(String),

    /// A red flag fired on the input or the generated reply
    Escalated { reply: String, flag: RedFlagMatch },

    /// Generated reply, now stored in the session history
    Replied(String),
}

impl MessageOutcome {
    pub fn reply(&self) -> &str {
        match self {
            Self::Refused(reply) | Self::Replied(reply) => reply,
            Self::Escalated { reply, .. } => reply,
        }
    }

    pub fn into_reply(self) -> String {
        match self {
            Self::Refused(reply) | Self::Replied(reply) => reply,
            Self::Escalated { reply, .. } => reply,
        }
    }
}

/// Composes rules, sessions, and the completion gateway per request
pub struct Relay {
    rules: Arc<RuleStore>,
    sessions: Arc<dyn SessionStore>,
    gateway: Arc<dyn CompletionGateway>,
}

impl Relay {
    pub fn new(
        rules: Arc<RuleStore>,
        sessions: Arc<dyn SessionStore>,
        gateway: Arc<dyn CompletionGateway>,
    ) -> Self {
        Self {
            rules,
            sessions,
            gateway,
        }
    }

    /// Start a session; requires explicit age confirmation
    pub fn start_session(
        &self,
        persona: Persona,
        age_confirmed: bool,
        intake: String,
    ) -> Result<String, RelayError> {
        if !age_confirmed {
            debug!("Rejecting session start without age confirmation");
            return Err(RelayError::Validation("Age must be confirmed (18+).".to_string()));
        }

        let session = self.sessions.create(persona, intake);
        info!(session_id = %session.id, persona = %persona, "Session started");
        self.record_session_gauge();

        Ok(session.id)
    }

    /// Handle one user message
    pub async fn post_message(&self, session_id: &str, text: &str) -> Result<MessageOutcome, RelayError> {
        if session_id.is_empty() {
            return Err(RelayError::Validation("sessionId and text are required.".to_string()));
        }

        let session = self.sessions.get(session_id).ok_or(RelayError::NotFound)?;
        let engine = self.rules.engine();

        // Phase 1: ingress
        if engine.pre_block(text) {
            info!(session_id = %session_id, "Message pre-blocked, returning refusal");
            record_moderation("ingress", "refused");
            return Ok(MessageOutcome::Refused(engine.refusal_text().to_string()));
        }

        if let Some(flag) = engine.detect_red_flag(text) {
            record_moderation("ingress", "escalated");
            return self.escalate(session_id, flag, "ingress");
        }

        // Upstream
        let messages = self.build_messages(&session, text);
        let start = Instant::now();
        let result = self.gateway.complete(&messages).await;
        metrics::histogram!("chatguard_gateway_latency_us").record(start.elapsed().as_micros() as f64);

        let reply = match result {
            Ok(reply) => reply,
            Err(e) => {
                error!(session_id = %session_id, error = %e, "Completion request failed");
                metrics::counter!("chatguard_gateway_errors_total").increment(1);
                return Err(e.into());
            }
        };

        // Phase 2: egress
        if let Some(flag) = engine.detect_red_flag(&format!("{}\n{}", text, reply)) {
            record_moderation("egress", "escalated");
            return self.escalate(session_id, flag, "egress");
        }

        self.sessions.append_turns(session_id, text, &reply)?;
        record_moderation("egress", "passed");
        debug!(session_id = %session_id, reply_len = reply.len(), "Reply stored");

        Ok(MessageOutcome::Replied(reply))
    }

    /// Delete a session
    pub fn delete_session(&self, session_id: &str) -> Result<(), RelayError> {
        if session_id.is_empty() {
            return Err(RelayError::Validation("sessionId required".to_string()));
        }

        if !self.sessions.delete(session_id) {
            return Err(RelayError::NotFound);
        }

        info!(session_id = %session_id, "Session deleted");
        self.record_session_gauge();
        Ok(())
    }

    /// Persona prompt, intake context, prior turns, then the new user turn
    fn build_messages(&self, session: &Session, text: &str) -> Vec<ChatMessage> {
        let intake = if session.intake.is_empty() {
            "{}".to_string()
        } else {
            serde_json::Value::String(session.intake.clone()).to_string()
        };

        let mut messages = Vec::with_capacity(session.turns.len() + 3);
        messages.push(ChatMessage::system(
            self.rules.prompts().system_prompt(session.persona),
        ));
        messages.push(ChatMessage::system(format!("Intake: {}", intake)));
        messages.extend(session.turns.iter().cloned());
        messages.push(ChatMessage::user(text));
        messages
    }

    fn escalate(&self, session_id: &str, flag: RedFlagMatch, phase: &str) -> Result<MessageOutcome, RelayError> {
        warn!(
            session_id = %session_id,
            rule = %flag.id,
            severity = flag.severity.as_str(),
            phase,
            "Red flag raised, escalating session"
        );

        self.sessions.flag(session_id, flag.clone())?;
        let reply = self.rules.engine().escalation_text(&flag.id).to_string();
        Ok(MessageOutcome::Escalated { reply, flag })
    }

    fn record_session_gauge(&self) {
        metrics::gauge!("chatguard_active_sessions").set(self.sessions.len() as f64);
    }
}

fn record_moderation(phase: &'static str, outcome: &'static str) {
    metrics::counter!("chatguard_moderation_total", "phase" => phase, "outcome" => outcome).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::InMemorySessionStore;
    use async_trait::async_trait;
    use chatguard_core::Role;
    use chatguard_policy::{ModerationDocument, PersonaPrompt, PersonaPrompts, RedFlagRule, Severity};
    use parking_lot::Mutex;

    /// Gateway that records every call and answers from a script
    struct ScriptedGateway {
        reply: Result<String, u16>,
        calls: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedGateway {
        fn replying(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(reply.to_string()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn failing(status: u16) -> Arc<Self> {
            Arc::new(Self {
                reply: Err(status),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.lock().len()
        }
    }

    #[async_trait]
    impl CompletionGateway for ScriptedGateway {
        async fn complete(&self, messages: &[ChatMessage]) -> Result<String, GatewayError> {
            self.calls.lock().push(messages.to_vec());
            match &self.reply {
                Ok(reply) => Ok(reply.clone()),
                Err(status) => Err(GatewayError::Upstream {
                    status: *status,
                    body: "rate limited".to_string(),
                }),
            }
        }
    }

    fn rules() -> Arc<RuleStore> {
        let mut doc = ModerationDocument::fallback();
        doc.pre_block_regexes = vec!["kill myself".to_string()];
        doc.red_flag_regexes = vec![
            RedFlagRule {
                id: "abuse".to_string(),
                pattern: r"(hits|beats) me".to_string(),
                severity: Severity::High,
            },
            RedFlagRule {
                id: "overdose".to_string(),
                pattern: r"overdose".to_string(),
                severity: Severity::Critical,
            },
        ];
        doc.escalation_texts
            .insert("abuse".to_string(), "You deserve to be safe.".to_string());
        doc.generic_escalation = "Please contact emergency services.".to_string();
        doc.refusal_text = "I can't help with that.".to_string();

        let prompts = PersonaPrompts::new(
            PersonaPrompt::new("male persona"),
            PersonaPrompt::new("female persona"),
        );
        Arc::new(RuleStore::new(prompts, doc))
    }

    fn relay(gateway: Arc<ScriptedGateway>) -> (Relay, Arc<InMemorySessionStore>) {
        let sessions = Arc::new(InMemorySessionStore::new());
        let relay = Relay::new(rules(), sessions.clone(), gateway);
        (relay, sessions)
    }

    #[test]
    fn test_start_requires_age_confirmation() {
        let (relay, sessions) = relay(ScriptedGateway::replying("hi"));

        let err = relay
            .start_session(Persona::Female, false, String::new())
            .unwrap_err();
        assert!(matches!(err, RelayError::Validation(ref msg) if msg == "Age must be confirmed (18+)."));
        assert!(sessions.is_empty());

        let id = relay.start_session(Persona::Female, true, String::new()).unwrap();
        assert!(sessions.get(&id).is_some());
    }

    #[tokio::test]
    async fn test_clean_round_trip_appends_two_turns() {
        let gateway = ScriptedGateway::replying("Hello! How are you both doing?");
        let (relay, sessions) = relay(gateway.clone());
        let id = relay.start_session(Persona::Female, true, String::new()).unwrap();

        let outcome = relay.post_message(&id, "hello").await.unwrap();
        assert_eq!(outcome, MessageOutcome::Replied("Hello! How are you both doing?".to_string()));
        assert_eq!(gateway.call_count(), 1);

        let turns = sessions.get(&id).unwrap().turns;
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0], ChatMessage::user("hello"));
        assert_eq!(turns[1], ChatMessage::assistant("Hello! How are you both doing?"));
    }

    #[tokio::test]
    async fn test_upstream_messages_carry_persona_intake_and_history() {
        let gateway = ScriptedGateway::replying("ok");
        let (relay, _) = relay(gateway.clone());
        let id = relay
            .start_session(Persona::Male, true, "we \"never\" talk".to_string())
            .unwrap();

        relay.post_message(&id, "first").await.unwrap();
        relay.post_message(&id, "second").await.unwrap();

        let calls = gateway.calls.lock();
        let second = &calls[1];
        assert_eq!(second.len(), 5);
        assert_eq!(second[0], ChatMessage::system("male persona"));
        assert_eq!(second[1], ChatMessage::system(r#"Intake: "we \"never\" talk""#));
        assert_eq!(second[2], ChatMessage::user("first"));
        assert_eq!(second[3], ChatMessage::assistant("ok"));
        assert_eq!(second[4], ChatMessage::user("second"));
    }

    #[tokio::test]
    async fn test_empty_intake_renders_as_empty_object() {
        let gateway = ScriptedGateway::replying("ok");
        let (relay, _) = relay(gateway.clone());
        let id = relay.start_session(Persona::Female, true, String::new()).unwrap();

        relay.post_message(&id, "hello").await.unwrap();

        let calls = gateway.calls.lock();
        assert_eq!(calls[0][0], ChatMessage::system("female persona"));
        assert_eq!(calls[0][1], ChatMessage::system("Intake: {}"));
    }

    #[tokio::test]
    async fn test_pre_block_refuses_without_gateway_call() {
        let gateway = ScriptedGateway::replying("should not be used");
        let (relay, sessions) = relay(gateway.clone());
        let id = relay.start_session(Persona::Female, true, String::new()).unwrap();

        let outcome = relay
            .post_message(&id, "I want to kill myself tonight")
            .await
            .unwrap();
        assert_eq!(outcome, MessageOutcome::Refused("I can't help with that.".to_string()));
        assert_eq!(gateway.call_count(), 0);

        let session = sessions.get(&id).unwrap();
        assert!(session.turns.is_empty());
        assert!(!session.flagged);
    }

    #[tokio::test]
    async fn test_ingress_red_flag_escalates_without_gateway_call() {
        let gateway = ScriptedGateway::replying("should not be used");
        let (relay, sessions) = relay(gateway.clone());
        let id = relay.start_session(Persona::Female, true, String::new()).unwrap();

        let outcome = relay.post_message(&id, "My husband hits me").await.unwrap();
        assert_eq!(outcome.reply(), "You deserve to be safe.");
        assert_eq!(gateway.call_count(), 0);

        let session = sessions.get(&id).unwrap();
        assert!(session.flagged);
        assert_eq!(session.flag.unwrap().id, "abuse");
        assert!(session.turns.is_empty());
    }

    #[tokio::test]
    async fn test_unmapped_red_flag_uses_generic_escalation() {
        let (relay, _) = relay(ScriptedGateway::replying("unused"));
        let id = relay.start_session(Persona::Female, true, String::new()).unwrap();

        let outcome = relay.post_message(&id, "thinking about an overdose").await.unwrap();
        match outcome {
            MessageOutcome::Escalated { reply, flag } => {
                assert_eq!(reply, "Please contact emergency services.");
                assert_eq!(flag.severity, Severity::Critical);
            }
            other => panic!("expected escalation, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_egress_red_flag_discards_reply() {
        let gateway = ScriptedGateway::replying("An overdose of that is dangerous.");
        let (relay, sessions) = relay(gateway.clone());
        let id = relay.start_session(Persona::Female, true, String::new()).unwrap();

        let outcome = relay.post_message(&id, "is this medicine safe?").await.unwrap();
        assert_eq!(outcome.reply(), "Please contact emergency services.");
        assert_eq!(gateway.call_count(), 1);

        let session = sessions.get(&id).unwrap();
        assert!(session.flagged);
        assert_eq!(session.flag.unwrap().id, "overdose");
        assert!(session.turns.is_empty());
    }

    #[tokio::test]
    async fn test_gateway_failure_leaves_session_unchanged() {
        let gateway = ScriptedGateway::failing(429);
        let (relay, sessions) = relay(gateway.clone());
        let id = relay.start_session(Persona::Female, true, String::new()).unwrap();

        let err = relay.post_message(&id, "hello").await.unwrap_err();
        assert!(matches!(err, RelayError::Gateway(GatewayError::Upstream { status: 429, .. })));

        let session = sessions.get(&id).unwrap();
        assert!(session.turns.is_empty());
        assert!(!session.flagged);
    }

    #[tokio::test]
    async fn test_unknown_and_deleted_sessions() {
        let (relay, _) = relay(ScriptedGateway::replying("hi"));

        let err = relay.post_message("no-such-session", "hello").await.unwrap_err();
        assert!(matches!(err, RelayError::NotFound));

        let id = relay.start_session(Persona::Male, true, String::new()).unwrap();
        relay.delete_session(&id).unwrap();

        assert!(matches!(relay.post_message(&id, "hello").await, Err(RelayError::NotFound)));
        assert!(matches!(relay.delete_session(&id), Err(RelayError::NotFound)));
    }

    #[tokio::test]
    async fn test_empty_session_id_is_a_validation_error() {
        let (relay, _) = relay(ScriptedGateway::replying("hi"));

        assert!(matches!(
            relay.post_message("", "hello").await,
            Err(RelayError::Validation(_))
        ));
        assert!(matches!(relay.delete_session(""), Err(RelayError::Validation(_))));
    }

    #[tokio::test]
    async fn test_history_roles_alternate() {
        let (relay, sessions) = relay(ScriptedGateway::replying("noted"));
        let id = relay.start_session(Persona::Female, true, String::new()).unwrap();

        for text in ["one", "two", "three"] {
            relay.post_message(&id, text).await.unwrap();
        }

        let turns = sessions.get(&id).unwrap().turns;
        assert_eq!(turns.len(), 6);
        for (i, turn) in turns.iter().enumerate() {
            let expected = if i % 2 == 0 { Role::User } else { Role::Assistant };
            assert_eq!(turn.role, expected);
        }
    }
}
