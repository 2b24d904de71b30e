//! One turn of conversation: resolve the grounding mode, optionally search,
//! compose the prompt, stream the answer, and update the session.

use crate::classifier::Classifier;
use crate::commands::{strip_web_prefix, Command, WEB_PREFIX};
use crate::prompt::{compose_prompt, render_sources_markdown, SYSTEM_PROMPT};
use crate::session::Session;
use crate::{CompletionProvider, CompletionRequest, Result, SearchProvider, SearchQuery, Source};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Domains every grounded query is restricted to.
pub const TRUSTED_DOMAINS: &[&str] = &[
    "ura.go.ug",
    "finance.go.ug",
    "parliament.go.ug",
    "law.africa",
    "ulii.org",
    "gazettes.africa",
    "ulrc.go.ug",
    "ugandalaws.com",
];

pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_SEARCH_COUNT: usize = 6;

pub const VERIFY_SUGGESTION: &str =
    "Do you want me to **verify** that with authoritative Ugandan sources?";

/// `site:a OR site:b ...` for the given domains.
pub fn site_filter<S: AsRef<str>>(domains: &[S]) -> String {
    domains
        .iter()
        .map(|d| format!("site:{}", d.as_ref()))
        .collect::<Vec<_>>()
        .join(" OR ")
}

#[derive(Debug, Clone)]
pub struct AssistantConfig {
    pub model: String,
    pub system_prompt: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    /// Results requested per grounded turn (`k`).
    pub search_count: usize,
    /// Appended to every grounded query.
    pub site_filter: String,
    pub classifier: Classifier,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            system_prompt: SYSTEM_PROMPT.to_string(),
            temperature: 0.3,
            max_output_tokens: 1200,
            search_count: DEFAULT_SEARCH_COUNT,
            site_filter: site_filter(TRUSTED_DOMAINS),
            classifier: Classifier::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    NoGrounding,
    SearchThenAnswer,
    ToggleGrounding,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnInput {
    pub text: String,
    pub command: Option<Command>,
}

impl TurnInput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            command: None,
        }
    }

    pub fn command(command: Command, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            command: Some(command),
        }
    }
}

/// Mode for this turn and the question text to answer.
///
/// `text` is expected to be trimmed already. The `web:` prefix is only
/// stripped when no command was given.
pub fn resolve_mode(command: Option<Command>, text: &str, ground_always: bool) -> (Mode, String) {
    match command {
        Some(Command::GroundToggle) => (Mode::ToggleGrounding, text.to_string()),
        Some(Command::WebSearch) => (Mode::SearchThenAnswer, text.to_string()),
        None => match strip_web_prefix(text) {
            Some(rest) => (Mode::SearchThenAnswer, rest.to_string()),
            None if ground_always => (Mode::SearchThenAnswer, text.to_string()),
            None => (Mode::NoGrounding, text.to_string()),
        },
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Action {
    pub name: String,
    pub label: String,
    /// Text the host should place in the composer when the action is used.
    pub prefill: String,
}

impl Action {
    pub fn verify_with_web() -> Self {
        Self {
            name: "composer_web".to_string(),
            label: "🔎 Verify with Web".to_string(),
            prefill: format!("{WEB_PREFIX} "),
        }
    }
}

/// What a turn tells the host, in the order it happens.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TurnEvent {
    GroundingToggled { enabled: bool, message: String },
    SearchStarted { query: String },
    Sources {
        provider: String,
        sources: Vec<Source>,
        markdown: String,
    },
    SearchFailed { message: String },
    AnswerChunk { text: String },
    AnswerDone { chars: usize, grounded: bool },
    Suggestion { message: String, action: Action },
}

/// Receives turn events as they happen.
pub trait Emitter {
    fn emit(&mut self, event: TurnEvent);
}

impl Emitter for Vec<TurnEvent> {
    fn emit(&mut self, event: TurnEvent) {
        self.push(event);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnOutcome {
    pub mode: Mode,
    pub question: String,
    pub search_query: Option<String>,
    pub source_urls: Vec<String>,
    pub search_error: Option<String>,
    /// `None` when the turn ended without a completion (toggle).
    pub answer: Option<String>,
    pub chars: usize,
    pub suggested_verification: bool,
}

pub fn toggle_message(enabled: bool) -> String {
    format!(
        "Thread grounding **{}**.",
        if enabled { "enabled" } else { "disabled" }
    )
}

pub struct Assistant {
    search: Arc<dyn SearchProvider>,
    completion: Arc<dyn CompletionProvider>,
    config: AssistantConfig,
}

impl Assistant {
    pub fn new(
        search: Arc<dyn SearchProvider>,
        completion: Arc<dyn CompletionProvider>,
        config: AssistantConfig,
    ) -> Self {
        Self {
            search,
            completion,
            config,
        }
    }

    /// Run one turn against `session`.
    ///
    /// A failed search degrades to an ungrounded answer. A failed completion
    /// (before or during streaming) is returned as an error and leaves the
    /// session history untouched.
    pub async fn handle_turn<E>(
        &self,
        session: &mut Session,
        input: TurnInput,
        emitter: &mut E,
    ) -> Result<TurnOutcome>
    where
        E: Emitter + ?Sized,
    {
        let q_raw = input.text.trim().to_string();
        let (mode, question) = resolve_mode(input.command, &q_raw, session.ground_always());
        debug!(?mode, "resolved turn mode");

        if mode == Mode::ToggleGrounding {
            let enabled = session.toggle_grounding();
            info!(enabled, "thread grounding toggled");
            emitter.emit(TurnEvent::GroundingToggled {
                enabled,
                message: toggle_message(enabled),
            });
            return Ok(TurnOutcome {
                mode,
                question,
                search_query: None,
                source_urls: Vec::new(),
                search_error: None,
                answer: None,
                chars: 0,
                suggested_verification: false,
            });
        }

        let mut sources: Vec<Source> = Vec::new();
        let mut search_query = None;
        let mut search_error = None;
        if mode == Mode::SearchThenAnswer {
            let query = format!("{question} {}", self.config.site_filter);
            emitter.emit(TurnEvent::SearchStarted {
                query: query.clone(),
            });
            let q = SearchQuery {
                query: query.clone(),
                count: self.config.search_count,
            };
            match self.search.search(&q).await {
                Ok(mut found) => {
                    found.truncate(self.config.search_count);
                    info!(provider = self.search.name(), sources = found.len(), "web search done");
                    if !found.is_empty() {
                        let provider = self.search.display_name();
                        emitter.emit(TurnEvent::Sources {
                            provider: provider.to_string(),
                            markdown: render_sources_markdown(provider, &found),
                            sources: found.clone(),
                        });
                    }
                    sources = found;
                }
                Err(e) => {
                    warn!(provider = self.search.name(), error = %e, "web search failed; answering without sources");
                    emitter.emit(TurnEvent::SearchFailed {
                        message: format!("Web search failed ({e}); answering without sources."),
                    });
                    search_error = Some(e.to_string());
                }
            }
            search_query = Some(query);
        }

        let req = CompletionRequest {
            model: self.config.model.clone(),
            prompt: compose_prompt(
                &self.config.system_prompt,
                session.history(),
                &question,
                &sources,
            ),
            system_instruction: self.config.system_prompt.clone(),
            temperature: self.config.temperature,
            max_output_tokens: self.config.max_output_tokens,
        };

        let mut stream = self.completion.stream(&req).await?;
        let mut answer = String::new();
        while let Some(chunk) = stream.next().await {
            let text = chunk?;
            if text.is_empty() {
                continue;
            }
            answer.push_str(&text);
            emitter.emit(TurnEvent::AnswerChunk { text });
        }
        let grounded = mode == Mode::SearchThenAnswer;
        let chars = answer.chars().count();
        info!(
            provider = self.completion.name(),
            grounded,
            sources = sources.len(),
            chars,
            "answer streamed"
        );
        emitter.emit(TurnEvent::AnswerDone { chars, grounded });

        session.record_exchange(q_raw.clone(), answer.clone());

        let suggested_verification = !grounded && self.config.classifier.matches(&q_raw);
        if suggested_verification {
            debug!(
                patterns = ?self.config.classifier.matching_patterns(&q_raw),
                "time-sensitive question answered without sources"
            );
            emitter.emit(TurnEvent::Suggestion {
                message: VERIFY_SUGGESTION.to_string(),
                action: Action::verify_with_web(),
            });
        }

        Ok(TurnOutcome {
            mode,
            question,
            search_query,
            source_urls: sources.into_iter().map(|s| s.url).collect(),
            search_error,
            answer: Some(answer),
            chars,
            suggested_verification,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ChunkStream, Error};
    use std::sync::Mutex;

    struct FakeSearch {
        results: Vec<Source>,
        fail_status: Option<u16>,
        seen: Mutex<Vec<SearchQuery>>,
    }

    impl FakeSearch {
        fn returning(n: usize) -> Self {
            Self {
                results: (1..=n)
                    .map(|i| Source {
                        title: format!("URA notice {i}"),
                        url: format!("https://ura.go.ug/n{i}"),
                        snippet: format!("VAT registration threshold detail {i}"),
                    })
                    .collect(),
                fail_status: None,
                seen: Mutex::new(Vec::new()),
            }
        }

        fn failing(status: u16) -> Self {
            Self {
                fail_status: Some(status),
                ..Self::returning(0)
            }
        }

        fn queries(&self) -> Vec<SearchQuery> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl SearchProvider for FakeSearch {
        fn name(&self) -> &'static str {
            "fake"
        }

        fn display_name(&self) -> &'static str {
            "Fake"
        }

        async fn search(&self, q: &SearchQuery) -> Result<Vec<Source>> {
            self.seen.lock().unwrap().push(q.clone());
            if let Some(status) = self.fail_status {
                return Err(Error::search_provider(status, "quota exceeded"));
            }
            Ok(self.results.clone())
        }
    }

    enum Script {
        Chunks(Vec<&'static str>),
        FailMidStream(Vec<&'static str>),
        FailToStart,
    }

    struct FakeCompletion {
        script: Script,
        seen: Mutex<Vec<CompletionRequest>>,
    }

    impl FakeCompletion {
        fn new(script: Script) -> Self {
            Self {
                script,
                seen: Mutex::new(Vec::new()),
            }
        }

        fn requests(&self) -> Vec<CompletionRequest> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl CompletionProvider for FakeCompletion {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn stream(&self, req: &CompletionRequest) -> Result<ChunkStream> {
            self.seen.lock().unwrap().push(req.clone());
            let (chunks, fail) = match &self.script {
                Script::Chunks(c) => (c.clone(), false),
                Script::FailMidStream(c) => (c.clone(), true),
                Script::FailToStart => {
                    return Err(Error::Completion("HTTP 401".to_string()));
                }
            };
            let (tx, stream) = ChunkStream::channel(2);
            tokio::spawn(async move {
                for c in chunks {
                    if tx.send(Ok(c.to_string())).await.is_err() {
                        return;
                    }
                }
                if fail {
                    let _ = tx
                        .send(Err(Error::Completion("connection reset".to_string())))
                        .await;
                }
            });
            Ok(stream)
        }
    }

    fn assistant(search: Arc<FakeSearch>, completion: Arc<FakeCompletion>) -> Assistant {
        Assistant::new(search, completion, AssistantConfig::default())
    }

    fn answer_chunks(events: &[TurnEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                TurnEvent::AnswerChunk { text } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn resolve_mode_cases() {
        assert_eq!(
            resolve_mode(None, "web: what is VAT", false),
            (Mode::SearchThenAnswer, "what is VAT".to_string())
        );
        assert_eq!(
            resolve_mode(None, "what is VAT", false),
            (Mode::NoGrounding, "what is VAT".to_string())
        );
        assert_eq!(
            resolve_mode(None, "what is VAT", true),
            (Mode::SearchThenAnswer, "what is VAT".to_string())
        );
        assert_eq!(
            resolve_mode(Some(Command::WebSearch), "what is VAT", false),
            (Mode::SearchThenAnswer, "what is VAT".to_string())
        );
        assert_eq!(
            resolve_mode(Some(Command::GroundToggle), "anything", true).0,
            Mode::ToggleGrounding
        );
    }

    #[test]
    fn site_filter_joins_domains() {
        assert_eq!(
            site_filter(&["a.ug", "b.org"]),
            "site:a.ug OR site:b.org"
        );
        let f = site_filter(TRUSTED_DOMAINS);
        assert!(f.starts_with("site:ura.go.ug OR site:finance.go.ug"));
        assert_eq!(f.matches("site:").count(), TRUSTED_DOMAINS.len());
    }

    #[tokio::test]
    async fn web_prefix_turn_end_to_end() {
        let search = Arc::new(FakeSearch::returning(3));
        let completion = Arc::new(FakeCompletion::new(Script::Chunks(vec![
            "The threshold ",
            "is set by the VAT Act ",
            "[1].",
        ])));
        let a = assistant(search.clone(), completion.clone());
        let mut session = Session::new();
        let mut events: Vec<TurnEvent> = Vec::new();

        let out = a
            .handle_turn(&mut session, TurnInput::text("web: VAT threshold"), &mut events)
            .await
            .unwrap();

        let filter = site_filter(TRUSTED_DOMAINS);
        let queries = search.queries();
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].query, format!("VAT threshold {filter}"));
        assert_eq!(queries[0].count, DEFAULT_SEARCH_COUNT);

        let reqs = completion.requests();
        assert_eq!(reqs.len(), 1);
        let prompt = &reqs[0].prompt;
        for i in 1..=3 {
            assert!(prompt.contains(&format!("[{i}] URA notice {i} — https://ura.go.ug/n{i}")));
        }
        assert!(!prompt.contains("[4]"));
        assert!(prompt.contains("User question:\nVAT threshold\n"));
        assert_eq!(reqs[0].system_instruction, SYSTEM_PROMPT);
        assert_eq!(reqs[0].temperature, 0.3);
        assert_eq!(reqs[0].max_output_tokens, 1200);

        assert_eq!(answer_chunks(&events).len(), 3);
        let answer = out.answer.clone().unwrap();
        assert_eq!(answer, "The threshold is set by the VAT Act [1].");
        assert_eq!(out.mode, Mode::SearchThenAnswer);
        assert_eq!(out.source_urls.len(), 3);
        assert!(!out.suggested_verification);

        assert_eq!(session.history().len(), 2);
        assert_eq!(session.history()[0].text, "web: VAT threshold");
        assert_eq!(session.history()[1].text, answer);

        assert!(matches!(events[0], TurnEvent::SearchStarted { .. }));
        match &events[1] {
            TurnEvent::Sources {
                provider, markdown, ..
            } => {
                assert_eq!(provider, "Fake");
                assert!(markdown.starts_with("**Sources (Fake):**"));
            }
            other => panic!("expected sources, got {other:?}"),
        }
        assert!(matches!(
            events.last(),
            Some(TurnEvent::AnswerDone { grounded: true, .. })
        ));
    }

    #[tokio::test]
    async fn ungrounded_turn_suggests_verification_when_heuristic_matches() {
        let search = Arc::new(FakeSearch::returning(3));
        let completion = Arc::new(FakeCompletion::new(Script::Chunks(vec!["It is 150m UGX."])));
        let a = assistant(search.clone(), completion);
        let mut session = Session::new();
        let mut events: Vec<TurnEvent> = Vec::new();

        let out = a
            .handle_turn(&mut session, TurnInput::text("  what is VAT  "), &mut events)
            .await
            .unwrap();

        assert_eq!(out.mode, Mode::NoGrounding);
        assert_eq!(out.question, "what is VAT");
        assert!(search.queries().is_empty());
        assert!(out.suggested_verification);
        match events.last() {
            Some(TurnEvent::Suggestion { message, action }) => {
                assert_eq!(message, VERIFY_SUGGESTION);
                assert_eq!(action.name, "composer_web");
                assert_eq!(action.prefill, "web: ");
            }
            other => panic!("expected suggestion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn ungrounded_turn_without_heuristic_match_has_no_suggestion() {
        let a = assistant(
            Arc::new(FakeSearch::returning(0)),
            Arc::new(FakeCompletion::new(Script::Chunks(vec!["Bring your ID."]))),
        );
        let mut session = Session::new();
        let mut events: Vec<TurnEvent> = Vec::new();
        let out = a
            .handle_turn(
                &mut session,
                TurnInput::text("What documents are needed for tax registration?"),
                &mut events,
            )
            .await
            .unwrap();
        assert!(!out.suggested_verification);
        assert!(!events.iter().any(|e| matches!(e, TurnEvent::Suggestion { .. })));
    }

    #[tokio::test]
    async fn toggle_twice_round_trips_without_completion() {
        let search = Arc::new(FakeSearch::returning(1));
        let completion = Arc::new(FakeCompletion::new(Script::Chunks(vec!["x"])));
        let a = assistant(search.clone(), completion.clone());
        let mut session = Session::new();
        let mut events: Vec<TurnEvent> = Vec::new();

        for _ in 0..2 {
            let out = a
                .handle_turn(
                    &mut session,
                    TurnInput::command(Command::GroundToggle, ""),
                    &mut events,
                )
                .await
                .unwrap();
            assert_eq!(out.mode, Mode::ToggleGrounding);
            assert!(out.answer.is_none());
        }

        let messages: Vec<_> = events
            .iter()
            .map(|e| match e {
                TurnEvent::GroundingToggled { message, .. } => message.as_str(),
                other => panic!("unexpected event {other:?}"),
            })
            .collect();
        assert_eq!(
            messages,
            vec!["Thread grounding **enabled**.", "Thread grounding **disabled**."]
        );
        assert!(!session.ground_always());
        assert!(session.history().is_empty());
        assert!(completion.requests().is_empty());
        assert!(search.queries().is_empty());
    }

    #[tokio::test]
    async fn toggle_on_grounds_following_turns() {
        let search = Arc::new(FakeSearch::returning(2));
        let completion = Arc::new(FakeCompletion::new(Script::Chunks(vec!["ok"])));
        let a = assistant(search.clone(), completion);
        let mut session = Session::new();
        let mut events: Vec<TurnEvent> = Vec::new();

        a.handle_turn(&mut session, TurnInput::command(Command::GroundToggle, ""), &mut events)
            .await
            .unwrap();
        let out = a
            .handle_turn(&mut session, TurnInput::text("PAYE bands"), &mut events)
            .await
            .unwrap();
        assert_eq!(out.mode, Mode::SearchThenAnswer);
        assert!(!out.suggested_verification);
        assert!(search.queries()[0].query.starts_with("PAYE bands site:"));
    }

    #[tokio::test]
    async fn web_search_command_grounds_without_prefix() {
        let search = Arc::new(FakeSearch::returning(1));
        let a = assistant(
            search.clone(),
            Arc::new(FakeCompletion::new(Script::Chunks(vec!["ok"]))),
        );
        let mut session = Session::new();
        let mut events: Vec<TurnEvent> = Vec::new();
        let out = a
            .handle_turn(
                &mut session,
                TurnInput::command(Command::WebSearch, "EFRIS onboarding"),
                &mut events,
            )
            .await
            .unwrap();
        assert_eq!(out.mode, Mode::SearchThenAnswer);
        assert_eq!(search.queries().len(), 1);
    }

    #[tokio::test]
    async fn more_results_than_k_are_truncated() {
        let search = Arc::new(FakeSearch::returning(10));
        let completion = Arc::new(FakeCompletion::new(Script::Chunks(vec!["ok"])));
        let a = assistant(search, completion.clone());
        let mut session = Session::new();
        let mut events: Vec<TurnEvent> = Vec::new();
        let out = a
            .handle_turn(&mut session, TurnInput::text("web: rates"), &mut events)
            .await
            .unwrap();
        assert_eq!(out.source_urls.len(), DEFAULT_SEARCH_COUNT);
        assert!(!completion.requests()[0].prompt.contains("[7]"));
    }

    #[tokio::test]
    async fn search_failure_degrades_to_ungrounded_answer() {
        let completion = Arc::new(FakeCompletion::new(Script::Chunks(vec!["best effort"])));
        let a = assistant(Arc::new(FakeSearch::failing(429)), completion.clone());
        let mut session = Session::new();
        let mut events: Vec<TurnEvent> = Vec::new();

        let out = a
            .handle_turn(&mut session, TurnInput::text("web: WHT on rent"), &mut events)
            .await
            .unwrap();

        assert_eq!(out.mode, Mode::SearchThenAnswer);
        assert!(out.source_urls.is_empty());
        assert!(out.search_error.as_deref().unwrap().contains("429"));
        assert_eq!(out.answer.as_deref(), Some("best effort"));
        assert!(!completion.requests()[0]
            .prompt
            .contains("Context from authoritative Uganda web sources"));
        assert!(events
            .iter()
            .any(|e| matches!(e, TurnEvent::SearchFailed { .. })));
        assert_eq!(session.history().len(), 2);
    }

    #[tokio::test]
    async fn mid_stream_failure_aborts_turn_and_keeps_history() {
        let a = assistant(
            Arc::new(FakeSearch::returning(0)),
            Arc::new(FakeCompletion::new(Script::FailMidStream(vec!["partial "]))),
        );
        let mut session = Session::new();
        session.record_exchange("earlier", "answer");
        let mut events: Vec<TurnEvent> = Vec::new();

        let err = a
            .handle_turn(&mut session, TurnInput::text("next question"), &mut events)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Completion(_)));
        assert_eq!(session.history().len(), 2);
        assert_eq!(answer_chunks(&events), vec!["partial ".to_string()]);
        assert!(!events.iter().any(|e| matches!(e, TurnEvent::AnswerDone { .. })));
    }

    #[tokio::test]
    async fn completion_start_failure_is_returned() {
        let a = assistant(
            Arc::new(FakeSearch::returning(0)),
            Arc::new(FakeCompletion::new(Script::FailToStart)),
        );
        let mut session = Session::new();
        let mut events: Vec<TurnEvent> = Vec::new();
        assert!(a
            .handle_turn(&mut session, TurnInput::text("hi"), &mut events)
            .await
            .is_err());
        assert!(session.history().is_empty());
    }

    #[tokio::test]
    async fn prompt_carries_only_last_eight_turns() {
        let completion = Arc::new(FakeCompletion::new(Script::Chunks(vec!["ok"])));
        let a = assistant(Arc::new(FakeSearch::returning(0)), completion.clone());
        let mut session = Session::new();
        for i in 0..10 {
            session.record_exchange(format!("question-{i:02}"), format!("answer-{i:02}"));
        }
        let mut events: Vec<TurnEvent> = Vec::new();
        a.handle_turn(&mut session, TurnInput::text("hello"), &mut events)
            .await
            .unwrap();
        let prompt = &completion.requests()[0].prompt;
        assert!(!prompt.contains("question-05"));
        for i in 6..10 {
            assert!(prompt.contains(&format!("User: question-{i:02}")));
            assert!(prompt.contains(&format!("Assistant: answer-{i:02}")));
        }
        assert_eq!(session.history().len(), 22);
    }
}
