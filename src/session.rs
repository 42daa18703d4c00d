//! One level's judgment loop
//!
//! [`Session`] owns everything a judgment cycle needs. The progress engine is
//! registered as the first dispatcher subscriber, so it sees every judgment
//! before anything else does.

use crate::client::{ClientError, ProtocolClient};
use crate::config::Config;
use crate::dispatch::{ConfidenceDispatcher, DispatchReport};
use crate::level::Level;
use crate::model::{DiscoveryResult, RefereeResult};
use crate::progress::{ArgumentStore, Progress};
use crate::prompt::ContextBuilder;
use std::cell::{Ref, RefCell};
use std::rc::Rc;
use tokio_util::sync::CancellationToken;

const PROGRESS_SUBSCRIBER: &str = "progress";

#[derive(Debug)]
pub enum Outcome {
    Judged {
        result: RefereeResult,
        report: DispatchReport,
    },
    /// The token fired before a result arrived; nothing was dispatched.
    Cancelled,
}

#[derive(Debug)]
pub struct Session {
    client: ProtocolClient,
    config: Config,
    level: Level,
    dispatcher: ConfidenceDispatcher,
    progress: Rc<RefCell<Progress>>,
}

impl Session {
    pub fn new(client: ProtocolClient, config: Config, level: Level) -> Self {
        Self::with_store(client, config, level, ArgumentStore::new())
    }

    /// Start from an existing argument store
    pub fn with_store(
        client: ProtocolClient,
        config: Config,
        level: Level,
        store: ArgumentStore,
    ) -> Self {
        let progress = Rc::new(RefCell::new(Progress::with_store(
            level.nodes.clone(),
            store,
            config.progress.cutoff(),
        )
        .with_phases(level.phases.clone())));

        let mut dispatcher = ConfidenceDispatcher::new();
        let engine = Rc::clone(&progress);
        dispatcher.subscribe(PROGRESS_SUBSCRIBER, move |result: &RefereeResult| {
            let mut engine = engine
                .try_borrow_mut()
                .map_err(|_| anyhow::anyhow!("progress engine is busy"))?;
            engine.apply(result);
            Ok(())
        });

        Self {
            client,
            config,
            level,
            dispatcher,
            progress,
        }
    }

    pub fn level(&self) -> &Level {
        &self.level
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Register further subscribers here
    pub fn dispatcher_mut(&mut self) -> &mut ConfidenceDispatcher {
        &mut self.dispatcher
    }

    pub fn progress(&self) -> Ref<'_, Progress> {
        self.progress.borrow()
    }

    /// Judge one statement and dispatch the result.
    ///
    /// Returns [`Outcome::Cancelled`] if `cancel` fires before the endpoint
    /// answers. Client failures come back as errors and dispatch nothing.
    pub async fn judge(
        &self,
        phase: &str,
        input: &str,
        cancel: &CancellationToken,
    ) -> Result<Outcome, ClientError> {
        let prompt =
            ContextBuilder::new(&self.level.nodes, &self.level.entities).referee_prompt(phase, input);

        let result = match self
            .client
            .send_until_cancelled(&prompt, &self.config.client, cancel)
            .await
        {
            None => {
                tracing::info!(phase, "Judgment cancelled");
                return Ok(Outcome::Cancelled);
            }
            Some(result) => result?,
        };

        if cancel.is_cancelled() {
            tracing::info!(phase, "Judgment cancelled after response");
            return Ok(Outcome::Cancelled);
        }

        let report = self.dispatcher.dispatch(&result);
        Ok(Outcome::Judged { result, report })
    }

    /// Run topic discovery for one statement. `Ok(None)` when the phase has
    /// no candidate topics.
    pub async fn discover(
        &self,
        phase: &str,
        input: &str,
    ) -> Result<Option<DiscoveryResult>, ClientError> {
        let Some(prompt) = ContextBuilder::new(&self.level.nodes, &self.level.entities)
            .discovery_prompt(phase, input)
        else {
            return Ok(None);
        };
        self.client
            .discover(&prompt, &self.config.client)
            .await
            .map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;

    const LEVEL: &str = r#"{
        "universal_nodes": { "motive": { "description": "Has a motive" } },
        "phase1": { "nodes": { "weapon": { "description": "Owns the knife", "depends_on": { "motive": true } } } }
    }"#;

    fn session() -> Session {
        let config = Config {
            client: ClientConfig {
                endpoint: Some("http://127.0.0.1:9/v1/chat/completions".into()),
                api_key: Some("sk-test-000".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        Session::new(
            ProtocolClient::new(),
            config,
            Level::from_json_str(LEVEL).unwrap(),
        )
    }

    #[test]
    fn test_progress_is_first_subscriber() {
        let mut session = session();
        assert_eq!(session.dispatcher_mut().len(), 1);

        let result: RefereeResult =
            serde_json::from_str(r#"{"reasoning":"","node_confidence":{"motive":1.0}}"#).unwrap();
        let report = session.dispatcher_mut().dispatch(&result);
        assert!(report.is_clean());
        assert!(session.progress().store().is_proven("motive"));
    }

    #[tokio::test]
    async fn test_cancelled_judgment_dispatches_nothing() {
        let mut session = session();
        let fired = Rc::new(RefCell::new(false));
        let flag = Rc::clone(&fired);
        session
            .dispatcher_mut()
            .subscribe("flag", move |_: &RefereeResult| {
                *flag.borrow_mut() = true;
                Ok(())
            });

        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = session.judge("phase1", "anything", &cancel).await.unwrap();
        assert!(matches!(outcome, Outcome::Cancelled));
        assert!(!*fired.borrow());
        assert!(session.progress().last_report().is_none());
    }

    #[tokio::test]
    async fn test_discover_without_candidates() {
        let session = Session::new(
            ProtocolClient::new(),
            Config::default(),
            Level::default(),
        );
        let found = session.discover("phase1", "x").await.unwrap();
        assert!(found.is_none());
    }
}
