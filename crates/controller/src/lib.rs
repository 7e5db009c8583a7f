use std::{sync::Arc, time::Duration};

use bus::{BusClient, BusError, Delivery};
use catalog::{Catalog, Translations};
use shared::protocol::{
    parse_frame, Action, ControlBody, ControlCommand, Envelope, OptionEntry, PeerState,
    ResourcesDeclaration, StopNotice, UiDirective, UiEventBody,
};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

/// Topic owned by the external task manager; every app listens there for its
/// start/stop commands.
pub const TASK_MANAGER_TOPIC: &str = "taskmanager";

const TOPIC_POLL_INTERVAL: Duration = Duration::from_millis(500);
const CONFIG_REQUEST_INTERVAL: Duration = Duration::from_secs(1);

/// Static identity of this app on the bus, plus the knobs the conversation
/// needs to compose replies.
#[derive(Debug, Clone)]
pub struct AppIdentity {
    /// The one topic this app owns for its active lifetime.
    pub topic: String,
    /// Stable subscriber name, reused across restarts so a stale
    /// subscription left by a crashed run can be recognized and cleared.
    pub subscriber: String,
    /// Abstract capabilities declared to the task manager.
    pub resources: Vec<String>,
    /// Topics those capabilities deliver on.
    pub resource_topics: Vec<String>,
    /// Advertised address of the content file server.
    pub public_host: String,
    pub public_port: u16,
    /// Root of the UI image tree referenced by menu options.
    pub img_root: String,
    /// When true, `state = "subscribed"` handling waits until every resource
    /// subscription is established before asking the UI for its config.
    pub strict_resource_subscriptions: bool,
}

impl Default for AppIdentity {
    fn default() -> Self {
        Self {
            topic: "games".to_string(),
            subscriber: "games_app".to_string(),
            resources: vec!["UI".to_string()],
            resource_topics: vec!["UIEvents".to_string(), "UCEvents".to_string()],
            public_host: "localhost".to_string(),
            public_port: 9706,
            img_root: "/_img/launcher".to_string(),
            strict_resource_subscriptions: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    Idle,
    TopicEnsuring,
    Announced,
    AwaitingSubscriptionAck,
    Operating,
    Stopping,
    Stopped,
}

/// Mutable per-app conversation state. Only the event path mutates it.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub locale: String,
    pub username: String,
    /// True once the UI has confirmed registration with a "config" event.
    pub subscribed: bool,
    pub phase: LifecyclePhase,
}

impl Default for SessionContext {
    fn default() -> Self {
        Self {
            locale: "en-GB".to_string(),
            username: String::new(),
            subscribed: false,
            phase: LifecyclePhase::Idle,
        }
    }
}

/// Violations of the bus-identity invariants. None of these are recoverable:
/// the run loop propagates them and the process exits.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("{subscriber} failed to unsubscribe from topic {topic}: {source}")]
    UnsubscribeFailed {
        topic: String,
        subscriber: String,
        source: BusError,
    },
    #[error("own topic {0} no longer exists on the bus")]
    TopicVanished(String),
    #[error("could not verify own topic {topic} before publish: {source}")]
    OwnTopicCheckFailed { topic: String, source: BusError },
    #[error("failed to delete own topic {topic}: {source}")]
    DeleteTopicFailed { topic: String, source: BusError },
    #[error("failed to establish the {topic} subscription: {source}")]
    StartupSubscribe { topic: String, source: BusError },
}

/// The app-side controller: owns the app's topic lifecycle on the bus and
/// the menu conversation with the UI.
pub struct GamesController {
    bus: Arc<dyn BusClient>,
    catalog: Catalog,
    translations: Translations,
    identity: AppIdentity,
    session: Mutex<SessionContext>,
    poll_interval: Duration,
    config_request_interval: Duration,
}

impl GamesController {
    pub fn new(
        bus: Arc<dyn BusClient>,
        catalog: Catalog,
        translations: Translations,
        identity: AppIdentity,
    ) -> Self {
        Self {
            bus,
            catalog,
            translations,
            identity,
            session: Mutex::new(SessionContext::default()),
            poll_interval: TOPIC_POLL_INTERVAL,
            config_request_interval: CONFIG_REQUEST_INTERVAL,
        }
    }

    pub async fn session_snapshot(&self) -> SessionContext {
        self.session.lock().await.clone()
    }

    /// Wait for the task manager channel, subscribe under our identity, then
    /// process deliveries until the channel closes or an invariant breaks.
    pub async fn run(
        self: Arc<Self>,
        mut deliveries: mpsc::Receiver<Delivery>,
    ) -> Result<(), ControllerError> {
        self.ensure_topic(TASK_MANAGER_TOPIC).await;
        self.reconcile_subscribe(TASK_MANAGER_TOPIC)
            .await
            .map_err(|source| ControllerError::StartupSubscribe {
                topic: TASK_MANAGER_TOPIC.to_string(),
                source,
            })?;

        while let Some(delivery) = deliveries.recv().await {
            self.dispatch(&delivery.payload, &delivery.topic).await?;
        }
        Ok(())
    }

    /// Poll the topic list at a fixed interval until `topic` appears.
    ///
    /// A transport error is retried exactly like an absent topic, but logged
    /// at warn so a dead bus is visible in the log stream rather than
    /// indistinguishable from a slow peer.
    pub async fn ensure_topic(&self, topic: &str) {
        loop {
            match self.bus.list_topics().await {
                Ok(topics) if topics.iter().any(|t| t == topic) => {
                    info!(topic, "bus: topic present");
                    return;
                }
                Ok(_) => {
                    info!(topic, "bus: topic not found, retrying");
                }
                Err(error) => {
                    warn!(topic, %error, "bus: topic list failed, retrying as not found");
                }
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Establish the single live subscription for this app's identity on
    /// `topic`: a leftover subscription under the same name is removed first,
    /// then a fresh one is created.
    pub async fn reconcile_subscribe(&self, topic: &str) -> Result<(), BusError> {
        let subscriber = &self.identity.subscriber;
        let existing = self.bus.list_subscribers(topic).await?;
        if existing.iter().any(|s| s == subscriber) {
            info!(topic, %subscriber, "bus: stale subscription found, removing");
            self.bus.unsubscribe(topic, subscriber).await?;
        }
        self.bus.subscribe(topic, subscriber).await?;
        info!(topic, %subscriber, "bus: subscribed");
        Ok(())
    }

    async fn ensure_subscribed(&self, topic: &str) {
        self.ensure_topic(topic).await;
        if let Err(error) = self.reconcile_subscribe(topic).await {
            warn!(topic, %error, "bus: resource subscription failed");
        }
    }

    /// Route one raw delivery to the matching handler. Malformed frames are
    /// dropped here; only bus-invariant violations escape as errors.
    pub async fn dispatch(self: &Arc<Self>, raw: &str, topic: &str) -> Result<(), ControllerError> {
        let envelope = match parse_frame(raw) {
            Ok(envelope) => envelope,
            Err(error) => {
                warn!(topic, %error, "router: dropping malformed delivery");
                return Ok(());
            }
        };
        if topic == TASK_MANAGER_TOPIC {
            self.handle_control(envelope).await
        } else if self.identity.resource_topics.iter().any(|t| t == topic) {
            self.handle_ui_event(envelope).await
        } else {
            debug!(topic, "router: no handler for topic, ignoring");
            Ok(())
        }
    }

    async fn handle_control(self: &Arc<Self>, envelope: Envelope) -> Result<(), ControllerError> {
        let body: ControlBody = match envelope.decode_body() {
            Ok(body) => body,
            Err(error) => {
                warn!(%error, "lifecycle: dropping control message with invalid body");
                return Ok(());
            }
        };
        if body.ability != self.identity.topic {
            debug!(ability = %body.ability, "lifecycle: control message for another app, ignoring");
            return Ok(());
        }
        let correlation_id = envelope.message_id;

        if let Some(command) = body.command {
            match command {
                ControlCommand::Start => self.handle_start(body.resources.as_deref()).await,
                ControlCommand::Stop => self.handle_stop(correlation_id).await,
                ControlCommand::Other(raw) => {
                    warn!(command = %raw, "lifecycle: unrecognized command, ignoring");
                    Ok(())
                }
            }
        } else if let Some(state) = body.state {
            match state {
                PeerState::Subscribed => self.handle_subscribed(correlation_id).await,
                PeerState::Running => Ok(()),
                PeerState::Other(raw) => {
                    warn!(state = %raw, "lifecycle: unrecognized state, ignoring");
                    Ok(())
                }
            }
        } else {
            warn!("lifecycle: control message carries neither command nor state");
            Ok(())
        }
    }

    /// `command = "start"`: make sure the app's own topic exists. An already
    /// existing topic is logged and kept, not an error.
    async fn handle_start(&self, resources: Option<&[String]>) -> Result<(), ControllerError> {
        if let Some(resources) = resources {
            debug!(?resources, "lifecycle: start carried resource hints");
        }
        self.set_phase(LifecyclePhase::TopicEnsuring).await;

        let topic = &self.identity.topic;
        let exists = match self.bus.list_topics().await {
            Ok(topics) => topics.iter().any(|t| t == topic),
            Err(error) => {
                warn!(topic = %topic, %error, "lifecycle: topic list failed during start, assuming absent");
                false
            }
        };
        if exists {
            info!(topic = %topic, "lifecycle: own topic existed already");
        } else {
            match self.bus.create_topic(topic).await {
                Ok(()) => info!(topic = %topic, "lifecycle: own topic created"),
                Err(error) => {
                    error!(topic = %topic, %error, "lifecycle: failed to create own topic, aborting start");
                    return Ok(());
                }
            }
        }
        self.set_phase(LifecyclePhase::Announced).await;
        Ok(())
    }

    /// `state = "subscribed"`: the task manager now listens on our topic.
    /// Declare the resources we depend on, chase their topics until each is
    /// subscribable, and ask the UI for its config until it confirms.
    async fn handle_subscribed(
        self: &Arc<Self>,
        correlation_id: Option<String>,
    ) -> Result<(), ControllerError> {
        self.set_phase(LifecyclePhase::AwaitingSubscriptionAck).await;

        let declaration = ResourcesDeclaration {
            targets: vec![TASK_MANAGER_TOPIC.to_string()],
            resources: self.identity.resources.clone(),
        };
        match Envelope::reply(correlation_id, &declaration) {
            Ok(envelope) => {
                self.post(&envelope).await?;
            }
            Err(error) => error!(%error, "lifecycle: could not encode resources declaration"),
        }

        // Each resource topic is chased independently; there is no barrier
        // between them unless strict mode is on.
        let handles: Vec<_> = self
            .identity
            .resource_topics
            .iter()
            .cloned()
            .map(|topic| {
                let controller = Arc::clone(self);
                tokio::spawn(async move { controller.ensure_subscribed(&topic).await })
            })
            .collect();
        if self.identity.strict_resource_subscriptions {
            for handle in handles {
                let _ = handle.await;
            }
        }

        let request = UiDirective::Sendconfig {
            targets: self.ui_targets(),
            configs: vec!["username".to_string(), "locale".to_string()],
        };
        let envelope = match Envelope::reply(None, &request) {
            Ok(envelope) => envelope,
            Err(error) => {
                error!(%error, "lifecycle: could not encode config request");
                self.set_phase(LifecyclePhase::Operating).await;
                return Ok(());
            }
        };
        self.post(&envelope).await?;

        let controller = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(controller.config_request_interval).await;
                if controller.session.lock().await.subscribed {
                    debug!("lifecycle: UI confirmed registration, stopping config requests");
                    break;
                }
                if let Err(error) = controller.post(&envelope).await {
                    error!(%error, "lifecycle: config request loop hit a fatal bus condition");
                    break;
                }
            }
        });

        self.set_phase(LifecyclePhase::Operating).await;
        Ok(())
    }

    /// `command = "stop"`: tear down in strict order. An unsubscribe failure
    /// means the bus no longer honors our identity and aborts the sequence.
    async fn handle_stop(&self, correlation_id: Option<String>) -> Result<(), ControllerError> {
        self.set_phase(LifecyclePhase::Stopping).await;

        let subscriber = &self.identity.subscriber;
        for topic in &self.identity.resource_topics {
            self.bus
                .unsubscribe(topic, subscriber)
                .await
                .map_err(|source| ControllerError::UnsubscribeFailed {
                    topic: topic.clone(),
                    subscriber: subscriber.clone(),
                    source,
                })?;
            info!(topic = %topic, %subscriber, "lifecycle: unsubscribed");
        }

        let envelope = match Envelope::reply(correlation_id, &StopNotice::stopped()) {
            Ok(envelope) => envelope,
            Err(error) => {
                error!(%error, "lifecycle: could not encode stop notice");
                return Ok(());
            }
        };
        if self.post(&envelope).await? {
            // the topic may only go away after the stopped notice is out
            let topic = &self.identity.topic;
            self.bus
                .delete_topic(topic)
                .await
                .map_err(|source| ControllerError::DeleteTopicFailed {
                    topic: topic.clone(),
                    source,
                })?;
            info!(topic = %topic, "lifecycle: own topic deleted");
            let mut session = self.session.lock().await;
            session.subscribed = false;
            session.phase = LifecyclePhase::Stopped;
        } else {
            warn!("lifecycle: stopped notice was not acknowledged, keeping topic");
        }
        Ok(())
    }

    async fn handle_ui_event(&self, envelope: Envelope) -> Result<(), ControllerError> {
        let body: UiEventBody = match envelope.decode_body() {
            Ok(body) => body,
            Err(error) => {
                warn!(%error, "menu: dropping UI event with invalid body");
                return Ok(());
            }
        };
        if body.ability != self.identity.topic {
            debug!(ability = %body.ability, "menu: UI event for another app, ignoring");
            return Ok(());
        }

        if let Some(raw_action) = &body.action {
            match Action::parse(raw_action) {
                Ok(action) => self.handle_action(action).await?,
                Err(error) => {
                    warn!(action = %raw_action, %error, "menu: dropping unparseable action")
                }
            }
        }

        if body.event.as_deref() == Some("config") {
            self.handle_config(body.locale, body.username).await?;
        } else if let Some(event) = &body.event {
            debug!(event = %event, "menu: event without handler, ignoring");
        }
        Ok(())
    }

    async fn handle_action(&self, action: Action) -> Result<(), ControllerError> {
        let locale = self.session.lock().await.locale.clone();
        match action {
            Action::SelectGame => {
                let menu = self.select_game_menu(&locale);
                self.post_directive(&menu).await
            }
            Action::GameHome { game } => {
                let menu = self.game_home_menu(&locale, &game);
                self.post_directive(&menu).await
            }
            Action::Instructions { game } => {
                let article = self.instructions_article(&locale, &game);
                self.post_directive(&article).await
            }
            Action::PlayGame { game } => {
                let url = self.catalog.game_url(
                    &game,
                    &self.identity.public_host,
                    self.identity.public_port,
                );
                match url {
                    Some(url) => {
                        let directive = UiDirective::Showexternal {
                            targets: self.ui_targets(),
                            name: self.translations.text(&locale, &game),
                            url,
                            arrowkeys: "false".to_string(),
                        };
                        self.post_directive(&directive).await
                    }
                    None => {
                        warn!(game = %game, "menu: playgame for a game not in the catalog, ignoring");
                        Ok(())
                    }
                }
            }
            Action::Other(name) => {
                debug!(action = %name, "menu: unrecognized action, ignoring");
                Ok(())
            }
        }
    }

    /// A UI "config" event doubles as the registration ack: adopt locale and
    /// username, mark the UI subscribed, and land the user on the game list.
    async fn handle_config(
        &self,
        locale: Option<String>,
        username: Option<String>,
    ) -> Result<(), ControllerError> {
        let locale = {
            let mut session = self.session.lock().await;
            session.subscribed = true;
            if let Some(locale) = locale {
                session.locale = locale;
            }
            if let Some(username) = username {
                session.username = username;
            }
            session.locale.clone()
        };
        let menu = self.select_game_menu(&locale);
        self.post_directive(&menu).await
    }

    fn ui_targets(&self) -> Vec<String> {
        self.identity.resources.clone()
    }

    fn select_game_menu(&self, locale: &str) -> UiDirective {
        let options = self
            .catalog
            .entries()
            .iter()
            .map(|entry| {
                let name = self.translations.text(locale, &entry.stem);
                OptionEntry {
                    keywords: name.split_whitespace().map(str::to_owned).collect(),
                    img: format!("{}/games/{}.png", self.identity.img_root, entry.stem),
                    action: format!("gamehome?game={}", entry.stem),
                    name,
                }
            })
            .collect();
        UiDirective::Showoptions {
            targets: self.ui_targets(),
            heading: self
                .translations
                .text(locale, "Which game would you like to play?"),
            options,
        }
    }

    fn game_home_menu(&self, locale: &str, game: &str) -> UiDirective {
        let text = |key: &str| self.translations.text(locale, key);
        let options = vec![
            OptionEntry {
                name: text("Play?"),
                img: format!("{}/play.png", self.identity.img_root),
                action: format!("playgame?game={game}"),
                keywords: split_keywords(&text("play_keywords")),
            },
            OptionEntry {
                name: text("Instructions?"),
                img: format!("{}/manual.png", self.identity.img_root),
                action: format!("instructions?game={game}"),
                keywords: split_keywords(&text("instructions_keywords")),
            },
        ];
        UiDirective::Showoptions {
            targets: self.ui_targets(),
            heading: text("What would you like to do?"),
            options,
        }
    }

    fn instructions_article(&self, locale: &str, game: &str) -> UiDirective {
        UiDirective::Showarticle {
            targets: self.ui_targets(),
            title: self.translations.text(locale, game),
            text: self
                .translations
                .text(locale, &format!("{game} instructions")),
            img: format!("{}/games/{game}.png", self.identity.img_root),
            nextaction: format!("playgame?game={game}"),
        }
    }

    async fn post_directive(&self, directive: &UiDirective) -> Result<(), ControllerError> {
        match Envelope::reply(None, directive) {
            Ok(envelope) => {
                self.post(&envelope).await?;
                Ok(())
            }
            Err(error) => {
                error!(%error, "menu: could not encode directive");
                Ok(())
            }
        }
    }

    /// Publish to the app's own topic after re-checking that it still
    /// exists. Returns whether the publish was acknowledged; a missing topic
    /// breaks the ownership invariant and is fatal.
    async fn post(&self, envelope: &Envelope) -> Result<bool, ControllerError> {
        let topic = &self.identity.topic;
        let topics =
            self.bus
                .list_topics()
                .await
                .map_err(|source| ControllerError::OwnTopicCheckFailed {
                    topic: topic.clone(),
                    source,
                })?;
        if !topics.iter().any(|t| t == topic) {
            return Err(ControllerError::TopicVanished(topic.clone()));
        }
        match self.bus.publish(topic, envelope).await {
            Ok(()) => {
                debug!(topic = %topic, "bus: published");
                Ok(true)
            }
            Err(error) => {
                warn!(topic = %topic, %error, "bus: publish failed");
                Ok(false)
            }
        }
    }

    async fn set_phase(&self, phase: LifecyclePhase) {
        let mut session = self.session.lock().await;
        if session.phase != phase {
            debug!(from = ?session.phase, to = ?phase, "lifecycle: phase transition");
            session.phase = phase;
        }
    }
}

/// Keyword lists are stored as a single comma-separated translation entry.
fn split_keywords(raw: &str) -> Vec<String> {
    raw.split(", ").map(str::to_owned).collect()
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
