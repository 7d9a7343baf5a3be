//! Application runner: connects, joins a realm and drives a [`Component`]
//! through its lifecycle on a single-threaded executor.

use async_trait::async_trait;
use serde_json::{Map, Value};
use smol::Executor;
use tracing::{debug, error, info, warn};

use crate::client::message::CLOSE_NORMAL;
use crate::client::{
    Credentials, EventHandler, SessionDetails, Subscription, Wamp, WampResult,
};
use crate::config::RouterConfig;

/// The operations a component may perform on a joined session.
#[async_trait]
pub trait Session: Send + Sync {
    async fn subscribe(&self, topic: &str, handler: EventHandler) -> WampResult<Subscription>;

    async fn unsubscribe(&self, subscription: &Subscription) -> WampResult<()>;

    async fn publish(
        &self,
        topic: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
        acknowledge: bool,
    ) -> WampResult<Option<u64>>;

    async fn leave(&self, reason: &str) -> WampResult<()>;
}

#[async_trait]
impl Session for Wamp {
    async fn subscribe(&self, topic: &str, handler: EventHandler) -> WampResult<Subscription> {
        Wamp::subscribe(self, topic, handler).await
    }

    async fn unsubscribe(&self, subscription: &Subscription) -> WampResult<()> {
        Wamp::unsubscribe(self, subscription).await
    }

    async fn publish(
        &self,
        topic: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
        acknowledge: bool,
    ) -> WampResult<Option<u64>> {
        Wamp::publish(self, topic, args, kwargs, acknowledge).await
    }

    async fn leave(&self, reason: &str) -> WampResult<()> {
        Wamp::leave(self, reason).await
    }
}

/// User code attached to a session.
#[async_trait]
pub trait Component: Send {
    /// Called once the realm has been joined.
    async fn on_join(&mut self, session: &dyn Session, details: &SessionDetails)
        -> WampResult<()>;

    /// Called once the connection to the router is gone. The runner returns
    /// only after `shutdown` has been stopped.
    fn on_disconnect(&mut self, shutdown: &Shutdown);
}

/// Stops the runner's event loop.
#[derive(Debug, Clone)]
pub struct Shutdown {
    pub(crate) tx: async_channel::Sender<()>,
}

impl Shutdown {
    pub fn stop(&self) {
        let _ = self.tx.try_send(());
    }
}

/// Receiving side of [`Shutdown`].
#[derive(Debug)]
pub struct ShutdownSignal {
    pub(crate) rx: async_channel::Receiver<()>,
}

impl ShutdownSignal {
    pub async fn wait(&self) {
        let _ = self.rx.recv().await;
    }
}

pub fn shutdown_channel() -> (Shutdown, ShutdownSignal) {
    let (tx, rx) = async_channel::unbounded();
    (Shutdown { tx }, ShutdownSignal { rx })
}

pub struct ApplicationRunner {
    url: String,
    realm: String,
    credentials: Option<Credentials>,
}

impl ApplicationRunner {
    pub fn new(url: impl Into<String>, realm: impl Into<String>) -> Self {
        ApplicationRunner {
            url: url.into(),
            realm: realm.into(),
            credentials: None,
        }
    }

    pub fn from_config(config: &RouterConfig) -> Self {
        Self::new(config.url.clone(), config.realm.clone())
    }

    /// Authenticates with a WAMP ticket when the router asks for one.
    pub fn with_ticket(mut self, authid: impl Into<String>, ticket: impl Into<String>) -> Self {
        self.credentials = Some(Credentials {
            authid: authid.into(),
            ticket: ticket.into(),
        });
        self
    }

    /// Runs `component` until it stops the loop from `on_disconnect`.
    pub fn run<C: Component>(&self, component: C) -> WampResult<()> {
        smol::block_on(self.run_async(component))
    }

    pub async fn run_async<C: Component>(&self, mut component: C) -> WampResult<()> {
        let ex = Executor::new();
        ex.run(async {
            let (wamp, receiver) =
                Wamp::connect(&self.url, &self.realm, self.credentials.clone()).await?;
            let (shutdown, signal) = shutdown_channel();

            let reader = ex.spawn({
                let wamp = wamp.clone();
                async move { wamp.run(receiver).await }
            });

            let joined = component.on_join(&wamp, wamp.details()).await;
            if let Err(err) = &joined {
                error!(%err, "join hook failed");
                if let Err(err) = wamp.leave(CLOSE_NORMAL).await {
                    debug!(%err, "leaving after failed join");
                }
            }

            let outcome = reader.await;
            if let Err(err) = &outcome {
                warn!(url = wamp.url(), %err, "connection lost");
            }

            component.on_disconnect(&shutdown);
            signal.wait().await;
            info!("event loop stopped");

            joined.and(outcome)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_releases_the_waiter() {
        let (shutdown, signal) = shutdown_channel();
        shutdown.stop();
        smol::block_on(signal.wait());
        assert!(signal.rx.try_recv().is_err());
    }

    #[test]
    fn stop_from_a_clone_counts_once() {
        let (shutdown, signal) = shutdown_channel();
        let cloned = shutdown.clone();
        cloned.stop();
        assert_eq!(signal.rx.len(), 1);
    }

    #[test]
    fn runner_takes_url_and_realm_from_config() {
        let config = RouterConfig::from_router_var(Some("rs://10.0.0.5:8081".into()));
        let runner = ApplicationRunner::from_config(&config).with_ticket("joe", "secret");
        assert_eq!(runner.url, "rs://10.0.0.5:8081");
        assert_eq!(runner.realm, "realm1");
        assert_eq!(runner.credentials.as_ref().map(|c| c.authid.as_str()), Some("joe"));
    }

    #[test]
    fn unsupported_scheme_fails_before_joining() {
        let runner = ApplicationRunner::new("wss://127.0.0.1:1/ws", "realm1");
        assert!(runner.run(NeverJoins).is_err());
    }

    struct NeverJoins;

    #[async_trait]
    impl Component for NeverJoins {
        async fn on_join(&mut self, _: &dyn Session, _: &SessionDetails) -> WampResult<()> {
            panic!("must not join");
        }

        fn on_disconnect(&mut self, _: &Shutdown) {
            panic!("must not disconnect");
        }
    }
}
