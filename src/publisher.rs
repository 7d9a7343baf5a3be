//! Demo counterpart to the subscriber: publishes a counter to the same
//! topic, then leaves the realm.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::info;

use crate::client::message::CLOSE_NORMAL;
use crate::client::{SessionDetails, WampResult};
use crate::runner::{Component, Session, Shutdown};
use crate::subscriber::TOPIC;

pub struct PublishComponent {
    count: u64,
    interval: Duration,
}

impl PublishComponent {
    pub fn new(count: u64) -> Self {
        PublishComponent {
            count,
            interval: Duration::from_secs(1),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

#[async_trait]
impl Component for PublishComponent {
    async fn on_join(&mut self, session: &dyn Session, _: &SessionDetails) -> WampResult<()> {
        for counter in 0..self.count {
            if counter > 0 {
                smol::Timer::after(self.interval).await;
            }

            let mut kwargs = Map::new();
            kwargs.insert("from".to_string(), Value::from("wamp-publish"));
            let publication = session
                .publish(TOPIC, vec![json!(counter)], kwargs, true)
                .await?;
            info!(topic = TOPIC, counter, ?publication, "published");
        }

        session.leave(CLOSE_NORMAL).await
    }

    fn on_disconnect(&mut self, shutdown: &Shutdown) {
        shutdown.stop();
    }
}
