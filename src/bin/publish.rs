use std::process;

use tracing::error;

use wamp_subscribe::config::{self, RouterConfig};
use wamp_subscribe::logging;
use wamp_subscribe::publisher::PublishComponent;
use wamp_subscribe::runner::ApplicationRunner;

fn main() {
    logging::init();

    let config = RouterConfig::from_env();
    let runner = ApplicationRunner::from_config(&config);
    let component = PublishComponent::new(config::publish_count_from_env());

    if let Err(err) = runner.run(component) {
        error!(url = %config.url, %err, "publisher stopped");
        process::exit(1);
    }
}
