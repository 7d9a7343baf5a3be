use std::process;

use tracing::error;

use wamp_subscribe::config::RouterConfig;
use wamp_subscribe::logging;
use wamp_subscribe::runner::ApplicationRunner;
use wamp_subscribe::subscriber::SubscribeComponent;

fn main() {
    logging::init();

    let config = RouterConfig::from_env();
    let runner = ApplicationRunner::from_config(&config);

    if let Err(err) = runner.run(SubscribeComponent::new()) {
        error!(url = %config.url, %err, "subscriber stopped");
        process::exit(1);
    }
}
