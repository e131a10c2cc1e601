#![deny(unsafe_code)]

use structopt::StructOpt;

use mqtt_delay::delay::DelayScheduler;
use mqtt_delay::dispatch::Dispatcher;
use mqtt_delay::logger::logger_init;
use mqtt_delay::session::MqttSession;
use mqtt_delay::settings::{Options, Settings};
use mqtt_delay::transport::MqttTransport;

#[tokio::main]
async fn main() {
    //init config
    let settings = Settings::init(Options::from_args()).expect("settings init failed");

    //init log
    let _guard = logger_init(&settings.log).expect("logger init failed");

    //wire transport -> session -> scheduler -> dispatcher
    let (transport, events) = MqttTransport::bootstrap(&settings.mqtt);
    let session = MqttSession::new(transport);
    let scheduler = DelayScheduler::new(session.clone());
    let dispatcher = Dispatcher::new(settings.mqtt.base.clone(), scheduler);
    dispatcher.register(&session).await.expect("register control subscriptions failed");

    let relay = tokio::spawn(session.run(events));

    tokio::signal::ctrl_c().await.expect("signal ctrl c");
    log::info!("shutting down");
    relay.abort();
}
