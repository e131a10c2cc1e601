#![deny(unsafe_code)]

//! MQTT delayed message relay.
//!
//! Clients publish a control message on `<base>[/reset]/<period>/<target...>`;
//! the relay holds the payload for `<period>` seconds and then republishes it,
//! byte for byte, to `<target...>`. While a delay is pending for a target
//! topic, further non-resetting requests for it are ignored; a `reset`
//! request cancels the pending wait and starts over. Subscriptions survive
//! broker reconnects: the session replays its full registry on every
//! re-established link.
//!
//! ```rust,no_run
//! use mqtt_delay::delay::DelayScheduler;
//! use mqtt_delay::dispatch::Dispatcher;
//! use mqtt_delay::session::MqttSession;
//! use mqtt_delay::settings::Mqtt;
//! use mqtt_delay::transport::MqttTransport;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cfg = Mqtt::default();
//!     let (transport, events) = MqttTransport::bootstrap(&cfg);
//!     let session = MqttSession::new(transport);
//!     let scheduler = DelayScheduler::new(session.clone());
//!     let dispatcher = Dispatcher::new(cfg.base.clone(), scheduler);
//!     dispatcher.register(&session).await?;
//!     session.run(events).await;
//!     Ok(())
//! }
//! ```

pub mod delay; // Per-target-topic delay scheduling
pub mod dispatch; // Control-message dispatcher
pub mod error; // Error taxonomy
pub mod logger; // Logging bootstrap
pub mod session; // Broker session and subscription registry
pub mod settings; // Configuration loading
pub mod topic; // Control-topic grammar, filter matching
pub mod transport; // Opaque broker connection
pub mod types; // Common data types

pub use error::{DelayError, Result};
