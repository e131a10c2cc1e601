use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use config::{Config, File};
use once_cell::sync::OnceCell;
use serde::de::{self, Deserializer};
use serde::Deserialize;

use self::logging::Log;
pub use self::options::Options;

pub mod logging;
pub mod options;

static SETTINGS: OnceCell<Settings> = OnceCell::new();

#[derive(Clone)]
pub struct Settings(Arc<Inner>);

#[derive(Debug, Clone, Deserialize)]
pub struct Inner {
    #[serde(default)]
    pub mqtt: Mqtt,
    #[serde(default)]
    pub log: Log,
    #[serde(default, skip)]
    pub opts: Options,
}

impl Deref for Settings {
    type Target = Inner;
    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl Settings {
    fn new(opts: Options) -> anyhow::Result<Self> {
        let mut builder = Config::builder()
            .add_source(File::with_name("/etc/mqtt-delay/mqtt-delay").required(false))
            .add_source(File::with_name("mqtt-delay").required(false))
            .add_source(config::Environment::with_prefix("mqtt_delay").try_parsing(true));

        if let Some(cfg) = opts.cfg_name.as_ref() {
            builder = builder.add_source(File::with_name(cfg).required(false));
        }

        let mut inner: Inner = builder.build()?.try_deserialize()?;

        //Command line configuration overriding file configuration
        if let Some(server) = opts.server.as_ref() {
            inner.mqtt.server = server.parse()?;
        }
        if let Some(base) = opts.base.as_ref() {
            inner.mqtt.base.clone_from(base);
        }
        if let Some(client_id) = opts.client_id.as_ref() {
            inner.mqtt.client_id = Some(client_id.clone());
        }

        inner.opts = opts;
        Ok(Self(Arc::new(inner)))
    }

    #[inline]
    pub fn instance() -> &'static Self {
        match SETTINGS.get() {
            Some(c) => c,
            None => {
                unreachable!("Settings not initialized");
            }
        }
    }

    #[inline]
    pub fn init(opts: Options) -> anyhow::Result<&'static Self> {
        SETTINGS.set(Settings::new(opts)?).map_err(|_| anyhow!("Settings init failed"))?;
        SETTINGS.get().ok_or_else(|| anyhow!("Settings init failed"))
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Settings ...")?;
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Mqtt {
    #[serde(default = "Mqtt::server_default", deserialize_with = "Mqtt::deserialize_server")]
    pub server: ServerAddr,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    //Control-root token, first level of every control topic
    #[serde(default = "Mqtt::base_default")]
    pub base: String,
    #[serde(default = "Mqtt::keepalive_default", deserialize_with = "deserialize_duration")]
    pub keepalive: Duration,
    #[serde(default = "Mqtt::reconnect_interval_default", deserialize_with = "deserialize_duration")]
    pub reconnect_interval: Duration,
}

impl Default for Mqtt {
    #[inline]
    fn default() -> Self {
        Self {
            server: Self::server_default(),
            client_id: None,
            username: None,
            password: None,
            base: Self::base_default(),
            keepalive: Self::keepalive_default(),
            reconnect_interval: Self::reconnect_interval_default(),
        }
    }
}

impl Mqtt {
    fn server_default() -> ServerAddr {
        ServerAddr { host: "127.0.0.1".into(), port: 1883 }
    }

    fn base_default() -> String {
        "delayed".into()
    }

    fn keepalive_default() -> Duration {
        Duration::from_secs(60)
    }

    fn reconnect_interval_default() -> Duration {
        Duration::from_secs(5)
    }

    #[inline]
    pub fn deserialize_server<'de, D>(deserializer: D) -> Result<ServerAddr, D::Error>
    where
        D: Deserializer<'de>,
    {
        let addr = String::deserialize(deserializer)?;
        addr.parse().map_err(de::Error::custom)
    }
}

#[derive(Debug, Clone)]
pub struct ServerAddr {
    pub host: String,
    pub port: u16,
}

impl std::str::FromStr for ServerAddr {
    type Err = anyhow::Error;

    fn from_str(addr: &str) -> Result<Self, Self::Err> {
        let rest = match addr.split_once("://") {
            Some(("tcp", rest)) | Some(("mqtt", rest)) => rest,
            Some((scheme, _)) => return Err(anyhow!("unsupported scheme {:?} in {:?}", scheme, addr)),
            None => addr,
        };
        let (host, port) = match rest.rsplit_once(':') {
            Some((host, port)) => {
                (host, port.parse::<u16>().map_err(|e| anyhow!("invalid port in {:?}, {}", addr, e))?)
            }
            None => (rest, 1883),
        };
        if host.is_empty() {
            return Err(anyhow!("empty host in {:?}", addr));
        }
        Ok(ServerAddr { host: host.into(), port })
    }
}

impl fmt::Display for ServerAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "tcp://{}:{}", self.host, self.port)
    }
}

///Convert a human-readable duration string to a Duration. Supported units:
///`ms`, `s`, `m`, `h`, `d`, `w`; a bare number means seconds.
#[inline]
pub fn to_duration(text: &str) -> Duration {
    if !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit()) {
        return Duration::from_secs(text.parse().unwrap_or_default());
    }
    let text = text.to_lowercase().replace("ms", "Y");
    let ms: u64 = text
        .split_inclusive(['s', 'm', 'h', 'd', 'w', 'Y'])
        .map(|x| {
            let mut chars = x.chars();
            let u = match chars.nth_back(0) {
                None => return 0,
                Some(u) => u,
            };
            let v = match chars.as_str().parse::<u64>() {
                Err(_e) => return 0,
                Ok(v) => v,
            };
            match u {
                'Y' => v,
                's' => v * 1000,
                'm' => v * 60_000,
                'h' => v * 3_600_000,
                'd' => v * 86_400_000,
                'w' => v * 604_800_000,
                _ => 0,
            }
        })
        .sum();
    Duration::from_millis(ms)
}

///Deserialize Duration from human-readable string format
#[inline]
pub fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let v = String::deserialize(deserializer)?;
    Ok(to_duration(&v))
}
