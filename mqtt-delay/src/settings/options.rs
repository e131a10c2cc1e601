use structopt::StructOpt;

#[derive(StructOpt, Debug, Clone, Default)]
pub struct Options {
    /// Config filename
    #[structopt(name = "config", short = "f", long)]
    pub cfg_name: Option<String>,

    /// Broker address, e.g. "tcp://127.0.0.1:1883"
    #[structopt(name = "server", long)]
    pub server: Option<String>,

    /// Control-root token of the delay topics
    #[structopt(name = "base", long)]
    pub base: Option<String>,

    /// Client identifier presented to the broker
    #[structopt(name = "client-id", long)]
    pub client_id: Option<String>,
}
