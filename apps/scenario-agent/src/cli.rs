use clap::Parser;

use crate::config::Config;

#[derive(Parser, Debug)]
#[command(name = "scenario-agent")]
#[command(about = "Workstation agent that runs containerized simulation scenarios")]
pub struct Cli {
    /// Port for the local control API and UI
    #[arg(long)]
    pub port: Option<u16>,

    /// Compose binary used to launch scenarios (default: docker-compose)
    #[arg(long)]
    pub compose_bin: Option<String>,

    /// Display-proxy binary (default: websockify)
    #[arg(long)]
    pub proxy_bin: Option<String>,

    /// Local port the display proxy listens on
    #[arg(long)]
    pub proxy_listen_port: Option<u16>,
}

impl Cli {
    /// Apply command-line overrides on top of the environment configuration.
    pub fn apply(&self, config: &mut Config) {
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(compose_bin) = &self.compose_bin {
            config.compose_bin = compose_bin.clone();
        }
        if let Some(proxy_bin) = &self.proxy_bin {
            config.proxy_bin = proxy_bin.clone();
        }
        if let Some(listen_port) = self.proxy_listen_port {
            config.proxy_listen_port = listen_port;
        }
    }
}
