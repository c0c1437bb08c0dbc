//! Command-line configuration for the monitor process.

use clap::Parser;
use std::net::SocketAddr;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the YAML node configuration file.
    #[arg(long, env = "NODEWATCH_CONF", default_value = "./config.yaml")]
    pub conf: String,

    /// Address the metrics and health endpoints bind to.
    #[arg(long, env = "NODEWATCH_METRICS_ADDR", default_value = "0.0.0.0:3002")]
    pub metrics_addr: SocketAddr,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_flags() {
        let args = Args::parse_from(["nodewatch"]);
        assert_eq!(args.conf, "./config.yaml");
        assert_eq!(args.metrics_addr, "0.0.0.0:3002".parse().unwrap());
    }

    #[test]
    fn flags_override_defaults() {
        let args = Args::parse_from([
            "nodewatch",
            "--conf",
            "/etc/nodewatch/nodes.yaml",
            "--metrics-addr",
            "127.0.0.1:9100",
        ]);
        assert_eq!(args.conf, "/etc/nodewatch/nodes.yaml");
        assert_eq!(args.metrics_addr, "127.0.0.1:9100".parse().unwrap());
    }
}
