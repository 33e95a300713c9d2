//! Command-line configuration (spec §6, "External interfaces").

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(name = "redis-mini-server", about = "A single-threaded, event-driven, Redis-compatible key-value server")]
pub struct Config {
    /// Directory the snapshot file is read from and written to.
    #[arg(long, default_value = "/tmp/redis-data")]
    pub dir: PathBuf,

    /// Snapshot file name within `--dir`.
    #[arg(long, default_value = "dump.rdb")]
    pub dbfilename: String,

    /// TCP port to listen on.
    #[arg(long, default_value_t = 6379)]
    pub port: u16,

    /// Start as a replica of `<HOST> <PORT>` instead of a master.
    #[arg(long, num_args = 2, value_names = ["HOST", "PORT"])]
    pub replicaof: Option<Vec<String>>,

    /// Raise the tracing log level to `debug`.
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

impl Config {
    /// The parsed `(host, port)` from `--replicaof`, if given. A
    /// non-numeric port is a startup-time configuration error.
    pub fn master_addr(&self) -> Option<Result<(String, u16), std::num::ParseIntError>> {
        self.replicaof.as_ref().map(|parts| {
            let port = parts[1].parse::<u16>()?;
            Ok((parts[0].clone(), port))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let cfg = Config::parse_from(["redis-mini-server"]);
        assert_eq!(cfg.dir, PathBuf::from("/tmp/redis-data"));
        assert_eq!(cfg.dbfilename, "dump.rdb");
        assert_eq!(cfg.port, 6379);
        assert!(cfg.replicaof.is_none());
        assert!(!cfg.verbose);
    }

    #[test]
    fn replicaof_parses_host_and_port() {
        let cfg = Config::parse_from(["redis-mini-server", "--replicaof", "127.0.0.1", "6380"]);
        let (host, port) = cfg.master_addr().unwrap().unwrap();
        assert_eq!(host, "127.0.0.1");
        assert_eq!(port, 6380);
    }
}
