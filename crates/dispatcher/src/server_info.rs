use std::path::PathBuf;

/// Whether this process is the top of the replication chain or is
/// pulling writes from one (spec §3, "Entity: Server info").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Master,
    Replica,
}

/// Process-wide context threaded by reference through the dispatcher and
/// event loop, rather than reached via globals (§9 design note: "avoid
/// ambient access").
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub role: Role,
    pub master_replid: String,
    pub master_repl_offset: u64,
    pub dir: PathBuf,
    pub dbfilename: String,
    pub port: u16,
    pub master_host: Option<String>,
    pub master_port: Option<u16>,
    /// Number of connections currently in the attached-replica role.
    /// Maintained by the event loop; read here only for `INFO`.
    pub connected_replicas: usize,
}

impl ServerInfo {
    pub fn new_master(dir: PathBuf, dbfilename: String, port: u16) -> Self {
        Self {
            role: Role::Master,
            master_replid: generate_replid(),
            master_repl_offset: 0,
            dir,
            dbfilename,
            port,
            master_host: None,
            master_port: None,
            connected_replicas: 0,
        }
    }

    pub fn new_replica(
        dir: PathBuf,
        dbfilename: String,
        port: u16,
        master_host: String,
        master_port: u16,
    ) -> Self {
        Self {
            role: Role::Replica,
            master_replid: generate_replid(),
            master_repl_offset: 0,
            dir,
            dbfilename,
            port,
            master_host: Some(master_host),
            master_port: Some(master_port),
            connected_replicas: 0,
        }
    }

    /// Renders the `INFO` command's `# Replication` section (spec
    /// §REDESIGN FLAGS: "always emits a well-formed section, offset
    /// starts at zero").
    pub fn replication_info(&self) -> String {
        let mut out = String::from("# Replication\r\n");
        match self.role {
            Role::Master => {
                out.push_str("role:master\r\n");
                out.push_str(&format!("connected_slaves:{}\r\n", self.connected_replicas));
            }
            Role::Replica => {
                out.push_str("role:slave\r\n");
                out.push_str(&format!(
                    "master_host:{}\r\n",
                    self.master_host.as_deref().unwrap_or("")
                ));
                out.push_str(&format!(
                    "master_port:{}\r\n",
                    self.master_port.unwrap_or(0)
                ));
            }
        }
        out.push_str(&format!("master_replid:{}\r\n", self.master_replid));
        out.push_str(&format!("master_repl_offset:{}\r\n", self.master_repl_offset));
        out
    }
}

/// Produces a 40-character hex replication ID. Not cryptographically
/// meaningful — only required to look like the real thing and be stable
/// for the lifetime of the process.
fn generate_replid() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let seed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let mut out = String::with_capacity(40);
    let mut state = seed as u64 ^ 0x9E3779B97F4A7C15;
    for _ in 0..40 {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        out.push(std::char::from_digit((state % 16) as u32, 16).expect("0..16 is a valid hex digit"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replid_is_forty_hex_characters() {
        let id = generate_replid();
        assert_eq!(id.len(), 40);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn replication_info_reports_zero_offset_at_startup() {
        let info = ServerInfo::new_master(PathBuf::from("/tmp"), "dump.rdb".into(), 6379);
        let text = info.replication_info();
        assert!(text.contains("role:master"));
        assert!(text.contains("master_repl_offset:0"));
    }
}
