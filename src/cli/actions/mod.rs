pub mod server;

/// Actions the CLI can dispatch to.
#[derive(Debug)]
pub enum Action {
    Server {
        port: u16,
        dsn: String,
        trusted_id_servers: Vec<String>,
    },
}
