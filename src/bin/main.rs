use mio::Poll;
use server_proxy::{config::AppConfig, error::Result, server::Server};

fn main() -> Result<()> {
    let config_path = std::env::args().nth(1).ok_or("usage: server_proxy <config_file>")?;
    let content = std::fs::read_to_string(&config_path)?;
    let config = AppConfig::from_str(&content)?;

    config.display_config();

    let poll = Poll::new()?;
    let mut server = Server::new(config, &poll)?;

    server.run(poll)
}
