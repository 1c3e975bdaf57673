pub mod server;

use secrecy::SecretString;

#[derive(Debug)]
pub enum Action {
    Server {
        port: u16,
        dsn: String,
        access_secret: SecretString,
        refresh_secret: SecretString,
        base_url: String,
        cookie_domain: Option<String>,
    },
}
