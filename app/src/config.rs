use once_cell::sync::Lazy;
use std::env;
use std::str::FromStr;
use std::time::Duration;

pub struct Config {
    database_url: Option<String>,
    database_max_connections: u32,
    coap_bind_addr: String,
    coap_max_body_size: usize,
    coap_block_timeout_secs: u64,
    coap_exchange_lifetime_secs: u64,
    trace_stdout: bool,
}

impl Config {
    pub fn database_url(&self) -> Option<String> {
        self.database_url.clone()
    }

    pub fn database_max_connections(&self) -> u32 {
        self.database_max_connections
    }

    pub fn coap_bind_addr(&self) -> String {
        self.coap_bind_addr.clone()
    }

    pub fn coap_max_body_size(&self) -> usize {
        self.coap_max_body_size
    }

    pub fn coap_block_timeout(&self) -> Duration {
        Duration::from_secs(self.coap_block_timeout_secs)
    }

    pub fn coap_exchange_lifetime(&self) -> Duration {
        Duration::from_secs(self.coap_exchange_lifetime_secs)
    }

    pub fn trace_stdout(&self) -> bool {
        self.trace_stdout
    }
}

fn var_or<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .unwrap_or_else(|_| panic!("{} has an invalid value: {}", key, value)),
        Err(_) => default,
    }
}

pub static CONFIG: Lazy<Config> = Lazy::new(|| {
    dotenv::dotenv().ok();

    let database_url = env::var("DATABASE_URL").ok().filter(|url| !url.is_empty());
    let coap_bind_addr = env::var("COAP_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:5683".to_owned());

    Config {
        database_url,
        database_max_connections: var_or("DATABASE_MAX_CONNECTIONS", 10),
        coap_bind_addr,
        coap_max_body_size: var_or("COAP_MAX_BODY_SIZE", 16_384),
        coap_block_timeout_secs: var_or("COAP_BLOCK_TIMEOUT_SECS", 60),
        coap_exchange_lifetime_secs: var_or("COAP_EXCHANGE_LIFETIME_SECS", 247),
        trace_stdout: var_or("TRACE_STDOUT", false),
    }
});
