use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tycoon_core::{Config, EncodingMode, Expiry};
use tycoon_rs::{Client, Record};

mod telemetry;

/// Command line client for Kyoto Tycoon style key/value servers
#[derive(Debug, Parser)]
#[command(name = "tycoon", version)]
struct Cli {
    /// Configuration file
    #[arg(short, long, env = "TYCOON_CONFIG", default_value = "tycoon.json")]
    config: String,

    /// Connection URI, overriding the configuration
    #[arg(short, long, env = "TYCOON_URI")]
    uri: Option<String>,

    /// Request encoding: form_url, tab, tab_url, tab_base64 or tab_quoted
    #[arg(short, long)]
    encoding: Option<EncodingMode>,

    #[command(subcommand)]
    action: Action,
}

#[derive(Debug, Subcommand)]
enum Action {
    /// Print the value of a record
    Get { key: String },

    /// Set the value of a record
    Set {
        key: String,
        value: String,
        /// Expire after this many seconds
        #[arg(long)]
        xt: Option<u64>,
    },

    /// Add a record that must not exist yet
    Add {
        key: String,
        value: String,
        #[arg(long)]
        xt: Option<u64>,
    },

    /// Replace a record that must already exist
    Replace {
        key: String,
        value: String,
        #[arg(long)]
        xt: Option<u64>,
    },

    /// Append to the value of a record
    Append {
        key: String,
        value: String,
        #[arg(long)]
        xt: Option<u64>,
    },

    /// Remove a record
    Remove { key: String },

    /// Add to the integer value of a record and print the result
    Incr {
        key: String,
        #[arg(default_value_t = 1, allow_negative_numbers = true)]
        num: i64,
    },

    /// Compare-and-swap; omitting --old asserts absence, omitting --new removes
    Cas {
        key: String,
        #[arg(long)]
        old: Option<String>,
        #[arg(long)]
        new: Option<String>,
    },

    /// List keys by prefix or regular expression
    Keys {
        /// Key prefix; every key when neither --prefix nor --regex is given
        #[arg(long, conflicts_with = "regex")]
        prefix: Option<String>,
        #[arg(long)]
        regex: Option<String>,
        /// Upper bound on matched keys, 0 for no bound
        #[arg(long, default_value_t = 0)]
        max: u64,
        #[arg(long)]
        reverse: bool,
    },

    /// Walk records with a server-side cursor
    Scan {
        /// First key to visit
        #[arg(long)]
        start: Option<String>,
        #[arg(long)]
        reverse: bool,
        #[arg(long)]
        keys_only: bool,
    },

    /// Print the database status
    Status,

    /// Remove every record
    Clear,

    /// Read a record through the direct path, with its expiration
    Fetch { key: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (mut config, load_error) = match Config::load(&cli.config) {
        Ok(config) => (config, None),
        Err(e) => (Config::default(), Some(e)),
    };
    if let Some(uri) = cli.uri {
        config.uri = uri;
    }
    if let Some(encoding) = cli.encoding {
        config.encoding = encoding;
    }

    let _guard = telemetry::init_telemetry(&config.log)?;
    if let Some(e) = load_error {
        tracing::warn!("Failed to load {}, using defaults: {}", cli.config, e);
    }
    tracing::debug!(uri = %config.uri, encoding = %config.encoding, "tycoon starting");

    let client = Client::from_config(&config).context("failed to create client")?;
    run(&client, cli.action).await
}

async fn run(client: &Client, action: Action) -> Result<()> {
    match action {
        Action::Get { key } => {
            let record = client.get(&key).await?;
            println!("{}", record.value);
        }
        Action::Set { key, value, xt } => client.set(&key, &value, xt.map(Expiry::After)).await?,
        Action::Add { key, value, xt } => client.add(&key, &value, xt.map(Expiry::After)).await?,
        Action::Replace { key, value, xt } => {
            client.replace(&key, &value, xt.map(Expiry::After)).await?
        }
        Action::Append { key, value, xt } => {
            client.append(&key, &value, xt.map(Expiry::After)).await?
        }
        Action::Remove { key } => client.remove(&key).await?,
        Action::Incr { key, num } => {
            println!("{}", client.increment(&key, num, None).await?);
        }
        Action::Cas { key, old, new } => {
            client
                .cas(&key, old.as_deref(), new.as_deref(), None)
                .await?
        }
        Action::Keys {
            prefix,
            regex,
            max,
            reverse,
        } => {
            let scan = match regex {
                Some(regex) => client.scan().regex(regex),
                None => client.scan().prefix(prefix.unwrap_or_default()),
            };
            let scan = if reverse { scan.backward() } else { scan };
            let mut keys = scan.max(max).keys();
            while let Some(key) = keys.next().await? {
                println!("{}", key);
            }
        }
        Action::Scan {
            start,
            reverse,
            keys_only,
        } => {
            let mut scan = client.scan();
            if let Some(start) = start {
                scan = scan.start(start);
            }
            if reverse {
                scan = scan.backward();
            }
            if keys_only {
                let mut keys = scan.keys();
                while let Some(key) = keys.next().await? {
                    println!("{}", key);
                }
                keys.close().await?;
            } else {
                let mut records = scan.records();
                while let Some(Record { key, value, .. }) = records.next().await? {
                    println!("{}\t{}", key, value);
                }
                records.close().await?;
            }
        }
        Action::Status => {
            let status = client.status().await?;
            for (name, value) in status.fields().iter() {
                println!("{}\t{}", name, value);
            }
        }
        Action::Clear => client.clear().await?,
        Action::Fetch { key } => {
            let record = client.fetch(&key).await?;
            println!("{}", record.value);
            if let Some(expires) = record.expires {
                println!("expires\t{}", expires.to_rfc3339());
            }
        }
    }
    Ok(())
}
