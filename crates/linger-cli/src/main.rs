//! Command line client for Linger message queue servers.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use clap::{Args as ClapArgs, Parser, Subcommand};
use linger_client::{
    BlockingLingerClient, ClientBuilder, DEFAULT_URL, Message, MessageId, RequestOptions,
};
use linger_transport_memory::MemoryServer;
use serde_json::{Value, json};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// CLI-specific error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Client library error
    #[error(transparent)]
    Client(#[from] linger_client::Error),

    /// Output serialization error
    #[error("output error: {0}")]
    Output(#[from] serde_json::Error),

    /// Invalid command line usage
    #[error("usage error: {0}")]
    Usage(String),
}

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Base URL of the Linger server
    #[arg(long, default_value = DEFAULT_URL, env = "LINGER_URL")]
    url: String,

    /// Basic auth username
    #[arg(long, env = "LINGER_USERNAME")]
    username: Option<String>,

    /// Basic auth password
    #[arg(long, env = "LINGER_PASSWORD", requires = "username")]
    password: Option<String>,

    /// Ask the server for uncompressed responses
    #[arg(long, env = "LINGER_NO_GZIP")]
    no_gzip: bool,

    /// Run against an in-process server instead of the network
    #[arg(long)]
    memory: bool,

    #[command(subcommand)]
    command: Command,
}

/// Message attributes applied to posts, publishes and subscriptions.
#[derive(Clone, Debug, Default, ClapArgs)]
struct MessageArgs {
    /// Delivery priority, lower values first
    #[arg(long, allow_negative_numbers = true)]
    priority: Option<i64>,

    /// Seconds a fetched message stays hidden before redelivery
    #[arg(long)]
    timeout: Option<u64>,

    /// Maximum number of deliveries
    #[arg(long)]
    deliver: Option<u64>,

    /// Seconds an undelivered message is kept
    #[arg(long)]
    linger: Option<u64>,
}

impl MessageArgs {
    fn options(&self) -> RequestOptions {
        RequestOptions {
            priority: self.priority,
            timeout: self.timeout,
            deliver: self.deliver,
            linger: self.linger,
            ..RequestOptions::default()
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List channels holding messages
    Channels,

    /// List topics with subscribers
    Topics,

    /// Show server statistics
    Stats,

    /// Post a message to a channel
    Post {
        channel: String,
        /// JSON body; anything unparsable is sent as a JSON string
        body: String,
        #[command(flatten)]
        message: MessageArgs,
    },

    /// Publish a message to every channel subscribed to a topic
    Publish {
        topic: String,
        /// JSON body; anything unparsable is sent as a JSON string
        body: String,
        #[command(flatten)]
        message: MessageArgs,
    },

    /// Fetch one message from a channel
    Fetch {
        channel: String,
        /// Return immediately when the channel is empty
        #[arg(long)]
        nowait: bool,
        /// Delete the message once printed
        #[arg(long)]
        ack: bool,
    },

    /// Print messages from a channel as they arrive
    Stream {
        channel: String,
        /// Stop after this many messages
        #[arg(long)]
        count: Option<usize>,
        /// Consecutive failures tolerated before giving up; 0 retries forever
        #[arg(long, default_value_t = 0)]
        max_retries: u32,
        /// Delete each message once printed
        #[arg(long)]
        ack: bool,
    },

    /// Delete a delivered message
    Delete { id: String },

    /// Remove every message from a channel
    Drain { channel: String },

    /// Show ready and hidden counts of a channel
    ChannelStats { channel: String },

    /// List topics a channel is subscribed to
    Subscriptions { channel: String },

    /// List channels subscribed to a topic
    Subscribers { topic: String },

    /// Subscribe a channel to a topic
    Subscribe {
        channel: String,
        topic: String,
        #[command(flatten)]
        message: MessageArgs,
    },

    /// Unsubscribe a channel from a topic
    Unsubscribe { channel: String, topic: String },

    /// Walk through post, publish and stream against an in-process server
    Demo,
}

fn connect(args: &Args, memory: Option<&MemoryServer>) -> Result<BlockingLingerClient, Error> {
    let mut defaults = RequestOptions::new();
    if let Some(username) = &args.username {
        defaults = defaults.basic_auth(username.clone(), args.password.clone());
    }
    if args.no_gzip {
        defaults = defaults.use_gzip(false);
    }

    let mut builder = ClientBuilder::new()
        .url(args.url.clone())
        .default_options(defaults);
    if let Some(server) = memory {
        builder = builder.transport(server.transport());
    }

    Ok(builder.build_blocking()?)
}

fn parse_body(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn print_json(value: &Value) -> Result<(), Error> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

fn print_message(message: &Message<Value>) -> Result<(), Error> {
    print_json(&json!({
        "id": message.id,
        "channel": message.channel,
        "topic": message.topic,
        "priority": message.priority,
        "delivered": message.delivered,
        "body": message.body,
    }))
}

fn stream(
    client: &BlockingLingerClient,
    channel: &str,
    count: Option<usize>,
    max_retries: u32,
    ack: bool,
) -> Result<(), Error> {
    let mut stream = client.stream(channel, max_retries)?;
    let mut printed = 0;

    while count.is_none_or(|count| printed < count) {
        let Some(message) = stream.next() else {
            break;
        };
        print_message(&message)?;
        if ack {
            client.delete(&message.id)?;
        }
        printed += 1;
    }

    if let Some(reason) = stream.end_reason() {
        warn!(channel, %reason, "stream ended");
    }

    Ok(())
}

fn demo(client: &BlockingLingerClient) -> Result<(), Error> {
    client.subscribe("audit", "events")?;
    client.subscribe_with("mail", "events", &RequestOptions::new().priority(-1))?;

    for n in 1..=3 {
        client.post("jobs", &json!({ "job": n }))?;
    }
    let receipt = client.publish("events", &json!({ "event": "login" }))?;
    info!(copies = receipt.ids.len(), "published to topic");

    for channel in client.channels()? {
        let stats = client.channel_stats(&channel)?;
        info!(%channel, ready = stats.ready, hidden = stats.hidden, "channel");
    }

    stream(client, "jobs", Some(3), 1, true)?;
    if let Some(message) = client.fetch("mail", true)? {
        print_message(&message)?;
        client.delete(&message.id)?;
    }

    print_json(&client.stats()?)
}

fn run(args: &Args) -> Result<(), Error> {
    if matches!(args.command, Command::Demo) && !args.memory {
        return Err(Error::Usage("demo runs only with --memory".to_string()));
    }

    let server = args.memory.then(MemoryServer::new);
    let client = connect(args, server.as_ref())?;

    match &args.command {
        Command::Channels => print_json(&json!(client.channels()?))?,
        Command::Topics => print_json(&json!(client.topics()?))?,
        Command::Stats => print_json(&client.stats()?)?,
        Command::Post {
            channel,
            body,
            message,
        } => {
            let receipt = client.post_with(channel, &parse_body(body), &message.options())?;
            print_json(&json!({ "id": receipt.id }))?;
        }
        Command::Publish {
            topic,
            body,
            message,
        } => {
            let receipt = client.publish_with(topic, &parse_body(body), &message.options())?;
            print_json(&json!({ "ids": receipt.ids }))?;
        }
        Command::Fetch {
            channel,
            nowait,
            ack,
        } => match client.fetch(channel, *nowait)? {
            Some(message) => {
                print_message(&message)?;
                if *ack {
                    client.delete(&message.id)?;
                }
            }
            None => info!(%channel, "no message"),
        },
        Command::Stream {
            channel,
            count,
            max_retries,
            ack,
        } => stream(&client, channel, *count, *max_retries, *ack)?,
        Command::Delete { id } => client.delete(&MessageId::from(id.as_str()))?,
        Command::Drain { channel } => client.drain(channel)?,
        Command::ChannelStats { channel } => {
            let stats = client.channel_stats(channel)?;
            print_json(&json!({ "ready": stats.ready, "hidden": stats.hidden }))?;
        }
        Command::Subscriptions { channel } => print_json(&json!(client.subscriptions(channel)?))?,
        Command::Subscribers { topic } => print_json(&json!(client.subscribers(topic)?))?,
        Command::Subscribe {
            channel,
            topic,
            message,
        } => client.subscribe_with(channel, topic, &message.options())?,
        Command::Unsubscribe { channel, topic } => client.unsubscribe(channel, topic)?,
        Command::Demo => demo(&client)?,
    }

    client.close();
    Ok(())
}

fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    run(&args)
}
