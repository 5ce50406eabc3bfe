mod citations;
mod config;
mod engine;
mod localize;
mod openai;

pub const USER_AGENT: &str = concat!("catena/", env!("CARGO_PKG_VERSION"));

use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::info;

use crate::config::EngineConfig;
use crate::engine::stores::StoreRef;
use crate::engine::{AnswerEvent, Engine, EngineError, Lang, Query};
use crate::openai::OpenAiClient;

// Only the connect phase gets a client-wide timeout. Polled requests carry
// their own per-request deadline; the streaming response must stay open for
// as long as the run keeps generating.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "catena", version, about = "Ask a curated document library and get cited answers")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ask a question and print the answer with its numbered sources.
    Ask {
        /// The question to ask.
        question: String,
        /// Search the named library instead of the default one.
        #[arg(long)]
        topic: Option<String>,
        /// Answer language.
        #[arg(long, value_enum, default_value_t = Lang::Ko)]
        lang: Lang,
        /// Print the answer incrementally as it is generated.
        #[arg(long)]
        stream: bool,
        /// Bypass the answer cache for this question.
        #[arg(long)]
        no_cache: bool,
    },
    /// List the available libraries, or resolve a single topic name.
    Topics {
        /// Topic name to resolve instead of listing everything.
        name: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("catena=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    let http = reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .build()?;
    let api = match OpenAiClient::from_env(http) {
        Ok(api) => api,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    };

    match cli.command {
        Command::Ask {
            question,
            topic,
            lang,
            stream,
            no_cache,
        } => {
            let mut config = EngineConfig::from_env();
            if no_cache {
                config.answer_cache_ttl = Duration::ZERO;
            }
            let engine = Engine::new(api, config);
            let mut query = Query::new(question);
            query.topic = topic;
            query.lang = lang;
            info!(lang = %query.lang, stream, "asking the library");
            if stream {
                ask_streaming(&engine, &query).await;
            } else {
                ask(&engine, &query).await;
            }
        }
        Command::Topics { name } => {
            let engine = Engine::new(api, EngineConfig::from_env());
            topics(&engine, name.as_deref()).await;
        }
    }
    Ok(())
}

async fn ask(engine: &Engine<OpenAiClient>, query: &Query) {
    match engine.handle(query).await {
        Ok(answer) => {
            println!("{}", answer.text);
            if !answer.sources.is_empty() {
                println!("\n{}", answer.render_sources());
            }
        }
        Err(err) => fail(&err),
    }
}

async fn ask_streaming(engine: &Engine<OpenAiClient>, query: &Query) {
    use std::io::Write as _;

    let (tx, mut rx) = mpsc::channel(64);
    // Dropping the sender when the engine returns is what ends the printer
    // loop below.
    let relay = async move {
        let result = engine.handle_streaming(query, &tx).await;
        drop(tx);
        result
    };
    let print = async {
        let mut streamed = false;
        let mut reported = false;
        while let Some(event) = rx.recv().await {
            match event {
                AnswerEvent::Delta { text } => {
                    streamed = true;
                    print!("{text}");
                    let _ = std::io::stdout().flush();
                }
                AnswerEvent::Sources { .. } => {}
                AnswerEvent::Final { answer } => {
                    // Deltas already painted the answer; the reconciled text
                    // only matters when none arrived (cache hits, joins).
                    if streamed {
                        println!();
                    } else {
                        println!("{}", answer.text);
                    }
                    if !answer.sources.is_empty() {
                        println!("\n{}", answer.render_sources());
                    }
                }
                AnswerEvent::Error { message } => {
                    if streamed {
                        println!();
                    }
                    eprintln!("{message}");
                    reported = true;
                }
                AnswerEvent::Done => {}
            }
        }
        reported
    };

    let (result, reported) = tokio::join!(relay, print);
    if let Err(err) = result {
        tracing::error!(error = %err, "streamed search failed");
        if !reported {
            eprintln!("{}", err.user_message());
        }
        std::process::exit(1);
    }
}

async fn topics(engine: &Engine<OpenAiClient>, name: Option<&str>) {
    match name {
        Some(topic) => match engine.resolve_topic(topic).await {
            Ok(store) => println!("{}", store_line(&store)),
            Err(err) => fail(&err),
        },
        None => match engine.topics().await {
            Ok(stores) if stores.is_empty() => println!("No libraries are available."),
            Ok(stores) => {
                for store in &stores {
                    println!("{}", store_line(store));
                }
            }
            Err(err) => fail(&err),
        },
    }
}

fn store_line(store: &StoreRef) -> String {
    if store.name.is_empty() {
        format!("{}  ({} files)", store.id, store.file_count)
    } else {
        format!("{}  {} ({} files)", store.id, store.name, store.file_count)
    }
}

fn fail(err: &EngineError) -> ! {
    tracing::error!(error = %err, "search failed");
    eprintln!("{}", err.user_message());
    std::process::exit(1);
}
