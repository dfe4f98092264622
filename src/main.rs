//! Terminal shell for the contract assistant.
//!
//! A line-oriented chat loop: plain input is forwarded to the assistant and
//! the answer streams back token by token. `/live` toggles the bidirectional
//! voice session; while it is open, transcripts and notices from the session
//! render between prompts.

use std::io::Write as _;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use contract_assistant::audio::{codec, PlaybackScheduler, SpeakerSink};
use contract_assistant::chat::ChatClient;
use contract_assistant::live::{LiveSession, SessionUpdate};
use contract_assistant::messages::{Message, MessageLog, MessageRole};
use contract_assistant::prompt::{
    APP_SUBTITLE, APP_TITLE, CONTRACT_SHORTCUTS, LIVE_SYSTEM_PROMPT, STIPEND_SHORTCUTS,
    WELCOME_MESSAGE,
};
use contract_assistant::settings::{self, AppSettings};
use contract_assistant::BookmarkStore;

const HELP: &str = "\
Commands:
  /topics        list the shortcut questions
  /topic N       ask shortcut question N
  /live          start or stop the live voice session
  /speak N       read message N aloud
  /mark N        toggle a bookmark on message N
  /marks         list bookmarked messages
  /think         toggle the model's reasoning pass
  /help          show this help
  /quit          exit";

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // Logs go to stderr so they never interleave with streamed answers.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("contract_assistant=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let settings = settings::load_settings();
    let api_key = settings::api_key().unwrap_or_default();
    if api_key.is_empty() {
        eprintln!("warning: GEMINI_API_KEY is not set; requests will fail");
    }

    let chat = ChatClient::new(settings.clone(), api_key.clone());
    let mut log = MessageLog::new();
    let mut bookmarks = match BookmarkStore::load() {
        Ok(store) => Some(store),
        Err(e) => {
            warn!("Bookmarks unavailable: {}", e);
            None
        }
    };

    let mut thinking = true;
    let mut session: Option<LiveSession> = None;
    // Unbounded so the session can always deliver updates, even while this
    // loop is held up inside another command.
    let (update_tx, mut update_rx) = mpsc::unbounded_channel::<SessionUpdate>();

    println!("{}", APP_TITLE);
    println!("{}", APP_SUBTITLE);
    println!();
    println!("{}", WELCOME_MESSAGE);
    println!("Type /help for commands.");
    log.push(Message::new(MessageRole::Assistant, WELCOME_MESSAGE));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    prompt_line(session.is_some());

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break, // stdin closed
                    Err(e) => {
                        warn!("Failed to read input: {}", e);
                        break;
                    }
                };
                let input = line.trim();
                if input.is_empty() {
                    prompt_line(session.is_some());
                    continue;
                }

                match parse_command(input) {
                    Command::Quit => break,
                    Command::Help => println!("{}", HELP),
                    Command::Topics => print_topics(),
                    Command::Topic(n) => {
                        match shortcut_question(n) {
                            Some(question) => {
                                println!("you> {}", question);
                                ask(&chat, &mut log, question, thinking).await;
                            }
                            None => println!("No shortcut numbered {}.", n),
                        }
                    }
                    Command::Think => {
                        thinking = !thinking;
                        println!(
                            "Reasoning pass {}.",
                            if thinking { "enabled" } else { "disabled" }
                        );
                    }
                    Command::Speak(n) => match log.get(n) {
                        Some(message) if !message.content.is_empty() => {
                            let text = message.content.clone();
                            speak(&chat, &settings, &text).await;
                        }
                        _ => println!("No message numbered {}.", n),
                    },
                    Command::Mark(n) => toggle_mark(&mut log, bookmarks.as_mut(), n),
                    Command::Marks => print_marks(bookmarks.as_ref()),
                    Command::Live => {
                        if let Some(mut open) = session.take() {
                            println!("Stopping live session...");
                            open.stop().await;
                        } else {
                            match LiveSession::start(
                                &settings,
                                &api_key,
                                &LIVE_SYSTEM_PROMPT,
                                update_tx.clone(),
                            )
                            .await
                            {
                                Ok(new) => {
                                    session = Some(new);
                                    println!("Live session open. Speak; /live again to stop.");
                                }
                                Err(e) => println!("Could not start live session: {}", e),
                            }
                        }
                    }
                    Command::Ask(question) => {
                        ask(&chat, &mut log, &question, thinking).await;
                    }
                }
                prompt_line(session.is_some());
            }

            update = update_rx.recv() => {
                match update {
                    Some(SessionUpdate::UserTranscript(text)) => {
                        println!("[you] {}", text);
                    }
                    Some(SessionUpdate::ModelTranscript(text)) => {
                        println!("[assistant] {}", text);
                    }
                    Some(SessionUpdate::Turn(messages)) => {
                        for message in messages {
                            log.push(message);
                        }
                    }
                    Some(SessionUpdate::Notice(text)) => {
                        println!("! {}", text);
                    }
                    Some(SessionUpdate::Closed) => {
                        session = None;
                        println!("Live session closed.");
                        prompt_line(false);
                    }
                    None => {}
                }
            }
        }
    }

    if let Some(mut open) = session.take() {
        open.stop().await;
    }
    println!("Goodbye.");
}

enum Command {
    Ask(String),
    Topics,
    Topic(usize),
    Live,
    Speak(usize),
    Mark(usize),
    Marks,
    Think,
    Help,
    Quit,
}

fn parse_command(input: &str) -> Command {
    let mut parts = input.splitn(2, char::is_whitespace);
    let head = parts.next().unwrap_or_default();
    let rest = parts.next().unwrap_or_default().trim();

    match head {
        "/quit" | "/exit" => Command::Quit,
        "/help" => Command::Help,
        "/topics" => Command::Topics,
        "/topic" => match rest.parse::<usize>() {
            Ok(n) => Command::Topic(n),
            Err(_) => Command::Help,
        },
        "/live" => Command::Live,
        "/speak" => match rest.parse::<usize>() {
            Ok(n) => Command::Speak(n),
            Err(_) => Command::Help,
        },
        "/mark" => match rest.parse::<usize>() {
            Ok(n) => Command::Mark(n),
            Err(_) => Command::Help,
        },
        "/marks" => Command::Marks,
        "/think" => Command::Think,
        _ => Command::Ask(input.to_string()),
    }
}

/// Send a question and stream the answer to the terminal, appending both
/// sides to the log as they settle.
async fn ask(chat: &ChatClient, log: &mut MessageLog, question: &str, thinking: bool) {
    let history: Vec<Message> = log.iter().cloned().collect();
    log.push(Message::new(MessageRole::User, question));

    let mut rx = chat.send_stream(question, &history, thinking);
    let answer_id = log.push(Message::new(MessageRole::Assistant, ""));

    print!("assistant> ");
    flush_stdout();
    while let Some(fragment) = rx.recv().await {
        print!("{}", fragment);
        flush_stdout();
        log.append_content(answer_id, &fragment);
    }
    println!();
}

/// Synthesize a message and play it through the speaker, holding the device
/// only as long as the clip runs.
async fn speak(chat: &ChatClient, settings: &AppSettings, text: &str) {
    let Some(bytes) = chat.synthesize_speech(text).await else {
        println!("No audio came back for that message.");
        return;
    };

    let sink = match SpeakerSink::open(settings.output_sample_rate) {
        Ok(sink) => sink,
        Err(e) => {
            println!("Speaker unavailable: {}", e);
            return;
        }
    };

    let mut scheduler = PlaybackScheduler::new(sink, settings.output_sample_rate);
    let frames = codec::bytes_to_frames(&bytes, 1);
    let seconds = frames.len() as f64 / settings.output_sample_rate as f64;

    match scheduler.schedule_chunk(frames) {
        Ok(_) => tokio::time::sleep(Duration::from_secs_f64(seconds + 0.2)).await,
        Err(e) => println!("Playback failed: {}", e),
    }
    scheduler.teardown();
}

fn toggle_mark(log: &mut MessageLog, bookmarks: Option<&mut BookmarkStore>, index: usize) {
    let Some(message) = log.toggle_bookmark(index) else {
        println!("No message numbered {}.", index);
        return;
    };

    if let Some(store) = bookmarks {
        match store.toggle(&message) {
            Ok(true) => println!("Bookmarked message {}.", index),
            Ok(false) => println!("Removed bookmark on message {}.", index),
            Err(e) => warn!("Failed to save bookmarks: {}", e),
        }
    } else {
        println!(
            "Message {} {} (not persisted; no config directory).",
            index,
            if message.bookmarked { "bookmarked" } else { "unbookmarked" }
        );
    }
}

fn print_marks(bookmarks: Option<&BookmarkStore>) {
    let Some(store) = bookmarks else {
        println!("Bookmark storage is unavailable.");
        return;
    };
    if store.is_empty() {
        println!("No bookmarks yet. Use /mark N to keep an answer.");
        return;
    }
    for (i, message) in store.iter().enumerate() {
        println!(
            "{:2}. [{}] {}",
            i,
            message.timestamp.format("%Y-%m-%d %H:%M"),
            message.content
        );
    }
}

fn print_topics() {
    println!("Contract Knowledge:");
    for (i, s) in CONTRACT_SHORTCUTS.iter().enumerate() {
        println!("  {:2}. {}", i, s.label);
    }
    println!("MOUs & Stipends:");
    for (i, s) in STIPEND_SHORTCUTS.iter().enumerate() {
        println!("  {:2}. {}", i + CONTRACT_SHORTCUTS.len(), s.label);
    }
    println!("Ask one with /topic N.");
}

fn shortcut_question(n: usize) -> Option<&'static str> {
    CONTRACT_SHORTCUTS
        .iter()
        .chain(STIPEND_SHORTCUTS)
        .nth(n)
        .map(|s| s.question)
}

fn prompt_line(live: bool) {
    if live {
        print!("(live) you> ");
    } else {
        print!("you> ");
    }
    flush_stdout();
}

fn flush_stdout() {
    let _ = std::io::stdout().flush();
}
