//! Interactive REPL for the chat client.
//!
//! Readline loop with history, slash commands, streaming response display
//! and Ctrl+C to stop an in-flight response. Generated images land as PNG
//! files in the temp dir since a terminal cannot render them inline.

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::Result;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::credentials::CredentialStore;
use crate::message::{IMAGE_TOOL_NAME, UiEvent};

use super::{ChatClient, ChatStatus};

const SUGGESTIONS: [&str; 3] = [
    "Generate a futuristic city",
    "Generate a retro car",
    "Generate a cute cat",
];

pub struct Repl {
    editor: DefaultEditor,
    client: ChatClient,
    history_path: PathBuf,
}

impl Repl {
    pub fn new(client: ChatClient) -> Result<Self> {
        let editor = DefaultEditor::new()?;
        let history_path = dirs::home_dir()
            .unwrap_or_default()
            .join(".atelier")
            .join("history");

        Ok(Self {
            editor,
            client,
            history_path,
        })
    }

    fn load_history(&mut self) {
        if self.history_path.exists() {
            let _ = self.editor.load_history(&self.history_path);
        }
    }

    fn save_history(&mut self) {
        if let Some(parent) = self.history_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let _ = self.editor.save_history(&self.history_path);
    }

    /// Run the REPL loop until EOF or `/quit`.
    pub async fn run(&mut self) -> Result<()> {
        self.load_history();

        println!("Chat with the assistant. Ask it to generate images, for example:");
        for suggestion in SUGGESTIONS {
            println!("  {}", suggestion);
        }
        println!("Type /help for commands; Ctrl+C stops a streaming response.");
        println!();

        loop {
            match self.editor.readline("> ") {
                Ok(line) => {
                    let input = line.trim().to_string();
                    if input.is_empty() {
                        continue;
                    }
                    self.editor.add_history_entry(&line)?;

                    if input.starts_with('/') {
                        if !self.handle_command(&input).await? {
                            break;
                        }
                        continue;
                    }

                    self.send_turn(&input).await?;
                }
                Err(ReadlineError::Interrupted) => {
                    println!("^C");
                    continue;
                }
                Err(ReadlineError::Eof) => break,
                Err(e) => {
                    eprintln!("Error: {:?}", e);
                    break;
                }
            }
        }

        self.save_history();
        Ok(())
    }

    /// Handle a slash command; `false` means exit the loop.
    async fn handle_command(&mut self, command: &str) -> Result<bool> {
        match command {
            "/help" => {
                println!("Commands:");
                println!("  /help   - Show this help");
                println!("  /retry  - Regenerate the last response");
                println!("  /keys   - Show configured API keys");
                println!("  /clear  - Clear the conversation");
                println!("  /quit   - Exit");
            }
            "/retry" => match self.client.regenerate() {
                Some(rx) => self.consume_stream(rx).await?,
                None => println!("Nothing to retry."),
            },
            "/keys" => {
                let (gateway, openai) = self.client.credentials().load();
                println!("gateway key: {}", mask(&gateway));
                println!("openai key:  {}", mask(&openai));
                println!("scope:       {}", self.client.credentials().scope().as_str());
            }
            "/clear" => {
                self.client.reset();
                println!("Conversation cleared.");
            }
            "/quit" | "/exit" => return Ok(false),
            _ => println!("Unknown command: {}. Try /help", command),
        }
        Ok(true)
    }

    async fn send_turn(&mut self, text: &str) -> Result<()> {
        match self.client.send(text) {
            Some(rx) => self.consume_stream(rx).await,
            None => {
                println!("A response is still in flight.");
                Ok(())
            }
        }
    }

    /// Drain one response stream, printing as events arrive.
    async fn consume_stream(&mut self, mut rx: mpsc::Receiver<UiEvent>) -> Result<()> {
        let mut printer = EventPrinter::default();

        loop {
            tokio::select! {
                maybe = rx.recv() => match maybe {
                    Some(event) => {
                        printer.print(&event)?;
                        self.client.apply(event);
                    }
                    None => break,
                },
                _ = tokio::signal::ctrl_c() => {
                    self.client.stop();
                    printer.finish()?;
                    println!("  [stopped]");
                    return Ok(());
                }
            }
        }

        self.client.settle();
        printer.finish()?;

        if self.client.conversation().status() == ChatStatus::Error {
            if let Some(error) = self.client.conversation().last_error() {
                eprintln!("Error: {}", error);
            }
        }
        Ok(())
    }
}

/// Incremental printer for one response stream.
#[derive(Default)]
struct EventPrinter {
    printed_text: bool,
}

impl EventPrinter {
    fn print(&mut self, event: &UiEvent) -> Result<()> {
        match event {
            UiEvent::TextDelta { delta, .. } => {
                if !self.printed_text {
                    println!();
                    self.printed_text = true;
                }
                print!("{}", delta);
                io::stdout().flush()?;
            }
            UiEvent::ToolInputStart { tool_name, .. } if tool_name == IMAGE_TOOL_NAME => {
                self.break_line();
                println!("  [generating image...]");
            }
            UiEvent::ToolInputAvailable { input, .. } => {
                if let Some(prompt) = input.get("prompt").and_then(Value::as_str) {
                    println!("  [prompt: {}]", prompt);
                }
            }
            UiEvent::ToolOutputAvailable { output, .. } => {
                self.break_line();
                print_image(output);
            }
            UiEvent::ToolOutputError { error_text, .. } => {
                self.break_line();
                println!("  [image failed: {}]", error_text);
            }
            // Surfaced once the stream settles.
            UiEvent::Error { .. } => {}
            UiEvent::Finish => self.break_line(),
            _ => {}
        }
        Ok(())
    }

    /// Terminate a partial text line before printing a status line.
    fn break_line(&mut self) {
        if self.printed_text {
            println!();
            self.printed_text = false;
        }
    }

    fn finish(&mut self) -> Result<()> {
        self.break_line();
        io::stdout().flush()?;
        Ok(())
    }
}

fn print_image(output: &Value) {
    let image = output.get("image").and_then(Value::as_str).unwrap_or("");
    if image.is_empty() {
        println!("  [image unavailable]");
        return;
    }

    match BASE64.decode(image) {
        Ok(bytes) => {
            let path =
                std::env::temp_dir().join(format!("atelier-{}.png", Uuid::new_v4().simple()));
            match std::fs::write(&path, bytes) {
                Ok(()) => println!("  [image saved to {}]", path.display()),
                Err(e) => println!("  [image write failed: {}]", e),
            }
        }
        Err(e) => println!("  [image decode failed: {}]", e),
    }
}

fn mask(key: &str) -> String {
    if key.is_empty() {
        return "(not set)".into();
    }
    let prefix: String = key.chars().take(8).collect();
    format!("{}...", prefix)
}

/// Build a client for the given relay endpoint and run the REPL on it.
pub async fn run(endpoint: String) -> Result<()> {
    let credentials = CredentialStore::from_default_dirs();
    let client = ChatClient::new(endpoint, credentials);
    Repl::new(client)?.run().await
}
