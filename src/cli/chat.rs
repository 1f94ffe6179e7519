use std::future::Future;
use std::io::{self, Write};

use anyhow::Result;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tokio::sync::mpsc;

use crate::ai::chat::{ChatSession, Role, SubmitOutcome, TurnEvent};
use crate::anthropic::AnthropicClient;
use crate::core::{AppConfig, Credential, Model, logging};

/// Prints turn events as they arrive.
#[derive(Default)]
struct Renderer {
    // Response text is already on screen
    streamed: bool,
}

impl Renderer {
    fn render(&mut self, event: &TurnEvent) {
        match event {
            TurnEvent::Fragment { text, .. } => {
                self.streamed = true;
                print!("{}", text);
                let _ = io::stdout().flush();
            }
            TurnEvent::Error { message } => {
                if self.streamed {
                    println!();
                    self.streamed = false;
                }
                eprintln!("{}", message);
            }
            TurnEvent::Message { message } if message.role == Role::Assistant => {
                if !self.streamed {
                    print!("{}", message.content);
                }
            }
            TurnEvent::Refresh => {
                println!("\n");
                self.streamed = false;
            }
            _ => {}
        }
    }
}

/// Drives `turn` to completion while rendering its events so tokens
/// show up as soon as they are produced.
async fn render_turn<F: Future>(
    turn: F,
    rx: &mut mpsc::UnboundedReceiver<TurnEvent>,
    renderer: &mut Renderer,
) -> F::Output {
    tokio::pin!(turn);
    let output = loop {
        tokio::select! {
            output = &mut turn => break output,
            Some(event) = rx.recv() => renderer.render(&event),
        }
    };
    while let Ok(event) = rx.try_recv() {
        renderer.render(&event);
    }
    output
}

/// Keeps asking until a non-empty key is entered. `None` if the
/// operator gives up with Ctrl-C or Ctrl-D.
fn prompt_for_credential(rl: &mut DefaultEditor) -> Result<Option<Credential>> {
    loop {
        match rl.readline("Enter your Anthropic API key: ") {
            Ok(line) => {
                let api_key = Credential::new(&line);
                if !api_key.is_empty() {
                    return Ok(Some(api_key));
                }
                println!("Please enter your Anthropic API key to continue.");
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => return Ok(None),
            Err(err) => return Err(err.into()),
        }
    }
}

pub async fn run(model: Option<Model>) -> Result<()> {
    logging::init(&format!("{}=warn", env!("CARGO_CRATE_NAME")));

    let mut rl = DefaultEditor::new()?;
    let mut config = AppConfig::default();
    if let Some(model) = model {
        config.model = model;
    }

    let api_key = match config.anthropic_api_key.clone() {
        Some(api_key) => api_key,
        None => match prompt_for_credential(&mut rl)? {
            Some(api_key) => api_key,
            None => return Ok(()),
        },
    };

    let client = AnthropicClient::new(&config.anthropic_api_hostname);
    let mut session = ChatSession::new(config.session_config(api_key))?;
    let mut rx = session.subscribe();
    let mut renderer = Renderer::default();

    println!("Chat with Wittly ({})\n", session.model().display_name());
    render_turn(session.introduce(&client), &mut rx, &mut renderer).await;

    loop {
        let readline = rl.readline(">>> ");
        match readline {
            Ok(line) => {
                if session.submit_user_turn(&line) != SubmitOutcome::Accepted {
                    continue;
                }
                let _ = rl.add_history_entry(line.as_str());
                render_turn(session.run_streaming_turn(&client), &mut rx, &mut renderer).await;
            }
            Err(ReadlineError::Interrupted) => break,
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                println!("Error: {:?}", err);
                break;
            }
        }
    }

    Ok(())
}
