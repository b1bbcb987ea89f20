//! Interactive session loop for `genie chat`.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use genie_adapters::Session;
use genie_proto::{BridgeError, SessionState};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};

const HELP: &str = "\
Commands:
  /model <name>   switch model
  /save [path]    save the conversation (default: chat_history_path)
  /load [path]    load a conversation (default: chat_history_path)
  /clear          clear the conversation
  /help           show this help
  /quit           end the session
Anything else is sent to the chat as-is.";

/// One line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ReplCommand {
    Empty,
    Quit,
    Help,
    Clear,
    Model(String),
    Save(Option<PathBuf>),
    Load(Option<PathBuf>),
    Ask(String),
}

impl ReplCommand {
    fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return ReplCommand::Empty;
        }

        let (head, rest) = line
            .split_once(char::is_whitespace)
            .map_or((line, ""), |(head, rest)| (head, rest.trim()));
        let path = || (!rest.is_empty()).then(|| PathBuf::from(rest.trim_matches('"')));

        match head {
            "/quit" | "/exit" => ReplCommand::Quit,
            "/help" => ReplCommand::Help,
            "/clear" if rest.is_empty() => ReplCommand::Clear,
            "/model" if rest.is_empty() => ReplCommand::Help,
            "/model" => ReplCommand::Model(rest.to_string()),
            "/save" => ReplCommand::Save(path()),
            "/load" => ReplCommand::Load(path()),
            _ => ReplCommand::Ask(line.to_string()),
        }
    }
}

/// Launches the chat, walking the user through sign-in when needed.
pub async fn ensure_started(session: &Session) -> Result<()> {
    match session.start().await {
        Ok(()) => Ok(()),
        Err(BridgeError::NotReady(SessionState::AwaitingAuth)) => {
            let url = session.auth_url().await.unwrap_or_default();
            eprintln!("Open this URL to sign in, then press Enter:\n  {url}");
            let mut line = String::new();
            BufReader::new(tokio::io::stdin())
                .read_line(&mut line)
                .await
                .context("Failed to read stdin")?;
            session.start().await.context("Failed to launch the chat")
        }
        Err(e) => Err(e).context("Failed to start the session"),
    }
}

/// Reads commands from stdin until `/quit`, end of input or ctrl-c.
pub async fn run(session: &Session, model: Option<&str>) -> Result<()> {
    ensure_started(session).await?;
    if let Some(model) = model {
        println!("{}", session.select_model(model).await?);
    }
    println!("Session ready. Type /help for commands.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"genie> ").await?;
        stdout.flush().await?;

        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                None
            }
        };
        let Some(line) = line else {
            println!();
            break;
        };

        match ReplCommand::parse(&line) {
            ReplCommand::Empty => {}
            ReplCommand::Quit => break,
            ReplCommand::Help => println!("{HELP}"),
            command => match execute(session, command).await {
                Ok(reply) => println!("{reply}"),
                Err(BridgeError::SessionClosed) => bail!("The chat process exited"),
                Err(e) => {
                    warn!(error = %e, "Command failed");
                    eprintln!("error: {e}");
                }
            },
        }
    }

    Ok(())
}

async fn execute(session: &Session, command: ReplCommand) -> Result<String, BridgeError> {
    let history = || session.config().chat_history_path.clone();
    let missing_path = || BridgeError::Config("no path given and chat_history_path is not set".into());

    match command {
        ReplCommand::Clear => Ok(if session.clear_conversation().await? {
            "Conversation cleared".to_string()
        } else {
            "Conversation not cleared".to_string()
        }),
        ReplCommand::Model(name) => session.select_model(&name).await,
        ReplCommand::Save(path) => {
            let path = path.or_else(history).ok_or_else(missing_path)?;
            session.save_conversation(&path).await
        }
        ReplCommand::Load(path) => {
            let path = path.or_else(history).ok_or_else(missing_path)?;
            session.load_conversation(&path).await
        }
        ReplCommand::Ask(text) => session.ask(&text, None).await,
        ReplCommand::Empty | ReplCommand::Quit | ReplCommand::Help => Ok(String::new()),
    }
}
