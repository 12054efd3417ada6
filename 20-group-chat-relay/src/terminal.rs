use anyhow::{Context, Result};
use tokio::{
    io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader},
    select,
    sync::mpsc::Receiver,
};
use tracing::warn;

use crate::{
    cli::ClientArgs,
    client::ChatClient,
    topic::{ClientIdentity, TopicMessage},
};

pub async fn run(args: ClientArgs) -> Result<()> {
    let identity = ClientIdentity::new(args.topic, args.sender)?;
    let mut client = ChatClient::connect(args.server, identity)
        .await
        .with_context(|| format!("failed to join chat at {}", args.server))?;
    let mut inbox = client.messages()?;

    write_stdout(&format!(
        "*** joined {} as {} via {}",
        client.identity().topic_id(),
        client.identity().sender_id(),
        client.server_addr()
    ))
    .await?;

    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut input = String::new();

    run_terminal_loop(&client, &mut inbox, &mut stdin, &mut input, args.json).await?;

    if let Err(error) = client.close().await {
        warn!(?error, "failed to shut down connection cleanly");
    }
    Ok(())
}

async fn run_terminal_loop(
    client: &ChatClient,
    inbox: &mut Receiver<TopicMessage>,
    stdin: &mut BufReader<tokio::io::Stdin>,
    input: &mut String,
    json: bool,
) -> Result<()> {
    loop {
        select! {
            message = inbox.recv() => {
                match message {
                    Some(message) => render_message(&message, json).await?,
                    None => {
                        write_stdout("*** disconnected from relay").await?;
                        break;
                    }
                }
            }
            // A cancelled read_line leaves its partial line in `input`, so only
            // clear it once a whole line has been handled.
            bytes_read = stdin.read_line(input) => {
                let keep_going = handle_stdin_input(bytes_read, input, client).await?;
                input.clear();
                if !keep_going {
                    break;
                }
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                if let Err(error) = ctrl_c {
                    warn!(?error, "ctrl-c handler failed");
                }
                break;
            }
        }
    }
    Ok(())
}

async fn handle_stdin_input(
    bytes_read: io::Result<usize>,
    input: &str,
    client: &ChatClient,
) -> Result<bool> {
    if bytes_read? == 0 {
        return Ok(false);
    }

    let text = input.trim();
    if text.is_empty() {
        return Ok(true);
    }

    if text.eq_ignore_ascii_case("/quit") {
        write_stdout("*** leaving chat").await?;
        return Ok(false);
    }

    if let Err(error) = client.send(text).await {
        write_stderr(&format!("!!! {error}")).await?;
        return Ok(client.is_connected());
    }
    Ok(true)
}

async fn render_message(message: &TopicMessage, json: bool) -> Result<()> {
    let line = if json {
        serde_json::to_string(message)?
    } else {
        format!("<{}> {}", message.sender_id, message.body)
    };
    write_stdout(&line).await?;
    Ok(())
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}

async fn write_stderr(line: &str) -> io::Result<()> {
    let mut stderr = tokio::io::stderr();
    stderr.write_all(line.as_bytes()).await?;
    stderr.write_all(b"\n").await?;
    stderr.flush().await
}
