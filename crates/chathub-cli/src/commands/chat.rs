//! `chathub chat [addr]`: interactive line-protocol client.
//!
//! Lines typed on stdin go to the hub verbatim (`MSG_ALL:hi`,
//! `MSG_USER:bob:hi`, ...); everything the hub sends is printed. `EXIT`
//! logs out and quits.

use anyhow::{Context, Result};
use std::io::Write;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::debug;

const EXIT: &str = "EXIT";

pub async fn run(addr: &str, name: Option<&str>) -> Result<()> {
    let stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("failed to connect to {addr}"))?;
    debug!(addr, "connected");
    let (read_half, mut write_half) = stream.into_split();
    let mut server = BufReader::new(read_half).lines();
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    let name = match name {
        Some(name) => name.to_string(),
        None => {
            print!("Enter your username: ");
            std::io::stdout().flush()?;
            stdin
                .next_line()
                .await?
                .context("stdin closed before a username was entered")?
        }
    };
    write_half
        .write_all(format!("LOGIN:{}\n", name.trim()).as_bytes())
        .await
        .context("failed to send login")?;

    loop {
        tokio::select! {
            line = server.next_line() => match line.context("failed to read from hub")? {
                Some(line) => println!("{line}"),
                None => {
                    println!("Connection closed by hub");
                    break;
                }
            },
            input = stdin.next_line() => {
                let Some(input) = input? else {
                    break;
                };
                let input = input.trim();
                if input.is_empty() {
                    continue;
                }
                if input == EXIT {
                    write_half.write_all(b"LOGOUT\n").await.ok();
                    break;
                }
                write_half
                    .write_all(format!("{input}\n").as_bytes())
                    .await
                    .context("failed to send to hub")?;
            }
        }
    }

    Ok(())
}
