// ABOUTME: `livebuild chat` sends one follow-up message and prints the streamed reply

use anyhow::{bail, Result};

use livebuild_cli::{render, App};
use livebuild_session::ChatMessage;

pub async fn handle_chat(app: &App, message: &str) -> Result<()> {
    let consumer = app.follow_ups()?;
    println!("{}", render::message_line(&ChatMessage::user(message)));

    let turn = consumer.send(message).await?;
    println!("{}", render::message_line(&turn));

    if turn.error.is_some() {
        bail!("The reply did not complete");
    }
    Ok(())
}
