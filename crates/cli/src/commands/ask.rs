//! `backpacker ask`: answer a single question.

use backpacker_core::message::SessionId;

use super::{load_assistant, print_answer};

pub async fn run(message: &str, session: &str) -> Result<(), Box<dyn std::error::Error>> {
    let (_, assistant) = load_assistant()?;

    eprint!("  Thinking...");
    let answer = assistant
        .handle_query(&SessionId::from(session), message)
        .await;
    eprint!("\r              \r");

    print_answer(&answer, "");
    Ok(())
}
