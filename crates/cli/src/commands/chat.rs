//! `backpacker chat`: interactive mode over stdin.

use std::io::Write;

use backpacker_core::message::SessionId;
use tokio::io::{AsyncBufReadExt, BufReader};

use super::{load_assistant, print_answer};

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let (config, assistant) = load_assistant()?;
    let session = SessionId::new();

    println!();
    println!("  Backpacker: interactive mode");
    println!();
    println!("  Provider:     {}", config.default_provider);
    println!("  Model:        {}", config.default_model);
    println!(
        "  Capabilities: {}",
        assistant.reasoning().registry().names().join(", ")
    );
    println!();
    println!("  Ask about destinations, weather or trip costs.");
    println!("  Type '/reset' to start over, 'exit' or Ctrl+D to quit.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        match line.trim() {
            "" => continue,
            "exit" | "quit" => break,
            "/reset" => {
                assistant.reset_session(&session).await;
                println!("  (conversation cleared)\n");
                continue;
            }
            query => {
                eprint!("  ...");
                let answer = assistant.handle_query(&session, query).await;
                eprint!("\r     \r");
                println!();
                print_answer(&answer, "  Backpacker > ");
                println!();
            }
        }
    }

    println!();
    println!("  Safe travels!");
    println!();
    Ok(())
}
